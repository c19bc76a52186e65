//! Persisted symbol maps.
//!
//! Raw addresses are meaningless in the next run of a process because every
//! image lands at a different load bias. A [`SymbolMap`] therefore records, next
//! to each symbol, the module it came from and that module's bias at save time.
//! Reloading rebases every entry onto the module's current bias and drops
//! entries whose module is not loaded.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ItemSize, SymbolKind};
use crate::error::{BurrowError, Result};
use crate::types::{Address, ImageInfo};

/// Current on-disk format version.
pub const SYMBOL_MAP_VERSION: u32 = 1;

/// One persisted symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMapEntry
{
    /// Runtime address when the map was saved.
    pub address: Address,
    /// Owning module name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Dereference width.
    #[serde(default)]
    pub item_size: ItemSize,
    /// Symbol-table classification.
    pub kind: SymbolKind,
}

/// On-disk representation of a jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMap
{
    /// Format version.
    pub version: u32,
    /// Load bias of every referenced module at save time.
    pub images: BTreeMap<String, i64>,
    /// Symbols by name.
    pub symbols: BTreeMap<String, SymbolMapEntry>,
}

/// Outcome of rebasing a map onto the current process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RebasedSymbols
{
    /// `(name, new address, entry)` for every entry that could be rebased.
    pub entries: Vec<(String, Address, SymbolMapEntry)>,
    /// Names whose module is not loaded (or was never recorded).
    pub dropped: Vec<String>,
}

impl Default for SymbolMap
{
    fn default() -> Self
    {
        Self { version: SYMBOL_MAP_VERSION, images: BTreeMap::new(), symbols: BTreeMap::new() }
    }
}

impl SymbolMap
{
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Add a symbol; its module's current bias is recorded from `images`.
    pub fn insert(&mut self, name: impl Into<String>, entry: SymbolMapEntry, images: &[ImageInfo])
    {
        if let Some(module) = &entry.module {
            if !self.images.contains_key(module) {
                if let Some(image) = images.iter().find(|image| image.name() == module) {
                    self.images.insert(module.clone(), image.slide);
                }
            }
        }
        self.symbols.insert(name.into(), entry);
    }

    /// Write the map as pretty-printed JSON.
    ///
    /// ## Errors
    ///
    /// `Io` on write failure, `Serialization` if encoding fails.
    pub fn save(&self, path: &Path) -> Result<()>
    {
        let json = serde_json::to_string_pretty(self).map_err(|err| BurrowError::Serialization(err.to_string()))?;
        fs::write(path, json)?;
        debug!("Saved {} symbols to {}", self.symbols.len(), path.display());
        Ok(())
    }

    /// Read a map written by [`SymbolMap::save`].
    ///
    /// ## Errors
    ///
    /// `Io` on read failure, `Serialization` for malformed files or unknown
    /// versions.
    pub fn load(path: &Path) -> Result<Self>
    {
        let json = fs::read_to_string(path)?;
        let map: Self = serde_json::from_str(&json)
            .map_err(|err| BurrowError::Serialization(format!("{}: {err}", path.display())))?;
        if map.version != SYMBOL_MAP_VERSION {
            return Err(BurrowError::Serialization(format!(
                "{}: unsupported symbol map version {}",
                path.display(),
                map.version
            )));
        }
        Ok(map)
    }

    /// Rebase every entry onto the load biases in `images`.
    #[must_use]
    pub fn rebase(&self, images: &[ImageInfo]) -> RebasedSymbols
    {
        let mut rebased = RebasedSymbols::default();
        for (name, entry) in &self.symbols {
            let Some(module) = &entry.module else {
                rebased.dropped.push(name.clone());
                continue;
            };
            let saved_slide = self.images.get(module);
            let current = images.iter().find(|image| image.name() == module);
            match (saved_slide, current) {
                (Some(saved), Some(image)) => {
                    let address = entry.address.offset(image.slide.wrapping_sub(*saved));
                    rebased.entries.push((name.clone(), address, entry.clone()));
                }
                _ => rebased.dropped.push(name.clone()),
            }
        }
        if !rebased.dropped.is_empty() {
            warn!("Dropped {} symbols whose module is not loaded", rebased.dropped.len());
        }
        rebased
    }
}
