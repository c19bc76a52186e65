//! Name resolution, symbol-table loading and symbol-map persistence.

use std::path::Path;

use tracing::{debug, info, warn};

use super::Client;
use crate::error::{BurrowError, Result};
use crate::symbols::{load_image_symbols, split_module_hint, Symbol, SymbolJar, SymbolKind, SymbolMap, SymbolMapEntry};
use crate::types::{Address, ImageInfo};

/// Outcome of [`Client::load_symbol_map`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolMapSummary
{
    /// Entries rebased and bound in the default jar.
    pub loaded: usize,
    /// Names dropped because their module is not loaded.
    pub dropped: Vec<String>,
}

impl Client
{
    /// Resolve `name` (optionally `name{module}`) to a symbol.
    ///
    /// The default jar is consulted first. On a miss the backend is asked once
    /// and a successful answer is cached in the jar; failures are not cached.
    ///
    /// ## Errors
    ///
    /// `Lookup` when neither the jar nor the backend knows the name.
    pub fn resolve(&mut self, name: &str) -> Result<Symbol>
    {
        self.ensure_attached()?;
        if let Some(entry) = self.symbols.entry(name) {
            return Ok(entry.symbol);
        }

        let (bare, module) = split_module_hint(name);
        let Some(address) = self.backend.resolve_symbol(bare, module)? else {
            return Err(BurrowError::Lookup(name.to_string()));
        };
        let symbol = self.symbol(address);
        self.symbols.insert(name, symbol, SymbolKind::Unknown, module);
        debug!("Resolved {name} to {symbol}");
        Ok(symbol)
    }

    /// The default jar.
    #[must_use]
    pub const fn symbols(&self) -> &SymbolJar
    {
        &self.symbols
    }

    /// The default jar, mutably.
    pub fn symbols_mut(&mut self) -> &mut SymbolJar
    {
        &mut self.symbols
    }

    /// Read the symbol tables of every loaded image whose path contains
    /// `filter` (all images for `None`) into the default jar.
    ///
    /// Each symbol is bound as `name` and `name{module}`. Images whose file
    /// cannot be read are skipped with a warning. Returns the number of
    /// symbols read.
    ///
    /// ## Errors
    ///
    /// `Backend` when the image list is unavailable.
    pub fn rebind_symbols(&mut self, filter: Option<&str>) -> Result<usize>
    {
        let images = self.images()?;
        let mut count = 0;
        for image in images.iter().filter(|image| filter.map_or(true, |filter| image.name_matches(filter))) {
            let table = match load_image_symbols(image) {
                Ok(table) => table,
                Err(err) => {
                    warn!("Skipping symbols of {}: {err}", image.path().display());
                    continue;
                }
            };
            let module = image.name().to_string();
            for entry in table {
                let symbol = self.symbol(entry.address);
                self.symbols.insert(format!("{}{{{module}}}", entry.name), symbol, entry.kind, Some(module.as_str()));
                self.symbols.insert(entry.name, symbol, entry.kind, Some(module.as_str()));
                count += 1;
            }
        }
        info!("Loaded {count} symbols from {} images", images.len());
        Ok(count)
    }

    /// Persist the default jar to `path` (the configured map path for `None`).
    ///
    /// Module hints such as `libsystem_c` are widened to the loaded image they
    /// match. Symbols without a known module are attributed to the image
    /// containing their address; symbols outside every image are still written
    /// but will be dropped on reload. Returns the number of symbols written.
    ///
    /// ## Errors
    ///
    /// `Io` or `Serialization` on write failure, `Backend` when the image list
    /// is unavailable.
    pub fn save_symbol_map(&self, path: Option<&Path>) -> Result<usize>
    {
        let images = self.images()?;
        let mut map = SymbolMap::new();
        for (name, entry) in &self.symbols {
            let module = owning_module(&images, entry.symbol.address(), self.symbols.module_of(name));
            let persisted = SymbolMapEntry {
                address: entry.symbol.address(),
                module,
                item_size: entry.symbol.item_size(),
                kind: entry.kind,
            };
            map.insert(name, persisted, &images);
        }
        let path = path.unwrap_or(self.config.symbol_map_path.as_path());
        map.save(path)?;
        Ok(map.symbols.len())
    }

    /// Load a symbol map written by [`Client::save_symbol_map`] into the default
    /// jar, rebasing every entry onto its module's current load bias.
    ///
    /// ## Errors
    ///
    /// `Io` or `Serialization` when the file cannot be read, `Backend` when the
    /// image list is unavailable.
    pub fn load_symbol_map(&mut self, path: Option<&Path>) -> Result<SymbolMapSummary>
    {
        let path = path.unwrap_or(self.config.symbol_map_path.as_path()).to_path_buf();
        let map = SymbolMap::load(&path)?;
        let images = self.images()?;
        let rebased = map.rebase(&images);

        let mut summary = SymbolMapSummary { loaded: 0, dropped: rebased.dropped };
        for (name, address, entry) in rebased.entries {
            let symbol = self.symbol(address).with_item_size(entry.item_size);
            self.symbols.insert(name, symbol, entry.kind, entry.module.as_deref());
            summary.loaded += 1;
        }
        info!(
            "Loaded {} symbols from {} ({} dropped)",
            summary.loaded,
            path.display(),
            summary.dropped.len()
        );
        Ok(summary)
    }
}

/// Image name a symbol at `address` belongs to.
///
/// A hint naming a loaded image exactly wins. Otherwise the hint is treated as
/// a substring, preferring the matching image that contains `address`. Without
/// a hint the containing image is used.
fn owning_module(images: &[ImageInfo], address: Address, hint: Option<&str>) -> Option<String>
{
    let Some(hint) = hint else {
        return images.iter().find(|image| image.contains(address)).map(|image| image.name().to_string());
    };
    let image = images
        .iter()
        .find(|image| image.name() == hint)
        .or_else(|| images.iter().find(|image| image.contains(address) && image.name_matches(hint)))
        .or_else(|| images.iter().find(|image| image.name_matches(hint)));
    Some(image.map_or_else(|| hint.to_string(), |image| image.name().to_string()))
}
