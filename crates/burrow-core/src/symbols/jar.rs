//! Named collections of resolved symbols.
//!
//! A [`SymbolJar`] maps unique names to [`Symbol`]s together with what the
//! image symbol table said about them (code or data, owning module). Every
//! filter returns a fresh jar, so narrowing a jar never disturbs the one it
//! came from:
//!
//! ```rust,no_run
//! use burrow_core::{Client, MonitorSpec};
//!
//! # fn demo(client: &mut Client) -> burrow_core::Result<()> {
//! let xpc = client
//!     .symbols()
//!     .filter_starts_with("xpc_connection_send", true)
//!     .filter_code_symbols()
//!     .without_module_names();
//! xpc.monitor(client, &MonitorSpec::new().with_register("x1", "po".parse()?))?;
//! # Ok(())
//! # }
//! ```
//!
//! Symbols loaded from image symbol tables are stored twice: once under their
//! plain name and once as `name{module}`, so that a name exported by several
//! images can still be addressed unambiguously.

use std::collections::{BTreeMap, HashSet};
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::breakpoints::{BreakpointId, MonitorSpec};
use crate::client::Client;
use crate::error::{BurrowError, Result};
use crate::types::Address;

use super::Symbol;

/// Classification of a symbol-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind
{
    /// Executable code.
    Code,
    /// Initialised or zero-filled data.
    Data,
    /// An Objective-C class object (`_OBJC_CLASS_$_Name`).
    ObjcClass,
    /// Any other symbol-table entry.
    Other,
    /// Resolved through the backend without symbol-table information.
    Unknown,
}

/// One member of a jar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JarEntry
{
    /// Resolved symbol.
    pub symbol: Symbol,
    /// Symbol-table classification.
    pub kind: SymbolKind,
}

/// A named, filterable collection of symbols
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolJar
{
    entries: BTreeMap<String, JarEntry>,
    modules: BTreeMap<String, String>,
}

/// Split `name{module}` into its plain name and module hint.
///
/// ```rust
/// use burrow_core::symbols::split_module_hint;
///
/// assert_eq!(split_module_hint("malloc{libsystem_malloc.dylib}"), ("malloc", Some("libsystem_malloc.dylib")));
/// assert_eq!(split_module_hint("malloc"), ("malloc", None));
/// ```
#[must_use]
pub fn split_module_hint(name: &str) -> (&str, Option<&str>)
{
    if let Some(stripped) = name.strip_suffix('}') {
        if let Some(open) = stripped.rfind('{') {
            let module = &stripped[open + 1..];
            if open > 0 && !module.is_empty() {
                return (&stripped[..open], Some(module));
            }
        }
    }
    (name, None)
}

fn matches_case(haystack: &str, needle: &str, case_sensitive: bool, test: fn(&str, &str) -> bool) -> bool
{
    if case_sensitive {
        test(haystack, needle)
    } else {
        test(&haystack.to_lowercase(), &needle.to_lowercase())
    }
}

impl SymbolJar
{
    /// Create an empty jar.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Number of names in the jar.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Whether the jar holds no names.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Whether `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool
    {
        self.entries.contains_key(name)
    }

    /// Exact-name lookup.
    ///
    /// ## Errors
    ///
    /// `Lookup` when the name is absent.
    pub fn get(&self, name: &str) -> Result<Symbol>
    {
        self.entries
            .get(name)
            .map(|entry| entry.symbol)
            .ok_or_else(|| BurrowError::Lookup(name.to_string()))
    }

    /// Full entry for `name`.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&JarEntry>
    {
        self.entries.get(name)
    }

    /// Module that `name` was loaded from, if known.
    #[must_use]
    pub fn module_of(&self, name: &str) -> Option<&str>
    {
        self.modules.get(name).map(String::as_str)
    }

    /// Bind `name`, replacing any previous binding. Returns the replaced entry.
    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol, kind: SymbolKind, module: Option<&str>)
        -> Option<JarEntry>
    {
        let name = name.into();
        match module {
            Some(module) => {
                self.modules.insert(name.clone(), module.to_string());
            }
            None => {
                self.modules.remove(&name);
            }
        }
        self.entries.insert(name, JarEntry { symbol, kind })
    }

    /// Remove `name`, returning its entry.
    pub fn remove(&mut self, name: &str) -> Option<JarEntry>
    {
        self.modules.remove(name);
        self.entries.remove(name)
    }

    /// Iterate over `(name, entry)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JarEntry)>
    {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Iterate over names in order.
    pub fn names(&self) -> impl Iterator<Item = &str>
    {
        self.entries.keys().map(String::as_str)
    }

    /// Best name for `address`: a plain name when one exists, otherwise a
    /// module-qualified one.
    #[must_use]
    pub fn name_of(&self, address: Address) -> Option<&str>
    {
        let mut qualified = None;
        for (name, entry) in &self.entries {
            if entry.symbol.address() != address {
                continue;
            }
            if split_module_hint(name).1.is_none() {
                return Some(name.as_str());
            }
            qualified.get_or_insert(name.as_str());
        }
        qualified
    }

    fn filtered<F>(&self, keep: F) -> Self
    where
        F: Fn(&str, &JarEntry) -> bool,
    {
        let mut jar = Self::new();
        for (name, entry) in &self.entries {
            if keep(name, entry) {
                jar.entries.insert(name.clone(), *entry);
                if let Some(module) = self.modules.get(name) {
                    jar.modules.insert(name.clone(), module.clone());
                }
            }
        }
        jar
    }

    /// Names starting with `prefix`.
    #[must_use]
    pub fn filter_starts_with(&self, prefix: &str, case_sensitive: bool) -> Self
    {
        self.filtered(|name, _| matches_case(name, prefix, case_sensitive, |h, n| h.starts_with(n)))
    }

    /// Names ending with `suffix`.
    #[must_use]
    pub fn filter_ends_with(&self, suffix: &str, case_sensitive: bool) -> Self
    {
        self.filtered(|name, _| matches_case(name, suffix, case_sensitive, |h, n| h.ends_with(n)))
    }

    /// Names containing `needle`.
    #[must_use]
    pub fn filter_name_contains(&self, needle: &str, case_sensitive: bool) -> Self
    {
        self.filtered(|name, _| matches_case(name, needle, case_sensitive, |h, n| h.contains(n)))
    }

    /// Names not containing `needle`.
    #[must_use]
    pub fn exclude_name_contains(&self, needle: &str, case_sensitive: bool) -> Self
    {
        self.filtered(|name, _| !matches_case(name, needle, case_sensitive, |h, n| h.contains(n)))
    }

    /// Entries of the given kind.
    #[must_use]
    pub fn filter_kind(&self, kind: SymbolKind) -> Self
    {
        self.filtered(|_, entry| entry.kind == kind)
    }

    /// Code symbols only.
    #[must_use]
    pub fn filter_code_symbols(&self) -> Self
    {
        self.filter_kind(SymbolKind::Code)
    }

    /// Data symbols only.
    #[must_use]
    pub fn filter_data_symbols(&self) -> Self
    {
        self.filter_kind(SymbolKind::Data)
    }

    /// Entries loaded from an image whose name contains `module`.
    #[must_use]
    pub fn filter_by_module(&self, module: &str) -> Self
    {
        self.filtered(|name, _| self.modules.get(name).is_some_and(|owner| owner.contains(module)))
    }

    /// Drop the `name{module}` aliases, keeping plain names.
    #[must_use]
    pub fn without_module_names(&self) -> Self
    {
        self.filtered(|name, _| split_module_hint(name).1.is_none())
    }

    /// Names present in either jar. Bindings from `other` win on conflict.
    #[must_use]
    pub fn union(&self, other: &SymbolJar) -> Self
    {
        let mut jar = self.clone();
        for (name, entry) in &other.entries {
            jar.entries.insert(name.clone(), *entry);
            match other.modules.get(name) {
                Some(module) => jar.modules.insert(name.clone(), module.clone()),
                None => jar.modules.remove(name),
            };
        }
        jar
    }

    /// Names present in `self` but not in `other`.
    #[must_use]
    pub fn difference(&self, other: &SymbolJar) -> Self
    {
        self.filtered(|name, _| !other.entries.contains_key(name))
    }

    /// Arm the same monitor on every member.
    ///
    /// Each breakpoint is labelled with the member's name unless `spec` names
    /// one. With `verbose_monitor` configured, selector-style names also get a
    /// `po` of every selector argument. Members sharing an address (such as
    /// `open` and `open{libsystem_c.dylib}`) get a single monitor, labelled
    /// with the plain name when the jar holds one.
    ///
    /// ## Errors
    ///
    /// The first arming failure; breakpoints armed before it stay armed.
    pub fn monitor(&self, client: &mut Client, spec: &MonitorSpec) -> Result<Vec<BreakpointId>>
    {
        let verbose = client.config().verbose_monitor;
        let architecture = client.architecture();
        let (plain, qualified): (Vec<_>, Vec<_>) =
            self.entries.iter().partition(|(name, _)| split_module_hint(name).1.is_none());

        let mut seen = HashSet::with_capacity(self.entries.len());
        let mut armed = Vec::with_capacity(self.entries.len());
        for (name, entry) in plain.into_iter().chain(qualified) {
            if !seen.insert(entry.symbol.address()) {
                debug!("Skipping {name}: its address is already monitored by this jar");
                continue;
            }
            let mut member_spec = spec.clone();
            if member_spec.name.is_none() {
                member_spec.name = Some(name.clone());
            }
            if verbose {
                member_spec = member_spec.with_selector_arguments(name, architecture);
            }
            armed.push(client.monitor(entry.symbol.address(), member_spec)?);
        }
        Ok(armed)
    }
}

impl Add for &SymbolJar
{
    type Output = SymbolJar;

    fn add(self, rhs: &SymbolJar) -> SymbolJar
    {
        self.union(rhs)
    }
}

impl Sub for &SymbolJar
{
    type Output = SymbolJar;

    fn sub(self, rhs: &SymbolJar) -> SymbolJar
    {
        self.difference(rhs)
    }
}

impl<'a> IntoIterator for &'a SymbolJar
{
    type Item = (&'a String, &'a JarEntry);
    type IntoIter = std::collections::btree_map::Iter<'a, String, JarEntry>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_split_module_hint()
    {
        assert_eq!(split_module_hint("open{libc.so.6}"), ("open", Some("libc.so.6")));
        assert_eq!(split_module_hint("open"), ("open", None));
        assert_eq!(split_module_hint("{only}"), ("{only}", None));
        assert_eq!(split_module_hint("weird{}"), ("weird{}", None));
        assert_eq!(split_module_hint("a{b}{c}"), ("a{b}", Some("c")));
    }

    #[test]
    fn test_case_insensitive_matching()
    {
        assert!(matches_case("NSLog", "nslog", false, |h, n| h == n));
        assert!(!matches_case("NSLog", "nslog", true, |h, n| h == n));
    }
}
