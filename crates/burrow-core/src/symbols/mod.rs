//! # Symbols
//!
//! Typed address handles ([`Symbol`]), named collections of them
//! ([`SymbolJar`]), image symbol-table loading and the persisted symbol map.

pub mod image;
pub mod jar;
pub mod map;
pub mod symbol;

pub use image::{load_image_symbols, parse_image_symbols, TableSymbol};
pub use jar::{split_module_hint, JarEntry, SymbolJar, SymbolKind};
pub use map::{RebasedSymbols, SymbolMap, SymbolMapEntry, SYMBOL_MAP_VERSION};
pub use symbol::{ItemSize, SessionId, Symbol};
