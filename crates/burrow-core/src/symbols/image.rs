//! Symbol tables of loaded images.
//!
//! The backend tells us which images are mapped and where; the symbol tables
//! themselves are read straight from the files on disk with the `object` crate
//! and relocated by each image's load bias.

use std::fs;

use object::{Object, ObjectSymbol, SymbolKind as ObjectSymbolKind};
use tracing::debug;

use super::jar::SymbolKind;
use crate::error::{BurrowError, Result};
use crate::types::{Address, ImageInfo};

/// Prefix of Objective-C class object symbols.
const OBJC_CLASS_PREFIX: &str = "_OBJC_CLASS_$_";

/// One defined symbol of an image, already relocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSymbol
{
    /// Symbol name as stored in the table.
    pub name: String,
    /// Runtime address.
    pub address: Address,
    /// Classification.
    pub kind: SymbolKind,
}

/// Read and relocate the symbol table of `image` from disk.
///
/// ## Errors
///
/// `Io` when the file cannot be read, `InvalidArgument` when it is not an
/// object file `object` understands.
pub fn load_image_symbols(image: &ImageInfo) -> Result<Vec<TableSymbol>>
{
    let data = fs::read(image.path())?;
    parse_image_symbols(&data, image)
}

/// Parse the symbol table in `data`, relocating by `image`'s load bias.
///
/// ## Errors
///
/// `InvalidArgument` when `data` is not a supported object file.
pub fn parse_image_symbols(data: &[u8], image: &ImageInfo) -> Result<Vec<TableSymbol>>
{
    let file = object::File::parse(data)
        .map_err(|err| BurrowError::InvalidArgument(format!("{}: {err}", image.path().display())))?;

    let mut symbols = Vec::new();
    for symbol in file.symbols().chain(file.dynamic_symbols()) {
        if symbol.is_undefined() || symbol.address() == 0 {
            continue;
        }
        let Ok(name) = symbol.name() else {
            continue;
        };
        if name.is_empty() || name == "<redacted>" {
            continue;
        }
        symbols.push(TableSymbol {
            name: name.to_string(),
            address: image.relocated_address(Address::new(symbol.address())),
            kind: classify(name, symbol.kind()),
        });
    }
    symbols.sort_by(|a, b| a.name.cmp(&b.name).then(a.address.cmp(&b.address)));
    symbols.dedup_by(|a, b| a.name == b.name && a.address == b.address);

    debug!("Read {} symbols from {}", symbols.len(), image.name());
    Ok(symbols)
}

fn classify(name: &str, kind: ObjectSymbolKind) -> SymbolKind
{
    if name.starts_with(OBJC_CLASS_PREFIX) {
        return SymbolKind::ObjcClass;
    }
    match kind {
        ObjectSymbolKind::Text => SymbolKind::Code,
        ObjectSymbolKind::Data | ObjectSymbolKind::Tls => SymbolKind::Data,
        _ => SymbolKind::Other,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_classify()
    {
        assert_eq!(classify("_OBJC_CLASS_$_NSObject", ObjectSymbolKind::Data), SymbolKind::ObjcClass);
        assert_eq!(classify("main", ObjectSymbolKind::Text), SymbolKind::Code);
        assert_eq!(classify("errno", ObjectSymbolKind::Tls), SymbolKind::Data);
        assert_eq!(classify("foo.c", ObjectSymbolKind::File), SymbolKind::Other);
    }

    #[test]
    fn test_rejects_garbage()
    {
        let image = ImageInfo::new("/tmp/not-an-object", Address::new(0x1000), 0, 0x100);
        assert!(matches!(
            parse_image_symbols(b"definitely not an object file", &image),
            Err(BurrowError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reads_own_executable()
    {
        let path = std::env::current_exe().unwrap();
        let image = ImageInfo::new(path, Address::new(0), 0x1000, 0);
        let symbols = load_image_symbols(&image).unwrap();
        assert!(symbols.iter().any(|symbol| symbol.kind == SymbolKind::Code));
        assert!(symbols.iter().all(|symbol| symbol.address.value() >= 0x1000));
    }
}
