//! Loaded binary images and their load bias.

use std::path::{Path, PathBuf};

use super::Address;

/// A binary image mapped into the target.
///
/// `slide` is the ASLR load bias: the difference between where the image was
/// linked to run and where it actually sits in memory. Static (file) addresses
/// become runtime addresses by adding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo
{
    /// Path of the image on disk, as the backend reports it.
    pub path: PathBuf,
    /// Runtime address of the image's first byte.
    pub load_address: Address,
    /// Load bias applied to every static address of the image.
    pub slide: i64,
    /// Size of the mapped image in bytes.
    pub size: u64,
}

impl ImageInfo
{
    /// Describe an image.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, load_address: Address, slide: i64, size: u64) -> Self
    {
        Self { path: path.into(), load_address, slide, size }
    }

    /// File name of the image (`libobjc.A.dylib` for `/usr/lib/libobjc.A.dylib`).
    #[must_use]
    pub fn name(&self) -> &str
    {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Path of the image on disk.
    #[must_use]
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Runtime address range `[start, end)`.
    #[must_use]
    pub fn runtime_range(&self) -> (Address, Address)
    {
        (self.load_address, self.load_address + self.size)
    }

    /// Whether `address` falls inside the mapped image.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        let (start, end) = self.runtime_range();
        address >= start && address < end
    }

    /// Static address corresponding to a runtime address.
    #[must_use]
    pub const fn file_address(&self, runtime: Address) -> Address
    {
        runtime.offset(self.slide.wrapping_neg())
    }

    /// Runtime address corresponding to a static address.
    #[must_use]
    pub const fn relocated_address(&self, file: Address) -> Address
    {
        file.offset(self.slide)
    }

    /// Whether the image name contains `filter`.
    #[must_use]
    pub fn name_matches(&self, filter: &str) -> bool
    {
        self.path.to_string_lossy().contains(filter)
    }
}
