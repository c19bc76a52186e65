//! Typed handles over target addresses.
//!
//! A [`Symbol`] is a plain value: an address, the width used when it is
//! dereferenced by index, and the id of the session that produced it. Every
//! operation that touches the target takes the owning [`Client`] explicitly, and
//! the client refuses symbols from another session or after it detached.
//!
//! ## Example
//!
//! ```rust,no_run
//! use burrow_core::{Client, ItemSize};
//!
//! # fn demo(client: &mut Client) -> burrow_core::Result<()> {
//! let table = client.resolve("_dyld_image_count")?;
//! let count = table.with_item_size(ItemSize::Four).item(client, 0)?;
//! println!("{count}");
//!
//! let next = table + 8; // new symbol, same item size
//! next.poke(client, &[0u8; 8])?;
//! # Ok(())
//! # }
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, BitAnd, BitOr, Sub};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

use crate::backend::CallArgument;
use crate::breakpoints::{BreakpointId, HitContext, MonitorSpec};
use crate::client::Client;
use crate::error::{BurrowError, Result};
use crate::types::{Address, Endianness};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Identity of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId
{
    pub(crate) fn next() -> Self
    {
        Self(NEXT_SESSION.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Raw id, for logs and errors.
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Width of one element when a symbol is dereferenced by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ItemSize
{
    /// One byte.
    One,
    /// Two bytes.
    Two,
    /// Four bytes.
    Four,
    /// Eight bytes (pointer width).
    #[default]
    Eight,
}

impl ItemSize
{
    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize
    {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Largest value representable in this width.
    #[must_use]
    pub const fn max_value(self) -> u64
    {
        match self {
            Self::Eight => u64::MAX,
            other => (1u64 << (other.bytes() * 8)) - 1,
        }
    }

    /// Interpret `bytes` (exactly [`Self::bytes`] long) as an unsigned integer.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when the slice has the wrong length.
    pub fn decode(self, bytes: &[u8], endianness: Endianness) -> Result<u64>
    {
        if bytes.len() != self.bytes() {
            return Err(BurrowError::InvalidArgument(format!(
                "expected {} bytes, got {}",
                self.bytes(),
                bytes.len()
            )));
        }
        let mut buffer = [0u8; 8];
        let value = match endianness {
            Endianness::Little => {
                buffer[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(buffer)
            }
            Endianness::Big => {
                buffer[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(buffer)
            }
        };
        Ok(value)
    }

    /// Encode `value` into exactly [`Self::bytes`] bytes.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when `value` does not fit the width.
    pub fn encode(self, value: u64, endianness: Endianness) -> Result<Vec<u8>>
    {
        if value > self.max_value() {
            return Err(BurrowError::InvalidArgument(format!(
                "0x{value:x} does not fit in {} bytes",
                self.bytes()
            )));
        }
        let width = self.bytes();
        let bytes = match endianness {
            Endianness::Little => value.to_le_bytes()[..width].to_vec(),
            Endianness::Big => value.to_be_bytes()[8 - width..].to_vec(),
        };
        Ok(bytes)
    }
}

impl TryFrom<u8> for ItemSize
{
    type Error = BurrowError;

    fn try_from(value: u8) -> Result<Self>
    {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(BurrowError::InvalidArgument(format!("item size must be 1, 2, 4 or 8, not {other}"))),
        }
    }
}

impl From<ItemSize> for u8
{
    #[allow(clippy::cast_possible_truncation)]
    fn from(size: ItemSize) -> Self
    {
        size.bytes() as u8
    }
}

/// A typed handle over a target address
///
/// Equality, ordering and hashing only look at the address, so a symbol can
/// be compared with a plain integer and used as a map key.
#[derive(Debug, Clone, Copy)]
pub struct Symbol
{
    address: Address,
    item_size: ItemSize,
    session: SessionId,
}

impl Symbol
{
    pub(crate) const fn new(address: Address, session: SessionId) -> Self
    {
        Self { address, item_size: ItemSize::Eight, session }
    }

    /// Address this symbol points at.
    #[must_use]
    pub const fn address(self) -> Address
    {
        self.address
    }

    /// Address as a raw integer.
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.address.value()
    }

    /// Width used by [`Symbol::item`] and [`Symbol::set_item`].
    #[must_use]
    pub const fn item_size(self) -> ItemSize
    {
        self.item_size
    }

    /// Change the dereference width in place.
    pub fn set_item_size(&mut self, item_size: ItemSize)
    {
        self.item_size = item_size;
    }

    /// Copy of this symbol with another dereference width.
    #[must_use]
    pub fn with_item_size(mut self, item_size: ItemSize) -> Self
    {
        self.item_size = item_size;
        self
    }

    /// Session that produced this symbol.
    #[must_use]
    pub const fn session(self) -> SessionId
    {
        self.session
    }

    /// Symbol moved by a signed number of bytes.
    #[must_use]
    pub const fn offset(self, delta: i64) -> Self
    {
        Self { address: self.address.offset(delta), ..self }
    }

    /// Signed distance in bytes from `origin` to this symbol.
    #[must_use]
    pub const fn offset_from(self, origin: Symbol) -> i64
    {
        self.address.distance_from(origin.address)
    }

    /// Read `len` bytes at this address.
    ///
    /// ## Errors
    ///
    /// `Access` when the range is unreadable.
    pub fn peek(self, client: &Client, len: usize) -> Result<Vec<u8>>
    {
        client.check_symbol(self)?;
        client.peek(self.address, len)
    }

    /// Write `data` at this address.
    ///
    /// ## Errors
    ///
    /// `Access` when the range is unmapped or read-only.
    pub fn poke(self, client: &mut Client, data: &[u8]) -> Result<()>
    {
        client.check_symbol(self)?;
        client.poke(self.address, data)
    }

    /// Read the NUL-terminated string starting at this address.
    ///
    /// ## Errors
    ///
    /// `Access` when the string runs into unreadable memory or exceeds the
    /// configured maximum length.
    pub fn peek_str(self, client: &Client) -> Result<String>
    {
        client.check_symbol(self)?;
        client.peek_str(self.address)
    }

    /// Read element `index`, `item_size` bytes wide, as an integer.
    ///
    /// ## Errors
    ///
    /// `Access` when the element is unreadable.
    pub fn item(self, client: &Client, index: i64) -> Result<Symbol>
    {
        client.check_symbol(self)?;
        let address = self.element_address(index);
        let bytes = client.peek(address, self.item_size.bytes())?;
        let value = self.item_size.decode(&bytes, client.endianness())?;
        Ok(client.symbol(value))
    }

    /// Write `value` into element `index`.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when `value` does not fit `item_size`, `Access` when
    /// the element is not writable.
    pub fn set_item(self, client: &mut Client, index: i64, value: u64) -> Result<()>
    {
        client.check_symbol(self)?;
        let bytes = self.item_size.encode(value, client.endianness())?;
        client.poke(self.element_address(index), &bytes)
    }

    /// Call the function at this address.
    ///
    /// ## Errors
    ///
    /// `Call` when the target is not stopped or the call fails.
    pub fn call(self, client: &mut Client, args: &[CallArgument]) -> Result<Symbol>
    {
        client.check_symbol(self)?;
        client.call(self.address, args)
    }

    /// Ask the target to describe the object at this address, optionally cast
    /// to `type_hint` first.
    ///
    /// ## Errors
    ///
    /// `Eval` when the description cannot be produced.
    pub fn po(self, client: &mut Client, type_hint: Option<&str>) -> Result<String>
    {
        client.check_symbol(self)?;
        let expression = match type_hint {
            Some(cast) => format!("({cast}){self}"),
            None => self.to_string(),
        };
        client.print_object(&expression)
    }

    /// Static address of this symbol inside its image, i.e. without load bias.
    ///
    /// ## Errors
    ///
    /// `AddressResolution` when no loaded image contains the address.
    pub fn file_address(self, client: &Client) -> Result<Address>
    {
        client.check_symbol(self)?;
        client.file_address(self.address)
    }

    /// Arm a monitor at this address.
    ///
    /// ## Errors
    ///
    /// See [`Client::monitor`].
    pub fn monitor(self, client: &mut Client, spec: MonitorSpec) -> Result<BreakpointId>
    {
        client.check_symbol(self)?;
        client.monitor(self.address, spec)
    }

    /// Place a plain breakpoint at this address.
    ///
    /// ## Errors
    ///
    /// See [`Client::bp`].
    pub fn bp<F>(self, client: &mut Client, callback: F) -> Result<BreakpointId>
    where
        F: Fn(&mut Client, &HitContext) -> Result<()> + 'static,
    {
        client.check_symbol(self)?;
        client.bp(self.address, callback)
    }

    fn element_address(self, index: i64) -> Address
    {
        #[allow(clippy::cast_possible_wrap)]
        let width = self.item_size.bytes() as i64;
        self.address.offset(index.wrapping_mul(width))
    }
}

impl PartialEq for Symbol
{
    fn eq(&self, other: &Self) -> bool
    {
        self.address == other.address
    }
}

impl Eq for Symbol {}

impl PartialEq<u64> for Symbol
{
    fn eq(&self, other: &u64) -> bool
    {
        self.address.value() == *other
    }
}

impl PartialEq<Address> for Symbol
{
    fn eq(&self, other: &Address) -> bool
    {
        self.address == *other
    }
}

impl PartialOrd for Symbol
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering>
    {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol
{
    fn cmp(&self, other: &Self) -> Ordering
    {
        self.address.cmp(&other.address)
    }
}

impl Hash for Symbol
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        self.address.hash(state);
    }
}

impl From<Symbol> for Address
{
    fn from(symbol: Symbol) -> Self
    {
        symbol.address
    }
}

impl From<Symbol> for u64
{
    fn from(symbol: Symbol) -> Self
    {
        symbol.address.value()
    }
}

impl From<Symbol> for CallArgument
{
    fn from(symbol: Symbol) -> Self
    {
        CallArgument::Integer(symbol.address.value())
    }
}

impl fmt::Display for Symbol
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.address.value())
    }
}

impl fmt::LowerHex for Symbol
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.address.value(), f)
    }
}

impl Add<u64> for Symbol
{
    type Output = Symbol;

    fn add(self, rhs: u64) -> Self::Output
    {
        Symbol { address: self.address + rhs, ..self }
    }
}

impl Sub<u64> for Symbol
{
    type Output = Symbol;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Symbol { address: self.address - rhs, ..self }
    }
}

impl BitAnd<u64> for Symbol
{
    type Output = Symbol;

    fn bitand(self, rhs: u64) -> Self::Output
    {
        Symbol { address: self.address.masked(rhs), ..self }
    }
}

impl BitOr<u64> for Symbol
{
    type Output = Symbol;

    fn bitor(self, rhs: u64) -> Self::Output
    {
        Symbol { address: Address::new(self.address.value() | rhs), ..self }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_item_size_round_trips_little_endian()
    {
        let bytes = ItemSize::Four.encode(0xdead_beef, Endianness::Little).unwrap();
        assert_eq!(bytes, vec![0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(ItemSize::Four.decode(&bytes, Endianness::Little).unwrap(), 0xdead_beef);
    }

    #[test]
    fn test_item_size_big_endian()
    {
        let bytes = ItemSize::Two.encode(0x1234, Endianness::Big).unwrap();
        assert_eq!(bytes, vec![0x12, 0x34]);
        assert_eq!(ItemSize::Two.decode(&bytes, Endianness::Big).unwrap(), 0x1234);
    }

    #[test]
    fn test_item_size_rejects_overflow_and_bad_lengths()
    {
        assert!(ItemSize::One.encode(0x100, Endianness::Little).is_err());
        assert!(ItemSize::Eight.decode(&[0; 4], Endianness::Little).is_err());
        assert_eq!(ItemSize::Eight.max_value(), u64::MAX);
        assert_eq!(ItemSize::Two.max_value(), 0xffff);
    }

    #[test]
    fn test_item_size_from_u8()
    {
        assert_eq!(ItemSize::try_from(2).unwrap(), ItemSize::Two);
        assert!(ItemSize::try_from(3).is_err());
        assert_eq!(u8::from(ItemSize::Eight), 8);
    }

    #[test]
    fn test_symbol_arithmetic_keeps_item_size()
    {
        let session = SessionId::next();
        let base = Symbol::new(Address::new(0x1000), session).with_item_size(ItemSize::Two);
        let moved = base + 0x10;
        assert_eq!(moved, 0x1010);
        assert_eq!(moved.item_size(), ItemSize::Two);
        assert_eq!((moved - 0x20).value(), 0xff0);
        assert_eq!((base & 0xf00).value(), 0);
        assert_eq!((base | 0xf).value(), 0x100f);
        assert_eq!(moved.offset_from(base), 0x10);
        assert_eq!(base.offset_from(moved), -0x10);
        assert_eq!(base.offset(-1).value(), 0xfff);
    }

    #[test]
    fn test_symbol_equality_ignores_item_size()
    {
        let session = SessionId::next();
        let a = Symbol::new(Address::new(0x42), session);
        let b = a.with_item_size(ItemSize::One);
        assert_eq!(a, b);
        assert!(a < a + 1);
        assert_eq!(format!("{a}"), "0x42");
    }
}
