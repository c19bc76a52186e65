//! # Class and object introspection
//!
//! Builds [`ObjectDescriptor`]s for Objective-C classes and live instances
//! by running description snippets in the target.
//!
//! ## Layout rules
//!
//! - The superclass chain is walked to the root; inherited ivars and
//!   properties are included, and a name declared at several levels is kept
//!   once, from the most-derived class.
//! - Only the class's own methods are listed, instance and class methods
//!   together, each tagged with `is_class`.
//! - Method and implementation addresses have pointer-authentication bits
//!   removed on targets that sign code pointers.
//! - For an instance, each ivar's raw value is read from target memory.
//!   Object-typed values are only converted through the bridge when asked for
//!   with [`ObjectDescriptor::ivar_value`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use burrow_core::ObjectDescriptor;
//!
//! # fn demo(client: &mut burrow_core::Client) -> burrow_core::Result<()> {
//! let defaults = ObjectDescriptor::for_class_name(client, "NSUserDefaults")?;
//! println!("{defaults}");
//!
//! let instance = client.evaluate("[NSUserDefaults standardUserDefaults]")?;
//! let described = ObjectDescriptor::for_instance(client, instance)?;
//! for ivar in &described.ivars {
//!     println!("{} = {:?}", ivar.name, ivar.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod encoding;

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

pub use encoding::{decode_type, decode_type_with_tail, encoding_size, PropertyAttributes};

use crate::bridge::{self, SnippetReply, Value, CLASS_DESCRIPTION, OBJECT_CLASS};
use crate::client::Client;
use crate::error::{BurrowError, Result};
use crate::symbols::{ItemSize, Symbol, SymbolJar, SymbolKind};
use crate::types::{Address, Architecture};

/// One class level as reported by the description snippet.
#[derive(Debug, Deserialize)]
struct ClassLevel
{
    name: String,
    address: u64,
    #[serde(rename = "super")]
    superclass: u64,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    ivars: Vec<RawIvar>,
    #[serde(default)]
    properties: Vec<RawProperty>,
    #[serde(default)]
    methods: Vec<RawMethod>,
}

#[derive(Debug, Deserialize)]
struct RawIvar
{
    name: String,
    #[serde(rename = "type")]
    encoding: String,
    offset: u64,
}

#[derive(Debug, Deserialize)]
struct RawProperty
{
    name: String,
    attributes: String,
}

#[derive(Debug, Deserialize)]
struct RawMethod
{
    name: String,
    address: u64,
    imp: u64,
    #[serde(rename = "type")]
    encoding: String,
    return_type: String,
    #[serde(default)]
    args_types: Vec<String>,
    is_class: bool,
}

#[derive(Debug, Deserialize)]
struct ObjectClass
{
    class_address: u64,
    class_name: String,
}

/// An instance variable.
#[derive(Debug, Clone, PartialEq)]
pub struct IvarDescriptor
{
    /// Ivar name.
    pub name: String,
    /// C-style type name (the raw encoding when it cannot be decoded).
    pub type_name: String,
    /// Raw type encoding.
    pub type_encoding: String,
    /// Byte offset inside the instance.
    pub offset: u64,
    /// Class that declares the ivar.
    pub declared_in: String,
    /// Raw value read from a live instance, sized to the ivar.
    pub value: Option<Symbol>,
}

/// A declared property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor
{
    /// Property name.
    pub name: String,
    /// Decoded attribute string.
    pub attributes: PropertyAttributes,
    /// Class that declares the property.
    pub declared_in: String,
}

/// A method of the described class.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor
{
    /// Selector.
    pub name: String,
    /// Address of the runtime method record.
    pub address: Address,
    /// Implementation address, pointer-authentication bits removed.
    pub implementation: Address,
    /// Class method (`+`) rather than instance method (`-`).
    pub is_class: bool,
    /// Decoded return type.
    pub return_type: String,
    /// Decoded explicit argument types (`self` and `_cmd` are omitted).
    pub argument_types: Vec<String>,
    /// Raw method type encoding.
    pub type_encoding: String,
}

impl MethodDescriptor
{
    /// `-[Class selector]` or `+[Class selector]`.
    #[must_use]
    pub fn qualified_name(&self, class: &str) -> String
    {
        let sign = if self.is_class { '+' } else { '-' };
        format!("{sign}[{class} {}]", self.name)
    }
}

/// Structural description of a class, optionally bound to a live instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor
{
    /// Class name.
    pub type_name: String,
    /// Class object.
    pub address: Symbol,
    /// Direct superclass; `None` for root classes.
    pub superclass: Option<Symbol>,
    /// Superclass names, nearest first.
    pub superclass_chain: Vec<String>,
    /// Ivars of the whole chain, ordered by offset.
    pub ivars: Vec<IvarDescriptor>,
    /// Properties of the whole chain, most-derived first.
    pub properties: Vec<PropertyDescriptor>,
    /// Own instance and class methods.
    pub methods: Vec<MethodDescriptor>,
    /// Protocols the class itself adopts.
    pub protocols: Vec<String>,
    /// The described instance, when built with [`ObjectDescriptor::for_instance`].
    pub instance: Option<Symbol>,
}

impl ObjectDescriptor
{
    /// Describe the class object at `class`.
    ///
    /// ## Errors
    ///
    /// `AddressResolution` for a null class, `Lookup` when the target does not
    /// recognise it, and any evaluation failure.
    pub fn for_class(client: &mut Client, class: Symbol) -> Result<Self>
    {
        client.check_symbol(class)?;
        if class.address().is_null() {
            return Err(BurrowError::AddressResolution("null class pointer".to_string()));
        }
        let level = describe_level(client, class.address(), "")?;
        Self::from_chain(client, level)
    }

    /// Look a class up by name in the target runtime and describe it.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` for a name that is not a plain identifier, `Lookup`
    /// when no class has that name.
    pub fn for_class_name(client: &mut Client, name: &str) -> Result<Self>
    {
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
        if !valid {
            return Err(BurrowError::InvalidArgument(format!("{name:?} is not a class name")));
        }
        let level = describe_level(client, Address::new(0), name)?;
        if level.name != name {
            return Err(BurrowError::Lookup(format!("{name} (runtime returned {})", level.name)));
        }
        Self::from_chain(client, level)
    }

    /// Describe a live object: its dynamic class plus the raw value of every
    /// ivar.
    ///
    /// Ivars whose memory cannot be read, and aggregates without a
    /// word-sized width, are left without a value.
    ///
    /// ## Errors
    ///
    /// `Lookup` when the target cannot determine the object's class, plus
    /// everything [`ObjectDescriptor::for_class`] reports.
    pub fn for_instance(client: &mut Client, object: Symbol) -> Result<Self>
    {
        client.check_symbol(object)?;
        let address = object.to_string();
        let class: ObjectClass = client
            .evaluate_template_json::<SnippetReply<ObjectClass>>(&OBJECT_CLASS, &[("__object_address__", &address)])?
            .into_result(|error| BurrowError::Lookup(format!("class of {address}: {error}")))?;
        debug!("{address} is an instance of {}", class.class_name);

        let class_symbol = client.symbol(class.class_address);
        let mut descriptor = Self::for_class(client, class_symbol)?;
        let offsets: Vec<u64> = descriptor.ivars.iter().map(|ivar| ivar.offset).collect();
        for (index, ivar) in descriptor.ivars.iter_mut().enumerate() {
            let Some(item_size) = ivar_width(ivar, offsets.get(index + 1).copied()) else {
                continue;
            };
            match read_slot(client, object, ivar.offset, item_size) {
                Ok(value) => ivar.value = Some(value),
                Err(err) => warn!("Cannot read ivar {} of {address}: {err}", ivar.name),
            }
        }
        descriptor.instance = Some(object);
        Ok(descriptor)
    }

    fn from_chain(client: &mut Client, first: ClassLevel) -> Result<Self>
    {
        let mut seen = HashSet::from([first.address]);
        let mut next = first.superclass;
        let mut chain = vec![first];
        while next != 0 {
            if !seen.insert(next) {
                warn!("Superclass cycle at 0x{next:x}, stopping the walk");
                break;
            }
            let level = describe_level(client, Address::new(next), "")?;
            next = level.superclass;
            chain.push(level);
        }

        let mut ivars = Vec::new();
        let mut properties = Vec::new();
        let mut ivar_names = HashSet::new();
        let mut property_names = HashSet::new();
        for level in &chain {
            for ivar in &level.ivars {
                if ivar_names.insert(ivar.name.as_str()) {
                    ivars.push(IvarDescriptor {
                        name: ivar.name.clone(),
                        type_name: decode_or_raw(&ivar.encoding),
                        type_encoding: ivar.encoding.clone(),
                        offset: ivar.offset,
                        declared_in: level.name.clone(),
                        value: None,
                    });
                }
            }
            for property in &level.properties {
                if !property_names.insert(property.name.as_str()) {
                    continue;
                }
                match PropertyAttributes::parse(&property.attributes) {
                    Ok(attributes) => properties.push(PropertyDescriptor {
                        name: property.name.clone(),
                        attributes,
                        declared_in: level.name.clone(),
                    }),
                    Err(err) => warn!("Skipping property {}.{}: {err}", level.name, property.name),
                }
            }
        }
        ivars.sort_by_key(|ivar| ivar.offset);

        let own = &chain[0];
        let methods = own
            .methods
            .iter()
            .map(|method| MethodDescriptor {
                name: method.name.clone(),
                address: client.strip_code_pointer(method.address),
                implementation: client.strip_code_pointer(method.imp),
                is_class: method.is_class,
                return_type: decode_or_raw(&method.return_type),
                argument_types: method.args_types.iter().skip(2).map(|arg| decode_or_raw(arg)).collect(),
                type_encoding: method.encoding.clone(),
            })
            .collect();

        Ok(Self {
            type_name: own.name.clone(),
            address: client.symbol(own.address),
            superclass: (own.superclass != 0).then(|| client.symbol(own.superclass)),
            superclass_chain: chain[1..].iter().map(|level| level.name.clone()).collect(),
            ivars,
            properties,
            methods,
            protocols: own.protocols.clone(),
            instance: None,
        })
    }

    /// Ivar by name.
    #[must_use]
    pub fn ivar(&self, name: &str) -> Option<&IvarDescriptor>
    {
        self.ivars.iter().find(|ivar| ivar.name == name)
    }

    /// Property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor>
    {
        self.properties.iter().find(|property| property.name == name)
    }

    /// Own method by selector and kind.
    #[must_use]
    pub fn method(&self, name: &str, is_class: bool) -> Option<&MethodDescriptor>
    {
        self.methods.iter().find(|method| method.name == name && method.is_class == is_class)
    }

    /// Convert an ivar of the described instance into a host value.
    ///
    /// Object ivars go through the bridge; scalars are interpreted per their
    /// type encoding. Nothing is converted until this is called.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when the descriptor has no instance, `Lookup` for an
    /// unknown ivar, `Serialization` for types without a value mapping.
    pub fn ivar_value(&self, client: &mut Client, name: &str) -> Result<Value>
    {
        if self.instance.is_none() {
            return Err(BurrowError::InvalidArgument(format!("{} descriptor has no instance", self.type_name)));
        }
        let ivar = self.ivar(name).ok_or_else(|| BurrowError::Lookup(format!("ivar {name} of {}", self.type_name)))?;
        let raw = ivar
            .value
            .ok_or_else(|| BurrowError::Serialization(format!("ivar {name} ({}) has no readable value", ivar.type_name)))?;
        let bits = raw.value();
        let width = raw.item_size().bytes();

        let value = match encoding::base_code(&ivar.type_encoding) {
            Some('@') if bits == 0 => Value::Null,
            Some('@') => bridge::from_target(client, raw)?,
            Some('B') => Value::Bool(bits != 0),
            Some('c' | 's' | 'i' | 'l' | 'q') => Value::Integer(sign_extend(bits, width)),
            Some('C' | 'S' | 'I' | 'L' | 'Q' | '#' | '^') => Value::from(bits),
            #[allow(clippy::cast_possible_truncation)]
            Some('f') => Value::Float(f64::from(f32::from_bits(bits as u32))),
            Some('d') => Value::Float(f64::from_bits(bits)),
            Some('*' | ':') if bits == 0 => Value::Null,
            Some('*' | ':') => Value::String(client.peek_str(bits)?),
            _ => {
                return Err(BurrowError::Serialization(format!(
                    "no value mapping for ivar {name} of type {}",
                    ivar.type_name
                )))
            }
        };
        Ok(value)
    }

    /// Overwrite an ivar of the described instance with a raw value of the
    /// ivar's width, and record it in the descriptor.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when the descriptor has no instance, the ivar has no
    /// word-sized width or `value` does not fit; `Lookup` for an unknown ivar;
    /// `Access` when the write fails.
    pub fn set_ivar(&mut self, client: &mut Client, name: &str, value: u64) -> Result<()>
    {
        let instance = self
            .instance
            .ok_or_else(|| BurrowError::InvalidArgument(format!("{} descriptor has no instance", self.type_name)))?;
        let index = self
            .ivars
            .iter()
            .position(|ivar| ivar.name == name)
            .ok_or_else(|| BurrowError::Lookup(format!("ivar {name} of {}", self.type_name)))?;
        let next_offset = self.ivars.get(index + 1).map(|ivar| ivar.offset);
        let ivar = &mut self.ivars[index];
        let item_size = ivar_width(ivar, next_offset)
            .ok_or_else(|| BurrowError::InvalidArgument(format!("ivar {name} ({}) is not a scalar", ivar.type_name)))?;

        let bytes = item_size.encode(value, client.endianness())?;
        client.poke(instance.address().offset(slot_delta(ivar.offset)?), &bytes)?;
        ivar.value = Some(client.symbol(value).with_item_size(item_size));
        debug!("Set {}.{name} to 0x{value:x}", self.type_name);
        Ok(())
    }

    /// Implementations of the own methods, named `-[Class sel]` / `+[Class sel]`.
    #[must_use]
    pub fn methods_jar(&self, client: &Client) -> SymbolJar
    {
        let mut jar = SymbolJar::new();
        for method in &self.methods {
            jar.insert(
                method.qualified_name(&self.type_name),
                client.symbol(method.implementation),
                SymbolKind::Code,
                None,
            );
        }
        jar
    }
}

impl fmt::Display for ObjectDescriptor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "@interface {}", self.type_name)?;
        if let Some(superclass) = self.superclass_chain.first() {
            write!(f, " : {superclass}")?;
        }
        if !self.protocols.is_empty() {
            write!(f, " <{}>", self.protocols.join(", "))?;
        }
        writeln!(f)?;

        if !self.ivars.is_empty() {
            writeln!(f, "{{")?;
            for ivar in &self.ivars {
                write!(f, "    {} {}; // +0x{:x}", ivar.type_name, ivar.name, ivar.offset)?;
                if let Some(value) = ivar.value {
                    write!(f, " = {value}")?;
                }
                writeln!(f)?;
            }
            writeln!(f, "}}")?;
        }

        for property in &self.properties {
            writeln!(f, "@property {} {};", property.attributes, property.name)?;
        }
        for method in &self.methods {
            let sign = if method.is_class { '+' } else { '-' };
            writeln!(f, "{sign} ({}){}; // {}", method.return_type, method.name, method.implementation)?;
        }
        write!(f, "@end")
    }
}

/// Heuristic check that `symbol` points at an Objective-C object.
///
/// Tagged pointers are accepted outright. Otherwise the pointer must be
/// aligned and its isa word must carry the architecture's non-pointer isa
/// magic (any non-zero isa on architectures without one).
///
/// ## Errors
///
/// Session errors and memory failures other than an unreadable pointee.
pub fn looks_like_object(client: &Client, symbol: Symbol) -> Result<bool>
{
    client.check_symbol(symbol)?;
    let raw = symbol.value();
    if raw == 0 {
        return Ok(false);
    }
    let architecture = client.architecture();
    let tag_bit = match architecture {
        Architecture::Arm64 | Architecture::Arm64e => 1 << 63,
        Architecture::X86_64 => 1,
        Architecture::Unknown(_) => 0,
    };
    if raw & tag_bit != 0 {
        return Ok(true);
    }
    if raw % 8 != 0 {
        return Ok(false);
    }

    let isa = match client.peek(symbol.address(), 8) {
        Ok(bytes) => ItemSize::Eight.decode(&bytes, client.endianness())?,
        Err(BurrowError::Access { .. }) => return Ok(false),
        Err(err) => return Err(err),
    };
    Ok(match architecture.isa_magic() {
        Some((mask, magic)) => isa & mask == magic,
        None => isa != 0,
    })
}

fn describe_level(client: &mut Client, class: Address, name: &str) -> Result<ClassLevel>
{
    let address = class.to_string();
    let lookup = if name.is_empty() { address.clone() } else { name.to_string() };
    client
        .evaluate_template_json::<SnippetReply<ClassLevel>>(
            &CLASS_DESCRIPTION,
            &[("__class_address__", &address), ("__class_name__", name)],
        )?
        .into_result(|error| BurrowError::Lookup(format!("class {lookup}: {error}")))
}

fn decode_or_raw(encoding: &str) -> String
{
    decode_type(encoding).unwrap_or_else(|err| {
        debug!("{err}");
        encoding.to_string()
    })
}

/// Width to read for an ivar: its encoding's size, else the gap to the next
/// ivar. Only 1, 2, 4 and 8 byte slots are read.
fn ivar_width(ivar: &IvarDescriptor, next_offset: Option<u64>) -> Option<ItemSize>
{
    let aggregate = matches!(encoding::base_code(&ivar.type_encoding), Some('{' | '(' | '[' | 'b'));
    let width = match encoding_size(&ivar.type_encoding) {
        Some(width) => width,
        None if aggregate => return None,
        None => usize::try_from(next_offset?.checked_sub(ivar.offset)?).ok()?,
    };
    u8::try_from(width.min(8)).ok().and_then(|width| ItemSize::try_from(width).ok())
}

fn slot_delta(offset: u64) -> Result<i64>
{
    i64::try_from(offset).map_err(|_| BurrowError::InvalidArgument(format!("ivar offset 0x{offset:x} out of range")))
}

fn read_slot(client: &Client, object: Symbol, offset: u64, item_size: ItemSize) -> Result<Symbol>
{
    let bytes = client.peek(object.address().offset(slot_delta(offset)?), item_size.bytes())?;
    let raw = item_size.decode(&bytes, client.endianness())?;
    Ok(client.symbol(raw).with_item_size(item_size))
}

#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn sign_extend(bits: u64, width: usize) -> i64
{
    let shift = 64 - (width * 8) as u32;
    ((bits << shift) as i64) >> shift
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn ivar(encoding: &str, offset: u64) -> IvarDescriptor
    {
        IvarDescriptor {
            name: "field".to_string(),
            type_name: decode_or_raw(encoding),
            type_encoding: encoding.to_string(),
            offset,
            declared_in: "Thing".to_string(),
            value: None,
        }
    }

    #[test]
    fn test_ivar_width()
    {
        assert_eq!(ivar_width(&ivar("c", 8), Some(9)), Some(ItemSize::One));
        assert_eq!(ivar_width(&ivar("@\"NSString\"", 8), None), Some(ItemSize::Eight));
        assert_eq!(ivar_width(&ivar("{CGPoint=dd}", 8), Some(24)), None);
        assert_eq!(ivar_width(&ivar("?", 8), Some(12)), Some(ItemSize::Four));
        assert_eq!(ivar_width(&ivar("?", 8), Some(11)), None);
        assert_eq!(ivar_width(&ivar("?", 8), None), None);
    }

    #[test]
    fn test_sign_extend()
    {
        assert_eq!(sign_extend(0xff, 1), -1);
        assert_eq!(sign_extend(0x7f, 1), 127);
        assert_eq!(sign_extend(0xffff_fffe, 4), -2);
        assert_eq!(sign_extend(u64::MAX, 8), -1);
    }

    #[test]
    fn test_qualified_method_name()
    {
        let method = MethodDescriptor {
            name: "setName:".to_string(),
            address: Address::new(0x1000),
            implementation: Address::new(0x2000),
            is_class: false,
            return_type: "void".to_string(),
            argument_types: vec!["NSString *".to_string()],
            type_encoding: "v24@0:8@16".to_string(),
        };
        assert_eq!(method.qualified_name("Person"), "-[Person setName:]");
        assert_eq!(MethodDescriptor { is_class: true, ..method }.qualified_name("Person"), "+[Person setName:]");
    }
}
