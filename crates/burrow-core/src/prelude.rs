//! Common module for library exports

pub use crate::breakpoints::{MonitorSpec, ValueFormat};
pub use crate::bridge::{from_target, to_target, Value};
pub use crate::client::{Client, Location};
pub use crate::error::{BurrowError, Result};
pub use crate::introspect::ObjectDescriptor;
pub use crate::symbols::{ItemSize, Symbol, SymbolJar, SymbolKind};
pub use crate::types::address::Address;
pub use crate::types::process::{Architecture, ProcessState, ThreadId};
