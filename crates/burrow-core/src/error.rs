//! # Error Types
//!
//! Every fallible burrow operation returns [`BurrowError`].
//!
//! ## Error Categories
//!
//! 1. **Target access**: `Access`, `Register`
//! 2. **Target execution**: `Call`, `Eval`
//! 3. **Naming**: `AddressResolution`, `Lookup`
//! 4. **Value conversion**: `Serialization`, `Format`
//! 5. **Breakpoints**: `MonitorCollision`, `BreakpointIdNotFound`
//! 6. **Session**: `Detached`, `StaleSymbol`, `Backend`
//! 7. **Host**: `InvalidArgument`, `Io`
//!
//! Failures inside a monitor pipeline are caught and reported by the engine;
//! session errors are the only ones that should end a session.

use std::io;

use thiserror::Error;

use crate::breakpoints::BreakpointId;
use crate::types::Address;

/// Why a memory access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault
{
    /// No mapping covers the requested range.
    NotMapped,
    /// The range is mapped but cannot be written.
    ReadOnly,
    /// Only the first `transferred` bytes could be accessed.
    Partial
    {
        /// Bytes successfully transferred before the fault.
        transferred: usize,
    },
}

impl std::fmt::Display for AccessFault
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self {
            Self::NotMapped => write!(f, "address not mapped"),
            Self::ReadOnly => write!(f, "region is read-only"),
            Self::Partial { transferred } => write!(f, "partial transfer ({transferred} bytes)"),
        }
    }
}

/// Main error type for burrow operations
#[derive(Error, Debug)]
pub enum BurrowError
{
    /// Memory at `address` could not be read or written.
    #[error("Memory access failed at {address} ({len} bytes): {fault}")]
    Access
    {
        /// First address of the failed access.
        address: Address,
        /// Requested length.
        len: usize,
        /// Reason reported by the backend.
        fault: AccessFault,
    },

    /// A function call in the target failed or could not be attempted.
    #[error("Call to {address} failed: {reason}")]
    Call
    {
        /// Function address.
        address: Address,
        /// Backend or marshalling message.
        reason: String,
    },

    /// An expression failed in the target's context.
    #[error("Expression evaluation failed: {0}")]
    Eval(String),

    /// A name or location cannot be turned into an address yet.
    #[error("Cannot resolve an address for {0}")]
    AddressResolution(String),

    /// A value has no defined mapping across the host/target boundary.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A value formatter failed.
    #[error("Formatter failed: {0}")]
    Format(String),

    /// A name is absent from a jar.
    #[error("Symbol not found: {0}")]
    Lookup(String),

    /// A register could not be read or written.
    #[error("Register {name} unavailable: {reason}")]
    Register
    {
        /// Register name as requested.
        name: String,
        /// Backend message.
        reason: String,
    },

    /// A monitor already watches the address and override was not requested.
    #[error("A monitor is already armed at {address} (breakpoint #{existing})")]
    MonitorCollision
    {
        /// Watched address.
        address: Address,
        /// Breakpoint currently owning the address.
        existing: BreakpointId,
    },

    /// No breakpoint exists for the given identifier.
    #[error("No breakpoint with id {0}")]
    BreakpointIdNotFound(u64),

    /// The session lost its target; nothing can be done with it anymore.
    #[error("Session is detached from the target")]
    Detached,

    /// A symbol created by a previous session was used with a new one.
    #[error("Symbol {address} belongs to session {symbol_session}, not {current_session}")]
    StaleSymbol
    {
        /// Symbol address.
        address: Address,
        /// Session that produced the symbol.
        symbol_session: u64,
        /// Session the symbol was used with.
        current_session: u64,
    },

    /// The backend failed in a way not covered by a more specific variant.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid argument passed to a burrow function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (symbol-map files, image files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BurrowError
{
    /// Whether the error means the session is unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool
    {
        matches!(self, Self::Detached | Self::StaleSymbol { .. })
    }
}

/// Result type alias for burrow operations
pub type Result<T> = std::result::Result<T, BurrowError>;
