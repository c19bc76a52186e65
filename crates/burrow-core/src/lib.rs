//! # burrow-core
//!
//! Instrumentation primitives for a live process driven through a debugger
//! backend.
//!
//! This crate provides:
//! - Typed address handles ([`Symbol`]) and named collections of them
//!   ([`SymbolJar`])
//! - A declarative breakpoint-monitor engine ([`MonitorSpec`])
//! - An object bridge that moves structured values in and out of the
//!   target's object runtime ([`bridge`])
//! - Class and instance introspection ([`ObjectDescriptor`])
//! - Persistence of resolved symbols across process restarts
//!
//! ## Backends
//!
//! The crate never touches a process itself. Memory, registers, breakpoints
//! and expression evaluation are delegated to an implementation of
//! [`Backend`], which a [`Client`] owns for the length of a session.
//!
//! ## Threading
//!
//! A [`Client`] is driven from one thread. Breakpoint callbacks run
//! synchronously while the target is stopped at the hit, so two callbacks
//! never overlap.

pub mod backend;
pub mod breakpoints;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod introspect;
pub mod prelude;
pub mod symbols;
pub mod types;

pub use backend::{Backend, BackendBreakpointId, CallArgument};
pub use breakpoints::{
    BreakpointCallback, BreakpointId, BreakpointInfo, BreakpointKind, BreakpointState, HitContext, HitOutcome,
    HitReport, MonitorSpec, ValueFormat,
};
pub use bridge::Value;
pub use client::{Client, Location, SymbolMapSummary};
pub use config::ClientConfig;
pub use error::{AccessFault, BurrowError, Result};
pub use events::{event_channel, BackendEvent, BackendEventReceiver, BackendEventSender, EventOutcome};
pub use introspect::{looks_like_object, ObjectDescriptor};
pub use symbols::{ItemSize, Symbol, SymbolJar, SymbolKind};
pub use types::{Address, Architecture, Endianness, ImageInfo, ProcessState, StackFrame, ThreadId};
