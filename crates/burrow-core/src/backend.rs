//! # Backend Trait
//!
//! The contract burrow consumes from a debugger engine.
//!
//! burrow never touches the target directly. Memory transfers, breakpoint traps,
//! function calls and expression compilation are all delegated to an
//! implementation of [`Backend`], typically a thin wrapper around an LLDB
//! session. Everything above this trait (symbols, monitors, the object bridge)
//! is backend-agnostic.
//!
//! ## Error conventions
//!
//! | operation          | failure                                  |
//! |--------------------|------------------------------------------|
//! | `read_memory`      | `Access { fault: NotMapped }`            |
//! | `write_memory`     | `Access { fault: NotMapped / ReadOnly }` |
//! | `evaluate`         | `Eval`                                   |
//! | `print_object`     | `Eval`                                   |
//! | `call`             | `Call`                                   |
//! | register access    | `Register`                               |
//! | anything, detached | `Detached`                               |
//!
//! ## Thread Safety
//!
//! Backends are driven from a single controlling thread and need not be
//! thread-safe.

use std::fmt;

use crate::error::Result;
use crate::types::{Address, Architecture, Endianness, ImageInfo, ProcessState, StackFrame, ThreadId};

/// Identifier the backend assigns to a trap it installed.
///
/// Distinct from [`crate::breakpoints::BreakpointId`]: a client breakpoint keeps
/// its id across disable/enable cycles while the backend id changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendBreakpointId(pub u64);

impl fmt::Display for BackendBreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// One argument of a target function call.
///
/// Integers are passed in registers as-is; byte strings are copied into the
/// target by the backend (NUL-terminated) and passed by pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArgument
{
    /// Integer or pointer argument.
    Integer(u64),
    /// Byte string passed as a pointer to a temporary copy.
    Bytes(Vec<u8>),
}

impl From<u64> for CallArgument
{
    fn from(value: u64) -> Self
    {
        Self::Integer(value)
    }
}

impl From<Address> for CallArgument
{
    fn from(value: Address) -> Self
    {
        Self::Integer(value.value())
    }
}

impl From<&str> for CallArgument
{
    fn from(value: &str) -> Self
    {
        Self::Bytes(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for CallArgument
{
    fn from(value: &[u8]) -> Self
    {
        Self::Bytes(value.to_vec())
    }
}

/// Debugger engine interface
///
/// ## Lifecycle
///
/// 1. The embedder attaches its engine to a target and wraps it in a type
///    implementing this trait.
/// 2. The backend is handed to [`crate::Client::new`], which owns it from then on.
/// 3. Asynchronous notifications (breakpoint hits, module loads, exit) are fed
///    back to the client as [`crate::events::BackendEvent`]s.
pub trait Backend
{
    /// Architecture of the target.
    fn architecture(&self) -> Architecture;

    /// Byte order of the target.
    fn endianness(&self) -> Endianness
    {
        Endianness::Little
    }

    /// Whether the backend still controls a live target.
    fn is_attached(&self) -> bool;

    /// Current execution state.
    fn process_state(&self) -> ProcessState;

    /// Release the target. The backend is unusable afterwards.
    ///
    /// ## Errors
    ///
    /// Backend-specific failure while detaching.
    fn detach(&mut self) -> Result<()>;

    /// Read `len` bytes at `address`.
    ///
    /// ## Errors
    ///
    /// `Access` when any byte of the range is unreadable.
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at `address`.
    ///
    /// ## Errors
    ///
    /// `Access` when the range is unmapped or read-only.
    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>;

    /// Compile and run `source` in the context of the current frame and return
    /// its scalar result. `type_hint` is a cast applied to the result.
    ///
    /// ## Errors
    ///
    /// `Eval` when compilation or execution fails.
    fn evaluate(&mut self, source: &str, type_hint: Option<&str>) -> Result<u64>;

    /// Run `source` and return the target's own textual description of the
    /// resulting object (LLDB's `expression -O`).
    ///
    /// ## Errors
    ///
    /// `Eval` when compilation or execution fails.
    fn print_object(&mut self, source: &str) -> Result<String>;

    /// Call the function at `address` with integer-class arguments and return
    /// the raw return register.
    ///
    /// ## Errors
    ///
    /// `Call` when the call cannot be set up or the callee faults.
    fn call(&mut self, address: Address, args: &[CallArgument]) -> Result<u64>;

    /// Run a raw engine command and return its output.
    ///
    /// ## Errors
    ///
    /// `Backend` when the command is rejected.
    fn handle_command(&mut self, command: &str) -> Result<String>;

    /// Install a trap at `address`.
    ///
    /// ## Errors
    ///
    /// `Backend` when the trap cannot be installed.
    fn set_breakpoint(&mut self, address: Address) -> Result<BackendBreakpointId>;

    /// Remove a trap previously returned by [`Backend::set_breakpoint`].
    ///
    /// ## Errors
    ///
    /// `Backend` when the id is unknown to the engine.
    fn remove_breakpoint(&mut self, id: BackendBreakpointId) -> Result<()>;

    /// Read a register of `thread` by name (`x0`, `rip`, `$arg1`, ...).
    ///
    /// ## Errors
    ///
    /// `Register` for unknown names or threads.
    fn read_register(&self, thread: ThreadId, name: &str) -> Result<u64>;

    /// Write a register of `thread` by name.
    ///
    /// ## Errors
    ///
    /// `Register` for unknown names or threads.
    fn write_register(&mut self, thread: ThreadId, name: &str, value: u64) -> Result<()>;

    /// Let the whole target run.
    ///
    /// ## Errors
    ///
    /// `Backend` when the target cannot be resumed.
    fn resume(&mut self) -> Result<()>;

    /// Interrupt the whole target.
    ///
    /// ## Errors
    ///
    /// `Backend` when the target cannot be stopped.
    fn stop(&mut self) -> Result<()>;

    /// Single-step `thread`, entering calls.
    ///
    /// ## Errors
    ///
    /// `Backend` on step failure.
    fn step_into(&mut self, thread: ThreadId) -> Result<()>;

    /// Single-step `thread`, stepping over calls.
    ///
    /// ## Errors
    ///
    /// `Backend` on step failure.
    fn step_over(&mut self, thread: ThreadId) -> Result<()>;

    /// Run `thread` until the current function returns to its caller.
    ///
    /// ## Errors
    ///
    /// `Backend` on step failure.
    fn step_out(&mut self, thread: ThreadId) -> Result<()>;

    /// Leave the current function of `thread` with `value` as its return value.
    ///
    /// The default finishes the function and then overwrites the return
    /// register; engines with a native "return now" primitive should override
    /// it so the function body is skipped entirely.
    ///
    /// ## Errors
    ///
    /// Step or register failures.
    fn force_return(&mut self, thread: ThreadId, value: u64) -> Result<()>
    {
        self.step_out(thread)?;
        let register = self.architecture().return_register();
        self.write_register(thread, register, value)
    }

    /// All threads of the target.
    ///
    /// ## Errors
    ///
    /// `Backend` when the thread list is unavailable.
    fn threads(&self) -> Result<Vec<ThreadId>>;

    /// The thread register and stack operations apply to by default.
    fn selected_thread(&self) -> Option<ThreadId>;

    /// Make `thread` the selected thread.
    ///
    /// ## Errors
    ///
    /// `Backend` for unknown threads.
    fn select_thread(&mut self, thread: ThreadId) -> Result<()>;

    /// Call stack of `thread`, innermost frame first.
    ///
    /// ## Errors
    ///
    /// `Backend` when the stack cannot be unwound.
    fn backtrace(&self, thread: ThreadId) -> Result<Vec<StackFrame>>;

    /// Look up a global symbol, optionally restricted to images whose name
    /// contains `module_hint`. `Ok(None)` means "not found".
    ///
    /// ## Errors
    ///
    /// `Backend` when the lookup itself fails.
    fn resolve_symbol(&self, name: &str, module_hint: Option<&str>) -> Result<Option<Address>>;

    /// Best-effort symbol name covering `address`.
    fn symbol_name_at(&self, _address: Address) -> Option<String>
    {
        None
    }

    /// Images currently loaded in the target.
    ///
    /// ## Errors
    ///
    /// `Backend` when the image list is unavailable.
    fn images(&self) -> Result<Vec<ImageInfo>>;
}
