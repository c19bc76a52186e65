//! # Client
//!
//! A [`Client`] is one instrumentation session over a [`Backend`]. It owns the
//! backend, the default [`SymbolJar`], the breakpoint registry and the
//! configuration, and every operation on symbols, monitors or runtime objects
//! is threaded through it.
//!
//! ## Sessions
//!
//! Each client gets a fresh [`SessionId`]. Symbols remember the session that
//! created them; using one with another client fails with `StaleSymbol`, and
//! using anything after the target went away fails with `Detached`.
//!
//! ## Threading
//!
//! A client is driven from one controlling thread. It is intentionally not
//! `Send`: breakpoint handlers are `Rc`s and the backend need not be
//! thread-safe. Backends running their own listener threads forward events
//! through [`crate::events::event_channel`].
//!
//! ```rust,no_run
//! use burrow_core::{Backend, Client, MonitorSpec, ValueFormat};
//!
//! # fn demo(backend: Box<dyn Backend>) -> burrow_core::Result<()> {
//! let mut client = Client::new(backend);
//! let malloc = client.resolve("malloc")?;
//! malloc.monitor(&mut client, MonitorSpec::new().with_register("x0", ValueFormat::Hex))?;
//! client.resume()?;
//! # Ok(())
//! # }
//! ```

mod breakpoints;
mod symbols;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

pub use breakpoints::Location;
pub use symbols::SymbolMapSummary;

use crate::backend::{Backend, CallArgument};
use crate::breakpoints::BreakpointStore;
use crate::bridge::SnippetTemplate;
use crate::config::ClientConfig;
use crate::error::{AccessFault, BurrowError, Result};
use crate::symbols::{SessionId, Symbol, SymbolJar};
use crate::types::{Address, Architecture, Endianness, ImageInfo, ProcessState, StackFrame, ThreadId};

/// Bytes read per step while scanning for a string terminator. Reads stay
/// inside one aligned chunk so they never straddle a page boundary.
const STRING_CHUNK: u64 = 0x100;

/// An instrumentation session over a debugger backend
pub struct Client
{
    backend: Box<dyn Backend>,
    config: ClientConfig,
    session: SessionId,
    attached: bool,
    architecture: Architecture,
    endianness: Endianness,
    symbols: SymbolJar,
    breakpoints: BreakpointStore,
    hit_thread: Option<ThreadId>,
}

impl std::fmt::Debug for Client
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("attached", &self.attached)
            .field("architecture", &self.architecture)
            .field("symbols", &self.symbols.len())
            .field("breakpoints", &self.breakpoints)
            .finish_non_exhaustive()
    }
}

impl Client
{
    /// Start a session with configuration taken from the environment.
    #[must_use]
    pub fn new(backend: Box<dyn Backend>) -> Self
    {
        Self::with_config(backend, ClientConfig::from_env())
    }

    /// Start a session with an explicit configuration.
    #[must_use]
    pub fn with_config(backend: Box<dyn Backend>, config: ClientConfig) -> Self
    {
        let session = SessionId::next();
        let architecture = backend.architecture();
        let endianness = backend.endianness();
        let attached = backend.is_attached();
        debug!("Session {} started ({architecture}, attached: {attached})", session.raw());
        Self {
            backend,
            config,
            session,
            attached,
            architecture,
            endianness,
            symbols: SymbolJar::new(),
            breakpoints: BreakpointStore::new(),
            hit_thread: None,
        }
    }

    /// Identity of this session.
    #[must_use]
    pub const fn session(&self) -> SessionId
    {
        self.session
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig
    {
        &self.config
    }

    /// Mutable configuration.
    pub fn config_mut(&mut self) -> &mut ClientConfig
    {
        &mut self.config
    }

    /// The underlying backend, for operations burrow does not wrap.
    #[must_use]
    pub fn backend(&self) -> &dyn Backend
    {
        self.backend.as_ref()
    }

    /// Whether the session can still talk to the target.
    #[must_use]
    pub fn is_attached(&self) -> bool
    {
        self.attached && self.backend.is_attached()
    }

    pub(crate) fn ensure_attached(&self) -> Result<()>
    {
        if self.is_attached() {
            Ok(())
        } else {
            Err(BurrowError::Detached)
        }
    }

    /// Fail unless `symbol` was produced by this live session.
    ///
    /// ## Errors
    ///
    /// `Detached` after the session ended, `StaleSymbol` for foreign symbols.
    pub fn check_symbol(&self, symbol: Symbol) -> Result<()>
    {
        self.ensure_attached()?;
        if symbol.session() != self.session {
            return Err(BurrowError::StaleSymbol {
                address: symbol.address(),
                symbol_session: symbol.session().raw(),
                current_session: self.session.raw(),
            });
        }
        Ok(())
    }

    /// Release the target.
    ///
    /// Breakpoints are forgotten without asking the backend to remove them;
    /// the backend drops its traps when it detaches.
    ///
    /// ## Errors
    ///
    /// Whatever the backend reports while detaching.
    pub fn detach(&mut self) -> Result<()>
    {
        if !self.attached {
            return Ok(());
        }
        self.invalidate("detach requested");
        self.backend.detach()
    }

    pub(crate) fn invalidate(&mut self, reason: &str)
    {
        self.attached = false;
        self.hit_thread = None;
        let dropped = self.breakpoints.drain();
        info!("Session {} ended ({reason}); dropped {} breakpoints", self.session.raw(), dropped.len());
    }

    /// Wrap a raw address as a symbol of this session.
    #[must_use]
    pub fn symbol(&self, address: impl Into<Address>) -> Symbol
    {
        Symbol::new(address.into(), self.session)
    }

    /// Target architecture.
    #[must_use]
    pub const fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Target byte order.
    #[must_use]
    pub const fn endianness(&self) -> Endianness
    {
        self.endianness
    }

    /// Current execution state of the target.
    #[must_use]
    pub fn process_state(&self) -> ProcessState
    {
        if self.attached {
            self.backend.process_state()
        } else {
            ProcessState::Detached
        }
    }

    // Memory

    /// Read `len` bytes at `address`.
    ///
    /// ## Errors
    ///
    /// `Access` when any byte is unreadable, `Detached` after the session ended.
    pub fn peek(&self, address: impl Into<Address>, len: usize) -> Result<Vec<u8>>
    {
        self.ensure_attached()?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.backend.read_memory(address.into(), len)
    }

    /// Write `data` at `address`.
    ///
    /// ## Errors
    ///
    /// `Access` when the range is unmapped or read-only.
    pub fn poke(&mut self, address: impl Into<Address>, data: &[u8]) -> Result<()>
    {
        self.ensure_attached()?;
        if data.is_empty() {
            return Ok(());
        }
        self.backend.write_memory(address.into(), data)
    }

    /// Read the NUL-terminated string at `address`, replacing invalid UTF-8.
    ///
    /// ## Errors
    ///
    /// `Access` when the string runs into unreadable memory or no terminator
    /// appears within `max_string_length` bytes.
    pub fn peek_str(&self, address: impl Into<Address>) -> Result<String>
    {
        self.ensure_attached()?;
        let start = address.into();
        let limit = self.config.max_string_length;
        let mut bytes = Vec::new();
        let mut cursor = start;

        while bytes.len() < limit {
            let to_boundary = STRING_CHUNK - (cursor.value() % STRING_CHUNK);
            #[allow(clippy::cast_possible_truncation)]
            let len = (to_boundary as usize).min(limit - bytes.len());
            let chunk = self.backend.read_memory(cursor, len).map_err(|err| match err {
                BurrowError::Access { .. } => BurrowError::Access {
                    address: start,
                    len: bytes.len() + len,
                    fault: AccessFault::Partial { transferred: bytes.len() },
                },
                other => other,
            })?;
            if let Some(end) = chunk.iter().position(|byte| *byte == 0) {
                bytes.extend_from_slice(&chunk[..end]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&chunk);
            cursor = cursor + len as u64;
        }

        Err(BurrowError::Access { address: start, len: limit, fault: AccessFault::Partial { transferred: limit } })
    }

    // Evaluation

    /// Evaluate `expression` in the current frame.
    ///
    /// ## Errors
    ///
    /// `Eval` when the backend rejects or fails the expression.
    pub fn evaluate(&mut self, expression: &str) -> Result<Symbol>
    {
        self.evaluate_with_hint(expression, None)
    }

    /// Evaluate `expression`, casting the result to `type_hint`.
    ///
    /// ## Errors
    ///
    /// `Eval` when the backend rejects or fails the expression.
    pub fn evaluate_with_hint(&mut self, expression: &str, type_hint: Option<&str>) -> Result<Symbol>
    {
        self.ensure_attached()?;
        let value = self.backend.evaluate(expression, type_hint)?;
        Ok(self.symbol(value))
    }

    /// The target's own description of the object `expression` evaluates to.
    ///
    /// ## Errors
    ///
    /// `Eval` when the backend rejects or fails the expression.
    pub fn print_object(&mut self, expression: &str) -> Result<String>
    {
        self.ensure_attached()?;
        self.backend.print_object(expression)
    }

    /// Call the function at `address`.
    ///
    /// ## Errors
    ///
    /// `Call` when the target is not stopped or the call fails.
    pub fn call(&mut self, address: impl Into<Address>, args: &[CallArgument]) -> Result<Symbol>
    {
        self.ensure_attached()?;
        let address = address.into();
        let state = self.backend.process_state();
        if !state.is_stopped() {
            return Err(BurrowError::Call { address, reason: format!("target is not stopped ({state:?})") });
        }
        let value = self.backend.call(address, args)?;
        Ok(self.symbol(value))
    }

    /// Run a raw backend command.
    ///
    /// ## Errors
    ///
    /// `Backend` when the command is rejected.
    pub fn handle_command(&mut self, command: &str) -> Result<String>
    {
        self.ensure_attached()?;
        debug!("Running backend command: {command}");
        self.backend.handle_command(command)
    }

    /// Render `template` with `substitutions`, evaluate it and return the
    /// resulting object.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` for missing or unknown placeholders, `Eval` when the
    /// snippet fails in the target.
    pub fn evaluate_template(&mut self, template: &SnippetTemplate, substitutions: &[(&str, &str)]) -> Result<Symbol>
    {
        let source = template.render(substitutions)?;
        debug!("Evaluating snippet {} v{}", template.name(), template.version());
        self.evaluate(&source)
    }

    /// Render and evaluate `template`, then parse the printed result as JSON.
    ///
    /// The snippet must evaluate to a string object holding the JSON document.
    ///
    /// ## Errors
    ///
    /// As [`Client::evaluate_template`], plus `Serialization` when the printed
    /// result is not the expected JSON.
    pub fn evaluate_template_json<T: DeserializeOwned>(
        &mut self,
        template: &SnippetTemplate,
        substitutions: &[(&str, &str)],
    ) -> Result<T>
    {
        let source = template.render(substitutions)?;
        debug!("Evaluating snippet {} v{} for JSON", template.name(), template.version());
        let printed = self.print_object(&source)?;
        serde_json::from_str(printed.trim())
            .map_err(|err| BurrowError::Serialization(format!("{} returned malformed JSON: {err}", template.name())))
    }

    // Threads and registers

    /// The thread register and stack operations apply to: the hit thread
    /// while a breakpoint is being handled, otherwise the backend's selection.
    ///
    /// ## Errors
    ///
    /// `Backend` when no thread is selected.
    pub fn current_thread(&self) -> Result<ThreadId>
    {
        self.ensure_attached()?;
        self.hit_thread
            .or_else(|| self.backend.selected_thread())
            .ok_or_else(|| BurrowError::Backend("no thread is selected".to_string()))
    }

    /// Select `thread` for register and stack operations.
    ///
    /// ## Errors
    ///
    /// `Backend` for unknown threads.
    pub fn select_thread(&mut self, thread: ThreadId) -> Result<()>
    {
        self.ensure_attached()?;
        self.backend.select_thread(thread)?;
        if self.hit_thread.is_some() {
            self.hit_thread = Some(thread);
        }
        Ok(())
    }

    /// All threads of the target.
    ///
    /// ## Errors
    ///
    /// `Backend` when the list is unavailable.
    pub fn threads(&self) -> Result<Vec<ThreadId>>
    {
        self.ensure_attached()?;
        self.backend.threads()
    }

    /// Read register `name` of the current thread.
    ///
    /// ## Errors
    ///
    /// `Register` for unknown registers.
    pub fn register(&self, name: &str) -> Result<Symbol>
    {
        let thread = self.current_thread()?;
        self.read_thread_register(thread, name)
    }

    /// Write register `name` of the current thread.
    ///
    /// ## Errors
    ///
    /// `Register` for unknown registers.
    pub fn set_register(&mut self, name: &str, value: u64) -> Result<()>
    {
        let thread = self.current_thread()?;
        self.write_thread_register(thread, name, value)
    }

    /// Read register `name` of `thread`.
    ///
    /// ## Errors
    ///
    /// `Register` for unknown registers or threads.
    pub fn read_thread_register(&self, thread: ThreadId, name: &str) -> Result<Symbol>
    {
        self.ensure_attached()?;
        let value = self.backend.read_register(thread, name)?;
        Ok(self.symbol(value))
    }

    /// Write register `name` of `thread`.
    ///
    /// ## Errors
    ///
    /// `Register` for unknown registers or threads.
    pub fn write_thread_register(&mut self, thread: ThreadId, name: &str, value: u64) -> Result<()>
    {
        self.ensure_attached()?;
        self.backend.write_register(thread, name, value)
    }

    // Execution control

    /// Let the target run.
    ///
    /// ## Errors
    ///
    /// `Backend` when the target cannot be resumed.
    pub fn resume(&mut self) -> Result<()>
    {
        self.ensure_attached()?;
        self.backend.resume()
    }

    /// Interrupt the target.
    ///
    /// ## Errors
    ///
    /// `Backend` when the target cannot be stopped.
    pub fn stop(&mut self) -> Result<()>
    {
        self.ensure_attached()?;
        self.backend.stop()
    }

    /// Step the current thread into the next instruction.
    ///
    /// ## Errors
    ///
    /// `Backend` on step failure.
    pub fn step_into(&mut self) -> Result<()>
    {
        let thread = self.current_thread()?;
        self.backend.step_into(thread)
    }

    /// Step the current thread over calls.
    ///
    /// ## Errors
    ///
    /// `Backend` on step failure.
    pub fn step_over(&mut self) -> Result<()>
    {
        let thread = self.current_thread()?;
        self.backend.step_over(thread)
    }

    /// Run the current thread until its function returns.
    ///
    /// ## Errors
    ///
    /// `Backend` on step failure.
    pub fn step_out(&mut self) -> Result<()>
    {
        let thread = self.current_thread()?;
        self.step_out_thread(thread)
    }

    /// Run `thread` until its function returns.
    ///
    /// ## Errors
    ///
    /// `Backend` on step failure.
    pub fn step_out_thread(&mut self, thread: ThreadId) -> Result<()>
    {
        self.ensure_attached()?;
        self.backend.step_out(thread)
    }

    /// Return from the current function of the current thread with `value`.
    ///
    /// ## Errors
    ///
    /// Step or register failures.
    pub fn force_return(&mut self, value: u64) -> Result<()>
    {
        let thread = self.current_thread()?;
        self.force_return_thread(thread, value)
    }

    /// Return from the current function of `thread` with `value`.
    ///
    /// ## Errors
    ///
    /// Step or register failures.
    pub fn force_return_thread(&mut self, thread: ThreadId, value: u64) -> Result<()>
    {
        self.ensure_attached()?;
        self.backend.force_return(thread, value)
    }

    /// Call stack of the current thread.
    ///
    /// ## Errors
    ///
    /// `Backend` when the stack cannot be unwound.
    pub fn backtrace(&self) -> Result<Vec<StackFrame>>
    {
        let thread = self.current_thread()?;
        self.backtrace_thread(thread)
    }

    /// Call stack of `thread`.
    ///
    /// ## Errors
    ///
    /// `Backend` when the stack cannot be unwound.
    pub fn backtrace_thread(&self, thread: ThreadId) -> Result<Vec<StackFrame>>
    {
        self.ensure_attached()?;
        self.backend.backtrace(thread)
    }

    // Images

    /// Images currently loaded in the target.
    ///
    /// ## Errors
    ///
    /// `Backend` when the list is unavailable.
    pub fn images(&self) -> Result<Vec<ImageInfo>>
    {
        self.ensure_attached()?;
        self.backend.images()
    }

    /// The image mapping `address`, if any.
    ///
    /// ## Errors
    ///
    /// `Backend` when the image list is unavailable.
    pub fn image_containing(&self, address: impl Into<Address>) -> Result<Option<ImageInfo>>
    {
        let address = address.into();
        Ok(self.images()?.into_iter().find(|image| image.contains(address)))
    }

    /// Static address of a runtime address, i.e. without its image's load bias.
    ///
    /// ## Errors
    ///
    /// `AddressResolution` when no loaded image contains the address.
    pub fn file_address(&self, address: impl Into<Address>) -> Result<Address>
    {
        let address = address.into();
        self.image_containing(address)?
            .map(|image| image.file_address(address))
            .ok_or_else(|| BurrowError::AddressResolution(format!("{address} (not inside any loaded image)")))
    }

    /// Runtime symbol for static address `file_address` of the image whose
    /// path contains `module`.
    ///
    /// ## Errors
    ///
    /// `AddressResolution` when no such image is loaded.
    pub fn file_symbol(&self, file_address: impl Into<Address>, module: &str) -> Result<Symbol>
    {
        let file_address = file_address.into();
        let image = self
            .images()?
            .into_iter()
            .find(|image| image.name_matches(module))
            .ok_or_else(|| BurrowError::AddressResolution(format!("{file_address} in {module} (module not loaded)")))?;
        Ok(self.symbol(image.relocated_address(file_address)))
    }

    /// Remove pointer-authentication bits from a code pointer on targets that
    /// sign them. Other targets get the address back unchanged.
    #[must_use]
    pub fn strip_code_pointer(&self, address: impl Into<Address>) -> Address
    {
        let address = address.into();
        if self.architecture.signs_code_pointers() {
            address.masked(self.config.pointer_auth_mask)
        } else {
            address
        }
    }
}
