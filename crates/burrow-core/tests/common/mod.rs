//! In-memory backend shared by the integration tests.
//!
//! The mock keeps all of its state behind an `Rc<RefCell<..>>` so a test can
//! hand the backend to a [`Client`] and still inspect or tweak what the
//! "target" sees afterwards.

#![allow(dead_code)]

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::rc::Rc;

use burrow_core::backend::{Backend, BackendBreakpointId, CallArgument};
use burrow_core::error::{AccessFault, BurrowError, Result};
use burrow_core::events::{BackendEvent, EventOutcome};
use burrow_core::types::{Address, Architecture, ImageInfo, ProcessState, StackFrame, ThreadId};
use burrow_core::{BreakpointId, Client, ClientConfig};

/// Thread every simulated hit happens on.
pub const MAIN_THREAD: ThreadId = ThreadId(0x103);

/// A mapped range of target memory.
#[derive(Debug, Clone)]
pub struct Region
{
    pub start: u64,
    pub data: Vec<u8>,
    pub writable: bool,
}

impl Region
{
    fn covers(&self, address: u64, len: usize) -> bool
    {
        address >= self.start && address + len as u64 <= self.start + self.data.len() as u64
    }
}

/// Everything the mock target knows.
#[derive(Debug)]
pub struct MockState
{
    pub architecture: Architecture,
    pub attached: bool,
    pub state: ProcessState,
    pub regions: Vec<Region>,
    pub registers: HashMap<String, u64>,
    pub threads: Vec<ThreadId>,
    pub selected: Option<ThreadId>,
    pub next_trap: u64,
    pub traps: HashMap<u64, Address>,
    /// Make `set_breakpoint` fail.
    pub refuse_traps: bool,
    pub resumes: usize,
    pub step_outs: usize,
    pub forced_returns: Vec<(ThreadId, u64)>,
    pub commands: Vec<String>,
    /// `(needle, value)`: `evaluate` answers with the first entry whose needle
    /// occurs in the source.
    pub evaluations: Vec<(String, u64)>,
    pub evaluated: Vec<String>,
    /// `(needle, reply)`: `print_object` answers with the longest needle that
    /// occurs in the source, the most recently registered on a tie.
    pub descriptions: Vec<(String, String)>,
    pub printed: Vec<String>,
    pub functions: HashMap<u64, u64>,
    pub calls: Vec<(u64, Vec<CallArgument>)>,
    pub symbols: HashMap<String, u64>,
    pub lookups: Vec<String>,
    pub images: Vec<ImageInfo>,
    pub frames: Vec<StackFrame>,
    /// Value the return register holds after a function returns normally.
    pub natural_return: u64,
}

impl Default for MockState
{
    fn default() -> Self
    {
        Self {
            architecture: Architecture::Arm64,
            attached: true,
            state: ProcessState::Stopped,
            regions: Vec::new(),
            registers: HashMap::new(),
            threads: vec![MAIN_THREAD],
            selected: Some(MAIN_THREAD),
            next_trap: 0,
            traps: HashMap::new(),
            refuse_traps: false,
            resumes: 0,
            step_outs: 0,
            forced_returns: Vec::new(),
            commands: Vec::new(),
            evaluations: Vec::new(),
            evaluated: Vec::new(),
            descriptions: Vec::new(),
            printed: Vec::new(),
            functions: HashMap::new(),
            calls: Vec::new(),
            symbols: HashMap::new(),
            lookups: Vec::new(),
            images: Vec::new(),
            frames: Vec::new(),
            natural_return: 0,
        }
    }
}

impl MockState
{
    pub fn map(&mut self, start: u64, data: Vec<u8>, writable: bool)
    {
        self.regions.push(Region { start, data, writable });
    }

    pub fn set_register(&mut self, name: &str, value: u64)
    {
        self.registers.insert(name.to_string(), value);
    }

    pub fn on_evaluate(&mut self, needle: &str, value: u64)
    {
        self.evaluations.push((needle.to_string(), value));
    }

    pub fn on_print_object(&mut self, needle: &str, reply: &str)
    {
        self.descriptions.insert(0, (needle.to_string(), reply.to_string()));
    }

    pub fn define_symbol(&mut self, name: &str, address: u64)
    {
        self.symbols.insert(name.to_string(), address);
    }

    fn return_register(&self) -> String
    {
        self.architecture.return_register().to_string()
    }
}

/// Backend over a shared [`MockState`].
#[derive(Debug, Clone)]
pub struct MockBackend
{
    pub state: Rc<RefCell<MockState>>,
}

impl MockBackend
{
    pub fn new(state: MockState) -> Self
    {
        Self { state: Rc::new(RefCell::new(state)) }
    }
}

fn not_mapped(address: Address, len: usize) -> BurrowError
{
    BurrowError::Access { address, len, fault: AccessFault::NotMapped }
}

impl Backend for MockBackend
{
    fn architecture(&self) -> Architecture
    {
        self.state.borrow().architecture
    }

    fn is_attached(&self) -> bool
    {
        self.state.borrow().attached
    }

    fn process_state(&self) -> ProcessState
    {
        self.state.borrow().state
    }

    fn detach(&mut self) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.attached = false;
        state.state = ProcessState::Detached;
        Ok(())
    }

    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let state = self.state.borrow();
        let region = state
            .regions
            .iter()
            .find(|region| region.covers(address.value(), len))
            .ok_or_else(|| not_mapped(address, len))?;
        let start = (address.value() - region.start) as usize;
        Ok(region.data[start..start + len].to_vec())
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        let region = state
            .regions
            .iter_mut()
            .find(|region| region.covers(address.value(), data.len()))
            .ok_or_else(|| not_mapped(address, data.len()))?;
        if !region.writable {
            return Err(BurrowError::Access { address, len: data.len(), fault: AccessFault::ReadOnly });
        }
        let start = (address.value() - region.start) as usize;
        region.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn evaluate(&mut self, source: &str, _type_hint: Option<&str>) -> Result<u64>
    {
        let mut state = self.state.borrow_mut();
        state.evaluated.push(source.to_string());
        if let Some(value) = state.registers.get(source.trim_start_matches('$')) {
            return Ok(*value);
        }
        state
            .evaluations
            .iter()
            .find(|(needle, _)| source.contains(needle.as_str()))
            .map(|(_, value)| *value)
            .ok_or_else(|| BurrowError::Eval(format!("cannot evaluate {source}")))
    }

    fn print_object(&mut self, source: &str) -> Result<String>
    {
        let mut state = self.state.borrow_mut();
        state.printed.push(source.to_string());
        state
            .descriptions
            .iter()
            .filter(|(needle, _)| source.contains(needle.as_str()))
            .min_by_key(|(needle, _)| Reverse(needle.len()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| BurrowError::Eval(format!("cannot print {source}")))
    }

    fn call(&mut self, address: Address, args: &[CallArgument]) -> Result<u64>
    {
        let mut state = self.state.borrow_mut();
        let result = state.functions.get(&address.value()).copied();
        state.calls.push((address.value(), args.to_vec()));
        result.ok_or_else(|| BurrowError::Call { address, reason: "no function there".to_string() })
    }

    fn handle_command(&mut self, command: &str) -> Result<String>
    {
        if command == "fail" {
            return Err(BurrowError::Backend("command rejected".to_string()));
        }
        self.state.borrow_mut().commands.push(command.to_string());
        Ok(format!("ran {command}\ndone"))
    }

    fn set_breakpoint(&mut self, address: Address) -> Result<BackendBreakpointId>
    {
        let mut state = self.state.borrow_mut();
        if state.refuse_traps {
            return Err(BurrowError::Backend(format!("cannot set a trap at {address}")));
        }
        state.next_trap += 1;
        let trap = state.next_trap;
        state.traps.insert(trap, address);
        Ok(BackendBreakpointId(trap))
    }

    fn remove_breakpoint(&mut self, id: BackendBreakpointId) -> Result<()>
    {
        self.state
            .borrow_mut()
            .traps
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| BurrowError::Backend(format!("no trap {id}")))
    }

    fn read_register(&self, _thread: ThreadId, name: &str) -> Result<u64>
    {
        self.state
            .borrow()
            .registers
            .get(name)
            .copied()
            .ok_or_else(|| BurrowError::Register { name: name.to_string(), reason: "unknown register".to_string() })
    }

    fn write_register(&mut self, _thread: ThreadId, name: &str, value: u64) -> Result<()>
    {
        self.state.borrow_mut().set_register(name, value);
        Ok(())
    }

    fn resume(&mut self) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.resumes += 1;
        state.state = ProcessState::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<()>
    {
        self.state.borrow_mut().state = ProcessState::Stopped;
        Ok(())
    }

    fn step_into(&mut self, _thread: ThreadId) -> Result<()>
    {
        Ok(())
    }

    fn step_over(&mut self, _thread: ThreadId) -> Result<()>
    {
        Ok(())
    }

    fn step_out(&mut self, _thread: ThreadId) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.step_outs += 1;
        let register = state.return_register();
        let value = state.natural_return;
        state.set_register(&register, value);
        Ok(())
    }

    fn force_return(&mut self, thread: ThreadId, value: u64) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.forced_returns.push((thread, value));
        let register = state.return_register();
        state.set_register(&register, value);
        Ok(())
    }

    fn threads(&self) -> Result<Vec<ThreadId>>
    {
        Ok(self.state.borrow().threads.clone())
    }

    fn selected_thread(&self) -> Option<ThreadId>
    {
        self.state.borrow().selected
    }

    fn select_thread(&mut self, thread: ThreadId) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        if !state.threads.contains(&thread) {
            return Err(BurrowError::Backend(format!("no thread {thread}")));
        }
        state.selected = Some(thread);
        Ok(())
    }

    fn backtrace(&self, _thread: ThreadId) -> Result<Vec<StackFrame>>
    {
        Ok(self.state.borrow().frames.clone())
    }

    fn resolve_symbol(&self, name: &str, _module_hint: Option<&str>) -> Result<Option<Address>>
    {
        let mut state = self.state.borrow_mut();
        state.lookups.push(name.to_string());
        Ok(state.symbols.get(name).copied().map(Address::new))
    }

    fn symbol_name_at(&self, address: Address) -> Option<String>
    {
        self.state
            .borrow()
            .symbols
            .iter()
            .find(|(_, value)| **value == address.value())
            .map(|(name, _)| name.clone())
    }

    fn images(&self) -> Result<Vec<ImageInfo>>
    {
        Ok(self.state.borrow().images.clone())
    }
}

/// Configuration used by every test client.
pub fn test_config() -> ClientConfig
{
    ClientConfig { max_string_length: 64, ..ClientConfig::default() }
}

/// A client over a fresh mock, plus a handle on the mock's state.
pub fn client_with(state: MockState) -> (Client, Rc<RefCell<MockState>>)
{
    burrow_utils::init_test_logging();
    let backend = MockBackend::new(state);
    let shared = Rc::clone(&backend.state);
    (Client::with_config(Box::new(backend), test_config()), shared)
}

/// A client over an empty arm64 mock.
pub fn client() -> (Client, Rc<RefCell<MockState>>)
{
    client_with(MockState::default())
}

/// Simulate the target stopping at breakpoint `id` on [`MAIN_THREAD`].
pub fn hit(client: &mut Client, state: &Rc<RefCell<MockState>>, id: BreakpointId) -> Result<EventOutcome>
{
    let address = client.breakpoint(id)?.address.ok_or_else(|| BurrowError::Backend("pending".to_string()))?;
    let trap = {
        let mut state = state.borrow_mut();
        state.state = ProcessState::Stopped;
        state
            .traps
            .iter()
            .filter(|(_, trap_address)| **trap_address == address)
            .map(|(trap, _)| *trap)
            .max()
            .ok_or_else(|| BurrowError::Backend(format!("no trap at {address}")))?
    };
    client.handle_event(BackendEvent::BreakpointHit { breakpoint: BackendBreakpointId(trap), thread: MAIN_THREAD })
}

/// Unique scratch path under the system temp directory.
pub fn scratch_path(name: &str) -> std::path::PathBuf
{
    std::env::temp_dir().join(format!("burrow-test-{}-{name}", std::process::id()))
}
