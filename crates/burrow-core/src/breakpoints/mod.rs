//! Breakpoint and monitor bookkeeping.
//!
//! This module tracks breakpoint lifecycle (ids, states, hit counts, the
//! backend trap each breakpoint currently owns) so that [`crate::Client`] can
//! focus on talking to the backend. Two kinds of breakpoint exist:
//!
//! - **plain** breakpoints run a caller-supplied callback and leave the target
//!   stopped unless the callback resumes it;
//! - **monitors** run a [`MonitorPlan`] compiled from a declarative
//!   [`MonitorSpec`] and resume or stop as the spec says.
//!
//! ## States
//!
//! ```text
//! pending ──(module loaded)──▶ armed ──(hit)──▶ evaluating ──▶ armed   (resumed)
//!                                ▲                         └──▶ stopped (stop requested)
//!                                └────────(enable)──── disabled
//! ```
//!
//! Ids are allocated from a per-session counter and never reused, even after
//! the breakpoint is removed.

pub mod monitor;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::SystemTime;

pub use monitor::{
    Disposition, FormatterFn, HitOutcome, HitReport, MonitorAction, MonitorPlan, MonitorSpec, ValueFormat,
};

use crate::backend::BackendBreakpointId;
use crate::client::Client;
use crate::error::Result;
use crate::types::{Address, ThreadId};

/// Unique identifier for a breakpoint within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// What runs when a breakpoint is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind
{
    /// Caller-supplied callback.
    Plain,
    /// Compiled monitor plan.
    Monitor,
}

/// Lifecycle states for a breakpoint entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState
{
    /// Waiting for a module to load before it can be armed.
    Pending,
    /// Installed in the backend.
    Armed,
    /// A hit is being processed.
    Evaluating,
    /// The last hit left the target stopped.
    Stopped,
    /// Trap removed; id and configuration kept.
    Disabled,
}

/// Name/module pair a pending breakpoint waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredTarget
{
    /// Symbol to resolve once the module is loaded.
    pub name: String,
    /// Substring the loaded image path must contain.
    pub module: String,
}

/// Information handed to a plain breakpoint callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitContext
{
    /// Breakpoint that fired.
    pub breakpoint: BreakpointId,
    /// Address of the breakpoint.
    pub address: Address,
    /// Thread that hit it.
    pub thread: ThreadId,
    /// Hit count including this hit.
    pub hit_count: u64,
    /// Display label.
    pub label: String,
}

/// Callback of a plain breakpoint.
pub type BreakpointCallback = Rc<dyn Fn(&mut Client, &HitContext) -> Result<()>>;

#[derive(Clone)]
pub(crate) enum Handler
{
    Monitor(Rc<MonitorPlan>),
    Callback(BreakpointCallback),
}

impl fmt::Debug for Handler
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Monitor(plan) => f.debug_tuple("Monitor").field(plan).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Public information about a breakpoint.
#[derive(Debug, Clone)]
pub struct BreakpointInfo
{
    /// Unique identifier for this breakpoint.
    pub id: BreakpointId,
    /// Address of the breakpoint; `None` while pending.
    pub address: Option<Address>,
    /// Plain or monitor.
    pub kind: BreakpointKind,
    /// Current lifecycle state of the breakpoint.
    pub state: BreakpointState,
    /// Whether hits are processed.
    pub enabled: bool,
    /// Number of processed hits.
    pub hit_count: u64,
    /// Survives bulk removal unless explicitly included.
    pub guarded: bool,
    /// Display label used in hit reports.
    pub label: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Monitor configuration, for monitors.
    pub spec: Option<MonitorSpec>,
    /// What a pending breakpoint waits for.
    pub deferred: Option<DeferredTarget>,
    /// Timestamp when the breakpoint was requested.
    pub requested_at: SystemTime,
    /// Timestamp when the breakpoint was last installed.
    pub armed_at: Option<SystemTime>,
}

impl BreakpointInfo
{
    pub(crate) fn new(kind: BreakpointKind, address: Option<Address>, label: String) -> Self
    {
        Self {
            id: BreakpointId::from_raw(0),
            address,
            kind,
            state: BreakpointState::Pending,
            enabled: true,
            hit_count: 0,
            guarded: false,
            label,
            description: None,
            spec: None,
            deferred: None,
            requested_at: SystemTime::now(),
            armed_at: None,
        }
    }

    /// Whether a backend trap currently backs this breakpoint.
    #[must_use]
    pub fn is_armed(&self) -> bool
    {
        matches!(self.state, BreakpointState::Armed | BreakpointState::Evaluating | BreakpointState::Stopped)
    }
}

/// Breakpoint entry tracked by the store.
#[derive(Debug, Clone)]
pub(crate) struct BreakpointEntry
{
    pub(crate) info: BreakpointInfo,
    pub(crate) handler: Handler,
    pub(crate) backend_id: Option<BackendBreakpointId>,
}

/// Session-wide breakpoint registry. Mutated only from the controlling thread.
#[derive(Debug, Default)]
pub(crate) struct BreakpointStore
{
    next_id: u64,
    by_id: HashMap<BreakpointId, BreakpointEntry>,
    monitors: HashMap<Address, BreakpointId>,
    by_backend: HashMap<BackendBreakpointId, BreakpointId>,
}

impl BreakpointStore
{
    pub(crate) fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&mut self) -> BreakpointId
    {
        self.next_id = self.next_id.wrapping_add(1);
        BreakpointId::from_raw(self.next_id)
    }

    /// Insert a new entry under a fresh id.
    pub(crate) fn insert(&mut self, mut entry: BreakpointEntry) -> BreakpointId
    {
        let id = self.allocate_id();
        entry.info.id = id;
        if entry.info.kind == BreakpointKind::Monitor {
            if let Some(address) = entry.info.address {
                self.monitors.insert(address, id);
            }
        }
        if let Some(backend_id) = entry.backend_id {
            self.by_backend.insert(backend_id, id);
        }
        self.by_id.insert(id, entry);
        id
    }

    pub(crate) fn get(&self, id: BreakpointId) -> Option<&BreakpointEntry>
    {
        self.by_id.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: BreakpointId) -> Option<&mut BreakpointEntry>
    {
        self.by_id.get_mut(&id)
    }

    /// Monitor currently owning `address`.
    pub(crate) fn monitor_at(&self, address: Address) -> Option<BreakpointId>
    {
        self.monitors.get(&address).copied()
    }

    pub(crate) fn id_for_backend(&self, backend_id: BackendBreakpointId) -> Option<BreakpointId>
    {
        self.by_backend.get(&backend_id).copied()
    }

    /// Record that `id` is now installed at `address` as `backend_id`.
    pub(crate) fn bind(&mut self, id: BreakpointId, address: Address, backend_id: BackendBreakpointId)
    {
        let Some(entry) = self.by_id.get_mut(&id) else {
            return;
        };
        entry.info.address = Some(address);
        entry.info.state = BreakpointState::Armed;
        entry.info.armed_at = Some(SystemTime::now());
        entry.backend_id = Some(backend_id);
        if entry.info.kind == BreakpointKind::Monitor {
            self.monitors.insert(address, id);
        }
        self.by_backend.insert(backend_id, id);
    }

    /// Forget the backend trap of `id`, returning it.
    pub(crate) fn unbind(&mut self, id: BreakpointId) -> Option<BackendBreakpointId>
    {
        let entry = self.by_id.get_mut(&id)?;
        let backend_id = entry.backend_id.take()?;
        self.by_backend.remove(&backend_id);
        Some(backend_id)
    }

    /// Remove a breakpoint from the store, returning the entry if it was present.
    pub(crate) fn remove(&mut self, id: BreakpointId) -> Option<BreakpointEntry>
    {
        let entry = self.by_id.remove(&id)?;
        if let Some(address) = entry.info.address {
            if self.monitors.get(&address) == Some(&id) {
                self.monitors.remove(&address);
            }
        }
        if let Some(backend_id) = entry.backend_id {
            self.by_backend.remove(&backend_id);
        }
        Some(entry)
    }

    /// All breakpoints, ordered by id.
    pub(crate) fn list(&self) -> Vec<BreakpointInfo>
    {
        let mut infos: Vec<BreakpointInfo> = self.by_id.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub(crate) fn ids(&self) -> Vec<BreakpointId>
    {
        let mut ids: Vec<BreakpointId> = self.by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Pending breakpoints waiting for an image whose path contains a module
    /// filter matching `path`.
    pub(crate) fn pending_for(&self, path: &str) -> Vec<BreakpointId>
    {
        let mut ids: Vec<BreakpointId> = self
            .by_id
            .values()
            .filter(|entry| entry.info.state == BreakpointState::Pending)
            .filter(|entry| entry.info.deferred.as_ref().is_some_and(|target| path.contains(&target.module)))
            .map(|entry| entry.info.id)
            .collect();
        ids.sort();
        ids
    }

    /// Record a hit on the trap `backend_id`. Returns the updated info and the
    /// handler to run, or `None` for unknown traps and disabled breakpoints.
    pub(crate) fn record_hit(&mut self, backend_id: BackendBreakpointId) -> Option<(BreakpointInfo, Handler)>
    {
        let id = self.id_for_backend(backend_id)?;
        let entry = self.by_id.get_mut(&id)?;
        if !entry.info.enabled {
            return None;
        }
        entry.info.hit_count = entry.info.hit_count.saturating_add(1);
        entry.info.state = BreakpointState::Evaluating;
        Some((entry.info.clone(), entry.handler.clone()))
    }

    pub(crate) fn set_state(&mut self, id: BreakpointId, state: BreakpointState)
    {
        if let Some(entry) = self.by_id.get_mut(&id) {
            entry.info.state = state;
        }
    }

    /// Number of breakpoints with an installed trap.
    pub(crate) fn armed_count(&self) -> usize
    {
        self.by_id.values().filter(|entry| entry.backend_id.is_some()).count()
    }

    /// Drain the store without touching the backend. Ids keep counting.
    pub(crate) fn drain(&mut self) -> Vec<BreakpointEntry>
    {
        self.monitors.clear();
        self.by_backend.clear();
        self.by_id.drain().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn monitor_entry(address: u64) -> BreakpointEntry
    {
        let plan = MonitorPlan::compile(&MonitorSpec::new()).unwrap();
        BreakpointEntry {
            info: BreakpointInfo::new(BreakpointKind::Monitor, Some(Address::new(address)), "m".to_string()),
            handler: Handler::Monitor(Rc::new(plan)),
            backend_id: None,
        }
    }

    #[test]
    fn test_ids_are_never_reused()
    {
        let mut store = BreakpointStore::new();
        let first = store.insert(monitor_entry(0x1000));
        assert!(store.remove(first).is_some());
        let second = store.insert(monitor_entry(0x1000));
        assert_ne!(first, second);
        store.drain();
        let third = store.insert(monitor_entry(0x1000));
        assert!(third > second);
    }

    #[test]
    fn test_bind_and_record_hit()
    {
        let mut store = BreakpointStore::new();
        let id = store.insert(monitor_entry(0x2000));
        assert_eq!(store.monitor_at(Address::new(0x2000)), Some(id));
        assert!(store.record_hit(BackendBreakpointId(7)).is_none());

        store.bind(id, Address::new(0x2000), BackendBreakpointId(7));
        assert_eq!(store.armed_count(), 1);
        let (info, _) = store.record_hit(BackendBreakpointId(7)).unwrap();
        assert_eq!(info.hit_count, 1);
        assert_eq!(info.state, BreakpointState::Evaluating);

        assert_eq!(store.unbind(id), Some(BackendBreakpointId(7)));
        assert!(store.record_hit(BackendBreakpointId(7)).is_none());
        assert_eq!(store.armed_count(), 0);
    }

    #[test]
    fn test_disabled_breakpoints_ignore_hits()
    {
        let mut store = BreakpointStore::new();
        let id = store.insert(monitor_entry(0x3000));
        store.bind(id, Address::new(0x3000), BackendBreakpointId(1));
        store.get_mut(id).unwrap().info.enabled = false;
        assert!(store.record_hit(BackendBreakpointId(1)).is_none());
        assert_eq!(store.get(id).unwrap().info.hit_count, 0);
    }

    #[test]
    fn test_remove_clears_monitor_address()
    {
        let mut store = BreakpointStore::new();
        let id = store.insert(monitor_entry(0x4000));
        store.remove(id);
        assert_eq!(store.monitor_at(Address::new(0x4000)), None);
        assert!(store.list().is_empty());
    }
}
