//! Breakpoint registry and hit dispatch.

use std::rc::Rc;
use std::sync::mpsc::TryRecvError;

use tracing::{debug, info, warn};

use super::Client;
use crate::backend::BackendBreakpointId;
use crate::breakpoints::{
    BreakpointEntry, BreakpointId, BreakpointInfo, BreakpointKind, BreakpointState, DeferredTarget, Handler,
    HitContext, HitOutcome, HitReport, MonitorPlan, MonitorSpec,
};
use crate::error::{BurrowError, Result};
use crate::events::{BackendEvent, BackendEventReceiver, EventOutcome};
use crate::symbols::Symbol;
use crate::types::{Address, ProcessState, ThreadId};

/// Where to place a breakpoint: a raw address or a name resolved through
/// [`Client::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location
{
    /// Runtime address.
    Address(Address),
    /// Symbol name, optionally `name{module}`.
    Name(String),
}

impl From<Address> for Location
{
    fn from(address: Address) -> Self
    {
        Self::Address(address)
    }
}

impl From<u64> for Location
{
    fn from(address: u64) -> Self
    {
        Self::Address(Address::new(address))
    }
}

impl From<Symbol> for Location
{
    fn from(symbol: Symbol) -> Self
    {
        Self::Address(symbol.address())
    }
}

impl From<&str> for Location
{
    fn from(name: &str) -> Self
    {
        Self::Name(name.to_string())
    }
}

impl From<String> for Location
{
    fn from(name: String) -> Self
    {
        Self::Name(name)
    }
}

impl Client
{
    /// Place a plain breakpoint running `callback` on every hit.
    ///
    /// Plain breakpoints leave the target stopped unless the callback resumes
    /// it, and are never checked for collisions.
    ///
    /// ## Errors
    ///
    /// `AddressResolution` when the location cannot be resolved, `Backend`
    /// when the trap cannot be installed.
    pub fn bp<F>(&mut self, location: impl Into<Location>, callback: F) -> Result<BreakpointId>
    where
        F: Fn(&mut Client, &HitContext) -> Result<()> + 'static,
    {
        self.ensure_attached()?;
        let address = self.resolve_location(location.into())?;
        let backend_id = self.backend.set_breakpoint(address)?;

        let label = self.label_for(address, None);
        let entry = BreakpointEntry {
            info: BreakpointInfo::new(BreakpointKind::Plain, Some(address), label),
            handler: Handler::Callback(Rc::new(callback)),
            backend_id: None,
        };
        let id = self.breakpoints.insert(entry);
        self.breakpoints.bind(id, address, backend_id);
        info!("Breakpoint #{id} set at {address}");
        Ok(id)
    }

    /// Arm a monitor described by `spec` at `location`.
    ///
    /// ## Errors
    ///
    /// - `AddressResolution` when the location cannot be resolved
    /// - `InvalidArgument` when the spec does not compile
    /// - `MonitorCollision` when a monitor already watches the address and
    ///   `override_existing` is not set
    pub fn monitor(&mut self, location: impl Into<Location>, spec: MonitorSpec) -> Result<BreakpointId>
    {
        self.ensure_attached()?;
        let plan = MonitorPlan::compile(&spec)?;
        let address = self.resolve_location(location.into())?;
        let replaced = self.monitor_to_replace(address, None, spec.override_existing)?;

        let backend_id = self.backend.set_breakpoint(address)?;
        let label = self.label_for(address, spec.name.as_deref());
        let entry = Self::monitor_entry(Some(address), label, spec, plan);
        let id = self.breakpoints.insert(entry);
        self.breakpoints.bind(id, address, backend_id);
        info!("Monitor #{id} armed at {address}");
        if let Some(old) = replaced {
            self.retire_monitor(old, id);
        }
        Ok(id)
    }

    /// Create a monitor on `name` that is armed once an image whose path
    /// contains `module` loads.
    ///
    /// If such an image is already loaded the monitor is armed immediately;
    /// otherwise it stays pending until the matching `ModuleLoaded` event.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when the spec does not compile or the name or module
    /// is empty.
    pub fn monitor_deferred(&mut self, name: &str, module: &str, spec: MonitorSpec) -> Result<BreakpointId>
    {
        self.ensure_attached()?;
        if name.is_empty() || module.is_empty() {
            return Err(BurrowError::InvalidArgument("deferred monitors need a name and a module".to_string()));
        }
        let plan = MonitorPlan::compile(&spec)?;
        let label = spec.name.clone().unwrap_or_else(|| name.to_string());
        let mut entry = Self::monitor_entry(None, label, spec, plan);
        entry.info.deferred = Some(DeferredTarget { name: name.to_string(), module: module.to_string() });
        let id = self.breakpoints.insert(entry);
        debug!("Monitor #{id} pending on {name} in {module}");

        let loaded = self.images()?.iter().any(|image| image.name_matches(module));
        if loaded {
            if let Err(err) = self.arm_pending(id) {
                if err.is_fatal() {
                    return Err(err);
                }
                warn!("Monitor #{id} stays pending: {err}");
            }
        }
        Ok(id)
    }

    /// Remove breakpoint `id`. Guarded breakpoints are kept unless
    /// `remove_guarded` is set; the return value says whether it was removed.
    ///
    /// ## Errors
    ///
    /// `BreakpointIdNotFound` for unknown ids, `Backend` when the trap cannot be
    /// removed.
    pub fn remove_breakpoint(&mut self, id: BreakpointId, remove_guarded: bool) -> Result<bool>
    {
        self.ensure_attached()?;
        let entry = self.breakpoints.get(id).ok_or(BurrowError::BreakpointIdNotFound(id.raw()))?;
        if entry.info.guarded && !remove_guarded {
            debug!("Keeping guarded breakpoint #{id}");
            return Ok(false);
        }
        if let Some(backend_id) = entry.backend_id {
            self.backend.remove_breakpoint(backend_id)?;
        }
        self.breakpoints.remove(id);
        info!("Breakpoint #{id} removed");
        Ok(true)
    }

    /// Remove every breakpoint (guarded ones only with `remove_guarded`).
    /// Returns the number removed.
    ///
    /// ## Errors
    ///
    /// `Backend` when a trap cannot be removed; breakpoints removed before the
    /// failure stay removed.
    pub fn remove_all_breakpoints(&mut self, remove_guarded: bool) -> Result<usize>
    {
        let mut removed = 0;
        for id in self.breakpoints.ids() {
            if self.remove_breakpoint(id, remove_guarded)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Enable or disable breakpoint `id`. Disabling removes the backend trap
    /// but keeps the id, configuration and hit count.
    ///
    /// ## Errors
    ///
    /// `BreakpointIdNotFound` for unknown ids, `Backend` when the trap cannot be
    /// installed or removed.
    pub fn set_breakpoint_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<()>
    {
        self.ensure_attached()?;
        let entry = self.breakpoints.get(id).ok_or(BurrowError::BreakpointIdNotFound(id.raw()))?;
        if entry.info.enabled == enabled {
            return Ok(());
        }
        let address = entry.info.address;
        let pending = entry.info.state == BreakpointState::Pending;
        let installed = entry.backend_id;

        if enabled {
            if let (Some(address), false) = (address, pending) {
                let backend_id = self.backend.set_breakpoint(address)?;
                self.breakpoints.bind(id, address, backend_id);
            }
        } else if let Some(backend_id) = installed {
            self.backend.remove_breakpoint(backend_id)?;
            self.breakpoints.unbind(id);
            self.breakpoints.set_state(id, BreakpointState::Disabled);
        } else if !pending {
            self.breakpoints.set_state(id, BreakpointState::Disabled);
        }

        if let Some(entry) = self.breakpoints.get_mut(id) {
            entry.info.enabled = enabled;
        }
        debug!("Breakpoint #{id} {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Snapshot of breakpoint `id`.
    ///
    /// ## Errors
    ///
    /// `BreakpointIdNotFound` for unknown ids.
    pub fn breakpoint(&self, id: BreakpointId) -> Result<BreakpointInfo>
    {
        self.breakpoints
            .get(id)
            .map(|entry| entry.info.clone())
            .ok_or(BurrowError::BreakpointIdNotFound(id.raw()))
    }

    /// Snapshots of all breakpoints, ordered by id.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<BreakpointInfo>
    {
        self.breakpoints.list()
    }

    /// Number of breakpoints currently backed by a backend trap.
    #[must_use]
    pub fn armed_breakpoints(&self) -> usize
    {
        self.breakpoints.armed_count()
    }

    /// Process one backend event on the controlling thread.
    ///
    /// Breakpoint hits run their handler to completion before this returns.
    ///
    /// ## Errors
    ///
    /// Only session-ending errors are returned; handler failures end up in the
    /// hit report.
    pub fn handle_event(&mut self, event: BackendEvent) -> Result<EventOutcome>
    {
        debug!("{}", event.describe());
        match event {
            BackendEvent::BreakpointHit { breakpoint, thread } => self.dispatch_hit(breakpoint, thread),
            BackendEvent::ModuleLoaded { path } => {
                let path = path.to_string_lossy().into_owned();
                let mut armed = Vec::new();
                for id in self.breakpoints.pending_for(&path) {
                    let enabled = self.breakpoints.get(id).is_some_and(|entry| entry.info.enabled);
                    if !enabled {
                        continue;
                    }
                    match self.arm_pending(id) {
                        Ok(()) => armed.push(id),
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => warn!("Pending monitor #{id} not armed after loading {path}: {err}"),
                    }
                }
                Ok(EventOutcome::Armed(armed))
            }
            BackendEvent::Exited { code } => {
                self.invalidate(&format!("target exited with code {code}"));
                Ok(EventOutcome::Invalidated)
            }
            BackendEvent::Detached => {
                self.invalidate("backend detached");
                Ok(EventOutcome::Invalidated)
            }
        }
    }

    /// Drain every event currently queued on `receiver`.
    ///
    /// Stops early once the session is invalidated.
    ///
    /// ## Errors
    ///
    /// As [`Client::handle_event`].
    pub fn pump_events(&mut self, receiver: &BackendEventReceiver) -> Result<Vec<EventOutcome>>
    {
        let mut outcomes = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    let outcome = self.handle_event(event)?;
                    let done = matches!(outcome, EventOutcome::Invalidated);
                    outcomes.push(outcome);
                    if done {
                        break;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        Ok(outcomes)
    }

    fn dispatch_hit(&mut self, backend_id: BackendBreakpointId, thread: ThreadId) -> Result<EventOutcome>
    {
        self.ensure_attached()?;
        let Some((info, handler)) = self.breakpoints.record_hit(backend_id) else {
            debug!("Ignoring hit on unknown or disabled trap {backend_id}");
            return Ok(EventOutcome::Ignored);
        };

        let context = HitContext {
            breakpoint: info.id,
            address: info.address.unwrap_or(Address::ZERO),
            thread,
            hit_count: info.hit_count,
            label: info.label.clone(),
        };
        if let Err(err) = self.backend.select_thread(thread) {
            warn!("Could not select thread {thread} for breakpoint #{}: {err}", info.id);
        }
        self.hit_thread = Some(thread);

        let result = match handler {
            Handler::Monitor(plan) => plan.run(self, &context),
            Handler::Callback(callback) => self.run_callback(callback.as_ref(), &context),
        };
        self.hit_thread = None;
        let report = result?;

        let state = match report.outcome {
            HitOutcome::Resumed => BreakpointState::Armed,
            HitOutcome::Stopped => BreakpointState::Stopped,
        };
        if let Some(entry) = self.breakpoints.get_mut(info.id) {
            if entry.info.state == BreakpointState::Evaluating {
                entry.info.state = state;
            }
        }
        Ok(EventOutcome::Hit(report))
    }

    fn run_callback(
        &mut self,
        callback: &dyn Fn(&mut Client, &HitContext) -> Result<()>,
        context: &HitContext,
    ) -> Result<HitReport>
    {
        let mut report = HitReport::new(context);
        if let Err(err) = callback(self, context) {
            if err.is_fatal() {
                return Err(err);
            }
            report.record_failure("callback", &err);
        }
        report.outcome = match self.process_state() {
            ProcessState::Running => HitOutcome::Resumed,
            _ => HitOutcome::Stopped,
        };
        info!("{report}");
        Ok(report)
    }

    /// Resolve and install a pending monitor.
    fn arm_pending(&mut self, id: BreakpointId) -> Result<()>
    {
        let entry = self.breakpoints.get(id).ok_or(BurrowError::BreakpointIdNotFound(id.raw()))?;
        let Some(target) = entry.info.deferred.clone() else {
            return Ok(());
        };
        let override_existing = entry.info.spec.as_ref().is_some_and(|spec| spec.override_existing);

        let qualified = format!("{}{{{}}}", target.name, target.module);
        let address = self.resolve_location(Location::Name(qualified))?;
        let replaced = self.monitor_to_replace(address, Some(id), override_existing)?;

        let backend_id = self.backend.set_breakpoint(address)?;
        self.breakpoints.bind(id, address, backend_id);
        info!("Pending monitor #{id} armed at {address} ({} in {})", target.name, target.module);
        if let Some(old) = replaced {
            self.retire_monitor(old, id);
        }
        Ok(())
    }

    /// The monitor a new one at `address` would replace, if any.
    ///
    /// Nothing is removed here; the old monitor stays armed until the new trap
    /// is installed.
    fn monitor_to_replace(&self, address: Address, claimant: Option<BreakpointId>, override_existing: bool)
        -> Result<Option<BreakpointId>>
    {
        let Some(existing) = self.breakpoints.monitor_at(address) else {
            return Ok(None);
        };
        if Some(existing) == claimant {
            return Ok(None);
        }
        if !override_existing {
            return Err(BurrowError::MonitorCollision { address, existing });
        }
        Ok(Some(existing))
    }

    /// Drop monitor `old` after `successor` took over its address. The entry
    /// is forgotten even if its trap cannot be removed, so it never runs again.
    fn retire_monitor(&mut self, old: BreakpointId, successor: BreakpointId)
    {
        info!("Monitor #{successor} replaces #{old}");
        if let Some(backend_id) = self.breakpoints.get(old).and_then(|entry| entry.backend_id) {
            if let Err(err) = self.backend.remove_breakpoint(backend_id) {
                warn!("Could not remove the trap of replaced monitor #{old}: {err}");
            }
        }
        self.breakpoints.remove(old);
    }

    fn resolve_location(&mut self, location: Location) -> Result<Address>
    {
        match location {
            Location::Address(address) if address.is_null() => {
                Err(BurrowError::AddressResolution(address.to_string()))
            }
            Location::Address(address) => Ok(address),
            Location::Name(name) => match self.resolve(&name) {
                Ok(symbol) if symbol.address().is_null() => Err(BurrowError::AddressResolution(name)),
                Ok(symbol) => Ok(symbol.address()),
                Err(BurrowError::Lookup(_)) => Err(BurrowError::AddressResolution(name)),
                Err(err) => Err(err),
            },
        }
    }

    fn label_for(&self, address: Address, name: Option<&str>) -> String
    {
        if let Some(name) = name {
            return name.to_string();
        }
        self.symbols
            .name_of(address)
            .map(str::to_string)
            .or_else(|| self.backend.symbol_name_at(address))
            .unwrap_or_else(|| address.to_string())
    }

    fn monitor_entry(address: Option<Address>, label: String, spec: MonitorSpec, plan: MonitorPlan) -> BreakpointEntry
    {
        let mut info = BreakpointInfo::new(BreakpointKind::Monitor, address, label);
        info.guarded = spec.guarded;
        info.description.clone_from(&spec.description);
        info.spec = Some(spec);
        BreakpointEntry { info, handler: Handler::Monitor(Rc::new(plan)), backend_id: None }
    }
}
