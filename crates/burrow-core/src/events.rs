//! Backend event types and helpers.
//!
//! Backends observe the target asynchronously (a process listener thread, an
//! LLDB event loop). They publish what they see as [`BackendEvent`]s, either by
//! calling [`crate::Client::handle_event`] directly or through the channel
//! returned by [`event_channel`], which the controlling thread drains with
//! [`crate::Client::pump_events`]. Either way every event is processed on the
//! controlling thread, one at a time.

use std::path::PathBuf;
use std::sync::mpsc;

use crate::backend::BackendBreakpointId;
use crate::breakpoints::{BreakpointId, HitReport};
use crate::types::ThreadId;

/// Event emitted by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent
{
    /// A trap installed through `set_breakpoint` fired. The target is stopped.
    BreakpointHit
    {
        /// Trap that fired.
        breakpoint: BackendBreakpointId,
        /// Thread that hit it.
        thread: ThreadId,
    },
    /// An image was loaded into the target.
    ModuleLoaded
    {
        /// Path of the new image.
        path: PathBuf,
    },
    /// The target exited.
    Exited
    {
        /// Exit status.
        code: i32,
    },
    /// The backend lost the target.
    Detached,
}

impl BackendEvent
{
    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::BreakpointHit { breakpoint, thread } => {
                format!("Breakpoint {breakpoint} hit on thread {thread}")
            }
            Self::ModuleLoaded { path } => format!("Loaded {}", path.display()),
            Self::Exited { code } => format!("Process exited with code: {code}"),
            Self::Detached => "Backend detached from the target".to_string(),
        }
    }

    /// Whether the event ends the session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool
    {
        matches!(self, Self::Exited { .. } | Self::Detached)
    }
}

/// What the client did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome
{
    /// A breakpoint handler ran.
    Hit(HitReport),
    /// Pending monitors armed after a module load (possibly none).
    Armed(Vec<BreakpointId>),
    /// The session ended.
    Invalidated,
    /// The event did not concern any known breakpoint.
    Ignored,
}

/// Sender side of the backend event channel.
pub type BackendEventSender = mpsc::Sender<BackendEvent>;
/// Receiver side of the backend event channel.
pub type BackendEventReceiver = mpsc::Receiver<BackendEvent>;

/// Create a new backend event channel.
#[must_use]
pub fn event_channel() -> (BackendEventSender, BackendEventReceiver)
{
    mpsc::channel()
}
