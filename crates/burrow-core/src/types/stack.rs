//! Call-stack frames as reported by the backend.

use super::{Address, ThreadId};

/// One frame of a thread's call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame
{
    /// Owning thread.
    pub thread: ThreadId,
    /// Position in the trace, `0` being the innermost frame.
    pub index: usize,
    /// Program counter of the frame.
    pub pc: Address,
    /// Best-effort symbol name for `pc`.
    pub function: Option<String>,
}

impl StackFrame
{
    /// Create a frame without symbol information.
    #[must_use]
    pub const fn new(thread: ThreadId, index: usize, pc: Address) -> Self
    {
        Self { thread, index, pc, function: None }
    }

    /// Attach a symbol name.
    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self
    {
        self.function = Some(function.into());
        self
    }
}
