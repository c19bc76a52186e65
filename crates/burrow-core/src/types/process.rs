//! Thread, architecture and process-state types.

use std::fmt;

/// Thread identifier
///
/// Opaque backend-assigned identifier. The exact meaning depends on the
/// backend (an LLDB thread index id, a Mach thread port, a Linux TID), so the
/// client never interprets it beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    ///
    /// ```rust
    /// use burrow_core::types::ThreadId;
    ///
    /// let thread = ThreadId(12345);
    /// assert_eq!(thread.raw(), 12345);
    /// ```
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.0)
    }
}

/// Execution state of the target as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState
{
    /// The target is executing.
    Running,
    /// The target is stopped and may be inspected or called into.
    Stopped,
    /// The target exited with the given status.
    Exited(i32),
    /// The backend lost its connection to the target.
    Detached,
}

impl ProcessState
{
    /// Whether the target is stopped.
    #[must_use]
    pub const fn is_stopped(self) -> bool
    {
        matches!(self, Self::Stopped)
    }

}

/// Byte order of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness
{
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

/// CPU architecture of the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture
{
    /// 64-bit ARM without pointer authentication.
    Arm64,
    /// 64-bit ARM with pointer authentication; code pointers carry a
    /// signature in their upper bits.
    Arm64e,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// Any other architecture. The string carries the backend's name for it.
    Unknown(&'static str),
}

impl Architecture
{
    /// Name of the register that carries a function's integer return value.
    #[must_use]
    pub const fn return_register(self) -> &'static str
    {
        match self {
            Self::Arm64 | Self::Arm64e => "x0",
            Self::X86_64 => "rax",
            Self::Unknown(_) => "$arg1",
        }
    }

    /// Name of the register carrying the `index`-th (zero based) integer
    /// argument at function entry.
    #[must_use]
    pub fn argument_register(self, index: usize) -> String
    {
        const SYSV: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
        match self {
            Self::Arm64 | Self::Arm64e if index < 8 => format!("x{index}"),
            Self::X86_64 if index < SYSV.len() => SYSV[index].to_string(),
            _ => format!("$arg{}", index + 1),
        }
    }

    /// Whether code pointers carry authentication bits that must be removed
    /// before the address is usable.
    #[must_use]
    pub const fn signs_code_pointers(self) -> bool
    {
        matches!(self, Self::Arm64e)
    }

    /// Tagged-object test for this architecture: `(mask, value)` such that an
    /// object's isa word satisfies `isa & mask == value`.
    #[must_use]
    pub const fn isa_magic(self) -> Option<(u64, u64)>
    {
        match self {
            Self::Arm64 | Self::Arm64e => Some((0x0000_03f0_0000_0001, 0x0000_01a0_0000_0001)),
            Self::X86_64 => Some((0x001f_8000_0000_0001, 0x001d_8000_0000_0001)),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Arm64 => write!(f, "arm64"),
            Self::Arm64e => write!(f, "arm64e"),
            Self::X86_64 => write!(f, "x86_64"),
            Self::Unknown(name) => write!(f, "{name}"),
        }
    }
}
