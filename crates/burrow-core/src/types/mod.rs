//! # Types
//!
//! Backend-agnostic value types shared by the client, the breakpoint engine and
//! the backend contract.

pub mod address;
pub mod image;
pub mod process;
pub mod stack;

pub use address::Address;
pub use image::ImageInfo;
pub use process::{Architecture, Endianness, ProcessState, ThreadId};
pub use stack::StackFrame;
