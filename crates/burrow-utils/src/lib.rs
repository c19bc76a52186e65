//! # Burrow Utilities
//!
//! Shared helpers for the burrow workspace. Today that is the `tracing`
//! subscriber setup used by anything that embeds a burrow client.

pub mod logging;

pub use logging::{
    init_logging, init_logging_with_level, init_logging_with_options, init_test_logging, LogFormat, LogLevel,
    LoggingError, LoggingGuard, LoggingOptions,
};
pub use tracing::{debug, error, info, trace, warn};
