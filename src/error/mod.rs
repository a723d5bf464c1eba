// Error types for the looper core
//
// This module defines error types for engine control and pattern persistence,
// each carrying a stable numeric code for programmatic handling.

mod looper;
mod pattern;

pub use looper::{log_looper_error, LooperError, LooperErrorCodes};
pub use pattern::{log_pattern_error, PatternError, PatternErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the CLI and library callers.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
