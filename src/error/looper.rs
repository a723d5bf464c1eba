// Looper engine error types and constants

use crate::error::{ErrorCode, PatternError};
use log::error;
use std::fmt;

/// Looper error code constants
///
/// Error code range: 3001-3004
pub struct LooperErrorCodes {}

impl LooperErrorCodes {
    /// Requested track index does not exist
    pub const TRACK_OUT_OF_RANGE: i32 = 3001;

    /// Engine operation needs a Tokio runtime but none is active
    pub const RUNTIME_UNAVAILABLE: i32 = 3002;

    /// Configuration values cannot be used
    pub const INVALID_CONFIG: i32 = 3003;

    /// Pattern persistence failed underneath an engine operation
    pub const PATTERN: i32 = 3004;
}

/// Log a looper error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_looper_error(err: &LooperError, context: &str) {
    error!(
        "Looper error in {}: code={}, component=LooperEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors surfaced at the control-surface boundary of the engine
///
/// State misuse (stopping a track that is not recording, clearing an empty
/// track) is deliberately not represented here: those calls are no-ops.
#[derive(Debug, Clone, PartialEq)]
pub enum LooperError {
    /// Track index outside `0..track_count`
    TrackOutOfRange { index: usize, track_count: usize },

    /// No Tokio runtime is available to spawn playback tasks
    RuntimeUnavailable,

    /// Configuration rejected by validation
    InvalidConfig { reason: String },

    /// Pattern file could not be read or written
    Pattern(PatternError),
}

impl ErrorCode for LooperError {
    fn code(&self) -> i32 {
        match self {
            LooperError::TrackOutOfRange { .. } => LooperErrorCodes::TRACK_OUT_OF_RANGE,
            LooperError::RuntimeUnavailable => LooperErrorCodes::RUNTIME_UNAVAILABLE,
            LooperError::InvalidConfig { .. } => LooperErrorCodes::INVALID_CONFIG,
            LooperError::Pattern(_) => LooperErrorCodes::PATTERN,
        }
    }

    fn message(&self) -> String {
        match self {
            LooperError::TrackOutOfRange { index, track_count } => {
                format!(
                    "Track index {} out of range (engine has {} tracks)",
                    index, track_count
                )
            }
            LooperError::RuntimeUnavailable => {
                "No Tokio runtime available. Call from within a runtime context.".to_string()
            }
            LooperError::InvalidConfig { reason } => {
                format!("Invalid configuration: {}", reason)
            }
            LooperError::Pattern(err) => format!("Pattern error: {}", err.message()),
        }
    }
}

impl fmt::Display for LooperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LooperError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for LooperError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LooperError::Pattern(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PatternError> for LooperError {
    fn from(err: PatternError) -> Self {
        LooperError::Pattern(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looper_error_codes() {
        assert_eq!(
            LooperError::TrackOutOfRange {
                index: 5,
                track_count: 3
            }
            .code(),
            3001
        );
        assert_eq!(LooperError::RuntimeUnavailable.code(), 3002);
        assert_eq!(
            LooperError::InvalidConfig {
                reason: "test".to_string()
            }
            .code(),
            3003
        );
        assert_eq!(
            LooperError::Pattern(PatternError::InvalidDuration { duration: -1.0 }).code(),
            3004
        );
    }

    #[test]
    fn test_looper_error_display() {
        let err = LooperError::TrackOutOfRange {
            index: 7,
            track_count: 3,
        };
        assert!(err.message().contains("index 7"));
        assert!(err.to_string().contains("code 3001"));
    }

    #[test]
    fn test_pattern_error_conversion() {
        fn may_fail() -> Result<(), PatternError> {
            Err(PatternError::Empty {
                path: "x.txt".to_string(),
            })
        }

        fn caller() -> Result<(), LooperError> {
            may_fail()?;
            Ok(())
        }

        match caller() {
            Err(LooperError::Pattern(PatternError::Empty { path })) => assert_eq!(path, "x.txt"),
            other => panic!("Expected wrapped pattern error, got {:?}", other),
        }
    }
}
