// Pattern persistence error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Pattern error code constants
///
/// Error code range: 4001-4003
pub struct PatternErrorCodes {}

impl PatternErrorCodes {
    /// Reading or writing the pattern file failed
    pub const IO: i32 = 4001;

    /// File contained no usable event lines
    pub const EMPTY: i32 = 4002;

    /// Loop duration is zero, negative or not finite
    pub const INVALID_DURATION: i32 = 4003;
}

/// Log a pattern error with structured context
pub fn log_pattern_error(err: &PatternError, context: &str) {
    error!(
        "Pattern error in {}: code={}, component=PatternStore, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while loading or saving symbolic patterns
///
/// Individual malformed lines are not errors; the parser skips them with a
/// warning. These variants cover the whole-file failures.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternError {
    /// Underlying filesystem failure
    Io { path: String, details: String },

    /// No event lines survived parsing and the header gives no duration
    Empty { path: String },

    /// Loop duration could not be reconstructed or is unusable
    InvalidDuration { duration: f64 },
}

impl ErrorCode for PatternError {
    fn code(&self) -> i32 {
        match self {
            PatternError::Io { .. } => PatternErrorCodes::IO,
            PatternError::Empty { .. } => PatternErrorCodes::EMPTY,
            PatternError::InvalidDuration { .. } => PatternErrorCodes::INVALID_DURATION,
        }
    }

    fn message(&self) -> String {
        match self {
            PatternError::Io { path, details } => format!("I/O error on {}: {}", path, details),
            PatternError::Empty { path } => {
                format!("No drum events or loop duration found in {}", path)
            }
            PatternError::InvalidDuration { duration } => {
                format!("Invalid loop duration: {}", duration)
            }
        }
    }
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PatternError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PatternError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_error_codes() {
        assert_eq!(
            PatternError::Io {
                path: "p".to_string(),
                details: "d".to_string()
            }
            .code(),
            4001
        );
        assert_eq!(
            PatternError::Empty {
                path: "p".to_string()
            }
            .code(),
            4002
        );
        assert_eq!(PatternError::InvalidDuration { duration: 0.0 }.code(), 4003);
    }

    #[test]
    fn test_error_code_trait_object() {
        let err: &dyn ErrorCode = &PatternError::Empty {
            path: "track_0_drums.txt".to_string(),
        };
        assert_eq!(err.code(), 4002);
        assert!(err.message().contains("track_0_drums.txt"));
    }
}
