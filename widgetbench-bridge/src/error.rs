//! Error types for bridge operations
//!
//! Nothing in this crate throws across the message-handling boundary: every
//! variant here ends up either as the error string of a `METHOD_RESPONSE`
//! or as the rejection of a pending call.

use std::time::Duration;

/// Error types for bridge operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge detached")]
    Detached,

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid arguments for {method}: {reason}")]
    InvalidArguments { method: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Simulated hang timed out after {}", describe_timeout(.0))]
    HangTimeout(Duration),

    #[error("Hang simulation cancelled")]
    HangCancelled,

    #[error("bridge is already attached to frame {0}")]
    AlreadyAttached(u64),

    #[error("frame closed")]
    FrameClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error string carried back by a `METHOD_RESPONSE`
    #[error("{0}")]
    Remote(String),
}

impl BridgeError {
    pub fn invalid_arguments(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Whole seconds when exact, milliseconds otherwise
pub(crate) fn describe_timeout(timeout: &Duration) -> String {
    if timeout.subsec_millis() == 0 && !timeout.is_zero() {
        let secs = timeout.as_secs();
        format!("{secs} second{}", if secs == 1 { "" } else { "s" })
    } else {
        format!("{} ms", timeout.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hang_timeout_message() {
        let whole = BridgeError::HangTimeout(Duration::from_secs(30));
        assert_eq!(whole.to_string(), "Simulated hang timed out after 30 seconds");

        let short = BridgeError::HangTimeout(Duration::from_millis(200));
        assert_eq!(short.to_string(), "Simulated hang timed out after 200 ms");

        let odd = BridgeError::HangTimeout(Duration::from_millis(1500));
        assert_eq!(odd.to_string(), "Simulated hang timed out after 1500 ms");
    }
}
