//! Error taxonomy for the design-generation engine.
//!
//! Cancellation is a first-class, benign outcome: it is never surfaced to
//! users as a failure. Malformed frames are internal only; the transport
//! skips them and keeps consuming.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CircuitForgeError {
    /// The backend endpoint refused the connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Any other network-level failure while opening or reading the stream.
    #[error("Network error: {0}")]
    Network(String),

    /// No bytes arrived within the idle bound.
    #[error("Stream idle for more than {0:?} without a terminal frame")]
    Timeout(Duration),

    /// The session was cancelled. Benign: never reported as a user error.
    #[error("Analysis cancelled")]
    Cancelled,

    /// A single malformed frame. The offending frame is skipped and the
    /// stream continues; this variant never terminates a session.
    #[error("Malformed frame: {0}")]
    Protocol(String),

    /// An explicit error frame from the backend, surfaced verbatim.
    #[error("{0}")]
    Analysis(String),
}

impl CircuitForgeError {
    /// True for errors that should never be shown to the user as a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, CircuitForgeError::Cancelled)
    }

    /// Classify a reqwest failure into the transport taxonomy.
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_connect() {
            CircuitForgeError::ConnectionRefused(e.to_string())
        } else {
            CircuitForgeError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_benign() {
        assert!(CircuitForgeError::Cancelled.is_benign());
        assert!(!CircuitForgeError::Network("boom".into()).is_benign());
        assert!(!CircuitForgeError::Analysis("backend said no".into()).is_benign());
    }

    #[test]
    fn test_analysis_message_is_verbatim() {
        let e = CircuitForgeError::Analysis("supply rail unresolvable".into());
        assert_eq!(e.to_string(), "supply rail unresolvable");
    }
}
