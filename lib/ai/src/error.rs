//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `TransportError`: anything that goes wrong between the agent and the
//!   language-model service, including a broken fragment stream

use std::fmt;

/// Errors from the LLM transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The service could not be reached.
    Unavailable { reason: String },
    /// The service rejected or failed the request.
    RequestFailed { reason: String },
    /// A fragment stream broke before its stop signal.
    StreamInterrupted { reason: String },
    /// The response could not be interpreted.
    InvalidResponse { reason: String },
    /// A scripted transport ran out of responses.
    ScriptExhausted,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "LLM service unavailable: {reason}"),
            Self::RequestFailed { reason } => write!(f, "LLM request failed: {reason}"),
            Self::StreamInterrupted { reason } => {
                write!(f, "LLM response stream interrupted: {reason}")
            }
            Self::InvalidResponse { reason } => {
                write!(f, "failed to interpret LLM response: {reason}")
            }
            Self::ScriptExhausted => write!(f, "scripted transport has no responses left"),
        }
    }
}

impl std::error::Error for TransportError {}
