//! Error types for the agent crate.
//!
//! `AgentError` is the context every report returned by the agent carries.
//! The lower-level report (transport, tool or persistence) stays attached as
//! the cause.

use std::fmt;

/// Errors that abort a turn or an agent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The LLM transport failed.
    Transport,
    /// The model asked for a capability that is not registered.
    UnknownTool { tool_name: String, call_id: String },
    /// A capability failed, including when its arguments could not be decoded.
    ToolExecutionFailed { tool_name: String, call_id: String },
    /// The model kept calling tools past the configured limit.
    TooManyToolRounds { max: u32 },
    /// Saving or loading the history failed.
    Persistence,
    /// A capability discovery source failed.
    Discovery,
    /// Configuration could not be loaded.
    Config { reason: String },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "LLM transport failed"),
            Self::UnknownTool { tool_name, call_id } => {
                write!(f, "model called unknown tool '{tool_name}' (call {call_id})")
            }
            Self::ToolExecutionFailed { tool_name, call_id } => {
                write!(f, "tool '{tool_name}' failed (call {call_id})")
            }
            Self::TooManyToolRounds { max } => {
                write!(f, "model requested tools for more than {max} rounds")
            }
            Self::Persistence => write!(f, "conversation persistence failed"),
            Self::Discovery => write!(f, "capability discovery failed"),
            Self::Config { reason } => write!(f, "invalid agent configuration: {reason}"),
        }
    }
}

impl std::error::Error for AgentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_name_the_call() {
        let err = AgentError::ToolExecutionFailed {
            tool_name: "get_time".to_string(),
            call_id: "c1".to_string(),
        };
        assert!(err.to_string().contains("get_time"));
        assert!(err.to_string().contains("c1"));
    }

    #[test]
    fn round_limit_display() {
        let err = AgentError::TooManyToolRounds { max: 3 };
        assert!(err.to_string().contains('3'));
    }
}
