//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ConversationError`: history import/export and persistence
//! - `ToolError`: capability lookup and invocation
//! - `DiscoveryError`: capability discovery handles

use std::fmt;

/// Errors from conversation store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The imported history does not start with a system message.
    MissingSystemMessage,
    /// History could not be encoded or decoded.
    Serialization { reason: String },
    /// Reading or writing a history file failed.
    Io { path: String, reason: String },
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSystemMessage => {
                write!(f, "conversation history must start with a system message")
            }
            Self::Serialization { reason } => {
                write!(f, "conversation history serialization failed: {reason}")
            }
            Self::Io { path, reason } => {
                write!(f, "conversation history i/o failed for {path}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConversationError {}

/// Errors from tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No capability is registered under this name.
    UnknownTool { name: String },
    /// Arguments text is not a valid JSON object.
    MalformedArguments { name: String, reason: String },
    /// The capability itself failed.
    ExecutionFailed { name: String },
}

impl ToolError {
    /// Name of the tool the error is about.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::UnknownTool { name }
            | Self::MalformedArguments { name, .. }
            | Self::ExecutionFailed { name } => name,
        }
    }

    /// Returns true for failures that happened while executing a known
    /// capability, which includes argument decoding.
    #[must_use]
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedArguments { .. } | Self::ExecutionFailed { .. }
        )
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { name } => write!(f, "tool not found: {name}"),
            Self::MalformedArguments { name, reason } => {
                write!(f, "malformed arguments for tool '{name}': {reason}")
            }
            Self::ExecutionFailed { name } => write!(f, "tool '{name}' execution failed"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors from capability discovery handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The handle could not list its capabilities.
    ListFailed { source: String },
    /// A capability advertised by the handle failed to initialize.
    InitFailed { source: String, tool: String },
    /// Closing the handle failed.
    TeardownFailed { source: String },
    /// A source with this name is already connected.
    DuplicateSource { source: String },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListFailed { source } => {
                write!(f, "discovery source '{source}' failed to list capabilities")
            }
            Self::InitFailed { source, tool } => {
                write!(f, "capability '{tool}' from '{source}' failed to initialize")
            }
            Self::TeardownFailed { source } => {
                write!(f, "discovery source '{source}' failed to tear down")
            }
            Self::DuplicateSource { source } => {
                write!(f, "discovery source '{source}' is already connected")
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}
