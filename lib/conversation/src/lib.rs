//! Conversation state for colloquy agents.
//!
//! This crate provides:
//!
//! - **Messages**: roles, content, tool calls and tool results
//! - **Conversation Store**: ordered history with stable message identity
//! - **Lifecycle**: age-based pruning and folding of stale tool output
//! - **Capability Registry**: the tools a model may call, including ones
//!   advertised by discovery sources

pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod store;
pub mod tool;

pub use discovery::CapabilityDiscovery;
pub use error::{ConversationError, DiscoveryError, ToolError};
pub use lifecycle::FOLDED_PLACEHOLDER;
pub use message::{
    Content, ContentPart, FunctionCall, ImageUrl, Message, MessageRole, ToolCall, ToolCallKind,
};
pub use store::{ConversationStore, Entry, MessageSeq};
pub use tool::{Capability, CapabilityDefinition, CapabilityRegistry, FunctionCapability};
