//! Language-model plumbing for colloquy.
//!
//! This crate provides:
//!
//! - **Transport contract**: the request, response and fragment types an
//!   [`LlmTransport`] exchanges with the agent
//! - **Stream Aggregator**: reassembles a fragment stream into one canonical
//!   assistant message
//! - **Scripted Transport**: a replaying transport for tests and demos

pub mod backend;
pub mod error;
pub mod scripted;
pub mod stream;

pub use backend::{
    Completion, CompletionRequest, FinishReason, Fragment, FragmentStream, LlmTransport,
    SamplingParams, ToolCallDelta, ToolChoice,
};
pub use error::TransportError;
pub use scripted::{ScriptedReply, ScriptedTransport};
pub use stream::{Step, StreamAggregator};
