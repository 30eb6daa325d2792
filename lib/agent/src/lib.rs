//! Tool-calling agents for colloquy.
//!
//! An [`Agent`] owns a conversation history, talks to a language model
//! through an [`LlmTransport`](colloquy_ai::LlmTransport), and dispatches the
//! capability calls the model makes until it produces a final answer.
//!
//! Concurrent work on one conversation goes through [`SharedAgent`], which
//! runs each operation on a private [`Draft`] and merges its additions back
//! only when the operation succeeds.

pub mod agent;
pub mod config;
pub mod error;
pub mod guard;
pub mod observer;

pub use agent::{Agent, ResponseMode, TurnInput};
pub use config::{AgentConfig, ToolFailurePolicy};
pub use error::AgentError;
pub use guard::{Draft, SharedAgent};
pub use observer::{FnObserver, Observer, ObserverRegistry, ObserverToken, Observers};
