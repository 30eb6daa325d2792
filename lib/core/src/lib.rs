//! Shared foundation for the colloquy agent crates.
//!
//! This crate only carries what every other crate needs: the rootcause-backed
//! `Result` alias and the strongly-typed ids used to correlate log output
//! across a conversation.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConversationId, ParseIdError, TurnId};
