//! The conversation store.
//!
//! An ordered message history whose first entry is always the system
//! message. Every appended message receives a [`MessageSeq`] that is unique
//! within the store's lineage: copies continue from the same counter, so a
//! copy's new messages can be told apart from the ones it inherited even when
//! their contents are identical.

use crate::error::ConversationError;
use crate::message::{Content, Message, MessageRole};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Stable identity of a message within a store lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageSeq(u64);

impl MessageSeq {
    /// Returns the raw sequence number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A stored message and its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Identity assigned on append.
    pub seq: MessageSeq,
    /// The message.
    pub message: Message,
}

/// Ordered, timestamped conversation history.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl ConversationStore {
    /// Creates a store holding only the system message.
    #[must_use]
    pub fn new(instructions: impl Into<String>) -> Self {
        let mut store = Self {
            entries: Vec::new(),
            next_seq: 0,
        };
        store.push_entry(Message::system(instructions));
        store
    }

    /// Builds a store from an exported history.
    ///
    /// # Errors
    ///
    /// Returns `MissingSystemMessage` if the first message is not a system
    /// message.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, Report<ConversationError>> {
        if messages.first().map(|m| m.role) != Some(MessageRole::System) {
            return Err(ConversationError::MissingSystemMessage.into());
        }
        let mut store = Self {
            entries: Vec::with_capacity(messages.len()),
            next_seq: 0,
        };
        for message in messages {
            store.push_entry(message);
        }
        Ok(store)
    }

    fn push_entry(&mut self, message: Message) -> MessageSeq {
        let seq = MessageSeq(self.next_seq);
        self.next_seq += 1;
        self.entries.push(Entry { seq, message });
        seq
    }

    /// Appends a message and returns its identity.
    ///
    /// System messages are not accepted past index 0; use
    /// [`set_instructions`](Self::set_instructions) to change the system
    /// message instead.
    pub fn push(&mut self, message: Message) -> MessageSeq {
        debug_assert!(
            message.role != MessageRole::System,
            "the system message lives at index 0 only"
        );
        self.push_entry(message)
    }

    /// The system message.
    #[must_use]
    pub fn system(&self) -> &Message {
        &self.entries[0].message
    }

    /// Replaces the system message's content.
    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.entries[0].message.content = Some(Content::Text(instructions.into()));
    }

    /// All messages in conversation order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    /// All entries in conversation order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Message at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.entries.get(index).map(|entry| &entry.message)
    }

    /// The most recent message.
    #[must_use]
    pub fn last(&self) -> &Message {
        // Never empty: index 0 is the system message.
        &self.entries[self.entries.len() - 1].message
    }

    /// Number of messages, including the system message.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when only the system message is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Drops every message except the system message.
    pub fn clear(&mut self) {
        self.entries.truncate(1);
    }

    /// Identities of every message currently held.
    #[must_use]
    pub fn seqs(&self) -> HashSet<MessageSeq> {
        self.entries.iter().map(|entry| entry.seq).collect()
    }

    /// Messages whose identity is not in `known`, in order.
    pub fn added_since<'a>(
        &'a self,
        known: &'a HashSet<MessageSeq>,
    ) -> impl Iterator<Item = &'a Message> + 'a {
        self.entries
            .iter()
            .filter(move |entry| !known.contains(&entry.seq))
            .map(|entry| &entry.message)
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<Entry> {
        &mut self.entries
    }

    /// Exports the history as plain messages.
    #[must_use]
    pub fn export(&self) -> Vec<Message> {
        self.messages().cloned().collect()
    }

    /// Encodes the history as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String, Report<ConversationError>> {
        let messages: Vec<&Message> = self.messages().collect();
        serde_json::to_string_pretty(&messages).map_err(|e| {
            ConversationError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Decodes a history previously produced by [`to_json`](Self::to_json).
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for invalid JSON and `MissingSystemMessage`
    /// when the history does not start with the system message.
    pub fn from_json(json: &str) -> Result<Self, Report<ConversationError>> {
        let messages: Vec<Message> =
            serde_json::from_str(json).map_err(|e| ConversationError::Serialization {
                reason: e.to_string(),
            })?;
        Self::from_messages(messages)
    }

    /// Writes the history to a file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), Report<ConversationError>> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| ConversationError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Reads a history file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, or any error of
    /// [`from_json`](Self::from_json).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, Report<ConversationError>> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConversationError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    fn sample_store() -> ConversationStore {
        let mut store = ConversationStore::new("You are terse.");
        store.push(Message::user("hi").with_name("ada").with_timestamp(100));
        store.push(
            Message::assistant_tool_calls(vec![ToolCall::new("c1", "get_time", "{}")])
                .with_timestamp(101),
        );
        store.push(Message::tool_result("c1", "noon").with_timestamp(101));
        store.push(Message::assistant("It is noon.").with_timestamp(102));
        store
    }

    #[test]
    fn new_store_holds_only_system() {
        let store = ConversationStore::new("sys");
        assert_eq!(store.len(), 1);
        assert!(store.is_empty());
        assert_eq!(store.system().role, MessageRole::System);
        assert_eq!(store.system().timestamp, None);
    }

    #[test]
    fn seqs_are_unique_for_identical_messages() {
        let mut store = ConversationStore::new("sys");
        let a = store.push(Message::user("same"));
        let b = store.push(Message::user("same"));
        assert_ne!(a, b);
        assert_eq!(store.seqs().len(), 3);
    }

    #[test]
    fn clones_continue_the_sequence() {
        let mut store = ConversationStore::new("sys");
        store.push(Message::user("u1"));
        let known = store.seqs();

        let mut copy = store.clone();
        copy.push(Message::assistant("a1"));

        let added: Vec<_> = copy.added_since(&known).collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].text(), Some("a1"));
    }

    #[test]
    fn export_import_roundtrip() {
        let store = sample_store();
        let json = store.to_json().expect("encode");
        let restored = ConversationStore::from_json(&json).expect("decode");
        assert_eq!(restored.export(), store.export());
    }

    #[test]
    fn import_requires_system_first() {
        let err = ConversationStore::from_messages(vec![Message::user("hi")]).unwrap_err();
        assert_eq!(err.current_context(), &ConversationError::MissingSystemMessage);
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");

        let store = sample_store();
        store.save_to_path(&path).expect("save");
        let restored = ConversationStore::load_from_path(&path).expect("load");

        assert_eq!(restored.export(), store.export());
    }

    #[test]
    fn load_missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.json");
        let err = ConversationStore::load_from_path(&path).unwrap_err();
        assert!(matches!(err.current_context(), ConversationError::Io { .. }));
    }

    #[test]
    fn clear_keeps_system_and_instructions_can_change() {
        let mut store = sample_store();
        store.clear();
        store.set_instructions("You are verbose.");
        assert_eq!(store.len(), 1);
        assert_eq!(store.system().text(), Some("You are verbose."));
    }
}
