//! Reassembly of streamed responses.
//!
//! Fragments are applied strictly in arrival order. Text deltas are
//! concatenated; tool-call pieces are merged per index, with arguments
//! concatenated as raw text and left undecoded until a capability is
//! invoked. Everything after the first stop signal is ignored.

use crate::backend::{Fragment, ToolCallDelta};
use colloquy_conversation::{Content, Message, ToolCall};
use std::collections::BTreeMap;

/// What the caller should do after applying a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Keep reading. Carries the fragment's text delta, if it had one.
    Continue { text_delta: Option<String> },
    /// The stop signal was seen. Carries the stop fragment's own text delta.
    Stop { text_delta: Option<String> },
}

/// Accumulates fragments of one streamed response into a canonical message.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    text: String,
    tool_calls: BTreeMap<usize, ToolCall>,
    last_created: Option<i64>,
    stopped: bool,
}

impl StreamAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the stop signal has been applied.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Applies one fragment.
    ///
    /// Fragments arriving after the stop signal are ignored and reported as
    /// `Stop` with no delta.
    pub fn apply(&mut self, fragment: Fragment) -> Step {
        if self.stopped {
            return Step::Stop { text_delta: None };
        }
        if fragment.created.is_some() {
            self.last_created = fragment.created;
        }
        let stop = fragment.is_stop();

        let text_delta = fragment.delta.filter(|delta| !delta.is_empty());
        if let Some(delta) = &text_delta {
            self.text.push_str(delta);
        }
        for piece in fragment.tool_calls {
            self.merge(piece);
        }

        if stop {
            self.stopped = true;
            Step::Stop { text_delta }
        } else {
            Step::Continue { text_delta }
        }
    }

    fn merge(&mut self, piece: ToolCallDelta) {
        let call = self
            .tool_calls
            .entry(piece.index)
            .or_insert_with(|| ToolCall::new("", "", ""));
        if let Some(id) = piece.id {
            call.id = id;
        }
        if let Some(name) = piece.name {
            call.function.name = name;
        }
        if let Some(arguments) = piece.arguments {
            call.function.arguments.push_str(&arguments);
        }
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Builds the canonical assistant message.
    ///
    /// Content is always present, possibly empty. Tool calls are ordered by
    /// index. The timestamp is that of the last fragment that carried one.
    #[must_use]
    pub fn finish(self) -> Message {
        let mut message = Message::assistant(Content::Text(self.text));
        message.tool_calls = self.tool_calls.into_values().collect();
        message.timestamp = self.last_created;
        message
    }
}
