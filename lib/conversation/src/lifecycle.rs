//! Message lifecycle: age-based pruning and folding of stale tool output.

use crate::message::{Content, MessageRole};
use crate::store::ConversationStore;
use chrono::{TimeDelta, Utc};

/// Content that replaces a folded tool result.
pub const FOLDED_PLACEHOLDER: &str = "The result has been folded";

impl ConversationStore {
    /// Removes messages older than `max_age`, measured against the wall clock.
    ///
    /// Returns the number of messages removed.
    pub fn prune_expired(&mut self, max_age: TimeDelta) -> usize {
        self.prune_expired_at(Utc::now().timestamp(), max_age)
    }

    /// Removes every non-system message whose timestamp is more than
    /// `max_age` before `now`. Messages without a timestamp are kept. Ages
    /// too large to represent count as expired.
    ///
    /// Returns the number of messages removed.
    pub fn prune_expired_at(&mut self, now: i64, max_age: TimeDelta) -> usize {
        let max_age = max_age.num_seconds();
        let entries = self.entries_mut();
        let before = entries.len();
        let mut index = 0;
        entries.retain(|entry| {
            let keep = index == 0
                || entry
                    .message
                    .timestamp
                    .is_none_or(|timestamp| now.saturating_sub(timestamp) <= max_age);
            index += 1;
            keep
        });
        before - entries.len()
    }

    /// Replaces the content of answered tool calls whose capability is
    /// foldable with [`FOLDED_PLACEHOLDER`].
    ///
    /// For each assistant tool call, the first later tool message answering
    /// it is folded. Role, `tool_call_id` and timestamp are kept, so the
    /// model still sees that the call happened and was answered. Running
    /// this twice in a row changes nothing the second time.
    ///
    /// Returns the number of tool messages whose content changed.
    pub fn fold_stale_tool_results(&mut self, is_foldable: impl Fn(&str) -> bool) -> usize {
        let entries = self.entries_mut();
        let mut folded = 0;

        for index in 0..entries.len() {
            if entries[index].message.role != MessageRole::Assistant {
                continue;
            }
            let call_ids: Vec<String> = entries[index]
                .message
                .tool_calls
                .iter()
                .filter(|call| is_foldable(call.name()))
                .map(|call| call.id.clone())
                .collect();

            for call_id in call_ids {
                let answer = entries[index + 1..].iter_mut().find(|entry| {
                    entry.message.role == MessageRole::Tool
                        && entry.message.tool_call_id.as_deref() == Some(call_id.as_str())
                });
                let Some(answer) = answer else { continue };
                if answer.message.text() != Some(FOLDED_PLACEHOLDER) {
                    answer.message.content = Some(Content::Text(FOLDED_PLACEHOLDER.to_string()));
                    folded += 1;
                }
            }
        }

        folded
    }
}
