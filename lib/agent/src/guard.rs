//! Private copies and merge-back.
//!
//! A [`Draft`] is a deep copy of an agent's history that shares its
//! transport, registry and observers. Work done on the draft becomes
//! visible in the original only when the draft is merged, and only the
//! messages the draft appended are merged. Message identity is the
//! sequence number assigned at append time, so two messages with equal
//! content are never mistaken for one another.

use crate::agent::{Agent, TurnInput};
use crate::error::AgentError;
use colloquy_conversation::{Content, Message, MessageSeq};
use colloquy_core::Result;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A private copy of an agent.
///
/// Dropping a draft without merging it discards its work.
#[derive(Debug)]
pub struct Draft {
    agent: Agent,
    base: HashSet<MessageSeq>,
}

impl Draft {
    /// Messages appended since the copy was taken, in order.
    pub fn added(&self) -> impl Iterator<Item = &Message> {
        self.agent.store.added_since(&self.base)
    }
}

impl Deref for Draft {
    type Target = Agent;

    fn deref(&self) -> &Agent {
        &self.agent
    }
}

impl DerefMut for Draft {
    fn deref_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }
}

impl Agent {
    /// Takes a private copy.
    ///
    /// Expired messages are pruned from this agent first, so the copy never
    /// starts with messages the original would already have dropped.
    pub fn fork(&mut self) -> Draft {
        self.expire_messages();
        Draft {
            base: self.store.seqs(),
            agent: Agent {
                id: self.id,
                config: Arc::clone(&self.config),
                transport: Arc::clone(&self.transport),
                registry: Arc::clone(&self.registry),
                store: self.store.clone(),
                observers: self.observers.clone(),
            },
        }
    }

    /// Appends the messages `draft` added, in the order it added them.
    ///
    /// Returns the number of messages merged. Messages the draft removed or
    /// rewrote are left as they are here.
    pub fn merge(&mut self, draft: Draft) -> usize {
        let added: Vec<Message> = draft.added().cloned().collect();
        let count = added.len();
        for message in added {
            self.store.push(message);
        }
        debug!(conversation = %self.id, merged = count, "merged draft");
        count
    }
}

/// An agent shared between tasks.
///
/// The lock is held only while copying and while merging, never across a
/// model request, so concurrent operations each work on their own draft
/// and their additions are appended to the shared history as they finish.
#[derive(Debug, Clone)]
pub struct SharedAgent {
    inner: Arc<Mutex<Agent>>,
}

impl SharedAgent {
    #[must_use]
    pub fn new(agent: Agent) -> Self {
        Self {
            inner: Arc::new(Mutex::new(agent)),
        }
    }

    /// Locks the agent for direct access.
    pub async fn lock(&self) -> MutexGuard<'_, Agent> {
        self.inner.lock().await
    }

    /// Takes a private copy.
    pub async fn fork(&self) -> Draft {
        self.inner.lock().await.fork()
    }

    /// Merges a draft back.
    pub async fn merge(&self, draft: Draft) -> usize {
        self.inner.lock().await.merge(draft)
    }

    /// Runs `operation` on a private copy and merges the copy's additions
    /// when it succeeds.
    ///
    /// If the operation fails, or its future is dropped before completing,
    /// nothing is merged.
    ///
    /// # Errors
    ///
    /// Returns whatever `operation` returns.
    pub async fn safe_modify<T, F>(&self, operation: F) -> Result<T, AgentError>
    where
        F: for<'a> FnOnce(&'a mut Draft) -> BoxFuture<'a, Result<T, AgentError>>,
    {
        let mut draft = self.fork().await;
        let value = operation(&mut draft).await?;
        self.merge(draft).await;
        Ok(value)
    }

    /// Runs one turn on a private copy and merges it on success.
    ///
    /// # Errors
    ///
    /// Same as [`Agent::run`].
    pub async fn run(
        &self,
        input: impl Into<TurnInput> + Send + 'static,
    ) -> Result<Option<Content>, AgentError> {
        let input = input.into();
        self.safe_modify(move |draft| Box::pin(draft.run(input))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use colloquy_ai::{Completion, LlmTransport, ScriptedTransport, TransportError};
    use colloquy_conversation::MessageRole;

    fn answer(text: &str) -> Completion {
        Completion::new(Message::assistant(text), 1)
    }

    fn agent(transport: ScriptedTransport) -> Agent {
        Agent::new(
            AgentConfig::new("m").with_instructions("S"),
            Arc::new(transport) as Arc<dyn LlmTransport>,
        )
    }

    fn texts(agent: &Agent) -> Vec<String> {
        agent
            .store()
            .messages()
            .map(|m| m.text().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn merge_appends_only_new_messages() {
        let mut agent = agent(
            ScriptedTransport::new()
                .respond(answer("A1"))
                .respond(answer("A2")),
        );
        agent.store_mut().push(Message::user("U1"));

        let mut draft = agent.fork();
        draft
            .respond(crate::agent::ResponseMode::Direct)
            .await
            .expect("A1");
        draft.run("U2").await.expect("A2");
        assert_eq!(texts(&agent), vec!["S", "U1"]);

        let merged = agent.merge(draft);

        assert_eq!(merged, 3);
        assert_eq!(texts(&agent), vec!["S", "U1", "A1", "U2", "A2"]);
    }

    #[tokio::test]
    async fn identical_content_is_not_mistaken_for_existing() {
        let mut agent = agent(ScriptedTransport::new());
        agent.store_mut().push(Message::user("hi"));

        let mut draft = agent.fork();
        draft.store_mut().push(Message::user("hi"));

        assert_eq!(agent.merge(draft), 1);
        assert_eq!(texts(&agent), vec!["S", "hi", "hi"]);
    }

    #[tokio::test]
    async fn dropped_draft_changes_nothing() {
        let mut agent = agent(ScriptedTransport::new().respond(answer("A1")));
        {
            let mut draft = agent.fork();
            draft.run("U1").await.expect("turn");
            assert_eq!(draft.added().count(), 2);
        }
        assert_eq!(agent.store().len(), 1);
    }

    #[tokio::test]
    async fn fork_prunes_expired_messages_first() {
        let mut agent = Agent::new(
            AgentConfig::new("m").with_message_expiry(60),
            Arc::new(ScriptedTransport::new()) as Arc<dyn LlmTransport>,
        );
        agent
            .store_mut()
            .push(Message::user("ancient").with_timestamp(0));

        let draft = agent.fork();

        assert_eq!(agent.store().len(), 1);
        assert_eq!(draft.store().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_operations_both_land() {
        let shared = SharedAgent::new(agent(
            ScriptedTransport::new()
                .respond(answer("first answer"))
                .respond(answer("second answer")),
        ));

        let mut first = shared.fork().await;
        let mut second = shared.fork().await;
        first.run("first question").await.expect("first");
        second.run("second question").await.expect("second");
        shared.merge(second).await;
        shared.merge(first).await;

        let agent = shared.lock().await;
        assert_eq!(
            texts(&agent),
            vec![
                "S",
                "second question",
                "second answer",
                "first question",
                "first answer"
            ]
        );
    }

    #[tokio::test]
    async fn safe_modify_merges_on_success_only() {
        let shared = SharedAgent::new(agent(
            ScriptedTransport::new()
                .respond(answer("ok"))
                .fail(TransportError::Unavailable {
                    reason: "down".to_string(),
                }),
        ));

        let content = shared.run("one").await.expect("first turn");
        assert_eq!(content.as_ref().and_then(Content::as_text), Some("ok"));

        let err = shared.run("two").await.unwrap_err();
        assert_eq!(err.current_context(), &AgentError::Transport);

        let agent = shared.lock().await;
        assert_eq!(texts(&agent), vec!["S", "one", "ok"]);
        assert_eq!(agent.store().last().role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn safe_modify_returns_the_operation_value() {
        let shared = SharedAgent::new(agent(ScriptedTransport::new()));

        let count = shared
            .safe_modify(|draft| {
                Box::pin(async move {
                    draft.store_mut().push(Message::user("noted"));
                    Ok(draft.added().count())
                })
            })
            .await
            .expect("modify");

        assert_eq!(count, 1);
        assert_eq!(shared.lock().await.store().len(), 2);
    }
}
