//! Event observers.
//!
//! Observers are awaited in registration order and never fail. An agent
//! keeps three registries: completed responses, streamed text chunks, and
//! dispatched tool calls.

use async_trait::async_trait;
use colloquy_conversation::{Message, ToolCall};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Receives events of type `E`.
#[async_trait]
pub trait Observer<E: ?Sized + Sync>: Send + Sync {
    /// Handles one event.
    async fn observe(&self, event: &E);
}

type Callback<E> = Box<dyn Fn(&E) -> BoxFuture<'static, ()> + Send + Sync>;

/// An observer backed by a closure.
///
/// The closure receives a borrowed event and returns an owned future, so it
/// must copy out whatever the future needs.
pub struct FnObserver<E: ?Sized> {
    callback: Callback<E>,
}

impl<E: ?Sized + 'static> FnObserver<E> {
    /// Wraps an async closure.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(&E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            callback: Box::new(move |event: &E| -> BoxFuture<'static, ()> {
                Box::pin(callback(event))
            }),
        }
    }

    /// Wraps a synchronous closure.
    pub fn from_sync<F>(callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(move |event: &E| -> BoxFuture<'static, ()> {
                callback(event);
                Box::pin(async {})
            }),
        }
    }
}

impl<E: ?Sized> std::fmt::Debug for FnObserver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnObserver").finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: ?Sized + Sync> Observer<E> for FnObserver<E> {
    async fn observe(&self, event: &E) {
        (self.callback)(event).await;
    }
}

/// Handle returned when an observer is added; used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

/// An ordered list of observers for one kind of event.
///
/// Cloning shares the observers themselves; tokens issued before the clone
/// identify the same entries in both copies.
pub struct ObserverRegistry<E: ?Sized + Sync> {
    entries: Vec<(ObserverToken, Arc<dyn Observer<E>>)>,
    next_token: u64,
}

impl<E: ?Sized + Sync> ObserverRegistry<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_token: 0,
        }
    }

    /// Appends an observer.
    pub fn add(&mut self, observer: Arc<dyn Observer<E>>) -> ObserverToken {
        let token = ObserverToken(self.next_token);
        self.next_token += 1;
        self.entries.push((token, observer));
        token
    }

    /// Appends a closure observer.
    pub fn add_fn<F, Fut>(&mut self, callback: F) -> ObserverToken
    where
        E: 'static,
        F: Fn(&E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add(Arc::new(FnObserver::new(callback)))
    }

    /// Removes an observer. Returns false if the token is unknown.
    pub fn remove(&mut self, token: ObserverToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != token);
        self.entries.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Awaits every observer in registration order.
    pub async fn notify(&self, event: &E) {
        for (_, observer) in &self.entries {
            observer.observe(event).await;
        }
    }
}

impl<E: ?Sized + Sync> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized + Sync> Clone for ObserverRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            next_token: self.next_token,
        }
    }
}

impl<E: ?Sized + Sync> std::fmt::Debug for ObserverRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.entries.len())
            .finish()
    }
}

/// The observer registries of one agent.
#[derive(Debug, Clone, Default)]
pub struct Observers {
    /// Every assistant message, after it is appended.
    pub response: ObserverRegistry<Message>,
    /// Each non-empty text delta of a streamed response, as it arrives.
    pub chunk: ObserverRegistry<str>,
    /// Each dispatched tool call, after all results of its round are appended.
    pub tool_call: ObserverRegistry<ToolCall>,
}
