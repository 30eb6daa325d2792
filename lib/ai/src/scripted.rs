//! A transport that replays scripted responses.
//!
//! Useful for tests and offline demos: each request pops the next scripted
//! response, and every request is recorded for later inspection.

use crate::backend::{Completion, CompletionRequest, Fragment, FragmentStream, LlmTransport};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use rootcause::Report;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Answer a direct request.
    Complete(Completion),
    /// Answer a streamed request. An `Err` item breaks the stream there.
    Stream(Vec<Result<Fragment, TransportError>>),
    /// Fail the request.
    Fail(TransportError),
}

/// Replays [`ScriptedReply`]s in order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a direct response.
    #[must_use]
    pub fn respond(self, completion: Completion) -> Self {
        self.push(ScriptedReply::Complete(completion))
    }

    /// Queues a fragment stream.
    #[must_use]
    pub fn stream_fragments(self, fragments: Vec<Fragment>) -> Self {
        self.push(ScriptedReply::Stream(fragments.into_iter().map(Ok).collect()))
    }

    /// Queues a failure.
    #[must_use]
    pub fn fail(self, error: TransportError) -> Self {
        self.push(ScriptedReply::Fail(error))
    }

    /// Queues any reply.
    #[must_use]
    pub fn push(self, reply: ScriptedReply) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// Number of replies not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }

    fn next(&self, request: &CompletionRequest) -> Result<ScriptedReply, Report<TransportError>> {
        lock(&self.requests).push(request.clone());
        lock(&self.replies)
            .pop_front()
            .ok_or_else(|| TransportError::ScriptExhausted.into())
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, Report<TransportError>> {
        match self.next(request)? {
            ScriptedReply::Complete(completion) => Ok(completion),
            ScriptedReply::Fail(error) => Err(error.into()),
            ScriptedReply::Stream(_) => Err(TransportError::InvalidResponse {
                reason: "scripted a stream for a direct request".to_string(),
            }
            .into()),
        }
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, Report<TransportError>> {
        match self.next(request)? {
            ScriptedReply::Stream(items) => Ok(futures::stream::iter(
                items.into_iter().map(|item| item.map_err(Report::from)),
            )
            .boxed()),
            ScriptedReply::Fail(error) => Err(error.into()),
            ScriptedReply::Complete(_) => Err(TransportError::InvalidResponse {
                reason: "scripted a direct response for a stream request".to_string(),
            }
            .into()),
        }
    }
}
