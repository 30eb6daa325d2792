//! The dialogue loop.
//!
//! A turn appends the user's message, then alternates between requesting a
//! response and dispatching the tool calls it contains, until the model
//! answers without calling a tool. Rounds are iterative, so the number of
//! tool rounds is bounded by configuration rather than by stack depth.

use crate::config::{AgentConfig, ToolFailurePolicy};
use crate::error::AgentError;
use crate::observer::{Observer, ObserverToken, Observers};
use chrono::Utc;
use colloquy_ai::{CompletionRequest, LlmTransport, Step, StreamAggregator, TransportError};
use colloquy_conversation::{
    CapabilityDiscovery, CapabilityRegistry, Content, ConversationStore, Message, MessageRole,
    ToolCall, ToolError,
};
use colloquy_core::{ConversationId, Result, TurnId};
use futures::StreamExt;
use rootcause::Report;
use rootcause::prelude::ResultExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How the assistant's responses are requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// One complete message per request.
    #[default]
    Direct,
    /// A fragment stream per request, reported to chunk observers as it
    /// arrives.
    Streamed,
}

/// One user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    pub content: Content,
    /// Display name of the sender, for multi-party conversations.
    pub sender: Option<String>,
    pub mode: ResponseMode,
}

impl TurnInput {
    #[must_use]
    pub fn new(content: impl Into<Content>) -> Self {
        Self {
            content: content.into(),
            sender: None,
            mode: ResponseMode::Direct,
        }
    }

    #[must_use]
    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn streamed(mut self) -> Self {
        self.mode = ResponseMode::Streamed;
        self
    }
}

impl From<&str> for TurnInput {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}

impl From<String> for TurnInput {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

impl From<Content> for TurnInput {
    fn from(content: Content) -> Self {
        Self::new(content)
    }
}

/// A conversation with a language model that can call capabilities.
///
/// The agent owns its history. The transport and the capability registry
/// are shared, so copies made with [`fork`](Agent::fork) talk to the same
/// model and call the same capabilities.
pub struct Agent {
    pub(crate) id: ConversationId,
    pub(crate) config: Arc<AgentConfig>,
    pub(crate) transport: Arc<dyn LlmTransport>,
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) store: ConversationStore,
    pub(crate) observers: Observers,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("model", &self.config.model)
            .field("messages", &self.store.len())
            .field("capabilities", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent with an empty capability registry.
    #[must_use]
    pub fn new(config: AgentConfig, transport: Arc<dyn LlmTransport>) -> Self {
        Self::with_registry(config, transport, Arc::new(CapabilityRegistry::new()))
    }

    /// Creates an agent that calls capabilities from `registry`.
    #[must_use]
    pub fn with_registry(
        config: AgentConfig,
        transport: Arc<dyn LlmTransport>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        let store = ConversationStore::new(config.instructions.clone());
        Self {
            id: ConversationId::new(),
            config: Arc::new(config),
            transport,
            registry,
            store,
            observers: Observers::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConversationId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Direct access to the history, for callers that append messages
    /// outside of a turn.
    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    #[must_use]
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    pub fn observers_mut(&mut self) -> &mut Observers {
        &mut self.observers
    }

    /// Registers an observer for completed assistant messages.
    pub fn on_response(&mut self, observer: Arc<dyn Observer<Message>>) -> ObserverToken {
        self.observers.response.add(observer)
    }

    /// Registers an observer for streamed text deltas.
    pub fn on_chunk(&mut self, observer: Arc<dyn Observer<str>>) -> ObserverToken {
        self.observers.chunk.add(observer)
    }

    /// Registers an observer for dispatched tool calls.
    pub fn on_tool_call(&mut self, observer: Arc<dyn Observer<ToolCall>>) -> ObserverToken {
        self.observers.tool_call.add(observer)
    }

    /// Replaces the system message.
    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.store.set_instructions(instructions);
    }

    /// Drops every message except the system message.
    pub fn clear_messages(&mut self) {
        self.store.clear();
    }

    /// Writes the history to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the history cannot be encoded or written.
    pub fn save_messages(&self, path: impl AsRef<Path>) -> Result<(), AgentError> {
        self.store
            .save_to_path(path)
            .context(AgentError::Persistence)?;
        Ok(())
    }

    /// Replaces the history with the contents of a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the file cannot be read or decoded. The
    /// current history is left untouched in that case.
    pub fn load_messages(&mut self, path: impl AsRef<Path>) -> Result<(), AgentError> {
        self.store = ConversationStore::load_from_path(path)
            .context(AgentError::Persistence)?;
        Ok(())
    }

    /// Connects a discovery source and registers the capabilities it offers.
    ///
    /// # Errors
    ///
    /// Returns `Discovery` if the source cannot be listed or initialized.
    pub async fn connect(&self, source: Arc<dyn CapabilityDiscovery>) -> Result<usize, AgentError> {
        let count = self
            .registry
            .register_from(source)
            .await
            .context(AgentError::Discovery)?;
        Ok(count)
    }

    /// Tears down every connected discovery source.
    ///
    /// # Errors
    ///
    /// Returns `Discovery` if any source fails to tear down. All sources are
    /// still torn down.
    pub async fn cleanup(&self) -> Result<(), AgentError> {
        self.registry
            .teardown_sources()
            .await
            .context(AgentError::Discovery)?;
        Ok(())
    }

    /// Runs one turn and returns the content of the final response.
    ///
    /// Expired messages are pruned and stale foldable tool results folded
    /// before the user's message is appended.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if a request fails, `UnknownTool` or
    /// `ToolExecutionFailed` if a call fails under the abort policy, and
    /// `TooManyToolRounds` if the model keeps calling tools. Messages
    /// appended before the failure stay in the history.
    #[instrument(skip_all, fields(conversation = %self.id, turn = %TurnId::new()))]
    pub async fn run(
        &mut self,
        input: impl Into<TurnInput> + Send,
    ) -> Result<Option<Content>, AgentError> {
        let input = input.into();
        self.expire_messages();

        let registry = Arc::clone(&self.registry);
        let folded = self
            .store
            .fold_stale_tool_results(|name| registry.is_foldable(name));
        if folded > 0 {
            debug!(folded, "folded stale tool results");
        }

        let mut message = Message::user(input.content).with_timestamp(Utc::now().timestamp());
        if let Some(sender) = input.sender {
            message = message.with_name(sender);
        }
        self.store.push(message);

        self.respond(input.mode).await
    }

    /// Requests responses until the model answers without calling a tool.
    ///
    /// [`run`](Self::run) calls this after appending the user's message. It
    /// can also be called directly to retry a turn whose request failed.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn respond(&mut self, mode: ResponseMode) -> Result<Option<Content>, AgentError> {
        let mut rounds = 0u32;
        loop {
            let request = self.build_request(mode);
            let message = match mode {
                ResponseMode::Direct => self.request_direct(&request).await?,
                ResponseMode::Streamed => self.request_streamed(&request).await?,
            };
            self.store.push(message.clone());
            self.observers.response.notify(&message).await;

            if !message.has_tool_calls() {
                debug!(rounds, "turn complete");
                return Ok(message.content);
            }
            if rounds >= self.config.max_tool_rounds {
                warn!(max = self.config.max_tool_rounds, "tool round limit reached");
                self.decline(&message.tool_calls, message.timestamp);
                return Err(AgentError::TooManyToolRounds {
                    max: self.config.max_tool_rounds,
                }
                .into());
            }
            rounds += 1;
            self.dispatch(&message.tool_calls, message.timestamp).await?;
        }
    }

    fn build_request(&self, mode: ResponseMode) -> CompletionRequest {
        CompletionRequest::new(self.config.model.clone(), self.store.export())
            .with_tools(self.registry.to_llm_format())
            .with_sampling(self.config.sampling.clone())
            .streaming(mode == ResponseMode::Streamed)
    }

    async fn request_direct(&self, request: &CompletionRequest) -> Result<Message, AgentError> {
        let completion = self
            .transport
            .complete(request)
            .await
            .context(AgentError::Transport)?;

        let mut message = completion.message;
        if message.role != MessageRole::Assistant {
            let invalid: Report<TransportError> = TransportError::InvalidResponse {
                reason: format!("expected an assistant message, got {}", message.role),
            }
            .into();
            return Err(invalid.context(AgentError::Transport));
        }
        message.timestamp = Some(completion.created);
        Ok(message)
    }

    async fn request_streamed(&self, request: &CompletionRequest) -> Result<Message, AgentError> {
        let mut fragments = self
            .transport
            .stream(request)
            .await
            .context(AgentError::Transport)?;

        let mut aggregator = StreamAggregator::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.context(AgentError::Transport)?;
            let (delta, stop) = match aggregator.apply(fragment) {
                Step::Continue { text_delta } => (text_delta, false),
                Step::Stop { text_delta } => (text_delta, true),
            };
            if let Some(delta) = delta {
                self.observers.chunk.notify(delta.as_str()).await;
            }
            if stop {
                break;
            }
        }
        Ok(aggregator.finish())
    }

    /// Invokes each call in order and appends its result. Tool observers
    /// run once all results of the round are in the history.
    async fn dispatch(
        &mut self,
        calls: &[ToolCall],
        timestamp: Option<i64>,
    ) -> Result<(), AgentError> {
        for call in calls {
            debug!(tool = %call.name(), call_id = %call.id, "invoking capability");
            let output = match self.registry.invoke(call.name(), call.arguments()).await {
                Ok(output) => output,
                Err(report) => match self.config.tool_failure {
                    ToolFailurePolicy::Abort => {
                        warn!(
                            tool = %call.name(),
                            call_id = %call.id,
                            error = %report,
                            "capability failed"
                        );
                        return Err(tool_failure(call, report));
                    }
                    ToolFailurePolicy::ReportToModel => {
                        info!(
                            tool = %call.name(),
                            call_id = %call.id,
                            error = %report,
                            "reporting capability failure to model"
                        );
                        format!("Error: {}", failure_reason(&report))
                    }
                },
            };

            let mut result = Message::tool_result(call.id.clone(), output);
            result.timestamp = timestamp;
            self.store.push(result);
        }

        for call in calls {
            self.observers.tool_call.notify(call).await;
        }
        Ok(())
    }

    /// Answers calls that will not be dispatched, so every call in the
    /// history keeps a matching tool result.
    fn decline(&mut self, calls: &[ToolCall], timestamp: Option<i64>) {
        for call in calls {
            let mut result = Message::tool_result(call.id.clone(), TOOL_ROUND_LIMIT_REACHED);
            result.timestamp = timestamp;
            self.store.push(result);
        }
    }

    pub(crate) fn expire_messages(&mut self) {
        if let Some(max_age) = self.config.message_expiry() {
            let removed = self.store.prune_expired(max_age);
            if removed > 0 {
                debug!(removed, "pruned expired messages");
            }
        }
    }
}

/// Tool result recorded for calls left undispatched by the round limit.
pub const TOOL_ROUND_LIMIT_REACHED: &str = "Error: tool round limit reached";

/// Joins the report's contexts, outermost first.
fn failure_reason(report: &Report<ToolError>) -> String {
    report
        .iter_reports()
        .map(|node| node.format_current_context().to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

fn tool_failure(call: &ToolCall, report: Report<ToolError>) -> Report<AgentError> {
    let tool_name = call.name().to_string();
    let call_id = call.id.clone();
    let error = if report.current_context().is_execution_failure() {
        AgentError::ToolExecutionFailed { tool_name, call_id }
    } else {
        AgentError::UnknownTool { tool_name, call_id }
    };
    report.context(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::FnObserver;
    use colloquy_ai::{
        Completion, Fragment, SamplingParams, ScriptedTransport, ToolCallDelta, ToolChoice,
    };
    use colloquy_conversation::{CapabilityDefinition, FOLDED_PLACEHOLDER, FunctionCapability};
    use rootcause::report;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Mutex;

    fn registry() -> Arc<CapabilityRegistry> {
        let registry = CapabilityRegistry::new();
        registry.register(FunctionCapability::from_sync(
            CapabilityDefinition::new("get_time", "Current time").foldable(),
            |_| Ok(json!("12:00")),
        ));
        registry.register(FunctionCapability::from_sync(
            CapabilityDefinition::new("echo", "Echo the arguments"),
            Ok,
        ));
        registry.register(FunctionCapability::from_sync(
            CapabilityDefinition::new("explode", "Always fails"),
            |_| Err(report!("disk on fire").into()),
        ));
        Arc::new(registry)
    }

    fn agent(transport: ScriptedTransport) -> (Agent, Arc<ScriptedTransport>) {
        agent_with(
            AgentConfig::new("test-model").with_instructions("Be helpful."),
            transport,
        )
    }

    fn agent_with(
        config: AgentConfig,
        transport: ScriptedTransport,
    ) -> (Agent, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let agent = Agent::with_registry(
            config,
            Arc::clone(&transport) as Arc<dyn LlmTransport>,
            registry(),
        );
        (agent, transport)
    }

    fn calls(calls: &[(&str, &str, &str)], created: i64) -> Completion {
        let calls = calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect();
        Completion::new(Message::assistant_tool_calls(calls), created)
    }

    fn answer(text: &str, created: i64) -> Completion {
        Completion::new(Message::assistant(text), created)
    }

    fn text(content: &Option<Content>) -> Option<&str> {
        content.as_ref().and_then(Content::as_text)
    }

    #[tokio::test]
    async fn tool_round_trip_appends_four_messages() {
        let (mut agent, transport) = agent(
            ScriptedTransport::new()
                .respond(calls(&[("c1", "get_time", "{}")], 100))
                .respond(answer("It is 12:00.", 101)),
        );

        let content = agent.run("What time is it?").await.expect("turn");

        assert_eq!(text(&content), Some("It is 12:00."));
        assert_eq!(agent.store().len(), 5);
        let tool = agent.store().get(3).expect("tool result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool.text(), Some("12:00"));
        assert_eq!(tool.timestamp, Some(100));
        assert_eq!(agent.store().last().timestamp, Some(101));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tool_choice, ToolChoice::Auto);
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(requests[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn streamed_arguments_are_joined_before_dispatch() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let (mut agent, transport) = agent(
            ScriptedTransport::new()
                .stream_fragments(vec![
                    Fragment::tool_call(
                        ToolCallDelta::new(0)
                            .with_id("c1")
                            .with_name("echo")
                            .with_arguments("{\"x\":1"),
                    )
                    .at(7),
                    Fragment::tool_call(ToolCallDelta::new(0).with_arguments("}")),
                    Fragment::stop(),
                ])
                .stream_fragments(vec![
                    Fragment::text("Got "),
                    Fragment::text(""),
                    Fragment::text("it."),
                    Fragment::stop(),
                    Fragment::text(" ignored"),
                ]),
        );
        let sink = Arc::clone(&chunks);
        agent.on_chunk(Arc::new(FnObserver::from_sync(move |delta: &str| {
            sink.lock().unwrap().push(delta.to_string());
        })));

        let content = agent
            .run(TurnInput::new("echo x").streamed())
            .await
            .expect("turn");

        assert_eq!(text(&content), Some("Got it."));
        let tool = agent.store().get(3).expect("tool result");
        assert_eq!(tool.text(), Some("{\"x\":1}"));
        assert_eq!(tool.timestamp, Some(7));
        assert_eq!(*chunks.lock().unwrap(), vec!["Got ", "it."]);
        assert!(transport.requests().iter().all(|r| r.stream));
    }

    #[tokio::test]
    async fn transport_failure_keeps_the_user_message() {
        let (mut agent, _) = agent(ScriptedTransport::new().fail(TransportError::Unavailable {
            reason: "connection refused".to_string(),
        }));

        let err = agent.run("hello").await.unwrap_err();

        assert_eq!(err.current_context(), &AgentError::Transport);
        assert_eq!(agent.store().len(), 2);
        assert_eq!(agent.store().last().role, MessageRole::User);
    }

    #[tokio::test]
    async fn retry_after_transport_failure() {
        let (mut agent, _) = agent(
            ScriptedTransport::new()
                .fail(TransportError::RequestFailed {
                    reason: "rate limited".to_string(),
                })
                .respond(answer("Hi!", 5)),
        );

        assert!(agent.run("hello").await.is_err());
        let content = agent.respond(ResponseMode::Direct).await.expect("retry");

        assert_eq!(text(&content), Some("Hi!"));
        assert_eq!(agent.store().len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_aborts_the_turn() {
        let (mut agent, _) = agent(
            ScriptedTransport::new().respond(calls(&[("c1", "teleport", "{}")], 1)),
        );

        let err = agent.run("go").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &AgentError::UnknownTool {
                tool_name: "teleport".to_string(),
                call_id: "c1".to_string()
            }
        );
        assert_eq!(agent.store().len(), 3);
        assert!(agent.store().last().has_tool_calls());
    }

    #[tokio::test]
    async fn failing_tool_keeps_earlier_results() {
        let (mut agent, _) = agent(ScriptedTransport::new().respond(calls(
            &[("c1", "get_time", "{}"), ("c2", "explode", "{}")],
            1,
        )));

        let err = agent.run("go").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &AgentError::ToolExecutionFailed {
                tool_name: "explode".to_string(),
                call_id: "c2".to_string()
            }
        );
        assert_eq!(agent.store().len(), 4);
        assert_eq!(agent.store().last().tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_an_execution_failure() {
        let (mut agent, _) = agent(
            ScriptedTransport::new().respond(calls(&[("c1", "echo", "{\"x\":")], 1)),
        );

        let err = agent.run("go").await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            AgentError::ToolExecutionFailed { .. }
        ));
    }

    #[tokio::test]
    async fn failures_can_be_reported_to_the_model() {
        let (mut agent, _) = agent_with(
            AgentConfig::new("m").with_tool_failure(ToolFailurePolicy::ReportToModel),
            ScriptedTransport::new()
                .respond(calls(&[("c1", "explode", "{}"), ("c2", "get_time", "{}")], 1))
                .respond(answer("Sorry, the disk is on fire.", 2)),
        );

        let content = agent.run("go").await.expect("turn");

        assert_eq!(text(&content), Some("Sorry, the disk is on fire."));
        let failed = agent.store().get(3).expect("first result");
        assert!(failed.text().unwrap_or_default().starts_with("Error:"));
        assert!(failed.text().unwrap_or_default().contains("explode"));
        assert!(failed.text().unwrap_or_default().contains("disk on fire"));
        assert_eq!(agent.store().get(4).and_then(Message::text), Some("12:00"));
    }

    #[tokio::test]
    async fn tool_rounds_are_bounded() {
        let (mut agent, transport) = agent_with(
            AgentConfig::new("m").with_max_tool_rounds(1),
            ScriptedTransport::new()
                .respond(calls(&[("c1", "get_time", "{}")], 1))
                .respond(calls(&[("c2", "get_time", "{}"), ("c3", "echo", "{}")], 2))
                .respond(answer("back on track", 3)),
        );

        let err = agent.run("loop").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &AgentError::TooManyToolRounds { max: 1 }
        );
        assert_eq!(agent.store().len(), 7);
        for (index, id) in [(5, "c2"), (6, "c3")] {
            let declined = agent.store().get(index).expect("declined call");
            assert_eq!(declined.tool_call_id.as_deref(), Some(id));
            assert_eq!(declined.text(), Some(TOOL_ROUND_LIMIT_REACHED));
            assert_eq!(declined.timestamp, Some(2));
        }
        assert_eq!(transport.remaining(), 1);

        agent.run("next").await.expect("next turn");
        let history = &transport.requests()[2].messages;
        for message in history.iter().filter(|m| m.has_tool_calls()) {
            for call in &message.tool_calls {
                let answers = history
                    .iter()
                    .filter(|m| m.tool_call_id.as_deref() == Some(call.id.as_str()))
                    .count();
                assert_eq!(answers, 1, "call {} answered once", call.id);
            }
        }
    }

    #[tokio::test]
    async fn no_capabilities_forbids_tools() {
        let transport = Arc::new(ScriptedTransport::new().respond(answer("plain", 1)));
        let mut agent = Agent::new(
            AgentConfig::new("m"),
            Arc::clone(&transport) as Arc<dyn LlmTransport>,
        );

        agent.run("hi").await.expect("turn");

        let request = &transport.requests()[0];
        assert_eq!(request.tool_choice, ToolChoice::None);
        assert!(request.tools.is_none());
    }

    #[tokio::test]
    async fn sender_name_and_sampling_are_forwarded() {
        let (mut agent, transport) = agent_with(
            AgentConfig::new("m")
                .with_sampling(SamplingParams::default().with_temperature(0.3)),
            ScriptedTransport::new().respond(answer("hi Ada", 1)),
        );

        agent
            .run(TurnInput::new("hello").from_sender("ada"))
            .await
            .expect("turn");

        let request = &transport.requests()[0];
        assert_eq!(request.sampling.temperature, Some(0.3));
        assert_eq!(request.messages[1].name.as_deref(), Some("ada"));
        assert!(request.messages[1].timestamp.is_some());
    }

    #[tokio::test]
    async fn observers_see_responses_and_tool_calls() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (mut agent, _) = agent(
            ScriptedTransport::new()
                .respond(calls(&[("c1", "get_time", "{}"), ("c2", "echo", "{}")], 1))
                .respond(answer("done", 2)),
        );

        let sink = Arc::clone(&events);
        agent.on_response(Arc::new(FnObserver::from_sync(move |m: &Message| {
            sink.lock()
                .unwrap()
                .push(format!("response:{}", m.tool_calls.len()));
        })));
        let sink = Arc::clone(&events);
        let removed = agent.on_tool_call(Arc::new(FnObserver::from_sync(move |_: &ToolCall| {
            sink.lock().unwrap().push("removed".to_string());
        })));
        let sink = Arc::clone(&events);
        agent.on_tool_call(Arc::new(FnObserver::from_sync(move |c: &ToolCall| {
            sink.lock().unwrap().push(format!("tool:{}", c.name()));
        })));
        assert!(agent.observers_mut().tool_call.remove(removed));

        agent.run("go").await.expect("turn");

        assert_eq!(
            *events.lock().unwrap(),
            vec!["response:2", "tool:get_time", "tool:echo", "response:0"]
        );
    }

    #[tokio::test]
    async fn stale_foldable_results_are_folded_next_turn() {
        let (mut agent, _) = agent(
            ScriptedTransport::new()
                .respond(calls(&[("c1", "get_time", "{}")], 1))
                .respond(answer("noon", 2))
                .respond(answer("bye", 3)),
        );

        agent.run("time?").await.expect("first turn");
        assert_eq!(agent.store().get(3).and_then(Message::text), Some("12:00"));

        agent.run("thanks").await.expect("second turn");
        assert_eq!(
            agent.store().get(3).and_then(Message::text),
            Some(FOLDED_PLACEHOLDER)
        );
    }

    #[tokio::test]
    async fn expired_messages_are_pruned_before_the_turn() {
        let (mut agent, _) = agent_with(
            AgentConfig::new("m").with_message_expiry(60),
            ScriptedTransport::new().respond(answer("fresh", Utc::now().timestamp())),
        );
        agent
            .store_mut()
            .push(Message::user("ancient").with_timestamp(0));

        agent.run("now").await.expect("turn");

        assert!(agent.store().messages().all(|m| m.text() != Some("ancient")));
        assert_eq!(agent.store().len(), 3);
    }

    #[tokio::test]
    async fn non_assistant_reply_is_invalid() {
        let (mut agent, _) = agent(
            ScriptedTransport::new().respond(Completion::new(Message::user("imposter"), 1)),
        );

        let err = agent.run("hi").await.unwrap_err();

        assert_eq!(err.current_context(), &AgentError::Transport);
    }

    #[tokio::test]
    async fn history_survives_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        let (mut agent, _) = agent(ScriptedTransport::new().respond(answer("hello", 1)));
        agent.run("hi").await.expect("turn");

        agent.save_messages(&path).expect("save");
        agent.clear_messages();
        assert_eq!(agent.store().len(), 1);
        agent.load_messages(&path).expect("load");

        assert_eq!(agent.store().len(), 3);
        assert_eq!(agent.store().system().text(), Some("Be helpful."));
    }

    #[tokio::test]
    async fn loading_a_missing_file_is_a_persistence_error() {
        let (mut agent, _) = agent(ScriptedTransport::new());
        let err = agent.load_messages("/nonexistent/history.json").unwrap_err();
        assert_eq!(err.current_context(), &AgentError::Persistence);
    }

    #[tokio::test]
    async fn echo_returns_object_arguments() {
        let registry = registry();
        let output = registry.invoke("echo", r#"{"a":[1,2]}"#).await.expect("echo");
        let value: JsonValue = serde_json::from_str(&output).expect("json");
        assert_eq!(value, json!({"a": [1, 2]}));
    }
}
