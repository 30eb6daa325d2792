//! LLM transport contract.
//!
//! The agent does not speak any provider's wire format. It builds a
//! [`CompletionRequest`] and hands it to an [`LlmTransport`], which answers
//! either with one complete message or with a stream of [`Fragment`]s ending
//! in a stop signal.

use crate::error::TransportError;
use async_trait::async_trait;
use colloquy_conversation::Message;
use futures::stream::BoxStream;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Whether the model may call tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides.
    Auto,
    /// Tool calls are not allowed.
    None,
}

/// Sampling parameters forwarded with every request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling mass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Penalty for repeated tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Maximum tokens to generate (legacy limit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Maximum completion tokens, including reasoning tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

impl SamplingParams {
    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the max tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A request to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// The full conversation history.
    pub messages: Vec<Message>,
    /// Tool schemas, or `None` when no tools are offered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<JsonValue>>,
    /// Tool policy.
    pub tool_choice: ToolChoice,
    /// Sampling parameters.
    #[serde(flatten)]
    pub sampling: SamplingParams,
    /// Whether the response is requested as a fragment stream.
    pub stream: bool,
}

impl CompletionRequest {
    /// Creates a request that offers no tools.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            tool_choice: ToolChoice::None,
            sampling: SamplingParams::default(),
            stream: false,
        }
    }

    /// Offers tools. An empty list keeps tools forbidden.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<JsonValue>) -> Self {
        if tools.is_empty() {
            self.tools = None;
            self.tool_choice = ToolChoice::None;
        } else {
            self.tools = Some(tools);
            self.tool_choice = ToolChoice::Auto;
        }
        self
    }

    /// Sets the sampling parameters.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Requests a fragment stream.
    #[must_use]
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// A complete, non-streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// The assistant message.
    pub message: Message,
    /// When the provider created the response, in seconds since the epoch.
    pub created: i64,
}

impl Completion {
    /// Creates a completion.
    #[must_use]
    pub fn new(message: Message, created: i64) -> Self {
        Self { message, created }
    }
}

/// Why a stream finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The model is done. This is the stop signal.
    Stop,
    /// The model is waiting for tool results.
    ToolCalls,
    /// A token limit was reached.
    Length,
    /// Anything else the provider reports.
    Other(String),
}

/// A piece of one tool call inside a fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the tool call within the response.
    pub index: usize,
    /// Call id, usually only on the first piece.
    pub id: Option<String>,
    /// Function name, usually only on the first piece.
    pub name: Option<String>,
    /// Next slice of the encoded arguments.
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// Creates an empty piece for the call at `index`.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Sets the call id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the function name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the arguments slice.
    #[must_use]
    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }
}

/// One incremental piece of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    /// When the provider created the fragment.
    pub created: Option<i64>,
    /// Text delta.
    pub delta: Option<String>,
    /// Tool-call pieces.
    pub tool_calls: Vec<ToolCallDelta>,
    /// Set on the last fragment of the response.
    pub finish_reason: Option<FinishReason>,
}

impl Fragment {
    /// A fragment carrying a text delta.
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Self::default()
        }
    }

    /// A fragment carrying one tool-call piece.
    #[must_use]
    pub fn tool_call(piece: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![piece],
            ..Self::default()
        }
    }

    /// The stop signal.
    #[must_use]
    pub fn stop() -> Self {
        Self {
            finish_reason: Some(FinishReason::Stop),
            ..Self::default()
        }
    }

    /// Sets the creation time.
    #[must_use]
    pub fn at(mut self, created: i64) -> Self {
        self.created = Some(created);
        self
    }

    /// Returns true if this fragment is the stop signal.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.finish_reason == Some(FinishReason::Stop)
    }
}

/// A stream of fragments. An `Err` item aborts the response.
pub type FragmentStream = BoxStream<'static, Result<Fragment, Report<TransportError>>>;

/// Trait for LLM transports.
///
/// Retries, authentication and the provider wire format all live behind
/// this trait.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Requests one complete response.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot produce a response.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, Report<TransportError>>;

    /// Requests a fragment stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, Report<TransportError>>;
}
