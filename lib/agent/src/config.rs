//! Agent configuration.
//!
//! Loaded with the `config` crate. Environment variables use the `COLLOQUY`
//! prefix and `__` as the nesting separator, so `COLLOQUY__MODEL` sets
//! `model` and `COLLOQUY__SAMPLING__TEMPERATURE` sets `sampling.temperature`.

use crate::error::AgentError;
use chrono::TimeDelta;
use colloquy_ai::SamplingParams;
use colloquy_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_PREFIX: &str = "COLLOQUY";

/// What happens when a capability call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailurePolicy {
    /// Abort the turn. Messages appended before the failure are kept.
    #[default]
    Abort,
    /// Record the failure as the tool result and let the model react.
    ReportToModel,
}

/// Configuration for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier passed to the transport.
    pub model: String,

    /// System instructions. Becomes the first message of the history.
    #[serde(default)]
    pub instructions: String,

    /// Sampling parameters forwarded with every request.
    #[serde(default)]
    pub sampling: SamplingParams,

    /// Messages older than this many seconds are pruned before each turn.
    /// Unset disables pruning.
    #[serde(default)]
    pub message_expire_secs: Option<i64>,

    /// Maximum number of tool-dispatch rounds in one turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Behavior when a capability call fails.
    #[serde(default)]
    pub tool_failure: ToolFailurePolicy,
}

fn default_max_tool_rounds() -> u32 {
    16
}

impl AgentConfig {
    /// Creates a configuration with defaults for everything but the model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: String::new(),
            sampling: SamplingParams::default(),
            message_expire_secs: None,
            max_tool_rounds: default_max_tool_rounds(),
            tool_failure: ToolFailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    #[must_use]
    pub fn with_message_expiry(mut self, secs: i64) -> Self {
        self.message_expire_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_max_tool_rounds(mut self, max: u32) -> Self {
        self.max_tool_rounds = max;
        self
    }

    #[must_use]
    pub fn with_tool_failure(mut self, policy: ToolFailurePolicy) -> Self {
        self.tool_failure = policy;
        self
    }

    /// The configured message lifetime, if pruning is enabled.
    ///
    /// A lifetime too large for [`TimeDelta`] is never produced by a loaded
    /// configuration; one set directly disables pruning.
    #[must_use]
    pub fn message_expiry(&self) -> Option<TimeDelta> {
        self.message_expire_secs.and_then(TimeDelta::try_seconds)
    }

    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Config` if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::load(None, environment())
    }

    /// Loads configuration from a file, with environment variables taking
    /// precedence. The format follows the file extension.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read or the result is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        Self::load(Some(path.as_ref()), environment())
    }

    fn load(file: Option<&Path>, env: config::Environment) -> Result<Self, AgentError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Self = builder
            .add_source(env)
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| AgentError::Config {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::Config {
                reason: "model must not be empty".to_string(),
            }
            .into());
        }
        if let Some(secs) = self.message_expire_secs {
            if secs <= 0 {
                return Err(AgentError::Config {
                    reason: format!("message_expire_secs must be positive, got {secs}"),
                }
                .into());
            }
            if TimeDelta::try_seconds(secs).is_none() {
                return Err(AgentError::Config {
                    reason: format!("message_expire_secs is out of range, got {secs}"),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
