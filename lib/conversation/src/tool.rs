//! Capability registry.
//!
//! Capabilities are the tools the model may call. Each one has a definition
//! (name, description, parameter schema, foldable flag) and an async
//! invocation function. The registry is shared read-mostly between an agent
//! and its guard snapshots; lookups clone an `Arc` and release the lock
//! before any capability runs.

use crate::error::ToolError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use rootcause::Report;
use rootcause::prelude::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Definition of a capability available to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    /// Unique capability name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema for input parameters.
    pub input_schema: JsonValue,
    /// Whether past results may be replaced by a placeholder.
    pub foldable: bool,
}

impl CapabilityDefinition {
    /// Creates a new definition with an empty object schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            foldable: false,
        }
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = schema;
        self
    }

    /// Marks the capability's results as foldable.
    #[must_use]
    pub fn foldable(mut self) -> Self {
        self.foldable = true;
        self
    }

    /// Converts the definition to the function-tool format expected by LLM APIs.
    #[must_use]
    pub fn to_llm_format(&self) -> JsonValue {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// A callable capability.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Returns the capability definition.
    fn definition(&self) -> &CapabilityDefinition;

    /// Prepares the capability before it is registered from a discovery
    /// source. Directly registered capabilities are not initialized.
    async fn init(&self) -> Result<(), Report> {
        Ok(())
    }

    /// Runs the capability with decoded arguments.
    async fn invoke(&self, arguments: JsonValue) -> Result<JsonValue, Report>;
}

type Handler = dyn Fn(JsonValue) -> BoxFuture<'static, Result<JsonValue, Report>> + Send + Sync;

/// A capability backed by a closure.
pub struct FunctionCapability {
    definition: CapabilityDefinition,
    handler: Box<Handler>,
}

impl FunctionCapability {
    /// Wraps an async function.
    #[must_use]
    pub fn new<F, Fut>(definition: CapabilityDefinition, handler: F) -> Self
    where
        F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, Report>> + Send + 'static,
    {
        let boxed = move |arguments: JsonValue| -> BoxFuture<'static, Result<JsonValue, Report>> {
            Box::pin(handler(arguments))
        };
        Self {
            definition,
            handler: Box::new(boxed),
        }
    }

    /// Wraps a synchronous function.
    #[must_use]
    pub fn from_sync<F>(definition: CapabilityDefinition, handler: F) -> Self
    where
        F: Fn(JsonValue) -> Result<JsonValue, Report> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(definition, move |arguments| {
            let handler = Arc::clone(&handler);
            async move { handler(arguments) }
        })
    }
}

impl std::fmt::Debug for FunctionCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCapability")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Capability for FunctionCapability {
    fn definition(&self) -> &CapabilityDefinition {
        &self.definition
    }

    async fn invoke(&self, arguments: JsonValue) -> Result<JsonValue, Report> {
        (self.handler)(arguments).await
    }
}

#[derive(Clone)]
pub(crate) struct Registered {
    pub(crate) capability: Arc<dyn Capability>,
    /// Discovery source that contributed the capability, if any.
    pub(crate) source: Option<String>,
}

/// Registry of available capabilities.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Registered>>,
    pub(crate) sources: std::sync::Mutex<Vec<Arc<dyn crate::discovery::CapabilityDiscovery>>>,
}

impl CapabilityRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the given capabilities.
    #[must_use]
    pub fn with_capabilities(capabilities: impl IntoIterator<Item = Arc<dyn Capability>>) -> Self {
        let registry = Self::new();
        for capability in capabilities {
            registry.register_shared(capability);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registered>> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registered>> {
        self.capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a capability. A capability with the same name is replaced.
    pub fn register(&self, capability: impl Capability + 'static) {
        self.register_shared(Arc::new(capability));
    }

    /// Registers a shared capability. A capability with the same name is replaced.
    pub fn register_shared(&self, capability: Arc<dyn Capability>) {
        let name = capability.definition().name.clone();
        info!(capability = %name, "registering capability");
        self.write().insert(
            name,
            Registered {
                capability,
                source: None,
            },
        );
    }

    /// Replaces the whole set of directly registered capabilities.
    ///
    /// Capabilities contributed by discovery sources are kept.
    pub fn replace_all(&self, capabilities: impl IntoIterator<Item = Arc<dyn Capability>>) {
        let mut map = self.write();
        map.retain(|_, registered| registered.source.is_some());
        for capability in capabilities {
            map.insert(
                capability.definition().name.clone(),
                Registered {
                    capability,
                    source: None,
                },
            );
        }
    }

    /// Looks up a capability by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTool` if nothing is registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>, Report<ToolError>> {
        self.read()
            .get(name)
            .map(|registered| Arc::clone(&registered.capability))
            .ok_or_else(|| {
                ToolError::UnknownTool {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Returns true if a capability with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Returns true if the named capability is registered and foldable.
    #[must_use]
    pub fn is_foldable(&self, name: &str) -> bool {
        self.read()
            .get(name)
            .is_some_and(|registered| registered.capability.definition().foldable)
    }

    /// Returns all definitions, ordered by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        let mut definitions: Vec<_> = self
            .read()
            .values()
            .map(|registered| registered.capability.definition().clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Returns the number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Converts definitions to the format expected by LLM APIs.
    #[must_use]
    pub fn to_llm_format(&self) -> Vec<JsonValue> {
        self.definitions()
            .iter()
            .map(CapabilityDefinition::to_llm_format)
            .collect()
    }

    /// Resolves, decodes arguments for, and invokes a capability.
    ///
    /// Returns the result rendered as text: string results verbatim,
    /// everything else as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTool`, `MalformedArguments`, or `ExecutionFailed`
    /// wrapping the capability's own report.
    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<String, Report<ToolError>> {
        let capability = self.resolve(name)?;
        let arguments = decode_arguments(name, arguments)?;
        debug!(capability = %name, "invoking capability");
        let result = capability
            .invoke(arguments)
            .await
            .context(ToolError::ExecutionFailed {
                name: name.to_string(),
            })?;
        Ok(render_result(result))
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &names)
            .finish_non_exhaustive()
    }
}

/// Decodes model-generated argument text as a JSON object.
///
/// Empty text means "no arguments". Anything that is not a JSON object is
/// rejected rather than interpreted.
fn decode_arguments(name: &str, arguments: &str) -> Result<JsonValue, Report<ToolError>> {
    if arguments.trim().is_empty() {
        return Ok(JsonValue::Object(serde_json::Map::new()));
    }
    let value: JsonValue =
        serde_json::from_str(arguments).map_err(|e| ToolError::MalformedArguments {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(ToolError::MalformedArguments {
            name: name.to_string(),
            reason: "expected a JSON object".to_string(),
        }
        .into());
    }
    Ok(value)
}

fn render_result(result: JsonValue) -> String {
    match result {
        JsonValue::String(text) => text,
        other => other.to_string(),
    }
}
