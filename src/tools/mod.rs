//! Tools module for Chatloom
//!
//! This module contains the declarative tool descriptors, the tool
//! registry, and the dispatch path the orchestrator uses to execute
//! tool calls requested by the provider.

use crate::error::{ChatloomError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// JSON-schema type for one declared tool parameter
///
/// Optional (nullable) parameters are declared with their inner kind;
/// optionality is expressed through [`ToolParam::required`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Maps to JSON-schema "string"
    String,
    /// Maps to JSON-schema "integer"
    Integer,
    /// Maps to JSON-schema "number"
    Float,
    /// Maps to JSON-schema "boolean"
    Boolean,
    /// Sequence types, maps to JSON-schema "array"
    Array,
    /// Mappings and anything unknown, maps to JSON-schema "object"
    Object,
}

impl ParamKind {
    /// Returns the JSON-schema type name for this kind
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared tool parameter
///
/// Parameters marked `injected` are satisfied by the orchestrator's own
/// context (session, caller identity) and are excluded from the schema
/// advertised to the provider.
#[derive(Debug, Clone)]
pub struct ToolParam {
    /// Parameter name as it appears in the arguments object
    pub name: String,
    /// Natural-language description shown to the provider
    pub description: String,
    /// JSON-schema type
    pub kind: ParamKind,
    /// Whether the provider must supply this parameter
    pub required: bool,
    /// Whether the orchestrator supplies this parameter itself
    pub injected: bool,
}

impl ToolParam {
    /// Creates a required parameter with an empty description
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            required: true,
            injected: false,
        }
    }

    /// Sets the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the parameter as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Marks the parameter as orchestrator-injected
    pub fn injected(mut self) -> Self {
        self.injected = true;
        self
    }
}

/// Injected execution context passed to every tool handler
///
/// Carries the identity of the session and caller the tool call belongs
/// to, so handlers never reach into ambient state for them.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the current turn belongs to
    pub session_id: String,
    /// Owner of the session
    pub user_id: String,
    /// Display name of the caller, if known
    pub user_name: Option<String>,
}

/// Tool handler trait for implementing tool execution logic
///
/// Handlers receive the provider-supplied arguments (a JSON object) and
/// the injected context, and return a JSON-compatible value. Failures are
/// reported through the `Result`; the registry converts them into
/// structured dispatch errors and never lets them abort a turn.
///
/// # Examples
///
/// ```no_run
/// use chatloom::tools::{ToolContext, ToolHandler};
/// use chatloom::error::Result;
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct Echo;
///
/// #[async_trait]
/// impl ToolHandler for Echo {
///     async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
///         Ok(args)
///     }
/// }
/// ```
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the tool with the given arguments and injected context
    ///
    /// # Errors
    ///
    /// Returns error if execution fails; the cause is wrapped into a
    /// `ToolExecution` error by the registry.
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value>;
}

/// Declarative registration record for one tool
///
/// The advertised JSON schema is built once from `params` at registration
/// time and never re-derived per call.
pub struct ToolSpec {
    /// Unique dispatch name
    pub name: String,
    /// Natural-language summary shown to the provider
    pub description: String,
    /// Declared parameters, injected ones included
    pub params: Vec<ToolParam>,
    /// Execution logic
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    /// Creates a spec with no parameters
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            handler,
        }
    }

    /// Adds a declared parameter
    pub fn with_param(mut self, param: ToolParam) -> Self {
        self.params.push(param);
        self
    }
}

/// Advertised descriptor for one registered tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique dispatch name
    pub name: String,
    /// Description shown to the provider
    pub description: String,
    /// JSON schema for the non-injected parameters
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    /// Wraps the descriptor in the provider wire shape
    pub fn advertised(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
    }
}

/// Builds the parameters schema from the declared list, skipping injected
/// parameters entirely.
fn build_schema(params: &[ToolParam]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in params {
        if param.injected {
            continue;
        }
        properties.insert(
            param.name.clone(),
            serde_json::json!({
                "type": param.kind.json_type(),
                "description": param.description,
            }),
        );
        if param.required {
            required.push(serde_json::Value::String(param.name.clone()));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
struct RegistryInner {
    /// Registration order of currently registered names
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

/// Tool registry owning the advertised descriptors and the dispatch map
///
/// The registry is process-wide state: mutated only by registration and
/// withdrawal, read concurrently by many turns. Every read takes a
/// consistent snapshot; a dispatch never observes a half-replaced tool.
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a tool, replacing any previous registration of the same name
    ///
    /// Name uniqueness is enforced here: re-registering replaces both the
    /// advertised descriptor and the handler, so a name can never appear
    /// twice in the advertised list.
    ///
    /// # Errors
    ///
    /// Returns `ChatloomError::ToolExecution` if the registry lock is poisoned.
    pub fn register(&self, spec: ToolSpec) -> Result<()> {
        let descriptor = ToolDescriptor {
            name: spec.name.clone(),
            description: spec.description,
            parameters: build_schema(&spec.params),
        };

        let mut inner = self.inner.write().map_err(|_| {
            ChatloomError::ToolExecution("Failed to acquire write lock on registry".to_string())
        })?;

        if !inner.tools.contains_key(&spec.name) {
            inner.order.push(spec.name.clone());
        }
        inner.tools.insert(
            spec.name,
            RegisteredTool {
                descriptor,
                handler: spec.handler,
            },
        );
        Ok(())
    }

    /// Withdraw a tool registration
    ///
    /// Removes the name from both the advertised list and the dispatch map.
    /// Returns `false` if the name was not registered.
    pub fn unregister(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|_| {
            ChatloomError::ToolExecution("Failed to acquire write lock on registry".to_string())
        })?;
        let removed = inner.tools.remove(name).is_some();
        if removed {
            inner.order.retain(|n| n != name);
        }
        Ok(removed)
    }

    /// Ordered snapshot of all registered descriptors
    pub fn descriptors(&self) -> Result<Vec<ToolDescriptor>> {
        let inner = self.inner.read().map_err(|_| {
            ChatloomError::ToolExecution("Failed to acquire read lock on registry".to_string())
        })?;
        Ok(inner
            .order
            .iter()
            .filter_map(|name| inner.tools.get(name))
            .map(|tool| tool.descriptor.clone())
            .collect())
    }

    /// Ordered snapshot of all descriptors in provider wire shape
    ///
    /// An empty registry yields an empty vector; callers must translate
    /// that into "no tools" rather than sending an empty list.
    pub fn advertised(&self) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .descriptors()?
            .iter()
            .map(ToolDescriptor::advertised)
            .collect())
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.tools.len()).unwrap_or(0)
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch one tool call by name
    ///
    /// The handler is resolved and cloned under the lock, then invoked
    /// outside it so long-running tools never block registration or
    /// sibling dispatches.
    ///
    /// # Errors
    ///
    /// - `ChatloomError::ToolNotFound` if `name` is not registered
    /// - `ChatloomError::ToolExecution` for malformed argument JSON or
    ///   any handler failure, wrapping the underlying cause
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: &str,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value> {
        let handler = {
            let inner = self.inner.read().map_err(|_| {
                ChatloomError::ToolExecution(
                    "Failed to acquire read lock on registry".to_string(),
                )
            })?;
            inner
                .tools
                .get(name)
                .map(|tool| Arc::clone(&tool.handler))
                .ok_or_else(|| ChatloomError::ToolNotFound(name.to_string()))?
        };

        let args: serde_json::Value = serde_json::from_str(arguments).map_err(|e| {
            ChatloomError::ToolExecution(format!(
                "Failed to parse arguments for '{}': {}",
                name, e
            ))
        })?;

        handler.call(args, ctx).await.map_err(|e| {
            ChatloomError::ToolExecution(format!("Tool '{}' failed: {}", name, e)).into()
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(
            &self,
            args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            Ok(args)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn call(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            Err(ChatloomError::ToolExecution("boom".to_string()).into())
        }
    }

    struct ContextReader;

    #[async_trait]
    impl ToolHandler for ContextReader {
        async fn call(
            &self,
            _args: serde_json::Value,
            ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "session": ctx.session_id, "user": ctx.user_id }))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            user_name: Some("alice".to_string()),
        }
    }

    fn echo_spec(name: &str) -> ToolSpec {
        ToolSpec::new(name, "Echoes its arguments", Arc::new(EchoHandler))
            .with_param(ToolParam::new("text", ParamKind::String).describe("Text to echo"))
    }

    #[test]
    fn test_param_kind_mapping() {
        assert_eq!(ParamKind::String.json_type(), "string");
        assert_eq!(ParamKind::Integer.json_type(), "integer");
        assert_eq!(ParamKind::Float.json_type(), "number");
        assert_eq!(ParamKind::Boolean.json_type(), "boolean");
        assert_eq!(ParamKind::Array.json_type(), "array");
        assert_eq!(ParamKind::Object.json_type(), "object");
    }

    #[test]
    fn test_schema_generation() {
        let registry = ToolRegistry::new();
        let spec = ToolSpec::new("lookup", "Looks things up", Arc::new(EchoHandler))
            .with_param(ToolParam::new("query", ParamKind::String).describe("Search query"))
            .with_param(ToolParam::new("limit", ParamKind::Integer).optional())
            .with_param(ToolParam::new("session_id", ParamKind::String).injected());
        registry.register(spec).expect("register");

        let descriptors = registry.descriptors().expect("descriptors");
        assert_eq!(descriptors.len(), 1);
        let schema = &descriptors[0].parameters;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        // Injected parameters never reach the advertised schema
        assert!(schema["properties"].get("session_id").is_none());
        assert_eq!(schema["required"], serde_json::json!(["query"]));
    }

    #[test]
    fn test_reregistration_replaces_instead_of_duplicating() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("echo")).expect("register");
        registry
            .register(ToolSpec::new("echo", "Second version", Arc::new(EchoHandler)))
            .expect("register");

        assert_eq!(registry.len(), 1);
        let descriptors = registry.descriptors().expect("descriptors");
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].description, "Second version");
    }

    #[test]
    fn test_unregister_removes_descriptor_and_handler() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("echo")).expect("register");
        assert!(registry.unregister("echo").expect("unregister"));
        assert!(registry.is_empty());
        assert!(!registry.unregister("echo").expect("unregister"));
    }

    #[test]
    fn test_descriptors_preserve_registration_order() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("bravo")).expect("register");
        registry.register(echo_spec("alpha")).expect("register");
        let names: Vec<String> = registry
            .descriptors()
            .expect("descriptors")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["bravo".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn test_advertised_wire_shape() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("echo")).expect("register");
        let advertised = registry.advertised().expect("advertised");
        assert_eq!(advertised[0]["type"], "function");
        assert_eq!(advertised[0]["function"]["name"], "echo");
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("echo")).expect("register");
        let value = registry
            .dispatch("echo", r#"{"text":"hi"}"#, &ctx())
            .await
            .expect("dispatch");
        assert_eq!(value["text"], "hi");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch("missing", "{}", &ctx())
            .await
            .expect_err("should fail");
        let err = err.downcast::<ChatloomError>().expect("chatloom error");
        assert!(matches!(err, ChatloomError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_malformed_arguments() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("echo")).expect("register");
        let err = registry
            .dispatch("echo", "{not json", &ctx())
            .await
            .expect_err("should fail");
        let err = err.downcast::<ChatloomError>().expect("chatloom error");
        assert!(matches!(err, ChatloomError::ToolExecution(_)));
    }

    #[tokio::test]
    async fn test_dispatch_handler_failure_is_wrapped() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolSpec::new("boom", "Always fails", Arc::new(FailingHandler)))
            .expect("register");
        let err = registry
            .dispatch("boom", "{}", &ctx())
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_dispatch_passes_injected_context() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolSpec::new(
                "whoami",
                "Reports the caller",
                Arc::new(ContextReader),
            ))
            .expect("register");
        let value = registry
            .dispatch("whoami", "{}", &ctx())
            .await
            .expect("dispatch");
        assert_eq!(value["session"], "s1");
        assert_eq!(value["user"], "u1");
    }
}
