//! Tool system for agents.
//!
//! A tool is a contract (name, description, input schema, limits) around a
//! handler. Contracts are registered once at startup into a [`ToolRegistry`]
//! and executed through a [`ToolExecutor`], which enforces validation, rate
//! limits and timeouts and reports every call to the tracer.

mod executor;
mod rate_limit;
mod schema;

pub use executor::{ToolExecutor, ToolInvocation};
pub use rate_limit::RateLimiter;
pub use schema::SchemaContract;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RegistryError;
use crate::llm::{FunctionDefinition, ToolDefinition};

/// Default handler budget when a tool does not set its own.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool handler.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Run the tool. `input` has already been validated against the input schema.
    async fn execute(&self, input: Value) -> anyhow::Result<Value>;
}

/// Adapts an async closure into a [`Tool`].
pub struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

/// Errors from tool execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid input for {tool}: {message}")]
    Validation { tool: String, message: String },

    #[error("Rate limited: {tool} allows {limit} calls per window, retry in {retry_after:?}")]
    RateLimited {
        tool: String,
        limit: u32,
        retry_after: Duration,
    },

    #[error("Tool {tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("Tool {tool} failed: {cause}")]
    Execution { tool: String, cause: String },
}

impl ToolError {
    /// Name of the tool the error refers to.
    pub fn tool(&self) -> &str {
        match self {
            ToolError::NotFound(tool) => tool,
            ToolError::Validation { tool, .. }
            | ToolError::RateLimited { tool, .. }
            | ToolError::Timeout { tool, .. }
            | ToolError::Execution { tool, .. } => tool,
        }
    }
}

/// Contract for a single tool.
///
/// # Invariants
/// - Immutable once registered (the registry hands out `Arc<ToolSpec>`)
/// - `input_schema` is a valid JSON Schema (checked by [`ToolRegistry::register`])
pub struct ToolSpec {
    name: String,
    description: String,
    input_schema: Value,
    output_schema: Option<Value>,
    handler: Arc<dyn Tool>,
    rate_limit_per_minute: Option<u32>,
    timeout: Duration,
    idempotent: bool,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn Tool>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            handler,
            rate_limit_per_minute: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
            idempotent: false,
        }
    }

    /// Build a contract around an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(name, description, input_schema, Arc::new(FnTool(handler)))
    }

    pub fn with_rate_limit(mut self, calls_per_minute: u32) -> Self {
        self.rate_limit_per_minute = Some(calls_per_minute);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Mark the tool safe to re-run after a timeout.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn rate_limit_per_minute(&self) -> Option<u32> {
        self.rate_limit_per_minute
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Tool> {
        &self.handler
    }

    /// Schema in the format advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.input_schema.clone(),
            },
        }
    }
}

/// Information about a tool for display purposes.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// A registered tool with its compiled contracts.
pub(crate) struct RegisteredTool {
    pub(crate) spec: Arc<ToolSpec>,
    pub(crate) input: SchemaContract,
    pub(crate) output: Option<SchemaContract>,
}

/// Registry of available tools.
///
/// Built at startup and shared read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool contract, compiling its schemas.
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.tools.contains_key(spec.name()) {
            return Err(RegistryError::DuplicateName(spec.name().to_string()));
        }

        let invalid = |message: String| RegistryError::InvalidSchema {
            tool: spec.name().to_string(),
            message,
        };
        let input = SchemaContract::compile(spec.input_schema.clone()).map_err(invalid)?;
        let output = match &spec.output_schema {
            Some(schema) => Some(SchemaContract::compile(schema.clone()).map_err(invalid)?),
            None => None,
        };

        tracing::debug!(tool = spec.name(), "Registered tool");
        self.tools.insert(
            spec.name().to_string(),
            RegisteredTool {
                spec: Arc::new(spec),
                input,
                output,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).map(|t| Arc::clone(&t.spec))
    }

    pub(crate) fn entry(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all available tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.spec.name().to_string(),
                description: t.spec.description().to_string(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Schemas for the permitted subset of tools, sorted by name.
    ///
    /// Names without a registered tool are skipped.
    pub fn schemas_for(&self, permitted: &BTreeSet<String>) -> Vec<ToolDefinition> {
        permitted
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.spec.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(name: &str) -> ToolSpec {
        ToolSpec::from_fn(name, "Echo input", json!({"type": "object"}), |input| async move {
            Ok(input)
        })
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("echo")).unwrap();
        assert_eq!(
            registry.register(echo("echo")),
            Err(RegistryError::DuplicateName("echo".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid_schema() {
        let mut registry = ToolRegistry::new();
        let spec = ToolSpec::from_fn("bad", "Bad schema", json!({"type": 12}), |input| async move {
            Ok(input)
        });
        assert!(matches!(
            registry.register(spec),
            Err(RegistryError::InvalidSchema { .. })
        ));
        assert!(!registry.has_tool("bad"));
    }

    #[test]
    fn test_schemas_for_filters_to_permitted_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("search")).unwrap();
        registry.register(echo("get_weather")).unwrap();
        registry.register(echo("delete_everything")).unwrap();

        let permitted: BTreeSet<String> = ["search", "get_weather", "missing"]
            .into_iter()
            .map(String::from)
            .collect();
        let names: Vec<String> = registry
            .schemas_for(&permitted)
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names, vec!["get_weather", "search"]);
    }

    #[test]
    fn test_spec_builders() {
        let spec = echo("t")
            .with_rate_limit(10)
            .with_timeout(Duration::from_millis(250))
            .idempotent();
        assert_eq!(spec.rate_limit_per_minute(), Some(10));
        assert_eq!(spec.timeout(), Duration::from_millis(250));
        assert!(spec.is_idempotent());
        assert_eq!(spec.definition().function.name, "t");
    }
}
