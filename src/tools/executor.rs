//! Tool execution with validation, rate limiting, timeouts and tracing.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::{RateLimiter, RegisteredTool, ToolError, ToolRegistry};
use crate::trace::{ToolCallRecord, TraceAction, TraceScope, Tracer};

/// Default bound on concurrently running tool calls per executor.
pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 8;

/// One call in a parallel batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub input: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

/// Runs registered tools on behalf of agents.
///
/// # Guarantees
/// - Input is validated before the rate limit is charged
/// - A handler never runs past its timeout; the future is dropped on expiry
/// - Every attempt is recorded as one `ToolCall` event
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    limiter: RateLimiter,
    tracer: Arc<Tracer>,
    permits: Arc<Semaphore>,
    /// Extra attempts after a timeout, idempotent tools only
    timeout_retries: u32,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, tracer: Arc<Tracer>) -> Self {
        Self {
            registry,
            limiter: RateLimiter::per_minute(),
            tracer,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_PARALLEL_TOOLS)),
            timeout_retries: 1,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_parallel.max(1)));
        self
    }

    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.limiter = RateLimiter::with_window(window);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// Execute a single tool call.
    pub async fn execute(
        &self,
        tool_name: &str,
        input: Value,
        scope: &TraceScope,
    ) -> Result<Value, ToolError> {
        let Some(entry) = self.registry.entry(tool_name) else {
            let err = ToolError::NotFound(tool_name.to_string());
            self.record(scope, tool_name, &input, Err(&err), Duration::ZERO);
            return Err(err);
        };

        if let Err(message) = entry.input.validate(&input) {
            let err = ToolError::Validation {
                tool: tool_name.to_string(),
                message,
            };
            self.record(scope, tool_name, &input, Err(&err), Duration::ZERO);
            return Err(err);
        }

        if let Some(limit) = entry.spec.rate_limit_per_minute() {
            if let Err(retry_after) = self.limiter.try_acquire(tool_name, limit) {
                tracing::warn!(
                    tool = tool_name,
                    limit,
                    ?retry_after,
                    "Tool rate limit reached"
                );
                let err = ToolError::RateLimited {
                    tool: tool_name.to_string(),
                    limit,
                    retry_after,
                };
                self.record(scope, tool_name, &input, Err(&err), Duration::ZERO);
                return Err(err);
            }
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.run_handler(entry, &input).await;
            let elapsed = started.elapsed();
            self.record(scope, tool_name, &input, result.as_ref(), elapsed);

            match result {
                Err(ToolError::Timeout { .. })
                    if entry.spec.is_idempotent() && attempt <= self.timeout_retries =>
                {
                    tracing::warn!(
                        tool = tool_name,
                        attempt,
                        "Idempotent tool timed out, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    /// Execute calls concurrently. Results are independent and in input order.
    pub async fn execute_parallel(
        &self,
        calls: &[ToolInvocation],
        scope: &TraceScope,
    ) -> Vec<Result<Value, ToolError>> {
        let futures = calls.iter().map(|call| async move {
            // The semaphore is never closed.
            let _permit = self.permits.acquire().await.ok();
            self.execute(&call.name, call.input.clone(), scope).await
        });
        join_all(futures).await
    }

    /// Record a call that was refused before reaching the executor.
    pub(crate) fn reject(
        &self,
        scope: &TraceScope,
        tool_name: &str,
        input: &Value,
        err: ToolError,
    ) -> ToolError {
        self.record(scope, tool_name, input, Err(&err), Duration::ZERO);
        err
    }

    async fn run_handler(&self, entry: &RegisteredTool, input: &Value) -> Result<Value, ToolError> {
        let spec = &entry.spec;
        let timeout = spec.timeout();
        let output = match tokio::time::timeout(timeout, spec.handler().execute(input.clone())).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(cause)) => {
                return Err(ToolError::Execution {
                    tool: spec.name().to_string(),
                    cause: format!("{cause:#}"),
                })
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool: spec.name().to_string(),
                    timeout,
                })
            }
        };

        if let Some(contract) = &entry.output {
            contract
                .validate(&output)
                .map_err(|message| ToolError::Execution {
                    tool: spec.name().to_string(),
                    cause: format!("output does not match schema: {message}"),
                })?;
        }
        Ok(output)
    }

    fn record(
        &self,
        scope: &TraceScope,
        tool_name: &str,
        input: &Value,
        result: Result<&Value, &ToolError>,
        elapsed: Duration,
    ) {
        let duration_ms = elapsed.as_millis() as u64;
        let (summary, record) = match result {
            Ok(output) => (
                format!("{tool_name} ok"),
                ToolCallRecord {
                    tool_name: tool_name.to_string(),
                    input: input.clone(),
                    output: Some(output.clone()),
                    error: None,
                    duration_ms,
                    success: true,
                },
            ),
            Err(err) => (
                format!("{tool_name} failed: {err}"),
                ToolCallRecord {
                    tool_name: tool_name.to_string(),
                    input: input.clone(),
                    output: None,
                    error: Some(err.to_string()),
                    duration_ms,
                    success: false,
                },
            ),
        };
        self.tracer.record(
            scope
                .event(TraceAction::ToolCall, summary)
                .with_duration(duration_ms)
                .with_tool_call(record),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolSpec;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn object_schema() -> Value {
        json!({"type": "object"})
    }

    fn executor_with(specs: Vec<ToolSpec>) -> (ToolExecutor, Arc<Tracer>) {
        let mut registry = ToolRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }
        let tracer = Arc::new(Tracer::new());
        (
            ToolExecutor::new(Arc::new(registry), Arc::clone(&tracer)),
            tracer,
        )
    }

    fn scope() -> TraceScope {
        TraceScope::new("req-1", "agent")
    }

    #[tokio::test]
    async fn test_success_is_traced() {
        let (executor, tracer) = executor_with(vec![ToolSpec::from_fn(
            "echo",
            "Echo",
            object_schema(),
            |input| async move { Ok(input) },
        )]);

        let out = executor.execute("echo", json!({"x": 1}), &scope()).await.unwrap();
        assert_eq!(out, json!({"x": 1}));

        let trace = tracer.get_trace("req-1");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].action, TraceAction::ToolCall);
        let record = trace[0].tool_call.as_ref().unwrap();
        assert!(record.success);
        assert_eq!(record.output, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_invalid_input() {
        let schema = json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        });
        let (executor, tracer) = executor_with(vec![ToolSpec::from_fn(
            "get_weather",
            "Weather",
            schema,
            |_| async move { Ok(json!("sunny")) },
        )]);

        let err = executor.execute("nope", json!({}), &scope()).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("nope".to_string()));

        let err = executor
            .execute("get_weather", json!({"city": 3}), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));

        let trace = tracer.get_trace("req-1");
        assert_eq!(trace.len(), 2);
        assert!(trace.iter().all(|e| !e.tool_call.as_ref().unwrap().success));
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let (executor, _) = executor_with(vec![ToolSpec::from_fn(
            "broken",
            "Always fails",
            object_schema(),
            |_| async move { Err(anyhow::anyhow!("disk on fire")) },
        )]);

        let err = executor.execute("broken", json!({}), &scope()).await.unwrap_err();
        match err {
            ToolError::Execution { tool, cause } => {
                assert_eq!(tool, "broken");
                assert!(cause.contains("disk on fire"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_schema_violation() {
        let spec = ToolSpec::from_fn("count", "Count", object_schema(), |_| async move {
            Ok(json!("not a number"))
        })
        .with_output_schema(json!({"type": "integer"}));
        let (executor, _) = executor_with(vec![spec]);

        let err = executor.execute("count", json!({}), &scope()).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_enforced() {
        let spec = ToolSpec::from_fn("slow", "Slow", object_schema(), |_| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!(null))
        })
        .with_timeout(Duration::from_millis(100));
        let (executor, _) = executor_with(vec![spec]);

        let started = Instant::now();
        let err = executor.execute("slow", json!({}), &scope()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(110), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_timeout_retried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let spec = ToolSpec::from_fn("lookup", "Lookup", object_schema(), move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(json!("found"))
            }
        })
        .with_timeout(Duration::from_millis(50))
        .idempotent();
        let (executor, tracer) = executor_with(vec![spec]);

        let out = executor.execute("lookup", json!({}), &scope()).await.unwrap();
        assert_eq!(out, json!("found"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(tracer.get_trace("req-1").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_idempotent_timeout_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let spec = ToolSpec::from_fn("charge", "Charge card", object_schema(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!("charged"))
            }
        })
        .with_timeout(Duration::from_millis(50));
        let (executor, _) = executor_with(vec![spec]);

        let err = executor.execute("charge", json!({}), &scope()).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejects_without_running_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let spec = ToolSpec::from_fn("search", "Search", object_schema(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!([])) }
        })
        .with_rate_limit(2);
        let (executor, _) = executor_with(vec![spec]);

        for _ in 0..2 {
            executor.execute("search", json!({}), &scope()).await.unwrap();
        }
        let err = executor.execute("search", json!({}), &scope()).await.unwrap_err();
        assert!(matches!(err, ToolError::RateLimited { limit: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(executor.execute("search", json!({}), &scope()).await.is_ok());
    }

    #[tokio::test]
    async fn test_parallel_isolates_failures_and_keeps_order() {
        let (executor, tracer) = executor_with(vec![
            ToolSpec::from_fn("double", "Double", object_schema(), |input| async move {
                let n = input["n"].as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            }),
            ToolSpec::from_fn("fail", "Fail", object_schema(), |_| async move {
                Err(anyhow::anyhow!("nope"))
            }),
        ]);

        let calls = vec![
            ToolInvocation::new("double", json!({"n": 1})),
            ToolInvocation::new("fail", json!({})),
            ToolInvocation::new("double", json!({"n": 3})),
        ];
        let results = executor.execute_parallel(&calls, &scope()).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Ok(json!(2)));
        assert!(results[1].is_err());
        assert_eq!(results[2], Ok(json!(6)));
        assert_eq!(tracer.get_trace("req-1").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_calls_overlap() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let b = Arc::clone(&barrier);
        let spec = ToolSpec::from_fn("meet", "Wait for peer", object_schema(), move |_| {
            let b = Arc::clone(&b);
            async move {
                b.wait().await;
                Ok(json!("met"))
            }
        })
        .with_timeout(Duration::from_secs(1));
        let (executor, _) = executor_with(vec![spec]);

        let calls = vec![
            ToolInvocation::new("meet", json!({})),
            ToolInvocation::new("meet", json!({})),
        ];
        let results = executor.execute_parallel(&calls, &scope()).await;
        assert!(results.iter().all(|r| r.is_ok()), "{results:?}");
    }
}
