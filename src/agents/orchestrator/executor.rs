//! The agent turn loop: model -> tools -> model ... -> final answer.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;

use crate::agents::{AgentDefinition, AgentError, RunContext};
use crate::config::ToolFailurePolicy;
use crate::llm::{ChatMessage, ModelGateway, ToolCall};
use crate::tools::{ToolError, ToolExecutor, ToolInvocation};
use crate::trace::{TraceAction, TraceScope};
use crate::util::truncate;

/// Default turn cap per loop.
pub const DEFAULT_MAX_TURNS: usize = 15;

/// Runs an agent's bounded turn loop.
///
/// # Algorithm
/// 1. Call the model with the agent's instructions and permitted tool schemas
/// 2. A final answer ends the loop
/// 3. Requested tool calls run in parallel; results are appended in call order
/// 4. Repeat, at most `max_turns` model calls
pub struct TurnRunner {
    gateway: Arc<ModelGateway>,
    tools: Arc<ToolExecutor>,
    max_turns: usize,
    failure_policy: ToolFailurePolicy,
}

impl TurnRunner {
    pub fn new(gateway: Arc<ModelGateway>, tools: Arc<ToolExecutor>) -> Self {
        Self {
            gateway,
            tools,
            max_turns: DEFAULT_MAX_TURNS,
            failure_policy: ToolFailurePolicy::default(),
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: ToolFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Run `agent` on `messages` until it produces a final answer.
    ///
    /// `ctx` must already have `agent` entered.
    ///
    /// # Errors
    /// - `MaxTurnsExceeded` if no final answer within `max_turns` model calls
    /// - Model errors once the gateway gave up
    /// - Tool errors under [`ToolFailurePolicy::Abort`]
    pub async fn run_turn_loop(
        &self,
        agent: &AgentDefinition,
        mut messages: Vec<ChatMessage>,
        ctx: &RunContext,
    ) -> Result<String, AgentError> {
        let scope = ctx.scope();
        let system_prompt = agent.system_prompt();
        let schemas = self.tools.registry().schemas_for(agent.tool_names());
        let tools = (!schemas.is_empty()).then_some(schemas.as_slice());
        let tracer = self.tools.tracer();

        for turn in 1..=self.max_turns {
            tracing::debug!(
                request_id = %ctx.request_id,
                agent = agent.name(),
                "Turn {}",
                turn
            );

            let started = Instant::now();
            let result = self.gateway.complete(&system_prompt, &messages, tools).await;
            let elapsed = started.elapsed().as_millis() as u64;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    tracer.record(
                        scope
                            .event(TraceAction::ModelCall, format!("turn {turn} failed: {e}"))
                            .with_duration(elapsed),
                    );
                    return Err(e.into());
                }
            };

            let Some(calls) = response.requested_tool_calls() else {
                let answer = response.content.clone().unwrap_or_default();
                tracer.record(
                    scope
                        .event(
                            TraceAction::ModelCall,
                            format!("turn {turn}: {}", truncate(&answer, 120)),
                        )
                        .with_duration(elapsed),
                );
                return Ok(answer);
            };

            let names: Vec<&str> = calls.iter().map(|c| c.function.name.as_str()).collect();
            tracer.record(
                scope
                    .event(
                        TraceAction::ModelCall,
                        format!("turn {turn}: requested {}", names.join(", ")),
                    )
                    .with_duration(elapsed),
            );

            let calls = calls.to_vec();
            let results = self.run_tools(agent, &calls, &scope).await;
            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                calls.clone(),
            ));

            for (call, result) in calls.iter().zip(results) {
                let content = match result {
                    Ok(output) => match output {
                        Value::String(s) => s,
                        other => other.to_string(),
                    },
                    Err(err) => {
                        tracing::warn!(
                            request_id = %ctx.request_id,
                            agent = agent.name(),
                            tool = err.tool(),
                            "Tool call failed: {}",
                            err
                        );
                        if self.failure_policy == ToolFailurePolicy::Abort {
                            return Err(err.into());
                        }
                        format!("Error: {}", err)
                    }
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), content));
            }
        }

        tracing::error!(
            request_id = %ctx.request_id,
            agent = agent.name(),
            max_turns = self.max_turns,
            "Turn limit reached without a final answer"
        );
        Err(AgentError::MaxTurnsExceeded(self.max_turns))
    }

    /// Execute one turn's tool calls. Results line up with `calls`.
    async fn run_tools(
        &self,
        agent: &AgentDefinition,
        calls: &[ToolCall],
        scope: &TraceScope,
    ) -> Vec<Result<Value, ToolError>> {
        let mut results: Vec<Option<Result<Value, ToolError>>> = Vec::with_capacity(calls.len());
        let mut runnable = Vec::new();
        let mut slots = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            let name = call.function.name.as_str();
            let parsed = parse_arguments(&call.function.arguments);
            let admitted = if !agent.tool_names().contains(name) {
                Err((
                    ToolError::NotFound(name.to_string()),
                    parsed.unwrap_or(Value::Null),
                ))
            } else {
                parsed.map_err(|message| {
                    (
                        ToolError::Validation {
                            tool: name.to_string(),
                            message,
                        },
                        Value::String(call.function.arguments.clone()),
                    )
                })
            };

            match admitted {
                Ok(input) => {
                    results.push(None);
                    slots.push(i);
                    runnable.push(ToolInvocation::new(name, input));
                }
                Err((err, input)) => {
                    results.push(Some(Err(self.tools.reject(scope, name, &input, err))));
                }
            }
        }

        let outputs = self.tools.execute_parallel(&runnable, scope).await;
        for (slot, output) in slots.into_iter().zip(outputs) {
            results[slot] = Some(output);
        }

        results
            .into_iter()
            .zip(calls)
            .map(|(result, call)| {
                result.unwrap_or_else(|| Err(ToolError::NotFound(call.function.name.clone())))
            })
            .collect()
    }
}

/// Model-supplied arguments; an empty string means no arguments.
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(""), Ok(json!({})));
        assert_eq!(parse_arguments(r#"{"q": "rust"}"#), Ok(json!({"q": "rust"})));
        assert!(parse_arguments("{not json").is_err());
    }
}
