//! Hierarchical delegation between agents.

use std::sync::Arc;

use async_recursion::async_recursion;
use serde_json::Value;
use tokio::time::Instant;

use super::TurnRunner;
use crate::agents::{AgentDefinition, AgentError, AgentRegistry, RunContext};
use crate::llm::{ChatMessage, ModelGateway};
use crate::trace::{TraceAction, Tracer};
use crate::util::extract_json;

/// Default deepest delegation level.
pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 5;

/// A model's answer to "should this agent hand the task off?".
#[derive(Debug, Clone, PartialEq, Eq)]
struct Decision {
    target: Option<String>,
    reason: String,
}

/// Lets an agent hand a task to one of its delegation targets.
///
/// # Invariants
/// - No agent runs at a depth greater than `max_depth`
/// - No agent appears twice in one request's active chain
pub struct DelegationController {
    agents: Arc<AgentRegistry>,
    gateway: Arc<ModelGateway>,
    tracer: Arc<Tracer>,
    runner: Arc<TurnRunner>,
    max_depth: usize,
}

impl DelegationController {
    pub fn new(
        agents: Arc<AgentRegistry>,
        gateway: Arc<ModelGateway>,
        tracer: Arc<Tracer>,
        runner: Arc<TurnRunner>,
    ) -> Self {
        Self {
            agents,
            gateway,
            tracer,
            runner,
            max_depth: DEFAULT_MAX_DELEGATION_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Run `task` with `agent` at `ctx.depth`, possibly delegating further.
    ///
    /// # Errors
    /// - `MaxDepthExceeded` when `ctx.depth > max_depth`
    /// - `CyclicDelegation` when `agent` is already in the active chain
    #[async_recursion]
    pub async fn delegate(
        &self,
        agent: &AgentDefinition,
        task: &str,
        ctx: &RunContext,
    ) -> Result<String, AgentError> {
        if ctx.depth > self.max_depth {
            tracing::error!(
                request_id = %ctx.request_id,
                agent = agent.name(),
                depth = ctx.depth,
                max = self.max_depth,
                "Delegation depth exceeded"
            );
            return Err(AgentError::MaxDepthExceeded {
                depth: ctx.depth,
                max: self.max_depth,
            });
        }
        if ctx.is_active(agent.name()) {
            tracing::error!(
                request_id = %ctx.request_id,
                agent = agent.name(),
                chain = ?ctx.chain(),
                "Cyclic delegation"
            );
            return Err(AgentError::CyclicDelegation {
                agent: agent.name().to_string(),
                chain: ctx.chain().to_vec(),
            });
        }

        let here = ctx.enter(agent.name());

        if !agent.delegation_targets().is_empty() {
            let decision = self.decide(agent, task, &here).await?;
            if let Some(target) = decision.target {
                let child = self.agents.get_shared(&target)?;
                self.tracer.record(
                    here.scope()
                        .event(TraceAction::Delegate, decision.reason)
                        .with_target(&target),
                );
                tracing::info!(
                    request_id = %ctx.request_id,
                    from = agent.name(),
                    to = %target,
                    depth = here.depth + 1,
                    "Delegating task"
                );
                return self.delegate(&child, task, &here.descend()).await;
            }
        }

        self.runner
            .run_turn_loop(agent, initial_messages(task, &here), &here)
            .await
    }

    /// Ask the model whether `agent` should hand `task` to one of its targets.
    async fn decide(
        &self,
        agent: &AgentDefinition,
        task: &str,
        ctx: &RunContext,
    ) -> Result<Decision, AgentError> {
        let system_prompt = self.decision_prompt(agent);
        let messages = [ChatMessage::user(task)];
        let started = Instant::now();
        let result = self.gateway.complete(&system_prompt, &messages, None).await;
        let elapsed = started.elapsed().as_millis() as u64;

        let reply = match result {
            Ok(response) => response.content.unwrap_or_default(),
            Err(e) => {
                self.tracer.record(
                    ctx.scope()
                        .event(TraceAction::ModelCall, format!("delegation decision failed: {e}"))
                        .with_duration(elapsed),
                );
                return Err(e.into());
            }
        };
        self.tracer.record(
            ctx.scope()
                .event(TraceAction::ModelCall, format!("delegation decision: {reply}"))
                .with_duration(elapsed),
        );

        let decision = parse_decision(&reply);
        match &decision.target {
            Some(target) if !agent.can_delegate_to(target) => {
                tracing::warn!(
                    agent = agent.name(),
                    target = %target,
                    "Model named a non-target agent, running locally"
                );
                Ok(Decision {
                    target: None,
                    reason: decision.reason,
                })
            }
            Some(target) if !self.agents.contains(target) => {
                tracing::warn!(
                    agent = agent.name(),
                    target = %target,
                    "Delegation target is not registered, running locally"
                );
                Ok(Decision {
                    target: None,
                    reason: decision.reason,
                })
            }
            _ => Ok(decision),
        }
    }

    fn decision_prompt(&self, agent: &AgentDefinition) -> String {
        let targets = agent
            .delegation_targets()
            .iter()
            .map(|name| match self.agents.get(name) {
                Ok(target) => format!("- {}: {}", name, target.description()),
                Err(_) => format!("- {}", name),
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"{instructions}

You may hand the user's task to one of these agents instead of doing it yourself:
{targets}

Respond with ONLY a JSON object:
{{"delegate": true or false, "target": "<agent name or null>", "reason": "<one sentence>"}}"#,
            instructions = agent.system_prompt(),
        )
    }
}

/// Messages that open an agent's turn loop.
pub(crate) fn initial_messages(task: &str, ctx: &RunContext) -> Vec<ChatMessage> {
    match &ctx.history {
        Some(history) => vec![
            ChatMessage::user(format!("Conversation so far:\n\n{history}")),
            ChatMessage::user(task),
        ],
        None => vec![ChatMessage::user(task)],
    }
}

/// Anything other than an explicit yes with a target is a no.
fn parse_decision(reply: &str) -> Decision {
    let Some(value) = extract_json(reply) else {
        tracing::warn!("Unparseable delegation decision, running locally");
        return Decision {
            target: None,
            reason: String::new(),
        };
    };

    let delegate = value.get("delegate").and_then(Value::as_bool).unwrap_or(false);
    let target = value
        .get("target")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Decision {
        target: if delegate { target } else { None },
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision() {
        let yes = parse_decision(r#"{"delegate": true, "target": "researcher", "reason": "needs sources"}"#);
        assert_eq!(yes.target.as_deref(), Some("researcher"));
        assert_eq!(yes.reason, "needs sources");

        let no = parse_decision(r#"{"delegate": false, "target": "researcher"}"#);
        assert_eq!(no.target, None);

        let fenced = parse_decision("```json\n{\"delegate\": true, \"target\": \"writer\"}\n```");
        assert_eq!(fenced.target.as_deref(), Some("writer"));

        assert_eq!(parse_decision("I'll do it myself").target, None);
        assert_eq!(parse_decision(r#"{"delegate": true, "target": null}"#).target, None);
    }

    #[test]
    fn test_initial_messages_include_history() {
        let ctx = RunContext::new("r", "s").with_history(Some("USER: hi\n\n".to_string()));
        let messages = initial_messages("next", &ctx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text_content(), Some("next"));

        let bare = initial_messages("next", &RunContext::new("r", "s"));
        assert_eq!(bare.len(), 1);
    }
}
