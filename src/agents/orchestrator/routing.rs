//! Task routing strategies.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::agents::{AgentDefinition, AgentError, AgentRegistry, RunContext};
use crate::llm::{ChatMessage, ModelGateway};
use crate::trace::{TraceAction, Tracer};

/// What the router knows about a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteRequest<'a> {
    pub task: &'a str,
    /// Capability tag requested by the caller
    pub capability: Option<&'a str>,
    /// Agent that handled the previous request in this session
    pub previous_agent: Option<&'a str>,
}

impl<'a> RouteRequest<'a> {
    pub fn new(task: &'a str) -> Self {
        Self {
            task,
            ..Default::default()
        }
    }
}

/// Picks the agent that runs a task.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    async fn route(
        &self,
        request: &RouteRequest<'_>,
        agents: &AgentRegistry,
        ctx: &RunContext,
    ) -> Result<Arc<AgentDefinition>, AgentError>;
}

fn task_words(task: &str) -> BTreeSet<String> {
    task.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Deterministic routing on capability tags.
///
/// # Algorithm
/// 1. An explicit capability hint picks the first agent carrying that tag
/// 2. Otherwise each agent scores one point per tag whose words all occur in
///    the task; the highest score wins, ties go to the earlier registration
/// 3. With no match, the session's previous agent, then the fallback agent
#[derive(Debug, Clone, Default)]
pub struct CapabilityMatch {
    fallback: Option<String>,
}

impl CapabilityMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, agent: impl Into<String>) -> Self {
        self.fallback = Some(agent.into());
        self
    }

    fn score(agent: &AgentDefinition, words: &BTreeSet<String>) -> usize {
        agent
            .capability_tags()
            .iter()
            .filter(|tag| {
                let parts: Vec<String> = task_words(tag).into_iter().collect();
                !parts.is_empty() && parts.iter().all(|p| words.contains(p))
            })
            .count()
    }

    fn select(
        &self,
        request: &RouteRequest<'_>,
        agents: &AgentRegistry,
    ) -> Result<Arc<AgentDefinition>, AgentError> {
        if agents.is_empty() {
            return Err(AgentError::NoAgentAvailable(
                "no agents registered".to_string(),
            ));
        }

        if let Some(tag) = request.capability {
            if let Some(agent) = agents.list().find(|a| a.has_capability(tag)) {
                return Ok(Arc::clone(agent));
            }
            tracing::debug!(capability = tag, "No agent carries requested capability");
        }

        let words = task_words(request.task);
        let mut best: Option<(usize, &Arc<AgentDefinition>)> = None;
        for agent in agents.list() {
            let score = Self::score(agent, &words);
            if score > 0 && best.map_or(true, |(top, _)| score > top) {
                best = Some((score, agent));
            }
        }
        if let Some((_, agent)) = best {
            return Ok(Arc::clone(agent));
        }

        for name in [request.previous_agent, self.fallback.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Ok(agent) = agents.get_shared(name) {
                return Ok(agent);
            }
        }

        Err(AgentError::NoAgentAvailable(format!(
            "no agent matches task '{}'",
            crate::util::truncate(request.task, 80)
        )))
    }
}

#[async_trait]
impl RoutingStrategy for CapabilityMatch {
    async fn route(
        &self,
        request: &RouteRequest<'_>,
        agents: &AgentRegistry,
        ctx: &RunContext,
    ) -> Result<Arc<AgentDefinition>, AgentError> {
        let agent = self.select(request, agents)?;
        tracing::info!(
            request_id = %ctx.request_id,
            agent = agent.name(),
            "Routed task by capability"
        );
        Ok(agent)
    }
}

/// Routing by asking the model to choose one registered agent.
pub struct ModelAssisted {
    gateway: Arc<ModelGateway>,
    tracer: Arc<Tracer>,
}

impl ModelAssisted {
    pub fn new(gateway: Arc<ModelGateway>, tracer: Arc<Tracer>) -> Self {
        Self { gateway, tracer }
    }

    fn build_prompt(agents: &AgentRegistry) -> String {
        let roster = agents
            .list()
            .map(|a| {
                let tags: Vec<&str> = a.capability_tags().iter().map(String::as_str).collect();
                format!("- {}: {} [{}]", a.name(), a.description(), tags.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You route tasks to agents. Choose exactly one of these agents for the user's task:

{roster}

Reply with the agent name only."#
        )
    }

    /// Resolve the model's reply to a registered agent name.
    fn parse_choice(reply: &str, agents: &AgentRegistry) -> Option<Arc<AgentDefinition>> {
        let cleaned = reply
            .trim()
            .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.' || c.is_whitespace());
        if let Some(agent) = agents
            .list()
            .find(|a| a.name().eq_ignore_ascii_case(cleaned))
        {
            return Some(Arc::clone(agent));
        }

        // Accept prose only if it names exactly one agent.
        let words = task_words(reply);
        let mut named = agents
            .list()
            .filter(|a| task_words(a.name()).iter().all(|w| words.contains(w)));
        match (named.next(), named.next()) {
            (Some(agent), None) => Some(Arc::clone(agent)),
            _ => None,
        }
    }
}

#[async_trait]
impl RoutingStrategy for ModelAssisted {
    async fn route(
        &self,
        request: &RouteRequest<'_>,
        agents: &AgentRegistry,
        ctx: &RunContext,
    ) -> Result<Arc<AgentDefinition>, AgentError> {
        if agents.is_empty() {
            return Err(AgentError::NoAgentAvailable(
                "no agents registered".to_string(),
            ));
        }

        let system_prompt = Self::build_prompt(agents);
        let messages = [ChatMessage::user(request.task)];
        let started = Instant::now();
        let result = self.gateway.complete(&system_prompt, &messages, None).await;
        let elapsed = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.tracer.record(
                    ctx.scope()
                        .event(TraceAction::ModelCall, format!("routing failed: {e}"))
                        .with_duration(elapsed),
                );
                return Err(e.into());
            }
        };
        let reply = response.content.unwrap_or_default();
        self.tracer.record(
            ctx.scope()
                .event(TraceAction::ModelCall, format!("routing: {reply}"))
                .with_duration(elapsed),
        );

        match Self::parse_choice(&reply, agents) {
            Some(agent) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    agent = agent.name(),
                    "Routed task by model choice"
                );
                Ok(agent)
            }
            None => Err(AgentError::NoAgentAvailable(format!(
                "model chose unregistered agent '{}'",
                crate::util::truncate(reply.trim(), 80)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDefinition::new("writer", "Writes").with_capabilities(["summarize", "write"]))
            .unwrap();
        registry
            .register(AgentDefinition::new("coder", "Codes").with_capabilities(["code-review", "code"]))
            .unwrap();
        registry
            .register(AgentDefinition::new("scribe", "Also writes").with_capabilities(["write"]))
            .unwrap();
        registry
    }

    fn select(strategy: &CapabilityMatch, request: RouteRequest<'_>) -> Result<String, AgentError> {
        strategy
            .select(&request, &registry())
            .map(|a| a.name().to_string())
    }

    #[test]
    fn test_capability_hint_wins() {
        let strategy = CapabilityMatch::new();
        let request = RouteRequest {
            capability: Some("write"),
            ..RouteRequest::new("review my code")
        };
        assert_eq!(select(&strategy, request).unwrap(), "writer");
    }

    #[test]
    fn test_best_score_then_registration_order() {
        let strategy = CapabilityMatch::new();
        assert_eq!(
            select(&strategy, RouteRequest::new("please code review this patch")).unwrap(),
            "coder"
        );
        // "write" ties between writer and scribe.
        assert_eq!(select(&strategy, RouteRequest::new("write a poem")).unwrap(), "writer");
    }

    #[test]
    fn test_no_match_falls_back() {
        let strategy = CapabilityMatch::new();
        assert!(matches!(
            select(&strategy, RouteRequest::new("bake bread")),
            Err(AgentError::NoAgentAvailable(_))
        ));

        let request = RouteRequest {
            previous_agent: Some("scribe"),
            ..RouteRequest::new("and shorter please")
        };
        assert_eq!(select(&strategy, request).unwrap(), "scribe");

        let strategy = CapabilityMatch::new().with_fallback("coder");
        assert_eq!(select(&strategy, RouteRequest::new("bake bread")).unwrap(), "coder");
    }

    #[test]
    fn test_empty_registry() {
        let result = CapabilityMatch::new().select(&RouteRequest::new("x"), &AgentRegistry::new());
        assert!(matches!(result, Err(AgentError::NoAgentAvailable(_))));
    }

    #[test]
    fn test_parse_model_choice() {
        let agents = registry();
        let pick = |reply: &str| ModelAssisted::parse_choice(reply, &agents).map(|a| a.name().to_string());
        assert_eq!(pick("coder").as_deref(), Some("coder"));
        assert_eq!(pick("`Writer`.").as_deref(), Some("writer"));
        assert_eq!(pick("I would pick the scribe agent").as_deref(), Some("scribe"));
        assert_eq!(pick("writer or scribe"), None);
        assert_eq!(pick("nobody"), None);
    }
}
