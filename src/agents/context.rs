//! Per-request execution context.

use crate::trace::TraceScope;

/// Name used for events recorded outside any agent.
pub const ORCHESTRATOR: &str = "orchestrator";

/// Where a piece of work sits within a top-level request.
///
/// # Invariants
/// - `chain` holds the agents active at this point, outermost first
/// - `depth` counts delegations, 0 for the routed agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub request_id: String,
    pub session_id: String,
    pub depth: usize,
    chain: Vec<String>,
    /// Prior conversation, rendered for prompts
    pub history: Option<String>,
}

impl RunContext {
    pub fn new(request_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: session_id.into(),
            depth: 0,
            chain: Vec::new(),
            history: None,
        }
    }

    pub fn with_history(mut self, history: Option<String>) -> Self {
        self.history = history.filter(|h| !h.is_empty());
        self
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Whether `agent` is already running in this request's active path.
    pub fn is_active(&self, agent: &str) -> bool {
        self.chain.iter().any(|a| a == agent)
    }

    /// Context for `agent` taking over at the current depth.
    pub fn enter(&self, agent: &str) -> Self {
        let mut next = self.clone();
        next.chain.push(agent.to_string());
        next
    }

    /// Context one delegation level deeper.
    pub fn descend(&self) -> Self {
        let mut next = self.clone();
        next.depth += 1;
        next
    }

    /// Context for an independent unit of work in the same request.
    pub fn fresh(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            session_id: self.session_id.clone(),
            depth: 0,
            chain: Vec::new(),
            history: None,
        }
    }

    /// Trace scope for the innermost active agent.
    pub fn scope(&self) -> TraceScope {
        let mut active = self.chain.iter().rev();
        let agent = active.next().map(String::as_str).unwrap_or(ORCHESTRATOR);
        let mut scope = TraceScope::new(&self.request_id, agent);
        scope.parent_agent = active.next().cloned();
        scope.depth = self.depth;
        scope
    }
}
