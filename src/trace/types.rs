//! Trace event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a trace event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    Start,
    ModelCall,
    ToolCall,
    Delegate,
    Complete,
    Fail,
}

impl std::fmt::Display for TraceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TraceAction::Start => "start",
            TraceAction::ModelCall => "model_call",
            TraceAction::ToolCall => "tool_call",
            TraceAction::Delegate => "delegate",
            TraceAction::Complete => "complete",
            TraceAction::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// One tool invocation, attached to exactly one `ToolCall` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
}

/// An append-only entry in a request's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    /// Position in the trace, assigned on append
    pub sequence: u64,
    pub agent_name: String,
    /// Agent that delegated to `agent_name`, for events inside a delegated run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_agent: Option<String>,
    /// Receiving agent, for `Delegate` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Delegation depth at which the event happened (0 = routed agent)
    pub depth: usize,
    pub action: TraceAction,
    pub payload_summary: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRecord>,
}

impl TraceEvent {
    pub fn new(
        trace_id: impl Into<String>,
        agent_name: impl Into<String>,
        action: TraceAction,
        payload_summary: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            sequence: 0,
            agent_name: agent_name.into(),
            parent_agent: None,
            target_agent: None,
            depth: 0,
            action,
            payload_summary: payload_summary.into(),
            timestamp: Utc::now(),
            duration_ms: None,
            tool_call: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_agent = Some(target.into());
        self
    }

    pub fn with_tool_call(mut self, record: ToolCallRecord) -> Self {
        self.tool_call = Some(record);
        self
    }
}

/// Where in a request an event is being recorded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceScope {
    pub trace_id: String,
    pub agent: String,
    pub parent_agent: Option<String>,
    pub depth: usize,
}

impl TraceScope {
    pub fn new(trace_id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            agent: agent.into(),
            parent_agent: None,
            depth: 0,
        }
    }

    /// Scope for `child` running one level below this scope.
    pub fn child(&self, child: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            agent: child.into(),
            parent_agent: Some(self.agent.clone()),
            depth: self.depth + 1,
        }
    }

    /// Start an event stamped with this scope.
    pub fn event(&self, action: TraceAction, payload_summary: impl Into<String>) -> TraceEvent {
        let mut event = TraceEvent::new(&self.trace_id, &self.agent, action, payload_summary);
        event.parent_agent = self.parent_agent.clone();
        event.depth = self.depth;
        event
    }
}
