//! Core types for the agent system.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::llm::GatewayError;
use crate::store::{StoreError, TransitionError};
use crate::task::PlanError;
use crate::tools::ToolError;

/// A registered behavior profile.
///
/// # Invariants
/// - `name` is unique within an [`super::AgentRegistry`]
/// - Immutable once registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    name: String,
    description: String,
    capability_tags: BTreeSet<String>,
    delegation_targets: Vec<String>,
    tool_names: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capability_tags: BTreeSet::new(),
            delegation_targets: Vec::new(),
            tool_names: BTreeSet::new(),
            system_prompt: None,
        }
    }

    /// Tags are stored lowercase.
    pub fn with_capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capability_tags
            .extend(tags.into_iter().map(|t| t.into().to_lowercase()));
        self
    }

    /// Targets keep the given order; duplicates are dropped.
    pub fn with_delegation_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for target in targets {
            let target = target.into();
            if !self.delegation_targets.contains(&target) {
                self.delegation_targets.push(target);
            }
        }
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_names.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn capability_tags(&self) -> &BTreeSet<String> {
        &self.capability_tags
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capability_tags.contains(&tag.to_lowercase())
    }

    pub fn delegation_targets(&self) -> &[String] {
        &self.delegation_targets
    }

    pub fn can_delegate_to(&self, target: &str) -> bool {
        self.delegation_targets.iter().any(|t| t == target)
    }

    pub fn tool_names(&self) -> &BTreeSet<String> {
        &self.tool_names
    }

    /// Instructions passed to the gateway for this agent.
    pub fn system_prompt(&self) -> String {
        match &self.system_prompt {
            Some(prompt) => prompt.clone(),
            None => format!("You are {}, an agent that can: {}", self.name, self.description),
        }
    }
}

/// Errors that can occur in agent operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("No agent available: {0}")]
    NoAgentAvailable(String),

    #[error("No final answer after {0} turns")]
    MaxTurnsExceeded(usize),

    #[error("Delegation depth {depth} exceeds maximum {max}")]
    MaxDepthExceeded { depth: usize, max: usize },

    #[error("Cyclic delegation to {agent} (active chain: {})", .chain.join(" -> "))]
    CyclicDelegation { agent: String, chain: Vec<String> },

    #[error("Model unavailable after {attempts} attempts: {message}")]
    ModelUnavailable { attempts: u32, message: String },

    #[error("Model rejected the request: {0}")]
    ModelRejected(String),

    #[error("Request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Step {index} failed: {cause}")]
    StepFailed { index: usize, cause: Box<AgentError> },

    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session state error: {0}")]
    Session(#[from] TransitionError),
}

impl AgentError {
    /// Safety-limit violations: fatal and never retried.
    pub fn is_structural(&self) -> bool {
        match self {
            AgentError::MaxTurnsExceeded(_)
            | AgentError::MaxDepthExceeded { .. }
            | AgentError::CyclicDelegation { .. } => true,
            AgentError::StepFailed { cause, .. } => cause.is_structural(),
            _ => false,
        }
    }
}

impl From<GatewayError> for AgentError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable { attempts, last } => AgentError::ModelUnavailable {
                attempts,
                message: last.to_string(),
            },
            GatewayError::Rejected(err) => AgentError::ModelRejected(err.to_string()),
        }
    }
}
