//! Agents module - definitions, routing and execution.
//!
//! # Pieces
//! - **AgentDefinition**: immutable behavior profile (instructions, tags, tools, delegation targets)
//! - **AgentRegistry**: name-unique set of definitions, fixed at startup
//! - **RunContext**: where a unit of work sits within a request (depth, active chain)
//! - **Orchestrator**: routes a request, runs turn loops, delegation and decomposition

mod context;
mod registry;
mod types;
pub mod orchestrator;

pub use context::{RunContext, ORCHESTRATOR};
pub use orchestrator::{
    CapabilityMatch, DelegationController, ExecutionMode, ModelAssisted, Orchestrator,
    OrchestratorBuilder, Planner, RouteRequest, RoutingStrategy, RunFailure, RunOutcome,
    TaskRequest, TurnRunner,
};
pub use registry::AgentRegistry;
pub use types::{AgentDefinition, AgentError};
