//! # switchboard
//!
//! Agent orchestration runtime.
//!
//! This library provides:
//! - A registry of agents (instructions, capability tags, tools, delegation targets)
//! - A tool registry and executor with schema validation, rate limits and timeouts
//! - An orchestrator that routes requests, runs bounded turn loops, delegates
//!   between agents and decomposes tasks into ordered steps
//! - Session state over pluggable key-value backends (memory, SQLite)
//! - Per-request traces with a graph view
//!
//! ## Architecture
//!
//! ```text
//!   TaskRequest ──▶ Orchestrator ──▶ RoutingStrategy ──▶ AgentDefinition
//!                       │
//!                       ├──▶ DelegationController ──▶ TurnRunner ──▶ ModelGateway
//!                       │                                  │
//!                       │                                  └──▶ ToolExecutor ──▶ Tool
//!                       ├──▶ Planner (decompose / synthesize)
//!                       ├──▶ StateStore ──▶ KeyValueStore
//!                       └──▶ Tracer ──▶ sinks
//! ```
//!
//! ## Request Flow
//! 1. Lock the session and load its state
//! 2. Route the task to an agent
//! 3. Run it (directly, delegated, or decomposed into steps)
//! 4. Record the turn, save the session, close the trace
//!
//! ## Modules
//! - `agents`: definitions, registry, orchestrator
//! - `tools`: tool contracts, registry, executor
//! - `llm`: model gateway and provider trait
//! - `store`: key-value backends and session state
//! - `trace`: per-request event log
//! - `task`: task decomposition plans

pub mod agents;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod store;
pub mod task;
pub mod tools;
pub mod trace;
pub mod util;

pub use agents::{
    AgentDefinition, AgentError, AgentRegistry, ExecutionMode, Orchestrator, RunFailure,
    RunOutcome, TaskRequest,
};
pub use config::{Config, ToolFailurePolicy};
pub use error::RegistryError;
pub use llm::{ChatMessage, ChatResponse, LlmClient, ModelGateway};
pub use store::{InMemoryStore, KeyValueStore, SessionState, SqliteStore, StateStore};
pub use tools::{ToolError, ToolExecutor, ToolRegistry, ToolSpec};
pub use trace::{TraceAction, TraceEvent, TraceGraph, Tracer};
