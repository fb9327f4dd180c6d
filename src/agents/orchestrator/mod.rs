//! Orchestrator - routes requests to agents and drives them to an answer.
//!
//! # Request Flow
//! ```text
//! 1. Acquire the session lock, load or create SessionState
//! 2. Route the task to an agent (RoutingStrategy)
//! 3. Run it: delegation controller -> turn loop, or decompose -> steps -> synthesis
//! 4. Append the turn to history, persist state, close the trace
//! ```

mod delegation;
mod executor;
mod planner;
mod routing;

pub use delegation::{DelegationController, DEFAULT_MAX_DELEGATION_DEPTH};
pub use executor::{TurnRunner, DEFAULT_MAX_TURNS};
pub use planner::Planner;
pub use routing::{CapabilityMatch, ModelAssisted, RouteRequest, RoutingStrategy};

use std::sync::Arc;

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{AgentDefinition, AgentError, AgentRegistry, RunContext, ORCHESTRATOR};
use crate::config::Config;
use crate::llm::{ChatMessage, LlmClient, ModelGateway, Role};
use crate::store::{InMemoryStore, KeyValueStore, SessionLocks, SessionState, SessionStatus, StateStore};
use crate::task::TaskPlan;
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::trace::{TraceEvent, Tracer};
use crate::util::build_history_context;

/// How a request is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Route to one agent, which may delegate
    #[default]
    Direct,
    /// Split into ordered steps, run each, then synthesize
    Decompose,
}

/// A caller's request.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub session_id: String,
    pub task: String,
    /// Capability tag to route on, overriding task-text matching
    pub capability: Option<String>,
    pub mode: ExecutionMode,
    /// Cancels the request cooperatively
    pub cancel: Option<CancellationToken>,
}

impl TaskRequest {
    pub fn new(session_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task: task.into(),
            capability: None,
            mode: ExecutionMode::Direct,
            cancel: None,
        }
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capability = Some(tag.into());
        self
    }

    pub fn decompose(mut self) -> Self {
        self.mode = ExecutionMode::Decompose;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A completed request.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub request_id: String,
    /// Agent that produced the answer (`orchestrator` for decomposed runs)
    pub agent_name: String,
    pub output: String,
    pub trace: Vec<TraceEvent>,
    pub session: SessionState,
}

/// A failed request, with the trace recorded up to the failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("request {request_id} failed: {error}")]
pub struct RunFailure {
    pub request_id: String,
    #[source]
    pub error: AgentError,
    pub trace: Vec<TraceEvent>,
}

/// The top-level runtime.
///
/// Registries are fixed at build time; the state store is the only shared
/// mutable resource.
pub struct Orchestrator {
    config: Config,
    agents: Arc<AgentRegistry>,
    tools: Arc<ToolExecutor>,
    tracer: Arc<Tracer>,
    state: Arc<StateStore>,
    locks: SessionLocks,
    router: Arc<dyn RoutingStrategy>,
    runner: Arc<TurnRunner>,
    delegation: DelegationController,
    planner: Planner,
}

impl Orchestrator {
    pub fn builder(client: Arc<dyn LlmClient>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(client)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.tools
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Pick the agent for a task.
    pub async fn route(
        &self,
        request: &RouteRequest<'_>,
        ctx: &RunContext,
    ) -> Result<Arc<AgentDefinition>, AgentError> {
        self.router.route(request, &self.agents, ctx).await
    }

    /// Run `agent`'s turn loop directly, without a delegation decision.
    pub async fn run_turn_loop(
        &self,
        agent: &AgentDefinition,
        messages: Vec<ChatMessage>,
        ctx: &RunContext,
    ) -> Result<String, AgentError> {
        self.runner
            .run_turn_loop(agent, messages, &ctx.enter(agent.name()))
            .await
    }

    /// Run `task` with `agent`, letting it delegate.
    pub async fn delegate(
        &self,
        agent: &AgentDefinition,
        task: &str,
        ctx: &RunContext,
    ) -> Result<String, AgentError> {
        self.delegation.delegate(agent, task, ctx).await
    }

    /// Plan, run every step in order, then synthesize.
    pub async fn decompose_and_run(&self, task: &str, ctx: &RunContext) -> Result<String, AgentError> {
        let mut plan = self.planner.plan(task, ctx).await?;
        self.execute_plan(&mut plan, ctx).await?;
        self.planner.synthesize(&plan, ctx).await
    }

    /// Run the pending steps of `plan` in strict sequence.
    ///
    /// # Postconditions
    /// - On `Ok`, every step is completed
    /// - On `StepFailed { index }`, exactly steps `0..index` are completed
    pub async fn execute_plan(&self, plan: &mut TaskPlan, ctx: &RunContext) -> Result<(), AgentError> {
        while let Some(index) = plan.next_pending() {
            let prompt = Planner::step_prompt(plan, index);
            let step_ctx = ctx.fresh();
            let step = async {
                let agent = self.route(&RouteRequest::new(&prompt), &step_ctx).await?;
                self.delegate(&agent, &prompt, &step_ctx).await
            };

            match step.await {
                Ok(result) => {
                    tracing::debug!(request_id = %ctx.request_id, step = index, "Step completed");
                    plan.mark_completed(index, result)?;
                }
                Err(cause) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        step = index,
                        "Step failed: {}",
                        cause
                    );
                    return Err(AgentError::StepFailed {
                        index,
                        cause: Box::new(cause),
                    });
                }
            }
        }
        Ok(())
    }

    /// Handle one top-level request end to end.
    pub async fn handle(&self, request: TaskRequest) -> Result<RunOutcome, RunFailure> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let guard = self.locks.acquire(&request.session_id).await;

        tracing::info!(
            request_id = %request_id,
            session_id = %request.session_id,
            "Handling request"
        );
        self.tracer.start(&request_id, ORCHESTRATOR, &request.task);

        let result = self.handle_locked(&request_id, &request).await;
        let elapsed = started.elapsed().as_millis() as u64;
        drop(guard);
        self.locks.prune();

        match result {
            Ok((agent_name, output, session)) => {
                self.tracer.complete(&request_id, ORCHESTRATOR, &output, elapsed);
                Ok(RunOutcome {
                    trace: self.tracer.get_trace(&request_id),
                    request_id,
                    agent_name,
                    output,
                    session,
                })
            }
            Err(error) => {
                if error.is_structural() {
                    tracing::error!(request_id = %request_id, "Request failed: {}", error);
                } else {
                    tracing::warn!(request_id = %request_id, "Request failed: {}", error);
                }
                self.tracer
                    .fail(&request_id, ORCHESTRATOR, &error.to_string(), elapsed);
                Err(RunFailure {
                    trace: self.tracer.get_trace(&request_id),
                    request_id,
                    error,
                })
            }
        }
    }

    async fn handle_locked(
        &self,
        request_id: &str,
        request: &TaskRequest,
    ) -> Result<(String, String, SessionState), AgentError> {
        let mut session = self
            .state
            .load(&request.session_id)
            .await?
            .unwrap_or_else(|| SessionState::new(&request.session_id));

        match session.status() {
            SessionStatus::Pending => {}
            SessionStatus::InProgress => {
                // Left over from a request that never finished.
                tracing::warn!(
                    session_id = %session.session_id,
                    "Session was still in progress, marking failed"
                );
                session.fail()?;
                session.reopen()?;
            }
            SessionStatus::Completed | SessionStatus::Failed => session.reopen()?,
        }
        session.start()?;
        self.state.save(&mut session).await?;

        let history = build_history_context(&session.history_pairs(), self.config.history_max_chars);
        let ctx = RunContext::new(request_id, &request.session_id).with_history(Some(history));

        let outcome = self.run_bounded(request, &session, &ctx).await;

        session.push_turn(Role::User, &request.task);
        session
            .task_state
            .insert("last_request_id".to_string(), json!(request_id));
        let result = match outcome {
            Ok((agent_name, output)) => {
                session.push_turn(Role::Assistant, &output);
                session.agent_name = Some(agent_name.clone());
                session.complete()?;
                Ok((agent_name, output))
            }
            Err(error) => {
                session.fail()?;
                Err(error)
            }
        };
        self.state.save(&mut session).await?;

        let (agent_name, output) = result?;
        Ok((agent_name, output, session))
    }

    /// Run the request body under the deadline and the caller's cancel token.
    async fn run_bounded(
        &self,
        request: &TaskRequest,
        session: &SessionState,
        ctx: &RunContext,
    ) -> Result<(String, String), AgentError> {
        let body = async {
            match request.mode {
                ExecutionMode::Direct => {
                    let route = RouteRequest {
                        task: &request.task,
                        capability: request.capability.as_deref(),
                        previous_agent: session.agent_name.as_deref(),
                    };
                    let agent = self.route(&route, ctx).await?;
                    let output = self.delegate(&agent, &request.task, ctx).await?;
                    Ok::<_, AgentError>((agent.name().to_string(), output))
                }
                ExecutionMode::Decompose => {
                    let output = self.decompose_and_run(&request.task, ctx).await?;
                    Ok::<_, AgentError>((ORCHESTRATOR.to_string(), output))
                }
            }
        };

        let deadline = self.config.request_timeout;
        let bounded = async {
            tokio::time::timeout(deadline, body)
                .await
                .unwrap_or(Err(AgentError::DeadlineExceeded(deadline)))
        };

        match &request.cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                result = bounded => result,
            },
            None => bounded.await,
        }
    }
}

/// Builds an [`Orchestrator`] from its collaborators.
pub struct OrchestratorBuilder {
    client: Arc<dyn LlmClient>,
    config: Config,
    agents: AgentRegistry,
    tools: ToolRegistry,
    backend: Option<Arc<dyn KeyValueStore>>,
    router: Option<Arc<dyn RoutingStrategy>>,
    tracer: Option<Arc<Tracer>>,
}

impl OrchestratorBuilder {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            config: Config::default(),
            agents: AgentRegistry::new(),
            tools: ToolRegistry::new(),
            backend: None,
            router: None,
            tracer: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Session storage backend. Defaults to [`InMemoryStore`].
    pub fn state_backend(mut self, backend: Arc<dyn KeyValueStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Routing strategy. Defaults to [`CapabilityMatch`].
    pub fn router(mut self, router: Arc<dyn RoutingStrategy>) -> Self {
        self.router = Some(router);
        self
    }

    /// Tracer. Defaults to one that logs every event and keeps
    /// `Config::trace_retention` traces.
    pub fn tracer(mut self, tracer: Arc<Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Gateway this builder would give the orchestrator, for strategies built by hand.
    pub fn gateway(&self) -> Arc<ModelGateway> {
        Arc::new(ModelGateway::new(
            Arc::clone(&self.client),
            self.config.default_model.clone(),
            self.config.retry_config(),
        ))
    }

    pub fn build(self) -> Orchestrator {
        let problems = self.agents.validate_references(&self.tools);
        if !problems.is_empty() {
            tracing::warn!(count = problems.len(), "Agent registry has dangling references");
        }

        let gateway = self.gateway();
        let config = self.config;
        let tracer = self.tracer.unwrap_or_else(|| {
            Arc::new(Tracer::with_logging().with_retention(config.trace_retention))
        });
        let agents = Arc::new(self.agents);
        let tools = Arc::new(
            ToolExecutor::new(Arc::new(self.tools), Arc::clone(&tracer))
                .with_max_parallel(config.max_parallel_tools)
                .with_rate_window(config.rate_limit_window),
        );
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let state = Arc::new(StateStore::new(backend, config.session_ttl));
        let router = self
            .router
            .unwrap_or_else(|| Arc::new(CapabilityMatch::new()));

        let runner = Arc::new(
            TurnRunner::new(Arc::clone(&gateway), Arc::clone(&tools))
                .with_max_turns(config.max_turns)
                .with_failure_policy(config.tool_failure_policy),
        );
        let delegation = DelegationController::new(
            Arc::clone(&agents),
            Arc::clone(&gateway),
            Arc::clone(&tracer),
            Arc::clone(&runner),
        )
        .with_max_depth(config.max_delegation_depth);
        let planner = Planner::new(gateway, Arc::clone(&tracer));

        Orchestrator {
            config,
            agents,
            tools,
            tracer,
            state,
            locks: SessionLocks::new(),
            router,
            runner,
            delegation,
            planner,
        }
    }
}
