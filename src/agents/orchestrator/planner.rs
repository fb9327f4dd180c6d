//! Task decomposition and synthesis prompts.

use std::sync::Arc;

use tokio::time::Instant;

use crate::agents::{AgentError, RunContext};
use crate::llm::{ChatMessage, ModelGateway};
use crate::task::{TaskPlan, MAX_STEPS, MIN_STEPS};
use crate::trace::{TraceAction, Tracer};

/// Model calls that bracket a decomposed run.
pub struct Planner {
    gateway: Arc<ModelGateway>,
    tracer: Arc<Tracer>,
}

impl Planner {
    pub fn new(gateway: Arc<ModelGateway>, tracer: Arc<Tracer>) -> Self {
        Self { gateway, tracer }
    }

    /// Ask the model to split `task` into ordered steps.
    pub async fn plan(&self, task: &str, ctx: &RunContext) -> Result<TaskPlan, AgentError> {
        let system_prompt = format!(
            r#"You are a planning assistant. Split the user's task into {MIN_STEPS} to {MAX_STEPS} ordered steps.
Each step is carried out in sequence and sees the results of the steps before it.

Respond with ONLY a JSON object:
{{"steps": ["first step", "second step", "..."]}}"#
        );
        let reply = self
            .call(&system_prompt, &[ChatMessage::user(task)], ctx, "plan")
            .await?;

        let plan = TaskPlan::from_model_reply(task, &reply)?;
        tracing::info!(
            request_id = %ctx.request_id,
            task_id = %plan.task_id(),
            steps = plan.len(),
            "Decomposed task"
        );
        Ok(plan)
    }

    /// Prompt for the next pending step of `plan`.
    pub fn step_prompt(plan: &TaskPlan, index: usize) -> String {
        let step = plan.steps().get(index).map(String::as_str).unwrap_or_default();
        let prior = plan.prior_results();
        let prior = if prior.is_empty() {
            "None yet.".to_string()
        } else {
            prior
        };
        format!(
            "Overall task: {}\n\nCompleted steps:\n{}\n\nCurrent step ({} of {}): {}",
            plan.original_task(),
            prior,
            index + 1,
            plan.len(),
            step
        )
    }

    /// Combine every step result into the final answer.
    pub async fn synthesize(&self, plan: &TaskPlan, ctx: &RunContext) -> Result<String, AgentError> {
        let system_prompt = "Combine the results of the completed steps into one final answer \
                             to the original task. Do not mention the steps themselves.";
        let user = format!(
            "Original task: {}\n\n{}",
            plan.original_task(),
            plan.prior_results()
        );
        self.call(system_prompt, &[ChatMessage::user(user)], ctx, "synthesis")
            .await
    }

    async fn call(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        ctx: &RunContext,
        purpose: &str,
    ) -> Result<String, AgentError> {
        let started = Instant::now();
        let result = self.gateway.complete(system_prompt, messages, None).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let reply = response.content.unwrap_or_default();
                self.tracer.record(
                    ctx.scope()
                        .event(TraceAction::ModelCall, format!("{purpose}: {reply}"))
                        .with_duration(elapsed),
                );
                Ok(reply)
            }
            Err(e) => {
                self.tracer.record(
                    ctx.scope()
                        .event(TraceAction::ModelCall, format!("{purpose} failed: {e}"))
                        .with_duration(elapsed),
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_prompt_carries_prior_results() {
        let mut plan = TaskPlan::new(
            "write a report",
            vec!["research".into(), "outline".into(), "draft".into()],
        )
        .unwrap();
        let first = Planner::step_prompt(&plan, 0);
        assert!(first.contains("Current step (1 of 3): research"));
        assert!(first.contains("None yet."));

        plan.mark_completed(0, "three sources").unwrap();
        let second = Planner::step_prompt(&plan, 1);
        assert!(second.contains("Result: three sources"));
        assert!(second.contains("Current step (2 of 3): outline"));
    }
}
