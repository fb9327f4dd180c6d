//! Task decomposition.
//!
//! A [`TaskPlan`] lives for one top-level request: created when the
//! orchestrator decomposes a task, filled in step by step, discarded when
//! the request ends.

mod plan;

pub use plan::{PlanError, TaskId, TaskPlan, MAX_STEPS, MIN_STEPS};
