//! Ordered decomposition of a task into sequential steps.
//!
//! # Invariants
//! - `MIN_STEPS <= steps.len() <= MAX_STEPS`
//! - `completed_steps ⊆ {0..steps.len()-1}` and is always a prefix `{0..k-1}`
//! - `results` has exactly the keys in `completed_steps`

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::util::extract_json;

/// Fewest steps a decomposition may have.
pub const MIN_STEPS: usize = 3;
/// Most steps a decomposition may have.
pub const MAX_STEPS: usize = 7;

/// Unique identifier for a decomposed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Plan has {count} steps, at least {min} required")]
    TooFewSteps { count: usize, min: usize },

    #[error("Plan has {count} steps, at most {max} allowed")]
    TooManySteps { count: usize, max: usize },

    #[error("Step {index} has an empty description")]
    EmptyStep { index: usize },

    #[error("Step index {index} out of range for a plan of {len} steps")]
    StepOutOfRange { index: usize, len: usize },

    #[error("Step {index} completed out of order, step {expected} is next")]
    OutOfOrder { index: usize, expected: usize },

    #[error("Could not parse plan: {0}")]
    Unparseable(String),
}

/// A task split into ordered steps, with results accumulated as they run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    task_id: TaskId,
    original_task: String,
    steps: Vec<String>,
    completed_steps: BTreeSet<usize>,
    results: BTreeMap<usize, String>,
}

impl TaskPlan {
    /// Create a plan.
    ///
    /// # Errors
    /// Returns `Err` if the step count is outside `MIN_STEPS..=MAX_STEPS`
    /// or a step is blank.
    pub fn new(original_task: impl Into<String>, steps: Vec<String>) -> Result<Self, PlanError> {
        let steps: Vec<String> = steps.into_iter().map(|s| s.trim().to_string()).collect();
        if steps.len() < MIN_STEPS {
            return Err(PlanError::TooFewSteps {
                count: steps.len(),
                min: MIN_STEPS,
            });
        }
        if steps.len() > MAX_STEPS {
            return Err(PlanError::TooManySteps {
                count: steps.len(),
                max: MAX_STEPS,
            });
        }
        if let Some(index) = steps.iter().position(|s| s.is_empty()) {
            return Err(PlanError::EmptyStep { index });
        }

        Ok(Self {
            task_id: TaskId::new(),
            original_task: original_task.into(),
            steps,
            completed_steps: BTreeSet::new(),
            results: BTreeMap::new(),
        })
    }

    /// Parse a model reply of the form `{"steps": [...]}` or a bare array.
    ///
    /// Steps may be strings or objects with a `description` field.
    pub fn from_model_reply(original_task: impl Into<String>, reply: &str) -> Result<Self, PlanError> {
        let value = extract_json(reply)
            .ok_or_else(|| PlanError::Unparseable("no JSON found in reply".to_string()))?;

        let items = match &value {
            Value::Array(items) => items,
            Value::Object(map) => map
                .get("steps")
                .and_then(Value::as_array)
                .ok_or_else(|| PlanError::Unparseable("missing \"steps\" array".to_string()))?,
            _ => return Err(PlanError::Unparseable("expected an object or array".to_string())),
        };

        let steps = items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Object(map) => map
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .ok_or(PlanError::EmptyStep { index }),
                _ => Err(PlanError::EmptyStep { index }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(original_task, steps)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn original_task(&self) -> &str {
        &self.original_task
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn completed_steps(&self) -> &BTreeSet<usize> {
        &self.completed_steps
    }

    pub fn results(&self) -> &BTreeMap<usize, String> {
        &self.results
    }

    /// Index of the next step to run, `None` once every step is done.
    pub fn next_pending(&self) -> Option<usize> {
        let next = self.completed_steps.len();
        (next < self.steps.len()).then_some(next)
    }

    pub fn is_complete(&self) -> bool {
        self.next_pending().is_none()
    }

    /// Record the result of step `index`.
    ///
    /// # Precondition
    /// `index == self.next_pending()`
    pub fn mark_completed(&mut self, index: usize, result: impl Into<String>) -> Result<(), PlanError> {
        if index >= self.steps.len() {
            return Err(PlanError::StepOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        match self.next_pending() {
            Some(expected) if expected == index => {
                self.completed_steps.insert(index);
                self.results.insert(index, result.into());
                Ok(())
            }
            Some(expected) => Err(PlanError::OutOfOrder { index, expected }),
            None => Err(PlanError::OutOfOrder {
                index,
                expected: self.steps.len(),
            }),
        }
    }

    /// Completed steps and their results, formatted for the next prompt.
    pub fn prior_results(&self) -> String {
        self.results
            .iter()
            .map(|(index, result)| {
                format!("Step {}: {}\nResult: {}", index + 1, self.steps[*index], result)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("step {i}")).collect()
    }

    #[test]
    fn test_step_count_bounds() {
        assert_eq!(
            TaskPlan::new("t", steps(2)),
            Err(PlanError::TooFewSteps { count: 2, min: 3 })
        );
        assert_eq!(
            TaskPlan::new("t", steps(8)),
            Err(PlanError::TooManySteps { count: 8, max: 7 })
        );
        assert!(TaskPlan::new("t", steps(3)).is_ok());
        assert!(TaskPlan::new("t", steps(7)).is_ok());
        assert_eq!(
            TaskPlan::new("t", vec!["a".into(), "  ".into(), "c".into()]),
            Err(PlanError::EmptyStep { index: 1 })
        );
    }

    #[test]
    fn test_steps_complete_in_order() {
        let mut plan = TaskPlan::new("t", steps(3)).unwrap();
        assert_eq!(plan.next_pending(), Some(0));
        assert_eq!(
            plan.mark_completed(1, "skip"),
            Err(PlanError::OutOfOrder { index: 1, expected: 0 })
        );
        assert_eq!(
            plan.mark_completed(9, "nope"),
            Err(PlanError::StepOutOfRange { index: 9, len: 3 })
        );

        plan.mark_completed(0, "first").unwrap();
        plan.mark_completed(1, "second").unwrap();
        assert_eq!(plan.next_pending(), Some(2));
        assert!(plan.prior_results().contains("Step 2: step 2\nResult: second"));

        plan.mark_completed(2, "third").unwrap();
        assert!(plan.is_complete());
        assert_eq!(plan.completed_steps().len(), 3);
    }

    #[test]
    fn test_parse_model_reply() {
        let plan = TaskPlan::from_model_reply(
            "write a report",
            "```json\n{\"steps\": [\"research\", {\"description\": \"outline\"}, \"write\"]}\n```",
        )
        .unwrap();
        assert_eq!(plan.steps(), &["research", "outline", "write"]);
        assert_eq!(plan.original_task(), "write a report");

        let bare = TaskPlan::from_model_reply("t", r#"["a", "b", "c", "d"]"#).unwrap();
        assert_eq!(bare.len(), 4);

        assert!(matches!(
            TaskPlan::from_model_reply("t", "I cannot plan this"),
            Err(PlanError::Unparseable(_))
        ));
        assert!(matches!(
            TaskPlan::from_model_reply("t", r#"{"steps": ["only one"]}"#),
            Err(PlanError::TooFewSteps { .. })
        ));
    }
}
