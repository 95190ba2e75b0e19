//! Request and response bodies of the edge `validate-task` endpoint.

use serde::{Deserialize, Serialize};

use crate::task::{Priority, Task, TaskId};

/// Body of `POST /validate-task`.
///
/// Fields are optional so that a missing field is reported as a 400
/// rather than a body-parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    /// Target task.
    #[serde(default)]
    pub task_id: Option<String>,
    /// One of `read`, `update`, `delete`.
    #[serde(default)]
    pub action: Option<String>,
}

/// The subset of a task returned on successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: TaskId,
    /// Task text.
    pub text: String,
    /// Task priority.
    pub priority: Priority,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            text: task.text.clone(),
            priority: task.priority,
        }
    }
}

/// Successful validation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Always `true`.
    pub success: bool,
    /// Human-readable confirmation.
    pub message: String,
    /// The validated task.
    pub task: TaskSummary,
}

impl ValidateResponse {
    /// Builds the success body for a validated task.
    #[must_use]
    pub fn ok(task: TaskSummary) -> Self {
        Self {
            success: true,
            message: "Task validation successful".to_string(),
            task,
        }
    }
}

/// Failure body shared by every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error text.
    pub error: String,
}
