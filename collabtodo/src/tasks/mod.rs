//! Local task list: ordering and optimistic reconciliation.
//!
//! [`ordering`] computes positions for moves and appends; [`reconciler`]
//! owns the in-memory list and merges optimistic local changes with
//! authoritative change events from the store.

pub mod ordering;
pub mod reconciler;

pub use ordering::{OrderingError, Reorder, move_in_view, move_task, next_position, reindex};
pub use reconciler::{
    Confirmation, Dispatch, LocalOp, PendingOp, Reconciler, RemoteRequest, Rollback,
};

use collabtodo_proto::task::Task;
use thiserror::Error;

/// Errors rejecting a local mutation before it touches state or the network.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Task text is empty after trimming.
    #[error("task text cannot be empty")]
    TextEmpty,
    /// Task text exceeds the configured maximum.
    #[error("task must be less than {max} characters")]
    TextTooLong {
        /// Configured maximum in characters.
        max: usize,
    },
    /// No task with the given id is in the local list.
    #[error("task not found: {0}")]
    TaskNotFound(String),
    /// The task is owned by another identity.
    #[error("access denied")]
    AccessDenied,
    /// The task has not been saved by the store yet.
    #[error("task is still being saved: {0}")]
    Unconfirmed(String),
    /// A reorder referenced an index outside the visible list.
    #[error(transparent)]
    Ordering(#[from] OrderingError),
}

/// Which tasks the view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    /// Everything.
    #[default]
    All,
    /// Only tasks not yet completed.
    Active,
    /// Only completed tasks.
    Completed,
}

impl Filter {
    /// Returns `true` if the task is shown under this filter.
    #[must_use]
    pub const fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown filter: {other}")),
        }
    }
}

/// Derived counts over the full (unfiltered) list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskStats {
    /// All tasks.
    pub total: usize,
    /// Completed tasks.
    pub completed: usize,
    /// Tasks still open.
    pub pending: usize,
}

impl TaskStats {
    /// Computes counts for a list of tasks.
    #[must_use]
    pub fn of(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.completed).count();
        Self {
            total,
            completed,
            pending: total - completed,
        }
    }
}
