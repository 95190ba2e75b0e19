//! Ownership and mutation-age policy for task rows.
//!
//! The edge validator enforces this check; the client's in-memory store
//! applies the same function so local runs see the same decisions.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Task, UserId};

/// Tasks older than this cannot be deleted.
pub const DEFAULT_DELETE_CUTOFF: TimeDelta = TimeDelta::hours(24);

/// A requested operation on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Read the row.
    Read,
    /// Modify the row.
    Update,
    /// Remove the row.
    Delete,
}

impl Action {
    /// All actions, in declaration order.
    pub const ALL: [Self; 3] = [Self::Read, Self::Update, Self::Delete];

    /// Lowercase action name as used in audit action tags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid action: {0}")]
pub struct ParseActionError(pub String);

impl std::str::FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ParseActionError(other.to_string())),
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyDenial {
    /// The caller does not own the task.
    #[error("access denied")]
    AccessDenied,
    /// The task is past the deletion cutoff.
    #[error("tasks older than {cutoff_hours} hours cannot be deleted")]
    DeleteTooOld {
        /// The cutoff that was exceeded.
        cutoff_hours: i64,
    },
}

/// Decides whether `identity` may perform `action` on `task` at `now`.
///
/// Ownership is checked first. Only deletes are subject to the age cutoff;
/// updates and reads are not.
///
/// # Errors
///
/// Returns [`PolicyDenial::AccessDenied`] for foreign rows and
/// [`PolicyDenial::DeleteTooOld`] for deletes past `delete_cutoff`.
pub fn authorize(
    identity: &UserId,
    task: &Task,
    action: Action,
    now: DateTime<Utc>,
    delete_cutoff: TimeDelta,
) -> Result<(), PolicyDenial> {
    if task.user_id != *identity {
        return Err(PolicyDenial::AccessDenied);
    }
    if action == Action::Delete && now - task.created_at > delete_cutoff {
        return Err(PolicyDenial::DeleteTooOld {
            cutoff_hours: delete_cutoff.num_hours(),
        });
    }
    Ok(())
}
