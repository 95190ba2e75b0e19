//! Append-only audit log rows (`auth_logs` and `task_logs` tables).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskId, UserId};

/// Placeholder recorded when client metadata is not available.
pub const UNKNOWN: &str = "unknown";

/// Network and client details attached to every audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    /// Caller's address, or `"unknown"`.
    pub ip_address: String,
    /// Caller's user agent, or `"unknown"`.
    pub user_agent: String,
}

impl ClientMeta {
    /// Builds metadata from optional header values.
    #[must_use]
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.unwrap_or(UNKNOWN).to_string(),
            user_agent: user_agent.unwrap_or(UNKNOWN).to_string(),
        }
    }
}

impl Default for ClientMeta {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLogEntry {
    /// The acting identity; `None` for failed sign-ins.
    pub user_id: Option<UserId>,
    /// Action name, e.g. `sign_in` or `unauthorized_delete_attempt`.
    pub action: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Error text for failed attempts.
    pub error: Option<String>,
    /// Caller address.
    pub ip_address: String,
    /// Caller user agent.
    pub user_agent: String,
    /// When the attempt happened.
    pub timestamp: DateTime<Utc>,
}

impl AuthLogEntry {
    /// Builds an entry stamped with the current time.
    pub fn new(
        user_id: Option<UserId>,
        action: impl Into<String>,
        outcome: Result<(), String>,
        meta: &ClientMeta,
    ) -> Self {
        Self {
            user_id,
            action: action.into(),
            success: outcome.is_ok(),
            error: outcome.err(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// One task mutation or validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    /// The acting identity.
    pub user_id: UserId,
    /// Affected task, when a single one is involved.
    pub task_id: Option<TaskId>,
    /// Action name, e.g. `create`, `reorder`, `validate_delete`.
    pub action: String,
    /// Whether the mutation succeeded.
    pub success: bool,
    /// Error text for failed mutations.
    pub error: Option<String>,
    /// Caller address.
    pub ip_address: String,
    /// Caller user agent.
    pub user_agent: String,
    /// When the mutation happened.
    pub timestamp: DateTime<Utc>,
}

impl TaskLogEntry {
    /// Builds an entry stamped with the current time.
    pub fn new(
        user_id: UserId,
        task_id: Option<TaskId>,
        action: impl Into<String>,
        outcome: Result<(), String>,
        meta: &ClientMeta,
    ) -> Self {
        Self {
            user_id,
            task_id,
            action: action.into(),
            success: outcome.is_ok(),
            error: outcome.err(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            timestamp: Utc::now(),
        }
    }
}
