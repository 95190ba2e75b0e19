//! Best-effort audit trail for authentication attempts and task mutations.
//!
//! Writes go to the store's `auth_logs` and `task_logs` tables. A failed
//! write is logged with `tracing::warn!` and otherwise ignored: auditing
//! never fails or delays reporting of the primary operation.

use std::sync::Arc;

use collabtodo_proto::audit::{AuthLogEntry, ClientMeta, TaskLogEntry};
use collabtodo_proto::task::{TaskId, UserId};

use crate::remote::RemoteStore;

/// Writes audit rows through a [`RemoteStore`].
pub struct AuditLogger<S> {
    store: Arc<S>,
    enabled: bool,
    meta: ClientMeta,
}

impl<S> Clone for AuditLogger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            enabled: self.enabled,
            meta: self.meta.clone(),
        }
    }
}

impl<S: RemoteStore> AuditLogger<S> {
    /// Creates a logger. When `enabled` is false every call is a no-op.
    #[must_use]
    pub const fn new(store: Arc<S>, enabled: bool, meta: ClientMeta) -> Self {
        Self {
            store,
            enabled,
            meta,
        }
    }

    /// Records one authentication attempt.
    pub async fn auth(&self, user_id: Option<UserId>, action: &str, outcome: Result<(), String>) {
        if !self.enabled {
            return;
        }
        let entry = AuthLogEntry::new(user_id, action, outcome, &self.meta);
        if let Err(e) = self.store.insert_auth_log(entry).await {
            tracing::warn!(action, error = %e, "failed to write auth log");
        }
    }

    /// Records one task mutation.
    pub async fn task(
        &self,
        user_id: UserId,
        task_id: Option<TaskId>,
        action: &str,
        outcome: Result<(), String>,
    ) {
        if !self.enabled {
            return;
        }
        let entry = TaskLogEntry::new(user_id, task_id, action, outcome, &self.meta);
        if let Err(e) = self.store.insert_task_log(entry).await {
            tracing::warn!(action, error = %e, "failed to write task log");
        }
    }
}
