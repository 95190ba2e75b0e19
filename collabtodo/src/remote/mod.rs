//! Remote store and auth provider abstractions.
//!
//! The hosted backend is reached only through the [`RemoteStore`] and
//! [`AuthProvider`] traits. [`memory::MemoryStore`] implements both in
//! process for tests and the offline binary.

pub mod memory;

use std::fmt;

use collabtodo_proto::audit::{AuthLogEntry, TaskLogEntry};
use collabtodo_proto::change::ChangeEvent;
use collabtodo_proto::policy::PolicyDenial;
use collabtodo_proto::task::{NewTask, PositionUpdate, Task, TaskId, TaskPatch, UserId};
use tokio::sync::mpsc;

use crate::session::{AuthError, Session};

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The caller does not own the row.
    #[error("access denied")]
    AccessDenied,

    /// The row-level policy refused the mutation.
    #[error(transparent)]
    Policy(#[from] PolicyDenial),

    /// The row does not exist.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The store rejected the request body.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Live change feed for one owner's rows.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Wraps a receiving end under a channel name.
    #[must_use]
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    /// Channel name, `user_<id>_tasks`.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next change; `None` once the store closes the feed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Stops delivery. Events already queued are discarded.
    pub fn unsubscribe(mut self) {
        self.rx.close();
        tracing::debug!(channel = %self.channel, "unsubscribed");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Channel name for an owner's change feed.
#[must_use]
pub fn channel_name(owner: &UserId) -> String {
    format!("user_{owner}_tasks")
}

/// Row storage with realtime change notification.
///
/// Every mutation is performed as `actor`, and implementations enforce that
/// only the owner may touch a row.
pub trait RemoteStore: Send + Sync {
    /// All rows owned by `owner`, ascending by position.
    fn load_tasks(
        &self,
        owner: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Inserts a row and returns it with its server-assigned id.
    fn insert_task(
        &self,
        actor: &UserId,
        task: NewTask,
    ) -> impl std::future::Future<Output = Result<Task, StoreError>> + Send;

    /// Patches a row and returns the stored result.
    fn update_task(
        &self,
        actor: &UserId,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl std::future::Future<Output = Result<Task, StoreError>> + Send;

    /// Deletes a row.
    fn delete_task(
        &self,
        actor: &UserId,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Writes several positions as one request.
    fn upsert_positions(
        &self,
        actor: &UserId,
        updates: &[PositionUpdate],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Appends to the authentication audit table.
    fn insert_auth_log(
        &self,
        entry: AuthLogEntry,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Appends to the task audit table.
    fn insert_task_log(
        &self,
        entry: TaskLogEntry,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Opens a change feed filtered to `owner`'s rows.
    fn subscribe(
        &self,
        owner: &UserId,
    ) -> impl std::future::Future<Output = Result<Subscription, StoreError>> + Send;
}

/// Identity provider.
pub trait AuthProvider: Send + Sync {
    /// The session restored from storage, if still valid.
    fn current_session(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Session>, AuthError>> + Send;

    /// Email and password sign-in.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<Session, AuthError>> + Send;

    /// Registers a new account. Returns a session when no confirmation
    /// step is required.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<Option<Session>, AuthError>> + Send;

    /// Third-party sign-in through `provider`.
    fn sign_in_with_oauth(
        &self,
        provider: &str,
    ) -> impl std::future::Future<Output = Result<Session, AuthError>> + Send;

    /// Ends the current session.
    fn sign_out(&self) -> impl std::future::Future<Output = Result<(), AuthError>> + Send;
}
