//! In-process store and auth provider.
//!
//! [`MemoryStore`] keeps the `tasks`, `auth_logs` and `task_logs` tables in
//! memory, enforces row ownership and the delete-age policy the same way
//! the hosted store's row-level rules do, and fans change events out to
//! subscribers filtered by owner. Failure injection lets tests exercise the
//! rollback paths.

use std::collections::HashMap;

use chrono::{TimeDelta, Utc};
use collabtodo_proto::audit::{AuthLogEntry, TaskLogEntry};
use collabtodo_proto::change::ChangeEvent;
use collabtodo_proto::policy::{self, Action, DEFAULT_DELETE_CUTOFF, PolicyDenial};
use collabtodo_proto::task::{
    MAX_TASK_TEXT_LENGTH, NewTask, PositionUpdate, Task, TaskId, TaskPatch, UserId,
};
use tokio::sync::{RwLock, mpsc};

use super::{AuthProvider, RemoteStore, StoreError, Subscription, channel_name};
use crate::session::{AuthError, Session, User};

/// Default session lifetime.
const DEFAULT_SESSION_TTL: TimeDelta = TimeDelta::hours(1);

/// Default per-subscriber change buffer.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Subscriber {
    owner: UserId,
    tx: mpsc::Sender<ChangeEvent>,
}

struct Account {
    id: UserId,
    password: String,
}

/// In-memory implementation of [`RemoteStore`] and [`AuthProvider`].
pub struct MemoryStore {
    tasks: RwLock<Vec<Task>>,
    auth_logs: RwLock<Vec<AuthLogEntry>>,
    task_logs: RwLock<Vec<TaskLogEntry>>,
    subscribers: RwLock<Vec<Subscriber>>,
    accounts: RwLock<HashMap<String, Account>>,
    session: parking_lot::Mutex<Option<Session>>,
    failures: parking_lot::Mutex<u32>,
    fail_audit: parking_lot::Mutex<bool>,
    delete_cutoff: TimeDelta,
    session_ttl: TimeDelta,
    channel_capacity: usize,
    max_text_len: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with default policy and buffer sizes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(
            DEFAULT_DELETE_CUTOFF,
            DEFAULT_SESSION_TTL,
            DEFAULT_CHANNEL_CAPACITY,
            MAX_TASK_TEXT_LENGTH,
        )
    }

    /// Creates an empty store with explicit settings.
    ///
    /// `max_text_len` is the text length constraint on the `tasks` table and
    /// should match the client's configured limit.
    #[must_use]
    pub fn with_settings(
        delete_cutoff: TimeDelta,
        session_ttl: TimeDelta,
        channel_capacity: usize,
        max_text_len: usize,
    ) -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            auth_logs: RwLock::new(Vec::new()),
            task_logs: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            accounts: RwLock::new(HashMap::new()),
            session: parking_lot::Mutex::new(None),
            failures: parking_lot::Mutex::new(0),
            fail_audit: parking_lot::Mutex::new(false),
            delete_cutoff,
            session_ttl,
            channel_capacity: channel_capacity.max(1),
            max_text_len,
        }
    }

    /// Makes the next `n` task requests (loads and mutations) fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_next_requests(&self, n: u32) {
        *self.failures.lock() = n;
    }

    /// Makes audit writes fail until switched off again.
    pub fn fail_audit_writes(&self, fail: bool) {
        *self.fail_audit.lock() = fail;
    }

    /// Inserts rows as-is without notifying subscribers.
    pub async fn seed(&self, rows: impl IntoIterator<Item = Task>) {
        self.tasks.write().await.extend(rows);
    }

    /// Registers an account directly.
    pub async fn add_account(&self, email: &str, password: &str) -> UserId {
        let id = UserId::new(uuid::Uuid::now_v7().to_string());
        self.accounts.write().await.insert(
            email.to_string(),
            Account {
                id: id.clone(),
                password: password.to_string(),
            },
        );
        id
    }

    /// Delivers an event to every subscriber, ignoring the owner filter.
    ///
    /// Simulates duplicate or misrouted delivery from the change feed.
    pub async fn inject(&self, event: ChangeEvent) {
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.iter() {
            if let Err(e) = sub.tx.try_send(event.clone()) {
                tracing::warn!(owner = %sub.owner, error = %e, "dropping injected change event");
            }
        }
    }

    /// Snapshot of the authentication audit table.
    pub async fn auth_logs(&self) -> Vec<AuthLogEntry> {
        self.auth_logs.read().await.clone()
    }

    /// Snapshot of the task audit table.
    pub async fn task_logs(&self) -> Vec<TaskLogEntry> {
        self.task_logs.read().await.clone()
    }

    /// Number of live change feeds.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn check_audit(&self) -> Result<(), StoreError> {
        if *self.fail_audit.lock() {
            return Err(StoreError::Unavailable("audit table unavailable".to_string()));
        }
        Ok(())
    }

    fn authorize(&self, actor: &UserId, task: &Task, action: Action) -> Result<(), StoreError> {
        policy::authorize(actor, task, action, Utc::now(), self.delete_cutoff).map_err(
            |denial| match denial {
                PolicyDenial::AccessDenied => StoreError::AccessDenied,
                other @ PolicyDenial::DeleteTooOld { .. } => StoreError::Policy(other),
            },
        )
    }

    async fn broadcast(&self, owner: &UserId, events: Vec<ChangeEvent>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| !s.tx.is_closed());
        for sub in subscribers.iter().filter(|s| s.owner == *owner) {
            for event in &events {
                if let Err(e) = sub.tx.try_send(event.clone()) {
                    tracing::warn!(owner = %owner, error = %e, "dropping change event");
                }
            }
        }
    }

    async fn open_session(&self, user: User) -> Session {
        let session = Session {
            user,
            access_token: uuid::Uuid::now_v7().to_string(),
            expires_at: Utc::now() + self.session_ttl,
        };
        *self.session.lock() = Some(session.clone());
        session
    }
}

impl RemoteStore for MemoryStore {
    async fn load_tasks(&self, owner: &UserId) -> Result<Vec<Task>, StoreError> {
        self.take_failure()?;
        let mut rows: Vec<Task> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.user_id == *owner)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.position, a.created_at, &a.id).cmp(&(b.position, b.created_at, &b.id))
        });
        Ok(rows)
    }

    async fn insert_task(&self, actor: &UserId, new: NewTask) -> Result<Task, StoreError> {
        self.take_failure()?;
        if new.user_id != *actor {
            return Err(StoreError::AccessDenied);
        }
        if new.text.trim().is_empty() || new.text.chars().count() > self.max_text_len {
            return Err(StoreError::Rejected("text violates length constraint".into()));
        }
        let task = Task {
            id: TaskId::generate(),
            user_id: new.user_id,
            text: new.text,
            completed: new.completed,
            priority: new.priority,
            position: new.position,
            created_at: new.created_at,
            updated_at: None,
        };
        self.tasks.write().await.push(task.clone());
        tracing::debug!(task_id = %task.id, "row inserted");
        self.broadcast(actor, vec![ChangeEvent::Insert(task.clone())])
            .await;
        Ok(task)
    }

    async fn update_task(
        &self,
        actor: &UserId,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<Task, StoreError> {
        self.take_failure()?;
        let updated = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == *id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            self.authorize(actor, task, Action::Update)?;
            patch.apply_to(task);
            task.clone()
        };
        self.broadcast(actor, vec![ChangeEvent::Update(updated.clone())])
            .await;
        Ok(updated)
    }

    async fn delete_task(&self, actor: &UserId, id: &TaskId) -> Result<(), StoreError> {
        self.take_failure()?;
        {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .iter()
                .find(|t| t.id == *id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            self.authorize(actor, task, Action::Delete)?;
            tasks.retain(|t| t.id != *id);
        }
        self.broadcast(actor, vec![ChangeEvent::Delete(id.clone())])
            .await;
        Ok(())
    }

    async fn upsert_positions(
        &self,
        actor: &UserId,
        updates: &[PositionUpdate],
    ) -> Result<(), StoreError> {
        self.take_failure()?;
        let now = Utc::now();
        let changed = {
            let mut tasks = self.tasks.write().await;
            // Validate the whole batch before writing any row.
            for update in updates {
                let task = tasks
                    .iter()
                    .find(|t| t.id == update.id)
                    .ok_or_else(|| StoreError::NotFound(update.id.clone()))?;
                self.authorize(actor, task, Action::Update)?;
            }
            let mut changed = Vec::with_capacity(updates.len());
            for update in updates {
                if let Some(task) = tasks.iter_mut().find(|t| t.id == update.id) {
                    task.position = update.position;
                    task.updated_at = Some(now);
                    changed.push(ChangeEvent::Update(task.clone()));
                }
            }
            changed
        };
        self.broadcast(actor, changed).await;
        Ok(())
    }

    async fn insert_auth_log(&self, entry: AuthLogEntry) -> Result<(), StoreError> {
        self.check_audit()?;
        self.auth_logs.write().await.push(entry);
        Ok(())
    }

    async fn insert_task_log(&self, entry: TaskLogEntry) -> Result<(), StoreError> {
        self.check_audit()?;
        self.task_logs.write().await.push(entry);
        Ok(())
    }

    async fn subscribe(&self, owner: &UserId) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.subscribers.write().await.push(Subscriber {
            owner: owner.clone(),
            tx,
        });
        let channel = channel_name(owner);
        tracing::debug!(channel = %channel, "subscribed");
        Ok(Subscription::new(channel, rx))
    }
}

impl AuthProvider for MemoryStore {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let mut slot = self.session.lock();
        if slot.as_ref().is_some_and(|s| s.is_expired(Utc::now())) {
            *slot = None;
        }
        Ok(slot.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let user = {
            let accounts = self.accounts.read().await;
            let account = accounts
                .get(email)
                .filter(|a| a.password == password)
                .ok_or(AuthError::InvalidCredentials)?;
            User {
                id: account.id.clone(),
                email: email.to_string(),
            }
        };
        Ok(self.open_session(user).await)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        if self.accounts.read().await.contains_key(email) {
            return Err(AuthError::AlreadyRegistered);
        }
        let id = self.add_account(email, password).await;
        let user = User {
            id,
            email: email.to_string(),
        };
        Ok(Some(self.open_session(user).await))
    }

    async fn sign_in_with_oauth(&self, provider: &str) -> Result<Session, AuthError> {
        let email = format!("{provider}-user@oauth.invalid");
        let existing = self
            .accounts
            .read()
            .await
            .get(&email)
            .map(|a| a.id.clone());
        let id = match existing {
            Some(id) => id,
            None => self.add_account(&email, "").await,
        };
        Ok(self.open_session(User { id, email }).await)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.session.lock() = None;
        Ok(())
    }
}
