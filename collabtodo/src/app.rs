//! Application context wiring the reconciler to the store and auth provider.
//!
//! [`App`] is the single owner of the task list. User actions apply an
//! optimistic change and spawn the matching store request; request results
//! come back as completions and realtime changes arrive on the
//! [`Subscription`]. Both are consumed by [`App::process_next`], one at a
//! time, so the reconciler is never mutated concurrently.
//!
//! ```text
//! action ──► Reconciler ──► spawned request ──► Completion ─┐
//!                ▲                                           │
//!                └──────────── process_next ◄── ChangeEvent ◄┘
//! ```
//!
//! Nothing fails past the action boundary: errors become [`Notification`]s.

use std::sync::Arc;

use chrono::Utc;
use collabtodo_proto::audit::ClientMeta;
use collabtodo_proto::change::ChangeEvent;
use collabtodo_proto::task::{Priority, Task, TaskId, UserId};
use tokio::sync::mpsc;

use crate::audit::AuditLogger;
use crate::config::ClientConfig;
use crate::error::AppError;
use crate::remote::{AuthProvider, RemoteStore, Subscription};
use crate::session::{self, Session, SessionEvent};
use crate::tasks::{
    Confirmation, Dispatch, Filter, LocalOp, PendingOp, Reconciler, RemoteRequest, Rollback,
    TaskError, TaskStats,
};

/// Where the app is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed; [`App::start`] not yet called.
    Initialized,
    /// Accepting actions and events.
    Running,
    /// Shut down; every action is ignored.
    TornDown,
}

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// An action completed.
    Success,
    /// Something happened elsewhere (another device).
    Info,
    /// Needs attention but nothing failed.
    Warning,
    /// An action failed.
    Error,
}

/// A short message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Severity.
    pub level: Level,
    /// Display text.
    pub message: String,
}

impl Notification {
    fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Result of a spawned store request. Opaque outside the app.
#[derive(Debug)]
pub struct Completion {
    /// Session generation the request was issued under.
    generation: u64,
    handle: PendingOp,
    action: &'static str,
    result: Result<Confirmation, AppError>,
}

/// Input waiting to be applied by [`App::apply_incoming`].
#[derive(Debug)]
pub enum Incoming {
    /// A store request finished.
    Completion(Completion),
    /// The change feed delivered a row change.
    Change(ChangeEvent),
}

/// The application context.
pub struct App<S, A> {
    store: Arc<S>,
    auth: Arc<A>,
    config: ClientConfig,
    audit: AuditLogger<S>,
    state: Lifecycle,
    session: Option<Session>,
    reconciler: Option<Reconciler>,
    subscription: Option<Subscription>,
    /// Bumped on every session change so stale completions are discarded.
    generation: u64,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
    notify_tx: mpsc::Sender<Notification>,
}

impl<S, A> App<S, A>
where
    S: RemoteStore + 'static,
    A: AuthProvider + 'static,
{
    /// Creates the app and the receiver for its notifications.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        auth: Arc<A>,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let capacity = config.channel_capacity.max(1);
        let (completion_tx, completion_rx) = mpsc::channel(capacity);
        let (notify_tx, notify_rx) = mpsc::channel(capacity);
        let audit = AuditLogger::new(
            Arc::clone(&store),
            config.enable_audit_logging,
            ClientMeta::new(None, Some(&config.user_agent)),
        );
        let app = Self {
            store,
            auth,
            config,
            audit,
            state: Lifecycle::Initialized,
            session: None,
            reconciler: None,
            subscription: None,
            generation: 0,
            completion_tx,
            completion_rx,
            notify_tx,
        };
        (app, notify_rx)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> Lifecycle {
        self.state
    }

    /// The signed-in session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// All tasks in order; empty when signed out.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        self.reconciler
            .as_ref()
            .map(Reconciler::tasks)
            .unwrap_or_default()
    }

    /// Tasks under the active filter.
    #[must_use]
    pub fn visible(&self) -> Vec<&Task> {
        self.reconciler
            .as_ref()
            .map_or_else(Vec::new, Reconciler::visible)
    }

    /// Counts over all tasks.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        self.reconciler
            .as_ref()
            .map_or_else(TaskStats::default, Reconciler::stats)
    }

    /// The active filter.
    #[must_use]
    pub fn filter(&self) -> Filter {
        self.reconciler
            .as_ref()
            .map_or_else(Filter::default, Reconciler::filter)
    }

    /// Name of the live change feed, if subscribed.
    #[must_use]
    pub fn subscription_channel(&self) -> Option<&str> {
        self.subscription.as_ref().map(Subscription::channel)
    }

    /// Optimistic operations still waiting for the store.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.reconciler
            .as_ref()
            .map_or(0, Reconciler::pending_count)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Moves to `Running` and restores a persisted session if one exists.
    pub async fn start(&mut self) {
        if self.state != Lifecycle::Initialized {
            tracing::warn!(state = ?self.state, "start called twice");
            return;
        }
        self.state = Lifecycle::Running;
        match self.auth.current_session().await {
            Ok(Some(session)) => self.handle_session_event(SessionEvent::SignedIn(session)).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not restore session"),
        }
        tracing::info!("app running");
    }

    /// Ends any session and refuses further actions.
    pub fn shutdown(&mut self) {
        self.end_session();
        self.state = Lifecycle::TornDown;
        tracing::info!("app torn down");
    }

    /// Applies a session change pushed by the auth provider.
    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        if self.state != Lifecycle::Running {
            return;
        }
        match event {
            SessionEvent::SignedIn(session) => self.begin_session(session).await,
            SessionEvent::SignedOut => self.end_session(),
        }
    }

    async fn begin_session(&mut self, session: Session) {
        if session.is_expired(Utc::now()) {
            self.notify(Level::Warning, "Session expired, please sign in again");
            return;
        }
        self.end_session();

        let owner = session.user.id.clone();
        tracing::info!(user_id = %owner, "session started");
        self.reconciler = Some(Reconciler::with_max_text_len(
            owner.clone(),
            self.config.max_task_length,
        ));
        self.session = Some(session);

        match self.store.subscribe(&owner).await {
            Ok(sub) => {
                tracing::info!(channel = %sub.channel(), "realtime subscription open");
                self.subscription = Some(sub);
            }
            Err(e) => {
                tracing::warn!(error = %e, "realtime subscription failed");
                self.notify(Level::Warning, "Realtime updates unavailable");
            }
        }
        self.reload().await;
    }

    /// Drops the session, subscription, pending operations and tasks.
    fn end_session(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        if let Some(session) = self.session.take() {
            tracing::info!(user_id = %session.user.id, "session ended");
        }
        self.reconciler = None;
        self.generation += 1;
    }

    /// Returns the acting identity, ending the session if it has expired.
    fn active_identity(&mut self) -> Option<UserId> {
        if self.state != Lifecycle::Running {
            tracing::warn!(state = ?self.state, "action ignored");
            return None;
        }
        let Some(session) = &self.session else {
            self.notify(Level::Error, "Please sign in first");
            return None;
        };
        if session.is_expired(Utc::now()) {
            self.end_session();
            self.notify(Level::Warning, "Session expired, please sign in again");
            return None;
        }
        Some(session.user.id.clone())
    }

    // ---------------------------------------------------------------------
    // Authentication
    // ---------------------------------------------------------------------

    /// Email and password sign-in.
    pub async fn sign_in(&mut self, email: &str, password: &str) {
        if let Err(e) = session::validate_sign_in(email, password) {
            self.notify(Level::Error, e.to_string());
            return;
        }
        match self.auth.sign_in_with_password(email.trim(), password).await {
            Ok(session) => {
                self.audit
                    .auth(Some(session.user.id.clone()), "sign_in", Ok(()))
                    .await;
                self.notify(Level::Success, "Successfully signed in!");
                self.handle_session_event(SessionEvent::SignedIn(session))
                    .await;
            }
            Err(e) => {
                self.audit.auth(None, "sign_in", Err(e.to_string())).await;
                self.notify(Level::Error, AppError::from(e).user_message());
            }
        }
    }

    /// Registers a new account.
    pub async fn sign_up(&mut self, email: &str, password: &str) {
        if let Err(e) = session::validate_sign_up(email, password) {
            self.notify(Level::Error, e.to_string());
            return;
        }
        match self.auth.sign_up(email.trim(), password).await {
            Ok(Some(session)) => {
                self.audit
                    .auth(Some(session.user.id.clone()), "sign_up", Ok(()))
                    .await;
                self.notify(Level::Success, "Account created!");
                self.handle_session_event(SessionEvent::SignedIn(session))
                    .await;
            }
            Ok(None) => {
                self.audit.auth(None, "sign_up", Ok(())).await;
                self.notify(
                    Level::Success,
                    "Account created! Please check your email to verify.",
                );
            }
            Err(e) => {
                self.audit.auth(None, "sign_up", Err(e.to_string())).await;
                self.notify(Level::Error, AppError::from(e).user_message());
            }
        }
    }

    /// Third-party sign-in, if enabled in configuration.
    pub async fn sign_in_with_oauth(&mut self, provider: &str) {
        if !self.config.enable_oauth {
            self.notify(Level::Error, "OAuth authentication is not enabled");
            return;
        }
        let action = format!("{provider}_sign_in");
        match self.auth.sign_in_with_oauth(provider).await {
            Ok(session) => {
                self.audit
                    .auth(Some(session.user.id.clone()), &action, Ok(()))
                    .await;
                self.handle_session_event(SessionEvent::SignedIn(session))
                    .await;
            }
            Err(e) => {
                self.audit.auth(None, &action, Err(e.to_string())).await;
                self.notify(Level::Error, AppError::from(e).user_message());
            }
        }
    }

    /// Signs out and tears down the session state.
    pub async fn sign_out(&mut self) {
        let user_id = self.session.as_ref().map(|s| s.user.id.clone());
        match self.auth.sign_out().await {
            Ok(()) => {
                self.handle_session_event(SessionEvent::SignedOut).await;
                self.audit.auth(user_id, "sign_out", Ok(())).await;
                self.notify(Level::Success, "Signed out successfully");
            }
            Err(e) => {
                tracing::error!(error = %e, "sign out failed");
                self.notify(Level::Error, AppError::from(e).user_message());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Task actions
    // ---------------------------------------------------------------------

    /// Adds a task at the end of the list.
    pub fn add_task(&mut self, text: &str, priority: Priority) -> Option<PendingOp> {
        self.apply(LocalOp::Create {
            text: text.to_string(),
            priority,
        })
    }

    /// Flips a task's completion flag.
    pub fn toggle_task(&mut self, id: &TaskId) -> Option<PendingOp> {
        self.apply(LocalOp::Toggle { id: id.clone() })
    }

    /// Replaces a task's text.
    pub fn edit_task(&mut self, id: &TaskId, text: &str) -> Option<PendingOp> {
        self.apply(LocalOp::Edit {
            id: id.clone(),
            text: text.to_string(),
        })
    }

    /// Deletes a task.
    pub fn delete_task(&mut self, id: &TaskId) -> Option<PendingOp> {
        self.apply(LocalOp::Delete { id: id.clone() })
    }

    /// Moves the task at visible index `from` to visible index `to`.
    pub fn move_task(&mut self, from: usize, to: usize) -> Option<PendingOp> {
        self.apply(LocalOp::Reorder { from, to })
    }

    /// Changes the active filter. Never touches stored tasks.
    pub fn set_filter(&mut self, filter: Filter) {
        if let Some(rec) = self.reconciler.as_mut() {
            rec.set_filter(filter);
        }
    }

    fn apply(&mut self, op: LocalOp) -> Option<PendingOp> {
        let actor = self.active_identity()?;
        let action = op.audit_action();
        let task_id = op.task_id().cloned();
        let rec = self.reconciler.as_mut()?;

        match rec.apply_local(op) {
            Ok(Some(dispatch)) => {
                let handle = dispatch.handle;
                self.spawn_request(actor, action, dispatch);
                Some(handle)
            }
            Ok(None) => None,
            Err(err) => {
                if err == TaskError::AccessDenied {
                    tracing::warn!(user_id = %actor, ?task_id, action, "mutation of foreign task refused");
                    let audit = self.audit.clone();
                    tokio::spawn(async move {
                        audit
                            .task(actor, task_id, action, Err("access denied".to_string()))
                            .await;
                    });
                }
                self.notify(Level::Error, AppError::from(err).user_message());
                None
            }
        }
    }

    fn spawn_request(&self, actor: UserId, action: &'static str, dispatch: Dispatch) {
        let store = Arc::clone(&self.store);
        let audit = self.audit.clone();
        let tx = self.completion_tx.clone();
        let generation = self.generation;
        let Dispatch { handle, request } = dispatch;
        let target = request_target(&request);

        tokio::spawn(async move {
            let worker = tokio::spawn(execute(store, actor.clone(), request));
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(op = %handle, error = %e, "request task failed");
                    Err(AppError::Internal(e.to_string()))
                }
            };

            let (task_id, outcome) = match &result {
                Ok(Confirmation::Created(task)) => (Some(task.id.clone()), Ok(())),
                Ok(_) => (target, Ok(())),
                Err(e) => (target, Err(e.to_string())),
            };
            audit.task(actor, task_id, action, outcome).await;

            let completion = Completion {
                generation,
                handle,
                action,
                result,
            };
            if tx.send(completion).await.is_err() {
                tracing::debug!(op = %handle, "app gone, completion dropped");
            }
        });
    }

    // ---------------------------------------------------------------------
    // Event loop
    // ---------------------------------------------------------------------

    /// Waits for the next completion or change event and applies it.
    pub async fn process_next(&mut self) {
        let incoming = self.next_incoming().await;
        self.apply_incoming(incoming).await;
    }

    /// Waits for the next completion or change event.
    ///
    /// Cancel safe: nothing is consumed unless this returns, so it can sit
    /// in a `select!` next to other input sources.
    pub async fn next_incoming(&mut self) -> Incoming {
        loop {
            tokio::select! {
                Some(completion) = self.completion_rx.recv() => {
                    return Incoming::Completion(completion);
                }
                event = next_change(self.subscription.as_mut()) => {
                    if let Some(event) = event {
                        return Incoming::Change(event);
                    }
                    tracing::warn!("change feed closed by the store");
                    self.subscription = None;
                }
            }
        }
    }

    /// Applies one completion or change event to the task list.
    pub async fn apply_incoming(&mut self, incoming: Incoming) {
        match incoming {
            Incoming::Completion(completion) => self.on_completion(completion).await,
            Incoming::Change(event) => self.on_change(event),
        }
    }

    async fn on_completion(&mut self, completion: Completion) {
        let Completion {
            generation,
            handle,
            action,
            result,
        } = completion;
        if generation != self.generation {
            tracing::debug!(op = %handle, "completion from a previous session ignored");
            return;
        }
        let Some(rec) = self.reconciler.as_mut() else {
            return;
        };

        match result {
            Ok(confirmation) => {
                rec.confirm(handle, confirmation);
                match action {
                    "create" => self.notify(Level::Success, "Task added successfully"),
                    "delete" => self.notify(Level::Success, "Task deleted"),
                    _ => {}
                }
            }
            Err(err) => {
                tracing::warn!(op = %handle, action, error = %err, "request failed");
                let outcome = rec.rollback(handle);
                self.notify(Level::Error, failure_message(action, &err));
                if outcome == Rollback::ReloadRequired {
                    self.reload().await;
                }
                // A failed position write is not retried until the next change.
                if action == "reorder" {
                    return;
                }
            }
        }
        self.repair_positions();
    }

    fn on_change(&mut self, event: ChangeEvent) {
        let Some(rec) = self.reconciler.as_mut() else {
            return;
        };
        let present = rec.get(event.task_id()).is_some();
        let provisional = count_provisional(rec.tasks());
        let is_insert = matches!(event, ChangeEvent::Insert(_));
        let is_delete = matches!(event, ChangeEvent::Delete(_));

        if !rec.on_remote_event(event) {
            return;
        }
        let adopted = count_provisional(rec.tasks()) < provisional;
        if is_insert && !present && !adopted {
            self.notify(Level::Info, "New task added");
        } else if is_delete && present {
            self.notify(Level::Info, "Task removed");
        }
        self.repair_positions();
    }

    /// Writes a dense re-index once the list has settled with tied positions.
    ///
    /// Waits while any request is in flight: pending creates have no row to
    /// move yet, and late responses may still shift positions.
    fn repair_positions(&mut self) {
        if self.state != Lifecycle::Running {
            return;
        }
        let Some(owner) = self.session.as_ref().map(|s| s.user.id.clone()) else {
            return;
        };
        let Some(rec) = self.reconciler.as_mut() else {
            return;
        };
        if !rec.has_position_conflicts() || rec.pending_count() > 0 {
            return;
        }
        if let Some(dispatch) = rec.repair_positions() {
            tracing::info!(op = %dispatch.handle, "repairing colliding positions");
            self.spawn_request(owner, "reorder", dispatch);
        }
    }

    /// Replaces the local list with a fresh load from the store.
    ///
    /// Dense positions are written back if the loaded rows collide.
    pub async fn reload(&mut self) {
        let Some(owner) = self.session.as_ref().map(|s| s.user.id.clone()) else {
            return;
        };
        match self.store.load_tasks(&owner).await {
            Ok(rows) => {
                tracing::debug!(count = rows.len(), "tasks loaded");
                let Some(rec) = self.reconciler.as_mut() else {
                    return;
                };
                rec.replace_all(rows);
                self.repair_positions();
            }
            Err(e) => {
                tracing::warn!(error = %e, "task load failed");
                self.notify(Level::Error, "Error loading tasks");
            }
        }
    }

    fn notify(&self, level: Level, message: impl Into<String>) {
        let notification = Notification::new(level, message);
        if let Err(e) = self.notify_tx.try_send(notification) {
            tracing::debug!(error = %e, "notification dropped");
        }
    }
}

/// Runs one store request.
async fn execute<S: RemoteStore>(
    store: Arc<S>,
    actor: UserId,
    request: RemoteRequest,
) -> Result<Confirmation, AppError> {
    let result = match request {
        RemoteRequest::Insert(new) => store
            .insert_task(&actor, new)
            .await
            .map(Confirmation::Created),
        RemoteRequest::Update { id, patch } => store
            .update_task(&actor, &id, patch)
            .await
            .map(Confirmation::Updated),
        RemoteRequest::Delete { id } => store
            .delete_task(&actor, &id)
            .await
            .map(|()| Confirmation::Deleted),
        RemoteRequest::UpsertPositions(updates) => store
            .upsert_positions(&actor, &updates)
            .await
            .map(|()| Confirmation::Reordered),
    };
    result.map_err(AppError::from)
}

async fn next_change(sub: Option<&mut Subscription>) -> Option<ChangeEvent> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

fn request_target(request: &RemoteRequest) -> Option<TaskId> {
    match request {
        RemoteRequest::Update { id, .. } | RemoteRequest::Delete { id } => Some(id.clone()),
        RemoteRequest::Insert(_) | RemoteRequest::UpsertPositions(_) => None,
    }
}

fn count_provisional(tasks: &[Task]) -> usize {
    tasks.iter().filter(|t| t.id.is_provisional()).count()
}

fn failure_message(action: &str, err: &AppError) -> String {
    match err {
        AppError::AccessDenied
        | AppError::PolicyViolation(_)
        | AppError::Validation(_)
        | AppError::NotFound => err.user_message(),
        _ => match action {
            "create" => "Error adding task",
            "delete" => "Error deleting task",
            "reorder" => "Error reordering tasks",
            _ => "Error updating task",
        }
        .to_string(),
    }
}
