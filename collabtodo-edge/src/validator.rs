//! Server-side re-check of task access.
//!
//! [`AccessValidator`] resolves the caller from a bearer token, loads the
//! task, applies [`policy::authorize`] and writes the audit trail:
//!
//! - an ownership denial writes exactly one `auth_logs` row tagged
//!   `unauthorized_<action>_attempt`;
//! - every other outcome after the caller is known writes one `task_logs`
//!   row tagged `validate_<action>`;
//! - token failures write nothing, since there is no identity to attach.
//!
//! Audit write failures are logged and never change the decision.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use collabtodo_proto::audit::{AuthLogEntry, ClientMeta, TaskLogEntry};
use collabtodo_proto::edge::{TaskSummary, ValidateRequest, ValidateResponse};
use collabtodo_proto::policy::{self, Action, DEFAULT_DELETE_CUTOFF, PolicyDenial};
use collabtodo_proto::task::{Task, TaskId, UserId};

/// Failure reported by a [`Backend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The database could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Why a validation request was refused.
///
/// The `Display` text is what the endpoint returns in its error body,
/// except for [`ValidationError::Internal`], whose detail stays in the log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No `Authorization` header was sent.
    #[error("No authorization header")]
    MissingAuthorization,

    /// The bearer token does not resolve to a user.
    #[error("Invalid token")]
    InvalidToken,

    /// `taskId` or `action` is absent or empty.
    #[error("Missing taskId or action")]
    MissingFields,

    /// The body is not a JSON object.
    #[error("Invalid request body")]
    MalformedBody,

    /// `action` is not one of `read`, `update`, `delete`.
    #[error("Invalid action")]
    InvalidAction(String),

    /// No task with the requested id exists.
    #[error("Task not found")]
    NotFound,

    /// The caller does not own the task.
    #[error("Access denied")]
    AccessDenied,

    /// The task is too old to delete.
    #[error("Tasks older than {cutoff_hours} hours cannot be deleted")]
    DeleteTooOld {
        /// The cutoff that was exceeded.
        cutoff_hours: i64,
    },

    /// The backend failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PolicyDenial> for ValidationError {
    fn from(denial: PolicyDenial) -> Self {
        match denial {
            PolicyDenial::AccessDenied => Self::AccessDenied,
            PolicyDenial::DeleteTooOld { cutoff_hours } => Self::DeleteTooOld { cutoff_hours },
        }
    }
}

impl From<BackendError> for ValidationError {
    fn from(err: BackendError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Storage the validator reads tasks and tokens from and writes audit rows to.
pub trait Backend: Send + Sync {
    /// Resolves a bearer token to a user, `None` if the token is unknown.
    fn user_for_token(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<UserId>, BackendError>> + Send;

    /// Loads a task row by id.
    fn find_task(
        &self,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<Option<Task>, BackendError>> + Send;

    /// Appends to `auth_logs`.
    fn insert_auth_log(
        &self,
        entry: AuthLogEntry,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Appends to `task_logs`.
    fn insert_task_log(
        &self,
        entry: TaskLogEntry,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;
}

/// Audit action tag for requests whose action could not be determined.
const REQUEST_ACTION: &str = "validate_request";

/// Ownership and policy checker for task actions.
pub struct AccessValidator<B> {
    backend: Arc<B>,
    delete_cutoff: TimeDelta,
}

impl<B: Backend> AccessValidator<B> {
    /// Creates a validator with the default 24 hour delete cutoff.
    #[must_use]
    pub const fn new(backend: Arc<B>) -> Self {
        Self::with_delete_cutoff(backend, DEFAULT_DELETE_CUTOFF)
    }

    /// Creates a validator with a custom delete cutoff.
    #[must_use]
    pub const fn with_delete_cutoff(backend: Arc<B>, delete_cutoff: TimeDelta) -> Self {
        Self {
            backend,
            delete_cutoff,
        }
    }

    /// The backend this validator reads from.
    #[must_use]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Full endpoint flow: token, body, then [`validate`](Self::validate).
    ///
    /// `authorization` is the raw `Authorization` header value. `body` is the
    /// raw request body; a body that is not a JSON object is rejected after
    /// the token check, so unauthenticated callers learn nothing about it.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] that decides the response status.
    pub async fn handle(
        &self,
        authorization: Option<&str>,
        body: &[u8],
        meta: &ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<ValidateResponse, ValidationError> {
        let identity = self.authenticate(authorization).await?;

        let request = match serde_json::from_slice::<ValidateRequest>(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable validation body");
                let err = ValidationError::MalformedBody;
                self.log_task(&identity, None, REQUEST_ACTION, Err(err.to_string()), meta)
                    .await;
                return Err(err);
            }
        };

        let (task_id, action) = match parse_request(&request) {
            Ok(parsed) => parsed,
            Err(err) => {
                let task_id = request.task_id.as_deref().map(TaskId::new);
                self.log_task(&identity, task_id, REQUEST_ACTION, Err(err.to_string()), meta)
                    .await;
                return Err(err);
            }
        };

        let task = self.validate(&identity, &task_id, action, meta, now).await?;
        Ok(ValidateResponse::ok(TaskSummary::from(&task)))
    }

    /// Decides whether `identity` may perform `action` on `task_id`.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NotFound`] when the task does not exist
    /// - [`ValidationError::AccessDenied`] when it belongs to someone else
    /// - [`ValidationError::DeleteTooOld`] for deletes past the cutoff
    /// - [`ValidationError::Internal`] when the backend fails
    pub async fn validate(
        &self,
        identity: &UserId,
        task_id: &TaskId,
        action: Action,
        meta: &ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<Task, ValidationError> {
        let tag = format!("validate_{action}");

        let task = match self.backend.find_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                let err = ValidationError::NotFound;
                self.log_task(identity, Some(task_id.clone()), &tag, Err(err.to_string()), meta)
                    .await;
                return Err(err);
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "task lookup failed");
                let err = ValidationError::from(e);
                self.log_task(identity, Some(task_id.clone()), &tag, Err(err.to_string()), meta)
                    .await;
                return Err(err);
            }
        };

        match policy::authorize(identity, &task, action, now, self.delete_cutoff) {
            Ok(()) => {
                self.log_task(identity, Some(task_id.clone()), &tag, Ok(()), meta)
                    .await;
                tracing::info!(user = %identity, task_id = %task_id, %action, "validated");
                Ok(task)
            }
            Err(PolicyDenial::AccessDenied) => {
                tracing::warn!(user = %identity, task_id = %task_id, %action, "access denied");
                let entry = AuthLogEntry::new(
                    Some(identity.clone()),
                    format!("unauthorized_{action}_attempt"),
                    Err(format!(
                        "User attempted to {action} task they don't own: {task_id}"
                    )),
                    meta,
                );
                if let Err(e) = self.backend.insert_auth_log(entry).await {
                    tracing::warn!(error = %e, "failed to write auth log");
                }
                Err(ValidationError::AccessDenied)
            }
            Err(denial) => {
                let err = ValidationError::from(denial);
                self.log_task(identity, Some(task_id.clone()), &tag, Err(err.to_string()), meta)
                    .await;
                Err(err)
            }
        }
    }

    async fn authenticate(&self, authorization: Option<&str>) -> Result<UserId, ValidationError> {
        let header = authorization.ok_or(ValidationError::MissingAuthorization)?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if token.is_empty() {
            return Err(ValidationError::InvalidToken);
        }
        match self.backend.user_for_token(token).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(ValidationError::InvalidToken),
            Err(e) => {
                tracing::error!(error = %e, "token lookup failed");
                Err(ValidationError::from(e))
            }
        }
    }

    async fn log_task(
        &self,
        identity: &UserId,
        task_id: Option<TaskId>,
        action: &str,
        outcome: Result<(), String>,
        meta: &ClientMeta,
    ) {
        let entry = TaskLogEntry::new(identity.clone(), task_id, action, outcome, meta);
        if let Err(e) = self.backend.insert_task_log(entry).await {
            tracing::warn!(action, error = %e, "failed to write task log");
        }
    }
}

fn parse_request(request: &ValidateRequest) -> Result<(TaskId, Action), ValidationError> {
    let task_id = request.task_id.as_deref().filter(|s| !s.is_empty());
    let action = request.action.as_deref().filter(|s| !s.is_empty());
    let (Some(task_id), Some(action)) = (task_id, action) else {
        return Err(ValidationError::MissingFields);
    };
    let action = action
        .parse::<Action>()
        .map_err(|e| ValidationError::InvalidAction(e.0))?;
    Ok((TaskId::new(task_id), action))
}
