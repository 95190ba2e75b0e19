//! User-facing error taxonomy.
//!
//! Every failure that reaches the [`App`](crate::app::App) action boundary is
//! folded into an [`AppError`] and shown through its
//! [`user_message`](AppError::user_message). Internal detail stays in the log.

use collabtodo_proto::policy::PolicyDenial;

use crate::remote::StoreError;
use crate::session::AuthError;
use crate::tasks::TaskError;

/// Failure categories surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Bad input, rejected before any request.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Sign-in, sign-up or session failure.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The caller does not own the task.
    #[error("access denied")]
    AccessDenied,

    /// A time-based mutation rule refused the request.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// The task does not exist.
    #[error("not found")]
    NotFound,

    /// The store could not be reached or failed transiently.
    #[error("network error: {0}")]
    Network(String),

    /// Anything else, including panics in request tasks.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Text safe to show the user. Access denial is always generic.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Auth(msg) | Self::PolicyViolation(msg) => msg.clone(),
            Self::AccessDenied => "Access denied".to_string(),
            Self::NotFound => "Task not found".to_string(),
            Self::Network(_) => "Network error, please try again".to_string(),
            Self::Internal(_) => "An unexpected error occurred".to_string(),
        }
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::TextEmpty => Self::Validation("Please enter a task".to_string()),
            TaskError::TextTooLong { max } => {
                Self::Validation(format!("Task must be less than {max} characters"))
            }
            TaskError::TaskNotFound(_) => Self::NotFound,
            TaskError::AccessDenied => Self::AccessDenied,
            TaskError::Unconfirmed(_) => {
                Self::Validation("Task is still being saved, try again".to_string())
            }
            TaskError::Ordering(e) => Self::Validation(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::Network(msg),
            StoreError::AccessDenied | StoreError::Policy(PolicyDenial::AccessDenied) => {
                Self::AccessDenied
            }
            StoreError::Policy(PolicyDenial::DeleteTooOld { cutoff_hours }) => Self::PolicyViolation(
                format!("Tasks older than {cutoff_hours} hours cannot be deleted"),
            ),
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::Rejected(msg) => Self::Validation(msg),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err.to_string())
    }
}
