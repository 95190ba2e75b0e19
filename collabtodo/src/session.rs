//! Signed-in user sessions and credential checks.
//!
//! Session lifecycle is owned by the [`AuthProvider`](crate::remote::AuthProvider);
//! the app only observes [`SessionEvent`]s and checks expiry.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use collabtodo_proto::task::UserId;
use regex::Regex;

/// Minimum password length accepted at sign-up.
pub const MIN_PASSWORD_LENGTH: usize = 6;

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Store-assigned identity.
    pub id: UserId,
    /// Login email.
    pub email: String,
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The signed-in user.
    pub user: User,
    /// Bearer token for store and edge requests.
    pub access_token: String,
    /// When the session stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Returns `true` once `now` has reached the expiry time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Session changes pushed by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was established or restored.
    SignedIn(Session),
    /// The session ended.
    SignedOut,
}

/// Errors from authentication.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    /// Email or password was left blank.
    #[error("Please fill in all fields")]
    MissingFields,

    /// The email address is not well formed.
    #[error("Please enter a valid email address")]
    InvalidEmail,

    /// The password is shorter than the sign-up minimum.
    #[error("Password must be at least {min} characters")]
    PasswordTooShort {
        /// Required length.
        min: usize,
    },

    /// No account matches the email and password.
    #[error("Invalid login credentials")]
    InvalidCredentials,

    /// An account already exists for the email.
    #[error("User already registered")]
    AlreadyRegistered,

    /// Third-party sign-in is switched off in configuration.
    #[error("OAuth authentication is not enabled")]
    OAuthDisabled,

    /// The session is no longer valid.
    #[error("session expired")]
    SessionExpired,

    /// The provider could not be reached.
    #[error("auth provider unavailable: {0}")]
    Unavailable(String),
}

/// Checks sign-in input: both fields present and a well-formed email.
///
/// # Errors
///
/// Returns [`AuthError::MissingFields`] or [`AuthError::InvalidEmail`].
pub fn validate_sign_in(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    if !is_valid_email(email.trim()) {
        return Err(AuthError::InvalidEmail);
    }
    Ok(())
}

/// Checks sign-up input: sign-in rules plus the password minimum.
///
/// # Errors
///
/// Returns any [`validate_sign_in`] error or [`AuthError::PasswordTooShort`].
pub fn validate_sign_up(email: &str, password: &str) -> Result<(), AuthError> {
    validate_sign_in(email, password)?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::PasswordTooShort {
            min: MIN_PASSWORD_LENGTH,
        });
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}
