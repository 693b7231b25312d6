/// Error types for the session and task layers
///
/// Both components return typed results. Backend failures arrive as
/// [`BackendError`] and are mapped onto the domain errors here, so callers
/// only ever match on [`AuthError`] or [`RepoError`]. Every variant renders
/// a non-empty message suitable for showing to the user.
///
/// # Example
///
/// ```
/// use taskpad_shared::error::{RepoError, ValidationErrorDetail};
///
/// let err = RepoError::Validation(vec![ValidationErrorDetail::new(
///     "title",
///     "Task title is required",
/// )]);
/// assert_eq!(err.to_string(), "Task title is required");
/// ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::BackendError;

/// Session manager result type alias
pub type AuthResult<T> = Result<T, AuthError>;

/// Task repository result type alias
pub type RepoResult<T> = Result<T, RepoError>;

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

impl ValidationErrorDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationErrorDetail {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Email/password pair was not accepted
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// No user is signed in
    #[error("User not authenticated")]
    NoActiveSession,

    /// The bearer credential is no longer accepted
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// The provider refused the request (e.g. email already registered)
    #[error("{0}")]
    Rejected(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected provider failure, surfaced verbatim
    #[error("Authentication failed: {0}")]
    Backend(String),
}

/// Task repository errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    /// Authentication problem (no session, expired session)
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Input rejected locally, before any network call
    #[error("{}", join_messages(.0))]
    Validation(Vec<ValidationErrorDetail>),

    /// Task does not exist or is not owned by the caller
    #[error("{}", not_found_message(.0))]
    NotFound(Option<Uuid>),

    /// Backend refused the write on ownership grounds
    #[error("Not allowed: {0}")]
    Forbidden(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected backend failure, surfaced verbatim
    #[error("Backend error: {0}")]
    Backend(String),
}

impl RepoError {
    /// Returns true for local validation failures
    pub fn is_validation(&self) -> bool {
        matches!(self, RepoError::Validation(_))
    }

    /// Returns true when the referenced task is missing or foreign
    pub fn is_not_found_or_forbidden(&self) -> bool {
        matches!(self, RepoError::NotFound(_) | RepoError::Forbidden(_))
    }
}

fn join_messages(details: &[ValidationErrorDetail]) -> String {
    if details.is_empty() {
        return "Validation failed".to_string();
    }
    details
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

fn not_found_message(id: &Option<Uuid>) -> String {
    match id {
        Some(id) => format!("Task not found: {}", id),
        None => "Task not found".to_string(),
    }
}

/// Convert backend errors raised by auth endpoints
impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidCredentials => AuthError::InvalidCredentials,
            BackendError::Unauthorized(_) => AuthError::SessionExpired,
            BackendError::Forbidden(msg)
            | BackendError::Conflict(msg)
            | BackendError::Rejected(msg) => AuthError::Rejected(msg),
            BackendError::Network(msg) => AuthError::Network(msg),
            BackendError::NotFound(msg) | BackendError::Decode(msg) => AuthError::Backend(msg),
            BackendError::Unexpected { status, message } => {
                AuthError::Backend(format!("{} ({})", message, status))
            }
        }
    }
}

/// Convert backend errors raised by data endpoints
impl From<BackendError> for RepoError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidCredentials | BackendError::Unauthorized(_) => {
                RepoError::Auth(AuthError::SessionExpired)
            }
            BackendError::Forbidden(msg) => RepoError::Forbidden(msg),
            BackendError::NotFound(_) => RepoError::NotFound(None),
            BackendError::Rejected(msg) => {
                RepoError::Validation(vec![ValidationErrorDetail::new("task", msg)])
            }
            BackendError::Network(msg) => RepoError::Network(msg),
            BackendError::Conflict(msg) | BackendError::Decode(msg) => RepoError::Backend(msg),
            BackendError::Unexpected { status, message } => {
                RepoError::Backend(format!("{} ({})", message, status))
            }
        }
    }
}
