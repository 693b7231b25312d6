/// Boundary to the hosted backend
///
/// The hosted service exposes two endpoint groups, each modeled as a trait:
///
/// - [`AuthBackend`]: identity provider (register, authenticate, invalidate,
///   current session/identity, token refresh) plus a push channel of
///   [`AuthEvent`]s for session changes the client did not initiate.
/// - [`TaskStore`]: the `tasks` collection. Every call carries the bearer
///   credential; the backend applies a row-level filter so callers only ever
///   see and touch their own rows.
///
/// # Implementations
///
/// - [`RestBackend`]: HTTP client for the hosted service
/// - [`InMemoryBackend`]: deterministic in-process backend for tests and demos
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use taskpad_shared::backend::{AuthBackend, InMemoryBackend, TaskStore};
///
/// let backend = Arc::new(InMemoryBackend::new());
/// let auth: Arc<dyn AuthBackend> = backend.clone();
/// let store: Arc<dyn TaskStore> = backend;
/// # let _ = (auth, store);
/// ```

pub mod memory;
pub mod rest;
pub mod session_file;

pub use memory::InMemoryBackend;
pub use rest::RestBackend;
pub use session_file::SessionFile;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{AuthSession, Task, TaskInsert, TaskPatch, User};

/// Capacity of the auth event channel
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// Backend error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Email/password pair rejected
    #[error("Invalid login credentials")]
    InvalidCredentials,

    /// Missing, invalid or expired bearer credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Row-level security or permission refusal
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Endpoint or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness conflict (e.g. email already registered)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Input refused by the backend
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),

    /// Any other non-success status
    #[error("Backend error {status}: {message}")]
    Unexpected { status: u16, message: String },
}

/// Backend result type alias
pub type BackendResult<T> = Result<T, BackendError>;

/// Kind of provider-pushed auth event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthEventKind::SignedIn => write!(f, "signed_in"),
            AuthEventKind::SignedOut => write!(f, "signed_out"),
            AuthEventKind::TokenRefreshed => write!(f, "token_refreshed"),
            AuthEventKind::UserUpdated => write!(f, "user_updated"),
        }
    }
}

/// Session change pushed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,

    /// New session (None for sign-out)
    pub session: Option<AuthSession>,
}

impl AuthEvent {
    pub fn signed_in(session: AuthSession) -> Self {
        AuthEvent {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        AuthEvent {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }

    pub fn token_refreshed(session: AuthSession) -> Self {
        AuthEvent {
            kind: AuthEventKind::TokenRefreshed,
            session: Some(session),
        }
    }

    pub fn user_updated(session: AuthSession) -> Self {
        AuthEvent {
            kind: AuthEventKind::UserUpdated,
            session: Some(session),
        }
    }
}

/// Result of a registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpOutcome {
    /// Newly registered identity
    pub user: User,

    /// Present when the provider signs the user in immediately;
    /// None while email verification is pending
    pub session: Option<AuthSession>,
}

/// Identity provider endpoint group
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Registers a new identity
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome>;

    /// Exchanges an email/password pair for a session
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> BackendResult<AuthSession>;

    /// Invalidates the session behind `access_token`
    async fn sign_out(&self, access_token: &str) -> BackendResult<()>;

    /// Returns the session the provider already holds, if any
    async fn get_session(&self) -> BackendResult<Option<AuthSession>>;

    /// Resolves the identity behind `access_token`
    async fn get_user(&self, access_token: &str) -> BackendResult<User>;

    /// Exchanges a refresh token for a new session
    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthSession>;

    /// Subscribes to provider-pushed session changes
    ///
    /// Only changes the client did not initiate through this trait are
    /// pushed (e.g. email verification completed elsewhere).
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Data endpoint group for the `tasks` collection
///
/// Results are already restricted to rows owned by the user behind the
/// access token.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Selects the caller's tasks, newest first
    async fn select_tasks(&self, access_token: &str) -> BackendResult<Vec<Task>>;

    /// Inserts a task and returns the stored row
    async fn insert_task(&self, access_token: &str, task: &TaskInsert) -> BackendResult<Task>;

    /// Updates an owned task by ID
    ///
    /// Returns None if no owned row matched.
    async fn update_task(
        &self,
        access_token: &str,
        id: Uuid,
        patch: &TaskPatch,
    ) -> BackendResult<Option<Task>>;

    /// Deletes an owned task by ID
    ///
    /// Returns false if no owned row matched.
    async fn delete_task(&self, access_token: &str, id: Uuid) -> BackendResult<bool>;
}
