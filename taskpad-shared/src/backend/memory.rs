/// In-memory backend for testing and demos
///
/// Behaves like the hosted service as far as this crate can observe:
///
/// - Accounts with email/password sign-in and an optional email
///   verification gate
/// - Opaque access/refresh tokens with expiry and refresh rotation
/// - A `tasks` table guarded by row-level security: reads, updates and
///   deletes only see the caller's rows, and inserts must name the caller
///   as owner
/// - Strictly increasing `created_at` values, so insertion order is always
///   recoverable from the ordering column
///
/// Test hooks let callers simulate verification completed in another tab,
/// expired credentials, and transport failures, and count round trips.
///
/// # Example
///
/// ```
/// use taskpad_shared::backend::{AuthBackend, InMemoryBackend};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = InMemoryBackend::new();
/// backend.sign_up("alice@example.com", "secret123").await?;
/// let session = backend.sign_in_with_password("alice@example.com", "secret123").await?;
/// assert_eq!(session.user.email, "alice@example.com");
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthBackend, AuthEvent, BackendError, BackendResult, SignUpOutcome, TaskStore,
    AUTH_EVENT_CAPACITY,
};
use crate::models::{AuthSession, Task, TaskInsert, TaskPatch, User};

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 6;

fn default_session_ttl() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredTask {
    seq: u64,
    task: Task,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Accounts keyed by lowercase email
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, IssuedToken>,
    refresh_tokens: HashMap<String, Uuid>,
    tasks: Vec<StoredTask>,
    next_seq: u64,
    last_created_at: Option<DateTime<Utc>>,
    /// Session the client currently holds (what `get_session` returns)
    current: Option<AuthSession>,
    fail_next: Option<BackendError>,
    request_count: u64,
}

/// In-memory backend implementation
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthEvent>,
    require_email_confirmation: bool,
    session_ttl: Duration,
}

impl InMemoryBackend {
    /// Creates a backend that signs users in right after registration
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        InMemoryBackend {
            state: Mutex::new(MemoryState::default()),
            events,
            require_email_confirmation: false,
            session_ttl: default_session_ttl(),
        }
    }

    /// Requires email verification before the first sign-in
    pub fn with_email_confirmation(mut self) -> Self {
        self.require_email_confirmation = true;
        self
    }

    /// Sets how long issued access tokens stay valid
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts a round trip and returns any injected failure
    fn begin_request(&self, state: &mut MemoryState) -> BackendResult<()> {
        state.request_count += 1;
        match state.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn issue_session(&self, state: &mut MemoryState, user: User) -> AuthSession {
        let access_token = Uuid::new_v4().simple().to_string();
        let refresh_token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + self.session_ttl;

        state.access_tokens.insert(
            access_token.clone(),
            IssuedToken {
                user_id: user.id,
                expires_at,
            },
        );
        state.refresh_tokens.insert(refresh_token.clone(), user.id);

        let session = AuthSession {
            access_token,
            refresh_token,
            expires_at: Some(expires_at),
            user,
        };
        state.current = Some(session.clone());
        session
    }

    /// Resolves the user behind a bearer token
    fn authorize(state: &MemoryState, access_token: &str) -> BackendResult<Uuid> {
        let issued = state
            .access_tokens
            .get(access_token)
            .ok_or_else(|| BackendError::Unauthorized("invalid JWT".to_string()))?;

        if issued.expires_at <= Utc::now() {
            return Err(BackendError::Unauthorized("JWT expired".to_string()));
        }

        Ok(issued.user_id)
    }

    fn find_user(state: &MemoryState, user_id: Uuid) -> Option<User> {
        state
            .accounts
            .values()
            .find(|a| a.user.id == user_id)
            .map(|a| a.user.clone())
    }

    /// Next `created_at`, strictly after every earlier insert
    fn next_created_at(state: &mut MemoryState) -> DateTime<Utc> {
        let now = Utc::now();
        let created_at = match state.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        state.last_created_at = Some(created_at);
        created_at
    }

    /// Marks an email as verified and signs that user in
    ///
    /// Simulates the verification link being opened in another tab: the
    /// resulting session is pushed to subscribers as a sign-in event.
    /// A link is single-use, so an already verified address is rejected.
    pub fn confirm_email(&self, email: &str) -> BackendResult<AuthSession> {
        let session = {
            let mut state = self.state();
            let key = email.trim().to_lowercase();
            let account = state
                .accounts
                .get_mut(&key)
                .ok_or_else(|| BackendError::NotFound(format!("no user with email {}", email)))?;
            if account.user.is_confirmed() {
                return Err(BackendError::Rejected(
                    "Email link is invalid or has expired".to_string(),
                ));
            }
            account.user.email_confirmed_at = Some(Utc::now());
            let user = account.user.clone();
            self.issue_session(&mut state, user)
        };

        tracing::debug!(user_id = %session.user.id, "Email confirmed, pushing sign-in");
        let _ = self.events.send(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    /// Pushes an arbitrary auth event to subscribers
    pub fn push_event(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    /// Drops the client-held session without revoking its tokens
    ///
    /// Simulates a second device: the next `get_session` finds nothing.
    pub fn forget_session(&self) {
        self.state().current = None;
    }

    /// Makes an issued access token expire immediately
    pub fn expire_token(&self, access_token: &str) {
        if let Some(issued) = self.state().access_tokens.get_mut(access_token) {
            issued.expires_at = Utc::now() - Duration::seconds(1);
        }
    }

    /// Fails the next request with `err`
    pub fn fail_next_request(&self, err: BackendError) {
        self.state().fail_next = Some(err);
    }

    /// Number of round trips served so far
    pub fn request_count(&self) -> u64 {
        self.state().request_count
    }

    /// Every stored task regardless of owner, in insertion order
    pub fn all_tasks(&self) -> Vec<Task> {
        self.state().tasks.iter().map(|t| t.task.clone()).collect()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for InMemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome> {
        let mut state = self.state();
        self.begin_request(&mut state)?;

        let key = email.trim().to_lowercase();
        if !key.contains('@') {
            return Err(BackendError::Rejected(
                "Unable to validate email address: invalid format".to_string(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::Rejected(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if state.accounts.contains_key(&key) {
            return Err(BackendError::Conflict("User already registered".to_string()));
        }

        let confirmed_at = if self.require_email_confirmation {
            None
        } else {
            Some(Utc::now())
        };
        let user = User {
            id: Uuid::new_v4(),
            email: key.clone(),
            email_confirmed_at: confirmed_at,
        };
        state.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );

        let session = if self.require_email_confirmation {
            None
        } else {
            Some(self.issue_session(&mut state, user.clone()))
        };

        Ok(SignUpOutcome { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthSession> {
        let mut state = self.state();
        self.begin_request(&mut state)?;

        let account = state
            .accounts
            .get(&email.trim().to_lowercase())
            .filter(|a| a.password == password)
            .cloned()
            .ok_or(BackendError::InvalidCredentials)?;

        if !account.user.is_confirmed() {
            return Err(BackendError::Rejected("Email not confirmed".to_string()));
        }

        Ok(self.issue_session(&mut state, account.user))
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let mut state = self.state();
        self.begin_request(&mut state)?;

        let issued = state
            .access_tokens
            .remove(access_token)
            .ok_or_else(|| BackendError::Unauthorized("invalid JWT".to_string()))?;

        // Sign-out revokes every refresh token of the user
        state.refresh_tokens.retain(|_, user_id| *user_id != issued.user_id);
        state.current = None;
        Ok(())
    }

    async fn get_session(&self) -> BackendResult<Option<AuthSession>> {
        let mut state = self.state();
        self.begin_request(&mut state)?;

        let valid = match &state.current {
            Some(session) => Self::authorize(&state, &session.access_token).is_ok(),
            None => false,
        };

        if valid {
            Ok(state.current.clone())
        } else {
            Ok(None)
        }
    }

    async fn get_user(&self, access_token: &str) -> BackendResult<User> {
        let mut state = self.state();
        self.begin_request(&mut state)?;

        let user_id = Self::authorize(&state, access_token)?;
        Self::find_user(&state, user_id)
            .ok_or_else(|| BackendError::Unauthorized("user no longer exists".to_string()))
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        let mut state = self.state();
        self.begin_request(&mut state)?;

        let user_id = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| BackendError::Unauthorized("Invalid Refresh Token".to_string()))?;
        let user = Self::find_user(&state, user_id)
            .ok_or_else(|| BackendError::Unauthorized("user no longer exists".to_string()))?;

        Ok(self.issue_session(&mut state, user))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl TaskStore for InMemoryBackend {
    async fn select_tasks(&self, access_token: &str) -> BackendResult<Vec<Task>> {
        let mut state = self.state();
        self.begin_request(&mut state)?;
        let user_id = Self::authorize(&state, access_token)?;

        let mut rows: Vec<&StoredTask> = state
            .tasks
            .iter()
            .filter(|t| t.task.owner_id == user_id)
            .collect();
        rows.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        Ok(rows.into_iter().map(|t| t.task.clone()).collect())
    }

    async fn insert_task(&self, access_token: &str, task: &TaskInsert) -> BackendResult<Task> {
        let mut state = self.state();
        self.begin_request(&mut state)?;
        let user_id = Self::authorize(&state, access_token)?;

        if task.owner_id != user_id {
            return Err(BackendError::Forbidden(
                "new row violates row-level security policy for table \"tasks\"".to_string(),
            ));
        }
        if task.title.is_empty() {
            return Err(BackendError::Rejected(
                "null value in column \"title\" violates not-null constraint".to_string(),
            ));
        }

        let created_at = Self::next_created_at(&mut state);
        let row = Task {
            id: Uuid::new_v4(),
            owner_id: user_id,
            title: task.title.clone(),
            description: task.description.clone(),
            is_complete: task.is_complete,
            created_at,
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.push(StoredTask {
            seq,
            task: row.clone(),
        });

        Ok(row)
    }

    async fn update_task(
        &self,
        access_token: &str,
        id: Uuid,
        patch: &TaskPatch,
    ) -> BackendResult<Option<Task>> {
        let mut state = self.state();
        self.begin_request(&mut state)?;
        let user_id = Self::authorize(&state, access_token)?;

        let row = state
            .tasks
            .iter_mut()
            .find(|t| t.task.id == id && t.task.owner_id == user_id);

        Ok(row.map(|stored| {
            patch.apply_to(&mut stored.task);
            stored.task.clone()
        }))
    }

    async fn delete_task(&self, access_token: &str, id: Uuid) -> BackendResult<bool> {
        let mut state = self.state();
        self.begin_request(&mut state)?;
        let user_id = Self::authorize(&state, access_token)?;

        let before = state.tasks.len();
        state
            .tasks
            .retain(|t| !(t.task.id == id && t.task.owner_id == user_id));

        Ok(state.tasks.len() < before)
    }
}
