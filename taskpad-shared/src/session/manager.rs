/// Session manager
///
/// Owns the authentication state of the application. Every change of state
/// goes through a single validated transition that stores the new snapshot
/// and only then notifies listeners.
///
/// Transitions are serialized end to end: a second transition waits until
/// every listener has seen the first, so the last event a listener receives
/// always matches the stored state.
///
/// The bearer credential (access/refresh token, expiry) lives here and is
/// never handed to UI code; the task repository asks for it per request via
/// [`SessionManager::valid_access_token`], which refreshes a credential that
/// is about to expire.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use taskpad_shared::backend::InMemoryBackend;
/// use taskpad_shared::session::SessionManager;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = Arc::new(InMemoryBackend::new());
/// let manager = SessionManager::start(backend).await;
///
/// let _subscription = manager.subscribe(|event| {
///     println!("{} -> {}", event.kind, event.session.status);
/// });
///
/// manager.sign_up("ada@example.com", "hunter22").await?;
/// manager.shutdown();
/// # Ok(())
/// # }
/// ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{AuthBackend, AuthEvent, AuthEventKind, BackendError};
use crate::error::{AuthError, AuthResult};
use crate::models::{AuthSession, Session, SessionEvent, SessionEventKind, SessionStatus, User};

use super::subscription::{ListenerRegistry, Subscription};

/// Credentials this close to expiry are refreshed before use
pub const REFRESH_MARGIN_SECS: i64 = 60;

struct ManagerState {
    session: Session,
    credential: Option<AuthSession>,
}

/// Tracks the current session and fans transitions out to listeners
pub struct SessionManager {
    backend: Arc<dyn AuthBackend>,
    state: RwLock<ManagerState>,
    /// Held from storing a transition until its listeners have run
    notify_order: Mutex<()>,
    /// Single refresh in flight at a time
    refresh_gate: tokio::sync::Mutex<()>,
    listeners: Arc<ListenerRegistry>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Creates a manager in the `loading` state
    ///
    /// Nothing is resolved until [`SessionManager::initialize`] runs; use
    /// [`SessionManager::start`] for the full startup sequence.
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        SessionManager {
            backend,
            state: RwLock::new(ManagerState {
                session: Session::loading(),
                credential: None,
            }),
            notify_order: Mutex::new(()),
            refresh_gate: tokio::sync::Mutex::new(()),
            listeners: ListenerRegistry::new(),
            cancel: CancellationToken::new(),
            pump: Mutex::new(None),
        }
    }

    /// Creates a manager, resolves any existing session and starts
    /// listening for provider-pushed changes
    pub async fn start(backend: Arc<dyn AuthBackend>) -> Arc<Self> {
        let manager = Arc::new(SessionManager::new(backend));

        // Subscribe before resolving so no pushed change is missed
        let events = manager.backend.subscribe();
        manager.initialize().await;
        manager.spawn_event_pump(events);

        manager
    }

    fn read(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pump(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> SessionStatus {
        self.read().session.status
    }

    fn credential(&self) -> Option<AuthSession> {
        self.read().credential.clone()
    }

    /// Applies a transition and notifies listeners
    ///
    /// Returns false if the transition is not allowed from the current
    /// status; state is left untouched in that case.
    fn transition(&self, kind: SessionEventKind, credential: Option<AuthSession>) -> bool {
        let target = match (&credential, kind) {
            (_, SessionEventKind::Loading) => SessionStatus::Loading,
            (Some(_), _) => SessionStatus::Authenticated,
            (None, _) => SessionStatus::Unauthenticated,
        };

        let _order = self.notify_order.lock().unwrap_or_else(PoisonError::into_inner);

        let event = {
            let mut state = self.write();
            let current = state.session.status;

            if !current.can_transition_to(target) {
                warn!(
                    from = %current,
                    to = %target,
                    event = %kind,
                    "Rejected invalid session transition"
                );
                return false;
            }

            state.session = match &credential {
                Some(c) if target == SessionStatus::Authenticated => {
                    Session::authenticated(c.user.clone())
                }
                _ if target == SessionStatus::Loading => Session::loading(),
                _ => Session::unauthenticated(),
            };
            state.credential = credential;

            SessionEvent {
                kind,
                session: state.session.clone(),
            }
        };

        info!(
            event = %event.kind,
            status = %event.session.status,
            user_id = ?event.session.user_id(),
            "Session transition"
        );
        self.listeners.notify(&event);
        true
    }

    /// Enters `authenticated`, passing through `loading` when signed out
    fn establish(&self, kind: SessionEventKind, session: AuthSession) {
        if self.status() == SessionStatus::Unauthenticated {
            self.transition(SessionEventKind::Loading, None);
        }
        self.transition(kind, Some(session));
    }

    /// Resolves a session the provider already holds
    ///
    /// Only acts while `loading`. A failing lookup resolves to
    /// `unauthenticated`; the error is logged, never returned.
    pub async fn initialize(&self) -> Session {
        let resolved = match self.backend.get_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Session lookup failed, continuing signed out");
                None
            }
        };

        if self.status() == SessionStatus::Loading {
            self.transition(SessionEventKind::InitialSession, resolved);
        } else {
            debug!("Session already resolved, skipping initial lookup result");
        }

        self.current_session()
    }

    /// Registers a new identity
    ///
    /// When the provider requires email verification no session is issued:
    /// the returned snapshot carries the new user with status
    /// `unauthenticated` and the manager's own state does not change.
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<Session> {
        let outcome = self.backend.sign_up(email, password).await.map_err(|e| {
            warn!(error = %e, "Sign-up failed");
            AuthError::from(e)
        })?;

        match outcome.session {
            Some(session) => {
                self.establish(SessionEventKind::SignedIn, session);
                Ok(self.current_session())
            }
            None => {
                info!(user_id = %outcome.user.id, "Sign-up accepted, verification pending");
                Ok(Session::pending_verification(outcome.user))
            }
        }
    }

    /// Authenticates with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        let entered_loading = self.status() == SessionStatus::Unauthenticated
            && self.transition(SessionEventKind::Loading, None);

        match self.backend.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.transition(SessionEventKind::SignedIn, Some(session));
                Ok(self.current_session())
            }
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                if entered_loading && self.status() == SessionStatus::Loading {
                    self.transition(SessionEventKind::SignedOut, None);
                }
                Err(e.into())
            }
        }
    }

    /// Ends the current session
    ///
    /// A no-op when nobody is signed in. If the provider reports the
    /// credential as already invalid the local session is cleared anyway.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let credential = match self.credential() {
            Some(credential) => credential,
            None => return Ok(()),
        };

        match self.backend.sign_out(&credential.access_token).await {
            Ok(()) => {}
            Err(BackendError::Unauthorized(reason)) => {
                debug!(%reason, "Credential already invalid, clearing local session");
            }
            Err(e) => {
                warn!(error = %e, "Sign-out failed");
                return Err(e.into());
            }
        }

        if self.status() == SessionStatus::Authenticated {
            self.transition(SessionEventKind::SignedOut, None);
        }
        Ok(())
    }

    /// Exchanges the refresh token for a new credential
    ///
    /// A rejected refresh token ends the session.
    pub async fn refresh(&self) -> AuthResult<Session> {
        let refresh_token = self
            .credential()
            .map(|c| c.refresh_token)
            .ok_or(AuthError::NoActiveSession)?;

        match self.backend.refresh_session(&refresh_token).await {
            Ok(session) => {
                self.transition(SessionEventKind::TokenRefreshed, Some(session));
                Ok(self.current_session())
            }
            Err(e) => {
                let err = AuthError::from(e);
                warn!(error = %err, "Token refresh failed");
                if err == AuthError::SessionExpired
                    && self.status() == SessionStatus::Authenticated
                {
                    self.transition(SessionEventKind::SignedOut, None);
                }
                Err(err)
            }
        }
    }

    /// Last known session snapshot
    pub fn current_session(&self) -> Session {
        self.read().session.clone()
    }

    /// Signed-in user, if any
    pub fn current_user(&self) -> Option<User> {
        let state = self.read();
        if state.session.is_authenticated() {
            state.session.user.clone()
        } else {
            None
        }
    }

    /// Bearer credential for data requests
    ///
    /// # Errors
    ///
    /// - `NoActiveSession` when nobody is signed in
    /// - `SessionExpired` when the credential's expiry has passed
    pub fn access_token(&self) -> AuthResult<String> {
        let state = self.read();
        let credential = match (&state.credential, state.session.is_authenticated()) {
            (Some(credential), true) => credential,
            _ => return Err(AuthError::NoActiveSession),
        };

        if credential.is_expired() {
            return Err(AuthError::SessionExpired);
        }

        Ok(credential.access_token.clone())
    }

    /// Bearer credential for data requests, refreshed first when it expires
    /// within [`REFRESH_MARGIN_SECS`]
    ///
    /// At most one refresh runs at a time; callers arriving meanwhile reuse
    /// its result. If the refresh fails but the old credential is still
    /// valid, the old credential is returned.
    pub async fn valid_access_token(&self) -> AuthResult<String> {
        if !self.needs_refresh()? {
            return self.access_token();
        }

        let _gate = self.refresh_gate.lock().await;
        if !self.needs_refresh()? {
            return self.access_token();
        }

        debug!("Access token about to expire, refreshing");
        match self.refresh().await {
            Ok(_) => self.access_token(),
            Err(err) => self.access_token().map_err(|_| err),
        }
    }

    fn needs_refresh(&self) -> AuthResult<bool> {
        let state = self.read();
        match (&state.credential, state.session.is_authenticated()) {
            (Some(credential), true) => {
                Ok(credential.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)))
            }
            _ => Err(AuthError::NoActiveSession),
        }
    }

    /// Registers a callback invoked after every session transition
    ///
    /// The callback stays registered until the returned handle is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.register(Arc::new(listener))
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn spawn_event_pump(self: &Arc<Self>, mut events: broadcast::Receiver<AuthEvent>) {
        let manager = Arc::downgrade(self);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = events.recv() => {
                        match received {
                            Ok(event) => match manager.upgrade() {
                                Some(manager) => manager.apply_pushed(event),
                                None => break,
                            },
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Auth event pump lagged, events dropped");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!("Auth event pump stopped");
        });

        *self.pump() = Some(handle);
    }

    /// Applies a provider-pushed change
    fn apply_pushed(&self, event: AuthEvent) {
        debug!(event = %event.kind, "Received pushed auth event");

        let kind = match event.kind {
            AuthEventKind::SignedIn => SessionEventKind::SignedIn,
            AuthEventKind::TokenRefreshed => SessionEventKind::TokenRefreshed,
            AuthEventKind::UserUpdated => SessionEventKind::UserUpdated,
            AuthEventKind::SignedOut => {
                if self.status() != SessionStatus::Unauthenticated {
                    self.transition(SessionEventKind::SignedOut, None);
                }
                return;
            }
        };

        match event.session {
            Some(session) => self.establish(kind, session),
            None => warn!(event = %event.kind, "Pushed auth event without a session, ignoring"),
        }
    }

    /// Whether the event pump is still running
    pub fn is_listening(&self) -> bool {
        self.pump()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stops listening for provider-pushed changes
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.pump().take() {
            handle.abort();
            info!("Session manager shut down");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use std::sync::Mutex as StdMutex;

    async fn signed_up(backend: &Arc<InMemoryBackend>, email: &str) {
        backend.sign_up(email, "hunter22").await.unwrap();
    }

    fn recorder(manager: &SessionManager) -> (Arc<StdMutex<Vec<SessionEvent>>>, Subscription) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = manager.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (events, subscription)
    }

    #[tokio::test]
    async fn test_initialize_without_session() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend);
        assert!(manager.current_session().is_loading());

        let session = manager.initialize().await;
        assert_eq!(session.status, SessionStatus::Unauthenticated);
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn test_initialize_resolves_existing_session() {
        let backend = Arc::new(InMemoryBackend::new());
        signed_up(&backend, "ada@example.com").await;

        let manager = SessionManager::new(backend);
        let session = manager.initialize().await;
        assert!(session.is_authenticated());
        assert_eq!(session.user.unwrap().email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_initialize_lookup_failure_resolves_signed_out() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_next_request(BackendError::Network("offline".to_string()));

        let manager = SessionManager::new(backend);
        let session = manager.initialize().await;
        assert_eq!(session.status, SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_transitions() {
        let backend = Arc::new(InMemoryBackend::new());
        signed_up(&backend, "ada@example.com").await;
        let manager = SessionManager::new(backend.clone());
        backend.fail_next_request(BackendError::Network("offline".to_string()));
        manager.initialize().await;

        let (events, _subscription) = recorder(&manager);
        let session = manager.sign_in("ada@example.com", "hunter22").await.unwrap();
        assert!(session.is_authenticated());

        let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SessionEventKind::Loading, SessionEventKind::SignedIn]);
    }

    #[tokio::test]
    async fn test_failed_sign_in_returns_to_unauthenticated() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend);
        manager.initialize().await;

        let (events, _subscription) = recorder(&manager);
        let err = manager.sign_in("nobody@example.com", "wrong-password").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(manager.current_session().status, SessionStatus::Unauthenticated);

        let statuses: Vec<_> = events.lock().unwrap().iter().map(|e| e.session.status).collect();
        assert_eq!(
            statuses,
            vec![SessionStatus::Loading, SessionStatus::Unauthenticated]
        );
    }

    #[tokio::test]
    async fn test_sign_up_pending_verification_leaves_state() {
        let backend = Arc::new(InMemoryBackend::new().with_email_confirmation());
        let manager = SessionManager::new(backend);
        manager.initialize().await;

        let (events, _subscription) = recorder(&manager);
        let session = manager.sign_up("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(session.status, SessionStatus::Unauthenticated);
        assert_eq!(session.user.unwrap().email, "ada@example.com");

        assert_eq!(manager.current_session(), Session::unauthenticated());
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_when_signed_out_is_noop() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend.clone());
        manager.initialize().await;

        let before = backend.request_count();
        manager.sign_out().await.unwrap();
        assert_eq!(backend.request_count(), before);
    }

    #[tokio::test]
    async fn test_sign_out_keeps_state_on_transport_failure() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend.clone());
        manager.initialize().await;
        manager.sign_up("ada@example.com", "hunter22").await.unwrap();

        backend.fail_next_request(BackendError::Network("offline".to_string()));
        let err = manager.sign_out().await.unwrap_err();
        assert!(matches!(err, AuthError::Network(_)));
        assert!(manager.current_session().is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_out_with_revoked_token_clears_state() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend.clone());
        manager.initialize().await;
        manager.sign_up("ada@example.com", "hunter22").await.unwrap();

        backend.fail_next_request(BackendError::Unauthorized("invalid JWT".to_string()));
        manager.sign_out().await.unwrap();
        assert_eq!(manager.current_session(), Session::unauthenticated());
        assert_eq!(manager.access_token().unwrap_err(), AuthError::NoActiveSession);
    }

    #[tokio::test]
    async fn test_access_token_expired() {
        let backend = Arc::new(InMemoryBackend::new().with_session_ttl(chrono::Duration::zero()));
        let manager = SessionManager::new(backend);
        manager.initialize().await;
        manager.sign_up("ada@example.com", "hunter22").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(manager.access_token().unwrap_err(), AuthError::SessionExpired);
    }

    #[tokio::test]
    async fn test_refresh_replaces_credential() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend);
        manager.initialize().await;
        manager.sign_up("ada@example.com", "hunter22").await.unwrap();
        let before = manager.access_token().unwrap();

        let (events, _subscription) = recorder(&manager);
        let session = manager.refresh().await.unwrap();
        assert!(session.is_authenticated());
        assert_ne!(manager.access_token().unwrap(), before);
        assert_eq!(events.lock().unwrap()[0].kind, SessionEventKind::TokenRefreshed);
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend);
        manager.initialize().await;

        assert_eq!(manager.refresh().await.unwrap_err(), AuthError::NoActiveSession);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_rejected() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend);
        manager.initialize().await;

        let (events, _subscription) = recorder(&manager);
        assert!(!manager.transition(SessionEventKind::InitialSession, None));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listener_sees_stored_state() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = Arc::new(SessionManager::new(backend));
        manager.initialize().await;

        let observed = Arc::new(StdMutex::new(Vec::new()));
        let sink = observed.clone();
        let weak = Arc::downgrade(&manager);
        let _subscription = manager.subscribe(move |event| {
            let stored = weak.upgrade().map(|m| m.current_session());
            sink.lock().unwrap().push(stored == Some(event.session.clone()));
        });

        manager.sign_up("ada@example.com", "hunter22").await.unwrap();
        let observed = observed.lock().unwrap();
        assert!(!observed.is_empty());
        assert!(observed.iter().all(|matched| *matched));
    }

    #[tokio::test]
    async fn test_valid_access_token_refreshes_near_expiry() {
        let backend = Arc::new(InMemoryBackend::new().with_session_ttl(chrono::Duration::seconds(30)));
        let manager = SessionManager::new(backend);
        manager.initialize().await;
        manager.sign_up("ada@example.com", "hunter22").await.unwrap();
        let before = manager.access_token().unwrap();

        let (events, _subscription) = recorder(&manager);
        let token = manager.valid_access_token().await.unwrap();
        assert_ne!(token, before);
        assert_eq!(manager.access_token().unwrap(), token);

        let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SessionEventKind::TokenRefreshed]);
    }

    #[tokio::test]
    async fn test_valid_access_token_keeps_fresh_credential() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend.clone());
        manager.initialize().await;
        manager.sign_up("ada@example.com", "hunter22").await.unwrap();

        let before = backend.request_count();
        assert_eq!(
            manager.valid_access_token().await.unwrap(),
            manager.access_token().unwrap()
        );
        assert_eq!(backend.request_count(), before);
    }

    #[tokio::test]
    async fn test_valid_access_token_falls_back_when_refresh_fails() {
        let backend = Arc::new(InMemoryBackend::new().with_session_ttl(chrono::Duration::seconds(30)));
        let manager = SessionManager::new(backend.clone());
        manager.initialize().await;
        manager.sign_up("ada@example.com", "hunter22").await.unwrap();
        let before = manager.access_token().unwrap();

        // Not yet expired, so the old credential is still usable
        backend.fail_next_request(BackendError::Network("offline".to_string()));
        assert_eq!(manager.valid_access_token().await.unwrap(), before);
        assert!(manager.current_session().is_authenticated());
    }

    #[tokio::test]
    async fn test_valid_access_token_without_session() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::new(backend);
        manager.initialize().await;

        assert_eq!(
            manager.valid_access_token().await.unwrap_err(),
            AuthError::NoActiveSession
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = SessionManager::start(backend).await;
        assert!(manager.is_listening());

        manager.shutdown();
        manager.shutdown();
        assert!(!manager.is_listening());
    }
}
