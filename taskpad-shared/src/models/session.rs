/// Session snapshot handed to UI code
///
/// # State Machine
///
/// ```text
/// unauthenticated → loading → authenticated
///                   loading → unauthenticated
/// authenticated → unauthenticated
/// authenticated → authenticated   (token refresh, user update)
/// ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::user::User;

/// Authentication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Nobody is signed in
    Unauthenticated,

    /// A session lookup or sign-in is in flight
    Loading,

    /// A user is signed in
    Authenticated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Loading => "loading",
            SessionStatus::Authenticated => "authenticated",
        }
    }

    /// Checks if transition to target status is valid
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        match (self, target) {
            (SessionStatus::Unauthenticated, SessionStatus::Loading) => true,

            (SessionStatus::Loading, SessionStatus::Authenticated) => true,
            (SessionStatus::Loading, SessionStatus::Unauthenticated) => true,

            (SessionStatus::Authenticated, SessionStatus::Unauthenticated) => true,
            (SessionStatus::Authenticated, SessionStatus::Authenticated) => true,

            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current authentication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Signed-in user, if any
    pub user: Option<User>,

    /// Authentication status
    pub status: SessionStatus,
}

impl Session {
    /// Session at application start, before resolution
    pub fn loading() -> Self {
        Session {
            user: None,
            status: SessionStatus::Loading,
        }
    }

    pub fn unauthenticated() -> Self {
        Session {
            user: None,
            status: SessionStatus::Unauthenticated,
        }
    }

    pub fn authenticated(user: User) -> Self {
        Session {
            user: Some(user),
            status: SessionStatus::Authenticated,
        }
    }

    /// A registered identity still waiting on email verification
    pub fn pending_verification(user: User) -> Self {
        Session {
            user: Some(user),
            status: SessionStatus::Unauthenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Loading
    }

    /// ID of the signed-in user
    pub fn user_id(&self) -> Option<Uuid> {
        if self.is_authenticated() {
            self.user.as_ref().map(|u| u.id)
        } else {
            None
        }
    }
}

/// Kind of session transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// Entered the loading state
    Loading,

    /// Startup resolution finished
    InitialSession,

    /// A user signed in
    SignedIn,

    /// The user signed out
    SignedOut,

    /// The bearer credential was replaced
    TokenRefreshed,

    /// The user record changed
    UserUpdated,
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEventKind::Loading => write!(f, "loading"),
            SessionEventKind::InitialSession => write!(f, "initial_session"),
            SessionEventKind::SignedIn => write!(f, "signed_in"),
            SessionEventKind::SignedOut => write!(f, "signed_out"),
            SessionEventKind::TokenRefreshed => write!(f, "token_refreshed"),
            SessionEventKind::UserUpdated => write!(f, "user_updated"),
        }
    }
}

/// Notification delivered to session listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,

    /// Snapshot after the transition was applied
    pub session: Session,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            email_confirmed_at: None,
        }
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(SessionStatus::Unauthenticated.as_str(), "unauthenticated");
        assert_eq!(SessionStatus::Loading.as_str(), "loading");
        assert_eq!(SessionStatus::Authenticated.as_str(), "authenticated");
    }

    #[test]
    fn test_status_transitions() {
        use SessionStatus::*;

        assert!(Unauthenticated.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Authenticated));
        assert!(Loading.can_transition_to(Unauthenticated));
        assert!(Authenticated.can_transition_to(Unauthenticated));
        assert!(Authenticated.can_transition_to(Authenticated));

        assert!(!Unauthenticated.can_transition_to(Authenticated));
        assert!(!Unauthenticated.can_transition_to(Unauthenticated));
        assert!(!Authenticated.can_transition_to(Loading));
        assert!(!Loading.can_transition_to(Loading));
    }

    #[test]
    fn test_user_id_only_when_authenticated() {
        let u = user();
        assert_eq!(Session::authenticated(u.clone()).user_id(), Some(u.id));
        assert_eq!(Session::pending_verification(u).user_id(), None);
        assert_eq!(Session::loading().user_id(), None);
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(SessionEventKind::SignedIn.to_string(), "signed_in");
        assert_eq!(SessionEventKind::TokenRefreshed.to_string(), "token_refreshed");
        assert_eq!(SessionEventKind::InitialSession.to_string(), "initial_session");
    }
}
