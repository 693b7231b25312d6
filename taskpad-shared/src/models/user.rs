/// Identity records issued by the hosted auth provider
///
/// Users are owned entirely by the provider; this crate only reads them.
/// An [`AuthSession`] pairs a user with the bearer credential that scopes
/// every data call.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identity as reported by the auth provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Email address used to sign in
    #[serde(default)]
    pub email: String,

    /// When the email address was verified (None while verification is pending)
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the provider has verified the email address
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// Authenticated session issued by the provider
///
/// Holds the bearer credential. `Debug` output redacts both tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Short-lived bearer token attached to data calls
    pub access_token: String,

    /// Long-lived token exchanged for a new access token
    pub refresh_token: String,

    /// When the access token stops being accepted
    pub expires_at: Option<DateTime<Utc>>,

    /// Identity the session belongs to
    pub user: User,
}

impl AuthSession {
    /// Checks whether the access token has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    /// Checks whether the access token has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Checks whether the access token expires within `margin` from now
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.is_expired_at(Utc::now() + margin)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<DateTime<Utc>>) -> AuthSession {
        AuthSession {
            access_token: "access-secret".to_string(),
            refresh_token: "refresh-secret".to_string(),
            expires_at,
            user: User {
                id: Uuid::new_v4(),
                email: "alice@example.com".to_string(),
                email_confirmed_at: None,
            },
        }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(!session(None).is_expired_at(now));
        assert!(!session(Some(now + Duration::hours(1))).is_expired_at(now));
        assert!(session(Some(now - Duration::seconds(1))).is_expired_at(now));
    }

    #[test]
    fn test_expires_within() {
        let soon = session(Some(Utc::now() + Duration::seconds(30)));
        assert!(!soon.is_expired());
        assert!(soon.expires_within(Duration::seconds(60)));
        assert!(!soon.expires_within(Duration::seconds(10)));
        assert!(!session(None).expires_within(Duration::hours(1)));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let debug = format!("{:?}", session(None));
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));
        assert!(debug.contains("alice@example.com"));
    }

    #[test]
    fn test_user_ignores_unknown_fields() {
        let id = Uuid::new_v4();
        let json = serde_json::json!({
            "id": id,
            "aud": "authenticated",
            "role": "authenticated",
            "email": "bob@example.com",
            "email_confirmed_at": null,
            "app_metadata": {"provider": "email"}
        });

        let user: User = serde_json::from_value(json).unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.email, "bob@example.com");
        assert!(!user.is_confirmed());
    }
}
