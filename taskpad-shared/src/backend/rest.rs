/// HTTP client for the hosted backend
///
/// Talks to a GoTrue-compatible auth API under `/auth/v1` and a
/// PostgREST-compatible data API under `/rest/v1`.
///
/// # Requests
///
/// ```text
/// POST   /auth/v1/signup
/// POST   /auth/v1/token?grant_type=password
/// POST   /auth/v1/token?grant_type=refresh_token
/// POST   /auth/v1/logout
/// GET    /auth/v1/user
/// GET    /rest/v1/tasks?select=*&order=created_at.desc
/// POST   /rest/v1/tasks
/// PATCH  /rest/v1/tasks?id=eq.{id}
/// DELETE /rest/v1/tasks?id=eq.{id}
/// ```
///
/// Every request carries the project's anon key in the `apikey` header.
/// Calls made on behalf of a user add `Authorization: Bearer {token}`.
/// Writes ask for `Prefer: return=representation`, so an empty result array
/// means row-level security filtered the target row out.
///
/// With a [`SessionFile`] attached, the held session is restored at
/// construction and written back whenever it changes.
///
/// # Example
///
/// ```no_run
/// use taskpad_shared::backend::{AuthBackend, RestBackend};
/// use taskpad_shared::config::BackendConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BackendConfig::from_env()?;
/// let backend = RestBackend::new(&config)?;
/// let session = backend.sign_in_with_password("alice@example.com", "secret123").await?;
/// println!("Signed in as {}", session.user.email);
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthBackend, AuthEvent, BackendError, BackendResult, SessionFile, SignUpOutcome, TaskStore,
    AUTH_EVENT_CAPACITY,
};
use crate::config::BackendConfig;
use crate::models::{AuthSession, Task, TaskInsert, TaskPatch, User};

/// PostgREST error code for insufficient privilege (row-level security)
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Convert reqwest errors to backend errors
impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

/// Session payload returned by token and signup endpoints
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => Utc.timestamp_opt(at, 0).single(),
            (None, Some(secs)) => Some(Utc::now() + Duration::seconds(secs)),
            (None, None) => None,
        };

        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Signup answers with a session when no verification is required,
/// and with the bare user otherwise
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(User),
}

/// Union of GoTrue and PostgREST error bodies
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Maps a non-success response onto a backend error
fn error_from_response(status: StatusCode, body: &str) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    let message = parsed
        .error_description
        .clone()
        .or_else(|| parsed.msg.clone())
        .or_else(|| parsed.message.clone())
        .or_else(|| parsed.error.clone())
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });

    if parsed.error.as_deref() == Some("invalid_grant")
        || parsed.error_code.as_deref() == Some("invalid_credentials")
    {
        // GoTrue also answers invalid_grant for unconfirmed emails
        if message.to_lowercase().contains("not confirmed") {
            return BackendError::Rejected(message);
        }
        return BackendError::InvalidCredentials;
    }

    let pg_code = parsed.code.as_ref().and_then(|c| c.as_str());
    if pg_code == Some(PG_INSUFFICIENT_PRIVILEGE) {
        return BackendError::Forbidden(message);
    }

    match status {
        StatusCode::UNAUTHORIZED => BackendError::Unauthorized(message),
        StatusCode::FORBIDDEN => BackendError::Forbidden(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::CONFLICT => BackendError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            BackendError::Rejected(message)
        }
        _ => BackendError::Unexpected {
            status: status.as_u16(),
            message,
        },
    }
}

/// Tokens carried in a verification or magic-link redirect
#[derive(Debug, Clone, PartialEq, Eq)]
struct RedirectTokens {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
}

/// Extracts session tokens from a redirect URL
///
/// The provider puts them in the fragment (`#access_token=...`); some
/// flows use the query string instead.
fn parse_redirect(url: &str) -> BackendResult<RedirectTokens> {
    let mut parsed = Url::parse(url)
        .map_err(|e| BackendError::Rejected(format!("Invalid redirect URL: {}", e)))?;

    if let Some(fragment) = parsed.fragment().map(str::to_string) {
        parsed.set_query(Some(&fragment));
    }

    let mut access_token = None;
    let mut refresh_token = None;
    let mut expires_in = None;
    let mut error = None;

    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "access_token" => access_token = Some(value.into_owned()),
            "refresh_token" => refresh_token = Some(value.into_owned()),
            "expires_in" => expires_in = value.parse::<i64>().ok(),
            "error_description" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(BackendError::Rejected(error));
    }

    match (access_token, refresh_token) {
        (Some(access_token), Some(refresh_token)) => Ok(RedirectTokens {
            access_token,
            refresh_token,
            expires_in,
        }),
        _ => Err(BackendError::Rejected(
            "Redirect URL carries no session".to_string(),
        )),
    }
}

/// REST backend implementation
pub struct RestBackend {
    http: Client,
    base_url: String,
    anon_key: String,
    current: Mutex<Option<AuthSession>>,
    session_file: Option<SessionFile>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestBackend {
    /// Creates a client for the configured project
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(RestBackend {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            current: Mutex::new(None),
            session_file: None,
            events,
        })
    }

    /// Seeds a previously persisted session
    pub fn with_session(self, session: AuthSession) -> Self {
        *self.current() = Some(session);
        self
    }

    /// Restores the session kept in `file` and keeps the file up to date
    pub fn with_session_file(mut self, file: SessionFile) -> Self {
        if let Some(session) = file.load() {
            tracing::info!(user_id = %session.user.id, "Restored persisted session");
            self = self.with_session(session);
        }
        self.session_file = Some(file);
        self
    }

    fn current(&self) -> MutexGuard<'_, Option<AuthSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self, session: Option<AuthSession>) {
        if let Some(file) = &self.session_file {
            let written = match &session {
                Some(session) => file.save(session),
                None => file.clear(),
            };
            if let Err(e) = written {
                tracing::warn!(path = %file.path().display(), error = %e, "Failed to update session file");
            }
        }
        *self.current() = session;
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn tasks_url(&self) -> String {
        format!("{}/rest/v1/tasks", self.base_url)
    }

    fn request(&self, builder: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        let builder = builder.header("apikey", &self.anon_key);
        match access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends a request and decodes a JSON body
    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> BackendResult<T> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }

        Ok(response.json::<T>().await?)
    }

    /// Sends a request whose success body is ignored
    async fn send_empty(&self, builder: RequestBuilder) -> BackendResult<()> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }

        Ok(())
    }

    /// Completes a sign-in from a verification or magic-link redirect
    ///
    /// Resolves the user behind the carried token, stores the session and
    /// pushes a sign-in event to subscribers.
    pub async fn accept_redirect(&self, url: &str) -> BackendResult<AuthSession> {
        let tokens = parse_redirect(url)?;
        let user = self.get_user(&tokens.access_token).await?;

        let session = AuthSession {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            user,
        };

        self.store(Some(session.clone()));
        tracing::debug!(user_id = %session.user.id, "Session accepted from redirect");
        let _ = self.events.send(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl AuthBackend for RestBackend {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome> {
        tracing::debug!("POST /auth/v1/signup");
        let builder = self.http.post(self.auth_url("signup")).json(&serde_json::json!({
            "email": email,
            "password": password,
        }));

        let outcome = match self.send_json::<SignUpResponse>(self.request(builder, None)).await? {
            SignUpResponse::Session(token) => {
                let session = token.into_session();
                self.store(Some(session.clone()));
                SignUpOutcome {
                    user: session.user.clone(),
                    session: Some(session),
                }
            }
            SignUpResponse::User(user) => SignUpOutcome {
                user,
                session: None,
            },
        };

        Ok(outcome)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthSession> {
        tracing::debug!("POST /auth/v1/token?grant_type=password");
        let builder = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }));

        let token: TokenResponse = self.send_json(self.request(builder, None)).await?;
        let session = token.into_session();
        self.store(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        tracing::debug!("POST /auth/v1/logout");
        let builder = self.http.post(self.auth_url("logout"));
        let result = self.send_empty(self.request(builder, Some(access_token))).await;

        // A rejected token means the session is already gone remotely
        if matches!(result, Ok(()) | Err(BackendError::Unauthorized(_))) {
            self.store(None);
        }
        result
    }

    async fn get_session(&self) -> BackendResult<Option<AuthSession>> {
        let stored = self.current().clone();

        let session = match stored {
            Some(session) if session.is_expired() => session,
            other => return Ok(other),
        };

        match self.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(BackendError::Unauthorized(_)) => {
                self.store(None);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn get_user(&self, access_token: &str) -> BackendResult<User> {
        tracing::debug!("GET /auth/v1/user");
        let builder = self.http.get(self.auth_url("user"));
        self.send_json(self.request(builder, Some(access_token))).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        tracing::debug!("POST /auth/v1/token?grant_type=refresh_token");
        let builder = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }));

        let token: TokenResponse = self
            .send_json(self.request(builder, None))
            .await
            .map_err(|err| match err {
                BackendError::InvalidCredentials => {
                    BackendError::Unauthorized("Invalid Refresh Token".to_string())
                }
                other => other,
            })?;

        let session = token.into_session();
        self.store(Some(session.clone()));
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl TaskStore for RestBackend {
    async fn select_tasks(&self, access_token: &str) -> BackendResult<Vec<Task>> {
        tracing::debug!("GET /rest/v1/tasks");
        let builder = self
            .http
            .get(self.tasks_url())
            .query(&[("select", "*"), ("order", "created_at.desc")]);

        self.send_json(self.request(builder, Some(access_token))).await
    }

    async fn insert_task(&self, access_token: &str, task: &TaskInsert) -> BackendResult<Task> {
        tracing::debug!("POST /rest/v1/tasks");
        let builder = self
            .http
            .post(self.tasks_url())
            .header("Prefer", "return=representation")
            .json(&[task]);

        let rows: Vec<Task> = self.send_json(self.request(builder, Some(access_token))).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no rows".to_string()))
    }

    async fn update_task(
        &self,
        access_token: &str,
        id: Uuid,
        patch: &TaskPatch,
    ) -> BackendResult<Option<Task>> {
        tracing::debug!(task_id = %id, "PATCH /rest/v1/tasks");
        let builder = self
            .http
            .patch(self.tasks_url())
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(patch);

        let rows: Vec<Task> = self.send_json(self.request(builder, Some(access_token))).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_task(&self, access_token: &str, id: Uuid) -> BackendResult<bool> {
        tracing::debug!(task_id = %id, "DELETE /rest/v1/tasks");
        let builder = self
            .http
            .delete(self.tasks_url())
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation");

        let rows: Vec<Task> = self.send_json(self.request(builder, Some(access_token))).await?;
        Ok(!rows.is_empty())
    }
}
