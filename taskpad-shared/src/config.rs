/// Backend connection configuration
///
/// Connection parameters are always supplied externally; there is no
/// built-in project URL or key.
///
/// # Environment Variables
///
/// - `TASKPAD_BACKEND_URL`: Project base URL, http(s) (required)
/// - `TASKPAD_BACKEND_ANON_KEY`: Public anon key sent as `apikey` (required)
/// - `TASKPAD_BACKEND_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 30)
/// - `TASKPAD_BACKEND_SESSION_FILE`: Where the signed-in session is kept
///   between runs (default: `<config dir>/taskpad/session.json`)
///
/// A `.env` file in the working directory is loaded first if present.
///
/// # Example
///
/// ```no_run
/// use taskpad_shared::config::BackendConfig;
///
/// # fn example() -> Result<(), taskpad_shared::config::ConfigError> {
/// let config = BackendConfig::from_env()?;
/// println!("Backend: {}", config.url);
/// # Ok(())
/// # }
/// ```

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::SessionFile;

/// Environment prefix for backend settings
pub const ENV_PREFIX: &str = "TASKPAD_BACKEND";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required setting is absent
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    /// Setting has an unusable value
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Configuration source could not be read
    #[error("Configuration error: {0}")]
    Source(#[from] config::ConfigError),
}

/// Backend connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project base URL (e.g. `https://xyz.example.co`)
    pub url: String,

    /// Public anon key
    pub anon_key: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Session file location; the platform default is used when unset
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Values as read from the environment, before validation
#[derive(Debug, Default, Deserialize)]
struct RawBackendConfig {
    url: Option<String>,
    anon_key: Option<String>,
    request_timeout_secs: Option<u64>,
    session_file: Option<String>,
}

impl BackendConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `TASKPAD_BACKEND_URL` or `TASKPAD_BACKEND_ANON_KEY` is missing
    /// - The URL is not http(s) or the timeout is zero
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::load(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Loads configuration from an explicit variable map
    ///
    /// Keys use the same names as the environment variables.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(vars)),
        )
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let raw: RawBackendConfig = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        let url = raw
            .url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::Missing("TASKPAD_BACKEND_URL"))?;

        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::Invalid(format!(
                "TASKPAD_BACKEND_URL must be an http(s) URL, got {}",
                url
            )));
        }

        let anon_key = raw
            .anon_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::Missing("TASKPAD_BACKEND_ANON_KEY"))?;

        let request_timeout_secs = raw
            .request_timeout_secs
            .unwrap_or_else(default_request_timeout_secs);
        if request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "TASKPAD_BACKEND_REQUEST_TIMEOUT_SECS must be > 0".to_string(),
            ));
        }

        let session_file = raw
            .session_file
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(BackendConfig {
            url,
            anon_key,
            request_timeout_secs,
            session_file,
        })
    }

    /// Returns the per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Where the signed-in session is persisted, if anywhere
    pub fn session_store(&self) -> Option<SessionFile> {
        self.session_file
            .clone()
            .or_else(SessionFile::default_path)
            .map(SessionFile::new)
    }
}

// The anon key is public but still kept out of logs.
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("anon_key", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("session_file", &self.session_file)
            .finish()
    }
}
