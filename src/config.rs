use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_LANGUAGE: &str = "de";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// How a login reply is judged successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessSignal {
    /// Only the session cookie counts; a redirect merely corroborates.
    #[default]
    SessionCookie,
    /// A redirect without a login-error indicator is accepted as well.
    SessionCookieOrRedirect,
}

/// Login form layout. Field names and cookie names differ between firmware
/// generations, so none of them are hardcoded in the session logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username_field: String,
    pub password_field: String,
    pub language_field: Option<String>,
    pub extra_fields: Vec<(String, String)>,
    pub session_cookie: String,
    pub error_cookie: String,
    pub success: SuccessSignal,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            language_field: Some("language".to_string()),
            extra_fields: vec![("submit".to_string(), "Anmelden".to_string())],
            session_cookie: "pksession".to_string(),
            error_cookie: "LoginError".to_string(),
            success: SuccessSignal::SessionCookie,
        }
    }
}

impl LoginForm {
    /// Older firmware: `user`/`pass` fields, no language tag.
    pub fn legacy() -> Self {
        Self {
            username_field: "user".to_string(),
            password_field: "pass".to_string(),
            language_field: None,
            success: SuccessSignal::SessionCookieOrRedirect,
            ..Self::default()
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub login: LoginForm,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: String::new(),
            password: String::new(),
            language: default_language(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            login: LoginForm::default(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("language", &self.language)
            .field("timeout_secs", &self.timeout_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("login", &self.login)
            .finish()
    }
}

/// Prefix `http://` when the host carries no scheme and drop trailing slashes.
pub fn normalize_base_url(host: &str) -> Result<String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::Config("host is empty".to_string()));
    }

    let lower = host.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    let base = with_scheme.trim_end_matches('/').to_string();

    let parsed = reqwest::Url::parse(&base).map_err(|e| Error::Config(format!("{base}: {e}")))?;
    if parsed.host_str().is_none() {
        return Err(Error::Config(format!("{base}: missing host")));
    }
    Ok(base)
}

pub(crate) fn validate_language(language: &str) -> Result<()> {
    if language.len() == 2 && language.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "language must be a two-letter code, got {language:?}"
        )))
    }
}
