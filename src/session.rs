use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::LoginForm;
use crate::logger::MessageLogger;
use crate::protocol::{
    AJAX_HEADER, AJAX_VALUE, JSON_ACCEPT, LOGIN_PATH, LoginOutcome, PROBE_PATH, evaluate_login,
    login_fields, parse_cookie_header,
};
use crate::{Error, Result};

pub(crate) struct Credentials {
    pub username: String,
    pub password: String,
    pub language: String,
}

/// Owns the one HTTP client and cookie jar for a device.
///
/// The reqwest client is built lazily so that `close` can drop every pooled
/// connection and the next call reopens transparently.
pub(crate) struct Session {
    base_url: String,
    url: Url,
    credentials: Credentials,
    form: LoginForm,
    timeout: Duration,
    probe_timeout: Duration,
    http: Option<reqwest::Client>,
    jar: Arc<Jar>,
    authenticated: bool,
    logger: Option<MessageLogger>,
}

/// Status and body of a completed exchange.
pub(crate) struct Reply {
    pub status: StatusCode,
    pub body: String,
}

impl Reply {
    pub fn is_auth_failure(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED || self.status == StatusCode::FORBIDDEN
    }
}

impl Session {
    pub fn new(
        base_url: String,
        credentials: Credentials,
        form: LoginForm,
        timeout: Duration,
        probe_timeout: Duration,
        logger: Option<MessageLogger>,
    ) -> Result<Self> {
        let url = Url::parse(&format!("{base_url}/"))
            .map_err(|e| Error::Config(format!("{base_url}: {e}")))?;
        Ok(Self {
            base_url,
            url,
            credentials,
            form,
            timeout,
            probe_timeout,
            http: None,
            jar: Arc::new(Jar::default()),
            authenticated: false,
            logger,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn logger_mut(&mut self) -> Option<&mut MessageLogger> {
        self.logger.as_mut()
    }

    fn http(&mut self) -> Result<reqwest::Client> {
        if let Some(ref http) = self.http {
            return Ok(http.clone());
        }
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&self.jar))
            // The login success signal lives on the first reply only.
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .timeout(self.timeout)
            .build()?;
        debug!(url = %self.base_url, "opened HTTP session");
        self.http = Some(http.clone());
        Ok(http)
    }

    /// Log in unless already authenticated. Returns true when a new session
    /// was established by this call.
    pub async fn ensure_authenticated(&mut self) -> Result<bool> {
        if self.authenticated {
            return Ok(false);
        }
        self.login().await?;
        Ok(true)
    }

    async fn login(&mut self) -> Result<()> {
        let http = self.http()?;
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        debug!(url = %url, user = %self.credentials.username, "logging in");

        let resp = {
            let fields = login_fields(
                &self.form,
                &self.credentials.username,
                &self.credentials.password,
                &self.credentials.language,
            );
            http.post(&url)
                .timeout(self.timeout)
                .form(&fields)
                .send()
                .await?
        };

        let status = resp.status();
        let response_cookies: Vec<(String, String)> = resp
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();

        let auth_status = status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
        if (status.is_client_error() && !auth_status) || status.is_server_error() {
            self.log_login(status.as_u16(), "status", &response_cookies);
            return Err(Error::Status {
                status: status.as_u16(),
                endpoint: LOGIN_PATH,
            });
        }

        let outcome = evaluate_login(
            &self.form,
            status.as_u16(),
            &response_cookies,
            self.jar_has_session(),
        );

        match outcome {
            LoginOutcome::Success => {
                self.log_login(status.as_u16(), "success", &response_cookies);
                info!(url = %self.base_url, status = status.as_u16(), "session established");
                self.authenticated = true;
                Ok(())
            }
            LoginOutcome::Rejected => {
                self.log_login(status.as_u16(), "rejected", &response_cookies);
                warn!(url = %self.base_url, "login rejected by device");
                self.authenticated = false;
                // The error flag may arrive with a session cookie.
                self.expire_session_cookie();
                Err(Error::Authentication(format!(
                    "device set {} (credentials rejected)",
                    self.form.error_cookie
                )))
            }
            LoginOutcome::NoSession => {
                self.log_login(status.as_u16(), "no_session", &response_cookies);
                warn!(url = %self.base_url, status = status.as_u16(), "login reply carried no session cookie");
                self.authenticated = false;
                self.expire_session_cookie();
                Err(Error::Authentication(format!(
                    "no {} cookie in login reply (HTTP {})",
                    self.form.session_cookie,
                    status.as_u16()
                )))
            }
        }
    }

    fn jar_has_session(&self) -> bool {
        self.jar
            .cookies(&self.url)
            .and_then(|h| h.to_str().ok().map(parse_cookie_header))
            .is_some_and(|pairs| {
                pairs
                    .iter()
                    .any(|(name, value)| name == &self.form.session_cookie && !value.is_empty())
            })
    }

    fn log_login(&mut self, status: u16, outcome: &str, cookies: &[(String, String)]) {
        if let Some(ref mut logger) = self.logger {
            // Names only; cookie values are session secrets.
            let names: Vec<String> = cookies.iter().map(|(n, _)| n.clone()).collect();
            logger.log_login(status, outcome, &names);
        }
    }

    /// Forget the session without dropping pooled connections.
    pub fn invalidate(&mut self) {
        self.authenticated = false;
        self.expire_session_cookie();
        debug!(url = %self.base_url, "session invalidated");
    }

    /// Remove the session cookie from the jar.
    fn expire_session_cookie(&self) {
        let expired = format!("{}=; Max-Age=0; Path=/", self.form.session_cookie);
        self.jar.add_cookie_str(&expired, &self.url);
    }

    /// Drop the HTTP client along with every cookie.
    pub fn close(&mut self) {
        if self.http.take().is_some() {
            debug!(url = %self.base_url, "closed HTTP session");
        }
        self.jar = Arc::new(Jar::default());
        self.authenticated = false;
    }

    /// POST a JSON body with the AJAX headers the device's web UI sends.
    pub async fn post_json(&mut self, path: &'static str, body: &Value) -> Result<Reply> {
        let http = self.http()?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");

        let resp = http
            .post(&url)
            .timeout(self.timeout)
            .header(AJAX_HEADER, AJAX_VALUE)
            .header(ACCEPT, JSON_ACCEPT)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if let Some(ref mut logger) = self.logger {
            logger.log_request("POST", path, Some(status.as_u16()));
        }
        Ok(Reply { status, body })
    }

    /// Unauthenticated reachability check with the short probe timeout.
    pub async fn probe(&mut self) -> Result<u16> {
        let http = self.http()?;
        let url = format!("{}{}", self.base_url, PROBE_PATH);
        debug!(url = %url, "probing device");

        let resp = http.get(&url).timeout(self.probe_timeout).send().await?;
        let status = resp.status();

        if let Some(ref mut logger) = self.logger {
            logger.log_request("GET", PROBE_PATH, Some(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(Error::Status {
                status: status.as_u16(),
                endpoint: PROBE_PATH,
            });
        }
        Ok(status.as_u16())
    }
}
