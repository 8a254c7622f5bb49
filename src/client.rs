use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace, trace_span, warn};

use crate::catalog::{self, OUTSIDE_TEMPERATURE};
use crate::config::{
    ClientConfig, DEFAULT_LANGUAGE, DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS, LoginForm,
    normalize_base_url, validate_language,
};
use crate::decode::{decode, encode_scaled};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    FETCH_PATH, FetchReply, WRITE_PATH, fetch_body, parse_fetch_response, write_body,
};
use crate::session::{Credentials, Reply, Session};
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type ReadingsCallback = Box<dyn Fn(&Readings) + Send + Sync>;

pub struct PellematicClientBuilder {
    host: String,
    username: String,
    password: String,
    language: String,
    timeout: Duration,
    probe_timeout: Duration,
    login_form: LoginForm,
    event_callbacks: Vec<EventCallback>,
    readings_callbacks: Vec<ReadingsCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<PathBuf>,
}

impl PellematicClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: String::new(),
            password: String::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            login_form: LoginForm::default(),
            event_callbacks: Vec::new(),
            readings_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Two-letter UI language sent with the login form.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn login_form(mut self, form: LoginForm) -> Self {
        self.login_form = form;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_readings(mut self, f: impl Fn(&Readings) + Send + Sync + 'static) -> Self {
        self.readings_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<PellematicClient> {
        let base_url = normalize_base_url(&self.host)?;
        validate_language(&self.language)?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let session = Session::new(
            base_url.clone(),
            Credentials {
                username: self.username,
                password: self.password,
                language: self.language,
            },
            self.login_form,
            self.timeout,
            self.probe_timeout,
            logger,
        )?;

        Ok(PellematicClient {
            base_url,
            inner: Mutex::new(Inner {
                session,
                last: HashMap::new(),
            }),
            event_callbacks: self.event_callbacks,
            readings_callbacks: self.readings_callbacks,
        })
    }
}

struct Inner {
    session: Session,
    /// Last decoded reading per identifier, for change events and write-back.
    last: HashMap<String, Reading>,
}

/// Client for one Pellematic controller.
///
/// All operations take `&self`; they are serialized internally so that only
/// one request is in flight and logins never race.
pub struct PellematicClient {
    base_url: String,
    inner: Mutex<Inner>,
    event_callbacks: Vec<EventCallback>,
    readings_callbacks: Vec<ReadingsCallback>,
}

impl PellematicClient {
    pub fn builder(host: impl Into<String>) -> PellematicClientBuilder {
        PellematicClientBuilder::new(host)
    }

    pub fn from_config(config: &ClientConfig) -> PellematicClientBuilder {
        PellematicClientBuilder::new(config.host.clone())
            .credentials(config.username.clone(), config.password.clone())
            .language(config.language.clone())
            .timeout(config.timeout())
            .probe_timeout(config.probe_timeout())
            .login_form(config.login.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.lock().await.session.is_authenticated()
    }

    /// Log in unless a session is already held.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            match inner.session.ensure_authenticated().await {
                Ok(true) => {
                    events.push(Event::SessionEstablished);
                    Ok(())
                }
                Ok(false) => Ok(()),
                Err(e) => Err(e),
            }
        };
        self.dispatch(&events, None);
        result
    }

    /// Mark the session stale; the next call logs in again.
    pub async fn invalidate(&self) {
        self.inner.lock().await.session.invalidate();
    }

    /// Release connections and cookies. Later calls reopen transparently.
    pub async fn close(&self) {
        self.inner.lock().await.session.close();
    }

    /// Most recent reading seen for an identifier.
    pub async fn last_reading(&self, identifier: &str) -> Option<Reading> {
        self.inner.lock().await.last.get(identifier).cloned()
    }

    /// Fetch and decode a batch of parameters in one round trip.
    ///
    /// The result has one entry per identifier, in request order. Parameters
    /// the device did not answer are reported as [`Entry::Missing`].
    pub async fn fetch<S: AsRef<str>>(&self, identifiers: &[S]) -> Result<Readings> {
        if identifiers.is_empty() {
            return Ok(Readings::default());
        }

        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            fetch_locked(&mut inner, identifiers, &mut events).await
        };
        self.dispatch(&events, result.as_ref().ok());
        result
    }

    /// Write one parameter value as the device's wire string.
    pub async fn write(&self, identifier: &str, value: &str) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            write_locked(&mut inner, identifier, value, &mut events).await
        };
        self.dispatch(&events, None);
        result
    }

    /// Host-facing write: true when the device accepted the value.
    pub async fn set_parameter(&self, identifier: &str, value: &str) -> bool {
        match self.write(identifier, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(parameter = identifier, error = %e, "write failed");
                false
            }
        }
    }

    /// Select an enumeration entry by index. Checked against the label list
    /// when the parameter has been read before.
    pub async fn set_mode(&self, identifier: &str, index: usize) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            set_mode_locked(&mut inner, identifier, index, &mut events).await
        };
        self.dispatch(&events, None);
        result
    }

    pub async fn set_system_mode(&self, index: usize) -> Result<()> {
        self.set_mode(catalog::SYSTEM_MODE, index).await
    }

    pub async fn set_heating_circuit_mode(&self, circuit: usize, index: usize) -> Result<()> {
        self.set_mode(&catalog::heating_circuit_mode(circuit), index).await
    }

    pub async fn set_hot_water_mode(&self, tank: usize, index: usize) -> Result<()> {
        self.set_mode(&catalog::hot_water_mode(tank), index).await
    }

    /// Write a setpoint in display units. The parameter's divisor and limits
    /// are taken from its last reading, fetched first if never seen.
    pub async fn set_setpoint(&self, identifier: &str, value: f64) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            set_setpoint_locked(&mut inner, identifier, value, &mut events).await
        };
        self.dispatch(&events, None);
        result
    }

    /// Setup check: reachability, login, then one test parameter. The error
    /// kind tells an unreachable device from rejected credentials.
    pub async fn validate(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.session.probe().await?;
        }
        self.ensure_authenticated().await?;

        let readings = self.fetch(&[OUTSIDE_TEMPERATURE]).await?;
        if readings.is_missing(OUTSIDE_TEMPERATURE) {
            return Err(Error::Fetch(format!(
                "device returned no value for {OUTSIDE_TEMPERATURE}"
            )));
        }
        Ok(())
    }

    fn dispatch(&self, events: &[Event], readings: Option<&Readings>) {
        for event in events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        if let Some(readings) = readings {
            for cb in &self.readings_callbacks {
                cb(readings);
            }
        }
    }
}

/// Send with at most one re-login. A reply that is still an authorization
/// failure is handed back for the caller to classify.
async fn send_with_reauth(
    session: &mut Session,
    path: &'static str,
    body: &Value,
    events: &mut Vec<Event>,
) -> Result<Reply> {
    let mut reauthenticated = false;
    loop {
        if session.ensure_authenticated().await? {
            events.push(Event::SessionEstablished);
        }
        let reply = session.post_json(path, body).await?;
        if !reply.is_auth_failure() || reauthenticated {
            return Ok(reply);
        }

        warn!(
            url = %session.base_url(),
            status = reply.status.as_u16(),
            "session expired, re-authenticating"
        );
        events.push(Event::SessionExpired);
        session.invalidate();
        reauthenticated = true;
    }
}

async fn fetch_locked<S: AsRef<str>>(
    inner: &mut Inner,
    identifiers: &[S],
    events: &mut Vec<Event>,
) -> Result<Readings> {
    let body = fetch_body(identifiers);
    let reply = send_with_reauth(&mut inner.session, FETCH_PATH, &body, events).await?;

    if reply.is_auth_failure() {
        return Err(Error::Fetch(format!(
            "session rejected after re-authentication (HTTP {})",
            reply.status.as_u16()
        )));
    }
    if !reply.status.is_success() {
        return Err(Error::Status {
            status: reply.status.as_u16(),
            endpoint: FETCH_PATH,
        });
    }

    let slots = match parse_fetch_response(&reply.body, identifiers.len()) {
        FetchReply::Values(slots) => slots,
        FetchReply::Malformed(reason) => return Err(Error::Fetch(reason)),
    };

    if let Some(logger) = inner.session.logger_mut() {
        let params: Map<String, Value> = identifiers
            .iter()
            .zip(&slots)
            .map(|(id, slot)| {
                let v = slot
                    .as_ref()
                    .and_then(|raw| serde_json::to_value(raw).ok())
                    .unwrap_or(Value::Null);
                (id.as_ref().to_string(), v)
            })
            .collect();
        logger.log_fetch(reply.status.as_u16(), params);
    }

    let mut readings = Readings::with_capacity(identifiers.len());
    for (id, slot) in identifiers.iter().zip(slots) {
        let id = id.as_ref();
        match slot {
            Some(raw) => {
                let value = {
                    let _span = trace_span!("decode", parameter = id).entered();
                    decode(&raw)
                };
                trace!(parameter = id, raw = %raw.value, value = %value, "decoded");

                let reading = Reading { value, raw };
                if let Some(prev) = inner.last.get(id)
                    && prev.value != reading.value
                {
                    events.push(Event::ValueChanged {
                        identifier: id.to_string(),
                        previous: prev.value.clone(),
                        current: reading.value.clone(),
                    });
                }
                inner.last.insert(id.to_string(), reading.clone());
                readings.push(id.to_string(), Entry::Value(reading));
            }
            None => {
                if inner.last.remove(id).is_some() {
                    events.push(Event::ParameterMissing {
                        identifier: id.to_string(),
                    });
                }
                readings.push(id.to_string(), Entry::Missing);
            }
        }
    }

    let missing = readings.missing().count();
    if missing > 0 {
        debug!(missing, "device returned no value for some parameters");
    }
    debug!(count = readings.len(), "fetched parameters");
    Ok(readings)
}

async fn write_locked(
    inner: &mut Inner,
    identifier: &str,
    value: &str,
    events: &mut Vec<Event>,
) -> Result<()> {
    let body = write_body(identifier, value);
    let reply = send_with_reauth(&mut inner.session, WRITE_PATH, &body, events).await?;

    if let Some(logger) = inner.session.logger_mut() {
        logger.log_write(&body, reply.status.as_u16());
    }

    if reply.is_auth_failure() {
        return Err(Error::Authentication(format!(
            "write of {identifier} rejected after re-authentication (HTTP {})",
            reply.status.as_u16()
        )));
    }
    if !reply.status.is_success() {
        return Err(Error::Status {
            status: reply.status.as_u16(),
            endpoint: WRITE_PATH,
        });
    }

    debug!(parameter = identifier, value, "parameter written");
    Ok(())
}

async fn set_mode_locked(
    inner: &mut Inner,
    identifier: &str,
    index: usize,
    events: &mut Vec<Event>,
) -> Result<()> {
    if let Some(labels) = inner
        .last
        .get(identifier)
        .and_then(|r| r.raw.enum_labels.as_deref())
        .filter(|l| !l.trim().is_empty())
    {
        let count = labels.split('|').count();
        if index >= count {
            return Err(Error::InvalidValue {
                identifier: identifier.to_string(),
                reason: format!("mode index {index} out of range (0..{count})"),
            });
        }
    }
    write_locked(inner, identifier, &index.to_string(), events).await
}

async fn set_setpoint_locked(
    inner: &mut Inner,
    identifier: &str,
    value: f64,
    events: &mut Vec<Event>,
) -> Result<()> {
    if !inner.last.contains_key(identifier) {
        fetch_locked(inner, &[identifier], events).await?;
    }
    let raw = match inner.last.get(identifier) {
        Some(reading) => reading.raw.clone(),
        None => {
            return Err(Error::InvalidValue {
                identifier: identifier.to_string(),
                reason: "device does not report this parameter".to_string(),
            });
        }
    };

    let wire = encode_scaled(value, raw.divisor.as_deref()).ok_or_else(|| Error::InvalidValue {
        identifier: identifier.to_string(),
        reason: format!("{value} is not a finite number"),
    })?;
    check_limits(identifier, &wire, &raw)?;

    write_locked(inner, identifier, &wire, events).await
}

/// Limits arrive in the same wire units as the raw value.
fn check_limits(identifier: &str, wire: &str, raw: &RawValue) -> Result<()> {
    let parse = |s: Option<&str>| s.and_then(|s| s.trim().parse::<f64>().ok());
    let Ok(v) = wire.parse::<f64>() else {
        return Ok(());
    };
    let lower = parse(raw.lower_limit.as_deref());
    let upper = parse(raw.upper_limit.as_deref());

    if lower.is_some_and(|lo| v < lo) || upper.is_some_and(|hi| v > hi) {
        return Err(Error::InvalidValue {
            identifier: identifier.to_string(),
            reason: format!(
                "{wire} outside device limits {}..{}",
                raw.lower_limit.as_deref().unwrap_or("-"),
                raw.upper_limit.as_deref().unwrap_or("-"),
            ),
        });
    }
    Ok(())
}
