use serde_json::{Map, Value, json};

use crate::config::{LoginForm, SuccessSignal};
use crate::types::RawValue;

pub const LOGIN_PATH: &str = "/index.cgi";
pub const FETCH_PATH: &str = "/?action=get&attr=1";
pub const WRITE_PATH: &str = "/?action=set";
pub const PROBE_PATH: &str = "/";

pub const AJAX_HEADER: &str = "X-Requested-With";
pub const AJAX_VALUE: &str = "XMLHttpRequest";
pub const JSON_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";

/// Form fields for the login POST, in submission order.
pub fn login_fields<'a>(
    form: &'a LoginForm,
    username: &'a str,
    password: &'a str,
    language: &'a str,
) -> Vec<(&'a str, &'a str)> {
    let mut fields = vec![
        (form.username_field.as_str(), username),
        (form.password_field.as_str(), password),
    ];
    if let Some(ref field) = form.language_field {
        fields.push((field.as_str(), language));
    }
    for (k, v) in &form.extra_fields {
        fields.push((k.as_str(), v.as_str()));
    }
    fields
}

pub fn fetch_body<S: AsRef<str>>(identifiers: &[S]) -> Value {
    Value::Array(
        identifiers
            .iter()
            .map(|id| Value::String(id.as_ref().to_string()))
            .collect(),
    )
}

pub fn write_body(identifier: &str, value: &str) -> Value {
    let mut map = Map::new();
    map.insert(identifier.to_string(), json!(value));
    Value::Object(map)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    /// The device set its error indicator to a failure value.
    Rejected,
    /// Nothing proved a session either way.
    NoSession,
}

/// Judge a login reply from its status, the cookies it set, and whether the
/// session cookie was already held.
pub fn evaluate_login(
    form: &LoginForm,
    status: u16,
    response_cookies: &[(String, String)],
    jar_has_session: bool,
) -> LoginOutcome {
    let error_flagged = response_cookies
        .iter()
        .any(|(name, value)| name == &form.error_cookie && is_failure_flag(value));
    if error_flagged {
        return LoginOutcome::Rejected;
    }

    let fresh_session = response_cookies
        .iter()
        .any(|(name, value)| name == &form.session_cookie && !value.is_empty());
    if fresh_session || jar_has_session {
        return LoginOutcome::Success;
    }

    if form.success == SuccessSignal::SessionCookieOrRedirect && (300..400).contains(&status) {
        return LoginOutcome::Success;
    }

    LoginOutcome::NoSession
}

fn is_failure_flag(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v != "0"
}

/// Split a `Cookie` header value into name/value pairs.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum FetchReply {
    /// One slot per requested identifier; `None` where the device had nothing.
    Values(Vec<Option<RawValue>>),
    Malformed(String),
}

/// Map the reply array back onto the request positionally.
pub fn parse_fetch_response(body: &str, expected: usize) -> FetchReply {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return FetchReply::Malformed(format!("invalid JSON: {e}")),
    };
    let items = match parsed {
        Value::Array(items) => items,
        other => {
            return FetchReply::Malformed(format!("expected array, got {}", json_kind(&other)));
        }
    };

    let mut slots = Vec::with_capacity(expected);
    for i in 0..expected {
        slots.push(items.get(i).and_then(parse_raw_value));
    }
    FetchReply::Values(slots)
}

/// Extract one element. Anything without a usable `value` is treated as
/// absent, including an empty string.
pub fn parse_raw_value(item: &Value) -> Option<RawValue> {
    let obj = item.as_object()?;
    let value = scalar_string(obj.get("value")?).filter(|v| !v.is_empty())?;
    Some(RawValue {
        value,
        divisor: obj.get("divisor").and_then(scalar_string),
        enum_labels: obj.get("formatTexts").and_then(scalar_string),
        short_text: obj.get("shortText").and_then(scalar_string),
        unit_text: obj.get("unitText").and_then(scalar_string),
        status: obj.get("status").and_then(scalar_string),
        lower_limit: obj.get("lowerLimit").and_then(scalar_string),
        upper_limit: obj.get("upperLimit").and_then(scalar_string),
    })
}

/// Firmware mostly sends strings but numbers slip through on some fields.
fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
