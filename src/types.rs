use std::fmt;

use serde::{Deserialize, Serialize};

/// One parameter reply as sent by the device, before decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawValue {
    pub value: String,
    pub divisor: Option<String>,
    /// Pipe-delimited enumeration labels (`formatTexts` on the wire).
    pub enum_labels: Option<String>,
    pub short_text: Option<String>,
    pub unit_text: Option<String>,
    pub status: Option<String>,
    pub lower_limit: Option<String>,
    pub upper_limit: Option<String>,
}

impl RawValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_divisor(mut self, divisor: impl Into<String>) -> Self {
        self.divisor = Some(divisor.into());
        self
    }

    pub fn with_enum_labels(mut self, labels: impl Into<String>) -> Self {
        self.enum_labels = Some(labels.into());
        self
    }
}

/// A number that remembers whether it was whole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Integer(i64),
    Decimal(f64),
}

impl Numeric {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Numeric::Integer(i) => i as f64,
            Numeric::Decimal(d) => d,
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::Integer(i) => write!(f, "{i}"),
            Numeric::Decimal(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecodedValue {
    Number(Numeric),
    /// Fixed-point value after division by the device divisor.
    Scaled(Numeric),
    Enum { label: String, index: usize },
    Timestamp { epoch_seconds: f64, iso: String },
    /// Nothing else matched; the raw string verbatim.
    Text(String),
}

impl DecodedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Number(n) | DecodedValue::Scaled(n) => Some(n.as_f64()),
            DecodedValue::Timestamp { epoch_seconds, .. } => Some(*epoch_seconds),
            DecodedValue::Enum { .. } | DecodedValue::Text(_) => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            DecodedValue::Enum { label, .. } => Some(label),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Number(n) | DecodedValue::Scaled(n) => write!(f, "{n}"),
            DecodedValue::Enum { label, .. } => f.write_str(label),
            DecodedValue::Timestamp { iso, .. } => f.write_str(iso),
            DecodedValue::Text(s) => f.write_str(s),
        }
    }
}

/// A decoded value together with the metadata it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: DecodedValue,
    pub raw: RawValue,
}

impl Reading {
    /// The device flags each parameter; anything but `OK` means the value
    /// should not be trusted.
    pub fn is_ok(&self) -> bool {
        self.raw.status.as_deref() == Some("OK")
    }

    pub fn unit(&self) -> Option<&str> {
        self.raw
            .unit_text
            .as_deref()
            .filter(|u| !u.is_empty() && *u != "???")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Value(Reading),
    /// The device returned nothing usable at this position.
    Missing,
}

/// Result of one fetch: exactly one entry per requested identifier, in
/// request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    entries: Vec<(String, Entry)>,
}

impl Readings {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    pub(crate) fn push(&mut self, identifier: String, entry: Entry) {
        self.entries.push((identifier, entry));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, entry)| entry)
    }

    pub fn reading(&self, identifier: &str) -> Option<&Reading> {
        match self.get(identifier) {
            Some(Entry::Value(reading)) => Some(reading),
            _ => None,
        }
    }

    pub fn value(&self, identifier: &str) -> Option<&DecodedValue> {
        self.reading(identifier).map(|r| &r.value)
    }

    pub fn is_missing(&self, identifier: &str) -> bool {
        matches!(self.get(identifier), Some(Entry::Missing))
    }

    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Missing))
            .map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }
}

/// Emitted after each fetch when state moves.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ValueChanged {
        identifier: String,
        previous: DecodedValue,
        current: DecodedValue,
    },
    ParameterMissing {
        identifier: String,
    },
    SessionEstablished,
    SessionExpired,
}
