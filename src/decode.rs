//! Value decoding.
//!
//! The device packs several encodings into the same `value` string. Rules
//! are tried in a fixed order and the first match wins:
//!
//! 1. enumeration (index into the pipe-delimited label list)
//! 2. epoch timestamp with sub-second precision
//! 3. divisor scaling
//! 4. plain number
//! 5. the raw string
//!
//! Decoding never fails. A rule that cannot apply falls through to the next.

use chrono::{DateTime, SecondsFormat};
use tracing::{trace, warn};

use crate::types::{DecodedValue, Numeric, RawValue};

/// Integer digits required before a value is considered an epoch.
const TIMESTAMP_MIN_DIGITS: usize = 10;
/// Parsed epochs must exceed this (2001-09-09) to count.
const TIMESTAMP_MIN_EPOCH: f64 = 1_000_000_000.0;

pub fn decode(raw: &RawValue) -> DecodedValue {
    let value = raw.value.trim();

    if let Some(labels) = non_empty(raw.enum_labels.as_deref())
        && let Some(decoded) = decode_enum(value, labels)
    {
        return decoded;
    }

    if let Some(decoded) = decode_timestamp(value) {
        return decoded;
    }

    if let Some(divisor) = non_empty(raw.divisor.as_deref())
        && let Some(decoded) = decode_scaled(value, divisor)
    {
        return decoded;
    }

    if let Some(n) = parse_number(value) {
        return DecodedValue::Number(n);
    }

    DecodedValue::Text(raw.value.clone())
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn decode_enum(value: &str, labels: &str) -> Option<DecodedValue> {
    let labels: Vec<&str> = labels.split('|').collect();
    let index: i64 = match value.parse() {
        Ok(i) => i,
        Err(_) => {
            trace!(value, "enumeration value is not an index");
            return None;
        }
    };

    match usize::try_from(index).ok().and_then(|i| labels.get(i).map(|l| (i, l))) {
        Some((index, label)) => Some(DecodedValue::Enum {
            label: (*label).to_string(),
            index,
        }),
        None => {
            warn!(
                value,
                labels = labels.len(),
                "enumeration index out of range, falling back"
            );
            None
        }
    }
}

fn decode_timestamp(value: &str) -> Option<DecodedValue> {
    let (integer, _fraction) = value.split_once('.')?;
    if integer.len() < TIMESTAMP_MIN_DIGITS || !integer.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let epoch: f64 = value.parse().ok()?;
    if !epoch.is_finite() || epoch <= TIMESTAMP_MIN_EPOCH {
        return None;
    }

    let secs = epoch.trunc() as i64;
    let nanos = ((epoch - epoch.trunc()) * 1e9).round().min(999_999_999.0) as u32;
    let iso = DateTime::from_timestamp(secs, nanos)?.to_rfc3339_opts(SecondsFormat::AutoSi, true);

    Some(DecodedValue::Timestamp {
        epoch_seconds: epoch,
        iso,
    })
}

fn decode_scaled(value: &str, divisor: &str) -> Option<DecodedValue> {
    if divisor == "1" {
        return None;
    }
    let divisor: f64 = divisor.parse().ok()?;
    if divisor == 0.0 || !divisor.is_finite() {
        trace!("zero divisor, skipping scaling");
        return None;
    }
    let value: f64 = value.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    let quotient = value / divisor;
    if quotient.fract() == 0.0 && quotient.abs() < i64::MAX as f64 {
        return Some(DecodedValue::Scaled(Numeric::Integer(quotient as i64)));
    }
    // Halves go to even at the first decimal.
    let rounded = (quotient * 10.0).round_ties_even() / 10.0;
    Some(DecodedValue::Scaled(Numeric::Decimal(rounded)))
}

fn parse_number(value: &str) -> Option<Numeric> {
    let parsed: f64 = value.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(whole_or_decimal(parsed))
}

fn whole_or_decimal(v: f64) -> Numeric {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Numeric::Integer(v as i64)
    } else {
        Numeric::Decimal(v)
    }
}

/// Inverse of divisor scaling: the wire string for a setpoint.
pub fn encode_scaled(value: f64, divisor: Option<&str>) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let factor = match non_empty(divisor) {
        Some(d) => {
            let d: f64 = d.parse().ok()?;
            if d == 0.0 || !d.is_finite() { 1.0 } else { d }
        }
        None => 1.0,
    };
    let scaled = (value * factor).round();
    Some(format!("{}", scaled as i64))
}
