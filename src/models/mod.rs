//! Data models for the portal.
//!
//! Row structs are plain serde types; request bodies accept the loose input
//! the portal forms have always sent (numbers as strings, blank ids, checkbox values).

mod company;
mod course;
mod customer;
mod dashboard;
mod expense;
mod invoice;
mod payment;
mod student;

pub use company::*;
pub use course::*;
pub use customer::*;
pub use dashboard::*;
pub use expense::*;
pub use invoice::*;
pub use payment::*;
pub use student::*;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserialize an optional id from a number, a numeric string, blank or null.
/// Anything unparsable is treated as absent.
pub fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Parse a stored or submitted `YYYY-MM-DD` date. Timestamps are cut to their date part.
pub fn parse_date(text: Option<&str>) -> Option<NaiveDate> {
    let text = text?.trim();
    let date_part = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Render a stored timestamp as RFC 3339 in UTC. Naive timestamps are taken as UTC.
pub fn normalize_timestamp(text: &str) -> Option<String> {
    let candidate = text.trim();
    if candidate.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(candidate)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"]
                .iter()
                .find_map(|fmt| DateTime::parse_from_str(candidate, fmt).ok())
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(candidate, fmt).ok())
                .map(|naive| naive.and_utc())
        })?;
    Some(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Interpret a checkbox-style field.
pub fn truthy(value: Option<&Value>, default: bool) -> bool {
    match value {
        None | Some(Value::Null) => default,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "on" | "1" | "true" | "yes")
        }
        Some(_) => default,
    }
}
