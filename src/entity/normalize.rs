//! Row normalization: heterogeneous backend rows → [`EntityRecord`].
//!
//! Each target field has a fixed alias precedence list per source shape.
//! Aliases may be dotted paths into nested objects (`profile.city`); a nested
//! array is read through its first element, which is how embedded one-to-many
//! joins come back from the backend.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

use super::types::EntityRecord;
use crate::geo::GeoPoint;

/// Which row layout a payload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceShape {
    /// Canonical venue table rows: `name`, `city`, `state`, ...
    Primary,
    /// Business listings and service rows: `business_name`, nested `profile`.
    Alternate,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("row is not a JSON object")]
    NotAnObject,
    #[error("row has no usable id")]
    MissingId,
}

struct Aliases {
    id: &'static [&'static str],
    slug: &'static [&'static str],
    name: &'static [&'static str],
    address: &'static [&'static str],
    city: &'static [&'static str],
    state: &'static [&'static str],
    lat: &'static [&'static str],
    lng: &'static [&'static str],
    category: &'static [&'static str],
    created_at: &'static [&'static str],
}

const PRIMARY: Aliases = Aliases {
    id: &["id"],
    slug: &["slug"],
    name: &["name"],
    address: &["address"],
    city: &["city"],
    state: &["state"],
    lat: &["lat", "latitude"],
    lng: &["lng", "longitude"],
    category: &["category"],
    created_at: &["created_at"],
};

const ALTERNATE: Aliases = Aliases {
    id: &["id", "business_id", "profile.id"],
    slug: &["slug", "profile.slug"],
    name: &["business_name", "name", "profile.business_name", "profile.name"],
    address: &["address", "business_address", "profile.address"],
    city: &["city", "profile.city", "location.city"],
    state: &["state", "profile.state", "location.state"],
    lat: &["lat", "latitude", "location.lat", "profile.latitude"],
    lng: &["lng", "lon", "longitude", "location.lng", "profile.longitude"],
    category: &["category", "business_type", "type", "profile.category"],
    created_at: &["created_at", "createdAt", "profile.created_at"],
};

impl SourceShape {
    fn aliases(self) -> &'static Aliases {
        match self {
            Self::Primary => &PRIMARY,
            Self::Alternate => &ALTERNATE,
        }
    }
}

/// Normalize one row. Only a missing id (or a non-object row) is an error;
/// every other field degrades to `None`.
pub fn normalize(row: &Value, shape: SourceShape) -> Result<EntityRecord, NormalizeError> {
    if !row.is_object() {
        return Err(NormalizeError::NotAnObject);
    }
    let aliases = shape.aliases();

    let id = first(row, aliases.id, identifier).ok_or(NormalizeError::MissingId)?;
    let lat = first(row, aliases.lat, number);
    let lng = first(row, aliases.lng, number);
    let coordinates = match (lat, lng) {
        (Some(lat), Some(lng)) => GeoPoint::new(lat, lng),
        _ => None,
    };

    Ok(EntityRecord {
        id,
        slug: first(row, aliases.slug, text),
        name: first(row, aliases.name, text).unwrap_or_default(),
        address: first(row, aliases.address, text),
        city: first(row, aliases.city, text),
        state: first(row, aliases.state, text),
        coordinates,
        category: first(row, aliases.category, text),
        created_at: first(row, aliases.created_at, timestamp).unwrap_or_default(),
    })
}

/// A normalized payload.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub records: Vec<EntityRecord>,
    /// Rows dropped for lacking an id or not being objects.
    pub rejected: usize,
    /// Rows dropped because an earlier row had the same id.
    pub duplicates: usize,
}

/// Flatten a tier payload into rows and normalize each, keeping the first
/// record for any repeated id.
pub fn normalize_payload(payload: Value, shape: SourceShape) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut seen = HashSet::new();

    for row in payload_rows(payload) {
        match normalize(&row, shape) {
            Ok(record) => {
                if seen.insert(record.id.clone()) {
                    batch.records.push(record);
                } else {
                    batch.duplicates += 1;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping row");
                batch.rejected += 1;
            }
        }
    }
    batch
}

/// Accepts an array of rows, a `{"data": [...]}` envelope, a single row, or null.
fn payload_rows(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) => Vec::new(),
            Some(other) => {
                map.insert("data".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        other => vec![other],
    }
}

// ─── Field extraction ────────────────────────────────────────────

fn first<T>(row: &Value, paths: &[&str], convert: fn(&Value) -> Option<T>) -> Option<T> {
    paths.iter().find_map(|path| lookup(row, path).and_then(convert))
}

fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = row;
    for key in path.split('.') {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(key)?;
    }
    Some(current)
}

fn text(v: &Value) -> Option<String> {
    let s = v.as_str()?.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn identifier(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        other => text(other),
    }
}

fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => parse_timestamp(s.trim()),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres text output: "2024-05-01 10:00:00.123+00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
