// src/normalize.rs
//
// Field normalization for documents shared with the mobile app. Stored
// documents are uneven: timestamps arrive in half a dozen shapes and several
// fields still carry legacy names. Everything here is total; a transform
// never fails on malformed data.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use mongodb::bson::{Bson, Document};
use std::collections::HashMap;

/// Coerces any stored timestamp shape to a date. Falsy or unreadable values
/// become the current time.
pub fn parse_timestamp(value: Option<&Bson>) -> DateTime<Utc> {
    match value {
        None | Some(Bson::Null) => Utc::now(),
        Some(v) => coerce_timestamp(v),
    }
}

/// Same coercion, but a missing or null value stays `None`.
pub fn opt_timestamp(value: Option<&Bson>) -> Option<DateTime<Utc>> {
    match value {
        None | Some(Bson::Null) => None,
        Some(v) => Some(coerce_timestamp(v)),
    }
}

pub fn timestamp_field(doc: &Document, name: &str) -> DateTime<Utc> {
    parse_timestamp(doc.get(name))
}

pub fn opt_timestamp_field(doc: &Document, name: &str) -> Option<DateTime<Utc>> {
    opt_timestamp(doc.get(name))
}

fn coerce_timestamp(value: &Bson) -> DateTime<Utc> {
    match value {
        Bson::DateTime(dt) => dt.to_chrono(),
        Bson::String(s) if !s.is_empty() => parse_date_string(s).unwrap_or_else(Utc::now),
        Bson::Int32(n) if *n != 0 => from_epoch_number(*n as i64),
        Bson::Int64(n) if *n != 0 => from_epoch_number(*n),
        Bson::Double(n) if *n != 0.0 => {
            let millis = if *n < 10_000_000_000.0 { n * 1000.0 } else { *n };
            Utc.timestamp_millis_opt(millis as i64)
                .single()
                .unwrap_or_else(Utc::now)
        }
        Bson::Timestamp(ts) => Utc
            .timestamp_opt(ts.time as i64, 0)
            .single()
            .unwrap_or_else(Utc::now),
        Bson::Document(inner) => match inner.get("seconds").and_then(bson_i64) {
            Some(seconds) => Utc
                .timestamp_millis_opt(seconds.saturating_mul(1000))
                .single()
                .unwrap_or_else(Utc::now),
            None => Utc::now(),
        },
        _ => Utc::now(),
    }
}

// Values below ten billion are epoch-seconds, everything larger is already
// in milliseconds.
fn from_epoch_number(n: i64) -> DateTime<Utc> {
    let millis = if n < 10_000_000_000 {
        n.saturating_mul(1000)
    } else {
        n
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// First present, non-null value among the canonical field name and its
/// legacy aliases, in priority order.
pub fn resolve<'a>(doc: &'a Document, names: &[&str]) -> Option<&'a Bson> {
    names.iter().find_map(|name| match doc.get(*name) {
        None | Some(Bson::Null) => None,
        Some(value) => Some(value),
    })
}

/// First non-empty string among the given names.
pub fn str_field(doc: &Document, names: &[&str], default: &str) -> String {
    opt_str_field(doc, names).unwrap_or_else(|| default.to_string())
}

pub fn opt_str_field(doc: &Document, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| doc.get_str(name).ok().filter(|s| !s.is_empty()))
        .map(String::from)
}

pub fn num_field(doc: &Document, names: &[&str], default: f64) -> f64 {
    opt_num_field(doc, names).unwrap_or(default)
}

pub fn opt_num_field(doc: &Document, names: &[&str]) -> Option<f64> {
    resolve(doc, names).and_then(bson_f64)
}

pub fn int_field(doc: &Document, names: &[&str], default: i64) -> i64 {
    opt_int_field(doc, names).unwrap_or(default)
}

pub fn opt_int_field(doc: &Document, names: &[&str]) -> Option<i64> {
    resolve(doc, names).and_then(bson_i64)
}

pub fn bool_field(doc: &Document, names: &[&str], default: bool) -> bool {
    opt_bool_field(doc, names).unwrap_or(default)
}

pub fn opt_bool_field(doc: &Document, names: &[&str]) -> Option<bool> {
    match resolve(doc, names) {
        Some(Bson::Boolean(b)) => Some(*b),
        _ => None,
    }
}

/// First present array among the given names, as strings. An empty stored
/// array still wins over a later alias.
pub fn str_list_field(doc: &Document, names: &[&str]) -> Vec<String> {
    resolve(doc, names)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

pub fn doc_list_field(doc: &Document, name: &str) -> Vec<Document> {
    doc.get_array(name)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_document().cloned())
                .collect()
        })
        .unwrap_or_default()
}

pub fn string_map_field(doc: &Document, names: &[&str]) -> HashMap<String, String> {
    resolve(doc, names)
        .and_then(|v| v.as_document())
        .map(|inner| {
            inner
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

pub fn doc_id(doc: &Document) -> String {
    doc.get_str("_id").unwrap_or_default().to_string()
}

/// Chrono date as a store-native timestamp value.
pub fn bson_date(value: DateTime<Utc>) -> Bson {
    Bson::DateTime(mongodb::bson::DateTime::from_millis(
        value.timestamp_millis(),
    ))
}

pub fn bson_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn bson_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        Bson::String(s) => s.parse().ok(),
        _ => None,
    }
}
