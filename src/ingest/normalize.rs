use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::calendar::LocalCalendar;
use crate::serial::normalize_serial;

/// One raw telemetry row as delivered by the store.
pub type RawRecord = Value;

// Aliases are compared after lower-casing and dropping '_' and '-'.
const SERIAL_FIELDS: &[&str] = &["serial", "serialnumber", "deviceserial", "serialno", "sn"];
const LAST_PING_FIELDS: &[&str] = &["lastping", "lastpingtime", "lastpingat", "lastpingdate"];
const TIME_FIELDS: &[&str] = &["time", "timestamp", "ts", "gpstime"];
const DATE_FIELDS: &[&str] = &["date", "datetime"];
const CREATED_FIELDS: &[&str] = &["created", "createdat", "createdon"];
const UPDATED_FIELDS: &[&str] = &["updated", "updatedat", "updatedon"];
const ID_FIELDS: &[&str] = &["id", "recordid", "pingid"];
const LAT_FIELDS: &[&str] = &["lat", "latitude"];
const LNG_FIELDS: &[&str] = &["lng", "lon", "long", "longitude"];
const POSITION_FIELDS: &[&str] = &["position", "location", "coords", "coordinates"];

const TIMESTAMP_FIELD_ORDER: &[&[&str]] = &[
    LAST_PING_FIELDS,
    TIME_FIELDS,
    DATE_FIELDS,
    CREATED_FIELDS,
    UPDATED_FIELDS,
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// When a ping happened, as far as the raw row tells us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PingTime {
    /// Epoch milliseconds from a timestamp field.
    Instant(i64),
    /// No timestamp field; the numeric record id orders the row.
    Ordinal(i64),
    /// Nothing usable. Sorts before everything else.
    Unknown,
}

impl PingTime {
    /// Rank first, value second: every `Unknown` sorts before every
    /// `Ordinal`, and every `Ordinal` before every `Instant`. Record ids and
    /// epoch milliseconds never share an axis.
    pub fn sort_key(&self) -> (u8, i64) {
        match self {
            PingTime::Unknown => (0, 0),
            PingTime::Ordinal(n) => (1, *n),
            PingTime::Instant(ms) => (2, *ms),
        }
    }

    /// Only real instants have a calendar day.
    pub fn instant_ms(&self) -> Option<i64> {
        match self {
            PingTime::Instant(ms) => Some(*ms),
            _ => None,
        }
    }
}

/// A typed, validated ping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PingRecord {
    /// Position of the row in the input batch.
    pub index: usize,
    pub record_id: Option<String>,
    /// Normalized serial; empty when the row names none.
    pub serial: String,
    pub time: PingTime,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl PingRecord {
    pub fn coords(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }

    pub fn has_coords(&self) -> bool {
        self.coords().is_some()
    }

    /// Chronological order with the input index as a stable tie-break.
    pub fn chronological(a: &PingRecord, b: &PingRecord) -> Ordering {
        a.time
            .sort_key()
            .cmp(&b.time.sort_key())
            .then(a.index.cmp(&b.index))
    }
}

pub fn normalize_records(rows: &[RawRecord], calendar: &LocalCalendar) -> Vec<PingRecord> {
    let records: Vec<PingRecord> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| normalize_record(index, row, calendar))
        .collect();
    let unknown = records
        .iter()
        .filter(|r| r.time == PingTime::Unknown)
        .count();
    if unknown > 0 {
        log::debug!(
            "{} of {} ping rows have no usable timestamp or id",
            unknown,
            records.len()
        );
    }
    records
}

pub fn normalize_record(index: usize, row: &RawRecord, calendar: &LocalCalendar) -> PingRecord {
    let empty = Map::new();
    let fields = row.as_object().unwrap_or(&empty);

    let serial = lookup(fields, SERIAL_FIELDS)
        .and_then(value_as_string)
        .map(|s| normalize_serial(&s))
        .unwrap_or_default();

    let record_id = lookup(fields, ID_FIELDS).and_then(value_as_string);

    let time = TIMESTAMP_FIELD_ORDER
        .iter()
        .find_map(|aliases| lookup(fields, aliases).and_then(|v| parse_timestamp(v, calendar)))
        .map(PingTime::Instant)
        .or_else(|| {
            lookup(fields, ID_FIELDS)
                .and_then(parse_integer)
                .map(PingTime::Ordinal)
        })
        .unwrap_or(PingTime::Unknown);

    let (lat, lng) = resolve_coordinates(fields);

    PingRecord {
        index,
        record_id,
        serial,
        time,
        lat,
        lng,
    }
}

fn resolve_coordinates(fields: &Map<String, Value>) -> (Option<f64>, Option<f64>) {
    let lat = lookup(fields, LAT_FIELDS).and_then(parse_finite);
    let lng = lookup(fields, LNG_FIELDS).and_then(parse_finite);
    if lat.is_some() || lng.is_some() {
        return (lat, lng);
    }
    // Some exports nest the fix under a position object.
    match lookup(fields, POSITION_FIELDS).and_then(Value::as_object) {
        Some(position) => (
            lookup(position, LAT_FIELDS).and_then(parse_finite),
            lookup(position, LNG_FIELDS).and_then(parse_finite),
        ),
        None => (None, None),
    }
}

fn canonical_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// First non-null value whose key matches an alias, in alias order.
fn lookup<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        fields
            .iter()
            .find(|(key, value)| !value.is_null() && canonical_key(key) == *alias)
            .map(|(_, value)| value)
    })
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_finite(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| float_to_ms(n.as_f64()?)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn float_to_ms(value: f64) -> Option<i64> {
    if value.is_finite() && value.abs() < i64::MAX as f64 {
        Some(value.trunc() as i64)
    } else {
        None
    }
}

fn parse_timestamp(value: &Value, calendar: &LocalCalendar) -> Option<i64> {
    match value {
        Value::Number(_) => parse_integer(value),
        Value::String(s) => parse_timestamp_str(s.trim(), calendar),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str, calendar: &LocalCalendar) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(ms) = s.parse::<f64>() {
        return float_to_ms(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return calendar.local_to_epoch_ms(&naive);
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    calendar.local_to_epoch_ms(&date.and_hms_opt(0, 0, 0)?)
}
