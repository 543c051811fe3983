//! Raw ping ingestion.
//!
//! Telemetry rows arrive schema-flexible: the same reading may spell its
//! serial, timestamp or coordinates under several field names depending on
//! which device generation or export produced it. This module is the only
//! place that knows those spellings. Everything downstream works on
//! `PingRecord`, which carries:
//! - a normalized (trimmed, upper-cased) serial, possibly empty
//! - a typed `PingTime` (instant, ordinal fallback, or unknown)
//! - latitude/longitude that are either finite floats or absent
//!
//! Normalization never fails. Unparsable values become absent and the
//! engine treats them as unknown.

mod normalize;

pub use normalize::{normalize_record, normalize_records, PingRecord, PingTime, RawRecord};
