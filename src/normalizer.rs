//! Event normalization
//!
//! Resolves heterogeneous raw tracker records into `CanonicalEvent`s: decodes
//! string-encoded payloads, finds coordinates wherever the tracker put them,
//! parses ISO-8601 or epoch-millisecond timestamps into one instant type, and
//! sorts the result by time. Records that can't be resolved are skipped and
//! reported with a reason; they never fail the batch.

use crate::error::{SkipReason, SkippedRecord};
use crate::schema::{EventType, RawEvent, RawPayload};
use crate::types::{CanonicalEvent, Point};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Naive datetime layouts accepted after RFC 3339 fails (interpreted as UTC)
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Which records a consumer needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    /// Every known event type; used by path and funnel analysis
    All,
    /// Mouse moves and clicks that carry both coordinates; used by heatmaps
    /// and kinematics
    SpatialOnly,
}

/// Output of a normalization pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Canonical events, ascending by timestamp (ties keep arrival order)
    pub events: Vec<CanonicalEvent>,
    /// Records that could not be normalized
    pub skipped: Vec<SkippedRecord>,
}

impl NormalizedBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Coordinates of every event that has them, in time order
    pub fn spatial_points(&self) -> Vec<Point> {
        spatial_points(&self.events)
    }

    /// Drop events outside `[from, to]` (both inclusive)
    pub fn retain_window(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) {
        self.events
            .retain(|e| e.timestamp >= from && e.timestamp <= to);
    }
}

/// Coordinates of every event that has them
pub fn spatial_points(events: &[CanonicalEvent]) -> Vec<Point> {
    events
        .iter()
        .filter_map(|e| e.position())
        .map(|(x, y)| Point { x, y })
        .collect()
}

/// Normalizer for raw tracker events
pub struct EventNormalizer;

impl EventNormalizer {
    /// Normalize a batch of raw events
    pub fn normalize(raw: &[RawEvent], scope: EventScope) -> NormalizedBatch {
        let mut events = Vec::with_capacity(raw.len());
        let mut skipped = Vec::new();

        for (index, record) in raw.iter().enumerate() {
            match Self::normalize_one(record, scope) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(reason) => {
                    debug!(index, %reason, "skipping raw event");
                    skipped.push(SkippedRecord { index, reason });
                }
            }
        }

        // Stable: equal timestamps keep arrival order
        events.sort_by_key(|e| e.timestamp);

        if !skipped.is_empty() {
            warn!(
                skipped = skipped.len(),
                kept = events.len(),
                "raw events skipped during normalization"
            );
        }
        debug!(input = raw.len(), kept = events.len(), ?scope, "normalized batch");

        NormalizedBatch { events, skipped }
    }

    /// Normalize a single record.
    ///
    /// Returns `Ok(None)` when the record is valid but outside `scope`.
    pub fn normalize_one(
        raw: &RawEvent,
        scope: EventScope,
    ) -> Result<Option<CanonicalEvent>, SkipReason> {
        let event_type = match raw.event_type.as_ref().filter(|v| !v.is_null()) {
            None => return Err(SkipReason::MissingField("event_type".to_string())),
            Some(Value::String(name)) => name
                .parse::<EventType>()
                .map_err(|_| SkipReason::UnknownEventType(name.clone()))?,
            Some(other) => return Err(SkipReason::UnknownEventType(other.to_string())),
        };

        if scope == EventScope::SpatialOnly && !event_type.is_spatial() {
            return Ok(None);
        }

        let session_id = raw
            .session_key()
            .ok_or_else(|| SkipReason::MissingField("session_id".to_string()))?;

        let timestamp = raw
            .timestamp
            .as_ref()
            .filter(|v| !v.is_null())
            .ok_or_else(|| SkipReason::MissingField("timestamp".to_string()))
            .and_then(parse_timestamp)?;

        // A url that isn't a string can't be matched against patterns or paths
        let url = match raw.url.as_ref() {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(url)) => url.clone(),
            Some(_) => return Err(SkipReason::MissingField("url".to_string())),
        };

        let payload = match decode_payload(raw.raw_payload()) {
            Ok(payload) => payload,
            Err(reason) if scope == EventScope::SpatialOnly => return Err(reason),
            Err(_) => Map::new(),
        };

        let x = coordinate(&payload, &raw.extra, "x")?;
        let y = coordinate(&payload, &raw.extra, "y")?;

        let mut event = CanonicalEvent::new(
            timestamp,
            session_id,
            event_type,
            url,
        );

        if let (Some(x), Some(y)) = (x, y) {
            event.x = Some(x);
            event.y = Some(y);
        } else if scope == EventScope::SpatialOnly {
            return Ok(None);
        }

        event.button = lookup(&payload, &raw.extra, "button").and_then(integer_value);

        if let Some(Value::Object(target)) = lookup(&payload, &raw.extra, "target") {
            apply_target(&mut event, target);
        }

        Ok(Some(event))
    }
}

/// Parse an ISO-8601 string, an epoch-millisecond number, or a numeric string
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, SkipReason> {
    let invalid = || SkipReason::InvalidTimestamp(value.to_string());

    match value {
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                DateTime::from_timestamp_millis(ms).ok_or_else(invalid)
            } else {
                n.as_f64().and_then(millis_from_f64).ok_or_else(invalid)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(ms) = trimmed.parse::<i64>() {
                return DateTime::from_timestamp_millis(ms).ok_or_else(invalid);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z") {
                return Ok(dt.with_timezone(&Utc));
            }
            NAIVE_TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|naive| naive.and_utc())
                .ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

fn millis_from_f64(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((ms * 1000.0).round() as i64)
}

/// Resolve the payload into an object, decoding JSON strings
fn decode_payload(payload: Option<&RawPayload>) -> Result<Map<String, Value>, SkipReason> {
    match payload {
        None => Ok(Map::new()),
        Some(RawPayload::Map(map)) => Ok(map.clone()),
        Some(RawPayload::Encoded(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(e) => Err(SkipReason::InvalidPayload(e.to_string())),
        },
        Some(RawPayload::Other(_)) => Ok(Map::new()),
    }
}

/// Find a payload field: top of the payload, then a nested `data` object,
/// then the record itself
fn lookup<'a>(
    payload: &'a Map<String, Value>,
    extra: &'a Map<String, Value>,
    key: &str,
) -> Option<&'a Value> {
    payload
        .get(key)
        .or_else(|| {
            payload
                .get("data")
                .and_then(Value::as_object)
                .and_then(|nested| nested.get(key))
        })
        .or_else(|| extra.get(key))
        .filter(|v| !v.is_null())
}

fn coordinate(
    payload: &Map<String, Value>,
    extra: &Map<String, Value>,
    key: &str,
) -> Result<Option<f64>, SkipReason> {
    let Some(value) = lookup(payload, extra, key) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(SkipReason::InvalidCoordinate(format!("{key}={value}"))),
    }
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_value(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

fn string_field(target: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| target.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn apply_target(event: &mut CanonicalEvent, target: &Map<String, Value>) {
    event.target_tag = string_field(target, &["tagName", "tag"]);
    event.target_id = string_field(target, &["id"]);
    event.target_class = string_field(target, &["className", "class"]);

    if let Some(Value::Object(rect)) = target.get("rect") {
        event.target_top = rect.get("top").and_then(float_value);
        event.target_left = rect.get("left").and_then(float_value);
        event.target_width = rect.get("width").and_then(float_value);
        event.target_height = rect.get("height").and_then(float_value);
    }
}
