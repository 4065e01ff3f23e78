//! Parsing and validation of stored tracker events
//!
//! Events are exported from the collection layer either as a JSON array or as
//! NDJSON (one record per line).

use crate::error::{AnalyticsError, SkippedRecord};
use crate::normalizer::{EventNormalizer, EventScope};
use crate::schema::raw_event::RawEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Entry points for reading raw tracker exports
pub struct RawEventAdapter;

impl RawEventAdapter {
    /// Parse a JSON string containing an array of RawEvents
    pub fn parse_array(json: &str) -> Result<Vec<RawEvent>, AnalyticsError> {
        let events: Vec<RawEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse NDJSON (newline-delimited JSON) containing RawEvents
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawEvent>, AnalyticsError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event = serde_json::from_str::<RawEvent>(trimmed).map_err(|e| {
                AnalyticsError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Parse either format, picking by the first non-whitespace character
    pub fn parse_auto(input: &str) -> Result<Vec<RawEvent>, AnalyticsError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    /// Run a batch through the normalizer and summarize what survives
    pub fn validate(events: &[RawEvent]) -> ValidationReport {
        let batch = EventNormalizer::normalize(events, EventScope::All);

        let mut by_type = BTreeMap::new();
        let mut sessions = BTreeSet::new();
        let mut positioned = 0;
        for event in &batch.events {
            *by_type.entry(event.event_type.to_string()).or_insert(0) += 1;
            sessions.insert(event.session_id.as_str());
            if event.position().is_some() {
                positioned += 1;
            }
        }

        ValidationReport {
            total: events.len(),
            valid: batch.events.len(),
            positioned,
            sessions: sessions.len(),
            by_type,
            first_timestamp: batch.events.first().map(|e| e.timestamp),
            last_timestamp: batch.events.last().map(|e| e.timestamp),
            skipped: batch.skipped,
        }
    }
}

/// Summary of a validated batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Records in the input
    pub total: usize,
    /// Records that normalized cleanly
    pub valid: usize,
    /// Valid records carrying pointer coordinates
    pub positioned: usize,
    /// Distinct session ids among valid records
    pub sessions: usize,
    /// Valid record count per event type
    pub by_type: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Dropped records with their reasons
    pub skipped: Vec<SkippedRecord>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}
