//! Error types for tracklens

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading input or running analysis jobs
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Event store error: {0}")]
    Store(String),

    #[error("Invalid time window: {0}")]
    InvalidWindow(String),

    #[error("Unknown funnel: {0}")]
    UnknownFunnel(String),
}

/// Why a single raw record was left out of a normalized batch.
///
/// Skips are collected per batch; they never abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unparseable timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Non-numeric coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Undecodable payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// A raw record dropped by the normalizer, with its position in the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Index of the record in the input sequence
    pub index: usize,
    /// Reason the record was skipped
    pub reason: SkipReason,
}
