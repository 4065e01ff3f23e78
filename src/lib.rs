//! tracklens - Aggregation engine for browser interaction telemetry
//!
//! tracklens turns raw tracker events (mouse moves, clicks, page views) into
//! analysis results through a deterministic pipeline: raw event parsing →
//! normalization → aggregation (heatmaps, navigation paths, funnels, cursor
//! kinematics) → persisted analysis records.
//!
//! ## Modules
//!
//! - **Population analytics**: grid heatmaps, path frequencies and funnel
//!   conversion over a time window, run as idempotent jobs
//! - **Session analytics**: mouse metrics, cursor path patterns and a smoothed
//!   cursor heatmap for one session

pub mod config;
pub mod error;
pub mod funnel;
pub mod kinematics;
pub mod normalizer;
pub mod paths;
pub mod pipeline;
pub mod schema;
pub mod spatial;
pub mod store;
pub mod types;

pub use config::AnalyticsConfig;
pub use error::{AnalyticsError, SkipReason, SkippedRecord};
pub use normalizer::{EventNormalizer, EventScope, NormalizedBatch};
pub use pipeline::{AnalyticsProcessor, DailyPlan, JobOutcome, PopularUrl};
pub use store::{AnalysisStore, EventQuery, EventStore, MemoryStore, SessionQuery};

// Schema exports
pub use schema::{EventType, RawEvent, RawEventAdapter, SessionRecord, ValidationReport};

/// tracklens version, reported by the CLI
pub const TRACKLENS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported alongside results
pub const PRODUCER_NAME: &str = "tracklens";
