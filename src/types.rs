//! Core types for the tracklens pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: canonical events, and the self-contained result objects produced
//! by each aggregator (heatmaps, paths, funnels, cursor kinematics).

use crate::schema::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized event. Immutable once produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Event instant (UTC)
    pub timestamp: DateTime<Utc>,
    /// Opaque session identifier
    pub session_id: String,
    /// Interaction type
    pub event_type: EventType,
    /// Pointer x coordinate, when the event carried one
    pub x: Option<f64>,
    /// Pointer y coordinate, when the event carried one
    pub y: Option<f64>,
    /// Mouse button (0 = left, 1 = middle, 2 = right)
    pub button: Option<i64>,
    /// Page URL
    pub url: String,
    /// Target element tag name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tag: Option<String>,
    /// Target element id attribute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Target element class attribute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_class: Option<String>,
    /// Target bounding rectangle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_top: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_left: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_height: Option<f64>,
}

impl CanonicalEvent {
    /// Build an event without coordinates or target data
    pub fn new(
        timestamp: DateTime<Utc>,
        session_id: impl Into<String>,
        event_type: EventType,
        url: impl Into<String>,
    ) -> Self {
        CanonicalEvent {
            timestamp,
            session_id: session_id.into(),
            event_type,
            x: None,
            y: None,
            button: None,
            url: url.into(),
            target_tag: None,
            target_id: None,
            target_class: None,
            target_top: None,
            target_left: None,
            target_width: None,
            target_height: None,
        }
    }

    /// Set pointer coordinates
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    /// Both coordinates, when present
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.x, self.y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }
}

/// A pointer sample reduced to what spatial math needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Canvas or recording resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

// ============================================================================
// Spatial results
// ============================================================================

/// Discrete grid heatmap over a fixed resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapResult {
    /// Counts indexed `[row][col]`
    pub grid: Vec<Vec<u64>>,
    /// Cell side in pixels
    pub grid_size: u32,
    /// Largest cell count (0 for an empty grid)
    pub max_value: u64,
    /// Number of points actually binned
    pub total_events: u64,
    /// Recording resolution the grid covers
    pub resolution: Resolution,
}

impl HeatmapResult {
    pub fn cols(&self) -> usize {
        self.grid.first().map_or(0, |row| row.len())
    }

    pub fn rows(&self) -> usize {
        self.grid.len()
    }
}

/// One emitted cell of the smoothed cursor heatmap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPoint {
    pub x: u32,
    pub y: u32,
    /// Smoothed density normalized into `[0, 1]`
    pub value: f64,
}

/// Smoothed per-session cursor heatmap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorHeatmap {
    pub width: u32,
    pub height: u32,
    pub points: Vec<HeatPoint>,
    /// Smoothed maximum before normalization
    pub max_value: f64,
}

/// Cursor heatmap, or the reason it couldn't be produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorHeatmapResult {
    Ready(CursorHeatmap),
    Failed { error: String },
}

impl CursorHeatmapResult {
    pub fn error(&self) -> Option<&str> {
        match self {
            CursorHeatmapResult::Failed { error } => Some(error),
            CursorHeatmapResult::Ready(_) => None,
        }
    }
}

/// A histogram cell whose density is above the hotspot percentile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Cell center
    pub x: f64,
    pub y: f64,
    /// Points in the cell
    pub intensity: f64,
}

/// Statistics-driven 2-D histogram with detected hotspots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotspotAnalysis {
    /// Counts indexed `[x_bin][y_bin]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heatmap: Vec<Vec<f64>>,
    /// Bin edges along x (`bins + 1` values)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heatmap_x: Vec<f64>,
    /// Bin edges along y
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heatmap_y: Vec<f64>,
    /// Top hotspots by intensity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hotspots: Vec<Hotspot>,
    /// Set when the histogram couldn't be computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap_error: Option<String>,
}

// ============================================================================
// Kinematics results
// ============================================================================

/// Per-session pointer summary: counts, extent, timing and speed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MouseMetrics {
    pub total_events: u64,
    pub move_events: u64,
    pub click_events: u64,
    /// Click histogram, present when there were clicks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_clicks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_clicks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_clicks: Option<u64>,
    /// Spatial extent of all samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_y: Option<f64>,
    /// Density histogram and hotspots
    #[serde(flatten)]
    pub density: HotspotAnalysis,
    /// First to last sample (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Pixels per second over continuous movement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    /// Pixels travelled over continuous movement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_distance: Option<f64>,
}

/// Curvature and acceleration summary of the cursor trail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathPatterns {
    /// Mean angular change between consecutive directions (radians)
    pub avg_curvature: f64,
    /// Largest angular change (radians)
    pub max_curvature: f64,
    /// Samples turning by more than the hesitation angle
    pub hesitation_count: u64,
    /// Fraction of samples turning by less than the straight angle
    pub straight_segments: f64,
    /// Mean change of speed per second (px/s²)
    pub avg_acceleration: f64,
}

/// Cursor path analysis, or an explicit insufficient-data marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorPatterns {
    Analyzed(PathPatterns),
    Insufficient { error: String },
}

impl CursorPatterns {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, CursorPatterns::Insufficient { .. })
    }

    pub fn patterns(&self) -> Option<&PathPatterns> {
        match self {
            CursorPatterns::Analyzed(p) => Some(p),
            CursorPatterns::Insufficient { .. } => None,
        }
    }
}

/// On-demand mouse analytics for a single session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMouseAnalytics {
    pub session_id: String,
    pub metrics: MouseMetrics,
    pub patterns: CursorPatterns,
    pub heatmap: CursorHeatmapResult,
}

// ============================================================================
// Population results
// ============================================================================

/// A distinct page-view trail and how many sessions followed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCount {
    pub path: Vec<String>,
    pub count: u64,
}

/// Navigation path frequency table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAnalysisResult {
    /// Distinct trails, most frequent first
    pub paths: Vec<PathCount>,
    /// Sessions with at least one page view
    pub total_sessions: u64,
}

/// One configured funnel step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub name: String,
    /// Substring matched against page-view URLs
    pub url_pattern: String,
    pub step_order: i32,
}

impl FunnelStep {
    pub fn new(name: impl Into<String>, url_pattern: impl Into<String>, step_order: i32) -> Self {
        FunnelStep {
            name: name.into(),
            url_pattern: url_pattern.into(),
            step_order,
        }
    }
}

/// Conversion figures for one funnel step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStepResult {
    pub name: String,
    pub url_pattern: String,
    pub step_order: i32,
    /// Sessions that visited this step, regardless of earlier steps
    pub sessions_count: u64,
    /// Sessions that visited this step and every earlier one
    pub continuing_count: u64,
    /// Percent of the previous step's continuing sessions (100 for step 0)
    pub conversion_rate: f64,
    pub drop_off_rate: f64,
}

/// Funnel conversion chain over a session population
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelAnalysisResult {
    pub steps: Vec<FunnelStepResult>,
    /// Size of the session population evaluated
    pub total_sessions: u64,
    /// Last step's visitors as a percent of the first step's
    pub completion_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_patterns_insufficient_serialization() {
        let patterns = CursorPatterns::Insufficient {
            error: "Not enough data points for analysis".to_string(),
        };
        let json = serde_json::to_value(&patterns).unwrap();
        assert_eq!(json["error"], "Not enough data points for analysis");
        assert!(json.get("avg_curvature").is_none());
    }

    #[test]
    fn test_mouse_metrics_omits_absent_fields() {
        let metrics = MouseMetrics {
            total_events: 3,
            move_events: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["total_events"], 3);
        assert!(json.get("left_clicks").is_none());
        assert!(json.get("hotspots").is_none());
        assert!(json.get("avg_speed").is_none());
    }

    #[test]
    fn test_canonical_event_position() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let event = CanonicalEvent::new(ts, "s1", EventType::MouseMove, "/home");
        assert_eq!(event.position(), None);
        assert_eq!(event.at(3.0, 4.0).position(), Some((3.0, 4.0)));
    }
}
