//! Analysis configuration
//!
//! Every tunable used by the aggregators lives here. Defaults match the
//! values the dashboards were built against; a subset can be overridden from
//! `TRACKLENS_*` environment variables.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Side of a discrete heatmap cell in pixels
pub const DEFAULT_GRID_SIZE: u32 = 10;

/// Default recording resolution for discrete heatmaps
pub const DEFAULT_RESOLUTION_WIDTH: u32 = 1920;
pub const DEFAULT_RESOLUTION_HEIGHT: u32 = 1080;

/// Output canvas for the per-session cursor heatmap
pub const DEFAULT_CANVAS_WIDTH: u32 = 1000;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 800;

/// Configuration for all aggregation stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Discrete heatmap cell size (pixels)
    pub grid_size: u32,
    /// Discrete heatmap resolution used when a record doesn't specify one
    pub resolution_width: u32,
    pub resolution_height: u32,

    /// Cursor heatmap canvas
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Gaussian smoothing sigma (pixels)
    pub smoothing_sigma: f64,
    /// Emit every n-th pixel of the smoothed canvas
    pub output_stride: u32,
    /// Smoothed values at or below this are not emitted
    pub emit_threshold: f64,

    /// Hotspot histogram: pixels per bin
    pub hotspot_bin_width: f64,
    /// Hotspot histogram: upper bound on bins per axis
    pub hotspot_max_bins: usize,
    /// Cells strictly above this percentile of bin values are hotspots
    pub hotspot_percentile: f64,
    /// Maximum number of hotspots reported
    pub hotspot_limit: usize,

    /// Minimum move samples for cursor path analysis
    pub min_move_samples: usize,
    /// Consecutive samples further apart than this are a navigation gap (seconds)
    pub navigation_gap_sec: f64,
    /// Angular change above which a sample counts as hesitation (radians)
    pub hesitation_angle: f64,
    /// Angular change below which a sample counts as straight (radians)
    pub straight_angle: f64,

    /// URLs per day that get a scheduled click/move heatmap
    pub popular_url_limit: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            resolution_width: DEFAULT_RESOLUTION_WIDTH,
            resolution_height: DEFAULT_RESOLUTION_HEIGHT,
            canvas_width: DEFAULT_CANVAS_WIDTH,
            canvas_height: DEFAULT_CANVAS_HEIGHT,
            smoothing_sigma: 10.0,
            output_stride: 5,
            emit_threshold: 0.05,
            hotspot_bin_width: 10.0,
            hotspot_max_bins: 100,
            hotspot_percentile: 90.0,
            hotspot_limit: 10,
            min_move_samples: 10,
            navigation_gap_sec: 2.0,
            hesitation_angle: PI / 4.0,
            straight_angle: PI / 36.0,
            popular_url_limit: 5,
        }
    }
}

impl AnalyticsConfig {
    /// Defaults overridden by `TRACKLENS_GRID_SIZE`, `TRACKLENS_RESOLUTION_WIDTH`,
    /// `TRACKLENS_RESOLUTION_HEIGHT`, `TRACKLENS_CANVAS_WIDTH` and
    /// `TRACKLENS_CANVAS_HEIGHT`.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            grid_size: env_u32("TRACKLENS_GRID_SIZE", defaults.grid_size)?,
            resolution_width: env_u32("TRACKLENS_RESOLUTION_WIDTH", defaults.resolution_width)?,
            resolution_height: env_u32("TRACKLENS_RESOLUTION_HEIGHT", defaults.resolution_height)?,
            canvas_width: env_u32("TRACKLENS_CANVAS_WIDTH", defaults.canvas_width)?,
            canvas_height: env_u32("TRACKLENS_CANVAS_HEIGHT", defaults.canvas_height)?,
            ..defaults
        })
    }

    /// Load a full configuration from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, String> {
    match std::env::var(key) {
        Ok(raw) => {
            let value: u32 = raw
                .trim()
                .parse()
                .map_err(|e| format!("invalid {key}: {e}"))?;
            if value == 0 {
                return Err(format!("invalid {key}: must be positive"));
            }
            Ok(value)
        }
        Err(_) => Ok(default),
    }
}
