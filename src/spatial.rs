//! Spatial aggregation
//!
//! Three binning algorithms over pointer coordinates. They deliberately differ
//! in edge policy:
//!
//! - [`grid_heatmap`]: fixed-resolution square cells; out-of-bounds points are
//!   dropped.
//! - [`cursor_heatmap`]: per-session canvas rescaled from the observed bounding
//!   box; points are clamped, then Gaussian-smoothed.
//! - [`detect_hotspots`]: statistics-driven histogram; cells above the
//!   configured percentile are reported as hotspots.

use crate::config::AnalyticsConfig;
use crate::types::{
    CursorHeatmap, CursorHeatmapResult, HeatPoint, HeatmapResult, Hotspot, HotspotAnalysis,
    Point, Resolution,
};
use std::cmp::Ordering;

/// Gaussian kernel radius in sigmas
const KERNEL_TRUNCATE: f64 = 4.0;

/// Bin points into a `grid_size`-pixel grid over `resolution`.
///
/// `cols = width / grid_size` and `rows = height / grid_size` (floor). A point
/// contributes only when `0 <= x < width` and `0 <= y < height`; the cell index
/// is clamped to the last row/column so a partial trailing cell folds into its
/// neighbour.
pub fn grid_heatmap(points: &[Point], resolution: Resolution, grid_size: u32) -> HeatmapResult {
    let grid_size = grid_size.max(1);
    let cols = (resolution.width / grid_size) as usize;
    let rows = (resolution.height / grid_size) as usize;
    let mut grid = vec![vec![0u64; cols]; rows];

    let width = resolution.width as f64;
    let height = resolution.height as f64;
    let cell = grid_size as f64;
    let mut total_events = 0u64;

    if rows > 0 && cols > 0 {
        for p in points {
            if !(p.x >= 0.0 && p.x < width && p.y >= 0.0 && p.y < height) {
                continue;
            }
            let col = ((p.x / cell).floor() as usize).min(cols - 1);
            let row = ((p.y / cell).floor() as usize).min(rows - 1);
            grid[row][col] += 1;
            total_events += 1;
        }
    }

    let max_value = grid
        .iter()
        .flat_map(|row| row.iter().copied())
        .max()
        .unwrap_or(0);

    HeatmapResult {
        grid,
        grid_size,
        max_value,
        total_events,
        resolution,
    }
}

/// Smoothed cursor heatmap on the configured canvas.
///
/// Points are rescaled from their bounding box onto the canvas (a zero range
/// uses divisor 1), clamped into it, counted, smoothed with a Gaussian of
/// `smoothing_sigma`, and normalized by the smoothed maximum. Only every
/// `output_stride`-th pixel with a value above `emit_threshold` is emitted.
pub fn cursor_heatmap(points: &[Point], config: &AnalyticsConfig) -> CursorHeatmapResult {
    match build_cursor_heatmap(points, config) {
        Ok(heatmap) => CursorHeatmapResult::Ready(heatmap),
        Err(error) => CursorHeatmapResult::Failed { error },
    }
}

fn build_cursor_heatmap(points: &[Point], config: &AnalyticsConfig) -> Result<CursorHeatmap, String> {
    if points.is_empty() {
        return Err("No cursor position data available".to_string());
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err("Cursor positions contain non-finite coordinates".to_string());
    }

    let width = config.canvas_width as usize;
    let height = config.canvas_height as usize;
    if width == 0 || height == 0 {
        return Err(format!("Canvas {}x{} has no area", width, height));
    }

    let (min_x, max_x, min_y, max_y) = bounds(points);
    let x_scale = width as f64 / non_zero(max_x - min_x);
    let y_scale = height as f64 / non_zero(max_y - min_y);

    let mut canvas = vec![0.0f64; width * height];
    for p in points {
        let cx = (((p.x - min_x) * x_scale) as i64).clamp(0, width as i64 - 1) as usize;
        let cy = (((p.y - min_y) * y_scale) as i64).clamp(0, height as i64 - 1) as usize;
        canvas[cy * width + cx] += 1.0;
    }

    gaussian_smooth(&mut canvas, width, height, config.smoothing_sigma);

    let max_value = canvas.iter().copied().fold(0.0f64, f64::max);
    if max_value > 0.0 {
        for v in canvas.iter_mut() {
            *v /= max_value;
        }
    }

    let stride = config.output_stride.max(1) as usize;
    let mut emitted = Vec::new();
    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            let value = canvas[y * width + x];
            if value > config.emit_threshold {
                emitted.push(HeatPoint {
                    x: x as u32,
                    y: y as u32,
                    value,
                });
            }
        }
    }

    Ok(CursorHeatmap {
        width: config.canvas_width,
        height: config.canvas_height,
        points: emitted,
        max_value,
    })
}

/// Density histogram with hotspot detection.
///
/// Bins per axis are `min(max_bins, floor(range / bin_width))`; when either
/// axis has no bins the histogram is omitted. Cells strictly above the
/// configured percentile of all bin values are hotspots, reported at their
/// cell center, most intense first.
pub fn detect_hotspots(points: &[Point], config: &AnalyticsConfig) -> HotspotAnalysis {
    if points.is_empty() {
        return HotspotAnalysis::default();
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return HotspotAnalysis {
            heatmap_error: Some("Cursor positions contain non-finite coordinates".to_string()),
            ..Default::default()
        };
    }
    if config.hotspot_bin_width <= 0.0 {
        return HotspotAnalysis {
            heatmap_error: Some(format!(
                "Hotspot bin width must be positive, got {}",
                config.hotspot_bin_width
            )),
            ..Default::default()
        };
    }

    let (min_x, max_x, min_y, max_y) = bounds(points);
    let x_bins = bin_count(max_x - min_x, config);
    let y_bins = bin_count(max_y - min_y, config);
    if x_bins == 0 || y_bins == 0 {
        return HotspotAnalysis::default();
    }

    let x_edges = edges(min_x, max_x, x_bins);
    let y_edges = edges(min_y, max_y, y_bins);

    let mut heatmap = vec![vec![0.0f64; y_bins]; x_bins];
    for p in points {
        let i = bin_index(p.x, min_x, max_x, x_bins);
        let j = bin_index(p.y, min_y, max_y, y_bins);
        heatmap[i][j] += 1.0;
    }

    let values: Vec<f64> = heatmap.iter().flat_map(|col| col.iter().copied()).collect();
    let threshold = percentile(&values, config.hotspot_percentile);

    let mut hotspots = Vec::new();
    for (i, column) in heatmap.iter().enumerate() {
        for (j, &count) in column.iter().enumerate() {
            if count > threshold {
                hotspots.push(Hotspot {
                    x: (x_edges[i] + x_edges[i + 1]) / 2.0,
                    y: (y_edges[j] + y_edges[j + 1]) / 2.0,
                    intensity: count,
                });
            }
        }
    }
    // Stable: equal intensities keep scan order
    hotspots.sort_by(|a, b| b.intensity.partial_cmp(&a.intensity).unwrap_or(Ordering::Equal));
    hotspots.truncate(config.hotspot_limit);

    HotspotAnalysis {
        heatmap,
        heatmap_x: x_edges,
        heatmap_y: y_edges,
        hotspots,
        heatmap_error: None,
    }
}

/// Linear-interpolated percentile (`p` in 0..=100). Empty input yields 0.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

fn bounds(points: &[Point]) -> (f64, f64, f64, f64) {
    points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(min_x, max_x, min_y, max_y), p| {
            (min_x.min(p.x), max_x.max(p.x), min_y.min(p.y), max_y.max(p.y))
        },
    )
}

fn non_zero(range: f64) -> f64 {
    if range == 0.0 {
        1.0
    } else {
        range
    }
}

fn bin_count(range: f64, config: &AnalyticsConfig) -> usize {
    ((range / config.hotspot_bin_width) as usize).min(config.hotspot_max_bins)
}

fn edges(min: f64, max: f64, bins: usize) -> Vec<f64> {
    let step = (max - min) / bins as f64;
    let mut edges: Vec<f64> = (0..bins).map(|i| min + step * i as f64).collect();
    edges.push(max);
    edges
}

/// Histogram bin of `v`; the last bin is closed on the right
fn bin_index(v: f64, min: f64, max: f64, bins: usize) -> usize {
    let idx = ((v - min) / (max - min) * bins as f64).floor() as usize;
    idx.min(bins - 1)
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (KERNEL_TRUNCATE * sigma + 0.5) as i64;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Mirror an out-of-range index back into `0..n` (`d c b a | a b c d | d c b a`)
fn reflect(i: i64, n: usize) -> usize {
    let n = n as i64;
    let m = i.rem_euclid(2 * n);
    (if m >= n { 2 * n - 1 - m } else { m }) as usize
}

/// Separable Gaussian blur, in place, with reflected boundaries
fn gaussian_smooth(canvas: &mut [f64], width: usize, height: usize, sigma: f64) {
    if sigma <= 0.0 {
        return;
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;

    // Horizontal pass; rows without samples stay zero
    let mut horizontal = vec![0.0f64; width * height];
    let mut row_has_mass = vec![false; height];
    for y in 0..height {
        let row = &canvas[y * width..(y + 1) * width];
        if row.iter().all(|&v| v == 0.0) {
            continue;
        }
        row_has_mass[y] = true;
        let out = &mut horizontal[y * width..(y + 1) * width];
        for (x, slot) in out.iter_mut().enumerate() {
            *slot = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * row[reflect(x as i64 + k as i64 - radius, width)])
                .sum();
        }
    }

    // Vertical pass, accumulated row by row
    canvas.iter_mut().for_each(|v| *v = 0.0);
    for y in 0..height {
        for (k, w) in kernel.iter().enumerate() {
            let src = reflect(y as i64 + k as i64 - radius, height);
            if !row_has_mass[src] {
                continue;
            }
            let (src_row, dst_row) = (src * width, y * width);
            for x in 0..width {
                canvas[dst_row + x] += w * horizontal[src_row + x];
            }
        }
    }
}
