//! Cursor kinematics
//!
//! Per-session statistics over pointer samples: event counts, click buttons,
//! spatial extent, speed over continuous movement, and the shape of the cursor
//! trail (curvature, hesitations, straight runs, acceleration).
//!
//! Movement is "continuous" between two consecutive move samples when they are
//! less than `navigation_gap_sec` apart; longer gaps are treated as the user
//! leaving and returning, and contribute nothing to speed or distance.

use crate::config::AnalyticsConfig;
use crate::schema::EventType;
use crate::spatial::detect_hotspots;
use crate::types::{CanonicalEvent, CursorPatterns, MouseMetrics, PathPatterns, Point};
use std::f64::consts::PI;

/// Returned when a session has too few move samples for path analysis
pub const INSUFFICIENT_DATA: &str = "Not enough data points for analysis";

/// Counts, extent, density and speed for one session's pointer events
pub fn mouse_metrics(events: &[CanonicalEvent], config: &AnalyticsConfig) -> MouseMetrics {
    let samples = pointer_samples(events, None);
    if samples.is_empty() {
        return MouseMetrics::default();
    }

    let mut metrics = MouseMetrics {
        total_events: samples.len() as u64,
        ..Default::default()
    };

    let clicks: Vec<&CanonicalEvent> = samples
        .iter()
        .copied()
        .filter(|e| e.event_type == EventType::MouseClick)
        .collect();
    metrics.click_events = clicks.len() as u64;
    metrics.move_events = metrics.total_events - metrics.click_events;

    if !clicks.is_empty() {
        let count_button = |b: i64| clicks.iter().filter(|e| e.button == Some(b)).count() as u64;
        metrics.left_clicks = Some(count_button(0));
        metrics.middle_clicks = Some(count_button(1));
        metrics.right_clicks = Some(count_button(2));
    }

    let points: Vec<Point> = samples
        .iter()
        .filter_map(|e| e.position())
        .map(|(x, y)| Point { x, y })
        .collect();
    metrics.min_x = points.iter().map(|p| p.x).reduce(f64::min);
    metrics.max_x = points.iter().map(|p| p.x).reduce(f64::max);
    metrics.min_y = points.iter().map(|p| p.y).reduce(f64::min);
    metrics.max_y = points.iter().map(|p| p.y).reduce(f64::max);
    metrics.density = detect_hotspots(&points, config);

    if samples.len() > 1 {
        metrics.duration_seconds = Some(seconds_between(samples[0], samples[samples.len() - 1]));
    }

    let moves = pointer_samples(events, Some(EventType::MouseMove));
    if moves.len() > 1 {
        let segments = segments(&moves);
        let continuous: Vec<&Segment> = segments
            .iter()
            .filter(|s| s.elapsed >= 0.0 && s.elapsed < config.navigation_gap_sec)
            .collect();
        let speeds: Vec<f64> = continuous.iter().filter_map(|s| s.speed()).collect();

        metrics.total_distance = Some(continuous.iter().map(|s| s.distance).sum());
        if !speeds.is_empty() {
            metrics.avg_speed = Some(mean(&speeds));
            metrics.max_speed = speeds.iter().copied().reduce(f64::max);
        }
    }

    metrics
}

/// Shape of the cursor trail built from a session's move samples
pub fn cursor_patterns(events: &[CanonicalEvent], config: &AnalyticsConfig) -> CursorPatterns {
    let moves = pointer_samples(events, Some(EventType::MouseMove));
    if moves.len() < config.min_move_samples.max(2) {
        return CursorPatterns::Insufficient {
            error: INSUFFICIENT_DATA.to_string(),
        };
    }

    let segments = segments(&moves);
    let directions: Vec<f64> = segments.iter().map(|s| s.dy.atan2(s.dx)).collect();
    let turns: Vec<f64> = directions
        .windows(2)
        .map(|pair| {
            let diff = (pair[1] - pair[0]).abs();
            diff.min(2.0 * PI - diff)
        })
        .collect();

    let hesitation_count = turns.iter().filter(|&&t| t > config.hesitation_angle).count() as u64;
    let straight = turns.iter().filter(|&&t| t < config.straight_angle).count();

    CursorPatterns::Analyzed(PathPatterns {
        avg_curvature: mean(&turns),
        max_curvature: turns.iter().copied().fold(0.0, f64::max),
        hesitation_count,
        straight_segments: straight as f64 / segments.len() as f64,
        avg_acceleration: mean(&accelerations(&segments, config.navigation_gap_sec)),
    })
}

/// One step between consecutive move samples
#[derive(Debug, Clone, Copy)]
struct Segment {
    dx: f64,
    dy: f64,
    distance: f64,
    /// Seconds between the two samples
    elapsed: f64,
}

impl Segment {
    fn speed(&self) -> Option<f64> {
        (self.elapsed > 0.0).then(|| self.distance / self.elapsed)
    }
}

/// Positioned mouse events in time order, optionally of one type
fn pointer_samples(events: &[CanonicalEvent], only: Option<EventType>) -> Vec<&CanonicalEvent> {
    let mut samples: Vec<&CanonicalEvent> = events
        .iter()
        .filter(|e| e.event_type.is_spatial() && e.position().is_some())
        .filter(|e| only.map_or(true, |t| e.event_type == t))
        .collect();
    samples.sort_by_key(|e| e.timestamp);
    samples
}

fn segments(samples: &[&CanonicalEvent]) -> Vec<Segment> {
    samples
        .windows(2)
        .filter_map(|pair| {
            let (x0, y0) = pair[0].position()?;
            let (x1, y1) = pair[1].position()?;
            let (dx, dy) = (x1 - x0, y1 - y0);
            Some(Segment {
                dx,
                dy,
                distance: dx.hypot(dy),
                elapsed: seconds_between(pair[0], pair[1]),
            })
        })
        .collect()
}

/// Change of speed between adjacent continuous segments, per second of the later one
fn accelerations(segments: &[Segment], gap_sec: f64) -> Vec<f64> {
    let speed = |s: &Segment| s.speed().filter(|_| s.elapsed < gap_sec);
    segments
        .windows(2)
        .filter_map(|pair| {
            let previous = speed(&pair[0])?;
            let current = speed(&pair[1])?;
            Some((current - previous) / pair[1].elapsed)
        })
        .collect()
}

fn seconds_between(from: &CanonicalEvent, to: &CanonicalEvent) -> f64 {
    (to.timestamp - from.timestamp).num_milliseconds() as f64 / 1000.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn mv(ms: i64, x: f64, y: f64) -> CanonicalEvent {
        CanonicalEvent::new(base() + Duration::milliseconds(ms), "s1", EventType::MouseMove, "/")
            .at(x, y)
    }

    fn click(ms: i64, x: f64, y: f64, button: i64) -> CanonicalEvent {
        let mut event =
            CanonicalEvent::new(base() + Duration::milliseconds(ms), "s1", EventType::MouseClick, "/")
                .at(x, y);
        event.button = Some(button);
        event
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_mouse_metrics_counts_extent_and_speed() {
        let events = vec![
            mv(0, 0.0, 0.0),
            mv(1000, 30.0, 40.0),
            mv(1500, 30.0, 40.0),
            click(2000, 10.0, 10.0, 0),
            click(3000, 20.0, 20.0, 2),
            // 3.5 s after the previous move: not continuous
            mv(5000, 60.0, 80.0),
        ];

        let metrics = mouse_metrics(&events, &AnalyticsConfig::default());

        assert_eq!(metrics.total_events, 6);
        assert_eq!(metrics.move_events, 4);
        assert_eq!(metrics.click_events, 2);
        assert_eq!(metrics.left_clicks, Some(1));
        assert_eq!(metrics.middle_clicks, Some(0));
        assert_eq!(metrics.right_clicks, Some(1));
        assert_eq!(metrics.min_x, Some(0.0));
        assert_eq!(metrics.max_x, Some(60.0));
        assert_eq!(metrics.max_y, Some(80.0));
        assert_eq!(metrics.duration_seconds, Some(5.0));
        assert_eq!(metrics.avg_speed, Some(25.0));
        assert_eq!(metrics.max_speed, Some(50.0));
        assert_eq!(metrics.total_distance, Some(50.0));
        assert_eq!(metrics.density.heatmap.len(), 6);
        assert_eq!(metrics.density.heatmap[0].len(), 8);
    }

    #[test]
    fn test_mouse_metrics_empty_session() {
        let metrics = mouse_metrics(&[], &AnalyticsConfig::default());
        assert_eq!(metrics, MouseMetrics::default());
    }

    #[test]
    fn test_mouse_metrics_zero_elapsed_pair_has_distance_but_no_speed() {
        let events = vec![mv(0, 0.0, 0.0), mv(0, 6.0, 8.0)];
        let metrics = mouse_metrics(&events, &AnalyticsConfig::default());

        assert_eq!(metrics.total_distance, Some(10.0));
        assert_eq!(metrics.avg_speed, None);
        assert_eq!(metrics.max_speed, None);
        assert_eq!(metrics.left_clicks, None);
    }

    #[test]
    fn test_mouse_metrics_ignores_unpositioned_and_non_mouse() {
        let page = CanonicalEvent::new(base(), "s1", EventType::PageView, "/");
        let bare_move = CanonicalEvent::new(base(), "s1", EventType::MouseMove, "/");
        let metrics = mouse_metrics(&[page, bare_move, mv(10, 1.0, 2.0)], &AnalyticsConfig::default());

        assert_eq!(metrics.total_events, 1);
        assert_eq!(metrics.duration_seconds, None);
        assert_eq!(metrics.total_distance, None);
    }

    #[test]
    fn test_cursor_patterns_insufficient() {
        let events: Vec<CanonicalEvent> = (0..9).map(|i| mv(i * 100, i as f64, 0.0)).collect();
        let patterns = cursor_patterns(&events, &AnalyticsConfig::default());

        assert!(patterns.is_insufficient());
        assert_eq!(
            serde_json::to_value(&patterns).unwrap(),
            serde_json::json!({"error": "Not enough data points for analysis"})
        );
    }

    #[test]
    fn test_cursor_patterns_straight_line() {
        let events: Vec<CanonicalEvent> = (0..12).map(|i| mv(i * 100, i as f64 * 5.0, 0.0)).collect();
        let patterns = cursor_patterns(&events, &AnalyticsConfig::default());
        let p = patterns.patterns().unwrap();

        assert_eq!(p.avg_curvature, 0.0);
        assert_eq!(p.max_curvature, 0.0);
        assert_eq!(p.hesitation_count, 0);
        // 10 turns over 11 segments
        assert!(approx(p.straight_segments, 10.0 / 11.0));
        assert_eq!(p.avg_acceleration, 0.0);
    }

    #[test]
    fn test_cursor_patterns_zigzag_hesitates() {
        let events: Vec<CanonicalEvent> = (0..12)
            .map(|i| {
                let step = (i / 2) as f64 * 10.0;
                let (x, y) = if i % 2 == 0 { (step, step) } else { (step + 10.0, step) };
                mv(i * 100, x, y)
            })
            .collect();
        let patterns = cursor_patterns(&events, &AnalyticsConfig::default());
        let p = patterns.patterns().unwrap();

        assert_eq!(p.hesitation_count, 10);
        assert!(approx(p.avg_curvature, PI / 2.0));
        assert!(approx(p.max_curvature, PI / 2.0));
        assert_eq!(p.straight_segments, 0.0);
    }

    #[test]
    fn test_turn_uses_minor_arc() {
        // Direction goes from just below +π to just above -π: a tiny turn
        let mut events: Vec<CanonicalEvent> =
            (0..10).map(|i| mv(i * 100, -(i as f64) * 10.0, 0.1 * i as f64)).collect();
        events.push(mv(1000, -100.0, 0.8));
        let patterns = cursor_patterns(&events, &AnalyticsConfig::default());

        assert!(patterns.patterns().unwrap().max_curvature < PI / 36.0);
    }

    #[test]
    fn test_cursor_patterns_acceleration() {
        // Segment k travels 10k px in 1 s, so speed rises by 10 px/s each second
        let mut x = 0.0;
        let mut events = vec![mv(0, x, 0.0)];
        for k in 1..=10 {
            x += 10.0 * k as f64;
            events.push(mv(k * 1000, x, 0.0));
        }
        let patterns = cursor_patterns(&events, &AnalyticsConfig::default());

        assert!(approx(patterns.patterns().unwrap().avg_acceleration, 10.0));
    }

    #[test]
    fn test_acceleration_skips_gaps() {
        let segments = vec![
            Segment { dx: 10.0, dy: 0.0, distance: 10.0, elapsed: 1.0 },
            Segment { dx: 50.0, dy: 0.0, distance: 50.0, elapsed: 5.0 },
            Segment { dx: 20.0, dy: 0.0, distance: 20.0, elapsed: 1.0 },
            Segment { dx: 40.0, dy: 0.0, distance: 40.0, elapsed: 0.5 },
        ];
        // Only the last pair is continuous on both sides: (80 - 20) / 0.5
        assert_eq!(accelerations(&segments, 2.0), vec![120.0]);
    }
}
