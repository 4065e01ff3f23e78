//! Navigation path aggregation
//!
//! Builds each session's chronological page-view trail and counts how many
//! sessions followed each distinct trail.

use crate::schema::{EventType, SessionRecord};
use crate::types::{CanonicalEvent, PathAnalysisResult, PathCount};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Count identical page-view trails across `sessions`.
///
/// `events` may contain any event types and sessions; only page views of the
/// given sessions are used. Sessions without a page view are left out of both
/// the counts and `total_sessions`.
pub fn aggregate_paths(sessions: &[SessionRecord], events: &[CanonicalEvent]) -> PathAnalysisResult {
    let mut trails: HashMap<&str, Vec<&CanonicalEvent>> = HashMap::new();
    for event in events.iter().filter(|e| e.event_type == EventType::PageView) {
        trails.entry(event.session_id.as_str()).or_default().push(event);
    }

    let mut paths: Vec<PathCount> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut seen = HashSet::new();
    let mut total_sessions = 0u64;

    for session in sessions {
        if !seen.insert(session.session_id.as_str()) {
            continue;
        }
        let Some(views) = trails.get_mut(session.session_id.as_str()) else {
            continue;
        };
        views.sort_by_key(|e| e.timestamp);
        let path: Vec<String> = views.iter().map(|e| e.url.clone()).collect();

        total_sessions += 1;
        match index.get(&path) {
            Some(&i) => paths[i].count += 1,
            None => {
                index.insert(path.clone(), paths.len());
                paths.push(PathCount { path, count: 1 });
            }
        }
    }

    // Stable: ties keep first-encounter order
    paths.sort_by(|a, b| b.count.cmp(&a.count));

    debug!(
        sessions = sessions.len(),
        total_sessions,
        distinct_paths = paths.len(),
        "aggregated navigation paths"
    );

    PathAnalysisResult {
        paths,
        total_sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn session(id: &str) -> SessionRecord {
        SessionRecord::new(id, base())
    }

    fn view(session: &str, secs: i64, url: &str) -> CanonicalEvent {
        CanonicalEvent::new(base() + Duration::seconds(secs), session, EventType::PageView, url)
    }

    fn trail(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_identical_trails_are_counted() {
        let sessions = vec![session("s1"), session("s2"), session("s3")];
        let events = vec![
            view("s1", 0, "/home"),
            view("s1", 5, "/cart"),
            view("s2", 1, "/home"),
            view("s2", 9, "/cart"),
            view("s3", 2, "/home"),
        ];

        let result = aggregate_paths(&sessions, &events);

        assert_eq!(
            result,
            PathAnalysisResult {
                paths: vec![
                    PathCount { path: trail(&["/home", "/cart"]), count: 2 },
                    PathCount { path: trail(&["/home"]), count: 1 },
                ],
                total_sessions: 3,
            }
        );
        let counted: u64 = result.paths.iter().map(|p| p.count).sum();
        assert_eq!(counted, result.total_sessions);
    }

    #[test]
    fn test_sessions_without_page_views_excluded() {
        let sessions = vec![session("s1"), session("quiet")];
        let click = CanonicalEvent::new(base(), "quiet", EventType::MouseClick, "/home").at(1.0, 1.0);
        let events = vec![view("s1", 0, "/home"), click];

        let result = aggregate_paths(&sessions, &events);

        assert_eq!(result.total_sessions, 1);
        assert_eq!(result.paths.len(), 1);
    }

    #[test]
    fn test_trail_is_chronological() {
        let events = vec![view("s1", 10, "/b"), view("s1", 0, "/a"), view("s1", 20, "/a")];
        let result = aggregate_paths(&[session("s1")], &events);
        assert_eq!(result.paths[0].path, trail(&["/a", "/b", "/a"]));
    }

    #[test]
    fn test_ties_keep_encounter_order() {
        let sessions = vec![session("s1"), session("s2"), session("s3"), session("s4")];
        let events = vec![
            view("s1", 0, "/x"),
            view("s2", 0, "/y"),
            view("s3", 0, "/y"),
            view("s4", 0, "/z"),
        ];

        let result = aggregate_paths(&sessions, &events);
        let order: Vec<&str> = result.paths.iter().map(|p| p.path[0].as_str()).collect();
        assert_eq!(order, vec!["/y", "/x", "/z"]);
    }

    #[test]
    fn test_events_outside_population_ignored() {
        let events = vec![view("s1", 0, "/a"), view("stranger", 0, "/a")];
        let result = aggregate_paths(&[session("s1"), session("s1")], &events);
        assert_eq!(result.total_sessions, 1);
        assert_eq!(result.paths[0].count, 1);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(aggregate_paths(&[], &[]), PathAnalysisResult::default());
    }
}
