//! Storage seams
//!
//! The aggregators never talk to a database. Events and sessions come from an
//! [`EventStore`], and analysis requests and their results live in an
//! [`AnalysisStore`]. [`MemoryStore`] implements both for tests, the CLI and
//! embedding.

use crate::config::{DEFAULT_RESOLUTION_HEIGHT, DEFAULT_RESOLUTION_WIDTH};
use crate::error::AnalyticsError;
use crate::normalizer::parse_timestamp;
use crate::schema::{EventType, RawEvent, SessionRecord};
use crate::types::{FunnelAnalysisResult, FunnelStep, HeatmapResult, PathAnalysisResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

// ============================================================================
// Queries
// ============================================================================

/// Filter over stored events. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub event_types: Option<Vec<EventType>>,
    pub session_id: Option<String>,
    pub url_contains: Option<String>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, event_type: EventType) -> Self {
        self.event_types.get_or_insert_with(Vec::new).push(event_type);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn url_contains(mut self, pattern: impl Into<String>) -> Self {
        self.url_contains = Some(pattern.into());
        self
    }

    pub fn window(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Whether `event` passes every set filter.
    ///
    /// Events whose timestamp can't be parsed pass the time bounds; the
    /// normalizer reports them.
    pub fn matches(&self, event: &RawEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !event.kind().is_some_and(|k| types.contains(&k)) {
                return false;
            }
        }
        if let Some(session_id) = &self.session_id {
            if event.session_key().as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }
        if let Some(pattern) = &self.url_contains {
            if !event.url_str().is_some_and(|u| u.contains(pattern.as_str())) {
                return false;
            }
        }
        match event.timestamp.as_ref().map(parse_timestamp) {
            Some(Ok(ts)) => {
                self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts <= to)
            }
            _ => true,
        }
    }
}

/// Filter over sessions by start time and state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionQuery {
    /// Inclusive lower bound on `start_time`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `start_time`
    pub to: Option<DateTime<Utc>>,
    pub active: Option<bool>,
}

impl SessionQuery {
    pub fn started_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        SessionQuery {
            from: Some(from),
            to: Some(to),
            active: None,
        }
    }

    pub fn matches(&self, session: &SessionRecord) -> bool {
        self.from.map_or(true, |from| session.start_time >= from)
            && self.to.map_or(true, |to| session.start_time <= to)
            && self.active.map_or(true, |active| session.is_active == active)
    }
}

// ============================================================================
// Analysis records
// ============================================================================

/// Which pointer events a heatmap counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapKind {
    Click,
    Move,
}

impl HeatmapKind {
    pub fn event_type(&self) -> EventType {
        match self {
            HeatmapKind::Click => EventType::MouseClick,
            HeatmapKind::Move => EventType::MouseMove,
        }
    }
}

/// A requested heatmap and, once processed, its grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapRecord {
    pub id: Uuid,
    pub name: String,
    /// Substring matched against event URLs
    pub url_pattern: String,
    pub kind: HeatmapKind,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub resolution_width: u32,
    pub resolution_height: u32,
    #[serde(default)]
    pub data: Option<HeatmapResult>,
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl HeatmapRecord {
    pub fn new(
        name: impl Into<String>,
        url_pattern: impl Into<String>,
        kind: HeatmapKind,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
    ) -> Self {
        HeatmapRecord {
            id: Uuid::new_v4(),
            name: name.into(),
            url_pattern: url_pattern.into(),
            kind,
            date_from,
            date_to,
            resolution_width: DEFAULT_RESOLUTION_WIDTH,
            resolution_height: DEFAULT_RESOLUTION_HEIGHT,
            data: None,
            is_processed: false,
            processed_at: None,
        }
    }
}

/// A requested navigation-path analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathAnalysisRecord {
    pub id: Uuid,
    pub name: String,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    #[serde(default)]
    pub data: Option<PathAnalysisResult>,
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl PathAnalysisRecord {
    pub fn new(name: impl Into<String>, date_from: DateTime<Utc>, date_to: DateTime<Utc>) -> Self {
        PathAnalysisRecord {
            id: Uuid::new_v4(),
            name: name.into(),
            date_from,
            date_to,
            data: None,
            is_processed: false,
            processed_at: None,
        }
    }
}

/// A named funnel definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Funnel {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<FunnelStep>,
}

impl Funnel {
    pub fn new(name: impl Into<String>, steps: Vec<FunnelStep>) -> Self {
        Funnel {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            steps,
        }
    }
}

/// A requested evaluation of one funnel over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelAnalysisRecord {
    pub id: Uuid,
    pub funnel_id: Uuid,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    #[serde(default)]
    pub data: Option<FunnelAnalysisResult>,
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl FunnelAnalysisRecord {
    pub fn new(funnel_id: Uuid, date_from: DateTime<Utc>, date_to: DateTime<Utc>) -> Self {
        FunnelAnalysisRecord {
            id: Uuid::new_v4(),
            funnel_id,
            date_from,
            date_to,
            data: None,
            is_processed: false,
            processed_at: None,
        }
    }
}

// ============================================================================
// Store traits
// ============================================================================

/// Read-only view over collected events and sessions
pub trait EventStore {
    /// Events matching `query`, in timestamp order
    fn events(&self, query: &EventQuery) -> Result<Vec<RawEvent>, AnalyticsError>;

    /// Sessions matching `query`
    fn sessions(&self, query: &SessionQuery) -> Result<Vec<SessionRecord>, AnalyticsError>;
}

/// Persistence for analysis requests and results
pub trait AnalysisStore {
    fn heatmap(&self, id: Uuid) -> Result<Option<HeatmapRecord>, AnalyticsError>;
    fn save_heatmap(&mut self, record: HeatmapRecord) -> Result<(), AnalyticsError>;

    fn path_analysis(&self, id: Uuid) -> Result<Option<PathAnalysisRecord>, AnalyticsError>;
    fn save_path_analysis(&mut self, record: PathAnalysisRecord) -> Result<(), AnalyticsError>;

    fn funnel(&self, id: Uuid) -> Result<Option<Funnel>, AnalyticsError>;
    fn funnels(&self) -> Result<Vec<Funnel>, AnalyticsError>;
    fn save_funnel(&mut self, funnel: Funnel) -> Result<(), AnalyticsError>;

    fn funnel_analysis(&self, id: Uuid) -> Result<Option<FunnelAnalysisRecord>, AnalyticsError>;
    fn save_funnel_analysis(&mut self, record: FunnelAnalysisRecord) -> Result<(), AnalyticsError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Both stores held in memory, with a JSON snapshot format
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    events: Vec<RawEvent>,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
    #[serde(default)]
    heatmaps: BTreeMap<Uuid, HeatmapRecord>,
    #[serde(default)]
    path_analyses: BTreeMap<Uuid, PathAnalysisRecord>,
    #[serde(default)]
    funnels: BTreeMap<Uuid, Funnel>,
    #[serde(default)]
    funnel_analyses: BTreeMap<Uuid, FunnelAnalysisRecord>,
    #[serde(skip)]
    event_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `events`, deriving sessions from them
    pub fn with_events(events: Vec<RawEvent>) -> Self {
        let sessions = derive_sessions(&events);
        MemoryStore {
            events,
            sessions,
            ..Default::default()
        }
    }

    pub fn add_events(&mut self, events: impl IntoIterator<Item = RawEvent>) {
        self.events.extend(events);
    }

    pub fn add_session(&mut self, session: SessionRecord) {
        self.sessions.push(session);
    }

    pub fn set_sessions(&mut self, sessions: Vec<SessionRecord>) {
        self.sessions = sessions;
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of `events()` calls served so far
    pub fn event_queries(&self) -> usize {
        self.event_queries.load(Ordering::Relaxed)
    }

    /// Load store from JSON snapshot
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize store to JSON snapshot
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl EventStore for MemoryStore {
    fn events(&self, query: &EventQuery) -> Result<Vec<RawEvent>, AnalyticsError> {
        self.event_queries.fetch_add(1, Ordering::Relaxed);

        let mut matched: Vec<(Option<DateTime<Utc>>, &RawEvent)> = self
            .events
            .iter()
            .filter(|e| query.matches(e))
            .map(|e| (e.timestamp.as_ref().and_then(|t| parse_timestamp(t).ok()), e))
            .collect();
        // Unparseable timestamps first; the normalizer drops them anyway
        matched.sort_by_key(|(ts, _)| *ts);

        Ok(matched.into_iter().map(|(_, e)| e.clone()).collect())
    }

    fn sessions(&self, query: &SessionQuery) -> Result<Vec<SessionRecord>, AnalyticsError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| query.matches(s))
            .cloned()
            .collect())
    }
}

impl AnalysisStore for MemoryStore {
    fn heatmap(&self, id: Uuid) -> Result<Option<HeatmapRecord>, AnalyticsError> {
        Ok(self.heatmaps.get(&id).cloned())
    }

    fn save_heatmap(&mut self, record: HeatmapRecord) -> Result<(), AnalyticsError> {
        self.heatmaps.insert(record.id, record);
        Ok(())
    }

    fn path_analysis(&self, id: Uuid) -> Result<Option<PathAnalysisRecord>, AnalyticsError> {
        Ok(self.path_analyses.get(&id).cloned())
    }

    fn save_path_analysis(&mut self, record: PathAnalysisRecord) -> Result<(), AnalyticsError> {
        self.path_analyses.insert(record.id, record);
        Ok(())
    }

    fn funnel(&self, id: Uuid) -> Result<Option<Funnel>, AnalyticsError> {
        Ok(self.funnels.get(&id).cloned())
    }

    fn funnels(&self) -> Result<Vec<Funnel>, AnalyticsError> {
        Ok(self.funnels.values().cloned().collect())
    }

    fn save_funnel(&mut self, funnel: Funnel) -> Result<(), AnalyticsError> {
        self.funnels.insert(funnel.id, funnel);
        Ok(())
    }

    fn funnel_analysis(&self, id: Uuid) -> Result<Option<FunnelAnalysisRecord>, AnalyticsError> {
        Ok(self.funnel_analyses.get(&id).cloned())
    }

    fn save_funnel_analysis(&mut self, record: FunnelAnalysisRecord) -> Result<(), AnalyticsError> {
        self.funnel_analyses.insert(record.id, record);
        Ok(())
    }
}

/// One session per distinct session id, starting at its earliest parseable
/// event and ending at its latest. Sessions are ordered by first appearance.
pub fn derive_sessions(events: &[RawEvent]) -> Vec<SessionRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut spans: HashMap<String, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();

    for event in events {
        let (Some(id), Some(Ok(ts))) = (
            event.session_key(),
            event.timestamp.as_ref().map(parse_timestamp),
        ) else {
            continue;
        };
        match spans.get_mut(&id) {
            Some((start, end)) => {
                *start = (*start).min(ts);
                *end = (*end).max(ts);
            }
            None => {
                order.push(id.clone());
                spans.insert(id, (ts, ts));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            let (start, end) = spans.get(&id).copied()?;
            Some(SessionRecord {
                session_id: id,
                start_time: start,
                end_time: Some(end),
                is_active: false,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn event(kind: EventType, secs: i64, session: &str, url: &str) -> RawEvent {
        let ts = (base() + Duration::seconds(secs)).timestamp_millis();
        RawEvent::new(kind, ts, session, url)
    }

    fn sample_store() -> MemoryStore {
        MemoryStore::with_events(vec![
            event(EventType::PageView, 30, "a", "https://shop.example/cart"),
            event(EventType::MouseClick, 10, "a", "https://shop.example/home").with_position(1.0, 2.0),
            event(EventType::PageView, 0, "b", "https://shop.example/home"),
            event(EventType::PageView, 7200, "b", "https://shop.example/home"),
        ])
    }

    #[test]
    fn test_event_query_filters_and_orders() {
        let store = sample_store();

        let all = store.events(&EventQuery::new()).unwrap();
        let sessions: Vec<String> = all.iter().filter_map(|e| e.session_key()).collect();
        assert_eq!(sessions, vec!["b", "a", "a", "b"]);

        let views = store
            .events(&EventQuery::new().of_type(EventType::PageView).url_contains("/home"))
            .unwrap();
        assert_eq!(views.len(), 2);

        let windowed = store
            .events(&EventQuery::new().window(base(), base() + Duration::seconds(30)))
            .unwrap();
        assert_eq!(windowed.len(), 3);

        let only_a = store.events(&EventQuery::new().session("a")).unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(store.event_queries(), 4);
    }

    #[test]
    fn test_unparseable_timestamp_passes_window() {
        let mut store = MemoryStore::new();
        store.add_events(vec![RawEvent {
            event_type: Some("page_view".into()),
            timestamp: Some("garbage".into()),
            session_id: Some("x".into()),
            ..Default::default()
        }]);

        let query = EventQuery::new().window(base(), base());
        assert_eq!(store.events(&query).unwrap().len(), 1);
    }

    #[test]
    fn test_derived_sessions() {
        let store = sample_store();
        let sessions = store.sessions(&SessionQuery::default()).unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "a");
        assert_eq!(sessions[0].start_time, base() + Duration::seconds(10));
        assert_eq!(sessions[0].end_time, Some(base() + Duration::seconds(30)));
        assert_eq!(sessions[1].start_time, base());
    }

    #[test]
    fn test_session_query_window_and_state() {
        let mut store = sample_store();
        let mut live = SessionRecord::new("c", base() + Duration::hours(3));
        live.is_active = true;
        store.add_session(live);

        let early = store
            .sessions(&SessionQuery::started_between(base(), base() + Duration::seconds(5)))
            .unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].session_id, "b");

        let active = store
            .sessions(&SessionQuery {
                active: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "c");
    }

    #[test]
    fn test_analysis_records_round_trip_through_snapshot() {
        let mut store = sample_store();
        let heatmap = HeatmapRecord::new(
            "Home clicks",
            "/home",
            HeatmapKind::Click,
            base(),
            base() + Duration::days(1),
        );
        let funnel = Funnel::new("Checkout", vec![FunnelStep::new("Cart", "/cart", 0)]);
        let analysis = FunnelAnalysisRecord::new(funnel.id, base(), base() + Duration::days(1));
        let (heatmap_id, funnel_id, analysis_id) = (heatmap.id, funnel.id, analysis.id);
        store.save_heatmap(heatmap).unwrap();
        store.save_funnel(funnel).unwrap();
        store.save_funnel_analysis(analysis).unwrap();

        let restored = MemoryStore::from_json(&store.to_json().unwrap()).unwrap();

        assert_eq!(restored.event_count(), 4);
        assert_eq!(restored.session_count(), 2);
        assert_eq!(restored.event_queries(), 0);
        let heatmap = restored.heatmap(heatmap_id).unwrap().unwrap();
        assert_eq!(heatmap.kind, HeatmapKind::Click);
        assert_eq!(heatmap.resolution_width, 1920);
        assert!(!heatmap.is_processed);
        assert_eq!(restored.funnel(funnel_id).unwrap().unwrap().steps.len(), 1);
        assert_eq!(restored.funnels().unwrap().len(), 1);
        assert!(restored.funnel_analysis(analysis_id).unwrap().is_some());
        assert!(restored.path_analysis(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_heatmap_kind_maps_to_event_type() {
        assert_eq!(HeatmapKind::Click.event_type(), EventType::MouseClick);
        assert_eq!(HeatmapKind::Move.event_type(), EventType::MouseMove);
    }
}
