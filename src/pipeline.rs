//! Pipeline orchestration
//!
//! This module provides the job-level API for tracklens. Each job loads an
//! analysis record, pulls the matching window of events from the store, runs
//! the stages (normalize, aggregate) and writes the result back.
//!
//! Jobs are idempotent per record id: a record already marked processed is
//! returned untouched without reading any events, so redundant invocations
//! from a scheduler are cheap and never double-count.

use crate::config::AnalyticsConfig;
use crate::error::AnalyticsError;
use crate::funnel::evaluate_funnel;
use crate::kinematics::{cursor_patterns, mouse_metrics};
use crate::normalizer::{EventNormalizer, EventScope, NormalizedBatch};
use crate::paths::aggregate_paths;
use crate::schema::EventType;
use crate::spatial::{cursor_heatmap, grid_heatmap};
use crate::store::{
    AnalysisStore, EventQuery, EventStore, FunnelAnalysisRecord, HeatmapKind, HeatmapRecord,
    PathAnalysisRecord, SessionQuery,
};
use crate::types::{Resolution, SessionMouseAnalytics};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a job invocation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Result computed and stored
    Processed,
    /// Record was already processed; nothing was read or written
    AlreadyProcessed,
    /// No record with the requested id
    NotFound,
    /// Processing failed; the record stays unprocessed
    Failed { reason: String },
}

impl JobOutcome {
    fn failed(job: &str, id: Uuid, err: AnalyticsError) -> Self {
        warn!(job, job_id = %id, error = %err, "analysis job failed");
        JobOutcome::Failed {
            reason: err.to_string(),
        }
    }
}

/// A page URL and how many times it was viewed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularUrl {
    pub url: String,
    pub views: u64,
}

/// Records created for one day of automatic analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPlan {
    pub day: NaiveDate,
    /// Click and move heatmaps for each popular URL
    pub heatmaps: Vec<Uuid>,
    pub path_analysis: Uuid,
    /// One per stored funnel
    pub funnel_analyses: Vec<Uuid>,
}

/// Runs analysis jobs against a store.
pub struct AnalyticsProcessor {
    config: AnalyticsConfig,
}

impl Default for AnalyticsProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticsProcessor {
    /// Create a processor with default settings
    pub fn new() -> Self {
        Self::with_config(AnalyticsConfig::default())
    }

    pub fn with_config(config: AnalyticsConfig) -> Self {
        AnalyticsProcessor { config }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Compute the grid heatmap for a stored heatmap record
    pub fn run_heatmap_job<S>(&self, store: &mut S, id: Uuid) -> JobOutcome
    where
        S: EventStore + AnalysisStore,
    {
        self.try_heatmap_job(store, id)
            .unwrap_or_else(|e| JobOutcome::failed("heatmap", id, e))
    }

    fn try_heatmap_job<S>(&self, store: &mut S, id: Uuid) -> Result<JobOutcome, AnalyticsError>
    where
        S: EventStore + AnalysisStore,
    {
        let Some(mut record) = store.heatmap(id)? else {
            return Ok(JobOutcome::NotFound);
        };
        if record.is_processed {
            debug!(job_id = %id, "heatmap already processed");
            return Ok(JobOutcome::AlreadyProcessed);
        }
        check_window(record.date_from, record.date_to)?;

        let query = EventQuery::new()
            .of_type(record.kind.event_type())
            .url_contains(record.url_pattern.as_str())
            .window(record.date_from, record.date_to);
        let batch = self.load(
            &*store,
            &query,
            EventScope::SpatialOnly,
            record.date_from,
            record.date_to,
        )?;

        let resolution = Resolution {
            width: record.resolution_width,
            height: record.resolution_height,
        };
        let result = grid_heatmap(&batch.spatial_points(), resolution, self.config.grid_size);

        info!(
            job_id = %id,
            kind = ?record.kind,
            events = batch.len(),
            binned = result.total_events,
            max_value = result.max_value,
            "heatmap processed"
        );

        record.data = Some(result);
        record.is_processed = true;
        record.processed_at = Some(Utc::now());
        store.save_heatmap(record)?;
        Ok(JobOutcome::Processed)
    }

    /// Compute navigation path frequencies for a stored path-analysis record
    pub fn run_path_job<S>(&self, store: &mut S, id: Uuid) -> JobOutcome
    where
        S: EventStore + AnalysisStore,
    {
        self.try_path_job(store, id)
            .unwrap_or_else(|e| JobOutcome::failed("path_analysis", id, e))
    }

    fn try_path_job<S>(&self, store: &mut S, id: Uuid) -> Result<JobOutcome, AnalyticsError>
    where
        S: EventStore + AnalysisStore,
    {
        let Some(mut record) = store.path_analysis(id)? else {
            return Ok(JobOutcome::NotFound);
        };
        if record.is_processed {
            debug!(job_id = %id, "path analysis already processed");
            return Ok(JobOutcome::AlreadyProcessed);
        }
        check_window(record.date_from, record.date_to)?;

        let population = SessionQuery::started_between(record.date_from, record.date_to);
        let sessions = store.sessions(&population)?;
        let query = EventQuery::new()
            .of_type(EventType::PageView)
            .window(record.date_from, record.date_to);
        let batch = self.load(
            &*store,
            &query,
            EventScope::All,
            record.date_from,
            record.date_to,
        )?;

        let result = aggregate_paths(&sessions, &batch.events);

        info!(
            job_id = %id,
            sessions = result.total_sessions,
            distinct_paths = result.paths.len(),
            "path analysis processed"
        );

        record.data = Some(result);
        record.is_processed = true;
        record.processed_at = Some(Utc::now());
        store.save_path_analysis(record)?;
        Ok(JobOutcome::Processed)
    }

    /// Evaluate the funnel referenced by a stored funnel-analysis record
    pub fn run_funnel_job<S>(&self, store: &mut S, id: Uuid) -> JobOutcome
    where
        S: EventStore + AnalysisStore,
    {
        self.try_funnel_job(store, id)
            .unwrap_or_else(|e| JobOutcome::failed("funnel_analysis", id, e))
    }

    fn try_funnel_job<S>(&self, store: &mut S, id: Uuid) -> Result<JobOutcome, AnalyticsError>
    where
        S: EventStore + AnalysisStore,
    {
        let Some(mut record) = store.funnel_analysis(id)? else {
            return Ok(JobOutcome::NotFound);
        };
        if record.is_processed {
            debug!(job_id = %id, "funnel analysis already processed");
            return Ok(JobOutcome::AlreadyProcessed);
        }
        check_window(record.date_from, record.date_to)?;

        let funnel = store
            .funnel(record.funnel_id)?
            .ok_or_else(|| AnalyticsError::UnknownFunnel(record.funnel_id.to_string()))?;

        let population = SessionQuery::started_between(record.date_from, record.date_to);
        let sessions = store.sessions(&population)?;
        let events = if funnel.steps.is_empty() {
            Vec::new()
        } else {
            let query = EventQuery::new()
                .of_type(EventType::PageView)
                .window(record.date_from, record.date_to);
            self.load(&*store, &query, EventScope::All, record.date_from, record.date_to)?
                .events
        };

        let result = evaluate_funnel(&funnel.steps, &sessions, &events);

        info!(
            job_id = %id,
            funnel = %funnel.name,
            steps = result.steps.len(),
            sessions = result.total_sessions,
            completion_rate = result.completion_rate,
            "funnel analysis processed"
        );

        record.data = Some(result);
        record.is_processed = true;
        record.processed_at = Some(Utc::now());
        store.save_funnel_analysis(record)?;
        Ok(JobOutcome::Processed)
    }

    /// Mouse metrics, cursor path patterns and smoothed heatmap for one session
    pub fn session_mouse_analytics<S>(
        &self,
        store: &S,
        session_id: &str,
    ) -> Result<SessionMouseAnalytics, AnalyticsError>
    where
        S: EventStore,
    {
        let query = EventQuery::new()
            .of_type(EventType::MouseMove)
            .of_type(EventType::MouseClick)
            .session(session_id);
        let raw = store.events(&query)?;
        let batch = EventNormalizer::normalize(&raw, EventScope::SpatialOnly);

        debug!(session_id, samples = batch.len(), "computing session mouse analytics");

        Ok(SessionMouseAnalytics {
            session_id: session_id.to_string(),
            metrics: mouse_metrics(&batch.events, &self.config),
            patterns: cursor_patterns(&batch.events, &self.config),
            heatmap: cursor_heatmap(&batch.spatial_points(), &self.config),
        })
    }

    /// Most viewed page URLs in a window, most views first
    pub fn popular_urls<S>(
        &self,
        store: &S,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PopularUrl>, AnalyticsError>
    where
        S: EventStore,
    {
        check_window(from, to)?;
        let query = EventQuery::new().of_type(EventType::PageView).window(from, to);
        let batch = self.load(&*store, &query, EventScope::All, from, to)?;

        let mut urls: Vec<PopularUrl> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for event in &batch.events {
            match index.get(event.url.as_str()) {
                Some(&i) => urls[i].views += 1,
                None => {
                    index.insert(event.url.as_str(), urls.len());
                    urls.push(PopularUrl {
                        url: event.url.clone(),
                        views: 1,
                    });
                }
            }
        }
        urls.sort_by(|a, b| b.views.cmp(&a.views));
        urls.truncate(limit);
        Ok(urls)
    }

    /// Create the analysis records for one calendar day (UTC).
    ///
    /// Click and move heatmaps for the day's most viewed URLs, one path
    /// analysis, and one analysis per stored funnel. The records are created
    /// unprocessed; running them is up to the caller.
    pub fn plan_daily_analytics<S>(&self, store: &mut S, day: NaiveDate) -> Result<DailyPlan, AnalyticsError>
    where
        S: EventStore + AnalysisStore,
    {
        let date_from = day.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).ok_or_else(|| {
            AnalyticsError::InvalidWindow(format!("cannot start a window on {}", day))
        })?;
        let date_to = date_from + Duration::days(1) - Duration::microseconds(1);

        let mut heatmaps = Vec::new();
        let popular_urls =
            self.popular_urls(&*store, date_from, date_to, self.config.popular_url_limit)?;
        for popular in popular_urls {
            for (kind, label) in [(HeatmapKind::Click, "Click"), (HeatmapKind::Move, "Movement")] {
                let record = HeatmapRecord::new(
                    format!("Daily {} Heatmap - {} - {}", label, popular.url, day),
                    popular.url.as_str(),
                    kind,
                    date_from,
                    date_to,
                );
                heatmaps.push(record.id);
                store.save_heatmap(record)?;
            }
        }

        let paths = PathAnalysisRecord::new(format!("Daily Path Analysis - {}", day), date_from, date_to);
        let path_analysis = paths.id;
        store.save_path_analysis(paths)?;

        let mut funnel_analyses = Vec::new();
        for funnel in store.funnels()? {
            let record = FunnelAnalysisRecord::new(funnel.id, date_from, date_to);
            funnel_analyses.push(record.id);
            store.save_funnel_analysis(record)?;
        }

        info!(
            %day,
            heatmaps = heatmaps.len(),
            funnel_analyses = funnel_analyses.len(),
            "daily analytics planned"
        );

        Ok(DailyPlan {
            day,
            heatmaps,
            path_analysis,
            funnel_analyses,
        })
    }

    /// Run every job in a plan, returning each record's outcome
    pub fn run_daily_plan<S>(&self, store: &mut S, plan: &DailyPlan) -> Vec<(Uuid, JobOutcome)>
    where
        S: EventStore + AnalysisStore,
    {
        let mut outcomes = Vec::new();
        for &id in &plan.heatmaps {
            outcomes.push((id, self.run_heatmap_job(store, id)));
        }
        outcomes.push((plan.path_analysis, self.run_path_job(store, plan.path_analysis)));
        for &id in &plan.funnel_analyses {
            outcomes.push((id, self.run_funnel_job(store, id)));
        }
        outcomes
    }

    /// Query, normalize, and re-apply the window the store may not have
    /// enforced for unparseable timestamps
    fn load<S: EventStore + ?Sized>(
        &self,
        store: &S,
        query: &EventQuery,
        scope: EventScope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<NormalizedBatch, AnalyticsError> {
        let raw = store.events(query)?;
        let mut batch = EventNormalizer::normalize(&raw, scope);
        batch.retain_window(from, to);
        Ok(batch)
    }
}

fn check_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), AnalyticsError> {
    if from > to {
        return Err(AnalyticsError::InvalidWindow(format!(
            "window start {} is after end {}",
            from.to_rfc3339(),
            to.to_rfc3339()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawEvent, SessionRecord};
    use crate::store::{Funnel, MemoryStore};
    use crate::types::{CursorHeatmapResult, FunnelStep};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn at(secs: i64) -> i64 {
        (base() + Duration::seconds(secs)).timestamp_millis()
    }

    fn page_view(session: &str, secs: i64, url: &str) -> RawEvent {
        RawEvent::new(EventType::PageView, at(secs), session, url)
    }

    fn pointer(kind: EventType, session: &str, secs: i64, x: f64, y: f64) -> RawEvent {
        RawEvent::new(kind, at(secs), session, "https://shop.example/home").with_position(x, y)
    }

    fn shop_store() -> MemoryStore {
        MemoryStore::with_events(vec![
            page_view("a", 0, "https://shop.example/home"),
            pointer(EventType::MouseClick, "a", 1, 0.0, 0.0),
            pointer(EventType::MouseClick, "a", 2, 10.0, 0.0),
            pointer(EventType::MouseMove, "a", 3, 500.0, 500.0),
            page_view("a", 4, "https://shop.example/cart"),
            page_view("b", 10, "https://shop.example/home"),
            pointer(EventType::MouseClick, "b", 11, 10.0, 10.0),
            pointer(EventType::MouseClick, "b", 12, 5000.0, 10.0),
            page_view("b", 13, "https://shop.example/cart"),
            page_view("c", 20, "https://shop.example/home"),
            // Next day
            page_view("d", 86_400, "https://shop.example/home"),
        ])
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (base(), base() + Duration::hours(1))
    }

    #[test]
    fn test_heatmap_job_and_idempotence() {
        let mut store = shop_store();
        let (from, to) = window();
        let record = HeatmapRecord::new("Home clicks", "/home", HeatmapKind::Click, from, to);
        let id = record.id;
        store.save_heatmap(record).unwrap();
        let processor = AnalyticsProcessor::new();

        assert_eq!(processor.run_heatmap_job(&mut store, id), JobOutcome::Processed);

        let stored = store.heatmap(id).unwrap().unwrap();
        assert!(stored.is_processed);
        assert!(stored.processed_at.is_some());
        let data = stored.data.unwrap();
        // (5000, 10) is off-screen at 1920x1080
        assert_eq!(data.total_events, 3);
        assert_eq!(data.grid[0][0], 1);
        assert_eq!(data.grid[0][1], 1);
        assert_eq!(data.grid[1][1], 1);

        let queries = store.event_queries();
        assert_eq!(processor.run_heatmap_job(&mut store, id), JobOutcome::AlreadyProcessed);
        assert_eq!(store.event_queries(), queries);
    }

    #[test]
    fn test_missing_records_are_not_found() {
        let mut store = shop_store();
        let processor = AnalyticsProcessor::new();
        let id = Uuid::new_v4();

        assert_eq!(processor.run_heatmap_job(&mut store, id), JobOutcome::NotFound);
        assert_eq!(processor.run_path_job(&mut store, id), JobOutcome::NotFound);
        assert_eq!(processor.run_funnel_job(&mut store, id), JobOutcome::NotFound);
    }

    #[test]
    fn test_inverted_window_fails_and_stays_unprocessed() {
        let mut store = shop_store();
        let (from, to) = window();
        let record = PathAnalysisRecord::new("backwards", to, from);
        let id = record.id;
        store.save_path_analysis(record).unwrap();

        let outcome = AnalyticsProcessor::new().run_path_job(&mut store, id);

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        assert!(!store.path_analysis(id).unwrap().unwrap().is_processed);
        assert_eq!(store.event_queries(), 0);
    }

    #[test]
    fn test_path_job() {
        let mut store = shop_store();
        let (from, to) = window();
        let record = PathAnalysisRecord::new("Morning", from, to);
        let id = record.id;
        store.save_path_analysis(record).unwrap();

        assert_eq!(AnalyticsProcessor::new().run_path_job(&mut store, id), JobOutcome::Processed);

        let data = store.path_analysis(id).unwrap().unwrap().data.unwrap();
        assert_eq!(data.total_sessions, 3);
        assert_eq!(data.paths[0].count, 2);
        assert_eq!(
            data.paths[0].path,
            vec!["https://shop.example/home", "https://shop.example/cart"]
        );
        assert_eq!(data.paths[1].count, 1);
    }

    #[test]
    fn test_funnel_job() {
        let mut store = shop_store();
        let funnel = Funnel::new(
            "Checkout",
            vec![FunnelStep::new("Home", "/home", 0), FunnelStep::new("Cart", "/cart", 1)],
        );
        let (from, to) = window();
        let record = FunnelAnalysisRecord::new(funnel.id, from, to);
        let id = record.id;
        store.save_funnel(funnel).unwrap();
        store.save_funnel_analysis(record).unwrap();

        let processor = AnalyticsProcessor::new();
        assert_eq!(processor.run_funnel_job(&mut store, id), JobOutcome::Processed);

        let data = store.funnel_analysis(id).unwrap().unwrap().data.unwrap();
        assert_eq!(data.total_sessions, 3);
        assert_eq!(data.steps[0].sessions_count, 3);
        assert_eq!(data.steps[1].conversion_rate, 66.67);
        assert_eq!(data.completion_rate, 66.67);
        assert_eq!(processor.run_funnel_job(&mut store, id), JobOutcome::AlreadyProcessed);
    }

    #[test]
    fn test_funnel_job_unknown_funnel_fails() {
        let mut store = shop_store();
        let (from, to) = window();
        let record = FunnelAnalysisRecord::new(Uuid::new_v4(), from, to);
        let id = record.id;
        store.save_funnel_analysis(record).unwrap();

        let outcome = AnalyticsProcessor::new().run_funnel_job(&mut store, id);
        assert!(matches!(outcome, JobOutcome::Failed { ref reason } if reason.contains("Unknown funnel")));
    }

    #[test]
    fn test_funnel_job_without_steps_is_processed_empty() {
        let mut store = shop_store();
        let funnel = Funnel::new("Empty", vec![]);
        let (from, to) = window();
        let record = FunnelAnalysisRecord::new(funnel.id, from, to);
        let id = record.id;
        store.save_funnel(funnel).unwrap();
        store.save_funnel_analysis(record).unwrap();

        assert_eq!(AnalyticsProcessor::new().run_funnel_job(&mut store, id), JobOutcome::Processed);
        let data = store.funnel_analysis(id).unwrap().unwrap().data.unwrap();
        assert!(data.steps.is_empty());
        assert_eq!(data.completion_rate, 0.0);
    }

    #[test]
    fn test_session_mouse_analytics() {
        let mut events: Vec<RawEvent> = (0..12)
            .map(|i| pointer(EventType::MouseMove, "s", i, i as f64 * 20.0, 100.0))
            .collect();
        events.push(pointer(EventType::MouseClick, "s", 12, 220.0, 100.0));
        events.push(pointer(EventType::MouseMove, "other", 0, 1.0, 1.0));
        let store = MemoryStore::with_events(events);

        let analytics = AnalyticsProcessor::new().session_mouse_analytics(&store, "s").unwrap();

        assert_eq!(analytics.session_id, "s");
        assert_eq!(analytics.metrics.total_events, 13);
        assert_eq!(analytics.metrics.click_events, 1);
        assert_eq!(analytics.metrics.avg_speed, Some(20.0));
        assert!(!analytics.patterns.is_insufficient());
        assert!(matches!(analytics.heatmap, CursorHeatmapResult::Ready(_)));
    }

    #[test]
    fn test_session_mouse_analytics_without_data() {
        let store = MemoryStore::new();
        let analytics = AnalyticsProcessor::new().session_mouse_analytics(&store, "ghost").unwrap();

        assert_eq!(analytics.metrics.total_events, 0);
        assert!(analytics.patterns.is_insufficient());
        assert_eq!(analytics.heatmap.error(), Some("No cursor position data available"));
    }

    #[test]
    fn test_popular_urls() {
        let store = shop_store();
        let (from, to) = window();
        let urls = AnalyticsProcessor::new().popular_urls(&store, from, to, 5).unwrap();

        assert_eq!(
            urls,
            vec![
                PopularUrl { url: "https://shop.example/home".into(), views: 3 },
                PopularUrl { url: "https://shop.example/cart".into(), views: 2 },
            ]
        );
    }

    #[test]
    fn test_plan_and_run_daily_analytics() {
        let mut store = shop_store();
        store.add_session(SessionRecord::new("late", base() + Duration::hours(30)));
        let funnel = Funnel::new("Checkout", vec![FunnelStep::new("Cart", "/cart", 0)]);
        store.save_funnel(funnel).unwrap();
        let processor = AnalyticsProcessor::new();

        let plan = processor
            .plan_daily_analytics(&mut store, base().date_naive())
            .unwrap();

        // home and cart, click + move each
        assert_eq!(plan.heatmaps.len(), 4);
        assert_eq!(plan.funnel_analyses.len(), 1);
        let first = store.heatmap(plan.heatmaps[0]).unwrap().unwrap();
        assert_eq!(first.name, "Daily Click Heatmap - https://shop.example/home - 2024-01-15");
        assert!(!first.is_processed);

        let outcomes = processor.run_daily_plan(&mut store, &plan);
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|(_, o)| *o == JobOutcome::Processed));

        let paths = store.path_analysis(plan.path_analysis).unwrap().unwrap();
        assert_eq!(paths.data.unwrap().total_sessions, 3);
    }

    #[test]
    fn test_job_outcome_serialization() {
        let json = serde_json::to_value(JobOutcome::Failed {
            reason: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "reason": "boom"}));
    }
}
