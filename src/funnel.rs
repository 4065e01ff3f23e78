//! Funnel conversion
//!
//! Evaluates an ordered chain of URL-matched steps over a session population.
//! A session continues past step *i* only if it visited step *i* and continued
//! through every earlier step; the order in which it visited them is not
//! checked.

use crate::schema::{EventType, SessionRecord};
use crate::types::{CanonicalEvent, FunnelAnalysisResult, FunnelStep, FunnelStepResult};
use std::collections::HashSet;
use tracing::debug;

/// Evaluate `steps` over `sessions` using their page-view `events`.
///
/// Steps are processed by ascending `step_order` (stable for equal orders).
/// Zero steps yields an empty result with zero rates.
pub fn evaluate_funnel(
    steps: &[FunnelStep],
    sessions: &[SessionRecord],
    events: &[CanonicalEvent],
) -> FunnelAnalysisResult {
    let population: HashSet<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    if steps.is_empty() {
        return FunnelAnalysisResult {
            total_sessions: population.len() as u64,
            ..Default::default()
        };
    }

    let mut ordered: Vec<&FunnelStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.step_order);

    let page_views: Vec<&CanonicalEvent> = events
        .iter()
        .filter(|e| e.event_type == EventType::PageView)
        .filter(|e| population.contains(e.session_id.as_str()))
        .collect();

    let mut results = Vec::with_capacity(ordered.len());
    let mut continuing: HashSet<&str> = HashSet::new();
    let mut visiting_counts = Vec::with_capacity(ordered.len());

    for (i, step) in ordered.iter().enumerate() {
        let visiting: HashSet<&str> = page_views
            .iter()
            .filter(|e| e.url.contains(step.url_pattern.as_str()))
            .map(|e| e.session_id.as_str())
            .collect();

        let conversion_rate = if i == 0 {
            continuing = visiting.clone();
            100.0
        } else {
            let survivors: HashSet<&str> = visiting.intersection(&continuing).copied().collect();
            let rate = percent(survivors.len(), continuing.len());
            continuing = survivors;
            rate
        };

        visiting_counts.push(visiting.len());
        results.push(FunnelStepResult {
            name: step.name.clone(),
            url_pattern: step.url_pattern.clone(),
            step_order: step.step_order,
            sessions_count: visiting.len() as u64,
            continuing_count: continuing.len() as u64,
            conversion_rate,
            drop_off_rate: round2(100.0 - conversion_rate),
        });
    }

    let first = visiting_counts.first().copied().unwrap_or(0);
    let last = visiting_counts.last().copied().unwrap_or(0);

    debug!(
        steps = results.len(),
        population = population.len(),
        completed = continuing.len(),
        "evaluated funnel"
    );

    FunnelAnalysisResult {
        steps: results,
        total_sessions: population.len() as u64,
        completion_rate: percent(last, first),
    }
}

/// `part / whole * 100` rounded to 2 decimals; 0 when `whole` is 0
fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
