//! Observability (§4.6): aggregate stats, growth reports, stale-fact scans,
//! and attribute conflict detection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::model::{Alert, Fact, FactType};
use crate::store::Store;

pub use crate::store::{FreshnessDistribution, StoreStats};

/// Options accepted by `Observer::stale_facts` (§4.6).
#[derive(Debug, Clone)]
pub struct StaleOpts {
    pub max_confidence: f64,
    pub max_days: i64,
    pub limit: u32,
    pub include_superseded: bool,
}

impl Default for StaleOpts {
    fn default() -> Self {
        Self {
            max_confidence: 0.5,
            max_days: 30,
            limit: 50,
            include_superseded: false,
        }
    }
}

/// Options accepted by `Observer::growth_report` (§4.6).
#[derive(Debug, Clone)]
pub struct GrowthReportOpts {
    pub top_sources_cap: u32,
}

impl Default for GrowthReportOpts {
    fn default() -> Self {
        Self { top_sources_cap: 10 }
    }
}

/// Recommended follow-up action from a growth report (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    NoOp,
    MaintenancePass,
}

const MAINTENANCE_MEMORIES_24H: i64 = 500;
const MAINTENANCE_FACTS_24H: i64 = 200_000;

/// One growth window's composition breakdown (§4.6).
#[derive(Debug, Clone, Default)]
pub struct GrowthWindow {
    pub memories: i64,
    pub facts: i64,
    pub by_source_type: HashMap<&'static str, i64>,
    pub top_sources: Vec<(String, i64)>,
    pub plugin_capture: i64,
    pub manual_import: i64,
    pub facts_by_type: Vec<(FactType, i64)>,
}

/// Growth report across the 24h and 7d windows (§4.6).
#[derive(Debug, Clone)]
pub struct GrowthReport {
    pub window_24h: GrowthWindow,
    pub window_7d: GrowthWindow,
    pub recommendation: Recommendation,
    pub guidance: String,
}

/// An attribute conflict surfaced by `Observer::attribute_conflicts` (§4.6).
#[derive(Debug, Clone)]
pub struct Conflict {
    pub fact1: Fact,
    pub fact2: Fact,
    pub conflict_type: &'static str,
    pub similarity: f64,
    pub cross_agent: bool,
}

fn source_type_of(source_file: Option<&str>) -> &'static str {
    let Some(path) = source_file else { return "unknown" };
    match std::path::Path::new(path).extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("md") | Some("markdown") => "markdown",
        Some("json") => "json",
        Some("yaml") | Some("yml") => "yaml",
        Some("txt") => "text",
        Some(_) => "other",
        None => "unknown",
    }
}

fn is_plugin_capture(source_file: Option<&str>) -> bool {
    source_file.map(|p| glob_match_capture(p)).unwrap_or(false)
}

/// Matches `*/cortex-capture-*` (§4.6) without pulling in a glob crate for
/// one fixed pattern.
fn glob_match_capture(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with("cortex-capture-"))
}

/// Read-only aggregation layer over a `Store` (§4.6).
pub struct Observer {
    store: Arc<Store>,
}

impl Observer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }

    pub fn freshness_distribution(&self, now: DateTime<Utc>) -> Result<FreshnessDistribution> {
        Ok(self.store.get_freshness_distribution(now)?)
    }

    pub fn confidence_distribution(&self) -> Result<[i64; 10]> {
        Ok(self.store.get_confidence_distribution()?)
    }

    pub fn alerts(&self, include_acknowledged: bool) -> Result<Vec<Alert>> {
        Ok(self.store.list_alerts(include_acknowledged)?)
    }

    /// Stale facts: `days_since_last_reinforced >= max_days` AND
    /// `effective_confidence < max_confidence`, ascending by effective
    /// confidence (§4.6).
    pub fn stale_facts(&self, opts: &StaleOpts, now: DateTime<Utc>) -> Result<Vec<Fact>> {
        let cutoff = now - Duration::days(opts.max_days);
        let candidates = self
            .store
            .candidate_stale_facts(cutoff, opts.include_superseded, opts.limit)?;
        let mut stale: Vec<Fact> = candidates
            .into_iter()
            .filter(|f| {
                let days = (now - f.last_reinforced).num_days();
                days >= opts.max_days && f.effective_confidence_at(now) < opts.max_confidence
            })
            .collect();
        stale.sort_by(|a, b| {
            a.effective_confidence_at(now)
                .partial_cmp(&b.effective_confidence_at(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        stale.truncate(opts.limit as usize);
        Ok(stale)
    }

    /// Attribute conflicts (§4.6, §8 invariant 9): same subject+predicate,
    /// different object, both non-superseded unless requested otherwise.
    pub fn attribute_conflicts(&self, limit: u32, include_superseded: bool) -> Result<Vec<Conflict>> {
        let pairs = self.store.attribute_conflicts(limit, include_superseded)?;
        Ok(pairs
            .into_iter()
            .map(|p| {
                let exact_subject_predicate = p.fact1.subject.eq_ignore_ascii_case(&p.fact2.subject)
                    && p.fact1.predicate.eq_ignore_ascii_case(&p.fact2.predicate);
                let cross_agent = p.fact1.agent.as_deref().unwrap_or("") != p.fact2.agent.as_deref().unwrap_or("");
                Conflict {
                    conflict_type: "attribute",
                    similarity: if exact_subject_predicate { 1.0 } else { 0.0 },
                    cross_agent,
                    fact1: p.fact1,
                    fact2: p.fact2,
                }
            })
            .collect())
    }

    /// Growth report across the 24h and 7d windows (§4.6).
    pub fn growth_report(&self, opts: &GrowthReportOpts, now: DateTime<Utc>) -> Result<GrowthReport> {
        let window_24h = self.growth_window(now - Duration::hours(24), now, opts)?;
        let window_7d = self.growth_window(now - Duration::days(7), now, opts)?;

        let recommendation = if window_24h.memories >= MAINTENANCE_MEMORIES_24H
            || window_24h.facts >= MAINTENANCE_FACTS_24H
        {
            Recommendation::MaintenancePass
        } else {
            Recommendation::NoOp
        };
        let guidance = match recommendation {
            Recommendation::NoOp => "growth is within normal range; no action needed".to_string(),
            Recommendation::MaintenancePass => format!(
                "{} memories and {} facts imported in the last 24h; run a lifecycle sweep and check HNSW freshness",
                window_24h.memories, window_24h.facts
            ),
        };

        Ok(GrowthReport { window_24h, window_7d, recommendation, guidance })
    }

    fn growth_window(&self, since: DateTime<Utc>, _until: DateTime<Utc>, opts: &GrowthReportOpts) -> Result<GrowthWindow> {
        let memories = self.store.growth_count_memories_since(since)?;
        let facts = self.store.growth_count_facts_since(since)?;
        let top_sources = self.store.top_sources_since(since, opts.top_sources_cap)?;

        let recent = self
            .store
            .list_memories(&crate::store::ListOpts::new().with_after(since).with_limit(1_000_000))?;
        let mut by_source_type: HashMap<&'static str, i64> = HashMap::new();
        let mut plugin_capture = 0i64;
        let mut manual_import = 0i64;
        for m in &recent {
            *by_source_type.entry(source_type_of(m.source_file.as_deref())).or_insert(0) += 1;
            if is_plugin_capture(m.source_file.as_deref()) {
                plugin_capture += 1;
            } else {
                manual_import += 1;
            }
        }

        let facts_by_type = self.store.get_facts_by_type()?;

        Ok(GrowthWindow {
            memories,
            facts,
            by_source_type,
            top_sources,
            plugin_capture,
            manual_import,
            facts_by_type,
        })
    }
}
