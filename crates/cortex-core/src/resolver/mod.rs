//! Conflict resolver (§4.7): applies a `Strategy` to attribute conflicts,
//! tombstoning losers via `Store::supersede_fact`.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collab::{CompletionOptions, LlmProvider, LlmResolution};
use crate::error::Result;
use crate::model::Fact;
use crate::observe::Conflict;
use crate::store::Store;

/// Default timeout for the LLM resolver strategy's per-conflict call (§5).
pub const LLM_RESOLVER_TIMEOUT: Duration = Duration::from_secs(15);

/// Conflict resolution strategy (§4.7).
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Pick the fact with the later `created_at`. Also known as `Newest`.
    LastWrite,
    /// Pick by greater effective confidence at resolution time.
    HighestConfidence,
    /// Never resolve automatically; always flag for human review.
    Manual,
    /// Ask an `LlmProvider`; fall back to manual if it isn't confident.
    Llm(Arc<dyn LlmProvider>),
}

/// One planned or applied resolution action (§4.7).
#[derive(Debug, Clone)]
pub struct ResolveAction {
    pub winner_id: i64,
    pub loser_id: i64,
    pub reason: String,
    pub applied: bool,
    pub flagged_for_manual: bool,
}

/// Result of `Resolver::resolve_conflicts` (§4.7).
#[derive(Debug, Clone, Default)]
pub struct ResolveBatch {
    pub dry_run: bool,
    pub actions: Vec<ResolveAction>,
}

/// Applies conflict resolutions against a `Store` (§4.7).
pub struct Resolver {
    store: Arc<Store>,
}

impl Resolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn resolve_conflicts(
        &self,
        conflicts: &[Conflict],
        strategy: &Strategy,
        dry_run: bool,
    ) -> Result<ResolveBatch> {
        let mut actions = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            actions.push(self.resolve_one(&conflict.fact1, &conflict.fact2, strategy, dry_run)?);
        }
        info!(
            conflicts = conflicts.len(),
            applied = actions.iter().filter(|a| a.applied).count(),
            flagged = actions.iter().filter(|a| a.flagged_for_manual).count(),
            dry_run,
            "conflict resolution batch complete"
        );
        Ok(ResolveBatch { dry_run, actions })
    }

    fn resolve_one(&self, f1: &Fact, f2: &Fact, strategy: &Strategy, dry_run: bool) -> Result<ResolveAction> {
        let now = Utc::now();
        let plan = match strategy {
            Strategy::LastWrite => Some(pick_last_write(f1, f2)),
            Strategy::HighestConfidence => Some(pick_highest_confidence(f1, f2, now)),
            Strategy::Manual => None,
            Strategy::Llm(provider) => self.ask_llm(provider, f1, f2)?,
        };

        let Some((winner_id, loser_id, reason)) = plan else {
            debug!(fact1 = f1.id, fact2 = f2.id, "conflict flagged for manual review");
            return Ok(ResolveAction {
                winner_id: f1.id,
                loser_id: f2.id,
                reason: "strategy:manual".to_string(),
                applied: false,
                flagged_for_manual: true,
            });
        };

        if dry_run {
            return Ok(ResolveAction { winner_id, loser_id, reason, applied: false, flagged_for_manual: false });
        }

        let applied = self.store.supersede_fact(loser_id, winner_id, &reason, now)?;
        debug!(winner_id, loser_id, applied, %reason, "conflict resolved");
        Ok(ResolveAction { winner_id, loser_id, reason, applied, flagged_for_manual: false })
    }

    /// Manual path (§4.7): both facts must exist; reason is fixed.
    pub fn resolve_by_id(&self, winner_id: i64, loser_id: i64) -> Result<ResolveAction> {
        let now = Utc::now();
        let applied = self.store.supersede_fact(loser_id, winner_id, "strategy:manual", now)?;
        Ok(ResolveAction {
            winner_id,
            loser_id,
            reason: "strategy:manual".to_string(),
            applied,
            flagged_for_manual: false,
        })
    }

    /// Runs `provider.complete` on a worker thread bounded by
    /// `LLM_RESOLVER_TIMEOUT` (§5 per-conflict timeout). A provider that
    /// doesn't return in time is treated the same as a non-confident
    /// response: the conflict is flagged for manual review rather than
    /// left blocking indefinitely.
    fn ask_llm(&self, provider: &Arc<dyn LlmProvider>, f1: &Fact, f2: &Fact) -> Result<Option<(i64, i64, String)>> {
        let prompt = format!(
            "Two facts conflict:\n1) id={} subject={:?} predicate={:?} object={:?} confidence={}\n\
             2) id={} subject={:?} predicate={:?} object={:?} confidence={}\n\
             Respond with JSON {{\"winner\":1|2,\"action\":\"supersede\"|\"flag\",\"confidence\":0..1,\"reason\":...}}.",
            f1.id, f1.subject, f1.predicate, f1.object, f1.confidence,
            f2.id, f2.subject, f2.predicate, f2.object, f2.confidence,
        );
        let opts = CompletionOptions {
            system: Some("You adjudicate conflicting facts. Respond with JSON only.".to_string()),
            max_tokens: Some(256),
            temperature: Some(0.0),
        };

        let provider = Arc::clone(provider);
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = provider.complete(&prompt, opts);
            let _ = tx.send(result);
        });

        let raw = match rx.recv_timeout(LLM_RESOLVER_TIMEOUT) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(fact1 = f1.id, fact2 = f2.id, timeout_secs = LLM_RESOLVER_TIMEOUT.as_secs(),
                    "llm resolver call timed out; flagging for manual review");
                return Ok(None);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(crate::error::CoreError::Transient(
                    "llm provider worker thread exited without a response".to_string(),
                ));
            }
        };

        let resolution = LlmResolution::parse(&raw)?;
        if !resolution.is_confident_non_flag() {
            return Ok(None);
        }
        let (winner, loser) = match resolution.winner {
            1 => (f1, f2),
            _ => (f2, f1),
        };
        Ok(Some((winner.id, loser.id, format!("strategy:llm: {}", resolution.reason))))
    }
}

fn pick_last_write(f1: &Fact, f2: &Fact) -> (i64, i64, String) {
    if f1.created_at >= f2.created_at {
        (f1.id, f2.id, "strategy:last_write".to_string())
    } else {
        (f2.id, f1.id, "strategy:last_write".to_string())
    }
}

fn pick_highest_confidence(f1: &Fact, f2: &Fact, now: chrono::DateTime<Utc>) -> (i64, i64, String) {
    if f1.effective_confidence_at(now) >= f2.effective_confidence_at(now) {
        (f1.id, f2.id, "strategy:highest_confidence".to_string())
    } else {
        (f2.id, f1.id, "strategy:highest_confidence".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FactState, FactType};

    fn fact(id: i64, created_at: chrono::DateTime<Utc>, confidence: f64) -> Fact {
        Fact {
            id,
            memory_id: 1,
            subject: "server".to_string(),
            predicate: "is".to_string(),
            object: format!("object-{id}"),
            fact_type: FactType::Kv,
            confidence,
            decay_rate: crate::model::DEFAULT_DECAY_RATE,
            created_at,
            last_reinforced: created_at,
            state: FactState::Active,
            superseded_by: None,
            source_quote: None,
            agent: None,
        }
    }

    #[test]
    fn manual_strategy_always_flags() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let resolver = Resolver::new(store);
        let now = Utc::now();
        let f1 = fact(1, now, 0.9);
        let f2 = fact(2, now, 0.5);
        let conflict = Conflict { fact1: f1, fact2: f2, conflict_type: "attribute", similarity: 1.0, cross_agent: false };
        let batch = resolver.resolve_conflicts(&[conflict], &Strategy::Manual, false).unwrap();
        assert!(batch.actions[0].flagged_for_manual);
        assert!(!batch.actions[0].applied);
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let m = store
            .create_memory(crate::model::Memory {
                id: 0,
                content: "x".to_string(),
                content_hash: "h1".to_string(),
                source_file: None,
                source_line: None,
                source_section: None,
                imported_at: Utc::now(),
                project: None,
                class: None,
                metadata: Default::default(),
                deleted_at: None,
            })
            .unwrap();
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(1);
        let f1 = store.create_fact(fact_for(m.id, earlier, 0.9)).unwrap();
        let f2 = store.create_fact(fact_for(m.id, now, 0.5)).unwrap();

        let resolver = Resolver::new(store.clone());
        let conflict = Conflict { fact1: f1.clone(), fact2: f2.clone(), conflict_type: "attribute", similarity: 1.0, cross_agent: false };
        let batch = resolver.resolve_conflicts(&[conflict], &Strategy::LastWrite, true).unwrap();
        assert!(!batch.actions[0].applied);
        assert_eq!(store.get_fact(f1.id).unwrap().unwrap().state, FactState::Active);
    }

    fn fact_for(memory_id: i64, created_at: chrono::DateTime<Utc>, confidence: f64) -> Fact {
        Fact {
            id: 0,
            memory_id,
            subject: "server".to_string(),
            predicate: "is".to_string(),
            object: "x".to_string(),
            fact_type: FactType::Kv,
            confidence,
            decay_rate: crate::model::DEFAULT_DECAY_RATE,
            created_at,
            last_reinforced: created_at,
            state: FactState::Active,
            superseded_by: None,
            source_quote: None,
            agent: None,
        }
    }

    #[test]
    fn last_write_picks_later_created_at() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(1);
        let (winner, loser, _) = pick_last_write(&fact(1, earlier, 0.9), &fact(2, now, 0.1));
        assert_eq!(winner, 2);
        assert_eq!(loser, 1);
    }

    #[test]
    fn applying_resolution_twice_is_idempotent() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let m = store
            .create_memory(crate::model::Memory {
                id: 0,
                content: "x".to_string(),
                content_hash: "h2".to_string(),
                source_file: None,
                source_line: None,
                source_section: None,
                imported_at: Utc::now(),
                project: None,
                class: None,
                metadata: Default::default(),
                deleted_at: None,
            })
            .unwrap();
        let now = Utc::now();
        let f1 = store.create_fact(fact_for(m.id, now, 0.9)).unwrap();
        let f2 = store.create_fact(fact_for(m.id, now, 0.5)).unwrap();

        let resolver = Resolver::new(store.clone());
        let first = resolver.resolve_by_id(f1.id, f2.id).unwrap();
        assert!(first.applied);
        let second = resolver.resolve_by_id(f1.id, f2.id).unwrap();
        assert!(!second.applied);
    }
}
