//! Lifecycle runner (§4.8): policy-driven batch sweep over facts —
//! reinforce-promote, decay-retire, conflict-supersede.

pub mod decay;

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::Result;
use crate::model::FactState;
use crate::observe::Observer;
use crate::resolver::{Resolver, Strategy};
use crate::store::{ListOpts, Store};

/// `{enabled=true, min_reinforcements=5, min_sources=3, target_state=Core}` (§4.8).
#[derive(Debug, Clone)]
pub struct ReinforcePromotePolicy {
    pub enabled: bool,
    pub min_reinforcements: i64,
    pub min_sources: i64,
    pub target_state: FactState,
}

impl Default for ReinforcePromotePolicy {
    fn default() -> Self {
        Self { enabled: true, min_reinforcements: 5, min_sources: 3, target_state: FactState::Core }
    }
}

/// `{enabled=true, inactive_days=30, confidence_below=0.30, target_state=Retired}` (§4.8).
///
/// `include_core` is an explicit override (§9 Open Questions): by default
/// `Core` facts are excluded from decay-retire regardless of how stale they
/// look, since promotion to `Core` is meant to be a durable signal.
#[derive(Debug, Clone)]
pub struct DecayRetirePolicy {
    pub enabled: bool,
    pub inactive_days: i64,
    pub confidence_below: f64,
    pub target_state: FactState,
    pub include_core: bool,
}

impl Default for DecayRetirePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            inactive_days: 30,
            confidence_below: 0.30,
            target_state: FactState::Retired,
            include_core: false,
        }
    }
}

/// `{enabled=true, min_confidence_delta=0.15, require_strictly_newer=true}` (§4.8).
#[derive(Debug, Clone)]
pub struct ConflictSupersedePolicy {
    pub enabled: bool,
    pub min_confidence_delta: f64,
    pub require_strictly_newer: bool,
}

impl Default for ConflictSupersedePolicy {
    fn default() -> Self {
        Self { enabled: true, min_confidence_delta: 0.15, require_strictly_newer: true }
    }
}

/// Full policy bundle for one sweep (§4.8).
#[derive(Debug, Clone, Default)]
pub struct LifecyclePolicies {
    pub reinforce_promote: ReinforcePromotePolicy,
    pub decay_retire: DecayRetirePolicy,
    pub conflict_supersede: ConflictSupersedePolicy,
}

/// One action taken (or planned, if dry-run) by the lifecycle sweep (§4.8).
#[derive(Debug, Clone)]
pub struct Action {
    pub policy: &'static str,
    pub action: &'static str,
    pub fact_id: Option<i64>,
    pub winner_id: Option<i64>,
    pub loser_id: Option<i64>,
    pub from_state: FactState,
    pub to_state: FactState,
    pub reason: String,
    pub applied: bool,
}

/// Output of one sweep (§4.8).
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub dry_run: bool,
    pub scanned: usize,
    pub applied: usize,
    pub actions: Vec<Action>,
}

/// Runs the three lifecycle policies against a `Store` (§4.8).
pub struct LifecycleRunner {
    store: Arc<Store>,
    observer: Observer,
    resolver: Resolver,
}

impl LifecycleRunner {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            observer: Observer::new(store.clone()),
            resolver: Resolver::new(store.clone()),
            store,
        }
    }

    pub fn run_sweep(&self, policies: &LifecyclePolicies, dry_run: bool) -> Result<Report> {
        let now = Utc::now();
        let mut report = Report { dry_run, ..Default::default() };

        if policies.reinforce_promote.enabled {
            self.reinforce_promote(&policies.reinforce_promote, dry_run, &mut report)?;
        }
        if policies.decay_retire.enabled {
            self.decay_retire(&policies.decay_retire, now, dry_run, &mut report)?;
        }
        if policies.conflict_supersede.enabled {
            self.conflict_supersede(&policies.conflict_supersede, dry_run, &mut report)?;
        }

        info!(
            scanned = report.scanned,
            applied = report.applied,
            dry_run,
            "lifecycle sweep complete"
        );
        Ok(report)
    }

    fn reinforce_promote(&self, policy: &ReinforcePromotePolicy, dry_run: bool, report: &mut Report) -> Result<()> {
        let active = self.store.list_facts(&ListOpts::new().with_limit(1_000_000))?;
        for fact in active.into_iter().filter(|f| f.state == FactState::Active) {
            report.scanned += 1;
            let reinforcements = self.store.count_distinct_reinforcements(fact.id)?;
            let sources = self.store.count_distinct_sources_for_subject(fact.id)?;
            if reinforcements >= policy.min_reinforcements && sources >= policy.min_sources {
                let applied = if dry_run {
                    false
                } else {
                    self.store.update_fact_state(fact.id, policy.target_state)?;
                    true
                };
                if applied {
                    report.applied += 1;
                }
                report.actions.push(Action {
                    policy: "reinforce-promote",
                    action: "promote",
                    fact_id: Some(fact.id),
                    winner_id: None,
                    loser_id: None,
                    from_state: fact.state,
                    to_state: policy.target_state,
                    reason: format!("{reinforcements} reinforcements across {sources} sources"),
                    applied,
                });
            }
        }
        Ok(())
    }

    fn decay_retire(
        &self,
        policy: &DecayRetirePolicy,
        now: chrono::DateTime<Utc>,
        dry_run: bool,
        report: &mut Report,
    ) -> Result<()> {
        let facts = self.store.list_facts(&ListOpts::new().with_limit(1_000_000))?;
        for fact in facts {
            let eligible_state = fact.state == FactState::Active || (policy.include_core && fact.state == FactState::Core);
            if !eligible_state {
                continue;
            }
            report.scanned += 1;
            let inactive_days = (now - fact.last_reinforced).num_days();
            if inactive_days >= policy.inactive_days && fact.confidence < policy.confidence_below {
                let applied = if dry_run {
                    false
                } else {
                    self.store.update_fact_state(fact.id, policy.target_state)?;
                    true
                };
                if applied {
                    report.applied += 1;
                }
                report.actions.push(Action {
                    policy: "decay-retire",
                    action: "retire",
                    fact_id: Some(fact.id),
                    winner_id: None,
                    loser_id: None,
                    from_state: fact.state,
                    to_state: policy.target_state,
                    reason: format!("inactive {inactive_days} days, confidence {:.3}", fact.confidence),
                    applied,
                });
            }
        }
        Ok(())
    }

    fn conflict_supersede(&self, policy: &ConflictSupersedePolicy, dry_run: bool, report: &mut Report) -> Result<()> {
        let conflicts = self.observer.attribute_conflicts(10_000, false)?;
        let now = Utc::now();
        for conflict in conflicts {
            report.scanned += 1;
            let c1 = conflict.fact1.effective_confidence_at(now);
            let c2 = conflict.fact2.effective_confidence_at(now);
            if (c1 - c2).abs() < policy.min_confidence_delta {
                continue;
            }
            let (winner, loser) = if c1 >= c2 { (&conflict.fact1, &conflict.fact2) } else { (&conflict.fact2, &conflict.fact1) };
            if policy.require_strictly_newer && winner.created_at <= loser.created_at {
                continue;
            }
            let action = if dry_run {
                self.resolver
                    .resolve_conflicts(
                        &[crate::observe::Conflict {
                            fact1: winner.clone(),
                            fact2: loser.clone(),
                            conflict_type: "attribute",
                            similarity: conflict.similarity,
                            cross_agent: conflict.cross_agent,
                        }],
                        &Strategy::HighestConfidence,
                        true,
                    )?
                    .actions
                    .remove(0)
            } else {
                let resolved = self.resolver.resolve_by_id(winner.id, loser.id)?;
                if resolved.applied {
                    report.applied += 1;
                }
                resolved
            };
            report.actions.push(Action {
                policy: "conflict-supersede",
                action: "supersede",
                fact_id: None,
                winner_id: Some(winner.id),
                loser_id: Some(loser.id),
                from_state: loser.state,
                to_state: FactState::Superseded,
                reason: format!("confidence delta {:.3}", (c1 - c2).abs()),
                applied: action.applied,
            });
        }
        Ok(())
    }
}
