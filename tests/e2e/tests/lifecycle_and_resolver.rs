//! Lifecycle sweep and conflict resolution end-to-end (§4.7, §4.8, §8):
//! reinforce-promote, decay-retire, conflict-supersede, and the resolver
//! strategies they delegate to.

use chrono::Utc;
use cortex_core::lifecycle::{DecayRetirePolicy, LifecyclePolicies, LifecycleRunner, ReinforcePromotePolicy};
use cortex_core::model::{AccessType, FactState};
use cortex_core::resolver::{Resolver, Strategy};
use cortex_e2e_tests::harness::TestDb;

#[test]
fn stale_low_confidence_fact_is_retired_by_decay_sweep() {
    let db = TestDb::new();
    let m = db.seed_memory("the nightly job used to run at 2am");
    let fact = db.seed_fact(m.id, "nightly_job", "runs_at", "2am", 0.1, 45);

    let runner = LifecycleRunner::new(db.store.clone());
    let policies = LifecyclePolicies {
        reinforce_promote: ReinforcePromotePolicy { enabled: false, ..Default::default() },
        decay_retire: DecayRetirePolicy::default(),
        conflict_supersede: Default::default(),
    };
    let report = runner.run_sweep(&policies, false).unwrap();

    assert!(report.applied >= 1);
    let updated = db.store.get_fact(fact.id).unwrap().unwrap();
    assert_eq!(updated.state, FactState::Retired);
}

#[test]
fn dry_run_sweep_reports_actions_without_mutating_state() {
    let db = TestDb::new();
    let m = db.seed_memory("the staging password rotates monthly");
    let fact = db.seed_fact(m.id, "staging_password", "rotates", "monthly", 0.05, 60);

    let runner = LifecycleRunner::new(db.store.clone());
    let policies = LifecyclePolicies {
        reinforce_promote: ReinforcePromotePolicy { enabled: false, ..Default::default() },
        decay_retire: DecayRetirePolicy::default(),
        conflict_supersede: Default::default(),
    };
    let report = runner.run_sweep(&policies, true).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.applied, 0);
    assert!(!report.actions.is_empty());
    let unchanged = db.store.get_fact(fact.id).unwrap().unwrap();
    assert_eq!(unchanged.state, FactState::Active);
}

#[test]
fn core_facts_are_excluded_from_decay_retire_by_default() {
    let db = TestDb::new();
    let m = db.seed_memory("the team's primary timezone is UTC");
    let fact = db.seed_fact(m.id, "team_timezone", "is", "UTC", 0.05, 90);
    db.store.update_fact_state(fact.id, FactState::Core).unwrap();

    let runner = LifecycleRunner::new(db.store.clone());
    let policies = LifecyclePolicies {
        reinforce_promote: ReinforcePromotePolicy { enabled: false, ..Default::default() },
        decay_retire: DecayRetirePolicy::default(),
        conflict_supersede: Default::default(),
    };
    runner.run_sweep(&policies, false).unwrap();

    let unchanged = db.store.get_fact(fact.id).unwrap().unwrap();
    assert_eq!(unchanged.state, FactState::Core);
}

#[test]
fn repeated_reinforcement_from_multiple_sources_promotes_to_core() {
    let db = TestDb::new();
    let m1 = db.seed_memory("memory source one about the release cadence");
    let m2 = db.seed_memory("memory source two about the release cadence");
    let m3 = db.seed_memory("memory source three about the release cadence");
    let fact = db.seed_fact(m1.id, "release_cadence", "is", "biweekly", 0.6, 0);
    // Same subject/predicate asserted from two other memories, satisfying
    // the reinforce-promote policy's multi-sourced requirement.
    db.seed_fact(m2.id, "release_cadence", "is", "biweekly", 0.6, 0);
    db.seed_fact(m3.id, "release_cadence", "is", "biweekly", 0.6, 0);

    for _ in 0..5 {
        db.store.reinforce_fact(fact.id, Some("agent"), Utc::now()).unwrap();
    }

    let runner = LifecycleRunner::new(db.store.clone());
    let policies = LifecyclePolicies {
        reinforce_promote: ReinforcePromotePolicy::default(),
        decay_retire: DecayRetirePolicy { enabled: false, ..Default::default() },
        conflict_supersede: Default::default(),
    };
    let report = runner.run_sweep(&policies, false).unwrap();
    assert!(report.applied >= 1);
    let promoted = db.store.get_fact(fact.id).unwrap().unwrap();
    assert_eq!(promoted.state, FactState::Core);
}

#[test]
fn conflict_supersede_resolves_attribute_conflicts_with_sufficient_confidence_delta() {
    let db = TestDb::new();
    let m = db.seed_memory("the default branch is main");
    let earlier = db.seed_fact(m.id, "default_branch", "is", "master", 0.5, 5);
    let later = db.seed_fact(m.id, "default_branch", "is", "main", 0.95, 0);

    let runner = LifecycleRunner::new(db.store.clone());
    let policies = LifecyclePolicies {
        reinforce_promote: ReinforcePromotePolicy { enabled: false, ..Default::default() },
        decay_retire: DecayRetirePolicy { enabled: false, ..Default::default() },
        conflict_supersede: Default::default(),
    };
    runner.run_sweep(&policies, false).unwrap();

    let loser = db.store.get_fact(earlier.id).unwrap().unwrap();
    let winner = db.store.get_fact(later.id).unwrap().unwrap();
    assert_eq!(loser.state, FactState::Superseded);
    assert_eq!(loser.superseded_by, Some(winner.id));
}

#[test]
fn reinforcement_only_differences_do_not_count_as_attribute_conflicts() {
    let db = TestDb::new();
    let m = db.seed_memory("the primary on-call engineer is on rotation");
    let f1 = db.seed_fact(m.id, "on_call", "is", "alex", 0.7, 0);
    let f2 = db.seed_fact(m.id, "on_call", "is", "alex", 0.9, 0);
    db.store.reinforce_fact(f2.id, Some("agent"), Utc::now()).unwrap();

    let conflicts = db.store.attribute_conflicts(10, false).unwrap();
    assert!(conflicts.iter().all(|c| !(c.fact1.id == f1.id && c.fact2.id == f2.id)));
}

#[test]
fn manual_resolver_strategy_always_flags_for_human_review() {
    let db = TestDb::new();
    let m = db.seed_memory("the support queue SLA is four hours");
    let f1 = db.seed_fact(m.id, "support_sla", "is", "four hours", 0.8, 0);
    let f2 = db.seed_fact(m.id, "support_sla", "is", "two hours", 0.6, 0);

    let resolver = Resolver::new(db.store.clone());
    let conflict = cortex_core::observe::Conflict {
        fact1: f1.clone(),
        fact2: f2.clone(),
        conflict_type: "attribute",
        similarity: 1.0,
        cross_agent: false,
    };
    let batch = resolver.resolve_conflicts(&[conflict], &Strategy::Manual, false).unwrap();
    assert!(batch.actions[0].flagged_for_manual);
    assert!(!batch.actions[0].applied);

    let unchanged = db.store.get_fact(f1.id).unwrap().unwrap();
    assert_eq!(unchanged.state, FactState::Active);
}

#[test]
fn resolving_the_same_conflict_twice_is_idempotent() {
    let db = TestDb::new();
    let m = db.seed_memory("the build cache lives on the ci runners");
    let f1 = db.seed_fact(m.id, "build_cache", "lives_on", "ci runners", 0.9, 0);
    let f2 = db.seed_fact(m.id, "build_cache", "lives_on", "s3 bucket", 0.4, 0);

    let resolver = Resolver::new(db.store.clone());
    let first = resolver.resolve_by_id(f1.id, f2.id).unwrap();
    assert!(first.applied);
    let second = resolver.resolve_by_id(f1.id, f2.id).unwrap();
    assert!(!second.applied);
}

#[test]
fn access_events_record_reinforcement_and_supersession() {
    let db = TestDb::new();
    let m = db.seed_memory("the deploy key rotates quarterly");
    let fact = db.seed_fact(m.id, "deploy_key", "rotates", "quarterly", 0.7, 0);
    db.store.reinforce_fact(fact.id, Some("agent-x"), Utc::now()).unwrap();

    let events = db.store.list_fact_accesses(fact.id).unwrap();
    assert!(events.iter().any(|e| e.access_type == AccessType::Reinforce));
}
