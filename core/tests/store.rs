//! Ledger store tests.
//!
//! Tests cover: schema uniqueness constraints, all-or-nothing
//! calculation inserts, optimistic locking on payout rows, forward-only
//! batch transitions, the per-partner ordering fence, tier promotion
//! rules, disputes, and the audit event log.

use commission_core::{
    calculator::CommissionCalculation,
    config::{HierarchySnapshot, PartnerConfig, PerformanceRequirements, RuleConfig, RuleSet},
    error::EngineError,
    event::EventLogEntry,
    store::{LedgerStore, PayoutRow},
    types::{BatchStatus, CommissionKind, PayoutStatus, ScheduleKind, Tier},
};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn partner(id: &str, tier: Tier) -> PartnerConfig {
    PartnerConfig {
        id: id.to_string(),
        name: id.to_string(),
        tier,
        parent_id: None,
        channel: "ach".to_string(),
        monthly_volume: d("10000"),
        team_size: 0,
        retention_rate: Decimal::ZERO,
        active: true,
    }
}

fn store_with_partner(id: &str) -> LedgerStore {
    let store = LedgerStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
        .sync_hierarchy(&HierarchySnapshot::new(vec![partner(id, Tier::Tier3)]).unwrap())
        .unwrap();
    store
}

fn calc(calc_id: &str, partner_id: &str, rule_id: &str, period: &str) -> CommissionCalculation {
    CommissionCalculation {
        calc_id: calc_id.to_string(),
        period: period.to_string(),
        partner_id: partner_id.to_string(),
        rule_id: rule_id.to_string(),
        kind: CommissionKind::Direct,
        currency: "USD".to_string(),
        base_amount: d("100.00"),
        bonus_amount: Decimal::ZERO,
        carve_out_amount: Decimal::ZERO,
        net_amount: d("100.00"),
        batch_id: None,
    }
}

fn payout(payout_id: &str, batch_id: &str, partner_id: &str, key: &str) -> PayoutRow {
    PayoutRow {
        payout_id: payout_id.to_string(),
        batch_id: batch_id.to_string(),
        partner_id: partner_id.to_string(),
        channel: "ach".to_string(),
        currency: "USD".to_string(),
        gross_amount: d("100.00"),
        fee_amount: Decimal::ZERO,
        net_amount: d("100.00"),
        idempotency_key: key.to_string(),
        status: PayoutStatus::Pending,
        attempt_count: 0,
        last_error: None,
        version: 0,
    }
}

#[test]
fn duplicate_idempotency_keys_are_rejected() {
    let store = store_with_partner("p1");
    store
        .insert_batch("b1", ScheduleKind::Monthly, "USD", "ach", false, "200.00")
        .unwrap();
    store
        .insert_payouts(&[payout("po1", "b1", "p1", "b1:p1:ach")])
        .unwrap();
    let err = store
        .insert_payouts(&[payout("po2", "b1", "p1", "b1:p1:ach")])
        .unwrap_err();
    assert!(matches!(err, EngineError::Database(_)));
}

#[test]
fn calculation_inserts_are_all_or_nothing() {
    let store = store_with_partner("p1");
    store
        .persist_rules(&RuleSet::new(vec![rule("r1", "0.10")]).unwrap())
        .unwrap();
    let rows = vec![
        calc("c1", "p1", "r1", "2026-08"),
        // Same (partner, rule, period) with a new calc id.
        calc("c2", "p1", "r1", "2026-08"),
    ];
    assert!(store.insert_calculations(&rows).is_err());
    assert_eq!(store.calculation_count().unwrap(), 0);
}

#[test]
fn stale_version_claims_conflict() {
    let store = store_with_partner("p1");
    store
        .insert_batch("b1", ScheduleKind::Monthly, "USD", "ach", false, "100.00")
        .unwrap();
    store
        .insert_payouts(&[payout("po1", "b1", "p1", "b1:p1:ach")])
        .unwrap();

    store.claim_payout("po1", 0).unwrap();
    // A second claimant still holding version 0 must lose.
    let err = store.claim_payout("po1", 0).unwrap_err();
    assert!(matches!(err, EngineError::VersionConflict { .. }));

    let row = store.get_payout("po1").unwrap();
    assert_eq!(row.status, PayoutStatus::Submitted);
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.version, 1);
}

#[test]
fn completion_requires_a_submitted_row() {
    let store = store_with_partner("p1");
    let seq = store
        .insert_batch("b1", ScheduleKind::Monthly, "USD", "ach", false, "100.00")
        .unwrap();
    store
        .insert_payouts(&[payout("po1", "b1", "p1", "b1:p1:ach")])
        .unwrap();

    let err = store.complete_payout("po1", 0, seq).unwrap_err();
    assert!(matches!(err, EngineError::VersionConflict { .. }));
    assert_eq!(
        store.get_payout("po1").unwrap().status,
        PayoutStatus::Pending
    );
}

#[test]
fn batch_transitions_are_forward_only() {
    let store = store_with_partner("p1");
    store
        .insert_batch("b1", ScheduleKind::Monthly, "USD", "ach", false, "100.00")
        .unwrap();

    let err = store
        .transition_batch("b1", BatchStatus::Executing)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    store
        .transition_batch("b1", BatchStatus::Approved)
        .unwrap();
    store
        .transition_batch("b1", BatchStatus::Executing)
        .unwrap();
    // No path back.
    let err = store
        .transition_batch("b1", BatchStatus::Approved)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

/// A completion from an earlier batch must not land after a later
/// batch has already been applied to the same partner.
#[test]
fn ordering_fence_rejects_out_of_order_completions() {
    let store = store_with_partner("p1");
    let seq1 = store
        .insert_batch("b1", ScheduleKind::Monthly, "USD", "ach", false, "100.00")
        .unwrap();
    let seq2 = store
        .insert_batch("b2", ScheduleKind::Monthly, "USD", "ach", false, "100.00")
        .unwrap();
    assert!(seq2 > seq1);
    store
        .insert_payouts(&[
            payout("po1", "b1", "p1", "b1:p1:ach"),
            payout("po2", "b2", "p1", "b2:p1:ach"),
        ])
        .unwrap();

    // The later batch completes first.
    store.claim_payout("po2", 0).unwrap();
    store.complete_payout("po2", 1, seq2).unwrap();
    assert_eq!(
        store.get_partner("p1").unwrap().last_applied_batch_seq,
        seq2
    );

    // The straggler from the earlier batch is fenced off.
    store.claim_payout("po1", 0).unwrap();
    let err = store.complete_payout("po1", 1, seq1).unwrap_err();
    assert!(
        matches!(err, EngineError::OrderingViolation { .. }),
        "unexpected error: {err}"
    );
}

#[test]
fn promotion_moves_up_only() {
    let store = store_with_partner("p1");
    let old = store.promote_partner("p1", Tier::Tier2).unwrap();
    assert_eq!(old, Tier::Tier3);
    assert_eq!(store.get_partner("p1").unwrap().tier, Tier::Tier2);

    let err = store.promote_partner("p1", Tier::Tier5).unwrap_err();
    assert!(matches!(err, EngineError::InvalidPromotion { .. }));
    let err = store.promote_partner("p1", Tier::Tier2).unwrap_err();
    assert!(matches!(err, EngineError::InvalidPromotion { .. }));
}

#[test]
fn hierarchy_sync_preserves_promoted_tiers() {
    let store = store_with_partner("p1");
    store.promote_partner("p1", Tier::Tier1).unwrap();

    // A stale config snapshot still carries the old tier.
    store
        .sync_hierarchy(&HierarchySnapshot::new(vec![partner("p1", Tier::Tier3)]).unwrap())
        .unwrap();
    assert_eq!(store.get_partner("p1").unwrap().tier, Tier::Tier1);
}

#[test]
fn disputes_only_arise_from_completed_payouts() {
    let store = store_with_partner("p1");
    let seq = store
        .insert_batch("b1", ScheduleKind::Monthly, "USD", "ach", false, "100.00")
        .unwrap();
    store
        .insert_payouts(&[payout("po1", "b1", "p1", "b1:p1:ach")])
        .unwrap();

    let err = store.dispute_payout("po1").unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    store.claim_payout("po1", 0).unwrap();
    store.complete_payout("po1", 1, seq).unwrap();
    store.dispute_payout("po1").unwrap();
    assert_eq!(
        store.get_payout("po1").unwrap().status,
        PayoutStatus::Disputed
    );
}

#[test]
fn failed_payout_returns_to_pending_with_its_error() {
    let store = store_with_partner("p1");
    store
        .insert_batch("b1", ScheduleKind::Monthly, "USD", "ach", false, "100.00")
        .unwrap();
    store
        .insert_payouts(&[payout("po1", "b1", "p1", "b1:p1:ach")])
        .unwrap();

    store.claim_payout("po1", 0).unwrap();
    store
        .fail_payout("po1", 1, "temporary channel failure", true)
        .unwrap();

    let row = store.get_payout("po1").unwrap();
    assert_eq!(row.status, PayoutStatus::Pending);
    assert_eq!(row.last_error.as_deref(), Some("temporary channel failure"));
    assert_eq!(row.version, 2);
}

fn rule(id: &str, rate: &str) -> RuleConfig {
    RuleConfig {
        id: id.to_string(),
        tier: Tier::Tier3,
        kind: CommissionKind::Direct,
        base_rate: d(rate),
        community_multiplier: Decimal::ONE,
        carve_out_rate: Decimal::ZERO,
        min_volume: Decimal::ZERO,
        max_payout: None,
        cap_before_carve_out: false,
        requirements: PerformanceRequirements::default(),
        priority: 0,
        active: true,
    }
}

/// Re-persisting a changed rule under the same id keeps the stored
/// version, so old calculations stay auditable against the rates they
/// were computed with.
#[test]
fn persisted_rules_are_immutable() {
    let store = LedgerStore::in_memory().unwrap();
    store.migrate().unwrap();

    store
        .persist_rules(&RuleSet::new(vec![rule("direct-t3", "0.10")]).unwrap())
        .unwrap();
    store
        .persist_rules(&RuleSet::new(vec![rule("direct-t3", "0.25")]).unwrap())
        .unwrap();

    assert_eq!(store.rule_count().unwrap(), 1);
    assert_eq!(store.get_rule("direct-t3").unwrap().base_rate, d("0.10"));

    store.deactivate_rule("direct-t3").unwrap();
    let stored = store.get_rule("direct-t3").unwrap();
    assert!(!stored.active);
    assert_eq!(stored.base_rate, d("0.10"));
}

#[test]
fn stored_partner_round_trips_as_config() {
    let store = store_with_partner("p1");
    let config = store.partner_config("p1").unwrap();
    assert_eq!(config.id, "p1");
    assert_eq!(config.tier, Tier::Tier3);
    assert_eq!(config.channel, "ach");
    assert_eq!(config.monthly_volume, d("10000"));
    assert!(config.active);
}

#[test]
fn file_backed_ledger_survives_reopen() {
    let path = std::env::temp_dir().join(format!("ledger-{}.db", Uuid::new_v4()));
    let path_str = path.to_string_lossy().into_owned();

    let store = LedgerStore::open(&path_str).unwrap();
    store.migrate().unwrap();
    store
        .sync_hierarchy(&HierarchySnapshot::new(vec![partner("p1", Tier::Tier2)]).unwrap())
        .unwrap();

    let second = store.reopen().unwrap();
    assert_eq!(second.partner_count().unwrap(), 1);
    assert_eq!(second.get_partner("p1").unwrap().tier, Tier::Tier2);

    drop(second);
    drop(store);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }
}

#[test]
fn event_log_round_trips_payloads() {
    let store = LedgerStore::in_memory().unwrap();
    store.migrate().unwrap();

    store
        .append_event(&EventLogEntry {
            id: None,
            component: "calculator".to_string(),
            event_type: "period_calculated".to_string(),
            payload: r#"{"period":"2026-08"}"#.to_string(),
            recorded_at: "2026-08-29T00:00:00Z".to_string(),
        })
        .unwrap();

    assert_eq!(store.event_count("period_calculated").unwrap(), 1);
    let events = store.events_of_type("period_calculated").unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].component, "calculator");
    assert!(events[0].payload.contains("2026-08"));
}
