//! Payout executor tests against the scripted gateway.
//!
//! Tests cover: the happy path, transient-failure retries with
//! attempt accounting, permanent rejections parking in ManualReview,
//! exhausted retry budgets, at-most-once delivery on replay, resuming
//! interrupted executions, out-of-order completion parking, refusal
//! of unapproved batches, multi-channel execution, and the
//! monotonicity of batch state.

use chrono::Utc;
use commission_core::{
    calculator::{RevenueEvent, RevenueFeed},
    config::{
        ChannelConfig, HierarchySnapshot, PartnerConfig, PerformanceRequirements, RuleConfig,
        RuleSet,
    },
    engine::{CommissionEngine, EngineConfig},
    error::EngineError,
    gateway::{PaymentGateway, ScriptedGateway},
    query::QueryApi,
    store::LedgerStore,
    types::{BatchStatus, CommissionKind, PayoutStatus, ScheduleKind, Tier},
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn partner(id: &str, channel: &str) -> PartnerConfig {
    PartnerConfig {
        id: id.to_string(),
        name: id.to_string(),
        tier: Tier::Tier3,
        parent_id: None,
        channel: channel.to_string(),
        monthly_volume: d("10000"),
        team_size: 0,
        retention_rate: Decimal::ZERO,
        active: true,
    }
}

fn direct_rule() -> RuleConfig {
    RuleConfig {
        id: "direct-t3".to_string(),
        tier: Tier::Tier3,
        kind: CommissionKind::Direct,
        base_rate: d("0.10"),
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

fn feed(events: &[(&str, &str)]) -> RevenueFeed {
    RevenueFeed {
        period: "2026-08".to_string(),
        currency: "USD".to_string(),
        events: events
            .iter()
            .map(|(partner_id, amount)| RevenueEvent {
                partner_id: partner_id.to_string(),
                amount: d(amount),
                currency: "USD".to_string(),
                event_time: Utc::now(),
            })
            .collect(),
    }
}

fn channel(id: &str) -> ChannelConfig {
    ChannelConfig {
        channel_id: id.to_string(),
        fee_rate: Decimal::ZERO,
        flat_fee: Decimal::ZERO,
        max_in_flight: 2,
    }
}

/// Engine wired to scripted gateways with an auto-approved batch ready
/// to execute. Returns the gateway handles for scripting and assertion.
fn ready_batch(
    partners: &[(&str, &str)],
    channels: &[&str],
) -> (CommissionEngine, String, Vec<Arc<ScriptedGateway>>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = EngineConfig::default();
    config.channels = channels.iter().map(|c| channel(c)).collect();
    config.executor.retry_base_delay_ms = 0;
    let mut engine = CommissionEngine::new(LedgerStore::in_memory().unwrap(), config).unwrap();

    let gateways: Vec<Arc<ScriptedGateway>> = channels
        .iter()
        .map(|c| Arc::new(ScriptedGateway::new(c)))
        .collect();
    for gateway in &gateways {
        engine.register_gateway(gateway.clone());
    }

    let hierarchy = HierarchySnapshot::new(
        partners.iter().map(|(id, ch)| partner(id, ch)).collect(),
    )
    .unwrap();
    let rules = RuleSet::new(vec![direct_rule()]).unwrap();
    let events: Vec<(&str, &str)> = partners.iter().map(|(id, _)| (*id, "1000")).collect();
    engine.run_period(&feed(&events), &hierarchy, &rules).unwrap();

    let batch_ids = engine.compose(ScheduleKind::Monthly).unwrap();
    assert_eq!(batch_ids.len(), 1, "expected a single-channel batch");
    (engine, batch_ids[0].clone(), gateways)
}

fn payout_key(engine: &CommissionEngine, batch_id: &str, partner_id: &str) -> String {
    let store = engine.store().lock().unwrap();
    store
        .payouts_for_batch(batch_id)
        .unwrap()
        .into_iter()
        .find(|p| p.partner_id == partner_id)
        .unwrap()
        .idempotency_key
}

#[test]
fn happy_path_completes_every_payout() {
    let (engine, batch_id, gateways) =
        ready_batch(&[("p1", "ach"), ("p2", "ach")], &["ach"]);

    let report = engine.execute_batch(&batch_id).unwrap();
    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.completed, 2);
    assert_eq!(report.manual_review, 0);
    assert_eq!(gateways[0].transfer_count(), 2);

    let store = engine.store().lock().unwrap();
    for payout in store.payouts_for_batch(&batch_id).unwrap() {
        assert_eq!(payout.status, PayoutStatus::Completed);
        assert_eq!(payout.attempt_count, 1);
    }
    assert_eq!(store.event_count("batch_executed").unwrap(), 1);
    assert_eq!(store.event_count("payout_completed").unwrap(), 2);

    let query = QueryApi::new(&store);
    let summary = query.batch_summary(&batch_id).unwrap();
    assert_eq!(summary.batch.status, BatchStatus::Completed);
    // Two partners, $1,000 volume each at the 10% direct rate.
    assert_eq!(summary.completed_total, d("200.00"));
    assert_eq!(query.payouts_for_batch(&batch_id).unwrap().len(), 2);
}

/// Scenario C: a payout failing three times on a transient error and
/// succeeding on the fourth attempt completes with attempt_count 4,
/// and the partner is paid exactly once.
#[test]
fn transient_failures_retry_until_success() {
    let (engine, batch_id, gateways) = ready_batch(&[("p1", "ach")], &["ach"]);
    let key = payout_key(&engine, &batch_id, "p1");
    gateways[0].fail_transiently(&key, 3);

    let report = engine.execute_batch(&batch_id).unwrap();
    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(gateways[0].transfer_count(), 1);

    let store = engine.store().lock().unwrap();
    let payout = store.payouts_for_batch(&batch_id).unwrap().remove(0);
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.attempt_count, 4);
}

/// Scenario D: a permanent rejection parks that payout in ManualReview
/// while its siblings complete; the batch lands PartiallyCompleted.
#[test]
fn permanent_rejection_parks_in_manual_review() {
    let (engine, batch_id, gateways) =
        ready_batch(&[("p1", "ach"), ("p2", "ach")], &["ach"]);
    let key = payout_key(&engine, &batch_id, "p1");
    gateways[0].reject_permanently(&key);

    let report = engine.execute_batch(&batch_id).unwrap();
    assert_eq!(report.status, BatchStatus::PartiallyCompleted);
    assert_eq!(report.completed, 1);
    assert_eq!(report.manual_review, 1);

    let store = engine.store().lock().unwrap();
    let payouts = store.payouts_for_batch(&batch_id).unwrap();
    let parked = payouts.iter().find(|p| p.partner_id == "p1").unwrap();
    assert_eq!(parked.status, PayoutStatus::ManualReview);
    assert_eq!(parked.attempt_count, 1, "permanent rejections never retry");
    assert!(parked.last_error.is_some());
    let sibling = payouts.iter().find(|p| p.partner_id == "p2").unwrap();
    assert_eq!(sibling.status, PayoutStatus::Completed);

    // The parked payout is visible through the query surface.
    let query = QueryApi::new(&store);
    let unresolved = query.unresolved_payouts(&batch_id).unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].partner_id, "p1");
    assert_eq!(store.event_count("payout_manual_review").unwrap(), 1);
}

#[test]
fn completed_payouts_can_be_disputed() {
    let (engine, batch_id, _) = ready_batch(&[("p1", "ach")], &["ach"]);
    engine.execute_batch(&batch_id).unwrap();

    let payout_id = {
        let store = engine.store().lock().unwrap();
        store.payouts_for_batch(&batch_id).unwrap().remove(0).payout_id
    };
    engine.dispute_payout(&payout_id).unwrap();

    let store = engine.store().lock().unwrap();
    assert_eq!(
        store.get_payout(&payout_id).unwrap().status,
        PayoutStatus::Disputed
    );
    assert_eq!(store.event_count("payout_disputed").unwrap(), 1);
}

#[test]
fn exhausted_retry_budget_parks_in_manual_review() {
    let (engine, batch_id, gateways) = ready_batch(&[("p1", "ach")], &["ach"]);
    let key = payout_key(&engine, &batch_id, "p1");
    gateways[0].fail_transiently(&key, 99);

    let report = engine.execute_batch(&batch_id).unwrap();
    assert_eq!(report.status, BatchStatus::PartiallyCompleted);

    let store = engine.store().lock().unwrap();
    let payout = store.payouts_for_batch(&batch_id).unwrap().remove(0);
    assert_eq!(payout.status, PayoutStatus::ManualReview);
    // Default budget of four attempts, all consumed.
    assert_eq!(payout.attempt_count, 4);
    assert_eq!(gateways[0].transfer_count(), 0);
}

/// A channel that already processed the idempotency key reports
/// AlreadyProcessed; the executor records success without moving
/// funds twice.
#[test]
fn replayed_submission_is_delivered_at_most_once() {
    let (engine, batch_id, gateways) = ready_batch(&[("p1", "ach")], &["ach"]);
    let key = payout_key(&engine, &batch_id, "p1");

    // The channel saw this key in a previous run that crashed before
    // the ledger recorded the outcome.
    gateways[0]
        .submit(&key, "p1", d("100.00"), "USD")
        .unwrap();
    assert_eq!(gateways[0].transfer_count(), 1);

    let report = engine.execute_batch(&batch_id).unwrap();
    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(gateways[0].transfer_count(), 1, "funds moved twice");

    let store = engine.store().lock().unwrap();
    let payout = store.payouts_for_batch(&batch_id).unwrap().remove(0);
    assert_eq!(payout.status, PayoutStatus::Completed);
}

/// Claim conflicts resolve by re-reading the row, not by replaying the
/// stale version, so execution never depends on the lock-retry budget.
#[test]
fn execution_succeeds_without_lock_retry_budget() {
    let (engine, batch_id, gateways) = ready_batch(&[("p1", "ach"), ("p2", "ach")], &["ach"]);
    let key = payout_key(&engine, &batch_id, "p1");
    gateways[0].fail_transiently(&key, 3);

    // Zero budget: any code path that leans on lock retries fails here.
    let report = {
        let store = engine.store();
        let executor = commission_core::executor::PayoutExecutor::new(
            commission_core::config::ExecutorConfig {
                retry_base_delay_ms: 0,
                lock_retry_limit: 0,
                ..Default::default()
            },
        );
        let mut gateway_map = std::collections::HashMap::new();
        gateway_map.insert(
            "ach".to_string(),
            gateways[0].clone() as Arc<dyn PaymentGateway>,
        );
        executor
            .execute_batch(store, &batch_id, &gateway_map, &[channel("ach")])
            .unwrap()
    };
    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(report.completed, 2);
}

/// A run that died after claiming a payout leaves it Submitted and the
/// batch Executing. Re-invoking execute_batch resumes the batch,
/// re-drives the stranded submission under its idempotency key, and
/// the channel's AlreadyProcessed keeps delivery at-most-once.
#[test]
fn interrupted_execution_resumes_stranded_submissions() {
    let (engine, batch_id, gateways) = ready_batch(&[("p1", "ach")], &["ach"]);
    let key = payout_key(&engine, &batch_id, "p1");

    // Interrupted run: the batch went Executing, the payout was
    // claimed and the channel accepted the transfer, but the process
    // died before the ledger recorded completion.
    {
        let store = engine.store().lock().unwrap();
        store
            .transition_batch(&batch_id, BatchStatus::Executing)
            .unwrap();
        let payout = store.payouts_for_batch(&batch_id).unwrap().remove(0);
        store.claim_payout(&payout.payout_id, payout.version).unwrap();
    }
    gateways[0].submit(&key, "p1", d("100.00"), "USD").unwrap();
    assert_eq!(gateways[0].transfer_count(), 1);

    let report = engine.execute_batch(&batch_id).unwrap();
    assert_eq!(report.status, BatchStatus::Completed);
    assert_eq!(gateways[0].transfer_count(), 1, "funds moved twice");

    let store = engine.store().lock().unwrap();
    let payout = store.payouts_for_batch(&batch_id).unwrap().remove(0);
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.attempt_count, 1, "the stranded claim is the attempt");
}

/// A completion from an earlier batch arriving after a later batch has
/// already been applied to the partner parks in ManualReview instead
/// of stalling its batch.
#[test]
fn out_of_order_completion_parks_for_review() {
    let (engine, first_batch, gateways) = ready_batch(&[("p1", "ach")], &["ach"]);

    // A second period composes a later batch for the same partner,
    // and that batch executes first.
    let hierarchy = HierarchySnapshot::new(vec![partner("p1", "ach")]).unwrap();
    let rules = RuleSet::new(vec![direct_rule()]).unwrap();
    let mut next_feed = feed(&[("p1", "1000")]);
    next_feed.period = "2026-09".to_string();
    engine.run_period(&next_feed, &hierarchy, &rules).unwrap();
    let later_batches = engine.compose(ScheduleKind::Monthly).unwrap();
    assert_eq!(later_batches.len(), 1);
    engine.execute_batch(&later_batches[0]).unwrap();

    let report = engine.execute_batch(&first_batch).unwrap();
    assert_eq!(report.status, BatchStatus::PartiallyCompleted);

    let store = engine.store().lock().unwrap();
    let payout = store.payouts_for_batch(&first_batch).unwrap().remove(0);
    assert_eq!(payout.status, PayoutStatus::ManualReview);
    assert!(
        payout.last_error.as_deref().unwrap_or("").contains("out of order"),
        "unexpected error: {:?}",
        payout.last_error
    );
    // The transfer itself went through; only the ledger apply is held.
    assert_eq!(gateways[0].transfer_count(), 2);
}

#[test]
fn refuses_batches_that_are_not_approved() {
    let mut config = EngineConfig::default();
    config.channels = vec![channel("ach")];
    config.composer.approval_threshold = Decimal::ZERO;
    config.executor.retry_base_delay_ms = 0;
    let mut engine = CommissionEngine::new(LedgerStore::in_memory().unwrap(), config).unwrap();
    let gateway = Arc::new(ScriptedGateway::new("ach"));
    engine.register_gateway(gateway.clone());

    let hierarchy = HierarchySnapshot::new(vec![partner("p1", "ach")]).unwrap();
    let rules = RuleSet::new(vec![direct_rule()]).unwrap();
    engine.run_period(&feed(&[("p1", "1000")]), &hierarchy, &rules).unwrap();
    let batch_ids = engine.compose(ScheduleKind::Monthly).unwrap();

    let err = engine.execute_batch(&batch_ids[0]).unwrap_err();
    assert!(
        matches!(err, EngineError::ApprovalState { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(gateway.transfer_count(), 0);

    let store = engine.store().lock().unwrap();
    assert_eq!(
        store.get_batch(&batch_ids[0]).unwrap().status,
        BatchStatus::AwaitingApproval
    );
}

#[test]
fn executes_channels_with_independent_worker_pools() {
    // Four partners split over two channels, each channel its own
    // batch and gateway.
    let mut config = EngineConfig::default();
    config.channels = vec![channel("ach"), channel("wire")];
    config.executor.retry_base_delay_ms = 0;
    let mut engine = CommissionEngine::new(LedgerStore::in_memory().unwrap(), config).unwrap();
    let ach = Arc::new(ScriptedGateway::new("ach"));
    let wire = Arc::new(ScriptedGateway::new("wire"));
    engine.register_gateway(ach.clone());
    engine.register_gateway(wire.clone());

    let hierarchy = HierarchySnapshot::new(vec![
        partner("a1", "ach"),
        partner("a2", "ach"),
        partner("w1", "wire"),
        partner("w2", "wire"),
    ])
    .unwrap();
    let rules = RuleSet::new(vec![direct_rule()]).unwrap();
    engine
        .run_period(
            &feed(&[("a1", "1000"), ("a2", "1000"), ("w1", "1000"), ("w2", "1000")]),
            &hierarchy,
            &rules,
        )
        .unwrap();

    let batch_ids = engine.compose(ScheduleKind::Monthly).unwrap();
    assert_eq!(batch_ids.len(), 2);
    for batch_id in &batch_ids {
        let report = engine.execute_batch(batch_id).unwrap();
        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.completed, 2);
    }
    assert_eq!(ach.transfer_count(), 2);
    assert_eq!(wire.transfer_count(), 2);
}

#[test]
fn completed_batches_never_regress() {
    let (engine, batch_id, _) = ready_batch(&[("p1", "ach")], &["ach"]);
    engine.execute_batch(&batch_id).unwrap();

    let store = engine.store().lock().unwrap();
    for next in [
        BatchStatus::Forming,
        BatchStatus::Executing,
        BatchStatus::Cancelled,
    ] {
        let err = store.transition_batch(&batch_id, next).unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidTransition { .. }),
            "completed batch accepted transition to {next:?}"
        );
    }
}

#[test]
fn executing_a_completed_batch_fails_cleanly() {
    let (engine, batch_id, gateways) = ready_batch(&[("p1", "ach")], &["ach"]);
    engine.execute_batch(&batch_id).unwrap();

    let err = engine.execute_batch(&batch_id).unwrap_err();
    assert!(matches!(err, EngineError::ApprovalState { .. }));
    assert_eq!(gateways[0].transfer_count(), 1);
}
