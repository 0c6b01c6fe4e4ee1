//! payout-runner: headless end-to-end run of the commission engine.
//!
//! Usage:
//!   payout-runner --period 2026-08 --db ledger.db
//!   payout-runner --partners partners.json --rules rules.json --feed feed.json
//!
//! Without config files a small built-in demo book is used. Batches
//! run against the scripted in-process gateway, so the run is safe to
//! repeat against a real ledger file.

use anyhow::Result;
use chrono::Utc;
use commission_core::{
    calculator::{RevenueEvent, RevenueFeed},
    config::{
        ChannelConfig, HierarchySnapshot, PartnerConfig, PerformanceRequirements, RuleConfig,
        RuleSet,
    },
    engine::{CommissionEngine, EngineConfig},
    gateway::ScriptedGateway,
    query::QueryApi,
    types::{CommissionKind, ScheduleKind, Tier},
};
use rust_decimal::Decimal;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let period = arg(&args, "--period").unwrap_or_else(|| "2026-08".to_string());
    let db = arg(&args, "--db").unwrap_or_else(|| ":memory:".to_string());
    let approver = arg(&args, "--approver").unwrap_or_else(|| "ops.lead".to_string());

    println!("payout-runner");
    println!("  period:   {period}");
    println!("  db:       {db}");
    println!();

    let hierarchy = match arg(&args, "--partners") {
        Some(path) => HierarchySnapshot::load(Path::new(&path))?,
        None => demo_hierarchy()?,
    };
    let rules = match arg(&args, "--rules") {
        Some(path) => RuleSet::load(Path::new(&path))?,
        None => demo_rules()?,
    };
    let feed = match arg(&args, "--feed") {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
        None => demo_feed(&period, &hierarchy),
    };

    let store = if db == ":memory:" {
        commission_core::store::LedgerStore::in_memory()?
    } else {
        commission_core::store::LedgerStore::open(&db)?
    };

    let mut config = EngineConfig::default();
    config.channels = vec![
        channel("ach", "0", "0.25"),
        channel("wire", "0.002", "5.00"),
    ];
    let channels: Vec<String> = config
        .channels
        .iter()
        .map(|c| c.channel_id.clone())
        .collect();
    let mut engine = CommissionEngine::new(store, config)?;
    for channel_id in &channels {
        log::debug!("registering scripted gateway for channel {channel_id}");
        engine.register_gateway(Arc::new(ScriptedGateway::new(channel_id)));
    }

    let calcs = engine.run_period(&feed, &hierarchy, &rules)?;
    println!("calculated {} commission rows for {period}", calcs.len());

    let batch_ids = engine.compose(ScheduleKind::Monthly)?;
    println!("composed {} batch(es)", batch_ids.len());

    for batch_id in &batch_ids {
        let needs_approval = {
            let ledger = lock(&engine)?;
            ledger.get_batch(batch_id)?.requires_approval
        };
        if needs_approval {
            engine.approve_batch(batch_id, &approver)?;
            println!("  {batch_id} approved by {approver}");
        }
        let report = engine.execute_batch(batch_id)?;
        println!(
            "  {batch_id}: {} ({} completed, {} manual review)",
            report.status, report.completed, report.manual_review
        );
    }

    print_summary(&engine, &batch_ids)?;
    Ok(())
}

fn print_summary(engine: &CommissionEngine, batch_ids: &[String]) -> Result<()> {
    let ledger = lock(engine)?;
    let query = QueryApi::new(&ledger);

    println!();
    println!("=== RUN SUMMARY ===");
    for batch_id in batch_ids {
        let summary = query.batch_summary(batch_id)?;
        println!(
            "  {batch_id} [{} / {}] total {} {} -> completed {}",
            summary.batch.channel,
            summary.batch.status,
            summary.batch.total_amount,
            summary.batch.currency,
            summary.completed_total,
        );
    }
    let unresolved = query.manual_review_payouts()?;
    println!("  manual review:  {}", unresolved.len());
    println!(
        "  community fund: {}",
        query.community_fund_balance(engine.fund_partner())?
    );
    Ok(())
}

fn lock(
    engine: &CommissionEngine,
) -> Result<std::sync::MutexGuard<'_, commission_core::store::LedgerStore>> {
    engine
        .store()
        .lock()
        .map_err(|_| anyhow::anyhow!("ledger store lock poisoned"))
}

fn demo_hierarchy() -> Result<HierarchySnapshot> {
    let partners = vec![
        demo_partner("alpha", Tier::Tier1, None, "wire", "250000", 40, "0.93"),
        demo_partner("bravo", Tier::Tier2, Some("alpha"), "wire", "120000", 14, "0.88"),
        demo_partner("charlie", Tier::Tier3, Some("bravo"), "ach", "40000", 6, "0.81"),
        demo_partner("delta", Tier::Tier3, Some("bravo"), "ach", "36000", 4, "0.77"),
        demo_partner("echo", Tier::Tier4, Some("charlie"), "ach", "12000", 0, "0.70"),
    ];
    Ok(HierarchySnapshot::new(partners)?)
}

fn demo_partner(
    id: &str,
    tier: Tier,
    parent: Option<&str>,
    channel: &str,
    volume: &str,
    team_size: u32,
    retention: &str,
) -> PartnerConfig {
    PartnerConfig {
        id: id.to_string(),
        name: id.to_string(),
        tier,
        parent_id: parent.map(|p| p.to_string()),
        channel: channel.to_string(),
        monthly_volume: dec(volume),
        team_size,
        retention_rate: dec(retention),
        active: true,
    }
}

fn demo_rules() -> Result<RuleSet> {
    let mut direct_t3 = demo_rule("direct-t3", Tier::Tier3, CommissionKind::Direct, "0.10");
    direct_t3.community_multiplier = dec("1.2");
    direct_t3.carve_out_rate = dec("0.02");
    let mut direct_t4 = demo_rule("direct-t4", Tier::Tier4, CommissionKind::Direct, "0.08");
    direct_t4.min_volume = dec("5000");
    let mut leadership = demo_rule("lead-t2", Tier::Tier2, CommissionKind::Leadership, "0.01");
    leadership.requirements = PerformanceRequirements {
        min_team_size: Some(10),
        min_retention_rate: Some(dec("0.85")),
        min_personal_volume: None,
    };
    Ok(RuleSet::new(vec![
        direct_t3,
        direct_t4,
        demo_rule("ind-t2", Tier::Tier2, CommissionKind::Indirect, "0.03"),
        demo_rule("ind-t1", Tier::Tier1, CommissionKind::Indirect, "0.01"),
        leadership,
    ])?)
}

fn demo_rule(id: &str, tier: Tier, kind: CommissionKind, rate: &str) -> RuleConfig {
    RuleConfig {
        id: id.to_string(),
        tier,
        kind,
        base_rate: dec(rate),
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

/// One revenue event per partner at its configured monthly volume.
fn demo_feed(period: &str, hierarchy: &HierarchySnapshot) -> RevenueFeed {
    RevenueFeed {
        period: period.to_string(),
        currency: "USD".to_string(),
        events: hierarchy
            .partners()
            .iter()
            .map(|p| RevenueEvent {
                partner_id: p.id.clone(),
                amount: p.monthly_volume,
                currency: "USD".to_string(),
                event_time: Utc::now(),
            })
            .collect(),
    }
}

fn channel(id: &str, fee_rate: &str, flat_fee: &str) -> ChannelConfig {
    ChannelConfig {
        channel_id: id.to_string(),
        fee_rate: dec(fee_rate),
        flat_fee: dec(flat_fee),
        max_in_flight: 4,
    }
}

fn arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or(Decimal::ZERO)
}
