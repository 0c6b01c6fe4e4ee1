//! The commission engine wires the ledger store, calculator, batch
//! composer, approval gate, and payout executor into one pipeline.
//!
//! CONTROL FLOW (fixed, documented):
//!   run_period  -> persist calculations (all-or-nothing)
//!   compose     -> batches + payouts, approval flag decided
//!   approve / reject / cancel -> approval gate
//!   execute_batch -> per-channel worker pools, status updates
//!
//! RULES:
//!   - The store is the single owner of persisted state.
//!   - Configuration snapshots are read-only; refresh = new snapshot.
//!   - Every engine operation appends to the audit event log.

use crate::{
    approval::ApprovalGate,
    calculator::{CommissionCalculation, CommissionCalculator, RevenueFeed},
    composer::BatchComposer,
    config::{
        CalculatorConfig, ChannelConfig, ComposerConfig, ExecutorConfig, HierarchySnapshot,
        RuleSet,
    },
    error::{EngineError, EngineResult},
    event::{EngineEvent, EventLogEntry},
    executor::{BatchExecutionReport, PayoutExecutor},
    gateway::PaymentGateway,
    store::LedgerStore,
    types::{BatchId, ChannelId, ScheduleKind, Tier},
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct EngineConfig {
    pub calculator: CalculatorConfig,
    pub composer: ComposerConfig,
    pub executor: ExecutorConfig,
    pub channels: Vec<ChannelConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calculator: CalculatorConfig::default(),
            composer: ComposerConfig::default(),
            executor: ExecutorConfig::default(),
            channels: vec![ChannelConfig {
                channel_id: "ach".to_string(),
                fee_rate: Decimal::ZERO,
                flat_fee: Decimal::ZERO,
                max_in_flight: 4,
            }],
        }
    }
}

pub struct CommissionEngine {
    store: Mutex<LedgerStore>,
    calculator: CommissionCalculator,
    composer: BatchComposer,
    executor: PayoutExecutor,
    channels: Vec<ChannelConfig>,
    gateways: HashMap<ChannelId, Arc<dyn PaymentGateway>>,
}

impl CommissionEngine {
    pub fn new(store: LedgerStore, config: EngineConfig) -> EngineResult<Self> {
        store.migrate()?;
        store.ensure_community_fund(&config.calculator.community_fund_partner)?;
        Ok(Self {
            store: Mutex::new(store),
            calculator: CommissionCalculator::new(config.calculator),
            composer: BatchComposer::new(config.composer),
            executor: PayoutExecutor::new(config.executor),
            channels: config.channels,
            gateways: HashMap::new(),
        })
    }

    pub fn register_gateway(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways
            .insert(gateway.channel_id().to_string(), gateway);
    }

    /// The ledger store, for read access in tools and tests.
    pub fn store(&self) -> &Mutex<LedgerStore> {
        &self.store
    }

    pub fn fund_partner(&self) -> &str {
        &self.calculator.config().community_fund_partner
    }

    /// Run the calculator over a closed period and persist the result.
    ///
    /// Idempotent: a period already calculated is left untouched and
    /// its existing rows are returned. Failures persist nothing.
    pub fn run_period(
        &self,
        feed: &RevenueFeed,
        hierarchy: &HierarchySnapshot,
        rules: &RuleSet,
    ) -> EngineResult<Vec<CommissionCalculation>> {
        let ledger = self.lock()?;
        ledger.sync_hierarchy(hierarchy)?;
        ledger.persist_rules(rules)?;

        if ledger.period_has_calculations(&feed.period)? {
            log::info!("period {} already calculated, skipping", feed.period);
            return ledger.calculations_for_period(&feed.period);
        }

        let calcs = self.calculator.calculate(feed, hierarchy, rules)?;
        ledger.insert_calculations(&calcs)?;

        let fund = self.fund_partner();
        let total_net: Decimal = calcs
            .iter()
            .filter(|c| c.partner_id != fund)
            .map(|c| c.net_amount)
            .sum();
        let total_carve_out: Decimal = calcs
            .iter()
            .filter(|c| c.partner_id == fund)
            .map(|c| c.net_amount)
            .sum();
        self.append_event(
            &ledger,
            "calculator",
            &EngineEvent::PeriodCalculated {
                period: feed.period.clone(),
                calculation_count: calcs.len(),
                total_net,
                total_carve_out,
            },
        )?;
        Ok(calcs)
    }

    /// Compose all unbatched calculations into batches for a schedule.
    pub fn compose(&self, schedule: ScheduleKind) -> EngineResult<Vec<BatchId>> {
        let ledger = self.lock()?;
        let fund = self.fund_partner().to_string();
        let batch_ids = self
            .composer
            .compose(&ledger, schedule, &self.channels, &fund)?;
        for batch_id in &batch_ids {
            let batch = ledger.get_batch(batch_id)?;
            let payout_count = ledger.payouts_for_batch(batch_id)?.len();
            self.append_event(
                &ledger,
                "composer",
                &EngineEvent::BatchComposed {
                    batch_id: batch_id.clone(),
                    schedule: batch.schedule.as_str().to_string(),
                    currency: batch.currency.clone(),
                    channel: batch.channel.clone(),
                    payout_count,
                    total_amount: batch.total_amount,
                    requires_approval: batch.requires_approval,
                },
            )?;
        }
        Ok(batch_ids)
    }

    pub fn approve_batch(&self, batch_id: &str, approver_id: &str) -> EngineResult<()> {
        let ledger = self.lock()?;
        ApprovalGate::approve(&ledger, batch_id, approver_id)?;
        self.append_event(
            &ledger,
            "approval",
            &EngineEvent::BatchApproved {
                batch_id: batch_id.to_string(),
                approver_id: approver_id.to_string(),
            },
        )
    }

    pub fn reject_batch(
        &self,
        batch_id: &str,
        approver_id: &str,
        reason: &str,
    ) -> EngineResult<()> {
        let ledger = self.lock()?;
        ApprovalGate::reject(&ledger, batch_id, approver_id, reason)?;
        self.append_event(
            &ledger,
            "approval",
            &EngineEvent::BatchRejected {
                batch_id: batch_id.to_string(),
                approver_id: approver_id.to_string(),
                reason: reason.to_string(),
            },
        )
    }

    pub fn cancel_batch(&self, batch_id: &str) -> EngineResult<()> {
        let ledger = self.lock()?;
        self.composer.cancel(&ledger, batch_id)?;
        self.append_event(
            &ledger,
            "composer",
            &EngineEvent::BatchCancelled {
                batch_id: batch_id.to_string(),
            },
        )
    }

    /// Execute an approved batch through the per-channel worker pools.
    /// Re-invoking on a batch left `Executing` by an interrupted run
    /// resumes it.
    pub fn execute_batch(&self, batch_id: &str) -> EngineResult<BatchExecutionReport> {
        let report =
            self.executor
                .execute_batch(&self.store, batch_id, &self.gateways, &self.channels)?;
        let ledger = self.lock()?;
        self.append_event(
            &ledger,
            "executor",
            &EngineEvent::BatchExecuted {
                batch_id: report.batch_id.clone(),
                status: report.status.as_str().to_string(),
                completed: report.completed,
                manual_review: report.manual_review,
            },
        )?;
        Ok(report)
    }

    /// Record an external chargeback or complaint against a completed
    /// payout. The funds already moved; the dispute is worked outside
    /// the engine.
    pub fn dispute_payout(&self, payout_id: &str) -> EngineResult<()> {
        let ledger = self.lock()?;
        ledger.dispute_payout(payout_id)?;
        self.append_event(
            &ledger,
            "ledger",
            &EngineEvent::PayoutDisputed {
                payout_id: payout_id.to_string(),
            },
        )
    }

    /// Promote a partner to a higher tier. The only tier mutation.
    pub fn promote_partner(&self, partner_id: &str, new_tier: Tier) -> EngineResult<()> {
        let ledger = self.lock()?;
        let old_tier = ledger.promote_partner(partner_id, new_tier)?;
        self.append_event(
            &ledger,
            "ledger",
            &EngineEvent::PartnerPromoted {
                partner_id: partner_id.to_string(),
                from_tier: old_tier.to_string(),
                to_tier: new_tier.to_string(),
            },
        )
    }

    fn append_event(
        &self,
        ledger: &LedgerStore,
        component: &str,
        event: &EngineEvent,
    ) -> EngineResult<()> {
        ledger.append_event(&EventLogEntry::for_event(component, event)?)
    }

    fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, LedgerStore>> {
        self.store
            .lock()
            .map_err(|_| EngineError::Other(anyhow::anyhow!("ledger store lock poisoned")))
    }
}
