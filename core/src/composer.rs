//! Batch composer: groups unassigned calculations into payout batches
//! by (schedule, currency, payout channel).
//!
//! Composing is idempotent: a calculation carries its batch id once
//! assigned and is never picked up again. Per partner, all of a batch's
//! calculations collapse into a single payout row per channel.

use crate::{
    calculator::CommissionCalculation,
    config::{ChannelConfig, ComposerConfig},
    error::EngineResult,
    money,
    store::{LedgerStore, PayoutRow},
    types::{BatchId, BatchStatus, ChannelId, PartnerId, PayoutStatus, ScheduleKind},
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub struct BatchComposer {
    config: ComposerConfig,
}

impl BatchComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self { config }
    }

    /// Compose all currently unbatched calculations into batches for
    /// the given schedule. Returns the new batch ids, possibly empty.
    pub fn compose(
        &self,
        store: &LedgerStore,
        schedule: ScheduleKind,
        channels: &[ChannelConfig],
        fund_partner: &str,
    ) -> EngineResult<Vec<BatchId>> {
        let calcs = store.unbatched_calculations(fund_partner)?;
        if calcs.is_empty() {
            return Ok(Vec::new());
        }

        // Payout channel comes from the partner record; cache lookups.
        let mut partner_channel: HashMap<PartnerId, ChannelId> = HashMap::new();
        let mut groups: BTreeMap<(String, ChannelId), Vec<&CommissionCalculation>> =
            BTreeMap::new();
        for calc in &calcs {
            let channel = match partner_channel.get(&calc.partner_id) {
                Some(c) => c.clone(),
                None => {
                    let c = store.get_partner(&calc.partner_id)?.channel;
                    partner_channel.insert(calc.partner_id.clone(), c.clone());
                    c
                }
            };
            groups
                .entry((calc.currency.clone(), channel))
                .or_default()
                .push(calc);
        }

        let sign_off = self.config.sign_off_schedules.contains(&schedule);
        let mut batch_ids = Vec::with_capacity(groups.len());

        for ((currency, channel), group) in groups {
            let total: Decimal = group.iter().map(|c| c.net_amount).sum();
            let requires_approval = sign_off || total > self.config.approval_threshold;

            let batch_id = format!("batch-{}", Uuid::new_v4());
            store.insert_batch(
                &batch_id,
                schedule,
                &currency,
                &channel,
                requires_approval,
                &total.to_string(),
            )?;

            let calc_ids: Vec<String> = group.iter().map(|c| c.calc_id.clone()).collect();
            store.assign_calculations_to_batch(&calc_ids, &batch_id)?;

            // One payout per (batch, partner, channel).
            let mut per_partner: BTreeMap<PartnerId, Decimal> = BTreeMap::new();
            for calc in &group {
                *per_partner.entry(calc.partner_id.clone()).or_default() += calc.net_amount;
            }

            let channel_config = channels.iter().find(|c| c.channel_id == channel);
            let (fee_rate, flat_fee) = channel_config
                .map(|c| (c.fee_rate, c.flat_fee))
                .unwrap_or((Decimal::ZERO, Decimal::ZERO));

            let payouts: Vec<PayoutRow> = per_partner
                .into_iter()
                .map(|(partner_id, gross)| {
                    let fee = money::round_minor(flat_fee + gross * fee_rate, &currency);
                    let net = money::non_negative(gross - fee);
                    PayoutRow {
                        payout_id: format!("po-{batch_id}-{partner_id}"),
                        batch_id: batch_id.clone(),
                        partner_id: partner_id.clone(),
                        channel: channel.clone(),
                        currency: currency.clone(),
                        gross_amount: gross,
                        fee_amount: fee,
                        net_amount: net,
                        idempotency_key: format!("{batch_id}:{partner_id}:{channel}"),
                        status: PayoutStatus::Pending,
                        attempt_count: 0,
                        last_error: None,
                        version: 0,
                    }
                })
                .collect();
            store.insert_payouts(&payouts)?;

            let next = if requires_approval {
                BatchStatus::AwaitingApproval
            } else {
                BatchStatus::Approved
            };
            store.transition_batch(&batch_id, next)?;

            log::info!(
                "composed {batch_id}: schedule={schedule} currency={currency} \
                 channel={channel} payouts={} total={total} approval={requires_approval}",
                payouts.len()
            );
            batch_ids.push(batch_id);
        }

        Ok(batch_ids)
    }

    /// Cancel a batch still in Forming or AwaitingApproval. Releases
    /// its calculations for a future composition cycle.
    pub fn cancel(&self, store: &LedgerStore, batch_id: &str) -> EngineResult<i64> {
        store.transition_batch(batch_id, BatchStatus::Cancelled)?;
        store.release_calculations_for_batch(batch_id)
    }
}
