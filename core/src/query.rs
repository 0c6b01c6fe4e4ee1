//! Read-only batch/payout query surface for reconciliation and
//! reporting collaborators. No mutation passes through here.

use crate::{
    error::EngineResult,
    store::{BatchRow, LedgerStore, PayoutRow},
    types::PayoutStatus,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Current state of a batch and its payouts, as reconciliation sees it.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch: BatchRow,
    pub payout_counts: HashMap<PayoutStatus, i64>,
    pub completed_total: Decimal,
}

pub struct QueryApi<'a> {
    store: &'a LedgerStore,
}

impl<'a> QueryApi<'a> {
    pub fn new(store: &'a LedgerStore) -> Self {
        Self { store }
    }

    pub fn batch_summary(&self, batch_id: &str) -> EngineResult<BatchSummary> {
        let batch = self.store.get_batch(batch_id)?;
        let payout_counts = self.store.payout_status_counts(batch_id)?;
        let completed_total = self
            .store
            .payouts_with_status(batch_id, PayoutStatus::Completed)?
            .iter()
            .map(|p| p.net_amount)
            .sum();
        Ok(BatchSummary {
            batch,
            payout_counts,
            completed_total,
        })
    }

    pub fn payouts_for_batch(&self, batch_id: &str) -> EngineResult<Vec<PayoutRow>> {
        self.store.payouts_for_batch(batch_id)
    }

    /// Everything parked for a human, across all batches.
    pub fn manual_review_payouts(&self) -> EngineResult<Vec<PayoutRow>> {
        self.store.manual_review_payouts()
    }

    /// A partially-completed batch's unresolved payouts, the input to
    /// a follow-up corrective batch. Completed payouts never reappear.
    pub fn unresolved_payouts(&self, batch_id: &str) -> EngineResult<Vec<PayoutRow>> {
        self.store
            .payouts_with_status(batch_id, PayoutStatus::ManualReview)
    }

    pub fn community_fund_balance(&self, fund_partner: &str) -> EngineResult<Decimal> {
        self.store.community_fund_balance(fund_partner)
    }
}
