//! Approval gate: the human-in-the-loop checkpoint between batch
//! composition and execution.
//!
//! Decisions are valid only while a batch is AwaitingApproval. The
//! executor independently refuses non-Approved batches, so the gate is
//! enforced at both ends rather than by convention.

use crate::{
    error::{EngineError, EngineResult},
    store::LedgerStore,
    types::BatchStatus,
};

pub struct ApprovalGate;

impl ApprovalGate {
    /// Record an approval decision: AwaitingApproval -> Approved.
    pub fn approve(store: &LedgerStore, batch_id: &str, approver_id: &str) -> EngineResult<()> {
        let batch = store.get_batch(batch_id)?;
        if batch.status != BatchStatus::AwaitingApproval {
            return Err(EngineError::ApprovalState {
                batch_id: batch_id.to_string(),
                status: batch.status,
                required: BatchStatus::AwaitingApproval,
            });
        }
        store.transition_batch(batch_id, BatchStatus::Approved)?;
        store.record_batch_decision(batch_id, approver_id, None)?;
        log::info!("batch {batch_id} approved by {approver_id}");
        Ok(())
    }

    /// Record a rejection: AwaitingApproval -> Rejected (terminal).
    /// The batch's calculations are released for re-batching in a
    /// future cycle.
    pub fn reject(
        store: &LedgerStore,
        batch_id: &str,
        approver_id: &str,
        reason: &str,
    ) -> EngineResult<i64> {
        let batch = store.get_batch(batch_id)?;
        if batch.status != BatchStatus::AwaitingApproval {
            return Err(EngineError::ApprovalState {
                batch_id: batch_id.to_string(),
                status: batch.status,
                required: BatchStatus::AwaitingApproval,
            });
        }
        store.transition_batch(batch_id, BatchStatus::Rejected)?;
        store.record_batch_decision(batch_id, approver_id, Some(reason))?;
        let released = store.release_calculations_for_batch(batch_id)?;
        log::info!("batch {batch_id} rejected by {approver_id}: {reason}");
        Ok(released)
    }
}
