use crate::types::{BatchId, BatchStatus, PartnerId, PayoutId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Configuration errors: fatal, nothing persisted, operator-facing.
    #[error("Partner hierarchy contains a cycle through '{partner_id}'")]
    CyclicHierarchy { partner_id: PartnerId },

    #[error("Partner '{partner_id}' references unknown parent '{parent_id}'")]
    UnknownParent {
        partner_id: PartnerId,
        parent_id: PartnerId,
    },

    #[error("Partner '{partner_id}' ({tier}) sits more than one rank above its parent ({parent_tier})")]
    TierAboveParent {
        partner_id: PartnerId,
        tier: String,
        parent_tier: String,
    },

    #[error("Rule '{rule_id}' is invalid: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("Active rules '{first}' and '{second}' conflict on ({tier}, {kind}) with equal priority")]
    ConflictingRules {
        first: String,
        second: String,
        tier: String,
        kind: String,
    },

    #[error("Rules over-allocate for tier {tier}: worst-case share {share} exceeds 1")]
    OverAllocation { tier: String, share: String },

    #[error("Unknown partner '{partner_id}'")]
    UnknownPartner { partner_id: PartnerId },

    // State machine violations: programming/ops errors, never silent.
    #[error("Illegal {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Batch '{batch_id}' is {status:?}; operation requires {required:?}")]
    ApprovalState {
        batch_id: BatchId,
        status: BatchStatus,
        required: BatchStatus,
    },

    #[error("Demotion of '{partner_id}' is not a promotion")]
    InvalidPromotion { partner_id: PartnerId },

    // Expected under concurrent execution; retried by the caller.
    #[error("Version conflict on payout '{payout_id}'")]
    VersionConflict { payout_id: PayoutId },

    #[error("Out-of-order ledger apply for partner '{partner_id}': batch seq {batch_seq} behind {last_applied}")]
    OrderingViolation {
        partner_id: PartnerId,
        batch_seq: i64,
        last_applied: i64,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
