//! The audit event log. Every state change the engine makes is
//! recorded as a serialized event.
//!
//! RULE: events are append-only. Variants are added as the engine
//! grows, never removed or reordered.

use crate::types::{BatchId, PartnerId, PayoutId, Period};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // ── Calculator ─────────────────────────────────
    PeriodCalculated {
        period: Period,
        calculation_count: usize,
        total_net: Decimal,
        total_carve_out: Decimal,
    },

    // ── Composer / approval gate ───────────────────
    BatchComposed {
        batch_id: BatchId,
        schedule: String,
        currency: String,
        channel: String,
        payout_count: usize,
        total_amount: Decimal,
        requires_approval: bool,
    },
    BatchApproved {
        batch_id: BatchId,
        approver_id: String,
    },
    BatchRejected {
        batch_id: BatchId,
        approver_id: String,
        reason: String,
    },
    BatchCancelled {
        batch_id: BatchId,
    },

    // ── Executor ───────────────────────────────────
    PayoutCompleted {
        payout_id: PayoutId,
        partner_id: PartnerId,
        net_amount: Decimal,
        attempts: u32,
    },
    PayoutManualReview {
        payout_id: PayoutId,
        partner_id: PartnerId,
        reason: String,
    },
    PayoutDisputed {
        payout_id: PayoutId,
    },
    BatchExecuted {
        batch_id: BatchId,
        status: String,
        completed: i64,
        manual_review: i64,
    },

    // ── Ledger maintenance ─────────────────────────
    PartnerPromoted {
        partner_id: PartnerId,
        from_tier: String,
        to_tier: String,
    },
}

/// Stable type name for an event, used as the `event_type` column.
pub fn event_type_name(event: &EngineEvent) -> &'static str {
    match event {
        EngineEvent::PeriodCalculated { .. } => "period_calculated",
        EngineEvent::BatchComposed { .. } => "batch_composed",
        EngineEvent::BatchApproved { .. } => "batch_approved",
        EngineEvent::BatchRejected { .. } => "batch_rejected",
        EngineEvent::BatchCancelled { .. } => "batch_cancelled",
        EngineEvent::PayoutCompleted { .. } => "payout_completed",
        EngineEvent::PayoutManualReview { .. } => "payout_manual_review",
        EngineEvent::PayoutDisputed { .. } => "payout_disputed",
        EngineEvent::BatchExecuted { .. } => "batch_executed",
        EngineEvent::PartnerPromoted { .. } => "partner_promoted",
    }
}

/// A persisted row in the `event_log` table.
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub component: String,
    pub event_type: String,
    pub payload: String,
    pub recorded_at: String,
}

impl EventLogEntry {
    /// Build a log row for `event` as recorded by `component`.
    pub fn for_event(component: &str, event: &EngineEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: None,
            component: component.to_string(),
            event_type: event_type_name(event).to_string(),
            payload: serde_json::to_string(event)?,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}
