use super::{decimal_col, enum_col, LedgerStore, PayoutRow};
use crate::{
    error::{EngineError, EngineResult},
    types::PayoutStatus,
};
use rusqlite::params;
use std::collections::HashMap;

fn payout_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<PayoutRow> {
    Ok(PayoutRow {
        payout_id: row.get(0)?,
        batch_id: row.get(1)?,
        partner_id: row.get(2)?,
        channel: row.get(3)?,
        currency: row.get(4)?,
        gross_amount: decimal_col(row, 5)?,
        fee_amount: decimal_col(row, 6)?,
        net_amount: decimal_col(row, 7)?,
        idempotency_key: row.get(8)?,
        status: enum_col(row, 9, PayoutStatus::parse)?,
        attempt_count: row.get::<_, i64>(10)? as u32,
        last_error: row.get(11)?,
        version: row.get(12)?,
    })
}

const PAYOUT_COLUMNS: &str = "payout_id, batch_id, partner_id, channel, currency,
                gross_amount, fee_amount, net_amount, idempotency_key,
                status, attempt_count, last_error, version";

impl LedgerStore {
    // ── Payouts ─────────────────────────────────────────────────
    //
    // Every status transition is a single guarded UPDATE matching the
    // expected version. Zero rows updated means another worker won the
    // race; callers treat that as VersionConflict and re-read.

    pub fn insert_payouts(&self, payouts: &[PayoutRow]) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for p in payouts {
            tx.execute(
                "INSERT INTO payout (
                    payout_id, batch_id, partner_id, channel, currency,
                    gross_amount, fee_amount, net_amount, idempotency_key, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending')",
                params![
                    p.payout_id,
                    p.batch_id,
                    p.partner_id,
                    p.channel,
                    p.currency,
                    p.gross_amount.to_string(),
                    p.fee_amount.to_string(),
                    p.net_amount.to_string(),
                    p.idempotency_key,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_payout(&self, payout_id: &str) -> EngineResult<PayoutRow> {
        self.conn
            .query_row(
                &format!("SELECT {PAYOUT_COLUMNS} FROM payout WHERE payout_id = ?1"),
                params![payout_id],
                payout_row_mapper,
            )
            .map_err(Into::into)
    }

    pub fn payouts_for_batch(&self, batch_id: &str) -> EngineResult<Vec<PayoutRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout WHERE batch_id = ?1
             ORDER BY payout_id ASC"
        ))?;
        let rows = stmt.query_map(params![batch_id], payout_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn payouts_with_status(
        &self,
        batch_id: &str,
        status: PayoutStatus,
    ) -> EngineResult<Vec<PayoutRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout WHERE batch_id = ?1 AND status = ?2
             ORDER BY payout_id ASC"
        ))?;
        let rows = stmt.query_map(params![batch_id, status.as_str()], payout_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Claim a pending payout for submission: Pending -> Submitted,
    /// attempt count incremented, version bumped.
    pub fn claim_payout(&self, payout_id: &str, expected_version: i64) -> EngineResult<()> {
        let updated = self.conn.execute(
            "UPDATE payout
             SET status = 'submitted', attempt_count = attempt_count + 1,
                 version = version + 1
             WHERE payout_id = ?1 AND version = ?2 AND status = 'pending'",
            params![payout_id, expected_version],
        )?;
        if updated == 0 {
            return Err(EngineError::VersionConflict {
                payout_id: payout_id.to_string(),
            });
        }
        Ok(())
    }

    /// Commit a successful submission: Submitted -> Completed.
    ///
    /// Enforces the per-partner ordering fence: a completion from an
    /// earlier batch must never land after a later batch has already
    /// been applied to the partner's ledger.
    pub fn complete_payout(
        &self,
        payout_id: &str,
        expected_version: i64,
        batch_seq: i64,
    ) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let (partner_id, last_applied): (String, i64) = tx.query_row(
            "SELECT p.partner_id, pa.last_applied_batch_seq
             FROM payout p JOIN partner pa ON pa.partner_id = p.partner_id
             WHERE p.payout_id = ?1",
            params![payout_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if batch_seq < last_applied {
            return Err(EngineError::OrderingViolation {
                partner_id,
                batch_seq,
                last_applied,
            });
        }

        let updated = tx.execute(
            "UPDATE payout SET status = 'completed', last_error = NULL,
                 version = version + 1
             WHERE payout_id = ?1 AND version = ?2 AND status = 'submitted'",
            params![payout_id, expected_version],
        )?;
        if updated == 0 {
            return Err(EngineError::VersionConflict {
                payout_id: payout_id.to_string(),
            });
        }

        tx.execute(
            "UPDATE partner SET last_applied_batch_seq = MAX(last_applied_batch_seq, ?1)
             WHERE partner_id = ?2",
            params![batch_seq, partner_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Record a failed submission. With retry budget left the payout
    /// returns to Pending for another attempt; otherwise it parks in
    /// ManualReview for a human.
    pub fn fail_payout(
        &self,
        payout_id: &str,
        expected_version: i64,
        error: &str,
        will_retry: bool,
    ) -> EngineResult<()> {
        let next = if will_retry { "pending" } else { "manual_review" };
        let updated = self.conn.execute(
            "UPDATE payout SET status = ?1, last_error = ?2, version = version + 1
             WHERE payout_id = ?3 AND version = ?4 AND status = 'submitted'",
            params![next, error, payout_id, expected_version],
        )?;
        if updated == 0 {
            return Err(EngineError::VersionConflict {
                payout_id: payout_id.to_string(),
            });
        }
        Ok(())
    }

    /// External chargeback or complaint against a completed payout.
    pub fn dispute_payout(&self, payout_id: &str) -> EngineResult<()> {
        let current = self.get_payout(payout_id)?;
        if current.status != PayoutStatus::Completed {
            return Err(EngineError::InvalidTransition {
                entity: "payout",
                from: current.status.as_str().to_string(),
                to: PayoutStatus::Disputed.as_str().to_string(),
            });
        }
        self.conn.execute(
            "UPDATE payout SET status = 'disputed', version = version + 1
             WHERE payout_id = ?1 AND status = 'completed'",
            params![payout_id],
        )?;
        Ok(())
    }

    pub fn payout_status_counts(
        &self,
        batch_id: &str,
    ) -> EngineResult<HashMap<PayoutStatus, i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM payout WHERE batch_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok((enum_col(row, 0, PayoutStatus::parse)?, row.get::<_, i64>(1)?))
        })?;
        rows.collect::<Result<HashMap<_, _>, _>>().map_err(Into::into)
    }

    pub fn manual_review_payouts(&self) -> EngineResult<Vec<PayoutRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout WHERE status = 'manual_review'
             ORDER BY payout_id ASC"
        ))?;
        let rows = stmt.query_map([], payout_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
