use super::{decimal_col, enum_col, now_rfc3339, BatchRow, LedgerStore};
use crate::{
    error::{EngineError, EngineResult},
    types::{BatchStatus, ScheduleKind},
};
use rusqlite::params;

fn batch_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchRow> {
    Ok(BatchRow {
        batch_seq: row.get(0)?,
        batch_id: row.get(1)?,
        schedule: enum_col(row, 2, ScheduleKind::parse)?,
        currency: row.get(3)?,
        channel: row.get(4)?,
        status: enum_col(row, 5, BatchStatus::parse)?,
        requires_approval: row.get::<_, i32>(6)? != 0,
        total_amount: decimal_col(row, 7)?,
        created_at: row.get(8)?,
        approver_id: row.get(9)?,
        decided_at: row.get(10)?,
        reject_reason: row.get(11)?,
    })
}

const BATCH_COLUMNS: &str = "batch_seq, batch_id, schedule, currency, channel, status,
                requires_approval, total_amount, created_at,
                approver_id, decided_at, reject_reason";

impl LedgerStore {
    // ── Payout batches ──────────────────────────────────────────

    /// Insert a new Forming batch; returns its monotonic creation seq.
    pub fn insert_batch(
        &self,
        batch_id: &str,
        schedule: ScheduleKind,
        currency: &str,
        channel: &str,
        requires_approval: bool,
        total_amount: &str,
    ) -> EngineResult<i64> {
        self.conn.execute(
            "INSERT INTO payout_batch (
                batch_id, schedule, currency, channel, status,
                requires_approval, total_amount, created_at
            ) VALUES (?1, ?2, ?3, ?4, 'forming', ?5, ?6, ?7)",
            params![
                batch_id,
                schedule.as_str(),
                currency,
                channel,
                if requires_approval { 1 } else { 0 },
                total_amount,
                now_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_batch(&self, batch_id: &str) -> EngineResult<BatchRow> {
        self.conn
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM payout_batch WHERE batch_id = ?1"),
                params![batch_id],
                batch_row_mapper,
            )
            .map_err(Into::into)
    }

    pub fn batches_with_status(&self, status: BatchStatus) -> EngineResult<Vec<BatchRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BATCH_COLUMNS} FROM payout_batch WHERE status = ?1
             ORDER BY batch_seq ASC"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], batch_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Advance a batch's status. Forward-only: illegal transitions are
    /// rejected, and the guarded UPDATE ensures the state read is the
    /// state replaced even under concurrent callers.
    pub fn transition_batch(&self, batch_id: &str, next: BatchStatus) -> EngineResult<()> {
        let current = self.get_batch(batch_id)?.status;
        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                entity: "batch",
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        let updated = self.conn.execute(
            "UPDATE payout_batch SET status = ?1 WHERE batch_id = ?2 AND status = ?3",
            params![next.as_str(), batch_id, current.as_str()],
        )?;
        if updated == 0 {
            return Err(EngineError::InvalidTransition {
                entity: "batch",
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn record_batch_decision(
        &self,
        batch_id: &str,
        approver_id: &str,
        reject_reason: Option<&str>,
    ) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE payout_batch SET approver_id = ?1, decided_at = ?2, reject_reason = ?3
             WHERE batch_id = ?4",
            params![approver_id, now_rfc3339(), reject_reason, batch_id],
        )?;
        Ok(())
    }

    pub fn batch_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM payout_batch", [], |row| row.get(0))
            .map_err(Into::into)
    }
}
