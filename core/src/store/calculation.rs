use super::{decimal_col, enum_col, now_rfc3339, LedgerStore};
use crate::{
    calculator::CommissionCalculation,
    error::EngineResult,
    types::{CommissionKind, Period},
};
use rusqlite::params;
use rust_decimal::Decimal;

fn calculation_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommissionCalculation> {
    Ok(CommissionCalculation {
        calc_id: row.get(0)?,
        period: row.get(1)?,
        partner_id: row.get(2)?,
        rule_id: row.get(3)?,
        kind: enum_col(row, 4, CommissionKind::parse)?,
        currency: row.get(5)?,
        base_amount: decimal_col(row, 6)?,
        bonus_amount: decimal_col(row, 7)?,
        carve_out_amount: decimal_col(row, 8)?,
        net_amount: decimal_col(row, 9)?,
        batch_id: row.get(10)?,
    })
}

const CALC_COLUMNS: &str = "calc_id, period, partner_id, rule_id, kind, currency,
                base_amount, bonus_amount, carve_out_amount, net_amount, batch_id";

impl LedgerStore {
    // ── Commission calculations ─────────────────────────────────
    //
    // Rows are immutable once created. Corrections are new offsetting
    // rows, never in-place edits.

    pub fn period_has_calculations(&self, period: &str) -> EngineResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM commission_calculation WHERE period = ?1",
            params![period],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Persist a period's calculations all-or-nothing.
    pub fn insert_calculations(&self, calcs: &[CommissionCalculation]) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let created_at = now_rfc3339();
        for c in calcs {
            tx.execute(
                "INSERT INTO commission_calculation (
                    calc_id, period, partner_id, rule_id, kind, currency,
                    base_amount, bonus_amount, carve_out_amount, net_amount,
                    batch_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11)",
                params![
                    c.calc_id,
                    c.period,
                    c.partner_id,
                    c.rule_id,
                    c.kind.as_str(),
                    c.currency,
                    c.base_amount.to_string(),
                    c.bonus_amount.to_string(),
                    c.carve_out_amount.to_string(),
                    c.net_amount.to_string(),
                    created_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn calculations_for_period(
        &self,
        period: &Period,
    ) -> EngineResult<Vec<CommissionCalculation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CALC_COLUMNS}
             FROM commission_calculation WHERE period = ?1
             ORDER BY calc_id ASC"
        ))?;
        let rows = stmt.query_map(params![period], calculation_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Calculations not yet assigned to any batch, excluding the
    /// community fund partner (the fund accumulates, it is never paid).
    pub fn unbatched_calculations(
        &self,
        exclude_partner: &str,
    ) -> EngineResult<Vec<CommissionCalculation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CALC_COLUMNS}
             FROM commission_calculation
             WHERE batch_id IS NULL AND partner_id != ?1
             ORDER BY calc_id ASC"
        ))?;
        let rows = stmt.query_map(params![exclude_partner], calculation_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn assign_calculations_to_batch(
        &self,
        calc_ids: &[String],
        batch_id: &str,
    ) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for calc_id in calc_ids {
            tx.execute(
                "UPDATE commission_calculation SET batch_id = ?1
                 WHERE calc_id = ?2 AND batch_id IS NULL",
                params![batch_id, calc_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Release a cancelled or rejected batch's calculations for
    /// re-composition. The calculations themselves are never deleted.
    pub fn release_calculations_for_batch(&self, batch_id: &str) -> EngineResult<i64> {
        let released = self.conn.execute(
            "UPDATE commission_calculation SET batch_id = NULL WHERE batch_id = ?1",
            params![batch_id],
        )?;
        Ok(released as i64)
    }

    pub fn calculation_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM commission_calculation", [], |row| {
                row.get(0)
            })
            .map_err(Into::into)
    }

    /// Accumulated community fund balance: sum of carve-out postings
    /// credited to the fund partner.
    pub fn community_fund_balance(&self, fund_id: &str) -> EngineResult<Decimal> {
        let mut stmt = self.conn.prepare(
            "SELECT net_amount FROM commission_calculation WHERE partner_id = ?1",
        )?;
        let amounts = stmt
            .query_map(params![fund_id], |row| decimal_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(amounts.into_iter().sum())
    }
}
