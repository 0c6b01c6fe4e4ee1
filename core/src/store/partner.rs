use super::{decimal_col, enum_col, LedgerStore, PartnerRow};
use crate::{
    config::{HierarchySnapshot, PartnerConfig},
    error::{EngineError, EngineResult},
    types::Tier,
};
use rusqlite::params;

impl LedgerStore {
    // ── Partner hierarchy ───────────────────────────────────────

    /// Upsert every partner from a validated hierarchy snapshot.
    /// Tier is written only on first insert: tier changes go through
    /// `promote_partner`, never through a snapshot refresh.
    pub fn sync_hierarchy(&self, snapshot: &HierarchySnapshot) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for p in snapshot.partners() {
            tx.execute(
                "INSERT INTO partner (
                    partner_id, name, tier, parent_id, channel,
                    monthly_volume, team_size, retention_rate, active
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(partner_id) DO UPDATE SET
                    name = excluded.name,
                    parent_id = excluded.parent_id,
                    channel = excluded.channel,
                    monthly_volume = excluded.monthly_volume,
                    team_size = excluded.team_size,
                    retention_rate = excluded.retention_rate,
                    active = excluded.active",
                params![
                    p.id,
                    p.name,
                    p.tier.as_str(),
                    p.parent_id,
                    p.channel,
                    p.monthly_volume.to_string(),
                    p.team_size,
                    p.retention_rate.to_string(),
                    if p.active { 1 } else { 0 },
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Register the designated community fund partner if missing.
    pub fn ensure_community_fund(&self, fund_id: &str) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO partner (partner_id, name, tier, monthly_volume)
             VALUES (?1, 'Community Fund', 'tier1', '0')",
            params![fund_id],
        )?;
        Ok(())
    }

    pub fn get_partner(&self, partner_id: &str) -> EngineResult<PartnerRow> {
        self.conn
            .query_row(
                "SELECT partner_id, name, tier, parent_id, channel,
                        monthly_volume, team_size, retention_rate, active,
                        last_applied_batch_seq
                 FROM partner WHERE partner_id = ?1",
                params![partner_id],
                |row| {
                    Ok(PartnerRow {
                        partner_id: row.get(0)?,
                        name: row.get(1)?,
                        tier: enum_col(row, 2, Tier::parse)?,
                        parent_id: row.get(3)?,
                        channel: row.get(4)?,
                        monthly_volume: decimal_col(row, 5)?,
                        team_size: row.get::<_, i64>(6)? as u32,
                        retention_rate: decimal_col(row, 7)?,
                        active: row.get::<_, i32>(8)? != 0,
                        last_applied_batch_seq: row.get(9)?,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Promote a partner to a strictly higher tier. The only operation
    /// that ever changes a persisted tier.
    pub fn promote_partner(&self, partner_id: &str, new_tier: Tier) -> EngineResult<Tier> {
        let current = self.get_partner(partner_id)?;
        if new_tier.rank() >= current.tier.rank() {
            return Err(EngineError::InvalidPromotion {
                partner_id: partner_id.to_string(),
            });
        }
        self.conn.execute(
            "UPDATE partner SET tier = ?1 WHERE partner_id = ?2",
            params![new_tier.as_str(), partner_id],
        )?;
        Ok(current.tier)
    }

    pub fn partner_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM partner", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Restore the snapshot view of a stored partner (used by tooling).
    pub fn partner_config(&self, partner_id: &str) -> EngineResult<PartnerConfig> {
        let row = self.get_partner(partner_id)?;
        Ok(PartnerConfig {
            id: row.partner_id,
            name: row.name,
            tier: row.tier,
            parent_id: row.parent_id,
            channel: row.channel,
            monthly_volume: row.monthly_volume,
            team_size: row.team_size,
            retention_rate: row.retention_rate,
            active: row.active,
        })
    }
}
