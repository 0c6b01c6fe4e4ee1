use super::{decimal_col, enum_col, opt_decimal_col, LedgerStore};
use crate::{
    config::{PerformanceRequirements, RuleConfig, RuleSet},
    error::EngineResult,
    types::{CommissionKind, Tier},
};
use rusqlite::params;

impl LedgerStore {
    // ── Commission rules ────────────────────────────────────────
    //
    // Rules are immutable once activated: INSERT OR IGNORE keeps the
    // first persisted version, and deactivation flips the flag without
    // touching the rate columns, so past calculations stay auditable.

    pub fn persist_rules(&self, rules: &RuleSet) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for r in rules.rules() {
            tx.execute(
                "INSERT OR IGNORE INTO commission_rule (
                    rule_id, tier, kind, base_rate, community_multiplier,
                    carve_out_rate, min_volume, max_payout, cap_before_carve_out,
                    min_team_size, min_retention_rate, min_personal_volume,
                    priority, active
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    r.id,
                    r.tier.as_str(),
                    r.kind.as_str(),
                    r.base_rate.to_string(),
                    r.community_multiplier.to_string(),
                    r.carve_out_rate.to_string(),
                    r.min_volume.to_string(),
                    r.max_payout.map(|c| c.to_string()),
                    if r.cap_before_carve_out { 1 } else { 0 },
                    r.requirements.min_team_size,
                    r.requirements.min_retention_rate.map(|v| v.to_string()),
                    r.requirements.min_personal_volume.map(|v| v.to_string()),
                    r.priority,
                    if r.active { 1 } else { 0 },
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_rule(&self, rule_id: &str) -> EngineResult<RuleConfig> {
        self.conn
            .query_row(
                "SELECT rule_id, tier, kind, base_rate, community_multiplier,
                        carve_out_rate, min_volume, max_payout, cap_before_carve_out,
                        min_team_size, min_retention_rate, min_personal_volume,
                        priority, active
                 FROM commission_rule WHERE rule_id = ?1",
                params![rule_id],
                |row| {
                    Ok(RuleConfig {
                        id: row.get(0)?,
                        tier: enum_col(row, 1, Tier::parse)?,
                        kind: enum_col(row, 2, CommissionKind::parse)?,
                        base_rate: decimal_col(row, 3)?,
                        community_multiplier: decimal_col(row, 4)?,
                        carve_out_rate: decimal_col(row, 5)?,
                        min_volume: decimal_col(row, 6)?,
                        max_payout: opt_decimal_col(row, 7)?,
                        cap_before_carve_out: row.get::<_, i32>(8)? != 0,
                        requirements: PerformanceRequirements {
                            min_team_size: row.get::<_, Option<i64>>(9)?.map(|v| v as u32),
                            min_retention_rate: opt_decimal_col(row, 10)?,
                            min_personal_volume: opt_decimal_col(row, 11)?,
                        },
                        priority: row.get(12)?,
                        active: row.get::<_, i32>(13)? != 0,
                    })
                },
            )
            .map_err(Into::into)
    }

    pub fn deactivate_rule(&self, rule_id: &str) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE commission_rule SET active = 0 WHERE rule_id = ?1",
            params![rule_id],
        )?;
        Ok(())
    }

    pub fn rule_count(&self) -> EngineResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM commission_rule", [], |row| row.get(0))
            .map_err(Into::into)
    }
}
