//! Strongly-typed configuration: partner hierarchy snapshots, commission
//! rule sets, channel and component settings.
//!
//! RULE: configuration is validated at load time. A rule set or hierarchy
//! that fails validation never reaches the calculator. Unknown or
//! contradictory combinations are configuration errors, not runtime ones.
//! Loaded snapshots are read-only; refresh means loading a new snapshot.

use crate::{
    error::{EngineError, EngineResult},
    types::{ChannelId, CommissionKind, PartnerId, RuleId, ScheduleKind, Tier},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ── Partner hierarchy ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerConfig {
    pub id: PartnerId,
    pub name: String,
    pub tier: Tier,
    #[serde(default)]
    pub parent_id: Option<PartnerId>,
    #[serde(default = "default_channel")]
    pub channel: ChannelId,
    pub monthly_volume: Decimal,
    #[serde(default)]
    pub team_size: u32,
    #[serde(default)]
    pub retention_rate: Decimal,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_channel() -> ChannelId {
    "ach".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct HierarchyFile {
    partners: Vec<PartnerConfig>,
}

/// A validated, read-only snapshot of the partner tree.
#[derive(Debug, Clone)]
pub struct HierarchySnapshot {
    partners: Vec<PartnerConfig>,
    index: HashMap<PartnerId, usize>,
}

impl HierarchySnapshot {
    /// Validate and index a set of partners. Fails on unknown parents,
    /// cycles, and children placed more than one rank above their parent.
    pub fn new(partners: Vec<PartnerConfig>) -> EngineResult<Self> {
        let index: HashMap<PartnerId, usize> = partners
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();

        for p in &partners {
            if let Some(parent_id) = &p.parent_id {
                let parent = match index.get(parent_id) {
                    Some(&i) => &partners[i],
                    None => {
                        return Err(EngineError::UnknownParent {
                            partner_id: p.id.clone(),
                            parent_id: parent_id.clone(),
                        })
                    }
                };
                // Hierarchy cannot skip upward: a child sits at most one
                // rank above its parent.
                if p.tier.rank() + 1 < parent.tier.rank() {
                    return Err(EngineError::TierAboveParent {
                        partner_id: p.id.clone(),
                        tier: p.tier.to_string(),
                        parent_tier: parent.tier.to_string(),
                    });
                }
            }
        }

        let snapshot = Self { partners, index };
        snapshot.check_acyclic()?;
        Ok(snapshot)
    }

    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let file: HierarchyFile = serde_json::from_str(json)?;
        Self::new(file.partners)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    fn check_acyclic(&self) -> EngineResult<()> {
        for start in &self.partners {
            let mut hops = 0usize;
            let mut current = start;
            while let Some(parent_id) = &current.parent_id {
                hops += 1;
                if hops > self.partners.len() {
                    return Err(EngineError::CyclicHierarchy {
                        partner_id: start.id.clone(),
                    });
                }
                current = match self.index.get(parent_id) {
                    Some(&i) => &self.partners[i],
                    None => break, // unreachable after new(), parents are checked
                };
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PartnerConfig> {
        self.index.get(id).map(|&i| &self.partners[i])
    }

    pub fn partners(&self) -> &[PartnerConfig] {
        &self.partners
    }

    /// Ancestors of a partner, nearest first, root last.
    pub fn ancestors(&self, id: &str) -> Vec<&PartnerConfig> {
        let mut chain = Vec::new();
        let mut current = self.get(id);
        while let Some(p) = current {
            match &p.parent_id {
                Some(parent_id) => {
                    current = self.get(parent_id);
                    if let Some(parent) = current {
                        chain.push(parent);
                    }
                }
                None => break,
            }
        }
        chain
    }
}

// ── Commission rules ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceRequirements {
    #[serde(default)]
    pub min_team_size: Option<u32>,
    #[serde(default)]
    pub min_retention_rate: Option<Decimal>,
    #[serde(default)]
    pub min_personal_volume: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: RuleId,
    pub tier: Tier,
    pub kind: CommissionKind,
    pub base_rate: Decimal,
    pub community_multiplier: Decimal,
    pub carve_out_rate: Decimal,
    #[serde(default)]
    pub min_volume: Decimal,
    #[serde(default)]
    pub max_payout: Option<Decimal>,
    #[serde(default)]
    pub cap_before_carve_out: bool,
    #[serde(default)]
    pub requirements: PerformanceRequirements,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl RuleConfig {
    /// Whether a partner's period metrics satisfy every performance
    /// predicate on this rule. Partial satisfaction is not prorated.
    pub fn requirements_met(&self, partner: &PartnerConfig) -> bool {
        let r = &self.requirements;
        if let Some(min_team) = r.min_team_size {
            if partner.team_size < min_team {
                return false;
            }
        }
        if let Some(min_retention) = r.min_retention_rate {
            if partner.retention_rate < min_retention {
                return false;
            }
        }
        if let Some(min_volume) = r.min_personal_volume {
            if partner.monthly_volume < min_volume {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RuleSetFile {
    rules: Vec<RuleConfig>,
}

/// A validated set of commission rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<RuleConfig>,
}

impl RuleSet {
    /// Validate a rule set at activation time. Rejects malformed rates,
    /// ambiguous (tier, kind) pairs, and configurations whose worst-case
    /// revenue-pool share exceeds 1 (which would break conservation).
    pub fn new(rules: Vec<RuleConfig>) -> EngineResult<Self> {
        for rule in &rules {
            if rule.base_rate < Decimal::ZERO || rule.base_rate > Decimal::ONE {
                return Err(EngineError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: format!("base_rate {} outside [0, 1]", rule.base_rate),
                });
            }
            if rule.community_multiplier < Decimal::ONE {
                return Err(EngineError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: format!("community_multiplier {} below 1", rule.community_multiplier),
                });
            }
            if rule.carve_out_rate < Decimal::ZERO || rule.carve_out_rate >= Decimal::ONE {
                return Err(EngineError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: format!("carve_out_rate {} outside [0, 1)", rule.carve_out_rate),
                });
            }
            if let Some(cap) = rule.max_payout {
                if cap < Decimal::ZERO {
                    return Err(EngineError::InvalidRule {
                        rule_id: rule.id.clone(),
                        reason: format!("max_payout {cap} is negative"),
                    });
                }
            }
        }

        // Two active rules on the same (tier, kind) must carry distinct
        // priorities; otherwise selection would be ambiguous.
        let mut seen: HashMap<(Tier, CommissionKind, i64), &RuleConfig> = HashMap::new();
        for rule in rules.iter().filter(|r| r.active) {
            let key = (rule.tier, rule.kind, rule.priority);
            if let Some(existing) = seen.insert(key, rule) {
                return Err(EngineError::ConflictingRules {
                    first: existing.id.clone(),
                    second: rule.id.clone(),
                    tier: rule.tier.to_string(),
                    kind: rule.kind.to_string(),
                });
            }
        }

        let set = Self { rules };
        set.check_allocation()?;
        Ok(set)
    }

    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let file: RuleSetFile = serde_json::from_str(json)?;
        Self::new(file.rules)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Conservation is enforced here, not at calculation time: the
    /// worst-case share of a revenue event is its own tier's direct rule
    /// plus every tier's indirect rule, each amplified by its multiplier.
    /// That sum must stay at or below 1 for every tier.
    fn check_allocation(&self) -> EngineResult<()> {
        let indirect_total: Decimal = [
            Tier::Tier1,
            Tier::Tier2,
            Tier::Tier3,
            Tier::Tier4,
            Tier::Tier5,
            Tier::Tier6,
        ]
        .iter()
        .filter_map(|&t| self.rule_for(t, CommissionKind::Indirect))
        .map(|r| r.base_rate * r.community_multiplier)
        .sum();

        for tier in [
            Tier::Tier1,
            Tier::Tier2,
            Tier::Tier3,
            Tier::Tier4,
            Tier::Tier5,
            Tier::Tier6,
        ] {
            let direct = self
                .rule_for(tier, CommissionKind::Direct)
                .map(|r| r.base_rate * r.community_multiplier)
                .unwrap_or(Decimal::ZERO);
            let share = direct + indirect_total;
            if share > Decimal::ONE {
                return Err(EngineError::OverAllocation {
                    tier: tier.to_string(),
                    share: share.to_string(),
                });
            }
        }
        Ok(())
    }

    /// The active rule for a (tier, kind) pair; highest priority wins.
    pub fn rule_for(&self, tier: Tier, kind: CommissionKind) -> Option<&RuleConfig> {
        self.rules
            .iter()
            .filter(|r| r.active && r.tier == tier && r.kind == kind)
            .max_by_key(|r| r.priority)
    }

    pub fn rules(&self) -> &[RuleConfig] {
        &self.rules
    }
}

// ── Channels and component settings ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: ChannelId,
    /// Proportional channel fee on the gross amount.
    #[serde(default)]
    pub fee_rate: Decimal,
    /// Flat per-payout channel fee.
    #[serde(default)]
    pub flat_fee: Decimal,
    /// Bounded parallelism inside this channel's worker pool.
    #[serde(default = "default_in_flight")]
    pub max_in_flight: usize,
}

fn default_in_flight() -> usize {
    4
}

#[derive(Debug, Clone)]
pub struct CalculatorConfig {
    /// How far an indirect commission propagates up the ancestor chain.
    pub max_indirect_depth: usize,
    /// The designated partner credited with community-fund carve-outs.
    pub community_fund_partner: PartnerId,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            max_indirect_depth: 5,
            community_fund_partner: "fund.community".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Batches whose total exceeds this require human sign-off.
    pub approval_threshold: Decimal,
    /// Schedules that always require sign-off regardless of amount.
    pub sign_off_schedules: Vec<ScheduleKind>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            approval_threshold: Decimal::from(10_000),
            sign_off_schedules: vec![ScheduleKind::OnDemand],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum submission attempts per payout before ManualReview.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay_ms: u64,
    /// Immediate retries on optimistic-lock conflicts.
    pub lock_retry_limit: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retry_base_delay_ms: 250,
            lock_retry_limit: 3,
        }
    }
}
