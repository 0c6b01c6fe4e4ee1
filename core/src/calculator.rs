//! Commission calculator: turns a closed revenue period, a hierarchy
//! snapshot, and an active rule set into an immutable set of
//! `CommissionCalculation` records.
//!
//! The pass is pure and deterministic: the same inputs always produce
//! byte-identical output (amounts are canonical decimal strings once
//! persisted). Persistence is the engine's job; failure here leaves
//! nothing behind.

use crate::{
    config::{CalculatorConfig, HierarchySnapshot, PartnerConfig, RuleConfig, RuleSet},
    error::{EngineError, EngineResult},
    money,
    types::{CommissionKind, PartnerId, Period, RuleId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One attributed revenue event from the closed period feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueEvent {
    pub partner_id: PartnerId,
    pub amount: Decimal,
    pub currency: String,
    pub event_time: DateTime<Utc>,
}

/// The closed, immutable revenue feed for one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueFeed {
    pub period: Period,
    pub currency: String,
    pub events: Vec<RevenueEvent>,
}

impl RevenueFeed {
    /// Total revenue pool for the period.
    pub fn pool(&self) -> Decimal {
        self.events.iter().map(|e| e.amount).sum()
    }
}

/// One immutable ledger row per (partner, rule, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionCalculation {
    pub calc_id: String,
    pub period: Period,
    pub partner_id: PartnerId,
    pub rule_id: RuleId,
    pub kind: CommissionKind,
    pub currency: String,
    pub base_amount: Decimal,
    pub bonus_amount: Decimal,
    pub carve_out_amount: Decimal,
    pub net_amount: Decimal,
    pub batch_id: Option<String>,
}

/// Full-precision economics of one awarded amount under one rule.
struct Settled {
    gross: Decimal,
    carve_out: Decimal,
    net: Decimal,
}

pub struct CommissionCalculator {
    config: CalculatorConfig,
}

impl CommissionCalculator {
    pub fn new(config: CalculatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }

    /// Run the full calculation pass for a closed period.
    pub fn calculate(
        &self,
        feed: &RevenueFeed,
        hierarchy: &HierarchySnapshot,
        rules: &RuleSet,
    ) -> EngineResult<Vec<CommissionCalculation>> {
        // Period volume per partner from the event feed. Unknown
        // partners in the feed are a configuration error, not data
        // to skip silently.
        let mut volumes: BTreeMap<PartnerId, Decimal> = BTreeMap::new();
        for event in &feed.events {
            if hierarchy.get(&event.partner_id).is_none() {
                return Err(EngineError::UnknownPartner {
                    partner_id: event.partner_id.clone(),
                });
            }
            *volumes.entry(event.partner_id.clone()).or_default() += event.amount;
        }

        // Accrued base amounts keyed by (partner, rule), full precision.
        // BTreeMap keeps iteration order deterministic.
        let mut accruals: BTreeMap<(PartnerId, RuleId), (CommissionKind, Decimal)> =
            BTreeMap::new();
        let mut accrue = |partner: &PartnerId, rule: &RuleConfig, base: Decimal| {
            let entry = accruals
                .entry((partner.clone(), rule.id.clone()))
                .or_insert((rule.kind, Decimal::ZERO));
            entry.1 += base;
        };

        // 1. Direct commissions, leaves first (descending tier rank).
        let mut ordered: Vec<(&PartnerId, &Decimal)> = volumes.iter().collect();
        ordered.sort_by(|a, b| {
            let ra = hierarchy.get(a.0).map(|p| p.tier.rank()).unwrap_or(0);
            let rb = hierarchy.get(b.0).map(|p| p.tier.rank()).unwrap_or(0);
            rb.cmp(&ra).then(a.0.cmp(b.0))
        });

        for &(partner_id, volume) in &ordered {
            let partner = hierarchy
                .get(partner_id)
                .ok_or_else(|| EngineError::UnknownPartner {
                    partner_id: partner_id.clone(),
                })?;
            if !partner.active {
                continue;
            }
            if let Some(rule) = rules.rule_for(partner.tier, CommissionKind::Direct) {
                if *volume >= rule.min_volume && rule.requirements_met(partner) {
                    accrue(partner_id, rule, *volume * rule.base_rate);
                }
            }

            // 2. Indirect commissions propagate up the ancestor chain,
            // one rule evaluation per ancestor, bounded by depth.
            for ancestor in hierarchy
                .ancestors(partner_id)
                .into_iter()
                .take(self.config.max_indirect_depth)
            {
                if !ancestor.active {
                    continue;
                }
                if let Some(rule) = rules.rule_for(ancestor.tier, CommissionKind::Indirect) {
                    // Qualifying volume is the ancestor's own period
                    // volume from the feed, the same basis direct
                    // commissions use.
                    let ancestor_volume = volumes
                        .get(&ancestor.id)
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    if ancestor_volume >= rule.min_volume && rule.requirements_met(ancestor) {
                        accrue(&ancestor.id, rule, *volume * rule.base_rate);
                    }
                }
            }
        }

        // 3. Performance-based kinds, evaluated per partner against its
        // own metrics. All-or-nothing: partial satisfaction pays zero.
        let mut partners: Vec<&PartnerConfig> = hierarchy.partners().iter().collect();
        partners.sort_by(|a, b| a.id.cmp(&b.id));
        for partner in partners {
            if !partner.active || partner.id == self.config.community_fund_partner {
                continue;
            }
            for kind in [
                CommissionKind::Performance,
                CommissionKind::Leadership,
                CommissionKind::Team,
                CommissionKind::Volume,
                CommissionKind::Retention,
                CommissionKind::CommunityBonus,
            ] {
                if let Some(rule) = rules.rule_for(partner.tier, kind) {
                    if partner.monthly_volume >= rule.min_volume && rule.requirements_met(partner)
                    {
                        accrue(&partner.id, rule, partner.monthly_volume * rule.base_rate);
                    }
                }
            }
        }

        // 4-6. Multiplier, carve-out, cap, rounding at the persist edge.
        let mut out = Vec::with_capacity(accruals.len());
        let mut fund_totals: BTreeMap<RuleId, (CommissionKind, Decimal)> = BTreeMap::new();
        let mut event_driven_total = Decimal::ZERO;

        for ((partner_id, rule_id), (kind, base)) in &accruals {
            let rule = rules
                .rules()
                .iter()
                .find(|r| &r.id == rule_id)
                .ok_or_else(|| anyhow::anyhow!("rule '{rule_id}' missing from active set"))?;
            let settled = settle(*base, rule);

            if settled.carve_out > Decimal::ZERO {
                let entry = fund_totals
                    .entry(rule_id.clone())
                    .or_insert((*kind, Decimal::ZERO));
                entry.1 += settled.carve_out;
            }
            if !kind.is_performance_based() {
                event_driven_total += settled.net + settled.carve_out;
            }

            out.push(CommissionCalculation {
                calc_id: format!("calc-{}-{partner_id}-{rule_id}", feed.period),
                period: feed.period.clone(),
                partner_id: partner_id.clone(),
                rule_id: rule_id.clone(),
                kind: *kind,
                currency: feed.currency.clone(),
                base_amount: money::round_minor(*base, &feed.currency),
                bonus_amount: money::round_minor(settled.gross - *base, &feed.currency),
                carve_out_amount: money::round_minor(settled.carve_out, &feed.currency),
                net_amount: money::non_negative(money::round_minor(settled.net, &feed.currency)),
                batch_id: None,
            });
        }

        // Carve-outs post to the community fund partner, aggregated to
        // one row per (rule, period).
        let fund = &self.config.community_fund_partner;
        for (rule_id, (kind, carve_total)) in &fund_totals {
            let rounded = money::round_minor(*carve_total, &feed.currency);
            out.push(CommissionCalculation {
                calc_id: format!("calc-{}-{fund}-{rule_id}", feed.period),
                period: feed.period.clone(),
                partner_id: fund.clone(),
                rule_id: rule_id.clone(),
                kind: *kind,
                currency: feed.currency.clone(),
                base_amount: Decimal::ZERO,
                bonus_amount: Decimal::ZERO,
                carve_out_amount: rounded,
                net_amount: rounded,
                batch_id: None,
            });
        }

        // Conservation over event-driven awards. Rule activation already
        // guarantees this; a breach here means a validation gap.
        let pool = feed.pool();
        if event_driven_total > pool {
            log::warn!(
                "period {}: event-driven allocation {event_driven_total} exceeds pool {pool}",
                feed.period
            );
        }

        log::debug!(
            "period {}: {} calculations from {} revenue events",
            feed.period,
            out.len(),
            feed.events.len()
        );
        Ok(out)
    }
}

/// Apply a rule's multiplier, carve-out, and cap to an accrued base.
///
/// Cap ordering is a per-rule choice: cap-before-carve-out caps the
/// gross bonus so the carve-out shrinks with it; the default cap-after
/// leaves the carve-out reflecting the uncapped intent and caps only
/// the partner's net.
fn settle(base: Decimal, rule: &RuleConfig) -> Settled {
    let gross = base * rule.community_multiplier;
    if rule.cap_before_carve_out {
        let capped_gross = match rule.max_payout {
            Some(cap) if gross > cap => cap,
            _ => gross,
        };
        let carve_out = capped_gross * rule.carve_out_rate;
        Settled {
            gross,
            carve_out,
            net: capped_gross - carve_out,
        }
    } else {
        let carve_out = gross * rule.carve_out_rate;
        let net = gross - carve_out;
        let net = match rule.max_payout {
            Some(cap) if net > cap => cap,
            _ => net,
        };
        Settled {
            gross,
            carve_out,
            net,
        }
    }
}
