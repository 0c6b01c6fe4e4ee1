//! Shared primitive types used across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, unique identifier for a partner in the hierarchy.
pub type PartnerId = String;

/// Identifier of a commission rule.
pub type RuleId = String;

/// Identifier of a payout batch.
pub type BatchId = String;

/// Identifier of a single payout.
pub type PayoutId = String;

/// A closed revenue period, canonically `YYYY-MM`.
pub type Period = String;

/// A payout channel identifier (e.g. "ach", "wire", "wallet").
pub type ChannelId = String;

/// Partner rank in the referral hierarchy. Tier1 is the top
/// (continental) rank, Tier6 the bottom (affiliate) rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
    Tier5,
    Tier6,
}

impl Tier {
    /// Numeric rank, 1 (top) through 6 (bottom).
    pub fn rank(self) -> u8 {
        match self {
            Tier::Tier1 => 1,
            Tier::Tier2 => 2,
            Tier::Tier3 => 3,
            Tier::Tier4 => 4,
            Tier::Tier5 => 5,
            Tier::Tier6 => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
            Tier::Tier4 => "tier4",
            Tier::Tier5 => "tier5",
            Tier::Tier6 => "tier6",
        }
    }

    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "tier1" => Some(Tier::Tier1),
            "tier2" => Some(Tier::Tier2),
            "tier3" => Some(Tier::Tier3),
            "tier4" => Some(Tier::Tier4),
            "tier5" => Some(Tier::Tier5),
            "tier6" => Some(Tier::Tier6),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The commission kinds a rule may apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    Direct,
    Indirect,
    Performance,
    Leadership,
    Team,
    Volume,
    Retention,
    CommunityBonus,
}

impl CommissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommissionKind::Direct => "direct",
            CommissionKind::Indirect => "indirect",
            CommissionKind::Performance => "performance",
            CommissionKind::Leadership => "leadership",
            CommissionKind::Team => "team",
            CommissionKind::Volume => "volume",
            CommissionKind::Retention => "retention",
            CommissionKind::CommunityBonus => "community_bonus",
        }
    }

    pub fn parse(s: &str) -> Option<CommissionKind> {
        match s {
            "direct" => Some(CommissionKind::Direct),
            "indirect" => Some(CommissionKind::Indirect),
            "performance" => Some(CommissionKind::Performance),
            "leadership" => Some(CommissionKind::Leadership),
            "team" => Some(CommissionKind::Team),
            "volume" => Some(CommissionKind::Volume),
            "retention" => Some(CommissionKind::Retention),
            "community_bonus" => Some(CommissionKind::CommunityBonus),
            _ => None,
        }
    }

    /// Kinds evaluated against a partner's own period metrics rather
    /// than a single revenue event chain.
    pub fn is_performance_based(self) -> bool {
        !matches!(self, CommissionKind::Direct | CommissionKind::Indirect)
    }
}

impl fmt::Display for CommissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payout batch scheduling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Daily,
    Weekly,
    Monthly,
    OnDemand,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::Monthly => "monthly",
            ScheduleKind::OnDemand => "on_demand",
        }
    }

    pub fn parse(s: &str) -> Option<ScheduleKind> {
        match s {
            "daily" => Some(ScheduleKind::Daily),
            "weekly" => Some(ScheduleKind::Weekly),
            "monthly" => Some(ScheduleKind::Monthly),
            "on_demand" => Some(ScheduleKind::OnDemand),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payout batch lifecycle. Transitions are forward-only; a batch is
/// never reopened once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Forming,
    AwaitingApproval,
    Approved,
    Rejected,
    Cancelled,
    Executing,
    Completed,
    PartiallyCompleted,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Forming => "forming",
            BatchStatus::AwaitingApproval => "awaiting_approval",
            BatchStatus::Approved => "approved",
            BatchStatus::Rejected => "rejected",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Executing => "executing",
            BatchStatus::Completed => "completed",
            BatchStatus::PartiallyCompleted => "partially_completed",
        }
    }

    pub fn parse(s: &str) -> Option<BatchStatus> {
        match s {
            "forming" => Some(BatchStatus::Forming),
            "awaiting_approval" => Some(BatchStatus::AwaitingApproval),
            "approved" => Some(BatchStatus::Approved),
            "rejected" => Some(BatchStatus::Rejected),
            "cancelled" => Some(BatchStatus::Cancelled),
            "executing" => Some(BatchStatus::Executing),
            "completed" => Some(BatchStatus::Completed),
            "partially_completed" => Some(BatchStatus::PartiallyCompleted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Rejected
                | BatchStatus::Cancelled
                | BatchStatus::Completed
                | BatchStatus::PartiallyCompleted
        )
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Forming, AwaitingApproval)
                | (Forming, Approved)
                | (Forming, Cancelled)
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Rejected)
                | (AwaitingApproval, Cancelled)
                | (Approved, Executing)
                | (Executing, Completed)
                | (Executing, PartiallyCompleted)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Submitted,
    Completed,
    Failed,
    ManualReview,
    Disputed,
}

impl PayoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Submitted => "submitted",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
            PayoutStatus::ManualReview => "manual_review",
            PayoutStatus::Disputed => "disputed",
        }
    }

    pub fn parse(s: &str) -> Option<PayoutStatus> {
        match s {
            "pending" => Some(PayoutStatus::Pending),
            "submitted" => Some(PayoutStatus::Submitted),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            "manual_review" => Some(PayoutStatus::ManualReview),
            "disputed" => Some(PayoutStatus::Disputed),
            _ => None,
        }
    }

    /// States with no further automated transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PayoutStatus::Completed | PayoutStatus::ManualReview | PayoutStatus::Disputed
        )
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
