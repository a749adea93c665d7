//! Affiliate node: referral identity, binary-tree slot and leg volumes.

use crate::domain::{Decimal, Leg, NodeId, TimeMs};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Payout status of a node with respect to the deferred-payment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Commissions are paid out in full.
    #[default]
    Active,
    /// Binary commissions are credited against `deferred_balance` first.
    Deferred,
    /// Admin override: never withheld, even with an outstanding balance.
    AdminActivated,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Deferred => "deferred",
            AccountStatus::AdminActivated => "admin_activated",
        }
    }

    /// `Deferred` with no positive balance left has nothing to withhold and
    /// settles to `Active`; every other status is kept.
    pub fn settled(self, deferred_balance: Decimal) -> AccountStatus {
        match self {
            AccountStatus::Deferred if !deferred_balance.is_positive() => AccountStatus::Active,
            other => other,
        }
    }

    pub fn parse(s: &str) -> Option<AccountStatus> {
        match s {
            "active" => Some(AccountStatus::Active),
            "deferred" => Some(AccountStatus::Deferred),
            "admin_activated" => Some(AccountStatus::AdminActivated),
            _ => None,
        }
    }
}

/// A member of the affiliate network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateNode {
    pub id: NodeId,
    /// Referrer. `None` marks a tree root.
    pub sponsor_id: Option<NodeId>,
    /// Binary parent; differs from the sponsor only for spillover placements.
    pub parent_id: Option<NodeId>,
    /// Leg of `parent_id` this node occupies.
    pub placement_leg: Option<Leg>,
    pub left_child: Option<NodeId>,
    pub right_child: Option<NodeId>,
    pub left_volume: Decimal,
    pub right_volume: Decimal,
    pub total_cycles_matched: u64,
    pub cycles_today: u32,
    pub cycles_day: Option<NaiveDate>,
    pub current_step: u32,
    pub account_status: AccountStatus,
    pub deferred_balance: Decimal,
    pub enrolled_at: TimeMs,
}

impl AffiliateNode {
    /// A fresh, unplaced node with zeroed counters.
    pub fn new(id: NodeId, sponsor_id: Option<NodeId>, enrolled_at: TimeMs) -> Self {
        Self {
            id,
            sponsor_id,
            parent_id: None,
            placement_leg: None,
            left_child: None,
            right_child: None,
            left_volume: Decimal::zero(),
            right_volume: Decimal::zero(),
            total_cycles_matched: 0,
            cycles_today: 0,
            cycles_day: None,
            current_step: 0,
            account_status: AccountStatus::Active,
            deferred_balance: Decimal::zero(),
            enrolled_at,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn child(&self, leg: Leg) -> Option<&NodeId> {
        match leg {
            Leg::Left => self.left_child.as_ref(),
            Leg::Right => self.right_child.as_ref(),
        }
    }

    pub fn volume(&self, leg: Leg) -> Decimal {
        match leg {
            Leg::Left => self.left_volume,
            Leg::Right => self.right_volume,
        }
    }

    pub fn weaker_leg_volume(&self) -> Decimal {
        self.left_volume.min(self.right_volume)
    }

    /// Cycles already matched on `day`; a counter for another day reads as 0.
    pub fn cycles_matched_on(&self, day: NaiveDate) -> u32 {
        match self.cycles_day {
            Some(d) if d == day => self.cycles_today,
            _ => 0,
        }
    }

    /// Whether binary commissions to this node should be withheld right now.
    pub fn withholds_commission(&self) -> bool {
        self.account_status == AccountStatus::Deferred && self.deferred_balance.is_positive()
    }
}
