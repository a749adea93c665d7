//! Binary plan: tree placement, leg volume propagation and cycle matching.

use crate::config::PlanConfig;
use crate::domain::{
    AccountStatus, AffiliateNode, CommissionEntry, Decimal, Leg, NodeId, PlanType, SaleEvent,
    SaleValidationError, TimeMs,
};
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;

use super::graph::{GraphSnapshot, GraphView};
use super::pipeline::SaleError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("node {0} already exists")]
    AlreadyExists(NodeId),
    #[error("unknown sponsor {0}")]
    UnknownSponsor(NodeId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("both legs of sponsor {0} are occupied; a preferred leg is required")]
    SponsorLegsFull(NodeId),
    #[error("{leg} leg of {parent} is already occupied")]
    LegOccupied { parent: NodeId, leg: Leg },
    #[error("binary tree under {0} is malformed")]
    MalformedTree(NodeId),
}

/// Volume added to one ancestor's leg by a sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCredit {
    pub ancestor: NodeId,
    pub leg: Leg,
    pub amount: Decimal,
}

/// Outcome of matching cycles on a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleMatch {
    pub node_id: NodeId,
    pub cycles: u32,
    /// Ledger day the cycles were counted against.
    pub day: NaiveDate,
    /// Amount removed from each leg.
    pub flushed: Decimal,
    pub entries: Vec<CommissionEntry>,
    pub deferred_balance: Decimal,
    pub account_status: AccountStatus,
}

pub struct BinaryPlacementEngine;

impl BinaryPlacementEngine {
    /// Attach `new_id` under `sponsor` and return the placed node.
    ///
    /// The sponsor's own legs fill left then right regardless of
    /// `preferred`. With both legs taken, the node spills down the
    /// `preferred` leg's outer edge to the first free slot; without a
    /// preference that case is an error.
    pub fn place_node(
        graph: &mut GraphSnapshot,
        new_id: NodeId,
        sponsor: Option<&NodeId>,
        preferred: Option<Leg>,
        enrolled_at: TimeMs,
    ) -> Result<AffiliateNode, PlacementError> {
        if graph.contains(&new_id) {
            return Err(PlacementError::AlreadyExists(new_id));
        }

        let Some(sponsor_id) = sponsor else {
            let root = AffiliateNode::new(new_id, None, enrolled_at);
            graph.insert(root.clone());
            return Ok(root);
        };

        let sponsor_node = graph
            .node(sponsor_id)
            .ok_or_else(|| PlacementError::UnknownSponsor(sponsor_id.clone()))?;

        let (parent_id, leg) = Self::find_slot(graph, sponsor_node, preferred)?;

        let parent = graph
            .node_mut(&parent_id)
            .ok_or_else(|| PlacementError::MalformedTree(parent_id.clone()))?;
        let slot = match leg {
            Leg::Left => &mut parent.left_child,
            Leg::Right => &mut parent.right_child,
        };
        if slot.is_some() {
            return Err(PlacementError::LegOccupied {
                parent: parent_id,
                leg,
            });
        }
        *slot = Some(new_id.clone());

        let mut node = AffiliateNode::new(new_id, Some(sponsor_id.clone()), enrolled_at);
        node.parent_id = Some(parent_id);
        node.placement_leg = Some(leg);
        graph.insert(node.clone());
        Ok(node)
    }

    fn find_slot(
        graph: &GraphSnapshot,
        sponsor: &AffiliateNode,
        preferred: Option<Leg>,
    ) -> Result<(NodeId, Leg), PlacementError> {
        for leg in [Leg::Left, Leg::Right] {
            if sponsor.child(leg).is_none() {
                return Ok((sponsor.id.clone(), leg));
            }
        }

        let leg = preferred.ok_or_else(|| PlacementError::SponsorLegsFull(sponsor.id.clone()))?;

        let mut seen = HashSet::new();
        let mut current = sponsor;
        while let Some(next_id) = current.child(leg) {
            if !seen.insert(next_id.clone()) {
                return Err(PlacementError::MalformedTree(sponsor.id.clone()));
            }
            current = graph
                .node(next_id)
                .ok_or_else(|| PlacementError::MalformedTree(next_id.clone()))?;
        }
        Ok((current.id.clone(), leg))
    }

    /// Credit `amount` to every binary ancestor of `node_id` on the leg the
    /// node descends through. Returns the credits nearest-first.
    ///
    /// The whole chain is checked before any volume is written, so an
    /// overflow anywhere leaves the graph untouched.
    pub fn record_sale(
        graph: &mut GraphSnapshot,
        node_id: &NodeId,
        amount: Decimal,
    ) -> Result<Vec<VolumeCredit>, SaleError> {
        let mut credits = Vec::new();
        let mut totals = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::from([node_id.clone()]);

        let start = graph
            .node(node_id)
            .ok_or_else(|| PlacementError::UnknownNode(node_id.clone()))?;
        let mut step = start.parent_id.clone().zip(start.placement_leg);

        while let Some((parent_id, leg)) = step {
            if !seen.insert(parent_id.clone()) {
                return Err(PlacementError::MalformedTree(parent_id).into());
            }
            let parent = graph
                .node(&parent_id)
                .ok_or_else(|| PlacementError::MalformedTree(parent_id.clone()))?;
            let total = parent
                .volume(leg)
                .checked_add(amount)
                .ok_or_else(|| SaleValidationError::VolumeOverflow(parent_id.clone()))?;
            step = parent.parent_id.clone().zip(parent.placement_leg);
            totals.push(total);
            credits.push(VolumeCredit {
                ancestor: parent_id,
                leg,
                amount,
            });
        }

        for (credit, total) in credits.iter().zip(totals) {
            let parent = graph
                .node_mut(&credit.ancestor)
                .ok_or_else(|| PlacementError::MalformedTree(credit.ancestor.clone()))?;
            match credit.leg {
                Leg::Left => parent.left_volume = total,
                Leg::Right => parent.right_volume = total,
            }
        }

        Ok(credits)
    }

    /// Match as many cycles as the weaker leg and the daily cap allow,
    /// flushing `cycle_amount` from both legs per cycle.
    ///
    /// Events dated before the node's current ledger day count against that
    /// later day so the cap cannot be reset by out-of-order delivery.
    pub fn match_cycles(
        node: &mut AffiliateNode,
        sale: &SaleEvent,
        day: NaiveDate,
        plan: &PlanConfig,
    ) -> CycleMatch {
        let day = node.cycles_day.map_or(day, |d| d.max(day));
        let available = node.weaker_leg_volume().whole_units_of(plan.cycle_amount);
        let remaining_today = plan
            .max_cycles_per_day
            .saturating_sub(node.cycles_matched_on(day));
        let cycles = available.min(u64::from(remaining_today)) as u32;

        let mut entries = Vec::with_capacity(cycles as usize);
        let left_before = node.left_volume;
        for seq in 0..cycles {
            node.left_volume -= plan.cycle_amount;
            node.right_volume -= plan.cycle_amount;
            node.total_cycles_matched += 1;

            let mut entry = CommissionEntry::new(
                sale.event_id.clone(),
                node.id.clone(),
                sale.source_node_id.clone(),
                PlanType::Binary,
                None,
                seq,
                plan.cycle_amount,
                plan.cycle_commission,
                sale.timestamp,
            );
            Self::apply_deferral(node, &mut entry);
            entries.push(entry);
        }

        let flushed = left_before - node.left_volume;
        if cycles > 0 {
            node.cycles_today = node.cycles_matched_on(day) + cycles;
            node.cycles_day = Some(day);
        }

        CycleMatch {
            node_id: node.id.clone(),
            cycles,
            day,
            flushed,
            entries,
            deferred_balance: node.deferred_balance,
            account_status: node.account_status,
        }
    }

    fn apply_deferral(node: &mut AffiliateNode, entry: &mut CommissionEntry) {
        if !node.withholds_commission() {
            return;
        }
        let withheld = entry.amount.min(node.deferred_balance);
        entry.withheld = withheld;
        node.deferred_balance -= withheld;
        if node.deferred_balance.is_zero() {
            node.account_status = AccountStatus::Active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventId;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn place(g: &mut GraphSnapshot, new: &str, sponsor: Option<&str>, leg: Option<Leg>) -> AffiliateNode {
        let sponsor = sponsor.map(id);
        BinaryPlacementEngine::place_node(g, id(new), sponsor.as_ref(), leg, TimeMs::new(0)).unwrap()
    }

    fn sale(amount: &str) -> SaleEvent {
        SaleEvent::new(EventId::new("evt"), id("seller"), d(amount), TimeMs::new(0))
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn node_with(left: &str, right: &str) -> AffiliateNode {
        let mut n = AffiliateNode::new(id("m"), None, TimeMs::new(0));
        n.left_volume = d(left);
        n.right_volume = d(right);
        n
    }

    #[test]
    fn test_first_two_referrals_fill_left_then_right() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        let a = place(&mut g, "a", Some("root"), None);
        let b = place(&mut g, "b", Some("root"), None);
        assert_eq!(a.placement_leg, Some(Leg::Left));
        assert_eq!(b.placement_leg, Some(Leg::Right));
        let root = g.node(&id("root")).unwrap();
        assert_eq!(root.left_child, Some(id("a")));
        assert_eq!(root.right_child, Some(id("b")));
    }

    #[test]
    fn test_preferred_leg_ignored_while_sponsor_has_a_free_leg() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        let a = place(&mut g, "a", Some("root"), Some(Leg::Right));
        assert_eq!(a.placement_leg, Some(Leg::Left));
        assert_eq!(a.parent_id, Some(id("root")));
        let b = place(&mut g, "b", Some("root"), Some(Leg::Left));
        assert_eq!(b.placement_leg, Some(Leg::Right));
        assert_eq!(b.parent_id, Some(id("root")));

        let c = place(&mut g, "c", Some("root"), Some(Leg::Right));
        assert_eq!(c.parent_id, Some(id("b")));
        assert_eq!(c.placement_leg, Some(Leg::Right));
    }

    #[test]
    fn test_third_referral_without_preference_is_rejected() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        place(&mut g, "a", Some("root"), None);
        place(&mut g, "b", Some("root"), None);
        let err = BinaryPlacementEngine::place_node(
            &mut g,
            id("c"),
            Some(&id("root")),
            None,
            TimeMs::new(0),
        )
        .unwrap_err();
        assert_eq!(err, PlacementError::SponsorLegsFull(id("root")));
        assert!(!g.contains(&id("c")));
    }

    #[test]
    fn test_spillover_descends_outer_edge_of_preferred_leg() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        place(&mut g, "a", Some("root"), None);
        place(&mut g, "b", Some("root"), None);
        let c = place(&mut g, "c", Some("root"), Some(Leg::Left));
        assert_eq!(c.sponsor_id, Some(id("root")));
        assert_eq!(c.parent_id, Some(id("a")));
        assert_eq!(c.placement_leg, Some(Leg::Left));

        let d4 = place(&mut g, "d", Some("root"), Some(Leg::Left));
        assert_eq!(d4.parent_id, Some(id("c")));
        assert_eq!(g.referrals(&id("root")).len(), 4);
    }

    #[test]
    fn test_duplicate_and_unknown_sponsor_rejected() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        let dup = BinaryPlacementEngine::place_node(&mut g, id("root"), None, None, TimeMs::new(0));
        assert_eq!(dup.unwrap_err(), PlacementError::AlreadyExists(id("root")));
        let orphan = BinaryPlacementEngine::place_node(
            &mut g,
            id("x"),
            Some(&id("ghost")),
            None,
            TimeMs::new(0),
        );
        assert_eq!(orphan.unwrap_err(), PlacementError::UnknownSponsor(id("ghost")));
    }

    #[test]
    fn test_record_sale_credits_each_ancestor_on_descent_leg() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        place(&mut g, "a", Some("root"), None);
        place(&mut g, "b", Some("root"), None);
        place(&mut g, "a1", Some("a"), Some(Leg::Right));
        place(&mut g, "a1x", Some("a1"), None);

        let credits = BinaryPlacementEngine::record_sale(&mut g, &id("a1x"), d("100")).unwrap();
        let legs: Vec<_> = credits.iter().map(|c| (c.ancestor.clone(), c.leg)).collect();
        assert_eq!(
            legs,
            vec![
                (id("a1"), Leg::Left),
                (id("a"), Leg::Right),
                (id("root"), Leg::Left)
            ]
        );
        assert_eq!(g.node(&id("root")).unwrap().left_volume, d("100"));
        assert_eq!(g.node(&id("root")).unwrap().right_volume, Decimal::zero());
        assert_eq!(g.node(&id("a")).unwrap().right_volume, d("100"));
        assert_eq!(g.node(&id("a1x")).unwrap().left_volume, Decimal::zero());
    }

    #[test]
    fn test_record_sale_overflow_leaves_volumes_untouched() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        place(&mut g, "a", Some("root"), None);
        place(&mut g, "a1", Some("a"), None);
        let max = d("79228162514264337593543950335");
        g.node_mut(&id("root")).unwrap().left_volume = max;

        let err = BinaryPlacementEngine::record_sale(&mut g, &id("a1"), d("1")).unwrap_err();
        assert_eq!(err, SaleError::Invalid(SaleValidationError::VolumeOverflow(id("root"))));
        // a sits below the overflowing root and must not keep a partial credit.
        assert_eq!(g.node(&id("a")).unwrap().left_volume, Decimal::zero());
        assert_eq!(g.node(&id("root")).unwrap().left_volume, max);
    }

    #[test]
    fn test_record_sale_on_root_touches_nothing() {
        let mut g = GraphSnapshot::new();
        place(&mut g, "root", None, None);
        let credits = BinaryPlacementEngine::record_sale(&mut g, &id("root"), d("50")).unwrap();
        assert!(credits.is_empty());
    }

    #[test]
    fn test_match_cycles_single_cycle_flushes_both_legs() {
        let plan = PlanConfig::default();
        let mut n = node_with("5000", "3000");
        let m = BinaryPlacementEngine::match_cycles(&mut n, &sale("10"), day(), &plan);
        assert_eq!(m.cycles, 1);
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries[0].plan, PlanType::Binary);
        assert_eq!(m.entries[0].amount, d("200"));
        assert_eq!(n.left_volume, d("3000"));
        assert_eq!(n.right_volume, d("1000"));
        assert_eq!(n.total_cycles_matched, 1);
    }

    #[test]
    fn test_match_cycles_below_threshold_leaves_volumes() {
        let plan = PlanConfig::default();
        let mut n = node_with("500", "100");
        let m = BinaryPlacementEngine::match_cycles(&mut n, &sale("10"), day(), &plan);
        assert_eq!(m.cycles, 0);
        assert!(m.entries.is_empty());
        assert_eq!(n.left_volume, d("500"));
        assert_eq!(n.right_volume, d("100"));
        assert_eq!(n.cycles_day, None);
    }

    #[test]
    fn test_daily_cap_limits_cycles_and_resets_next_day() {
        let plan = PlanConfig {
            max_cycles_per_day: 3,
            ..PlanConfig::default()
        };
        let mut n = node_with("20000", "20000");
        let first = BinaryPlacementEngine::match_cycles(&mut n, &sale("1"), day(), &plan);
        assert_eq!(first.cycles, 3);
        let again = BinaryPlacementEngine::match_cycles(&mut n, &sale("1"), day(), &plan);
        assert_eq!(again.cycles, 0);
        assert_eq!(n.left_volume, d("14000"));

        let next = day().succ_opt().unwrap();
        let tomorrow = BinaryPlacementEngine::match_cycles(&mut n, &sale("1"), next, &plan);
        assert_eq!(tomorrow.cycles, 3);
        assert_eq!(n.cycles_today, 3);
        assert_eq!(n.total_cycles_matched, 6);
    }

    #[test]
    fn test_late_event_counts_against_latest_day() {
        let plan = PlanConfig {
            max_cycles_per_day: 2,
            ..PlanConfig::default()
        };
        let mut n = node_with("20000", "20000");
        let next = day().succ_opt().unwrap();
        BinaryPlacementEngine::match_cycles(&mut n, &sale("1"), next, &plan);
        let late = BinaryPlacementEngine::match_cycles(&mut n, &sale("1"), day(), &plan);
        assert_eq!(late.cycles, 0);
        assert_eq!(n.cycles_day, Some(next));
    }

    #[test]
    fn test_deferred_balance_withholds_until_recovered() {
        let plan = PlanConfig::default();
        let mut n = node_with("6000", "6000");
        n.account_status = AccountStatus::Deferred;
        n.deferred_balance = d("300");

        let m = BinaryPlacementEngine::match_cycles(&mut n, &sale("1"), day(), &plan);
        assert_eq!(m.cycles, 3);
        assert_eq!(m.entries[0].withheld, d("200"));
        assert_eq!(m.entries[0].payable(), Decimal::zero());
        assert_eq!(m.entries[1].withheld, d("100"));
        assert_eq!(m.entries[1].payable(), d("100"));
        assert_eq!(m.entries[2].withheld, Decimal::zero());
        assert_eq!(n.deferred_balance, Decimal::zero());
        assert_eq!(n.account_status, AccountStatus::Active);
    }

    #[test]
    fn test_admin_activated_is_paid_despite_balance() {
        let plan = PlanConfig::default();
        let mut n = node_with("2000", "2000");
        n.account_status = AccountStatus::AdminActivated;
        n.deferred_balance = d("300");

        let m = BinaryPlacementEngine::match_cycles(&mut n, &sale("1"), day(), &plan);
        assert_eq!(m.entries[0].withheld, Decimal::zero());
        assert_eq!(n.deferred_balance, d("300"));
        assert_eq!(m.account_status, AccountStatus::AdminActivated);
    }
}
