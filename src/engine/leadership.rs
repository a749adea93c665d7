//! Leadership bonus on manager sales, paid over compressed levels.

use crate::config::PlanConfig;
use crate::domain::{CommissionEntry, NodeId, PlanType, SaleEvent, SaleValidationError};
use serde::Serialize;

use super::compression::{CompressionParams, CompressionResult, CompressionTraversal};
use super::graph::{GraphView, RankEngine};

/// Eligibility of a node together with the compression that decided it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub node_id: NodeId,
    pub is_manager: bool,
    pub lines_with_managers: usize,
    pub eligible: bool,
    pub compression: CompressionResult,
}

pub struct LeadershipBonusCalculator;

impl LeadershipBonusCalculator {
    pub fn params(plan: &PlanConfig) -> CompressionParams {
        CompressionParams {
            manager_step: plan.manager_step(),
            max_depth: plan.max_compressed_depth,
            max_visited: plan.max_traversal_nodes,
            dedup: plan.line_dedup,
        }
    }

    /// Manager rank plus at least two lines holding a manager.
    pub fn eligibility<G: GraphView + ?Sized>(
        graph: &G,
        node_id: &NodeId,
        plan: &PlanConfig,
    ) -> Eligibility {
        let mut budget = plan.max_traversal_nodes;
        Self::eligibility_within(graph, node_id, plan, &mut budget)
    }

    fn eligibility_within<G: GraphView + ?Sized>(
        graph: &G,
        node_id: &NodeId,
        plan: &PlanConfig,
        budget: &mut usize,
    ) -> Eligibility {
        let compression =
            CompressionTraversal::compress_within(graph, node_id, &Self::params(plan), budget);
        let is_manager = graph.current_step(node_id) == plan.manager_step();
        let lines_with_managers = compression.lines_with_managers();
        Eligibility {
            node_id: node_id.clone(),
            is_manager,
            lines_with_managers,
            eligible: is_manager && lines_with_managers >= 2,
            compression,
        }
    }

    pub fn is_eligible<G: GraphView + ?Sized>(
        graph: &G,
        node_id: &NodeId,
        plan: &PlanConfig,
    ) -> bool {
        Self::eligibility(graph, node_id, plan).eligible
    }

    /// Highest manager-ranked sponsor of a selling manager. Its referral
    /// subtree holds every node the bonus walk for this sale can visit.
    ///
    /// `None` when the seller is not a manager or has no manager above it.
    pub fn scope_root<G: GraphView + ?Sized>(
        graph: &G,
        seller: &NodeId,
        plan: &PlanConfig,
    ) -> Option<NodeId> {
        let manager_step = plan.manager_step();
        if graph.current_step(seller) != manager_step {
            return None;
        }
        graph
            .sponsor_chain(seller)
            .into_iter()
            .rev()
            .find(|ancestor| graph.current_step(ancestor) == manager_step)
    }

    /// Bonus entries for every eligible sponsor above a selling manager that
    /// holds the seller within its compressed window.
    ///
    /// Ineligible sponsors are skipped without ending the walk. All
    /// compressions for one sale draw from a single `max_traversal_nodes`
    /// budget; once it is spent the remaining sponsors are not evaluated.
    pub fn on_manager_sale<G: GraphView + ?Sized>(
        graph: &G,
        sale: &SaleEvent,
        plan: &PlanConfig,
    ) -> Result<Vec<CommissionEntry>, SaleValidationError> {
        let manager_step = plan.manager_step();
        let seller = &sale.source_node_id;
        if graph.current_step(seller) != manager_step {
            return Ok(Vec::new());
        }

        let amount = plan
            .leadership_bonus_percent
            .percent_of(sale.amount)
            .ok_or(SaleValidationError::CommissionOverflow(sale.amount))?;
        let mut budget = plan.max_traversal_nodes;
        let mut entries = Vec::new();

        for ancestor in graph.sponsor_chain(seller) {
            // Rank is cheap to check; compression is not.
            if graph.current_step(&ancestor) != manager_step {
                continue;
            }
            if budget == 0 {
                break;
            }
            let eligibility = Self::eligibility_within(graph, &ancestor, plan, &mut budget);
            if !eligibility.eligible {
                continue;
            }
            let Some(level) = eligibility.compression.level_of(seller) else {
                continue;
            };
            entries.push(CommissionEntry::new(
                sale.event_id.clone(),
                ancestor,
                seller.clone(),
                PlanType::Leadership,
                Some(level),
                0,
                sale.amount,
                amount,
                sale.timestamp,
            ));
        }

        Ok(entries)
    }
}
