use crate::config::PlanConfig;
use crate::domain::{CommissionEntry, Decimal, Leg, NodeId, SaleEvent, SaleValidationError};
use std::collections::BTreeMap;
use thiserror::Error;

use super::graph::{GraphSnapshot, GraphView};
use super::leadership::LeadershipBonusCalculator;
use super::placement::{BinaryPlacementEngine, CycleMatch, PlacementError, VolumeCredit};
use super::stairstep::StairStepCalculator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaleError {
    #[error(transparent)]
    Invalid(#[from] SaleValidationError),
    #[error(transparent)]
    Tree(#[from] PlacementError),
    #[error("sale timestamp {0} is out of range")]
    BadTimestamp(i64),
}

/// Net change to a node's leg volumes: credits minus flushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDelta {
    pub node_id: NodeId,
    pub left: Decimal,
    pub right: Decimal,
}

/// Everything one sale does to the tree and the ledger.
#[derive(Debug, Clone, Default)]
pub struct SaleEffects {
    pub credits: Vec<VolumeCredit>,
    pub cycles: Vec<CycleMatch>,
    pub entries: Vec<CommissionEntry>,
}

impl SaleEffects {
    pub fn volume_deltas(&self) -> Vec<VolumeDelta> {
        let mut deltas: BTreeMap<&NodeId, (Decimal, Decimal)> = BTreeMap::new();
        // record_sale credits each ancestor once per sale.
        for credit in &self.credits {
            let slot = deltas.entry(&credit.ancestor).or_default();
            match credit.leg {
                Leg::Left => slot.0 = credit.amount,
                Leg::Right => slot.1 = credit.amount,
            }
        }
        for matched in &self.cycles {
            let slot = deltas.entry(&matched.node_id).or_default();
            slot.0 -= matched.flushed;
            slot.1 -= matched.flushed;
        }
        deltas
            .into_iter()
            .map(|(id, (left, right))| VolumeDelta {
                node_id: id.clone(),
                left,
                right,
            })
            .collect()
    }
}

pub struct CompensationEngine;

impl CompensationEngine {
    /// Apply one sale to `graph` and collect the resulting entries.
    ///
    /// Entry order: binary cycles on every credited ancestor, stair-step,
    /// then the leadership fan-out. Commission amounts are computed before
    /// any volume moves, so a rejected sale leaves `graph` untouched.
    pub fn apply_sale(
        graph: &mut GraphSnapshot,
        sale: &SaleEvent,
        plan: &PlanConfig,
    ) -> Result<SaleEffects, SaleError> {
        sale.validate()?;
        if graph.node(&sale.source_node_id).is_none() {
            return Err(SaleValidationError::UnknownSource(sale.source_node_id.clone()).into());
        }
        let day = sale
            .timestamp
            .utc_day()
            .ok_or(SaleError::BadTimestamp(sale.timestamp.as_ms()))?;

        let stairstep = StairStepCalculator::commissions(graph, sale, &plan.stairstep)?;
        let leadership = LeadershipBonusCalculator::on_manager_sale(graph, sale, plan)?;
        let credits = BinaryPlacementEngine::record_sale(graph, &sale.source_node_id, sale.amount)?;

        let mut effects = SaleEffects::default();
        for credit in &credits {
            let node = graph
                .node_mut(&credit.ancestor)
                .ok_or_else(|| PlacementError::UnknownNode(credit.ancestor.clone()))?;
            let matched = BinaryPlacementEngine::match_cycles(node, sale, day, plan);
            if matched.cycles > 0 {
                effects.entries.extend(matched.entries.iter().cloned());
                effects.cycles.push(matched);
            }
        }
        effects.credits = credits;

        effects.entries.extend(stairstep);
        effects.entries.extend(leadership);

        Ok(effects)
    }
}
