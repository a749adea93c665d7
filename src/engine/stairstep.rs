//! Rank-based stair-step commissions.

use crate::domain::{CommissionEntry, Decimal, PlanType, SaleEvent, SaleValidationError};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

use super::graph::{GraphView, RankEngine};

/// Percentage of the sale amount paid at each plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StairStepTable {
    percents: BTreeMap<u32, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StairStepParseError {
    #[error("expected step:percent pairs, got {0:?}")]
    MalformedPair(String),
    #[error("percent for step {0} must not be negative")]
    NegativePercent(u32),
    #[error("table must define at least one step")]
    Empty,
}

impl StairStepTable {
    pub fn new(percents: BTreeMap<u32, Decimal>) -> Self {
        Self { percents }
    }

    /// Percent for `step`. Steps between configured rows inherit the nearest
    /// lower row; steps below the first row earn nothing.
    pub fn percent_for(&self, step: u32) -> Decimal {
        self.percents
            .range(..=step)
            .next_back()
            .map(|(_, pct)| *pct)
            .unwrap_or_default()
    }

    pub fn highest_step(&self) -> u32 {
        self.percents.keys().next_back().copied().unwrap_or(0)
    }

    pub fn max_percent(&self) -> Decimal {
        self.percents.values().copied().max().unwrap_or_default()
    }
}

impl Default for StairStepTable {
    fn default() -> Self {
        Self::new(BTreeMap::from([
            (0, Decimal::zero()),
            (1, Decimal::from_u32(5)),
            (2, Decimal::from_u32(10)),
            (3, Decimal::from_u32(15)),
        ]))
    }
}

impl FromStr for StairStepTable {
    type Err = StairStepParseError;

    /// Parses `"0:0,1:5,2:10"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut percents = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let malformed = || StairStepParseError::MalformedPair(pair.to_string());
            let (step, pct) = pair.split_once(':').ok_or_else(malformed)?;
            let step = step.trim().parse::<u32>().map_err(|_| malformed())?;
            let pct = Decimal::from_str_canonical(pct).map_err(|_| malformed())?;
            if pct.is_negative() {
                return Err(StairStepParseError::NegativePercent(step));
            }
            percents.insert(step, pct);
        }
        if percents.is_empty() {
            return Err(StairStepParseError::Empty);
        }
        Ok(Self::new(percents))
    }
}

pub struct StairStepCalculator;

impl StairStepCalculator {
    /// Differential stair-step payout for one sale.
    ///
    /// The seller earns its own step's percent (level 0). Each sponsor above
    /// earns only the part of its percent not already paid below it, so the
    /// total never exceeds the table's maximum.
    pub fn commissions<G: GraphView + ?Sized>(
        graph: &G,
        sale: &SaleEvent,
        table: &StairStepTable,
    ) -> Result<Vec<CommissionEntry>, SaleValidationError> {
        let ceiling = table.max_percent();
        let mut paid = Decimal::zero();
        let mut entries = Vec::new();

        let seller = &sale.source_node_id;
        let upline = graph.sponsor_chain(seller);
        let recipients = std::iter::once(seller).chain(upline.iter());

        for (level, recipient) in recipients.enumerate() {
            if paid >= ceiling {
                break;
            }
            let pct = table.percent_for(graph.current_step(recipient));
            if pct <= paid {
                continue;
            }
            let differential = pct - paid;
            let amount = differential
                .percent_of(sale.amount)
                .ok_or(SaleValidationError::CommissionOverflow(sale.amount))?;
            paid = pct;
            entries.push(CommissionEntry::new(
                sale.event_id.clone(),
                recipient.clone(),
                seller.clone(),
                PlanType::Stairstep,
                Some(level as u32),
                0,
                sale.amount,
                amount,
                sale.timestamp,
            ));
        }

        Ok(entries)
    }
}
