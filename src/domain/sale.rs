//! Sale event consumed by the compensation engine.

use crate::domain::{Decimal, EventId, NodeId, TimeMs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A completed purchase attributed to an affiliate node.
///
/// Created once by the purchase workflow and applied at most once, keyed by
/// `event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleEvent {
    pub event_id: EventId,
    pub source_node_id: NodeId,
    pub amount: Decimal,
    pub timestamp: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaleValidationError {
    #[error("sale amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("sale event id must not be empty")]
    EmptyEventId,
    #[error("unknown source node {0}")]
    UnknownSource(NodeId),
    #[error("sale volume would overflow the leg totals of node {0}")]
    VolumeOverflow(NodeId),
    #[error("commission on sale amount {0} is out of range")]
    CommissionOverflow(Decimal),
}

impl SaleEvent {
    pub fn new(event_id: EventId, source_node_id: NodeId, amount: Decimal, timestamp: TimeMs) -> Self {
        Self {
            event_id,
            source_node_id,
            amount,
            timestamp,
        }
    }

    /// Checks that do not need the graph. Source existence is checked by the
    /// caller against its snapshot.
    pub fn validate(&self) -> Result<(), SaleValidationError> {
        if self.event_id.as_str().trim().is_empty() {
            return Err(SaleValidationError::EmptyEventId);
        }
        if !self.amount.is_positive() {
            return Err(SaleValidationError::NonPositiveAmount(self.amount));
        }
        Ok(())
    }
}
