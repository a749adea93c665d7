//! Downstream hand-off for committed commission entries.

use crate::domain::{CommissionEntry, Decimal, EventId};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tracing::info;

pub mod mock;

pub use mock::MockCommissionSink;

/// Receives the entries of each applied sale after the ledger commit.
///
/// Delivery is at-least-once from the sink's point of view: the ledger is
/// the source of truth and a failed delivery is logged, not rolled back.
#[async_trait]
pub trait CommissionSink: Send + Sync + fmt::Debug {
    async fn deliver(
        &self,
        event_id: &EventId,
        entries: &[CommissionEntry],
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("sink rejected entries: {0}")]
    Rejected(String),
}

/// Sink that only logs what it receives.
#[derive(Debug, Clone, Default)]
pub struct LoggingSink;

#[async_trait]
impl CommissionSink for LoggingSink {
    async fn deliver(
        &self,
        event_id: &EventId,
        entries: &[CommissionEntry],
    ) -> Result<(), SinkError> {
        let payable = Decimal::checked_sum(entries.iter().map(|e| e.payable()));
        let withheld = Decimal::checked_sum(entries.iter().map(|e| e.withheld));
        info!(
            event_id = %event_id,
            entries = entries.len(),
            payable = %total_label(payable),
            withheld = %total_label(withheld),
            "Commissions released"
        );
        Ok(())
    }
}

fn total_label(total: Option<Decimal>) -> String {
    total.map_or_else(|| "out of range".to_string(), |t| t.to_canonical_string())
}
