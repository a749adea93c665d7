//! Recording sink for tests.

use super::{CommissionSink, SinkError};
use crate::domain::{CommissionEntry, EventId};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Sink that records every delivery and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct MockCommissionSink {
    deliveries: Arc<Mutex<Vec<(EventId, Vec<CommissionEntry>)>>>,
    failure: Option<SinkError>,
}

impl MockCommissionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery return `err` (after recording it).
    pub fn with_failure(mut self, err: SinkError) -> Self {
        self.failure = Some(err);
        self
    }

    pub fn deliveries(&self) -> Vec<(EventId, Vec<CommissionEntry>)> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// All delivered entries, flattened in delivery order.
    pub fn entries(&self) -> Vec<CommissionEntry> {
        self.deliveries()
            .into_iter()
            .flat_map(|(_, entries)| entries)
            .collect()
    }
}

#[async_trait]
impl CommissionSink for MockCommissionSink {
    async fn deliver(
        &self,
        event_id: &EventId,
        entries: &[CommissionEntry],
    ) -> Result<(), SinkError> {
        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.push((event_id.clone(), entries.to_vec()));
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
