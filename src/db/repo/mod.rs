//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `nodes.rs` - affiliate tree reads and guarded writes
//! - `ledger.rs` - commission entries and processed sale events
//!
//! Methods suffixed `_in` run on a caller-supplied connection so several of
//! them can share one transaction.

mod ledger;
mod nodes;

pub use ledger::LedgerFilter;

use crate::domain::{Decimal, Leg, NodeId};
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::Transaction;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Failures of the guarded tree writes.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("{leg} leg of {parent} is already occupied")]
    LegOccupied { parent: NodeId, leg: Leg },
    #[error("volume of {0} would become negative")]
    NegativeVolume(NodeId),
    #[error("volume of {0} would overflow")]
    VolumeOverflow(NodeId),
}

/// Repository for database operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction for a batch of `_in` calls.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Cheap liveness query behind `/ready`.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Parse a stored decimal, logging and defaulting on corruption.
pub(crate) fn decimal_column(raw: &str, column: &'static str, owner: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|e| {
        warn!(
            owner = %owner,
            column,
            value = %raw,
            error = %e,
            "Failed to parse stored decimal, using default"
        );
        Decimal::default()
    })
}
