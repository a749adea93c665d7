//! Commission ledger and processed-event operations for the repository.

use crate::domain::{CommissionEntry, EventId, NodeId, PlanType, SaleEvent, TimeMs};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::warn;

use super::{decimal_column, Repository};

/// Optional filters for a ledger query. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    pub recipient: Option<NodeId>,
    pub plan: Option<PlanType>,
    pub event_id: Option<EventId>,
    pub limit: Option<u32>,
}

fn entry_from_row(row: &SqliteRow) -> CommissionEntry {
    let entry_key: String = row.get("entry_key");
    let plan_str: String = row.get("plan");
    let plan = PlanType::parse(&plan_str).unwrap_or_else(|| {
        warn!(entry_key = %entry_key, plan = %plan_str, "Unknown plan type in ledger row");
        PlanType::Binary
    });
    let basis: String = row.get("basis");
    let amount: String = row.get("amount");
    let withheld: String = row.get("withheld");

    CommissionEntry {
        event_id: EventId::new(row.get::<String, _>("event_id")),
        recipient: NodeId::new(row.get::<String, _>("recipient")),
        source: NodeId::new(row.get::<String, _>("source")),
        plan,
        level: row
            .get::<Option<i64>, _>("level")
            .and_then(|l| u32::try_from(l).ok()),
        basis: decimal_column(&basis, "basis", &entry_key),
        amount: decimal_column(&amount, "amount", &entry_key),
        withheld: decimal_column(&withheld, "withheld", &entry_key),
        created_at: TimeMs::new(row.get("created_at")),
        entry_key,
    }
}

impl Repository {
    /// Append entries, skipping any whose `entry_key` is already present.
    ///
    /// Returns the number of newly inserted entries.
    pub async fn append_entries_in(
        conn: &mut SqliteConnection,
        entries: &[CommissionEntry],
    ) -> Result<usize, sqlx::Error> {
        let mut inserted = 0usize;
        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT INTO commission_entries (
                    entry_key, event_id, recipient, source, plan, level,
                    basis, amount, withheld, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(entry_key) DO NOTHING
                "#,
            )
            .bind(entry.entry_key.as_str())
            .bind(entry.event_id.as_str())
            .bind(entry.recipient.as_str())
            .bind(entry.source.as_str())
            .bind(entry.plan.as_str())
            .bind(entry.level.map(i64::from))
            .bind(entry.basis.to_canonical_string())
            .bind(entry.amount.to_canonical_string())
            .bind(entry.withheld.to_canonical_string())
            .bind(entry.created_at.as_ms())
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Append entries in their own transaction.
    pub async fn append_entries(&self, entries: &[CommissionEntry]) -> Result<usize, sqlx::Error> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let inserted = Self::append_entries_in(&mut tx, entries).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Ledger rows in append order.
    pub async fn query_entries(
        &self,
        filter: &LedgerFilter,
    ) -> Result<Vec<CommissionEntry>, sqlx::Error> {
        let recipient = filter.recipient.as_ref().map(|r| r.as_str());
        let plan = filter.plan.map(|p| p.as_str());
        let event_id = filter.event_id.as_ref().map(|e| e.as_str());
        let limit = filter.limit.map(i64::from).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT entry_key, event_id, recipient, source, plan, level,
                   basis, amount, withheld, created_at
            FROM commission_entries
            WHERE (? IS NULL OR recipient = ?)
              AND (? IS NULL OR plan = ?)
              AND (? IS NULL OR event_id = ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(recipient)
        .bind(recipient)
        .bind(plan)
        .bind(plan)
        .bind(event_id)
        .bind(event_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }

    pub async fn entries_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<CommissionEntry>, sqlx::Error> {
        self.query_entries(&LedgerFilter {
            event_id: Some(event_id.clone()),
            ..LedgerFilter::default()
        })
        .await
    }

    /// Claim `sale.event_id`. Returns `false` if it was already processed.
    ///
    /// As the first write of a sale transaction this also takes SQLite's
    /// write lock, so concurrent deliveries of one event serialize here.
    pub async fn mark_event_processed_in(
        conn: &mut SqliteConnection,
        sale: &SaleEvent,
        processed_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, source_node_id, amount, sale_time, processed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(sale.event_id.as_str())
        .bind(sale.source_node_id.as_str())
        .bind(sale.amount.to_canonical_string())
        .bind(sale.timestamp.as_ms())
        .bind(processed_at.as_ms())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn is_event_processed(&self, event_id: &EventId) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM processed_events WHERE event_id = ?")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}
