use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::AppState;
use crate::db::LedgerFilter;
use crate::domain::{CommissionEntry, Decimal, EventId, NodeId, PlanType};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsQuery {
    pub recipient: Option<String>,
    pub plan: Option<String>,
    pub event_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsResponse {
    pub total_amount: String,
    pub total_payable: String,
    pub entry_count: i64,
    pub entries: Vec<EntryDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDto {
    pub entry_key: String,
    pub event_id: String,
    pub recipient: String,
    pub source: String,
    pub plan: PlanType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    pub basis: String,
    pub amount: String,
    pub withheld: String,
    pub payable: String,
    pub created_at: i64,
}

impl From<CommissionEntry> for EntryDto {
    fn from(e: CommissionEntry) -> Self {
        EntryDto {
            payable: e.payable().to_canonical_string(),
            entry_key: e.entry_key,
            event_id: e.event_id.as_str().to_string(),
            recipient: e.recipient.as_str().to_string(),
            source: e.source.as_str().to_string(),
            plan: e.plan,
            level: e.level,
            basis: e.basis.to_canonical_string(),
            amount: e.amount.to_canonical_string(),
            withheld: e.withheld.to_canonical_string(),
            created_at: e.created_at.as_ms(),
        }
    }
}

/// Flat row for the CSV export.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    entry_key: &'a str,
    event_id: &'a str,
    recipient: &'a str,
    source: &'a str,
    plan: &'static str,
    level: Option<u32>,
    basis: String,
    amount: String,
    withheld: String,
    payable: String,
    created_at: i64,
}

impl CommissionsQuery {
    fn into_filter(self) -> Result<LedgerFilter, AppError> {
        let recipient = self
            .recipient
            .as_deref()
            .map(NodeId::from_str)
            .transpose()
            .map_err(|_| AppError::BadRequest("Invalid recipient".into()))?;
        let plan = self
            .plan
            .as_deref()
            .map(|p| {
                PlanType::parse(p).ok_or_else(|| {
                    AppError::BadRequest("plan must be binary, stairstep or leadership".into())
                })
            })
            .transpose()?;
        Ok(LedgerFilter {
            recipient,
            plan,
            event_id: self.event_id.map(EventId::new),
            limit: self.limit,
        })
    }
}

pub async fn get_commissions(
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<CommissionsResponse>, AppError> {
    let filter = params.into_filter()?;
    let entries = state.repo.query_entries(&filter).await?;

    let out_of_range =
        || AppError::BadRequest("ledger total is out of range; narrow the filter".into());
    let total_amount =
        Decimal::checked_sum(entries.iter().map(|e| e.amount)).ok_or_else(out_of_range)?;
    let total_payable =
        Decimal::checked_sum(entries.iter().map(|e| e.payable())).ok_or_else(out_of_range)?;
    let entry_count = entries.len() as i64;

    Ok(Json(CommissionsResponse {
        total_amount: total_amount.to_canonical_string(),
        total_payable: total_payable.to_canonical_string(),
        entry_count,
        entries: entries.into_iter().map(EntryDto::from).collect(),
    }))
}

/// Ledger rows matching the same filters, as CSV.
pub async fn export_commissions(
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let filter = params.into_filter()?;
    let entries = state.repo.query_entries(&filter).await?;
    let body = entries_to_csv(&entries)?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body))
}

fn entries_to_csv(entries: &[CommissionEntry]) -> Result<Vec<u8>, AppError> {
    let csv_err = |e: csv::Error| AppError::Internal(format!("CSV export failed: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    for e in entries {
        writer
            .serialize(CsvRow {
                entry_key: &e.entry_key,
                event_id: e.event_id.as_str(),
                recipient: e.recipient.as_str(),
                source: e.source.as_str(),
                plan: e.plan.as_str(),
                level: e.level,
                basis: e.basis.to_canonical_string(),
                amount: e.amount.to_canonical_string(),
                withheld: e.withheld.to_canonical_string(),
                payable: e.payable().to_canonical_string(),
                created_at: e.created_at.as_ms(),
            })
            .map_err(csv_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV export failed: {}", e)))
}
