use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::commissions::EntryDto;
use crate::api::AppState;
use crate::domain::{Decimal, EventId, NodeId, SaleEvent, TimeMs};
use crate::error::AppError;
use crate::service::SaleStatus;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    pub event_id: String,
    pub source_node_id: String,
    /// Decimal string, e.g. `"149.99"`.
    pub amount: String,
    /// Sale time in ms; defaults to now.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleResponse {
    pub status: SaleStatus,
    pub event_id: String,
    pub cycles_matched: u32,
    pub entries: Vec<EntryDto>,
}

pub async fn process_sale(
    State(state): State<AppState>,
    Json(body): Json<SaleRequest>,
) -> Result<Json<SaleResponse>, AppError> {
    let source = NodeId::from_str(&body.source_node_id)
        .map_err(|_| AppError::BadRequest("Invalid sourceNodeId".into()))?;
    let amount = Decimal::from_str(&body.amount)
        .map_err(|_| AppError::BadRequest("Invalid amount".into()))?;
    let sale = SaleEvent::new(
        EventId::new(body.event_id),
        source,
        amount,
        body.timestamp.map(TimeMs::new).unwrap_or_else(TimeMs::now),
    );

    let outcome = state.service.process_sale(&sale).await?;

    Ok(Json(SaleResponse {
        status: outcome.status,
        event_id: outcome.event_id.as_str().to_string(),
        cycles_matched: outcome.cycles_matched,
        entries: outcome.entries.into_iter().map(EntryDto::from).collect(),
    }))
}
