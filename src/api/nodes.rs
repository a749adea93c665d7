use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::AppState;
use crate::domain::{AccountStatus, AffiliateNode, Decimal, Leg, NodeId, TimeMs};
use crate::engine::Eligibility;
use crate::error::AppError;
use crate::service::PlacementRequest;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    /// Generated when absent.
    pub node_id: Option<String>,
    pub sponsor_id: Option<String>,
    pub preferred_leg: Option<String>,
    pub current_step: Option<u32>,
    pub account_status: Option<String>,
    pub deferred_balance: Option<String>,
    pub enrolled_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub step: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub status: String,
    pub deferred_balance: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_leg: Option<Leg>,
    pub left_child: Option<String>,
    pub right_child: Option<String>,
    pub left_volume: String,
    pub right_volume: String,
    pub total_cycles_matched: u64,
    pub cycles_today: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles_day: Option<String>,
    pub current_step: u32,
    pub account_status: AccountStatus,
    pub deferred_balance: String,
    pub enrolled_at: i64,
}

impl From<AffiliateNode> for NodeDto {
    fn from(node: AffiliateNode) -> Self {
        let id_string = |id: Option<NodeId>| id.map(|i| i.as_str().to_string());
        NodeDto {
            node_id: node.id.as_str().to_string(),
            sponsor_id: id_string(node.sponsor_id),
            parent_id: id_string(node.parent_id),
            placement_leg: node.placement_leg,
            left_child: id_string(node.left_child),
            right_child: id_string(node.right_child),
            left_volume: node.left_volume.to_canonical_string(),
            right_volume: node.right_volume.to_canonical_string(),
            total_cycles_matched: node.total_cycles_matched,
            cycles_today: node.cycles_today,
            cycles_day: node.cycles_day.map(|d| d.to_string()),
            current_step: node.current_step,
            account_status: node.account_status,
            deferred_balance: node.deferred_balance.to_canonical_string(),
            enrolled_at: node.enrolled_at.as_ms(),
        }
    }
}

fn parse_node_id(raw: &str) -> Result<NodeId, AppError> {
    NodeId::from_str(raw).map_err(|_| AppError::BadRequest("Invalid node id".into()))
}

fn parse_balance(raw: Option<&str>) -> Result<Option<Decimal>, AppError> {
    raw.map(|s| {
        let balance = Decimal::from_str(s)
            .map_err(|_| AppError::BadRequest("Invalid deferredBalance".into()))?;
        if balance.is_negative() {
            return Err(AppError::BadRequest("deferredBalance must not be negative".into()));
        }
        Ok(balance)
    })
    .transpose()
}

fn parse_status(raw: &str) -> Result<AccountStatus, AppError> {
    AccountStatus::parse(raw).ok_or_else(|| {
        AppError::BadRequest("status must be active, deferred or admin_activated".into())
    })
}

pub async fn create_node(
    State(state): State<AppState>,
    Json(body): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<NodeDto>), AppError> {
    let node_id = match body.node_id.as_deref() {
        Some(raw) => parse_node_id(raw)?,
        None => NodeId::new(uuid::Uuid::new_v4().to_string()),
    };
    let sponsor_id = body.sponsor_id.as_deref().map(parse_node_id).transpose()?;
    let preferred_leg = body
        .preferred_leg
        .as_deref()
        .map(|s| {
            Leg::parse(s).ok_or_else(|| AppError::BadRequest("preferredLeg must be left or right".into()))
        })
        .transpose()?;
    let account_status = body
        .account_status
        .as_deref()
        .map(parse_status)
        .transpose()?
        .unwrap_or_default();

    let mut request = PlacementRequest::new(
        node_id,
        sponsor_id,
        body.enrolled_at.map(TimeMs::new).unwrap_or_else(TimeMs::now),
    );
    request.preferred_leg = preferred_leg;
    request.current_step = body.current_step.unwrap_or(0);
    request.account_status = account_status;
    request.deferred_balance = parse_balance(body.deferred_balance.as_deref())?;

    let node = state.service.place_node(request).await?;
    Ok((StatusCode::CREATED, Json(node.into())))
}

pub async fn get_node(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<NodeDto>, AppError> {
    let id = parse_node_id(&id)?;
    let node = state.service.get_node(&id).await?;
    Ok(Json(node.into()))
}

pub async fn set_step(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<StepRequest>,
) -> Result<Json<NodeDto>, AppError> {
    let id = parse_node_id(&id)?;
    let node = state.service.set_step(&id, body.step).await?;
    Ok(Json(node.into()))
}

pub async fn set_status(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<NodeDto>, AppError> {
    let id = parse_node_id(&id)?;
    let status = parse_status(&body.status)?;
    let balance = parse_balance(body.deferred_balance.as_deref())?;
    let node = state
        .service
        .set_account_status(&id, status, balance)
        .await?;
    Ok(Json(node.into()))
}

/// Compressed lines and leadership eligibility of a node.
pub async fn get_compression(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Eligibility>, AppError> {
    let id = parse_node_id(&id)?;
    let eligibility = state.service.compression_for(&id).await?;
    Ok(Json(eligibility))
}
