pub mod commissions;
pub mod health;
pub mod nodes;
pub mod sales;

use crate::db::Repository;
use crate::service::CompensationService;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CompensationService>,
    pub repo: Arc<Repository>,
}

impl AppState {
    pub fn new(service: Arc<CompensationService>) -> Self {
        let repo = service.repo().clone();
        Self { service, repo }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/nodes", post(nodes::create_node))
        .route("/v1/nodes/:id", get(nodes::get_node))
        .route("/v1/nodes/:id/step", put(nodes::set_step))
        .route("/v1/nodes/:id/status", put(nodes::set_status))
        .route("/v1/nodes/:id/compression", get(nodes::get_compression))
        .route("/v1/sales", post(sales::process_sale))
        .route("/v1/commissions", get(commissions::get_commissions))
        .route(
            "/v1/commissions/export",
            get(commissions::export_commissions),
        )
        .layer(cors)
        .with_state(state)
}
