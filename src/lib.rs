pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod service;
pub mod sink;

pub use config::{Config, PlanConfig};
pub use db::{init_db, Repository};
pub use domain::{
    AccountStatus, AffiliateNode, CommissionEntry, Decimal, EventId, Leg, NodeId, PlanType,
    SaleEvent, TimeMs,
};
pub use error::AppError;
pub use service::{CompensationError, CompensationService, PlacementRequest, SaleOutcome};
pub use sink::{CommissionSink, LoggingSink, MockCommissionSink};
