//! Domain types for the affiliate compensation engine.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Domain primitives: TimeMs, NodeId, EventId, Leg
//! - AffiliateNode, SaleEvent and CommissionEntry

pub mod commission;
pub mod decimal;
pub mod node;
pub mod primitives;
pub mod sale;

pub use commission::{CommissionEntry, PlanType};
pub use decimal::Decimal;
pub use node::{AccountStatus, AffiliateNode};
pub use primitives::{EventId, Leg, NodeId, NodeIdParseError, TimeMs};
pub use sale::{SaleEvent, SaleValidationError};
