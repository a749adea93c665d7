//! SQLite persistence for the affiliate tree and the commission ledger.
//!
//! This module provides:
//! - Database initialization and the embedded schema
//! - SQLite pragma configuration
//! - Repository layer for tree and ledger operations

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{LedgerFilter, RepoError, Repository};
