//! Transactional wrapper around the engines: one storage transaction per
//! sale or placement, serialized per tree and retried on lock contention.

mod locks;

pub use locks::ChainLocks;

use crate::config::PlanConfig;
use crate::db::{RepoError, Repository};
use crate::domain::{
    AccountStatus, AffiliateNode, CommissionEntry, Decimal, EventId, Leg, NodeId, SaleEvent,
    SaleValidationError, TimeMs,
};
use crate::engine::{
    BinaryPlacementEngine, CompensationEngine, Eligibility, GraphSnapshot, GraphView,
    LeadershipBonusCalculator, PlacementError, SaleError,
};
use crate::sink::CommissionSink;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CompensationError {
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    InvalidSale(#[from] SaleValidationError),
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("sale timestamp {0} is out of range")]
    BadTimestamp(i64),
    #[error("volume of {0} would become negative")]
    NegativeVolume(NodeId),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<SaleError> for CompensationError {
    fn from(err: SaleError) -> Self {
        match err {
            SaleError::Invalid(e) => CompensationError::InvalidSale(e),
            SaleError::Tree(e) => CompensationError::Placement(e),
            SaleError::BadTimestamp(ms) => CompensationError::BadTimestamp(ms),
        }
    }
}

impl From<RepoError> for CompensationError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Sqlx(e) => CompensationError::Db(e),
            RepoError::NodeNotFound(id) => CompensationError::NodeNotFound(id),
            RepoError::LegOccupied { parent, leg } => {
                CompensationError::Placement(PlacementError::LegOccupied { parent, leg })
            }
            RepoError::NegativeVolume(id) => CompensationError::NegativeVolume(id),
            RepoError::VolumeOverflow(id) => {
                CompensationError::InvalidSale(SaleValidationError::VolumeOverflow(id))
            }
        }
    }
}

impl CompensationError {
    /// Busy/locked database or an exhausted pool; worth retrying whole.
    pub fn is_transient(&self) -> bool {
        match self {
            CompensationError::Db(sqlx::Error::PoolTimedOut) => true,
            CompensationError::Db(sqlx::Error::Database(db)) => {
                let primary = db
                    .code()
                    .as_deref()
                    .and_then(|c| c.parse::<i32>().ok())
                    .map(|c| c & 0xff);
                // SQLITE_BUSY, SQLITE_LOCKED
                matches!(primary, Some(5) | Some(6))
            }
            _ => false,
        }
    }
}

/// A node to attach to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest {
    pub node_id: NodeId,
    pub sponsor_id: Option<NodeId>,
    pub preferred_leg: Option<Leg>,
    pub current_step: u32,
    pub account_status: AccountStatus,
    /// Defaults to the plan's deferred amount for `Deferred` nodes.
    pub deferred_balance: Option<Decimal>,
    pub enrolled_at: TimeMs,
}

impl PlacementRequest {
    pub fn new(node_id: NodeId, sponsor_id: Option<NodeId>, enrolled_at: TimeMs) -> Self {
        Self {
            node_id,
            sponsor_id,
            preferred_leg: None,
            current_step: 0,
            account_status: AccountStatus::Active,
            deferred_balance: None,
            enrolled_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Applied,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleOutcome {
    pub status: SaleStatus,
    pub event_id: EventId,
    pub cycles_matched: u32,
    /// Entries of this event; for a duplicate, those already in the ledger.
    pub entries: Vec<CommissionEntry>,
}

enum Attempt {
    Applied {
        entries: Vec<CommissionEntry>,
        cycles: u32,
        volume_writes: usize,
    },
    Duplicate,
}

#[derive(Clone)]
pub struct CompensationService {
    repo: Arc<Repository>,
    sink: Arc<dyn CommissionSink>,
    plan: PlanConfig,
    locks: ChainLocks,
    retry_window: Duration,
}

impl CompensationService {
    pub fn new(repo: Arc<Repository>, sink: Arc<dyn CommissionSink>, plan: PlanConfig) -> Self {
        Self {
            repo,
            sink,
            plan,
            locks: ChainLocks::new(),
            retry_window: Duration::from_secs(10),
        }
    }

    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    pub fn plan(&self) -> &PlanConfig {
        &self.plan
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(500),
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry window
    /// closes. Only transient storage errors are retried.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, CompensationError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CompensationError>>,
    {
        let op = &op;
        retry(self.backoff(), move || async move {
            op().await.map_err(|e| {
                if e.is_transient() {
                    debug!(error = %e, "Transient storage error, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    pub async fn get_node(&self, id: &NodeId) -> Result<AffiliateNode, CompensationError> {
        self.repo
            .get_node(id)
            .await?
            .ok_or_else(|| CompensationError::NodeNotFound(id.clone()))
    }

    /// Lock key for the tree containing `id`, falling back to `id` itself.
    async fn chain_key(&self, id: &NodeId) -> Result<NodeId, CompensationError> {
        Ok(self.repo.tree_root(id).await?.unwrap_or_else(|| id.clone()))
    }

    /// Attach a node under its sponsor (or as a new root).
    pub async fn place_node(
        &self,
        request: PlacementRequest,
    ) -> Result<AffiliateNode, CompensationError> {
        let key = match &request.sponsor_id {
            Some(sponsor) => self.chain_key(sponsor).await?,
            None => request.node_id.clone(),
        };
        let _guard = self.locks.acquire(&key).await;

        let node = self.with_retry(|| self.place_once(&request)).await?;
        info!(
            node_id = %node.id,
            sponsor = ?node.sponsor_id.as_ref().map(|s| s.as_str()),
            parent = ?node.parent_id.as_ref().map(|s| s.as_str()),
            leg = ?node.placement_leg,
            "Node placed"
        );
        Ok(node)
    }

    async fn place_once(
        &self,
        request: &PlacementRequest,
    ) -> Result<AffiliateNode, CompensationError> {
        let mut tx = self.repo.begin().await?;

        if Repository::get_node_in(&mut tx, &request.node_id).await?.is_some() {
            return Err(PlacementError::AlreadyExists(request.node_id.clone()).into());
        }
        let mut graph = match &request.sponsor_id {
            Some(sponsor) => {
                Repository::load_placement_context_in(&mut tx, sponsor, request.preferred_leg)
                    .await?
            }
            None => GraphSnapshot::new(),
        };

        let mut node = BinaryPlacementEngine::place_node(
            &mut graph,
            request.node_id.clone(),
            request.sponsor_id.as_ref(),
            request.preferred_leg,
            request.enrolled_at,
        )?;
        node.current_step = request.current_step;
        node.deferred_balance = match (request.deferred_balance, request.account_status) {
            (Some(balance), _) => balance,
            (None, AccountStatus::Deferred) => self.plan.deferred_payment_amount,
            (None, _) => Decimal::zero(),
        };
        if node.deferred_balance.is_negative() {
            return Err(CompensationError::NegativeVolume(node.id));
        }
        node.account_status = request.account_status.settled(node.deferred_balance);

        if let (Some(parent), Some(leg)) = (&node.parent_id, node.placement_leg) {
            Repository::set_child_in(&mut tx, parent, leg, &node.id).await?;
        }
        if !Repository::insert_node_in(&mut tx, &node).await? {
            return Err(PlacementError::AlreadyExists(node.id).into());
        }

        tx.commit().await?;
        Ok(node)
    }

    /// Apply a sale exactly once and forward its entries to the sink.
    pub async fn process_sale(&self, sale: &SaleEvent) -> Result<SaleOutcome, CompensationError> {
        sale.validate()?;
        let key = self
            .repo
            .tree_root(&sale.source_node_id)
            .await?
            .ok_or_else(|| SaleValidationError::UnknownSource(sale.source_node_id.clone()))?;
        let _guard = self.locks.acquire(&key).await;

        match self.with_retry(|| self.apply_once(sale)).await? {
            Attempt::Duplicate => {
                warn!(event_id = %sale.event_id, "Duplicate sale delivery ignored");
                let entries = self.repo.entries_for_event(&sale.event_id).await?;
                Ok(SaleOutcome {
                    status: SaleStatus::Duplicate,
                    event_id: sale.event_id.clone(),
                    cycles_matched: 0,
                    entries,
                })
            }
            Attempt::Applied {
                entries,
                cycles,
                volume_writes,
            } => {
                debug!(
                    event_id = %sale.event_id,
                    source = %sale.source_node_id,
                    amount = %sale.amount,
                    volume_writes,
                    cycles,
                    entries = entries.len(),
                    "Sale applied"
                );
                if let Err(e) = self.sink.deliver(&sale.event_id, &entries).await {
                    warn!(event_id = %sale.event_id, error = %e, "Commission sink delivery failed");
                }
                Ok(SaleOutcome {
                    status: SaleStatus::Applied,
                    event_id: sale.event_id.clone(),
                    cycles_matched: cycles,
                    entries,
                })
            }
        }
    }

    async fn apply_once(&self, sale: &SaleEvent) -> Result<Attempt, CompensationError> {
        let mut tx = self.repo.begin().await?;

        // First write: claims the event and takes the database write lock.
        if !Repository::mark_event_processed_in(&mut tx, sale, TimeMs::now()).await? {
            return Ok(Attempt::Duplicate);
        }

        let mut graph = self.sale_graph_in(&mut tx, &sale.source_node_id).await?;
        let effects = CompensationEngine::apply_sale(&mut graph, sale, &self.plan)?;

        let deltas = effects.volume_deltas();
        for delta in &deltas {
            Repository::update_volumes_in(&mut tx, &delta.node_id, delta.left, delta.right)
                .await?;
        }
        let mut cycles = 0u32;
        for matched in &effects.cycles {
            cycles += matched.cycles;
            Repository::increment_cycles_in(&mut tx, &matched.node_id, matched.cycles, matched.day)
                .await?;
            if matched.entries.iter().any(|e| e.withheld.is_positive()) {
                persist_deferral(&mut tx, &matched.node_id, &graph).await?;
            }
        }
        Repository::append_entries_in(&mut tx, &effects.entries).await?;

        tx.commit().await?;
        Ok(Attempt::Applied {
            entries: effects.entries,
            cycles,
            volume_writes: deltas.len(),
        })
    }

    /// Nodes a sale by `seller` can touch: its binary and sponsor chains,
    /// plus the referral subtree of its highest manager sponsor when the
    /// seller is a manager. Other branches of the tree are never read.
    async fn sale_graph_in(
        &self,
        conn: &mut SqliteConnection,
        seller: &NodeId,
    ) -> Result<GraphSnapshot, CompensationError> {
        let mut graph = Repository::load_sale_context_in(conn, seller).await?;
        if let Some(scope) = LeadershipBonusCalculator::scope_root(&graph, seller, &self.plan) {
            let loaded = Repository::load_subtree_into(
                conn,
                &mut graph,
                &scope,
                self.plan.max_traversal_nodes,
            )
            .await?;
            debug!(seller = %seller, scope = %scope, loaded, "Loaded leadership scope");
        }
        Ok(graph)
    }

    /// Leadership eligibility of `id` together with its compressed lines.
    pub async fn compression_for(&self, id: &NodeId) -> Result<Eligibility, CompensationError> {
        let graph = self.repo.load_subtree(id, self.plan.max_traversal_nodes).await?;
        if !graph.contains(id) {
            return Err(CompensationError::NodeNotFound(id.clone()));
        }
        Ok(LeadershipBonusCalculator::eligibility(&graph, id, &self.plan))
    }

    /// Record a rank change coming from the rank source.
    pub async fn set_step(&self, id: &NodeId, step: u32) -> Result<AffiliateNode, CompensationError> {
        let key = self.chain_key(id).await?;
        let _guard = self.locks.acquire(&key).await;

        if !self.repo.set_step(id, step).await? {
            return Err(CompensationError::NodeNotFound(id.clone()));
        }
        info!(node_id = %id, step, "Step updated");
        self.get_node(id).await
    }

    /// Change payment status. Without an explicit balance, `Deferred` takes
    /// the plan's deferred amount and other statuses keep the current one.
    /// `Deferred` with nothing left to recover is stored as `Active`.
    pub async fn set_account_status(
        &self,
        id: &NodeId,
        status: AccountStatus,
        deferred_balance: Option<Decimal>,
    ) -> Result<AffiliateNode, CompensationError> {
        let key = self.chain_key(id).await?;
        let _guard = self.locks.acquire(&key).await;

        let current = self.get_node(id).await?;
        let balance = match (deferred_balance, status) {
            (Some(balance), _) => balance,
            (None, AccountStatus::Deferred) => self.plan.deferred_payment_amount,
            (None, _) => current.deferred_balance,
        };
        if balance.is_negative() {
            return Err(CompensationError::NegativeVolume(id.clone()));
        }
        let status = status.settled(balance);
        self.repo.set_account_status(id, status, balance).await?;
        info!(node_id = %id, status = %status.as_str(), balance = %balance, "Account status updated");
        self.get_node(id).await
    }
}

async fn persist_deferral(
    conn: &mut SqliteConnection,
    id: &NodeId,
    graph: &GraphSnapshot,
) -> Result<(), CompensationError> {
    let node = graph
        .node(id)
        .ok_or_else(|| CompensationError::NodeNotFound(id.clone()))?;
    Repository::set_account_status_in(conn, id, node.account_status, node.deferred_balance)
        .await?;
    Ok(())
}
