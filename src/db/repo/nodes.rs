//! Affiliate tree operations for the repository.

use crate::domain::{AccountStatus, AffiliateNode, Decimal, Leg, NodeId, TimeMs};
use crate::engine::GraphSnapshot;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::warn;

use super::{decimal_column, RepoError, Repository};

const NODE_COLUMNS: &str = "id, sponsor_id, parent_id, placement_leg, left_child, right_child, \
     left_volume, right_volume, total_cycles_matched, cycles_today, cycles_day, \
     current_step, account_status, deferred_balance, enrolled_at";

fn node_from_row(row: &SqliteRow) -> AffiliateNode {
    let id: String = row.get("id");
    let opt_id = |col: &str| row.get::<Option<String>, _>(col).map(NodeId::new);

    let placement_leg = row
        .get::<Option<String>, _>("placement_leg")
        .and_then(|s| Leg::parse(&s));
    let cycles_day = row
        .get::<Option<String>, _>("cycles_day")
        .and_then(|s| s.parse::<NaiveDate>().ok());
    let status_str: String = row.get("account_status");
    let account_status = AccountStatus::parse(&status_str).unwrap_or_else(|| {
        warn!(node_id = %id, status = %status_str, "Unknown account status, treating as active");
        AccountStatus::Active
    });

    let left: String = row.get("left_volume");
    let right: String = row.get("right_volume");
    let deferred: String = row.get("deferred_balance");

    AffiliateNode {
        sponsor_id: opt_id("sponsor_id"),
        parent_id: opt_id("parent_id"),
        placement_leg,
        left_child: opt_id("left_child"),
        right_child: opt_id("right_child"),
        left_volume: decimal_column(&left, "left_volume", &id),
        right_volume: decimal_column(&right, "right_volume", &id),
        total_cycles_matched: row.get::<i64, _>("total_cycles_matched").max(0) as u64,
        cycles_today: u32::try_from(row.get::<i64, _>("cycles_today")).unwrap_or_default(),
        cycles_day,
        current_step: u32::try_from(row.get::<i64, _>("current_step")).unwrap_or_default(),
        account_status,
        deferred_balance: decimal_column(&deferred, "deferred_balance", &id),
        enrolled_at: TimeMs::new(row.get("enrolled_at")),
        id: NodeId::new(id),
    }
}

impl Repository {
    /// Insert a node row. Returns `false` if the id already exists.
    pub async fn insert_node_in(
        conn: &mut SqliteConnection,
        node: &AffiliateNode,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO affiliate_nodes (
                id, sponsor_id, parent_id, placement_leg, left_child, right_child,
                left_volume, right_volume, total_cycles_matched, cycles_today, cycles_day,
                current_step, account_status, deferred_balance, enrolled_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(node.id.as_str())
        .bind(node.sponsor_id.as_ref().map(|s| s.as_str()))
        .bind(node.parent_id.as_ref().map(|s| s.as_str()))
        .bind(node.placement_leg.map(|l| l.as_str()))
        .bind(node.left_child.as_ref().map(|s| s.as_str()))
        .bind(node.right_child.as_ref().map(|s| s.as_str()))
        .bind(node.left_volume.to_canonical_string())
        .bind(node.right_volume.to_canonical_string())
        .bind(node.total_cycles_matched as i64)
        .bind(i64::from(node.cycles_today))
        .bind(node.cycles_day.map(|d| d.to_string()))
        .bind(i64::from(node.current_step))
        .bind(node.account_status.as_str())
        .bind(node.deferred_balance.to_canonical_string())
        .bind(node.enrolled_at.as_ms())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_node(&self, id: &NodeId) -> Result<Option<AffiliateNode>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::get_node_in(&mut conn, id).await
    }

    pub async fn get_node_in(
        conn: &mut SqliteConnection,
        id: &NodeId,
    ) -> Result<Option<AffiliateNode>, sqlx::Error> {
        let sql = format!("SELECT {} FROM affiliate_nodes WHERE id = ?", NODE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.as_ref().map(node_from_row))
    }

    /// Binary children of `id`, left first.
    pub async fn get_children(&self, id: &NodeId) -> Result<Vec<AffiliateNode>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM affiliate_nodes WHERE parent_id = ? ORDER BY placement_leg ASC",
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    pub async fn tree_root(&self, id: &NodeId) -> Result<Option<NodeId>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::tree_root_in(&mut conn, id).await
    }

    /// Top of the sponsor chain containing `id`.
    ///
    /// `None` when the node is unknown or its chain never reaches a root.
    pub async fn tree_root_in(
        conn: &mut SqliteConnection,
        id: &NodeId,
    ) -> Result<Option<NodeId>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            WITH RECURSIVE up(id, sponsor_id) AS (
                SELECT id, sponsor_id FROM affiliate_nodes WHERE id = ?
                UNION
                SELECT n.id, n.sponsor_id
                FROM affiliate_nodes n
                JOIN up ON n.id = up.sponsor_id
            )
            SELECT id FROM up WHERE sponsor_id IS NULL LIMIT 1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| NodeId::new(r.get::<String, _>("id"))))
    }

    /// The seller, its binary ancestors and its sponsor chain: every node a
    /// sale credits or pays through stair-step. Empty when `id` is unknown.
    pub async fn load_sale_context_in(
        conn: &mut SqliteConnection,
        id: &NodeId,
    ) -> Result<GraphSnapshot, sqlx::Error> {
        let sql = format!(
            r#"
            WITH RECURSIVE
                binary_up(id, parent_id) AS (
                    SELECT id, parent_id FROM affiliate_nodes WHERE id = ?
                    UNION
                    SELECT n.id, n.parent_id
                    FROM affiliate_nodes n
                    JOIN binary_up b ON n.id = b.parent_id
                ),
                sponsor_up(id, sponsor_id) AS (
                    SELECT id, sponsor_id FROM affiliate_nodes WHERE id = ?
                    UNION
                    SELECT n.id, n.sponsor_id
                    FROM affiliate_nodes n
                    JOIN sponsor_up s ON n.id = s.sponsor_id
                )
            SELECT {} FROM affiliate_nodes
            WHERE id IN (SELECT id FROM binary_up UNION SELECT id FROM sponsor_up)
            "#,
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(id.as_str())
            .fetch_all(&mut *conn)
            .await?;

        Ok(GraphSnapshot::from_nodes(rows.iter().map(node_from_row)))
    }

    /// The sponsor plus the outer edge of its `preferred` leg, which is all
    /// a placement under it can reach.
    pub async fn load_placement_context_in(
        conn: &mut SqliteConnection,
        sponsor: &NodeId,
        preferred: Option<Leg>,
    ) -> Result<GraphSnapshot, sqlx::Error> {
        let Some(leg) = preferred else {
            let node = Self::get_node_in(conn, sponsor).await?;
            return Ok(GraphSnapshot::from_nodes(node));
        };

        let child_column = match leg {
            Leg::Left => "left_child",
            Leg::Right => "right_child",
        };
        let sql = format!(
            r#"
            WITH RECURSIVE edge(id) AS (
                SELECT ?
                UNION
                SELECT n.{child} FROM affiliate_nodes n JOIN edge e ON n.id = e.id
                WHERE n.{child} IS NOT NULL
            )
            SELECT {columns} FROM affiliate_nodes WHERE id IN (SELECT id FROM edge)
            "#,
            child = child_column,
            columns = NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(sponsor.as_str())
            .fetch_all(&mut *conn)
            .await?;

        Ok(GraphSnapshot::from_nodes(rows.iter().map(node_from_row)))
    }

    pub async fn load_subtree(
        &self,
        root: &NodeId,
        limit: usize,
    ) -> Result<GraphSnapshot, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let mut graph = GraphSnapshot::new();
        Self::load_subtree_into(&mut conn, &mut graph, root, limit).await?;
        Ok(graph)
    }

    /// Add `root` and up to `limit` of its referral descendants, nearest
    /// first, to `graph`. A larger subtree marks `graph` truncated.
    ///
    /// Returns the number of rows loaded.
    pub async fn load_subtree_into(
        conn: &mut SqliteConnection,
        graph: &mut GraphSnapshot,
        root: &NodeId,
        limit: usize,
    ) -> Result<usize, sqlx::Error> {
        // Root plus one row past the limit, so an oversized subtree shows.
        let wanted = limit.saturating_add(2);
        let sql = format!(
            r#"
            WITH RECURSIVE down(id) AS (
                SELECT ?
                UNION
                SELECT n.id FROM affiliate_nodes n JOIN down d ON n.sponsor_id = d.id
                LIMIT ?
            )
            SELECT {} FROM affiliate_nodes WHERE id IN (SELECT id FROM down)
            "#,
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(root.as_str())
            .bind(i64::try_from(wanted).unwrap_or(i64::MAX))
            .fetch_all(&mut *conn)
            .await?;

        let loaded = rows.len();
        if loaded > limit.saturating_add(1) {
            warn!(root = %root, limit, "Referral subtree exceeds the traversal ceiling");
            graph.mark_truncated();
        }
        graph.extend(rows.iter().map(node_from_row));
        Ok(loaded)
    }

    /// Point `parent`'s `leg` at `child`, only if that leg is still empty.
    pub async fn set_child_in(
        conn: &mut SqliteConnection,
        parent: &NodeId,
        leg: Leg,
        child: &NodeId,
    ) -> Result<(), RepoError> {
        let sql = match leg {
            Leg::Left => {
                "UPDATE affiliate_nodes SET left_child = ? WHERE id = ? AND left_child IS NULL"
            }
            Leg::Right => {
                "UPDATE affiliate_nodes SET right_child = ? WHERE id = ? AND right_child IS NULL"
            }
        };
        let result = sqlx::query(sql)
            .bind(child.as_str())
            .bind(parent.as_str())
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(match Self::get_node_in(conn, parent).await? {
                Some(_) => RepoError::LegOccupied {
                    parent: parent.clone(),
                    leg,
                },
                None => RepoError::NodeNotFound(parent.clone()),
            });
        }
        Ok(())
    }

    /// Add signed deltas to both leg volumes and return the new pair.
    ///
    /// Decimal arithmetic happens here rather than in SQL, which would round
    /// through REAL.
    pub async fn update_volumes_in(
        conn: &mut SqliteConnection,
        id: &NodeId,
        left_delta: Decimal,
        right_delta: Decimal,
    ) -> Result<(Decimal, Decimal), RepoError> {
        let row = sqlx::query("SELECT left_volume, right_volume FROM affiliate_nodes WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| RepoError::NodeNotFound(id.clone()))?;

        let left: String = row.get("left_volume");
        let right: String = row.get("right_volume");
        let overflow = || RepoError::VolumeOverflow(id.clone());
        let left = decimal_column(&left, "left_volume", id.as_str())
            .checked_add(left_delta)
            .ok_or_else(overflow)?;
        let right = decimal_column(&right, "right_volume", id.as_str())
            .checked_add(right_delta)
            .ok_or_else(overflow)?;
        if left.is_negative() || right.is_negative() {
            return Err(RepoError::NegativeVolume(id.clone()));
        }

        sqlx::query("UPDATE affiliate_nodes SET left_volume = ?, right_volume = ? WHERE id = ?")
            .bind(left.to_canonical_string())
            .bind(right.to_canonical_string())
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;

        Ok((left, right))
    }

    /// Record `count` matched cycles on `day`, resetting the daily counter
    /// when the stored day differs.
    pub async fn increment_cycles_in(
        conn: &mut SqliteConnection,
        id: &NodeId,
        count: u32,
        day: NaiveDate,
    ) -> Result<(), RepoError> {
        let day = day.to_string();
        let result = sqlx::query(
            r#"
            UPDATE affiliate_nodes SET
                total_cycles_matched = total_cycles_matched + ?,
                cycles_today = CASE WHEN cycles_day = ? THEN cycles_today + ? ELSE ? END,
                cycles_day = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(count))
        .bind(&day)
        .bind(i64::from(count))
        .bind(i64::from(count))
        .bind(&day)
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NodeNotFound(id.clone()));
        }
        Ok(())
    }

    pub async fn set_step(&self, id: &NodeId, step: u32) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::set_step_in(&mut conn, id, step).await
    }

    /// Returns `false` if the node does not exist.
    pub async fn set_step_in(
        conn: &mut SqliteConnection,
        id: &NodeId,
        step: u32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE affiliate_nodes SET current_step = ? WHERE id = ?")
            .bind(i64::from(step))
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_account_status(
        &self,
        id: &NodeId,
        status: AccountStatus,
        deferred_balance: Decimal,
    ) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::set_account_status_in(&mut conn, id, status, deferred_balance).await
    }

    /// Overwrite the payment status and deferred balance together.
    pub async fn set_account_status_in(
        conn: &mut SqliteConnection,
        id: &NodeId,
        status: AccountStatus,
        deferred_balance: Decimal,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE affiliate_nodes SET account_status = ?, deferred_balance = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(deferred_balance.to_canonical_string())
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::engine::GraphView;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    async fn insert(repo: &Repository, name: &str, sponsor: Option<&str>, leg: Option<Leg>, at: i64) {
        insert_under(repo, name, sponsor, sponsor, leg, at).await;
    }

    async fn insert_under(
        repo: &Repository,
        name: &str,
        sponsor: Option<&str>,
        parent: Option<&str>,
        leg: Option<Leg>,
        at: i64,
    ) {
        let mut node = AffiliateNode::new(id(name), sponsor.map(id), TimeMs::new(at));
        node.parent_id = parent.map(id);
        node.placement_leg = leg;
        let mut conn = repo.pool().acquire().await.unwrap();
        assert!(Repository::insert_node_in(&mut conn, &node).await.unwrap());
        if let (Some(parent), Some(leg)) = (node.parent_id.as_ref(), leg) {
            Repository::set_child_in(&mut conn, parent, leg, &node.id)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_node_roundtrip() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        insert(&repo, "a", Some("root"), Some(Leg::Left), 2).await;

        let root = repo.get_node(&id("root")).await.unwrap().unwrap();
        assert_eq!(root.left_child, Some(id("a")));
        assert_eq!(root.right_child, None);
        assert_eq!(root.account_status, AccountStatus::Active);

        let a = repo.get_node(&id("a")).await.unwrap().unwrap();
        assert_eq!(a.sponsor_id, Some(id("root")));
        assert_eq!(a.placement_leg, Some(Leg::Left));
        assert_eq!(a.enrolled_at, TimeMs::new(2));

        assert!(repo.get_node(&id("ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_ignored() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        let mut conn = repo.pool().acquire().await.unwrap();
        let again = AffiliateNode::new(id("root"), None, TimeMs::new(9));
        assert!(!Repository::insert_node_in(&mut conn, &again).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_child_refuses_occupied_leg() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        insert(&repo, "a", Some("root"), Some(Leg::Left), 2).await;

        let mut conn = repo.pool().acquire().await.unwrap();
        let err = Repository::set_child_in(&mut conn, &id("root"), Leg::Left, &id("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::LegOccupied { leg: Leg::Left, .. }));

        let err = Repository::set_child_in(&mut conn, &id("ghost"), Leg::Left, &id("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_tree_root_and_children() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        insert(&repo, "a", Some("root"), Some(Leg::Left), 2).await;
        insert(&repo, "b", Some("root"), Some(Leg::Right), 3).await;
        insert(&repo, "a1", Some("a"), Some(Leg::Left), 4).await;
        insert(&repo, "other", None, None, 5).await;

        assert_eq!(repo.tree_root(&id("a1")).await.unwrap(), Some(id("root")));
        assert_eq!(repo.tree_root(&id("other")).await.unwrap(), Some(id("other")));
        assert_eq!(repo.tree_root(&id("ghost")).await.unwrap(), None);

        let children = repo.get_children(&id("root")).await.unwrap();
        let ids: Vec<_> = children.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![id("a"), id("b")]);
    }

    #[tokio::test]
    async fn test_sale_context_holds_only_the_sellers_chains() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        insert(&repo, "a", Some("root"), Some(Leg::Left), 2).await;
        insert(&repo, "b", Some("root"), Some(Leg::Right), 3).await;
        // Spillover: sponsored by root, placed under a.
        insert_under(&repo, "c", Some("root"), Some("a"), Some(Leg::Left), 4).await;
        insert(&repo, "c1", Some("c"), Some(Leg::Left), 5).await;
        insert(&repo, "b1", Some("b"), Some(Leg::Left), 6).await;

        let mut conn = repo.pool().acquire().await.unwrap();
        let graph = Repository::load_sale_context_in(&mut conn, &id("c1")).await.unwrap();
        let mut ids: Vec<_> = graph.nodes().map(|n| n.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec![id("a"), id("c"), id("c1"), id("root")]);
        assert_eq!(graph.sponsor_chain(&id("c1")), vec![id("c"), id("root")]);

        let empty = Repository::load_sale_context_in(&mut conn, &id("ghost")).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_placement_context_follows_outer_edge() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        insert(&repo, "a", Some("root"), Some(Leg::Left), 2).await;
        insert(&repo, "b", Some("root"), Some(Leg::Right), 3).await;
        insert_under(&repo, "c", Some("root"), Some("a"), Some(Leg::Left), 4).await;
        insert(&repo, "a_r", Some("a"), Some(Leg::Right), 5).await;

        let mut conn = repo.pool().acquire().await.unwrap();
        let left = Repository::load_placement_context_in(&mut conn, &id("root"), Some(Leg::Left))
            .await
            .unwrap();
        let mut ids: Vec<_> = left.nodes().map(|n| n.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec![id("a"), id("c"), id("root")]);

        let bare = Repository::load_placement_context_in(&mut conn, &id("root"), None)
            .await
            .unwrap();
        assert_eq!(bare.len(), 1);
        assert!(bare.contains(&id("root")));
    }

    #[tokio::test]
    async fn test_subtree_load_is_capped() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        insert(&repo, "a", Some("root"), Some(Leg::Left), 2).await;
        insert(&repo, "b", Some("root"), Some(Leg::Right), 3).await;
        insert(&repo, "a1", Some("a"), Some(Leg::Left), 4).await;
        insert(&repo, "a2", Some("a"), Some(Leg::Right), 5).await;
        insert(&repo, "other", None, None, 6).await;

        let full = repo.load_subtree(&id("root"), 10).await.unwrap();
        assert_eq!(full.len(), 5);
        assert!(!full.is_truncated());
        assert!(!full.contains(&id("other")));
        assert_eq!(full.referrals(&id("root")), vec![id("a"), id("b")]);

        let exact = repo.load_subtree(&id("root"), 4).await.unwrap();
        assert!(!exact.is_truncated());

        let capped = repo.load_subtree(&id("root"), 2).await.unwrap();
        assert!(capped.is_truncated());
        assert!(capped.contains(&id("root")));

        let branch = repo.load_subtree(&id("a"), 10).await.unwrap();
        assert_eq!(branch.len(), 3);
        assert!(!branch.contains(&id("root")));
    }

    #[tokio::test]
    async fn test_update_volumes_rejects_negative_result() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        let mut conn = repo.pool().acquire().await.unwrap();

        let (l, r) = Repository::update_volumes_in(&mut conn, &id("root"), d("2500.5"), d("100"))
            .await
            .unwrap();
        assert_eq!((l, r), (d("2500.5"), d("100")));

        let err = Repository::update_volumes_in(&mut conn, &id("root"), d("-1"), d("-101"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NegativeVolume(_)));

        let node = Repository::get_node_in(&mut conn, &id("root")).await.unwrap().unwrap();
        assert_eq!(node.left_volume, d("2500.5"));
        assert_eq!(node.right_volume, d("100"));
    }

    #[tokio::test]
    async fn test_update_volumes_rejects_overflow() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        let mut conn = repo.pool().acquire().await.unwrap();
        let max = d("79228162514264337593543950335");

        Repository::update_volumes_in(&mut conn, &id("root"), max, Decimal::zero())
            .await
            .unwrap();
        let err = Repository::update_volumes_in(&mut conn, &id("root"), d("1"), Decimal::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::VolumeOverflow(_)));

        let node = Repository::get_node_in(&mut conn, &id("root")).await.unwrap().unwrap();
        assert_eq!(node.left_volume, max);
    }

    #[tokio::test]
    async fn test_increment_cycles_resets_on_new_day() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;
        let mut conn = repo.pool().acquire().await.unwrap();
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        Repository::increment_cycles_in(&mut conn, &id("root"), 2, day1).await.unwrap();
        Repository::increment_cycles_in(&mut conn, &id("root"), 3, day1).await.unwrap();
        let node = Repository::get_node_in(&mut conn, &id("root")).await.unwrap().unwrap();
        assert_eq!(node.cycles_today, 5);
        assert_eq!(node.cycles_day, Some(day1));

        Repository::increment_cycles_in(&mut conn, &id("root"), 1, day2).await.unwrap();
        let node = Repository::get_node_in(&mut conn, &id("root")).await.unwrap().unwrap();
        assert_eq!(node.cycles_today, 1);
        assert_eq!(node.cycles_day, Some(day2));
        assert_eq!(node.total_cycles_matched, 6);
    }

    #[tokio::test]
    async fn test_step_and_status_updates() {
        let (repo, _temp) = setup_test_db().await;
        insert(&repo, "root", None, None, 1).await;

        assert!(repo.set_step(&id("root"), 3).await.unwrap());
        assert!(!repo.set_step(&id("ghost"), 3).await.unwrap());
        assert!(repo
            .set_account_status(&id("root"), AccountStatus::Deferred, d("150"))
            .await
            .unwrap());

        let node = repo.get_node(&id("root")).await.unwrap().unwrap();
        assert_eq!(node.current_step, 3);
        assert_eq!(node.account_status, AccountStatus::Deferred);
        assert_eq!(node.deferred_balance, d("150"));
    }
}
