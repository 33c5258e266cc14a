//! PostgreSQL graph store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Schema
//!
//! Branch and node foreign keys reference each other, so both are
//! `DEFERRABLE INITIALLY DEFERRED`: a batch removal can delete rows in any
//! order and is only checked at commit.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

use super::{Applied, ChangeSet, GraphStore};
use crate::tree::{GraphRecords, Removal};
use crate::types::{Branch, BranchId, Graph, GraphId, NewNode, Node, NodeId, FIRST_SEQUENCE};

/// DDL statements applied by [`PostgresGraphStore::ensure_schema`], in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cactus_graphs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cactus_branches (
        id BIGSERIAL PRIMARY KEY,
        graph_id TEXT NOT NULL REFERENCES cactus_graphs(id),
        label TEXT NOT NULL,
        parent_node_id BIGINT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cactus_nodes (
        id BIGSERIAL PRIMARY KEY,
        branch_id BIGINT NOT NULL
            REFERENCES cactus_branches(id) DEFERRABLE INITIALLY DEFERRED,
        sequence BIGINT NOT NULL,
        content TEXT NOT NULL,
        author TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (branch_id, sequence)
    )
    "#,
    r#"
    DO $$ BEGIN
        ALTER TABLE cactus_branches
            ADD CONSTRAINT cactus_branches_parent_node_fk
            FOREIGN KEY (parent_node_id) REFERENCES cactus_nodes(id)
            DEFERRABLE INITIALLY DEFERRED;
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS cactus_branches_one_root
        ON cactus_branches (graph_id) WHERE parent_node_id IS NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS cactus_branches_parent_node
        ON cactus_branches (parent_node_id)
    "#,
];

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/cactus".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A row the change set refers to is gone.
    #[error("{entity} not found in graph {graph}: {id}")]
    Missing {
        /// Table-level entity name.
        entity: &'static str,
        /// Missing id.
        id: String,
        /// Graph the change set targeted.
        graph: GraphId,
    },
}

/// PostgreSQL graph store.
pub struct PostgresGraphStore {
    pool: PgPool,
}

impl PostgresGraphStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Create tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!(statements = SCHEMA_STATEMENTS.len(), "Schema ensured");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn parse_branch_row(row: &PgRow) -> Result<Branch, sqlx::Error> {
        let parent: Option<i64> = row.try_get("parent_node_id")?;
        Ok(Branch {
            id: BranchId::new(row.try_get("id")?),
            graph_id: GraphId::new(row.try_get::<String, _>("graph_id")?),
            label: row.try_get("label")?,
            parent_node: parent.map(NodeId::new),
        })
    }

    fn parse_node_row(row: &PgRow) -> Result<Node, sqlx::Error> {
        Ok(Node {
            id: NodeId::new(row.try_get("id")?),
            branch_id: BranchId::new(row.try_get("branch_id")?),
            sequence: row.try_get("sequence")?,
            content: row.try_get("content")?,
            author: row.try_get("author")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn insert_node(
        tx: &mut Transaction<'_, Postgres>,
        branch: i64,
        node: &NewNode,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO cactus_nodes (branch_id, sequence, content, author, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(branch)
        .bind(node.sequence)
        .bind(&node.content)
        .bind(&node.author)
        .bind(node.created_at)
        .fetch_one(&mut **tx)
        .await?;
        row.try_get("id")
    }

    async fn remove(
        tx: &mut Transaction<'_, Postgres>,
        graph: &GraphId,
        removal: &Removal,
    ) -> Result<Applied, PostgresError> {
        let node_ids: Vec<i64> = removal.nodes.iter().map(NodeId::get).collect();
        let branch_ids: Vec<i64> = removal.branches.iter().map(BranchId::get).collect();

        let deleted_nodes = sqlx::query(
            r#"
            DELETE FROM cactus_nodes
            WHERE id = ANY($1)
              AND branch_id IN (SELECT id FROM cactus_branches WHERE graph_id = $2)
            "#,
        )
        .bind(&node_ids)
        .bind(graph.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();
        if deleted_nodes != node_ids.len() as u64 {
            return Err(PostgresError::Missing {
                entity: "node",
                id: format!("{:?}", node_ids),
                graph: graph.clone(),
            });
        }

        let deleted_branches = sqlx::query(
            "DELETE FROM cactus_branches WHERE id = ANY($1) AND graph_id = $2",
        )
        .bind(&branch_ids)
        .bind(graph.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();
        if deleted_branches != branch_ids.len() as u64 {
            return Err(PostgresError::Missing {
                entity: "branch",
                id: format!("{:?}", branch_ids),
                graph: graph.clone(),
            });
        }

        Ok(Applied::Removed {
            nodes: node_ids.len(),
            branches: branch_ids.len(),
        })
    }
}

#[async_trait]
impl GraphStore for PostgresGraphStore {
    type Error = PostgresError;

    async fn load_graph(&self, id: &GraphId) -> Result<Option<GraphRecords>, Self::Error> {
        let row = sqlx::query("SELECT id, name FROM cactus_graphs WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let graph = Graph::new(
            GraphId::new(row.try_get::<String, _>("id")?),
            row.try_get::<String, _>("name")?,
        );

        let branch_rows = sqlx::query(
            r#"
            SELECT id, graph_id, label, parent_node_id
            FROM cactus_branches
            WHERE graph_id = $1
            ORDER BY id
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let node_rows = sqlx::query(
            r#"
            SELECT n.id, n.branch_id, n.sequence, n.content, n.author, n.created_at
            FROM cactus_nodes n
            JOIN cactus_branches b ON b.id = n.branch_id
            WHERE b.graph_id = $1
            ORDER BY n.branch_id, n.sequence
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(GraphRecords {
            graph,
            branches: branch_rows
                .iter()
                .map(Self::parse_branch_row)
                .collect::<Result<_, _>>()?,
            nodes: node_rows
                .iter()
                .map(Self::parse_node_row)
                .collect::<Result<_, _>>()?,
        }))
    }

    async fn graph_id_for_node(&self, id: NodeId) -> Result<Option<GraphId>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT b.graph_id
            FROM cactus_nodes n
            JOIN cactus_branches b ON b.id = n.branch_id
            WHERE n.id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(GraphId::new(r.try_get::<String, _>("graph_id")?))),
            None => Ok(None),
        }
    }

    async fn create_graph(&self, graph: &Graph) -> Result<bool, Self::Error> {
        let inserted = sqlx::query(
            "INSERT INTO cactus_graphs (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(graph.id.as_str())
        .bind(&graph.name)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn apply(&self, graph: &GraphId, changes: ChangeSet) -> Result<Applied, Self::Error> {
        let kind = changes.kind();
        let mut tx = self.pool.begin().await?;

        let applied = match changes {
            ChangeSet::CreateRoot { graph: record, label, first_node } => {
                sqlx::query(
                    "INSERT INTO cactus_graphs (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
                )
                .bind(record.id.as_str())
                .bind(&record.name)
                .execute(&mut *tx)
                .await?;

                let row = sqlx::query(
                    r#"
                    INSERT INTO cactus_branches (graph_id, label, parent_node_id)
                    VALUES ($1, $2, NULL)
                    ON CONFLICT (graph_id) WHERE parent_node_id IS NULL DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(graph.as_str())
                .bind(&label)
                .fetch_optional(&mut *tx)
                .await?;

                match row {
                    Some(row) => {
                        let branch: i64 = row.try_get("id")?;
                        let node = Self::insert_node(&mut tx, branch, &first_node).await?;
                        Applied::Inserted {
                            branch: BranchId::new(branch),
                            node: NodeId::new(node),
                            sequence: first_node.sequence,
                        }
                    }
                    None => Applied::Unchanged,
                }
            }
            ChangeSet::AppendNode { branch, node } => {
                let exists = sqlx::query(
                    "SELECT id FROM cactus_branches WHERE id = $1 AND graph_id = $2 FOR UPDATE",
                )
                .bind(branch.get())
                .bind(graph.as_str())
                .fetch_optional(&mut *tx)
                .await?;
                if exists.is_none() {
                    return Err(PostgresError::Missing {
                        entity: "branch",
                        id: branch.to_string(),
                        graph: graph.clone(),
                    });
                }
                // The branch row lock serializes appends, so MAX is stable here.
                let sequence: i64 = sqlx::query(
                    "SELECT COALESCE(MAX(sequence), $2) + 1 AS next FROM cactus_nodes WHERE branch_id = $1",
                )
                .bind(branch.get())
                .bind(FIRST_SEQUENCE - 1)
                .fetch_one(&mut *tx)
                .await?
                .try_get("next")?;
                let id = Self::insert_node(&mut tx, branch.get(), &node.at(sequence)).await?;
                Applied::Inserted { branch, node: NodeId::new(id), sequence }
            }
            ChangeSet::Fork { parent_node, label, first_node } => {
                let exists = sqlx::query(
                    r#"
                    SELECT n.id
                    FROM cactus_nodes n
                    JOIN cactus_branches b ON b.id = n.branch_id
                    WHERE n.id = $1 AND b.graph_id = $2
                    FOR UPDATE OF n
                    "#,
                )
                .bind(parent_node.get())
                .bind(graph.as_str())
                .fetch_optional(&mut *tx)
                .await?;
                if exists.is_none() {
                    return Err(PostgresError::Missing {
                        entity: "node",
                        id: parent_node.to_string(),
                        graph: graph.clone(),
                    });
                }

                let row = sqlx::query(
                    r#"
                    INSERT INTO cactus_branches (graph_id, label, parent_node_id)
                    VALUES ($1, $2, $3)
                    RETURNING id
                    "#,
                )
                .bind(graph.as_str())
                .bind(&label)
                .bind(parent_node.get())
                .fetch_one(&mut *tx)
                .await?;
                let branch: i64 = row.try_get("id")?;
                let node = Self::insert_node(&mut tx, branch, &first_node).await?;
                Applied::Inserted {
                    branch: BranchId::new(branch),
                    node: NodeId::new(node),
                    sequence: first_node.sequence,
                }
            }
            ChangeSet::Remove(removal) => Self::remove(&mut tx, graph, &removal).await?,
        };

        tx.commit().await?;
        tracing::debug!(graph_id = %graph, kind, "Change set committed");
        Ok(applied)
    }

    async fn delete_graph(&self, id: &GraphId) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM cactus_nodes
            WHERE branch_id IN (SELECT id FROM cactus_branches WHERE graph_id = $1)
            "#,
        )
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM cactus_branches WHERE graph_id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM cactus_graphs WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted == 1)
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
