//! Turso Embedded / libSQL graph store (offline mode).
//!
//! Pipeline stages write to the graph only through [`GraphLoader`], whose
//! operations are merges: repeating one is a no-op. [`GraphStore`] is the
//! embedded implementation. Nodes are keyed by `(label, key)` and
//! relationships by `(type, from, to, properties)`, so re-running a stage
//! never duplicates anything, while two mentions that differ only in their
//! offset stay distinct.

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use conceptlink_shared::{ConceptLinkError, Result};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Relationship properties. Ordered, so equal maps serialize identically.
pub type Properties = BTreeMap<String, String>;

/// Opaque handle to a merged node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(String);

impl NodeHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// GraphLoader
// ---------------------------------------------------------------------------

/// Idempotent write access to a property graph.
#[allow(async_fn_in_trait)]
pub trait GraphLoader {
    /// Create the node `(label, key)` unless it exists. Equal keys yield equal handles.
    async fn merge_node(&self, label: &str, key: &str) -> Result<NodeHandle>;

    /// Look up an existing node without creating it.
    async fn find_node(&self, label: &str, key: &str) -> Result<Option<NodeHandle>>;

    /// Create the relationship unless an identical one exists. Returns whether it was created.
    async fn merge_relationship(
        &self,
        rel_type: &str,
        from: &NodeHandle,
        to: &NodeHandle,
        properties: &Properties,
    ) -> Result<bool>;

    /// Set (or overwrite) a property on an existing node.
    async fn set_node_property(&self, node: &NodeHandle, name: &str, value: &str) -> Result<()>;

    /// Keys of every node with `label`, in creation order.
    async fn node_keys(&self, label: &str) -> Result<Vec<String>>;

    async fn count_nodes(&self, label: &str) -> Result<u64>;

    async fn count_relationships(&self, rel_type: &str) -> Result<u64>;

    /// Group the following writes. Stores without transactions ignore this.
    async fn begin_batch(&self) -> Result<()> {
        Ok(())
    }

    async fn commit_batch(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback_batch(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

/// Graph store backed by a local libSQL database.
pub struct GraphStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl GraphStore {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConceptLinkError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ConceptLinkError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ConceptLinkError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ConceptLinkError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Value of a node property, if set.
    pub async fn node_property(&self, node: &NodeHandle, name: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM node_properties WHERE node_id = ?1 AND name = ?2",
                params![node.as_str(), name],
            )
            .await
            .map_err(storage_error)?;

        match rows.next().await.map_err(storage_error)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_error)?)),
            None => Ok(None),
        }
    }

    /// `(from key, to key, properties)` of every relationship of `rel_type`, in creation order.
    pub async fn relationships(&self, rel_type: &str) -> Result<Vec<(String, String, Properties)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT f.key, t.key, r.properties_json
                 FROM relationships r
                 JOIN nodes f ON f.id = r.from_id
                 JOIN nodes t ON t.id = r.to_id
                 WHERE r.rel_type = ?1
                 ORDER BY r.id",
                params![rel_type],
            )
            .await
            .map_err(storage_error)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_error)? {
            let json = row.get::<String>(2).map_err(storage_error)?;
            let properties: Properties = serde_json::from_str(&json)
                .map_err(|e| ConceptLinkError::Storage(format!("corrupt properties: {e}")))?;
            results.push((
                row.get::<String>(0).map_err(storage_error)?,
                row.get::<String>(1).map_err(storage_error)?,
                properties,
            ));
        }
        Ok(results)
    }

    async fn count(&self, sql: &str, arg: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params![arg])
            .await
            .map_err(storage_error)?;
        match rows.next().await.map_err(storage_error)? {
            Some(row) => {
                let n = row.get::<i64>(0).map_err(storage_error)?;
                Ok(u64::try_from(n).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}

impl GraphLoader for GraphStore {
    async fn merge_node(&self, label: &str, key: &str) -> Result<NodeHandle> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO nodes (id, label, key, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(label, key) DO NOTHING",
                params![id.as_str(), label, key, now.as_str()],
            )
            .await
            .map_err(storage_error)?;

        self.find_node(label, key).await?.ok_or_else(|| {
            ConceptLinkError::Storage(format!("node ({label}, {key}) vanished after merge"))
        })
    }

    async fn find_node(&self, label: &str, key: &str) -> Result<Option<NodeHandle>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM nodes WHERE label = ?1 AND key = ?2",
                params![label, key],
            )
            .await
            .map_err(storage_error)?;

        match rows.next().await.map_err(storage_error)? {
            Some(row) => Ok(Some(NodeHandle(row.get::<String>(0).map_err(storage_error)?))),
            None => Ok(None),
        }
    }

    async fn merge_relationship(
        &self,
        rel_type: &str,
        from: &NodeHandle,
        to: &NodeHandle,
        properties: &Properties,
    ) -> Result<bool> {
        let json = serde_json::to_string(properties)
            .map_err(|e| ConceptLinkError::Storage(format!("cannot encode properties: {e}")))?;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO relationships (rel_type, from_id, to_id, properties_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(rel_type, from_id, to_id, properties_json) DO NOTHING",
                params![rel_type, from.as_str(), to.as_str(), json.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_error)?;
        Ok(inserted > 0)
    }

    async fn set_node_property(&self, node: &NodeHandle, name: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO node_properties (node_id, name, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(node_id, name) DO UPDATE SET value = excluded.value",
                params![node.as_str(), name, value],
            )
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn node_keys(&self, label: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key FROM nodes WHERE label = ?1 ORDER BY rowid",
                params![label],
            )
            .await
            .map_err(storage_error)?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_error)? {
            keys.push(row.get::<String>(0).map_err(storage_error)?);
        }
        Ok(keys)
    }

    async fn count_nodes(&self, label: &str) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM nodes WHERE label = ?1", label)
            .await
    }

    async fn count_relationships(&self, rel_type: &str) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM relationships WHERE rel_type = ?1",
            rel_type,
        )
        .await
    }

    async fn begin_batch(&self) -> Result<()> {
        self.conn.execute("BEGIN", params![]).await.map_err(storage_error)?;
        Ok(())
    }

    async fn commit_batch(&self) -> Result<()> {
        self.conn.execute("COMMIT", params![]).await.map_err(storage_error)?;
        Ok(())
    }

    async fn rollback_batch(&self) -> Result<()> {
        self.conn
            .execute("ROLLBACK", params![])
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

fn storage_error(e: libsql::Error) -> ConceptLinkError {
    ConceptLinkError::Storage(e.to_string())
}
