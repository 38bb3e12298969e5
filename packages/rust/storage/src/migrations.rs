//! SQL migration definitions for the ConceptLink graph database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: nodes, node_properties, relationships",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Nodes are identified by (label, key)
CREATE TABLE IF NOT EXISTS nodes (
    id         TEXT PRIMARY KEY,
    label      TEXT NOT NULL,
    key        TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(label, key)
);

CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);

CREATE TABLE IF NOT EXISTS node_properties (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    name    TEXT NOT NULL,
    value   TEXT NOT NULL,
    PRIMARY KEY(node_id, name)
);

-- Relationships are identified by (type, from, to, properties)
CREATE TABLE IF NOT EXISTS relationships (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    rel_type        TEXT NOT NULL,
    from_id         TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    to_id           TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    properties_json TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL,
    UNIQUE(rel_type, from_id, to_id, properties_json)
);

CREATE INDEX IF NOT EXISTS idx_relationships_type ON relationships(rel_type);
CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
