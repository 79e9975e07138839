//! SQLite DDL for the network store.
//!
//! Statements use `IF NOT EXISTS` so they can be replayed on every open.

pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS networks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    comparison_label TEXT NOT NULL,
    gene_set_hash TEXT NOT NULL,
    original_gene_set TEXT NOT NULL,
    confidence_threshold INTEGER NOT NULL
        CHECK (confidence_threshold BETWEEN 150 AND 1000),
    network_type TEXT NOT NULL
        CHECK (network_type IN ('full', 'physical', 'functional')),
    node_count INTEGER NOT NULL DEFAULT 0,
    edge_count INTEGER NOT NULL DEFAULT 0,
    resolved_gene_count INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL CHECK (success IN (0, 1)),
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One successful network per request key; failed attempts are unconstrained.
CREATE UNIQUE INDEX IF NOT EXISTS uq_networks_successful_key
    ON networks(comparison_label, gene_set_hash, confidence_threshold, network_type)
    WHERE success = 1;

CREATE INDEX IF NOT EXISTS idx_networks_label_created
    ON networks(comparison_label, created_at);

CREATE TABLE IF NOT EXISTS network_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    network_id INTEGER NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    log2_fold_change REAL,
    adjusted_p_value REAL,
    expression_direction TEXT
        CHECK (expression_direction IS NULL OR expression_direction IN ('up', 'down', 'unchanged')),
    UNIQUE(network_id, external_id)
);

-- Edges are stored in canonical orientation, so a reversed duplicate
-- collides with the UNIQUE constraint instead of slipping in.
CREATE TABLE IF NOT EXISTS network_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    network_id INTEGER NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    source_external_id TEXT NOT NULL,
    target_external_id TEXT NOT NULL,
    score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 1000),
    confidence_level TEXT NOT NULL CHECK (confidence_level IN ('low', 'medium', 'high')),
    interaction_type TEXT,
    evidence_sources TEXT,
    CHECK (source_external_id < target_external_id),
    UNIQUE(network_id, source_external_id, target_external_id)
);

CREATE INDEX IF NOT EXISTS idx_network_edges_network ON network_edges(network_id);
";
