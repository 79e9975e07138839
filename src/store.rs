use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{SecondsFormat, Utc};
use directories::BaseDirs;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use serde::Serialize;
use tracing::{debug, warn};

use crate::builder::NetworkGraph;
use crate::domain::{ConfidenceLevel, ConfidenceThreshold, NetworkType};
use crate::error::KiraError;
use crate::expression::ExpressionDirection;
use crate::schema;

pub const DEFAULT_PAGE_LIMIT: usize = 50;

const NETWORK_COLUMNS: &str = "id, comparison_label, gene_set_hash, original_gene_set, \
    confidence_threshold, network_type, node_count, edge_count, resolved_gene_count, \
    success, error_message, created_at, updated_at";

const INSERT_NETWORK_SQL: &str = "\
INSERT INTO networks (comparison_label, gene_set_hash, original_gene_set, confidence_threshold,
    network_type, node_count, edge_count, resolved_gene_count, success, error_message,
    created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7, ?8, ?9, ?9)";

const INSERT_NODE_SQL: &str = "\
INSERT INTO network_nodes (network_id, external_id, display_name, log2_fold_change,
    adjusted_p_value, expression_direction)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const INSERT_EDGE_SQL: &str = "\
INSERT INTO network_edges (network_id, source_external_id, target_external_id, score,
    confidence_level, interaction_type, evidence_sources)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const FINALIZE_COUNTS_SQL: &str = "\
UPDATE networks SET
    node_count = (SELECT COUNT(*) FROM network_nodes WHERE network_id = ?1),
    edge_count = (SELECT COUNT(*) FROM network_edges WHERE network_id = ?1),
    updated_at = ?2
WHERE id = ?1";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkRecord {
    pub id: i64,
    pub comparison_label: String,
    pub gene_set_hash: String,
    pub original_gene_set: Vec<String>,
    pub confidence_threshold: u32,
    pub network_type: NetworkType,
    pub node_count: usize,
    pub edge_count: usize,
    pub resolved_gene_count: usize,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub id: i64,
    pub network_id: i64,
    pub external_id: String,
    pub display_name: String,
    pub log2_fold_change: Option<f64>,
    pub adjusted_p_value: Option<f64>,
    pub expression_direction: Option<ExpressionDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub id: i64,
    pub network_id: i64,
    pub source_external_id: String,
    pub target_external_id: String,
    pub score: u32,
    pub confidence_level: ConfidenceLevel,
    pub interaction_type: Option<String>,
    pub evidence_sources: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredGraph {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNetwork {
    #[serde(flatten)]
    pub record: NetworkRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<StoredGraph>,
}

/// The tuple at most one successful network may occupy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkKey {
    pub comparison_label: String,
    pub gene_set_hash: String,
    pub threshold: ConfidenceThreshold,
    pub network_type: NetworkType,
}

/// Everything about a build attempt except its outcome.
#[derive(Debug, Clone)]
pub struct NewNetwork<'a> {
    pub key: &'a NetworkKey,
    pub original_gene_set: &'a [String],
    pub resolved_gene_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    Created(StoredNetwork),
    /// Another build committed the same key first.
    Existing(StoredNetwork),
}

impl Persisted {
    pub fn into_inner(self) -> StoredNetwork {
        match self {
            Persisted::Created(network) | Persisted::Existing(network) => network,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkFilter {
    pub comparison_label: Option<String>,
    pub network_type: Option<NetworkType>,
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkPage {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub items: Vec<NetworkRecord>,
}

enum FinalizeError {
    Duplicate,
    Failed(KiraError),
}

impl From<rusqlite::Error> for FinalizeError {
    fn from(err: rusqlite::Error) -> Self {
        FinalizeError::Failed(err.into())
    }
}

/// SQLite-backed store of built networks.
#[derive(Debug)]
pub struct NetworkStore {
    conn: Mutex<Connection>,
    path: Option<Utf8PathBuf>,
}

impl NetworkStore {
    pub fn open(path: &Utf8Path) -> Result<Self, KiraError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                std::fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            }
        }
        let conn = Connection::open(path.as_std_path())?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_owned()),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_default() -> Result<Self, KiraError> {
        Self::open(&default_database_path()?)
    }

    pub fn in_memory() -> Result<Self, KiraError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    fn initialize(&self) -> Result<(), KiraError> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL is unavailable for in-memory databases.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");
        conn.execute_batch(schema::SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, KiraError> {
        self.conn
            .lock()
            .map_err(|_| KiraError::Store("store connection mutex poisoned".to_string()))
    }

    /// Looks up the successful network for `key`, with its graph.
    pub fn find_successful(&self, key: &NetworkKey) -> Result<Option<StoredNetwork>, KiraError> {
        let conn = self.lock()?;
        Self::find_successful_locked(&conn, key)
    }

    fn find_successful_locked(
        conn: &Connection,
        key: &NetworkKey,
    ) -> Result<Option<StoredNetwork>, KiraError> {
        let sql = format!(
            "SELECT {NETWORK_COLUMNS} FROM networks
             WHERE comparison_label = ?1 AND gene_set_hash = ?2
               AND confidence_threshold = ?3 AND network_type = ?4 AND success = 1"
        );
        let record = conn
            .query_row(
                &sql,
                params![
                    key.comparison_label,
                    key.gene_set_hash,
                    key.threshold.value(),
                    key.network_type.as_str()
                ],
                row_to_network,
            )
            .optional()?;
        match record {
            Some(record) => {
                let graph = load_graph(conn, record.id)?;
                Ok(Some(StoredNetwork {
                    record,
                    graph: Some(graph),
                }))
            }
            None => Ok(None),
        }
    }

    /// Writes a built graph and its finalized counts in one transaction.
    ///
    /// If another writer already committed the same key, nothing is written
    /// and the existing network is returned. Any other write failure leaves
    /// no graph rows behind, records a failed attempt, and is returned.
    pub fn persist_success(
        &self,
        new: &NewNetwork<'_>,
        graph: &NetworkGraph,
    ) -> Result<Persisted, KiraError> {
        let mut conn = self.lock()?;
        let now = timestamp();
        let outcome = {
            let tx = conn.transaction()?;
            match write_graph(&tx, new, graph, &now) {
                Ok(id) => tx.commit().map(|_| id).map_err(FinalizeError::from),
                Err(err) => Err(err),
            }
        };

        match outcome {
            Ok(id) => {
                debug!(network_id = id, "persisted network");
                let network = load_network(&conn, id, true)?;
                Ok(Persisted::Created(network))
            }
            Err(FinalizeError::Duplicate) => {
                debug!(hash = %new.key.gene_set_hash, "network already persisted by another build");
                Self::find_successful_locked(&conn, new.key)?
                    .map(Persisted::Existing)
                    .ok_or_else(|| {
                        KiraError::Store(
                            "uniqueness conflict without a visible successful network".to_string(),
                        )
                    })
            }
            Err(FinalizeError::Failed(err)) => {
                warn!(error = %err, "network write failed, recording failed attempt");
                if let Err(record_err) =
                    insert_failure(&conn, new, &format!("persistence failed: {err}"), &now)
                {
                    warn!(error = %record_err, "could not record failed attempt");
                }
                Err(err)
            }
        }
    }

    /// Records a failed build attempt with zero counts.
    pub fn record_failure(
        &self,
        new: &NewNetwork<'_>,
        message: &str,
    ) -> Result<NetworkRecord, KiraError> {
        let conn = self.lock()?;
        let id = insert_failure(&conn, new, message, &timestamp())?;
        Ok(load_network(&conn, id, false)?.record)
    }

    pub fn get(&self, id: i64, include_graph: bool) -> Result<StoredNetwork, KiraError> {
        let conn = self.lock()?;
        load_network(&conn, id, include_graph)
    }

    pub fn query(
        &self,
        filter: &NetworkFilter,
        page: PageRequest,
    ) -> Result<NetworkPage, KiraError> {
        let conn = self.lock()?;
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(label) = &filter.comparison_label {
            values.push(Value::Text(label.clone()));
            clauses.push(format!("comparison_label = ?{}", values.len()));
        }
        if let Some(network_type) = filter.network_type {
            values.push(Value::Text(network_type.as_str().to_string()));
            clauses.push(format!("network_type = ?{}", values.len()));
        }
        if let Some(success) = filter.success {
            values.push(Value::Integer(i64::from(success)));
            clauses.push(format!("success = ?{}", values.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM networks {where_sql}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit = page.limit.max(1);
        let mut page_values = values.clone();
        page_values.push(Value::Integer(to_i64(limit)));
        page_values.push(Value::Integer(to_i64(page.offset)));
        let sql = format!(
            "SELECT {NETWORK_COLUMNS} FROM networks {where_sql}
             ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            values.len() + 1,
            values.len() + 2
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(page_values.iter()), row_to_network)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NetworkPage {
            total: usize::try_from(total).unwrap_or_default(),
            limit,
            offset: page.offset,
            items,
        })
    }

    /// Deletes a network; nodes and edges go with it.
    pub fn delete(&self, id: i64) -> Result<(), KiraError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM networks WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(KiraError::NetworkNotFound(id));
        }
        Ok(())
    }

    pub fn count_children(&self, id: i64) -> Result<(usize, usize), KiraError> {
        let conn = self.lock()?;
        let nodes: i64 = conn.query_row(
            "SELECT COUNT(*) FROM network_nodes WHERE network_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let edges: i64 = conn.query_row(
            "SELECT COUNT(*) FROM network_edges WHERE network_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok((to_usize(nodes), to_usize(edges)))
    }
}

pub fn default_database_path() -> Result<Utf8PathBuf, KiraError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-ppi")).ok()
        })
        .map(|root| root.join("networks.sqlite3"))
        .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
}

fn write_graph(
    tx: &Transaction<'_>,
    new: &NewNetwork<'_>,
    graph: &NetworkGraph,
    now: &str,
) -> Result<i64, FinalizeError> {
    let original = serde_json::to_string(new.original_gene_set)
        .map_err(|err| FinalizeError::Failed(KiraError::Store(err.to_string())))?;
    let inserted = tx.execute(
        INSERT_NETWORK_SQL,
        params![
            new.key.comparison_label,
            new.key.gene_set_hash,
            original,
            new.key.threshold.value(),
            new.key.network_type.as_str(),
            to_i64(new.resolved_gene_count),
            true,
            Option::<String>::None,
            now
        ],
    );
    match inserted {
        Err(err) if is_unique_violation(&err) => return Err(FinalizeError::Duplicate),
        other => {
            other?;
        }
    }
    let network_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare_cached(INSERT_NODE_SQL)?;
        for node in &graph.nodes {
            let expression = node.expression.as_ref();
            stmt.execute(params![
                network_id,
                node.external_id,
                node.display_name,
                expression.and_then(|e| e.log2_fold_change),
                expression.and_then(|e| e.adjusted_p_value),
                expression.and_then(|e| e.direction).map(|d| d.as_str()),
            ])?;
        }
    }
    {
        let mut stmt = tx.prepare_cached(INSERT_EDGE_SQL)?;
        for edge in &graph.edges {
            stmt.execute(params![
                network_id,
                edge.source_id,
                edge.target_id,
                edge.score,
                edge.confidence.as_str(),
                edge.interaction_type,
                edge.evidence_sources,
            ])?;
        }
    }

    tx.execute(FINALIZE_COUNTS_SQL, params![network_id, now])?;
    let (node_count, edge_count): (i64, i64) = tx.query_row(
        "SELECT node_count, edge_count FROM networks WHERE id = ?1",
        params![network_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    if to_usize(node_count) != graph.node_count() || to_usize(edge_count) != graph.edge_count() {
        return Err(FinalizeError::Failed(KiraError::CountMismatch {
            detail: format!(
                "stored {node_count} nodes / {edge_count} edges, built {} / {}",
                graph.node_count(),
                graph.edge_count()
            ),
        }));
    }
    Ok(network_id)
}

fn insert_failure(
    conn: &Connection,
    new: &NewNetwork<'_>,
    message: &str,
    now: &str,
) -> Result<i64, KiraError> {
    let original = serde_json::to_string(new.original_gene_set)
        .map_err(|err| KiraError::Store(err.to_string()))?;
    conn.execute(
        INSERT_NETWORK_SQL,
        params![
            new.key.comparison_label,
            new.key.gene_set_hash,
            original,
            new.key.threshold.value(),
            new.key.network_type.as_str(),
            to_i64(new.resolved_gene_count),
            false,
            Some(message),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn load_network(
    conn: &Connection,
    id: i64,
    include_graph: bool,
) -> Result<StoredNetwork, KiraError> {
    let record = conn
        .query_row(
            &format!("SELECT {NETWORK_COLUMNS} FROM networks WHERE id = ?1"),
            params![id],
            row_to_network,
        )
        .optional()?
        .ok_or(KiraError::NetworkNotFound(id))?;
    let graph = if include_graph {
        Some(load_graph(conn, id)?)
    } else {
        None
    };
    Ok(StoredNetwork { record, graph })
}

fn load_graph(conn: &Connection, network_id: i64) -> Result<StoredGraph, KiraError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, network_id, external_id, display_name, log2_fold_change,
                adjusted_p_value, expression_direction
         FROM network_nodes WHERE network_id = ?1 ORDER BY id",
    )?;
    let nodes = stmt
        .query_map(params![network_id], row_to_node)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT id, network_id, source_external_id, target_external_id, score,
                confidence_level, interaction_type, evidence_sources
         FROM network_edges WHERE network_id = ?1 ORDER BY id",
    )?;
    let edges = stmt
        .query_map(params![network_id], row_to_edge)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StoredGraph { nodes, edges })
}

fn row_to_network(row: &Row<'_>) -> rusqlite::Result<NetworkRecord> {
    let original: String = row.get("original_gene_set")?;
    let original_gene_set = serde_json::from_str::<Vec<String>>(&original).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err))
    })?;
    Ok(NetworkRecord {
        id: row.get("id")?,
        comparison_label: row.get("comparison_label")?,
        gene_set_hash: row.get("gene_set_hash")?,
        original_gene_set,
        confidence_threshold: row.get("confidence_threshold")?,
        network_type: parse_column(row, "network_type")?,
        node_count: to_usize(row.get("node_count")?),
        edge_count: to_usize(row.get("edge_count")?),
        resolved_gene_count: to_usize(row.get("resolved_gene_count")?),
        success: row.get("success")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<NodeRecord> {
    let direction: Option<String> = row.get("expression_direction")?;
    let expression_direction = direction
        .map(|value| {
            value.parse::<ExpressionDirection>().map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err))
            })
        })
        .transpose()?;
    Ok(NodeRecord {
        id: row.get("id")?,
        network_id: row.get("network_id")?,
        external_id: row.get("external_id")?,
        display_name: row.get("display_name")?,
        log2_fold_change: row.get("log2_fold_change")?,
        adjusted_p_value: row.get("adjusted_p_value")?,
        expression_direction,
    })
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<EdgeRecord> {
    Ok(EdgeRecord {
        id: row.get("id")?,
        network_id: row.get("network_id")?,
        source_external_id: row.get("source_external_id")?,
        target_external_id: row.get("target_external_id")?,
        score: row.get("score")?,
        confidence_level: parse_column(row, "confidence_level")?,
        interaction_type: row.get("interaction_type")?,
        evidence_sources: row.get("evidence_sources")?,
    })
}

fn parse_column<T>(row: &Row<'_>, name: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = KiraError>,
{
    let raw: String = row.get(name)?;
    raw.parse::<T>().map_err(|err| {
        let idx = row.as_ref().column_index(name).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation
                && code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Fixed-width UTC timestamps so text order is time order.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::builder::{NetworkEdge, NetworkNode};

    fn key(label: &str) -> NetworkKey {
        NetworkKey {
            comparison_label: label.to_string(),
            gene_set_hash: "abc".to_string(),
            threshold: ConfidenceThreshold::new(400).unwrap(),
            network_type: NetworkType::Full,
        }
    }

    fn graph() -> NetworkGraph {
        NetworkGraph {
            nodes: vec![
                NetworkNode {
                    external_id: "A".to_string(),
                    display_name: "GA".to_string(),
                    expression: None,
                },
                NetworkNode {
                    external_id: "B".to_string(),
                    display_name: "GB".to_string(),
                    expression: None,
                },
            ],
            edges: vec![NetworkEdge {
                source_id: "A".to_string(),
                target_id: "B".to_string(),
                score: 800,
                confidence: ConfidenceLevel::High,
                interaction_type: Some("functional".to_string()),
                evidence_sources: None,
            }],
        }
    }

    #[test]
    fn duplicate_nodes_roll_back_everything() {
        let store = NetworkStore::in_memory().unwrap();
        let key = key("cmp");
        let genes = vec!["A".to_string(), "B".to_string()];
        let new = NewNetwork {
            key: &key,
            original_gene_set: &genes,
            resolved_gene_count: 2,
        };
        let mut broken = graph();
        broken.nodes.push(broken.nodes[0].clone());

        let err = store.persist_success(&new, &broken).unwrap_err();
        assert_matches!(err, KiraError::Store(_));
        assert!(store.find_successful(&key).unwrap().is_none());

        let page = store.query(&NetworkFilter::default(), PageRequest::default()).unwrap();
        assert_eq!(page.total, 1);
        let failed = &page.items[0];
        assert!(!failed.success);
        assert_eq!((failed.node_count, failed.edge_count), (0, 0));
        assert!(failed.error_message.is_some());
        assert_eq!(store.count_children(failed.id).unwrap(), (0, 0));
    }

    #[test]
    fn reversed_edge_orientation_is_rejected_by_schema() {
        let store = NetworkStore::in_memory().unwrap();
        let key = key("cmp");
        let genes = vec!["A".to_string(), "B".to_string()];
        let new = NewNetwork {
            key: &key,
            original_gene_set: &genes,
            resolved_gene_count: 2,
        };
        let mut reversed = graph();
        reversed.edges[0].source_id = "B".to_string();
        reversed.edges[0].target_id = "A".to_string();
        assert!(store.persist_success(&new, &reversed).is_err());
    }
}
