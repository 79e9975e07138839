use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_ppi::builder::{NetworkEdge, NetworkGraph, NetworkNode};
use kira_ppi::domain::{ConfidenceLevel, ConfidenceThreshold, NetworkType};
use kira_ppi::error::KiraError;
use kira_ppi::store::{NetworkFilter, NetworkKey, NetworkStore, NewNetwork, PageRequest, Persisted};

fn key(label: &str, hash: &str) -> NetworkKey {
    NetworkKey {
        comparison_label: label.to_string(),
        gene_set_hash: hash.to_string(),
        threshold: ConfidenceThreshold::new(400).unwrap(),
        network_type: NetworkType::Full,
    }
}

fn node(id: &str) -> NetworkNode {
    NetworkNode {
        external_id: id.to_string(),
        display_name: id.trim_start_matches("9606.").to_string(),
        expression: None,
    }
}

fn edge(a: &str, b: &str, score: u32) -> NetworkEdge {
    NetworkEdge {
        source_id: a.to_string(),
        target_id: b.to_string(),
        score,
        confidence: ConfidenceLevel::classify(score),
        interaction_type: Some("functional".to_string()),
        evidence_sources: Some("experiments".to_string()),
    }
}

fn triangle() -> NetworkGraph {
    NetworkGraph {
        nodes: vec![node("9606.A"), node("9606.B"), node("9606.C")],
        edges: vec![
            edge("9606.A", "9606.B", 900),
            edge("9606.A", "9606.C", 450),
            edge("9606.B", "9606.C", 200),
        ],
    }
}

fn genes() -> Vec<String> {
    vec!["A".to_string(), "B".to_string(), "C".to_string()]
}

#[test]
fn database_file_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("nested").join("networks.sqlite3"))
        .unwrap();
    let key = key("cmp", "h1");
    let genes = genes();
    let id = {
        let store = NetworkStore::open(&path).unwrap();
        let new = NewNetwork {
            key: &key,
            original_gene_set: &genes,
            resolved_gene_count: 3,
        };
        store.persist_success(&new, &triangle()).unwrap().into_inner().record.id
    };

    let store = NetworkStore::open(&path).unwrap();
    assert_eq!(store.path(), Some(path.as_path()));
    let found = store.find_successful(&key).unwrap().unwrap();
    assert_eq!(found.record.id, id);
    let graph = found.graph.unwrap();
    assert_eq!(graph.edges.len(), 3);
    assert_eq!(graph.edges[0].confidence_level, ConfidenceLevel::High);
    assert_eq!(graph.edges[1].confidence_level, ConfidenceLevel::Medium);
    assert_eq!(graph.edges[2].confidence_level, ConfidenceLevel::Low);
    assert_eq!(graph.edges[0].evidence_sources.as_deref(), Some("experiments"));
}

#[test]
fn second_writer_gets_existing_network() {
    let store = NetworkStore::in_memory().unwrap();
    let key = key("cmp", "h1");
    let genes = genes();
    let new = NewNetwork {
        key: &key,
        original_gene_set: &genes,
        resolved_gene_count: 3,
    };

    let first = store.persist_success(&new, &triangle()).unwrap();
    let first_id = assert_matches!(first, Persisted::Created(network) => network.record.id);

    let mut smaller = triangle();
    smaller.edges.truncate(1);
    let second = store.persist_success(&new, &smaller).unwrap();
    let existing = assert_matches!(second, Persisted::Existing(network) => network);
    assert_eq!(existing.record.id, first_id);
    assert_eq!(existing.record.edge_count, 3);

    let page = store
        .query(&NetworkFilter::default(), PageRequest::default())
        .unwrap();
    assert_eq!(page.total, 1);
}

#[test]
fn failed_attempts_do_not_block_success() {
    let store = NetworkStore::in_memory().unwrap();
    let key = key("cmp", "h1");
    let genes = genes();
    let new = NewNetwork {
        key: &key,
        original_gene_set: &genes,
        resolved_gene_count: 3,
    };

    let failed = store.record_failure(&new, "interaction service timed out").unwrap();
    assert!(!failed.success);
    assert_eq!(failed.error_message.as_deref(), Some("interaction service timed out"));
    store.record_failure(&new, "again").unwrap();
    assert!(store.find_successful(&key).unwrap().is_none());

    let created = store.persist_success(&new, &triangle()).unwrap();
    assert_matches!(created, Persisted::Created(_));
}

#[test]
fn counts_are_finalized_from_rows() {
    let store = NetworkStore::in_memory().unwrap();
    let key = key("cmp", "h1");
    let genes = genes();
    let new = NewNetwork {
        key: &key,
        original_gene_set: &genes,
        resolved_gene_count: 3,
    };
    let network = store.persist_success(&new, &triangle()).unwrap().into_inner();
    let record = network.record;
    assert!(record.success);
    assert_eq!(record.node_count, 3);
    assert_eq!(record.edge_count, 3);
    assert_eq!(store.count_children(record.id).unwrap(), (3, 3));
    assert_eq!(record.original_gene_set, genes);
}

#[test]
fn duplicate_edge_aborts_the_whole_write() {
    let store = NetworkStore::in_memory().unwrap();
    let key = key("cmp", "h1");
    let genes = genes();
    let new = NewNetwork {
        key: &key,
        original_gene_set: &genes,
        resolved_gene_count: 3,
    };
    let mut graph = triangle();
    graph.edges.push(edge("9606.A", "9606.B", 700));

    let err = store.persist_success(&new, &graph).unwrap_err();
    assert_matches!(err, KiraError::Store(_));
    let page = store
        .query(&NetworkFilter::default(), PageRequest::default())
        .unwrap();
    assert_eq!(page.total, 1);
    assert!(!page.items[0].success);
    assert_eq!(store.count_children(page.items[0].id).unwrap(), (0, 0));
}

#[test]
fn delete_cascades_to_nodes_and_edges() {
    let store = NetworkStore::in_memory().unwrap();
    let key = key("cmp", "h1");
    let genes = genes();
    let new = NewNetwork {
        key: &key,
        original_gene_set: &genes,
        resolved_gene_count: 3,
    };
    let id = store
        .persist_success(&new, &triangle())
        .unwrap()
        .into_inner()
        .record
        .id;

    store.delete(id).unwrap();
    assert_eq!(store.count_children(id).unwrap(), (0, 0));
    assert_matches!(store.get(id, true), Err(KiraError::NetworkNotFound(missing)) if missing == id);
    assert!(store.find_successful(&key).unwrap().is_none());
}

#[test]
fn query_pages_newest_first_with_filters() {
    let store = NetworkStore::in_memory().unwrap();
    let genes = genes();
    let mut ids = Vec::new();
    for idx in 0..5 {
        let label = if idx % 2 == 0 { "even" } else { "odd" };
        let key = key(label, &format!("h{idx}"));
        let new = NewNetwork {
            key: &key,
            original_gene_set: &genes,
            resolved_gene_count: 3,
        };
        let id = if idx == 4 {
            store.record_failure(&new, "boom").unwrap().id
        } else {
            store.persist_success(&new, &triangle()).unwrap().into_inner().record.id
        };
        ids.push(id);
    }

    let page = store
        .query(&NetworkFilter::default(), PageRequest { limit: 2, offset: 0 })
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(
        page.items.iter().map(|item| item.id).collect::<Vec<_>>(),
        vec![ids[4], ids[3]]
    );

    let next = store
        .query(&NetworkFilter::default(), PageRequest { limit: 2, offset: 4 })
        .unwrap();
    assert_eq!(next.items.len(), 1);
    assert_eq!(next.items[0].id, ids[0]);

    let even_ok = store
        .query(
            &NetworkFilter {
                comparison_label: Some("even".to_string()),
                network_type: Some(NetworkType::Full),
                success: Some(true),
            },
            PageRequest::default(),
        )
        .unwrap();
    assert_eq!(even_ok.total, 2);
    assert!(even_ok.items.iter().all(|item| item.success));

    let physical = store
        .query(
            &NetworkFilter {
                network_type: Some(NetworkType::Physical),
                ..NetworkFilter::default()
            },
            PageRequest::default(),
        )
        .unwrap();
    assert_eq!(physical.total, 0);
}

#[test]
fn missing_network_is_not_found() {
    let store = NetworkStore::in_memory().unwrap();
    assert_matches!(store.get(42, false), Err(KiraError::NetworkNotFound(42)));
    assert_matches!(store.delete(42), Err(KiraError::NetworkNotFound(42)));
}
