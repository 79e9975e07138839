use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{ConfidenceLevel, ConfidenceThreshold, MAX_CONFIDENCE_THRESHOLD, NetworkType, Species};
use crate::error::KiraError;
use crate::expression::ExpressionAnnotation;
use crate::stringdb::{InteractionClient, column, error_line, record_line, response_reader};

const EVIDENCE_CHANNELS: [(&str, &str); 7] = [
    ("nscore", "neighborhood"),
    ("fscore", "fusion"),
    ("pscore", "cooccurrence"),
    ("ascore", "coexpression"),
    ("escore", "experiments"),
    ("dscore", "databases"),
    ("tscore", "textmining"),
];

/// One validated line of an interaction response.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRow {
    pub source_id: String,
    pub target_id: String,
    pub source_name: String,
    pub target_name: String,
    pub score: u32,
    pub evidence: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkNode {
    pub external_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<ExpressionAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkEdge {
    pub source_id: String,
    pub target_id: String,
    pub score: u32,
    pub confidence: ConfidenceLevel,
    pub interaction_type: Option<String>,
    pub evidence_sources: Option<String>,
}

/// Flat node and edge lists addressed by external id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkGraph {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
}

impl NetworkGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// Undirected identity of an interaction: the endpoints in sorted order.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Parses an interaction TSV body.
///
/// A body with no header at all is [`KiraError::EmptyInteractionResponse`];
/// a header without data rows is a valid, empty result.
pub fn parse_interaction_rows(body: &str) -> Result<Vec<InteractionRow>, KiraError> {
    let mut reader = response_reader(body);
    let headers = reader
        .headers()
        .map_err(|err| KiraError::InteractionParse {
            line: error_line(&err),
            reason: err.to_string(),
        })?
        .clone();
    if headers.iter().all(str::is_empty) {
        return Err(KiraError::EmptyInteractionResponse);
    }
    let header_line = record_line(&headers, 1);
    let required = |name: &str| {
        column(&headers, name).ok_or_else(|| KiraError::InteractionParse {
            line: header_line,
            reason: format!("missing column {name}"),
        })
    };
    let [source_col, target_col, source_name_col, target_name_col, score_col] = [
        required("stringId_A")?,
        required("stringId_B")?,
        required("preferredName_A")?,
        required("preferredName_B")?,
        required("score")?,
    ];
    let channels = EVIDENCE_CHANNELS
        .iter()
        .filter_map(|(name, label)| column(&headers, name).map(|idx| (idx, *label)))
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| KiraError::InteractionParse {
            line: error_line(&err),
            reason: err.to_string(),
        })?;
        let line = record_line(&record, 0);
        let parse_err = |reason: String| KiraError::InteractionParse { line, reason };
        let field = |idx: usize| record.get(idx).unwrap_or_default();
        let source_id = field(source_col);
        let target_id = field(target_col);
        if source_id.is_empty() || target_id.is_empty() {
            return Err(parse_err("empty interactor id".to_string()));
        }
        let score = parse_score(field(score_col)).map_err(parse_err)?;
        let mut evidence = Vec::new();
        for (idx, label) in &channels {
            let value = parse_score(field(*idx))
                .map_err(|reason| parse_err(format!("{label}: {reason}")))?;
            if value > 0 {
                evidence.push(*label);
            }
        }
        rows.push(InteractionRow {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            source_name: display_or_id(field(source_name_col), source_id),
            target_name: display_or_id(field(target_name_col), target_id),
            score,
            evidence,
        });
    }
    Ok(rows)
}

/// Scores with a decimal point are fractions of 1; bare integers are
/// already on the 0-1000 scale.
pub fn parse_score(raw: &str) -> Result<u32, String> {
    let value = raw.trim();
    let scaled = if value.contains('.') {
        let fraction = value
            .parse::<f64>()
            .map_err(|_| format!("invalid score {value:?}"))?;
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(format!("score {value} outside 0..=1"));
        }
        (fraction * MAX_CONFIDENCE_THRESHOLD as f64).round() as u32
    } else {
        value
            .parse::<u32>()
            .map_err(|_| format!("invalid score {value:?}"))?
    };
    if scaled > MAX_CONFIDENCE_THRESHOLD {
        return Err(format!("score {value} outside 0..=1000"));
    }
    Ok(scaled)
}

fn display_or_id(name: &str, id: &str) -> String {
    let name = name.trim();
    if name.is_empty() { id.to_string() } else { name.to_string() }
}

/// Collapses rows into a graph following row order: the first row naming an
/// id fixes its display name, and the first row for an unordered pair is the
/// only one kept.
pub fn assemble_graph(rows: &[InteractionRow], network_type: NetworkType) -> NetworkGraph {
    let mut graph = NetworkGraph::default();
    let mut seen_nodes: HashSet<String> = HashSet::new();
    let mut emitted: HashSet<(String, String)> = HashSet::new();

    for row in rows {
        for (id, name) in [
            (&row.source_id, &row.source_name),
            (&row.target_id, &row.target_name),
        ] {
            if seen_nodes.insert(id.clone()) {
                graph.nodes.push(NetworkNode {
                    external_id: id.clone(),
                    display_name: name.clone(),
                    expression: None,
                });
            }
        }

        if row.source_id == row.target_id {
            debug!(id = %row.source_id, "skipping self interaction");
            continue;
        }
        let (low, high) = canonical_pair(&row.source_id, &row.target_id);
        if !emitted.insert((low.to_string(), high.to_string())) {
            continue;
        }
        graph.edges.push(NetworkEdge {
            source_id: low.to_string(),
            target_id: high.to_string(),
            score: row.score,
            confidence: ConfidenceLevel::classify(row.score),
            interaction_type: Some(network_type.interaction_type().to_string()),
            evidence_sources: (!row.evidence.is_empty()).then(|| row.evidence.join(",")),
        });
    }
    graph
}

pub struct NetworkBuilder<N: InteractionClient> {
    client: N,
}

impl<N: InteractionClient> NetworkBuilder<N> {
    pub fn new(client: N) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &N {
        &self.client
    }

    /// Fetches and assembles the network among `canonical_ids`.
    ///
    /// Fewer than two distinct ids fail before any request is made.
    pub fn build(
        &self,
        canonical_ids: &[String],
        species: Species,
        threshold: ConfidenceThreshold,
        network_type: NetworkType,
    ) -> Result<NetworkGraph, KiraError> {
        let distinct = canonical_ids.iter().collect::<HashSet<_>>().len();
        if distinct < 2 {
            return Err(KiraError::TooFewResolvedGenes { resolved: distinct });
        }

        let start = std::time::Instant::now();
        let body = self
            .client
            .fetch_network(canonical_ids, species, threshold, network_type)?;
        let rows = parse_interaction_rows(&body)?;
        let graph = assemble_graph(&rows, network_type);
        info!(
            ids = canonical_ids.len(),
            rows = rows.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            latency_ms = start.elapsed().as_millis() as u64,
            "assembled interaction network"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const HEADER: &str = "stringId_A\tstringId_B\tpreferredName_A\tpreferredName_B\tncbiTaxonId\tscore";

    fn row(a: &str, b: &str, score: u32) -> InteractionRow {
        InteractionRow {
            source_id: a.to_string(),
            target_id: b.to_string(),
            source_name: format!("name-{a}"),
            target_name: format!("name-{b}"),
            score,
            evidence: Vec::new(),
        }
    }

    #[test]
    fn bidirectional_rows_collapse_to_one_edge() {
        let rows = vec![row("A", "B", 750), row("B", "A", 750), row("A", "C", 300)];
        let graph = assemble_graph(&rows, NetworkType::Full);
        let edges = graph
            .edges
            .iter()
            .map(|edge| (edge.source_id.as_str(), edge.target_id.as_str(), edge.confidence))
            .collect::<Vec<_>>();
        assert_eq!(
            edges,
            vec![("A", "B", ConfidenceLevel::High), ("A", "C", ConfidenceLevel::Low)]
        );
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn first_display_name_wins() {
        let mut second = row("A", "C", 500);
        second.source_name = "renamed".to_string();
        let graph = assemble_graph(&[row("A", "B", 500), second], NetworkType::Physical);
        let node = graph
            .nodes
            .iter()
            .find(|node| node.external_id == "A")
            .unwrap();
        assert_eq!(node.display_name, "name-A");
        assert_eq!(graph.edges[0].interaction_type.as_deref(), Some("physical"));
    }

    #[test]
    fn reversed_first_row_is_stored_canonically() {
        let graph = assemble_graph(&[row("Z", "A", 410)], NetworkType::Full);
        assert_eq!(graph.edges[0].source_id, "A");
        assert_eq!(graph.edges[0].target_id, "Z");
        assert_eq!(graph.edges[0].confidence, ConfidenceLevel::Medium);
    }

    #[test]
    fn self_interaction_is_dropped() {
        let graph = assemble_graph(&[row("A", "A", 900)], NetworkType::Full);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn parse_fractional_and_integer_scores() {
        assert_eq!(parse_score("0.75").unwrap(), 750);
        assert_eq!(parse_score("0.999").unwrap(), 999);
        assert_eq!(parse_score("1.0").unwrap(), 1000);
        assert_eq!(parse_score("412").unwrap(), 412);
        assert!(parse_score("1001").is_err());
        assert!(parse_score("1.5").is_err());
        assert!(parse_score("high").is_err());
    }

    #[test]
    fn parse_rows_with_evidence_channels() {
        let body = "stringId_A\tstringId_B\tpreferredName_A\tpreferredName_B\tncbiTaxonId\tscore\tnscore\tfscore\tpscore\tascore\tescore\tdscore\ttscore\n\
             9606.P1\t9606.P2\tTP53\tMDM2\t9606\t0.999\t0\t0\t0\t0.062\t0.996\t0.9\t0\n";
        let rows = parse_interaction_rows(body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 999);
        assert_eq!(rows[0].evidence, vec!["coexpression", "experiments", "databases"]);
        let graph = assemble_graph(&rows, NetworkType::Full);
        assert_eq!(
            graph.edges[0].evidence_sources.as_deref(),
            Some("coexpression,experiments,databases")
        );
    }

    #[test]
    fn empty_body_differs_from_header_only() {
        assert_matches!(
            parse_interaction_rows("  \n"),
            Err(KiraError::EmptyInteractionResponse)
        );
        assert!(parse_interaction_rows(&format!("{HEADER}\n")).unwrap().is_empty());
    }

    #[test]
    fn malformed_score_names_the_line() {
        let body = format!("{HEADER}\n9606.P1\t9606.P2\tTP53\tMDM2\t9606\t0.9\n9606.P1\t9606.P3\tTP53\tX\t9606\tstrong\n");
        assert_matches!(
            parse_interaction_rows(&body),
            Err(KiraError::InteractionParse { line: 3, .. })
        );
    }

    #[test]
    fn missing_column_is_rejected() {
        assert_matches!(
            parse_interaction_rows("stringId_A\tstringId_B\n"),
            Err(KiraError::InteractionParse { line: 1, .. })
        );
    }
}
