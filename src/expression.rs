use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::Utf8Path;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::builder::NetworkGraph;
use crate::error::KiraError;
use crate::resolver::IdentifierMapping;

/// Adjusted p-value below which a fold change counts as a real shift.
pub const SIGNIFICANCE_PADJ: f64 = 0.05;

/// Differential-expression metrics for one gene of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpressionMetrics {
    #[serde(default, alias = "log2foldchange")]
    pub log2_fold_change: Option<f64>,
    #[serde(default, alias = "padj")]
    pub adjusted_p_value: Option<f64>,
}

/// Metrics keyed by gene name. Lookups are case-insensitive.
pub type ExpressionTable = BTreeMap<String, ExpressionMetrics>;

const GENE_COLUMNS: [&str; 4] = ["gene_name", "gene", "symbol", "gene_id"];
const FOLD_CHANGE_COLUMNS: [&str; 2] = ["log2foldchange", "log2_fold_change"];
const PADJ_COLUMNS: [&str; 2] = ["padj", "adjusted_p_value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionDirection {
    Up,
    Down,
    Unchanged,
}

impl ExpressionDirection {
    pub fn derive(metrics: &ExpressionMetrics) -> Option<Self> {
        let fold_change = metrics.log2_fold_change?;
        let significant = metrics
            .adjusted_p_value
            .is_some_and(|padj| padj < SIGNIFICANCE_PADJ);
        Some(if significant && fold_change > 0.0 {
            ExpressionDirection::Up
        } else if significant && fold_change < 0.0 {
            ExpressionDirection::Down
        } else {
            ExpressionDirection::Unchanged
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionDirection::Up => "up",
            ExpressionDirection::Down => "down",
            ExpressionDirection::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ExpressionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExpressionDirection {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "up" => Ok(ExpressionDirection::Up),
            "down" => Ok(ExpressionDirection::Down),
            "unchanged" => Ok(ExpressionDirection::Unchanged),
            other => Err(KiraError::Store(format!("unknown expression direction: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpressionAnnotation {
    pub log2_fold_change: Option<f64>,
    pub adjusted_p_value: Option<f64>,
    pub direction: Option<ExpressionDirection>,
}

impl From<&ExpressionMetrics> for ExpressionAnnotation {
    fn from(metrics: &ExpressionMetrics) -> Self {
        Self {
            log2_fold_change: metrics.log2_fold_change,
            adjusted_p_value: metrics.adjusted_p_value,
            direction: ExpressionDirection::derive(metrics),
        }
    }
}

/// Loads a differential-expression table.
///
/// `.json` files hold a map of gene name to metrics. Anything else is read
/// as a DESeq-style table, comma-separated unless the extension is `.tsv`
/// or `.txt`.
pub fn load_expression_table(path: &Utf8Path) -> Result<ExpressionTable, KiraError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::InvalidExpressionTable(format!("{path}: {err}")))?;
    match path.extension().map(|ext| ext.to_ascii_lowercase()).as_deref() {
        Some("json") => serde_json::from_str(&content)
            .map_err(|err| KiraError::InvalidExpressionTable(format!("{path}: {err}"))),
        Some("tsv") | Some("txt") => parse_expression_table(&content, b'\t'),
        _ => parse_expression_table(&content, b','),
    }
}

/// Parses delimited text with a gene column plus optional fold change and
/// adjusted p-value columns. `NA` and empty cells read as missing.
pub fn parse_expression_table(text: &str, delimiter: u8) -> Result<ExpressionTable, KiraError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(false)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| KiraError::InvalidExpressionTable(err.to_string()))?
        .iter()
        .map(|name| name.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();
    let find = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|name| headers.iter().position(|header| header == name))
    };
    let gene_col = find(&GENE_COLUMNS).ok_or_else(|| {
        KiraError::InvalidExpressionTable("no gene_name, gene, symbol or gene_id column".to_string())
    })?;
    let fold_col = find(&FOLD_CHANGE_COLUMNS);
    let padj_col = find(&PADJ_COLUMNS);

    let mut table = ExpressionTable::new();
    let mut seen = HashSet::new();
    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = record
            .map_err(|err| KiraError::InvalidExpressionTable(format!("line {line}: {err}")))?;
        let gene = record.get(gene_col).unwrap_or_default().trim();
        if gene.is_empty() {
            continue;
        }
        let metric = |col: Option<usize>| -> Result<Option<f64>, KiraError> {
            let Some(raw) = col.and_then(|col| record.get(col)).map(str::trim) else {
                return Ok(None);
            };
            if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
                return Ok(None);
            }
            raw.parse::<f64>().map(Some).map_err(|_| {
                KiraError::InvalidExpressionTable(format!("line {line}: invalid number {raw:?}"))
            })
        };
        let metrics = ExpressionMetrics {
            log2_fold_change: metric(fold_col)?,
            adjusted_p_value: metric(padj_col)?,
        };
        if seen.insert(gene.to_uppercase()) {
            table.insert(gene.to_string(), metrics);
        }
    }
    Ok(table)
}

/// Attaches expression metrics to nodes.
///
/// A node is matched through the mappings that resolved to its id: the
/// submitted name first, then the preferred name. Returns the number of
/// annotated nodes.
pub fn annotate_nodes(
    graph: &mut NetworkGraph,
    mappings: &[IdentifierMapping],
    table: &ExpressionTable,
) -> usize {
    if table.is_empty() {
        return 0;
    }
    let mut by_name: HashMap<String, &ExpressionMetrics> = HashMap::new();
    for (name, metrics) in table {
        by_name.entry(name.trim().to_uppercase()).or_insert(metrics);
    }
    let mut names_by_id: HashMap<&str, Vec<String>> = HashMap::new();
    for mapping in mappings.iter().filter(|mapping| mapping.resolved) {
        let Some(id) = mapping.canonical_id.as_deref() else {
            continue;
        };
        let names = names_by_id.entry(id).or_default();
        names.push(mapping.input_id.trim().to_uppercase());
        if let Some(preferred) = &mapping.preferred_name {
            names.push(preferred.trim().to_uppercase());
        }
    }

    let mut annotated = 0;
    for node in &mut graph.nodes {
        let mut candidates = names_by_id
            .get(node.external_id.as_str())
            .cloned()
            .unwrap_or_default();
        candidates.push(node.display_name.trim().to_uppercase());
        if let Some(metrics) = candidates.iter().find_map(|name| by_name.get(name)) {
            node.expression = Some(ExpressionAnnotation::from(*metrics));
            annotated += 1;
        }
    }
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NetworkNode;
    use crate::resolver::CachedIdentifier;

    #[test]
    fn direction_requires_significance() {
        let up = ExpressionMetrics {
            log2_fold_change: Some(2.1),
            adjusted_p_value: Some(0.001),
        };
        let weak = ExpressionMetrics {
            log2_fold_change: Some(-3.0),
            adjusted_p_value: Some(0.2),
        };
        let down = ExpressionMetrics {
            log2_fold_change: Some(-1.2),
            adjusted_p_value: Some(0.01),
        };
        assert_eq!(ExpressionDirection::derive(&up), Some(ExpressionDirection::Up));
        assert_eq!(
            ExpressionDirection::derive(&weak),
            Some(ExpressionDirection::Unchanged)
        );
        assert_eq!(ExpressionDirection::derive(&down), Some(ExpressionDirection::Down));
        assert_eq!(ExpressionDirection::derive(&ExpressionMetrics::default()), None);
    }

    #[test]
    fn deseq_table_reads_na_as_missing() {
        let text = "gene_id,gene_name,baseMean,log2FoldChange,padj\n\
                    ENSG1,TP53,10.5,1.8,0.001\n\
                    ENSG2,MDM2,3.1,NA,NA\n\
                    ENSG3,TP53,1.0,-4.0,0.5\n";
        let table = parse_expression_table(text, b',').unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["TP53"].log2_fold_change, Some(1.8));
        assert_eq!(table["MDM2"], ExpressionMetrics::default());
    }

    #[test]
    fn case_variants_keep_the_first_row() {
        let text = "gene_name,log2FoldChange,padj\n\
                    tp53,2.0,0.01\n\
                    TP53,-2.0,0.01\n";
        let table = parse_expression_table(text, b',').unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table["tp53"].log2_fold_change, Some(2.0));
    }

    #[test]
    fn annotation_prefers_first_case_variant() {
        let mut graph = NetworkGraph {
            nodes: vec![NetworkNode {
                external_id: "9606.P1".to_string(),
                display_name: "TP53".to_string(),
                expression: None,
            }],
            edges: Vec::new(),
        };
        let mut table = ExpressionTable::new();
        table.insert(
            "TP53".to_string(),
            ExpressionMetrics {
                log2_fold_change: Some(1.5),
                adjusted_p_value: Some(0.01),
            },
        );
        table.insert(
            "tp53".to_string(),
            ExpressionMetrics {
                log2_fold_change: Some(-1.5),
                adjusted_p_value: Some(0.01),
            },
        );
        assert_eq!(annotate_nodes(&mut graph, &[], &table), 1);
        assert_eq!(
            graph.nodes[0].expression.and_then(|e| e.direction),
            Some(ExpressionDirection::Up)
        );
    }

    #[test]
    fn table_without_gene_column_is_rejected() {
        let err = parse_expression_table("padj\n0.1\n", b',').unwrap_err();
        assert!(matches!(err, KiraError::InvalidExpressionTable(_)));
    }

    #[test]
    fn nodes_match_through_input_names() {
        let mut graph = NetworkGraph {
            nodes: vec![
                NetworkNode {
                    external_id: "9606.P1".to_string(),
                    display_name: "TP53".to_string(),
                    expression: None,
                },
                NetworkNode {
                    external_id: "9606.P2".to_string(),
                    display_name: "MDM2".to_string(),
                    expression: None,
                },
            ],
            edges: Vec::new(),
        };
        let mappings = vec![IdentifierMapping::resolved(
            "p53",
            CachedIdentifier {
                canonical_id: "9606.P1".to_string(),
                preferred_name: Some("TP53".to_string()),
                annotation: None,
            },
        )];
        let mut table = ExpressionTable::new();
        table.insert(
            "P53".to_string(),
            ExpressionMetrics {
                log2_fold_change: Some(1.5),
                adjusted_p_value: Some(0.01),
            },
        );
        assert_eq!(annotate_nodes(&mut graph, &mappings, &table), 1);
        assert_eq!(
            graph.nodes[0].expression.and_then(|e| e.direction),
            Some(ExpressionDirection::Up)
        );
        assert!(graph.nodes[1].expression.is_none());
    }
}
