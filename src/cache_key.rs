use sha2::{Digest, Sha256};

use crate::domain::{ConfidenceThreshold, NetworkType};
use crate::resolver::IdentifierMapping;

/// Distinct resolved names, upper-cased and sorted.
pub fn normalized_gene_names<'a>(
    mappings: impl IntoIterator<Item = &'a IdentifierMapping>,
) -> Vec<String> {
    let mut names = mappings
        .into_iter()
        .filter_map(|mapping| mapping.resolved_name())
        .map(|name| name.trim().to_uppercase())
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    names
}

/// SHA-256 over `"<names,>|<threshold>|<type>"` of the resolved gene set.
///
/// Only resolved names take part; raw input, input order and expression
/// metrics never do.
pub fn gene_set_hash<'a>(
    mappings: impl IntoIterator<Item = &'a IdentifierMapping>,
    threshold: ConfidenceThreshold,
    network_type: NetworkType,
) -> String {
    hash_names(&normalized_gene_names(mappings), threshold, network_type)
}

pub fn hash_names(
    sorted_names: &[String],
    threshold: ConfidenceThreshold,
    network_type: NetworkType,
) -> String {
    let material = format!(
        "{}|{}|{}",
        sorted_names.join(","),
        threshold.value(),
        network_type.as_str()
    );
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    format!("{:x}", hasher.finalize())
}
