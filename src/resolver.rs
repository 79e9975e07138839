use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{IdFormat, Species};
use crate::error::KiraError;
use crate::memo::MemoCache;
use crate::stringdb::{IdentifierClient, column, error_line, record_line, response_reader};

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub input_id: String,
    pub canonical_id: Option<String>,
    pub preferred_name: Option<String>,
    pub annotation: Option<String>,
    pub resolved: bool,
    pub error_reason: Option<String>,
}

impl IdentifierMapping {
    pub fn resolved(input_id: &str, hit: CachedIdentifier) -> Self {
        Self {
            input_id: input_id.to_string(),
            canonical_id: Some(hit.canonical_id),
            preferred_name: hit.preferred_name,
            annotation: hit.annotation,
            resolved: true,
            error_reason: None,
        }
    }

    pub fn unresolved(input_id: &str, reason: impl Into<String>) -> Self {
        Self {
            input_id: input_id.to_string(),
            canonical_id: None,
            preferred_name: None,
            annotation: None,
            resolved: false,
            error_reason: Some(reason.into()),
        }
    }

    /// Name used for hashing and display: the preferred name when the
    /// service supplied one, the canonical id otherwise.
    pub fn resolved_name(&self) -> Option<&str> {
        if !self.resolved {
            return None;
        }
        self.preferred_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.canonical_id.as_deref())
    }
}

/// What the mapping cache remembers about a successfully resolved id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedIdentifier {
    pub canonical_id: String,
    pub preferred_name: Option<String>,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub species: Species,
    pub format: IdFormat,
    pub mappings: Vec<IdentifierMapping>,
    pub total: usize,
    pub resolved_count: usize,
    pub success_rate: f64,
    pub batch_calls: usize,
    pub failed_batches: usize,
    /// Error text of the last failed batch, if any.
    pub last_batch_error: Option<String>,
}

impl ResolutionReport {
    pub fn resolved(&self) -> impl Iterator<Item = &IdentifierMapping> {
        self.mappings.iter().filter(|mapping| mapping.resolved)
    }

    /// Distinct canonical ids in first-seen input order.
    pub fn canonical_ids(&self) -> Vec<String> {
        distinct_canonical_ids(self.resolved())
    }

    /// True when ids were sent out and every single batch failed.
    pub fn all_batches_failed(&self) -> bool {
        self.batch_calls > 0 && self.failed_batches == self.batch_calls
    }

    /// True when every batch failed and no memo hit resolved anything either.
    pub fn service_failed(&self) -> bool {
        self.all_batches_failed() && self.resolved_count == 0
    }
}

pub fn distinct_canonical_ids<'a>(
    mappings: impl IntoIterator<Item = &'a IdentifierMapping>,
) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    mappings
        .into_iter()
        .filter_map(|mapping| mapping.canonical_id.as_deref())
        .filter(|id| seen.insert(id.to_string()))
        .map(|id| id.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

pub fn mapping_cache_key(species: Species, format: IdFormat, normalized: &str) -> String {
    format!("{species}:{format}:{normalized}")
}

pub struct IdentifierResolver<C: IdentifierClient, M: MemoCache<CachedIdentifier>> {
    client: C,
    cache: M,
    options: ResolverOptions,
}

impl<C: IdentifierClient, M: MemoCache<CachedIdentifier>> IdentifierResolver<C, M> {
    pub fn new(client: C, cache: M, options: ResolverOptions) -> Self {
        Self {
            client,
            cache,
            options,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size.max(1)
    }

    /// Resolves every input to exactly one mapping, in input order.
    ///
    /// A failed batch degrades to unresolved mappings for its genes; the
    /// remaining batches still run.
    pub fn resolve(&self, inputs: &[String], format: IdFormat, species: Species) -> ResolutionReport {
        let mut mappings: Vec<Option<IdentifierMapping>> = vec![None; inputs.len()];
        let mut queries: Vec<String> = Vec::new();
        let mut slots: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, raw) in inputs.iter().enumerate() {
            let normalized = match format.normalize(raw) {
                Ok(value) => value,
                Err(reason) => {
                    mappings[idx] = Some(IdentifierMapping::unresolved(raw, reason));
                    continue;
                }
            };
            if let Some(hit) = self
                .cache
                .get(&mapping_cache_key(species, format, &normalized))
            {
                mappings[idx] = Some(IdentifierMapping::resolved(raw, hit));
                continue;
            }
            let positions = slots.entry(normalized.clone()).or_default();
            if positions.is_empty() {
                queries.push(normalized);
            }
            positions.push(idx);
        }

        let mut batch_calls = 0usize;
        let mut failed_batches = 0usize;
        let mut last_batch_error = None;
        for (batch_idx, batch) in queries.chunks(self.batch_size()).enumerate() {
            if batch_idx > 0 && !self.options.batch_delay.is_zero() {
                thread::sleep(self.options.batch_delay);
            }
            batch_calls += 1;
            debug!(batch = batch_idx, size = batch.len(), "resolving identifier batch");
            let outcome = self
                .client
                .map_identifiers(batch, species)
                .and_then(|body| parse_identifier_rows(&body, batch));
            match outcome {
                Ok(mut hits) => {
                    for (pos, query) in batch.iter().enumerate() {
                        let hit = hits.remove(&pos);
                        if let Some(hit) = &hit {
                            self.cache.put(
                                mapping_cache_key(species, format, query),
                                hit.clone(),
                            );
                        }
                        for &idx in slots.get(query).map(Vec::as_slice).unwrap_or_default() {
                            let raw = &inputs[idx];
                            mappings[idx] = Some(match &hit {
                                Some(hit) => IdentifierMapping::resolved(raw, hit.clone()),
                                None => IdentifierMapping::unresolved(
                                    raw,
                                    format!("no match for {query} in species {species}"),
                                ),
                            });
                        }
                    }
                }
                Err(err) => {
                    warn!(batch = batch_idx, error = %err, "identifier batch failed");
                    failed_batches += 1;
                    let reason = err.to_string();
                    for query in batch {
                        for &idx in slots.get(query).map(Vec::as_slice).unwrap_or_default() {
                            mappings[idx] =
                                Some(IdentifierMapping::unresolved(&inputs[idx], reason.clone()));
                        }
                    }
                    last_batch_error = Some(reason);
                }
            }
        }

        let mappings = mappings
            .into_iter()
            .zip(inputs)
            .map(|(mapping, raw)| {
                mapping.unwrap_or_else(|| IdentifierMapping::unresolved(raw, "not resolved"))
            })
            .collect::<Vec<_>>();
        let total = mappings.len();
        let resolved_count = mappings.iter().filter(|mapping| mapping.resolved).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            resolved_count as f64 / total as f64
        };

        ResolutionReport {
            species,
            format,
            mappings,
            total,
            resolved_count,
            success_rate,
            batch_calls,
            failed_batches,
            last_batch_error,
        }
    }
}

/// Parses an identifier-mapping TSV body into hits keyed by the position of
/// the query within `batch`.
pub fn parse_identifier_rows(
    body: &str,
    batch: &[String],
) -> Result<HashMap<usize, CachedIdentifier>, KiraError> {
    let parse_error = |err: csv::Error| KiraError::ResolverParse {
        line: error_line(&err),
        reason: err.to_string(),
    };
    let mut reader = response_reader(body);
    let headers = reader.headers().map_err(parse_error)?.clone();
    if headers.iter().all(str::is_empty) {
        return Ok(HashMap::new());
    }
    let header_line = record_line(&headers, 1);
    let string_id_col = column(&headers, "stringId").ok_or_else(|| KiraError::ResolverParse {
        line: header_line,
        reason: "missing column stringId".to_string(),
    })?;
    let query_index_col = column(&headers, "queryIndex");
    let query_item_col = column(&headers, "queryItem");
    if query_index_col.is_none() && query_item_col.is_none() {
        return Err(KiraError::ResolverParse {
            line: header_line,
            reason: "missing column queryIndex or queryItem".to_string(),
        });
    }
    let preferred_col = column(&headers, "preferredName");
    let annotation_col = column(&headers, "annotation");

    let by_item = batch
        .iter()
        .enumerate()
        .map(|(pos, query)| (query.to_uppercase(), pos))
        .collect::<HashMap<_, _>>();

    let mut hits = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(parse_error)?;
        let line = record_line(&record, 0);
        let field = |col: usize| record.get(col).unwrap_or_default();
        let position = match query_index_col {
            Some(col) => {
                let value = field(col);
                let pos = value
                    .parse::<usize>()
                    .map_err(|_| KiraError::ResolverParse {
                        line,
                        reason: format!("invalid queryIndex {value:?}"),
                    })?;
                if pos >= batch.len() {
                    return Err(KiraError::ResolverParse {
                        line,
                        reason: format!("queryIndex {pos} outside batch of {}", batch.len()),
                    });
                }
                pos
            }
            None => {
                let item = query_item_col
                    .map(|col| field(col).to_uppercase())
                    .unwrap_or_default();
                match by_item.get(&item) {
                    Some(pos) => *pos,
                    None => {
                        return Err(KiraError::ResolverParse {
                            line,
                            reason: format!("queryItem {item:?} was not requested"),
                        });
                    }
                }
            }
        };
        let canonical_id = field(string_id_col);
        if canonical_id.is_empty() {
            return Err(KiraError::ResolverParse {
                line,
                reason: "empty stringId".to_string(),
            });
        }
        hits.entry(position).or_insert_with(|| CachedIdentifier {
            canonical_id: canonical_id.to_string(),
            preferred_name: optional_field(&record, preferred_col),
            annotation: optional_field(&record, annotation_col),
        });
    }
    Ok(hits)
}

fn optional_field(record: &StringRecord, col: Option<usize>) -> Option<String> {
    col.and_then(|col| record.get(col))
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const HEADER: &str =
        "queryIndex\tqueryItem\tstringId\tncbiTaxonId\ttaxonName\tpreferredName\tannotation";

    #[test]
    fn parse_rows_by_query_index() {
        let body = format!(
            "{HEADER}\n1\tBRCA1\t9606.ENSP00000418960\t9606\tHomo sapiens\tBRCA1\tBreast cancer type 1\n\
             0\tTP53\t9606.ENSP00000269305\t9606\tHomo sapiens\tTP53\tCellular tumor antigen p53\n"
        );
        let batch = vec!["TP53".to_string(), "BRCA1".to_string(), "NOPE".to_string()];
        let hits = parse_identifier_rows(&body, &batch).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[&0].canonical_id, "9606.ENSP00000269305");
        assert_eq!(hits[&1].preferred_name.as_deref(), Some("BRCA1"));
        assert!(!hits.contains_key(&2));
    }

    #[test]
    fn first_row_per_query_wins() {
        let body = format!(
            "{HEADER}\n0\tTP53\t9606.A\t9606\tHomo sapiens\tTP53\t\n0\tTP53\t9606.B\t9606\tHomo sapiens\tTP53\t\n"
        );
        let hits = parse_identifier_rows(&body, &["TP53".to_string()]).unwrap();
        assert_eq!(hits[&0].canonical_id, "9606.A");
        assert_eq!(hits[&0].annotation, None);
    }

    #[test]
    fn empty_body_has_no_hits() {
        assert!(parse_identifier_rows("", &["TP53".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn short_row_is_rejected() {
        let body = format!("{HEADER}\n0\tTP53\t9606.A\n");
        let err = parse_identifier_rows(&body, &["TP53".to_string()]).unwrap_err();
        assert_matches!(err, KiraError::ResolverParse { line: 2, .. });
    }

    #[test]
    fn missing_string_id_column_is_rejected() {
        let err = parse_identifier_rows("queryIndex\tpreferredName\n", &[]).unwrap_err();
        assert_matches!(err, KiraError::ResolverParse { line: 1, .. });
    }

    #[test]
    fn resolved_name_prefers_preferred_name() {
        let mapping = IdentifierMapping::resolved(
            "tp53",
            CachedIdentifier {
                canonical_id: "9606.ENSP00000269305".to_string(),
                preferred_name: Some("TP53".to_string()),
                annotation: None,
            },
        );
        assert_eq!(mapping.resolved_name(), Some("TP53"));
        let unresolved = IdentifierMapping::unresolved("x", "nope");
        assert_eq!(unresolved.resolved_name(), None);
    }
}
