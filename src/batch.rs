use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{NetworkBuilder, NetworkGraph};
use crate::cache_key::gene_set_hash;
use crate::domain::{ConfidenceThreshold, NetworkType, Species};
use crate::error::KiraError;
use crate::resolver::IdentifierMapping;
use crate::stringdb::InteractionClient;

/// Which chunk of an oversized gene set became the network.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSelection {
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub chunk_hash: String,
    pub kept_ids: usize,
    pub discarded_chunks: usize,
    pub failed_chunks: usize,
}

#[derive(Debug)]
pub struct BatchBuild {
    pub graph: NetworkGraph,
    pub selection: ChunkSelection,
}

/// Builds resolved sets larger than one request in chunks and keeps the
/// densest chunk. Edges between chunks are never fetched.
pub struct BatchOrchestrator<'a, N: InteractionClient> {
    builder: &'a NetworkBuilder<N>,
    chunk_size: usize,
}

impl<'a, N: InteractionClient> BatchOrchestrator<'a, N> {
    pub fn new(builder: &'a NetworkBuilder<N>, chunk_size: usize) -> Self {
        Self {
            builder,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn needs_chunking(&self, resolved_ids: usize) -> bool {
        resolved_ids > self.chunk_size
    }

    pub fn build(
        &self,
        resolved: &[IdentifierMapping],
        species: Species,
        threshold: ConfidenceThreshold,
        network_type: NetworkType,
    ) -> Result<BatchBuild, KiraError> {
        let proteins = first_mapping_per_protein(resolved);
        let chunks = proteins.chunks(self.chunk_size).collect::<Vec<_>>();
        let chunk_count = chunks.len();
        let mut best: Option<(usize, String, usize, NetworkGraph)> = None;
        let mut built_chunks = 0usize;
        let mut failed_chunks = 0usize;
        let mut last_error: Option<KiraError> = None;

        for (idx, chunk) in chunks.iter().enumerate() {
            let ids = chunk
                .iter()
                .filter_map(|mapping| mapping.canonical_id.clone())
                .collect::<Vec<_>>();
            let chunk_hash = gene_set_hash(chunk.iter().copied(), threshold, network_type);
            if ids.len() < 2 {
                warn!(chunk = idx, hash = %chunk_hash, ids = ids.len(), "skipping chunk with fewer than 2 ids");
                continue;
            }
            info!(chunk = idx, of = chunk_count, hash = %chunk_hash, ids = ids.len(), "building chunk");
            match self.builder.build(&ids, species, threshold, network_type) {
                Ok(graph) => {
                    built_chunks += 1;
                    let better = best
                        .as_ref()
                        .is_none_or(|(_, _, _, kept)| graph.edge_count() > kept.edge_count());
                    if better {
                        best = Some((idx, chunk_hash, ids.len(), graph));
                    }
                }
                Err(err) => {
                    warn!(chunk = idx, hash = %chunk_hash, error = %err, "chunk build failed");
                    failed_chunks += 1;
                    last_error = Some(err);
                }
            }
        }

        let Some((chunk_index, chunk_hash, kept_ids, graph)) = best else {
            return Err(last_error.unwrap_or_else(|| {
                KiraError::NoUsableChunk(format!(
                    "none of {chunk_count} chunks had 2 or more resolved ids"
                ))
            }));
        };
        let discarded_chunks = built_chunks.saturating_sub(1);
        if chunk_count > 1 {
            warn!(
                kept = chunk_index,
                edges = graph.edge_count(),
                discarded_chunks,
                failed_chunks,
                "kept densest chunk; interactions across chunks are not part of the network"
            );
        }
        Ok(BatchBuild {
            graph,
            selection: ChunkSelection {
                chunk_index,
                chunk_count,
                chunk_hash,
                kept_ids,
                discarded_chunks,
                failed_chunks,
            },
        })
    }
}

/// One mapping per canonical id, in first-seen order, so chunks are sized by
/// distinct proteins rather than by aliases.
fn first_mapping_per_protein(resolved: &[IdentifierMapping]) -> Vec<&IdentifierMapping> {
    let mut seen = HashSet::new();
    resolved
        .iter()
        .filter(|mapping| {
            mapping
                .canonical_id
                .as_deref()
                .is_some_and(|id| seen.insert(id))
        })
        .collect()
}
