use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch::{BatchOrchestrator, ChunkSelection};
use crate::builder::{NetworkBuilder, NetworkGraph};
use crate::cache_key::gene_set_hash;
use crate::domain::{ConfidenceThreshold, IdFormat, NetworkType, Species};
use crate::error::KiraError;
use crate::expression::{ExpressionTable, annotate_nodes};
use crate::memo::MemoCache;
use crate::resolver::{
    CachedIdentifier, IdentifierMapping, IdentifierResolver, ResolutionReport,
};
use crate::store::{
    NetworkFilter, NetworkKey, NetworkPage, NetworkStore, NewNetwork, PageRequest, Persisted,
    StoredNetwork,
};
use crate::stringdb::{IdentifierClient, InteractionClient};

#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub comparison_label: String,
    pub genes: Vec<String>,
    pub confidence_threshold: u32,
    pub network_type: NetworkType,
    pub id_format: IdFormat,
    pub species: Species,
    /// Optional per-gene metrics attached to matching nodes.
    pub expression: ExpressionTable,
}

impl NetworkRequest {
    pub fn new(comparison_label: impl Into<String>, genes: Vec<String>) -> Self {
        Self {
            comparison_label: comparison_label.into(),
            genes,
            confidence_threshold: ConfidenceThreshold::default().value(),
            network_type: NetworkType::Full,
            id_format: IdFormat::Symbol,
            species: Species::default(),
            expression: ExpressionTable::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    #[serde(flatten)]
    pub network: StoredNetwork,
    /// True when an existing network answered the request.
    pub cached: bool,
    pub total_genes: usize,
    pub unresolved: Vec<IdentifierMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkSelection>,
    pub annotated_nodes: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<I, N, M>
where
    I: IdentifierClient,
    N: InteractionClient,
    M: MemoCache<CachedIdentifier>,
{
    store: NetworkStore,
    resolver: IdentifierResolver<I, M>,
    builder: NetworkBuilder<N>,
}

impl<I, N, M> App<I, N, M>
where
    I: IdentifierClient,
    N: InteractionClient,
    M: MemoCache<CachedIdentifier>,
{
    pub fn new(
        store: NetworkStore,
        resolver: IdentifierResolver<I, M>,
        builder: NetworkBuilder<N>,
    ) -> Self {
        Self {
            store,
            resolver,
            builder,
        }
    }

    pub fn store(&self) -> &NetworkStore {
        &self.store
    }

    pub fn resolver(&self) -> &IdentifierResolver<I, M> {
        &self.resolver
    }

    pub fn builder(&self) -> &NetworkBuilder<N> {
        &self.builder
    }

    /// Resolves, deduplicates, builds and persists one network.
    ///
    /// A request whose resolved gene set matches a stored successful network
    /// returns that network without calling the interaction service.
    /// Resolution and build failures are recorded as failed networks before
    /// the error is returned; they never answer later requests.
    pub fn create_network(
        &self,
        request: &NetworkRequest,
        sink: &dyn ProgressSink,
    ) -> Result<BuildOutcome, KiraError> {
        let started = Instant::now();
        let label = request.comparison_label.trim();
        if label.is_empty() {
            return Err(KiraError::EmptyComparisonLabel);
        }
        let threshold = ConfidenceThreshold::new(request.confidence_threshold)?;
        let genes = request
            .genes
            .iter()
            .map(|gene| gene.trim())
            .filter(|gene| !gene.is_empty())
            .map(|gene| gene.to_string())
            .collect::<Vec<_>>();
        if genes.is_empty() {
            return Err(KiraError::EmptyGeneSet);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} genes", genes.len()),
            elapsed: None,
        });
        let report = self
            .resolver
            .resolve(&genes, request.id_format, request.species);
        let key = NetworkKey {
            comparison_label: label.to_string(),
            gene_set_hash: gene_set_hash(&report.mappings, threshold, request.network_type),
            threshold,
            network_type: request.network_type,
        };
        let canonical_ids = report.canonical_ids();
        let new = NewNetwork {
            key: &key,
            original_gene_set: &genes,
            resolved_gene_count: canonical_ids.len(),
        };

        if report.service_failed() {
            let err = KiraError::ResolutionFailed {
                total: report.total,
                reason: report
                    .last_batch_error
                    .clone()
                    .unwrap_or_else(|| "every batch failed".to_string()),
            };
            return Err(self.record_failure(&new, err));
        }
        if canonical_ids.len() < 2 {
            return Err(KiraError::TooFewResolvedGenes {
                resolved: canonical_ids.len(),
            });
        }
        info!(
            label,
            hash = %key.gene_set_hash,
            resolved = canonical_ids.len(),
            total = report.total,
            "resolved gene set"
        );

        if let Some(existing) = self.store.find_successful(&key)? {
            info!(network_id = existing.record.id, "network cache hit");
            sink.event(ProgressEvent {
                message: format!("phase=Cache; hit network {}", existing.record.id),
                elapsed: Some(started.elapsed()),
            });
            return Ok(outcome(existing, true, &report, None, 0));
        }
        debug!(hash = %key.gene_set_hash, "network cache miss");

        sink.event(ProgressEvent {
            message: format!("phase=Build; {} proteins", canonical_ids.len()),
            elapsed: Some(started.elapsed()),
        });
        let (mut graph, chunk) =
            match self.build_graph(&report, &canonical_ids, request, threshold) {
                Ok(built) => built,
                Err(err) => return Err(self.record_failure(&new, err)),
            };
        let annotated = annotate_nodes(&mut graph, &report.mappings, &request.expression);
        if annotated > 0 {
            debug!(annotated, "attached expression metrics");
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {} nodes, {} edges",
                graph.node_count(),
                graph.edge_count()
            ),
            elapsed: Some(started.elapsed()),
        });
        let persisted = self.store.persist_success(&new, &graph)?;
        let (network, cached) = match persisted {
            Persisted::Created(network) => (network, false),
            Persisted::Existing(network) => {
                info!(network_id = network.record.id, "concurrent build won, returning its network");
                (network, true)
            }
        };
        sink.event(ProgressEvent {
            message: format!("phase=Done; network {}", network.record.id),
            elapsed: Some(started.elapsed()),
        });
        Ok(outcome(network, cached, &report, chunk, annotated))
    }

    fn build_graph(
        &self,
        report: &ResolutionReport,
        canonical_ids: &[String],
        request: &NetworkRequest,
        threshold: ConfidenceThreshold,
    ) -> Result<(NetworkGraph, Option<ChunkSelection>), KiraError> {
        let orchestrator = BatchOrchestrator::new(&self.builder, self.resolver.batch_size());
        if orchestrator.needs_chunking(canonical_ids.len()) {
            let resolved = report.resolved().cloned().collect::<Vec<_>>();
            let built =
                orchestrator.build(&resolved, request.species, threshold, request.network_type)?;
            return Ok((built.graph, Some(built.selection)));
        }
        let graph =
            self.builder
                .build(canonical_ids, request.species, threshold, request.network_type)?;
        Ok((graph, None))
    }

    fn record_failure(&self, new: &NewNetwork<'_>, err: KiraError) -> KiraError {
        warn!(error = %err, hash = %new.key.gene_set_hash, "network build failed");
        match self.store.record_failure(new, &err.to_string()) {
            Ok(record) => debug!(network_id = record.id, "recorded failed network"),
            Err(store_err) => warn!(error = %store_err, "could not record failed network"),
        }
        err
    }

    pub fn query_networks(
        &self,
        filter: &NetworkFilter,
        page: PageRequest,
    ) -> Result<NetworkPage, KiraError> {
        self.store.query(filter, page)
    }

    pub fn get_network(&self, id: i64, include_graph: bool) -> Result<StoredNetwork, KiraError> {
        self.store.get(id, include_graph)
    }

    pub fn resolve_identifiers(
        &self,
        genes: &[String],
        format: IdFormat,
        species: Species,
        sink: &dyn ProgressSink,
    ) -> Result<ResolutionReport, KiraError> {
        if genes.iter().all(|gene| gene.trim().is_empty()) {
            return Err(KiraError::EmptyGeneSet);
        }
        let started = Instant::now();
        let report = self.resolver.resolve(genes, format, species);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {}/{} resolved in {} calls",
                report.resolved_count, report.total, report.batch_calls
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    pub fn delete_network(&self, id: i64) -> Result<(), KiraError> {
        self.store.delete(id)?;
        info!(network_id = id, "deleted network");
        Ok(())
    }
}

fn outcome(
    network: StoredNetwork,
    cached: bool,
    report: &ResolutionReport,
    chunk: Option<ChunkSelection>,
    annotated_nodes: usize,
) -> BuildOutcome {
    BuildOutcome {
        network,
        cached,
        total_genes: report.total,
        unresolved: report
            .mappings
            .iter()
            .filter(|mapping| !mapping.resolved)
            .cloned()
            .collect(),
        chunk,
        annotated_nodes,
    }
}
