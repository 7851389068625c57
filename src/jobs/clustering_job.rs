/// Clustering Analysis Job
///
/// One run takes a universe of assets through the whole pipeline:
/// - Per-asset feature extraction (short or invalid series are excluded)
/// - PCA over the standardized features, when some method needs it
/// - One similarity matrix and graph per metric, shared by every method
/// - Every configured clustering method as an independent pool task
/// - Quality evaluation and the summary report
///
/// **Failure isolation**:
/// - Per-asset and per-pair problems land in diagnostics
/// - A failed metric fails only the methods that need it
/// - A failed method produces a `failed` block; the other methods still report
/// - Cancellation discards everything and returns `Cancelled`

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::ClusteringError;
use crate::external::universe_source::UniverseSource;
use crate::models::asset::Universe;
use crate::models::cluster::{AlgorithmConfig, ClusterAssignment};
use crate::models::config::{AnalysisConfig, MethodConfig, QualityBasis};
use crate::models::report::{MethodReport, PcaSection, SummaryReport};
use crate::models::similarity::SimilarityMetric;
use crate::services::cluster_quality_service::{self, QualityEvaluation, QualityInput};
use crate::services::clustering::{ClusterBudget, ClusterInput};
use crate::services::feature_service::{self, FeatureMatrix};
use crate::services::pca_service::{self, ReducedFeatures};
use crate::services::report_service::{self, RunSummary};
use crate::services::similarity_service::{self, SimilarityInputs};
use crate::services::similarity_store::{MetricArtifacts, SimilarityStore};
use crate::state::{CancellationFlag, DiagnosticsSink, JobContext, JobResult};

type ReducedEntry = Result<Arc<ReducedFeatures>, String>;

/// Rough working set of one pool task for this universe: the densest
/// similarity matrix plus two copies of every return series.
pub fn estimate_task_bytes(universe: &Universe) -> u64 {
    let n = universe.len() as u64;
    let t = universe.assets().iter().map(|a| a.len()).max().unwrap_or(0) as u64;
    let pair_bytes = n * n.saturating_sub(1) / 2 * 32;
    let series_bytes = n * t * 8 * 2;
    (pair_bytes + series_bytes).max(1)
}

/// Processed / failed method counts of a finished run.
pub fn job_result(report: &SummaryReport) -> JobResult {
    JobResult {
        items_processed: report.run.methods_completed,
        items_failed: report.run.methods_failed,
    }
}

/// Load the universe from a source and run the analysis on it.
pub async fn run_from_source(
    ctx: JobContext,
    source: &dyn UniverseSource,
) -> Result<SummaryReport, ClusteringError> {
    info!("📥 Loading universe from {}", source.describe());
    let universe = source.load_universe().await?;
    run_clustering_analysis(ctx, universe).await
}

/// Main entry point for one clustering analysis run.
///
/// # Arguments
/// * `ctx` - Config, cancellation flag, diagnostics sink and worker pool
/// * `universe` - Aligned asset series
///
/// # Returns
/// * `Ok(SummaryReport)` - Every configured method, completed, partial or failed
/// * `Err(ClusteringError)` - Invalid global config, no usable asset, or cancellation
pub async fn run_clustering_analysis(ctx: JobContext, universe: Universe) -> Result<SummaryReport, ClusteringError> {
    info!("🔗 Starting clustering analysis job...");
    let config = ctx.config.clone();
    config.validate()?;

    let input_assets = universe.len();
    let universe = Arc::new(universe);

    // Features
    let features = {
        let universe = universe.clone();
        let config = config.clone();
        ctx.pool
            .run(move || feature_service::build_feature_matrix(&universe, &config.features, config.series_kind))
            .await?
    };
    for excluded in features.excluded {
        warn!("⚠️ Excluded {}: {}", excluded.asset, excluded.reason);
        ctx.diagnostics.exclude_asset(excluded);
    }
    let features = Arc::new(features.matrix);
    if features.n_assets() == 0 {
        return Err(ClusteringError::DegenerateInput(
            "no asset survived feature extraction".to_string(),
        ));
    }
    check_cancelled(&ctx.cancel)?;

    // PCA
    let (reduced, pca_section) = reduce_if_needed(&ctx, &config, features.clone()).await?;
    check_cancelled(&ctx.cancel)?;

    // Similarity matrices and graphs
    let inputs = Arc::new(similarity_inputs(&universe, &config, &features));
    let store = SimilarityStore::new();
    compute_metrics(&ctx, &config, inputs, &store).await?;
    check_cancelled(&ctx.cancel)?;

    // Methods, reported in configured order
    let tasks = config.methods.iter().cloned().map(|method| {
        let ctx = ctx.clone();
        let store = store.clone();
        let reduced = reduced.clone();
        async move { run_method(ctx, method, store, reduced).await }
    });
    let mut methods = Vec::with_capacity(config.methods.len());
    for block in join_all(tasks).await {
        methods.push(block?);
    }
    check_cancelled(&ctx.cancel)?;

    let report = report_service::build_report(
        RunSummary {
            run_id: Uuid::new_v4(),
            seed: config.seed,
            input_assets,
            universe_size: features.n_assets(),
            feature_names: features.feature_names().to_vec(),
            worker_count: ctx.pool.workers(),
        },
        methods,
        pca_section,
        ctx.diagnostics.snapshot(),
    );

    let result = job_result(&report);
    info!(
        "🏁 Clustering analysis completed: {} processed, {} failed",
        result.items_processed, result.items_failed
    );
    Ok(report)
}

fn check_cancelled(cancel: &CancellationFlag) -> Result<(), ClusteringError> {
    if cancel.is_cancelled() {
        warn!("🛑 Clustering analysis cancelled");
        return Err(ClusteringError::Cancelled);
    }
    Ok(())
}

fn needs_reduced_features(config: &AnalysisConfig) -> bool {
    config.methods.iter().any(|m| {
        m.uses_reduced_features() || m.quality_basis(&config.evaluation) == QualityBasis::FeatureDistance
    })
}

async fn reduce_if_needed(
    ctx: &JobContext,
    config: &Arc<AnalysisConfig>,
    features: Arc<FeatureMatrix>,
) -> Result<(Option<ReducedEntry>, PcaSection), ClusteringError> {
    if !needs_reduced_features(config) {
        debug!("No method uses reduced features, skipping PCA");
        return Ok((None, PcaSection::Skipped));
    }

    let pca_config = config.pca.clone();
    match ctx.pool.run(move || pca_service::reduce(&features, &pca_config)).await {
        Ok(reduced) => {
            let section = PcaSection::Completed(reduced.result.clone());
            Ok((Some(Ok(Arc::new(reduced))), section))
        }
        Err(ClusteringError::Cancelled) => Err(ClusteringError::Cancelled),
        Err(e) => {
            warn!("⚠️ PCA failed, feature-based methods will fail: {}", e);
            let error = e.to_string();
            Ok((Some(Err(error.clone())), PcaSection::Failed { error }))
        }
    }
}

fn similarity_inputs(universe: &Universe, config: &AnalysisConfig, features: &FeatureMatrix) -> SimilarityInputs {
    let returns = features
        .asset_ids()
        .iter()
        .map(|id| {
            universe
                .get(id)
                .map(|asset| asset.returns(config.series_kind))
                .unwrap_or_default()
        })
        .collect();
    SimilarityInputs {
        asset_ids: features.asset_ids().to_vec(),
        returns,
        features: features.standardized(),
    }
}

/// One pool task per required metric; results land in the store.
async fn compute_metrics(
    ctx: &JobContext,
    config: &Arc<AnalysisConfig>,
    inputs: Arc<SimilarityInputs>,
    store: &SimilarityStore,
) -> Result<(), ClusteringError> {
    let metrics = config.required_metrics();
    debug!("Required similarity metrics: {:?}", metrics);

    let tasks = metrics.into_iter().map(|metric| {
        let inputs = inputs.clone();
        let config = config.clone();
        let cancel = ctx.cancel.clone();
        let pool = ctx.pool.clone();
        async move {
            let result = pool
                .run(move || {
                    let built = similarity_service::compute_matrix(metric, &inputs, &config.similarity, &cancel)?;
                    let graph = similarity_service::build_graph(&built.matrix, config.similarity.edge_selection(metric));
                    Ok((built, graph))
                })
                .await;
            (metric, result)
        }
    });

    let mut cancelled = false;
    for (metric, result) in join_all(tasks).await {
        match result {
            Ok((built, graph)) => {
                if !built.missing.is_empty() {
                    warn!("⚠️ {}: {} pairs undefined", metric, built.missing.len());
                    ctx.diagnostics.missing_pairs(built.missing);
                }
                if graph.dropped_non_positive > 0 {
                    ctx.diagnostics.note(format!(
                        "{} graph: dropped {} edges with non-positive weight",
                        metric, graph.dropped_non_positive
                    ));
                }
                info!(
                    "🕸️ {} graph: {} nodes, {} edges, {} isolated",
                    metric,
                    graph.graph.node_count(),
                    graph.graph.edge_count(),
                    graph.graph.isolated_count()
                );
                store.insert(
                    metric,
                    MetricArtifacts {
                        matrix: built.matrix,
                        graph: graph.graph,
                    },
                );
            }
            Err(ClusteringError::Cancelled) => cancelled = true,
            Err(e) => {
                warn!("❌ {} similarity failed: {}", metric, e);
                store.record_failure(metric, e.to_string());
            }
        }
    }

    if cancelled {
        return Err(ClusteringError::Cancelled);
    }
    Ok(())
}

/// Run one method to a report block. Only cancellation escapes as an error.
async fn run_method(
    ctx: JobContext,
    method: MethodConfig,
    store: SimilarityStore,
    reduced: Option<ReducedEntry>,
) -> Result<MethodReport, ClusteringError> {
    let started = Instant::now();
    let config = ctx.config.clone();
    let cancel = ctx.cancel.clone();
    let diagnostics = ctx.diagnostics.clone();
    let task_method = method.clone();

    let outcome = ctx
        .pool
        .run(move || cluster_and_evaluate(&task_method, &config, &store, reduced.as_ref(), cancel, &diagnostics))
        .await;

    match outcome {
        Ok((assignment, evaluation, evaluated_on)) => {
            info!(
                "✅ {}: {} clusters, {} noise in {:?}",
                method.name,
                evaluation.stats.num_clusters,
                evaluation.stats.noise_count,
                started.elapsed()
            );
            Ok(report_service::method_block(
                &method,
                &assignment,
                evaluation.stats,
                evaluated_on,
                started.elapsed(),
            ))
        }
        Err(ClusteringError::Cancelled) => Err(ClusteringError::Cancelled),
        Err(e) => {
            warn!("❌ Method {} failed: {}", method.name, e);
            Ok(report_service::failed_block(&method, e.to_string(), started.elapsed()))
        }
    }
}

fn reduced_features<'a>(reduced: Option<&'a ReducedEntry>) -> Result<&'a ReducedFeatures, ClusteringError> {
    match reduced {
        Some(Ok(reduced)) => Ok(reduced),
        Some(Err(e)) => Err(ClusteringError::DegenerateInput(format!("reduced features unavailable: {}", e))),
        None => Err(ClusteringError::InvalidConfig("reduced features were not computed".to_string())),
    }
}

fn metric_artifacts(store: &SimilarityStore, metric: SimilarityMetric) -> Result<Arc<MetricArtifacts>, ClusteringError> {
    match store.get(metric) {
        Some(Ok(artifacts)) => Ok(artifacts),
        Some(Err(e)) => Err(ClusteringError::Worker(format!("{} similarity unavailable: {}", metric, e))),
        None => Err(ClusteringError::InvalidConfig(format!("{} similarity was not computed", metric))),
    }
}

fn cluster_and_evaluate(
    method: &MethodConfig,
    config: &AnalysisConfig,
    store: &SimilarityStore,
    reduced: Option<&ReducedEntry>,
    cancel: CancellationFlag,
    diagnostics: &DiagnosticsSink,
) -> Result<(ClusterAssignment, QualityEvaluation, String), ClusteringError> {
    method.validate()?;
    let budget = ClusterBudget::new(cancel, method.time_budget_ms.map(Duration::from_millis));

    let assignment = match method.metric {
        Some(metric) => {
            let artifacts = metric_artifacts(store, metric)?;
            let input = if matches!(method.algorithm, AlgorithmConfig::Graph { .. }) {
                ClusterInput::Graph(&artifacts.graph)
            } else {
                ClusterInput::Similarity(&artifacts.matrix)
            };
            method.algorithm.assign(input, config.seed, &budget)?
        }
        None => {
            let reduced = reduced_features(reduced)?;
            let input = ClusterInput::Features {
                asset_ids: &reduced.asset_ids,
                values: &reduced.values,
            };
            method.algorithm.assign(input, config.seed, &budget)?
        }
    };

    let evaluation = match method.quality_basis(&config.evaluation) {
        QualityBasis::Metric { metric } => {
            let artifacts = metric_artifacts(store, metric)?;
            cluster_quality_service::evaluate(&method.name, &assignment, QualityInput::Matrix(&artifacts.matrix))
        }
        QualityBasis::FeatureDistance => {
            let reduced = reduced_features(reduced)?;
            cluster_quality_service::evaluate(
                &method.name,
                &assignment,
                QualityInput::FeatureDistance {
                    asset_ids: &reduced.asset_ids,
                    values: &reduced.values,
                },
            )
        }
    };
    for note in &evaluation.notes {
        diagnostics.note(note.clone());
    }

    let evaluated_on = match method.quality_basis(&config.evaluation) {
        QualityBasis::Metric { metric } => metric.to_string(),
        QualityBasis::FeatureDistance => "feature_distance".to_string(),
    };
    Ok((assignment, evaluation, evaluated_on))
}
