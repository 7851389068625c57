/// Similarity matrices and graphs.
///
/// Pairs are computed in parallel (rayon) over read-only inputs; each pair
/// writes exactly one entry of the packed matrix. Per-pair failures become
/// `Missing` entries and are reported back as `MissingPair`s.

use ndarray::Array2;
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::errors::ClusteringError;
use crate::models::config::{EdgeSelection, SimilarityConfig};
use crate::models::report::MissingPair;
use crate::models::similarity::{Edge, PairValue, SimilarityGraph, SimilarityMatrix, SimilarityMetric};
use crate::services::similarity_metrics::{self, MetricError};
use crate::state::CancellationFlag;

/// Read-only inputs shared by every metric of a run, rows in universe order.
#[derive(Debug, Clone)]
pub struct SimilarityInputs {
    pub asset_ids: Vec<String>,
    pub returns: Vec<Vec<f64>>,
    /// Standardized feature columns, used by cosine similarity.
    pub features: Array2<f64>,
}

/// A similarity matrix plus the pairs that could not be computed.
#[derive(Debug, Clone)]
pub struct MatrixBuild {
    pub matrix: SimilarityMatrix,
    pub missing: Vec<MissingPair>,
}

/// A similarity graph plus the number of candidate edges dropped for a
/// non-positive weight.
#[derive(Debug, Clone)]
pub struct GraphBuild {
    pub graph: SimilarityGraph,
    pub dropped_non_positive: usize,
}

fn pair_error(metric_error: MetricError, a: &str, b: &str) -> ClusteringError {
    match metric_error {
        MetricError::LengthMismatch { len_a, len_b } => ClusteringError::SeriesLengthMismatch {
            asset_a: a.to_string(),
            asset_b: b.to_string(),
            len_a,
            len_b,
        },
        MetricError::Undefined(reason) => ClusteringError::UndefinedSimilarity {
            asset_a: a.to_string(),
            asset_b: b.to_string(),
            reason,
        },
    }
}

/// Compute the full pairwise matrix for one metric.
///
/// # Arguments
/// * `metric` - Which similarity to compute
/// * `inputs` - Return series and standardized features per asset
/// * `config` - MI bins and DTW settings
/// * `cancel` - Checked before every pair
///
/// # Returns
/// The matrix with `Missing` entries for failed pairs, or `Cancelled`.
pub fn compute_matrix(
    metric: SimilarityMetric,
    inputs: &SimilarityInputs,
    config: &SimilarityConfig,
    cancel: &CancellationFlag,
) -> Result<MatrixBuild, ClusteringError> {
    let n = inputs.asset_ids.len();
    info!("🔗 Computing {} similarity for {} assets ({} pairs)", metric, n, n * n.saturating_sub(1) / 2);

    let dtw_series: Option<Vec<Vec<f64>>> = match metric {
        SimilarityMetric::Dtw if config.dtw_standardize => {
            Some(inputs.returns.iter().map(|s| similarity_metrics::zscore(s)).collect())
        }
        _ => None,
    };
    let series = dtw_series.as_ref().unwrap_or(&inputs.returns);

    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();

    let entries: Vec<PairValue> = pairs
        .par_iter()
        .map(|&(i, j)| {
            if cancel.is_cancelled() {
                return PairValue::Missing {
                    reason: "cancelled".to_string(),
                };
            }
            let result = match metric {
                SimilarityMetric::Correlation => {
                    similarity_metrics::pearson(&series[i], &series[j]).map(|r| (r, r))
                }
                SimilarityMetric::MutualInformation => {
                    similarity_metrics::mutual_information(&series[i], &series[j], config.mi_bins).map(|mi| (mi, mi))
                }
                SimilarityMetric::Cosine => {
                    let a = inputs.features.row(i).to_vec();
                    let b = inputs.features.row(j).to_vec();
                    similarity_metrics::cosine(&a, &b).map(|c| (c, c))
                }
                SimilarityMetric::Dtw => similarity_metrics::dtw_distance(&series[i], &series[j], config.dtw_window)
                    .map(|d| (d, similarity_metrics::distance_to_similarity(d))),
            };
            match result {
                Ok((raw, similarity)) => PairValue::Value { raw, similarity },
                Err(e) => PairValue::Missing {
                    reason: pair_error(e, &inputs.asset_ids[i], &inputs.asset_ids[j]).to_string(),
                },
            }
        })
        .collect();

    if cancel.is_cancelled() {
        return Err(ClusteringError::Cancelled);
    }

    let missing: Vec<MissingPair> = pairs
        .iter()
        .zip(entries.iter())
        .filter_map(|(&(i, j), entry)| match entry {
            PairValue::Missing { reason } => Some(MissingPair {
                metric,
                asset_a: inputs.asset_ids[i].clone(),
                asset_b: inputs.asset_ids[j].clone(),
                reason: reason.clone(),
            }),
            PairValue::Value { .. } => None,
        })
        .collect();

    if !missing.is_empty() {
        warn!("⚠️ {} of {} {} pairs could not be computed", missing.len(), pairs.len(), metric);
    }

    let matrix = SimilarityMatrix::new(metric, inputs.asset_ids.clone(), entries)?;
    Ok(MatrixBuild { matrix, missing })
}

/// Derive a graph from a similarity matrix.
///
/// Threshold mode keeps pairs strictly above the threshold. Top-k mode keeps
/// each node's k most similar neighbours (ties broken by neighbour id) and
/// symmetrizes by union. Missing pairs never become edges, and neither do
/// non-positive similarities since community detection needs positive
/// weights.
pub fn build_graph(matrix: &SimilarityMatrix, selection: EdgeSelection) -> GraphBuild {
    let n = matrix.len();
    let mut candidates: BTreeSet<(usize, usize)> = BTreeSet::new();

    match selection {
        EdgeSelection::Threshold { value } => {
            for (i, j, entry) in matrix.pairs() {
                if let Some(s) = entry.similarity() {
                    if s > value {
                        candidates.insert((i, j));
                    }
                }
            }
        }
        EdgeSelection::TopK { k } => {
            for i in 0..n {
                let mut neighbours: Vec<(usize, f64)> = (0..n)
                    .filter(|&j| j != i)
                    .filter_map(|j| matrix.similarity(i, j).map(|s| (j, s)))
                    .collect();
                // Asset ids are sorted, so index order is identifier order.
                neighbours.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
                for (j, _) in neighbours.into_iter().take(k) {
                    candidates.insert((i.min(j), i.max(j)));
                }
            }
        }
    }

    let mut dropped_non_positive = 0;
    let mut edges: Vec<Edge> = candidates
        .into_iter()
        .filter_map(|(i, j)| {
            let weight = matrix.similarity(i, j)?;
            if weight <= 0.0 {
                dropped_non_positive += 1;
                return None;
            }
            Some(Edge {
                source: i,
                target: j,
                weight,
            })
        })
        .collect();

    edges.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then(a.source.cmp(&b.source))
            .then(a.target.cmp(&b.target))
    });

    let graph = SimilarityGraph::from_edges(matrix.metric(), matrix.asset_ids().to_vec(), edges);
    debug!(
        "{} graph: {} nodes, {} edges, {} isolated",
        matrix.metric(),
        graph.node_count(),
        graph.edge_count(),
        graph.isolated_count()
    );

    GraphBuild {
        graph,
        dropped_non_positive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(returns: Vec<Vec<f64>>) -> SimilarityInputs {
        let n = returns.len();
        SimilarityInputs {
            asset_ids: (0..n).map(|i| format!("A{}", i)).collect(),
            features: Array2::from_shape_fn((n, 2), |(i, j)| (i + j) as f64 - 1.0),
            returns,
        }
    }

    fn sample_returns() -> Vec<Vec<f64>> {
        vec![
            vec![0.01, -0.02, 0.03, 0.00, 0.01, -0.01],
            vec![0.02, -0.04, 0.06, 0.00, 0.02, -0.02],
            vec![-0.01, 0.02, -0.03, 0.01, 0.00, 0.01],
            vec![0.005, 0.001, -0.002, 0.004, -0.003, 0.002],
        ]
    }

    #[test]
    fn test_every_metric_is_symmetric() {
        let inputs = inputs(sample_returns());
        let config = SimilarityConfig {
            mi_bins: 3,
            ..SimilarityConfig::default()
        };
        for metric in SimilarityMetric::ALL {
            let build = compute_matrix(metric, &inputs, &config, &CancellationFlag::new()).unwrap();
            for i in 0..4 {
                for j in 0..4 {
                    assert_eq!(build.matrix.entry(i, j), build.matrix.entry(j, i));
                }
            }
        }
    }

    #[test]
    fn test_length_mismatch_becomes_missing_pair() {
        let mut returns = sample_returns();
        returns[3].truncate(4);
        let inputs = inputs(returns);
        let build = compute_matrix(
            SimilarityMetric::Correlation,
            &inputs,
            &SimilarityConfig::default(),
            &CancellationFlag::new(),
        )
        .unwrap();
        assert_eq!(build.missing.len(), 3);
        assert!(build.missing.iter().all(|m| m.asset_b == "A3"));
        assert!(build.matrix.similarity(0, 3).is_none());
        assert!(build.matrix.similarity(0, 1).is_some());
    }

    #[test]
    fn test_cancelled_flag_aborts() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = compute_matrix(
            SimilarityMetric::Dtw,
            &inputs(sample_returns()),
            &SimilarityConfig::default(),
            &cancel,
        );
        assert!(matches!(result, Err(ClusteringError::Cancelled)));
    }

    fn matrix_from(values: &[f64], n: usize) -> SimilarityMatrix {
        let entries = values
            .iter()
            .map(|&s| PairValue::Value { raw: s, similarity: s })
            .collect();
        SimilarityMatrix::new(
            SimilarityMetric::Correlation,
            (0..n).map(|i| format!("A{}", i)).collect(),
            entries,
        )
        .unwrap()
    }

    #[test]
    fn test_threshold_is_strict() {
        // (0,1)=0.8 (0,2)=0.7 (1,2)=0.9
        let matrix = matrix_from(&[0.8, 0.7, 0.9], 3);
        let build = build_graph(&matrix, EdgeSelection::Threshold { value: 0.7 });
        let edges: Vec<(usize, usize)> = build.graph.edges().iter().map(|e| (e.source, e.target)).collect();
        assert_eq!(edges, vec![(1, 2), (0, 1)]);
    }

    #[test]
    fn test_top_k_ties_prefer_lower_id_and_union() {
        // (0,1)=0.5 (0,2)=0.5 (0,3)=0.1 (1,2)=0.2 (1,3)=0.3 (2,3)=0.4
        let matrix = matrix_from(&[0.5, 0.5, 0.1, 0.2, 0.3, 0.4], 4);
        let build = build_graph(&matrix, EdgeSelection::TopK { k: 1 });
        let edges: Vec<(usize, usize)> = build.graph.edges().iter().map(|e| (e.source, e.target)).collect();
        // 0 -> 1 (tie with 2), 1 -> 0, 2 -> 0, 3 -> 2
        assert_eq!(edges, vec![(0, 1), (0, 2), (2, 3)]);
    }

    #[test]
    fn test_non_positive_edges_are_dropped() {
        let matrix = matrix_from(&[-0.5, 0.0, 0.9], 3);
        let build = build_graph(&matrix, EdgeSelection::Threshold { value: -1.0 });
        assert_eq!(build.graph.edge_count(), 1);
        assert_eq!(build.dropped_non_positive, 2);
    }
}
