/// Intra-cluster quality of a finished assignment.

use ndarray::Array2;
use std::collections::HashMap;
use tracing::warn;

use crate::models::cluster::{ClusterAssignment, ClusterQuality, ClusterStats};
use crate::models::similarity::SimilarityMatrix;
use crate::services::similarity_metrics;

/// Similarity used to judge an assignment.
#[derive(Debug, Clone, Copy)]
pub enum QualityInput<'a> {
    Matrix(&'a SimilarityMatrix),
    /// `1 / (1 + euclidean distance)` between rows of the reduced features.
    FeatureDistance {
        asset_ids: &'a [String],
        values: &'a Array2<f64>,
    },
}

impl QualityInput<'_> {
    pub fn describe(&self) -> String {
        match self {
            QualityInput::Matrix(matrix) => matrix.metric().to_string(),
            QualityInput::FeatureDistance { .. } => "feature_distance".to_string(),
        }
    }

    fn asset_ids(&self) -> &[String] {
        match self {
            QualityInput::Matrix(matrix) => matrix.asset_ids(),
            QualityInput::FeatureDistance { asset_ids, .. } => asset_ids,
        }
    }

    fn similarity(&self, i: usize, j: usize) -> Option<f64> {
        match self {
            QualityInput::Matrix(matrix) => matrix.similarity(i, j),
            QualityInput::FeatureDistance { values, .. } => {
                let a = values.row(i).to_vec();
                let b = values.row(j).to_vec();
                Some(similarity_metrics::distance_to_similarity(similarity_metrics::euclidean(&a, &b)))
            }
        }
    }
}

/// Cluster statistics plus diagnostics notes raised while computing them.
#[derive(Debug, Clone)]
pub struct QualityEvaluation {
    pub stats: ClusterStats,
    pub notes: Vec<String>,
}

/// Evaluate an assignment against a similarity basis.
///
/// # Arguments
/// * `method` - Method name, used in notes
/// * `assignment` - Labels to evaluate
/// * `basis` - Similarity matrix or feature-distance similarity
///
/// # Returns
/// Size statistics and intra-cluster similarity. Singleton clusters score
/// exactly 1.0; missing pairs are skipped; a cluster with no valid pair is
/// left out of the aggregates and noted.
pub fn evaluate(method: &str, assignment: &ClusterAssignment, basis: QualityInput<'_>) -> QualityEvaluation {
    let basis_index: HashMap<&str, usize> = basis
        .asset_ids()
        .iter()
        .enumerate()
        .map(|(idx, id)| (id.as_str(), idx))
        .collect();

    let mut notes = Vec::new();
    let members = assignment.members();
    let clusters: Vec<ClusterQuality> = members
        .iter()
        .enumerate()
        .map(|(cluster_id, indices)| {
            let intra_similarity = if indices.len() == 1 {
                Some(1.0)
            } else {
                let positions: Vec<Option<usize>> = indices
                    .iter()
                    .map(|&idx| basis_index.get(assignment.asset_ids()[idx].as_str()).copied())
                    .collect();
                let mut sum = 0.0;
                let mut count = 0usize;
                for a in 0..positions.len() {
                    for b in (a + 1)..positions.len() {
                        if let (Some(i), Some(j)) = (positions[a], positions[b]) {
                            if let Some(s) = basis.similarity(i, j) {
                                sum += s;
                                count += 1;
                            }
                        }
                    }
                }
                if count == 0 {
                    warn!("⚠️ {}: cluster {} has no valid similarity pair", method, cluster_id);
                    notes.push(format!(
                        "{}: cluster {} ({} members) has no valid {} pair and is left out of the averages",
                        method,
                        cluster_id,
                        indices.len(),
                        basis.describe()
                    ));
                    None
                } else {
                    Some(sum / count as f64)
                }
            };

            ClusterQuality {
                cluster_id,
                size: indices.len(),
                intra_similarity,
                members: indices.iter().map(|&idx| assignment.asset_ids()[idx].clone()).collect(),
            }
        })
        .collect();

    let mut cluster_sizes: Vec<usize> = clusters.iter().map(|c| c.size).collect();
    cluster_sizes.sort_unstable_by(|a, b| b.cmp(a));
    let total_assets: usize = cluster_sizes.iter().sum();
    let num_clusters = clusters.len();

    let scores: Vec<f64> = clusters.iter().filter_map(|c| c.intra_similarity).collect();
    let (avg_intra_similarity, similarity_std) = if scores.is_empty() {
        (None, None)
    } else {
        // Deviations from the first score, so identical scores give exactly
        // their value and a zero spread.
        let n = scores.len() as f64;
        let shift = scores[0];
        let mean_offset = scores.iter().map(|s| s - shift).sum::<f64>() / n;
        let variance = scores
            .iter()
            .map(|s| (s - shift - mean_offset).powi(2))
            .sum::<f64>()
            / n;
        (Some(shift + mean_offset), Some(variance.sqrt()))
    };

    QualityEvaluation {
        stats: ClusterStats {
            num_clusters,
            avg_cluster_size: if num_clusters == 0 {
                0.0
            } else {
                total_assets as f64 / num_clusters as f64
            },
            max_cluster_size: cluster_sizes.first().copied().unwrap_or(0),
            min_cluster_size: cluster_sizes.last().copied().unwrap_or(0),
            total_assets,
            noise_count: assignment.noise_count(),
            avg_intra_similarity,
            similarity_std,
            cluster_sizes,
            clusters,
        },
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cluster::Convergence;
    use crate::models::similarity::{PairValue, SimilarityMetric};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{}", i)).collect()
    }

    fn assignment(labels: Vec<Option<usize>>) -> ClusterAssignment {
        ClusterAssignment::new(ids(labels.len()), labels, Convergence::Converged { iterations: 1 }, None)
    }

    fn matrix(values: Vec<Option<f64>>, n: usize) -> SimilarityMatrix {
        let entries = values
            .into_iter()
            .map(|v| match v {
                Some(s) => PairValue::Value { raw: s, similarity: s },
                None => PairValue::Missing {
                    reason: "undefined".to_string(),
                },
            })
            .collect();
        SimilarityMatrix::new(SimilarityMetric::Correlation, ids(n), entries).unwrap()
    }

    #[test]
    fn test_stats_and_invariants() {
        // (0,1)=0.8 (0,2)=0.1 (0,3)=0.2 (1,2)=0.1 (1,3)=0.3 (2,3)=0.6
        let m = matrix(
            vec![Some(0.8), Some(0.1), Some(0.2), Some(0.1), Some(0.3), Some(0.6)],
            4,
        );
        let a = assignment(vec![Some(0), Some(0), Some(1), Some(1)]);
        let eval = evaluate("test", &a, QualityInput::Matrix(&m));
        let stats = eval.stats;

        assert_eq!(stats.num_clusters, 2);
        assert_eq!(stats.total_assets, 4);
        assert_eq!(stats.cluster_sizes, vec![2, 2]);
        assert!((stats.avg_intra_similarity.unwrap() - 0.7).abs() < 1e-12);
        assert!((stats.similarity_std.unwrap() - 0.1).abs() < 1e-12);
        assert!((stats.avg_cluster_size * stats.num_clusters as f64 - stats.total_assets as f64).abs() < 1e-12);
        assert!(eval.notes.is_empty());
    }

    #[test]
    fn test_singletons_score_one_and_noise_is_counted() {
        let m = matrix(vec![Some(0.2), Some(0.3), Some(0.4)], 3);
        let a = assignment(vec![Some(0), Some(1), None]);
        let stats = evaluate("test", &a, QualityInput::Matrix(&m)).stats;

        assert_eq!(stats.avg_intra_similarity, Some(1.0));
        assert_eq!(stats.similarity_std, Some(0.0));
        assert_eq!(stats.total_assets + stats.noise_count, 3);
    }

    #[test]
    fn test_equal_cluster_scores_have_zero_spread() {
        // Pairs (0,1), (2,3) and (4,5) score 0.1, everything else 0.0.
        let mut values = vec![Some(0.0); 15];
        for idx in [0, 9, 14] {
            values[idx] = Some(0.1);
        }
        let m = matrix(values, 6);
        let a = assignment(vec![Some(0), Some(0), Some(1), Some(1), Some(2), Some(2)]);
        let stats = evaluate("test", &a, QualityInput::Matrix(&m)).stats;

        assert_eq!(stats.num_clusters, 3);
        assert_eq!(stats.avg_intra_similarity, Some(0.1));
        assert_eq!(stats.similarity_std, Some(0.0));
    }

    #[test]
    fn test_cluster_without_valid_pair_is_excluded_and_noted() {
        // (0,1) missing, (0,2)=0.5, (1,2)=0.5
        let m = matrix(vec![None, Some(0.5), Some(0.5)], 3);
        let a = assignment(vec![Some(0), Some(0), Some(1)]);
        let eval = evaluate("graph_corr", &a, QualityInput::Matrix(&m));

        assert_eq!(eval.stats.clusters[0].intra_similarity, None);
        assert_eq!(eval.stats.avg_intra_similarity, Some(1.0));
        assert_eq!(eval.notes.len(), 1);
        assert!(eval.notes[0].contains("graph_corr"));
    }

    #[test]
    fn test_all_noise_has_null_aggregates() {
        let m = matrix(vec![Some(0.5)], 2);
        let a = assignment(vec![None, None]);
        let stats = evaluate("dbscan", &a, QualityInput::Matrix(&m)).stats;

        assert_eq!(stats.num_clusters, 0);
        assert_eq!(stats.avg_intra_similarity, None);
        assert_eq!(stats.similarity_std, None);
        assert_eq!(stats.avg_cluster_size, 0.0);
        assert_eq!(stats.noise_count, 2);
    }

    #[test]
    fn test_feature_distance_basis() {
        let values = Array2::from_shape_vec((2, 2), vec![0.0, 0.0, 3.0, 4.0]).unwrap();
        let asset_ids = ids(2);
        let a = assignment(vec![Some(0), Some(0)]);
        let basis = QualityInput::FeatureDistance {
            asset_ids: &asset_ids,
            values: &values,
        };
        let stats = evaluate("kmeans", &a, basis).stats;
        assert!((stats.avg_intra_similarity.unwrap() - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(basis.describe(), "feature_distance");
    }
}
