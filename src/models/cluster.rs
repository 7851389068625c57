use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Linkage rule for agglomerative clustering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Single,
    Complete,
    #[default]
    Average,
    /// Minimum variance merge; only defined for Euclidean feature input.
    Ward,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommunityAlgorithm {
    ConnectedComponents,
    #[default]
    Louvain,
}

/// What graph clustering does with nodes that kept no edge after thresholding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolatedNodes {
    /// Label isolated nodes as noise; they do not count towards `total_assets`.
    #[default]
    Exclude,
    /// Give every isolated node its own singleton cluster.
    Singleton,
}

fn default_kmeans_iterations() -> usize {
    300
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_graph_iterations() -> usize {
    100
}

/// Algorithm family and parameters for one clustering method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    #[serde(rename = "kmeans")]
    KMeans {
        k: usize,
        #[serde(default = "default_kmeans_iterations")]
        max_iterations: usize,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    Dbscan {
        eps: f64,
        min_samples: usize,
    },
    Hierarchical {
        n_clusters: usize,
        #[serde(default)]
        linkage: Linkage,
    },
    Graph {
        #[serde(default)]
        algorithm: CommunityAlgorithm,
        #[serde(default)]
        isolated_nodes: IsolatedNodes,
        #[serde(default = "default_graph_iterations")]
        max_iterations: usize,
    },
}

impl AlgorithmConfig {
    pub fn family(&self) -> &'static str {
        match self {
            AlgorithmConfig::KMeans { .. } => "kmeans",
            AlgorithmConfig::Dbscan { .. } => "dbscan",
            AlgorithmConfig::Hierarchical { .. } => "hierarchical",
            AlgorithmConfig::Graph { .. } => "graph",
        }
    }

    pub fn is_seeded(&self) -> bool {
        matches!(self, AlgorithmConfig::KMeans { .. })
    }
}

/// Cluster label of one asset. Clusters are numbered from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterLabel {
    Cluster(usize),
    Noise,
}

impl ClusterLabel {
    pub fn is_noise(&self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }

    pub fn cluster_id(&self) -> Option<usize> {
        match self {
            ClusterLabel::Cluster(id) => Some(*id),
            ClusterLabel::Noise => None,
        }
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Cluster(id) => write!(f, "{}", id),
            ClusterLabel::Noise => f.write_str("noise"),
        }
    }
}

/// Whether an algorithm finished within its iteration and time budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Convergence {
    Converged { iterations: usize },
    Partial { iterations: usize, reason: String },
}

impl Convergence {
    pub fn is_partial(&self) -> bool {
        matches!(self, Convergence::Partial { .. })
    }
}

/// Partition of a universe produced by one clustering run.
///
/// Labels are renumbered so that cluster ids appear in order of first
/// occurrence over the (lexically sorted) asset ids; the same partition always
/// yields the same labels.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterAssignment {
    asset_ids: Vec<String>,
    labels: Vec<ClusterLabel>,
    convergence: Convergence,
    seed: Option<u64>,
}

impl ClusterAssignment {
    pub fn new(
        asset_ids: Vec<String>,
        raw_labels: Vec<Option<usize>>,
        convergence: Convergence,
        seed: Option<u64>,
    ) -> Self {
        debug_assert_eq!(asset_ids.len(), raw_labels.len());
        let mut remap: BTreeMap<usize, usize> = BTreeMap::new();
        let labels = raw_labels
            .into_iter()
            .map(|raw| match raw {
                Some(id) => {
                    let next = remap.len();
                    ClusterLabel::Cluster(*remap.entry(id).or_insert(next))
                }
                None => ClusterLabel::Noise,
            })
            .collect();
        Self {
            asset_ids,
            labels,
            convergence,
            seed,
        }
    }

    pub fn asset_ids(&self) -> &[String] {
        &self.asset_ids
    }

    pub fn labels(&self) -> &[ClusterLabel] {
        &self.labels
    }

    pub fn label_of(&self, id: &str) -> Option<ClusterLabel> {
        self.asset_ids
            .iter()
            .position(|a| a == id)
            .map(|idx| self.labels[idx])
    }

    pub fn convergence(&self) -> &Convergence {
        &self.convergence
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_clusters(&self) -> usize {
        self.labels
            .iter()
            .filter_map(ClusterLabel::cluster_id)
            .max()
            .map_or(0, |m| m + 1)
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_noise()).count()
    }

    /// Member indices per cluster id, noise excluded.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.num_clusters()];
        for (idx, label) in self.labels.iter().enumerate() {
            if let ClusterLabel::Cluster(id) = label {
                members[*id].push(idx);
            }
        }
        members
    }
}

/// Intra-cluster similarity for one cluster.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClusterQuality {
    pub cluster_id: usize,
    pub size: usize,
    /// `None` when no member pair had a computable similarity.
    pub intra_similarity: Option<f64>,
    pub members: Vec<String>,
}

/// Summary statistics of one clustering method.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub num_clusters: usize,
    pub avg_cluster_size: f64,
    pub max_cluster_size: usize,
    pub min_cluster_size: usize,
    /// Assets placed in a cluster; noise is counted separately.
    pub total_assets: usize,
    pub noise_count: usize,
    pub avg_intra_similarity: Option<f64>,
    pub similarity_std: Option<f64>,
    /// Cluster sizes in descending order.
    pub cluster_sizes: Vec<usize>,
    pub clusters: Vec<ClusterQuality>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{}", i)).collect()
    }

    #[test]
    fn test_labels_renumbered_by_first_appearance() {
        let assignment = ClusterAssignment::new(
            ids(5),
            vec![Some(7), None, Some(2), Some(7), Some(2)],
            Convergence::Converged { iterations: 3 },
            None,
        );
        assert_eq!(
            assignment.labels(),
            &[
                ClusterLabel::Cluster(0),
                ClusterLabel::Noise,
                ClusterLabel::Cluster(1),
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(1),
            ]
        );
        assert_eq!(assignment.num_clusters(), 2);
        assert_eq!(assignment.noise_count(), 1);
        assert_eq!(assignment.members(), vec![vec![0, 3], vec![2, 4]]);
        assert_eq!(assignment.label_of("A1"), Some(ClusterLabel::Noise));
    }

    #[test]
    fn test_algorithm_config_from_json() {
        let json = r#"{"type": "kmeans", "k": 5}"#;
        let config: AlgorithmConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config,
            AlgorithmConfig::KMeans {
                k: 5,
                max_iterations: 300,
                tolerance: 1e-6,
            }
        );

        let json = r#"{"type": "graph", "algorithm": "connected_components"}"#;
        let config: AlgorithmConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.family(), "graph");
    }

    #[test]
    fn test_noise_label_serializes_as_string() {
        let json = serde_json::to_string(&ClusterLabel::Noise).unwrap();
        assert_eq!(json, "\"noise\"");
        let json = serde_json::to_string(&ClusterLabel::Cluster(2)).unwrap();
        assert_eq!(json, "{\"cluster\":2}");
    }
}
