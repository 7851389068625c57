use serde::{Deserialize, Serialize};
use std::fmt;

/// Pairwise similarity definitions supported by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Pearson correlation of aligned return series.
    Correlation,
    /// Empirical mutual information (nats) of equal-frequency binned returns.
    MutualInformation,
    /// Cosine similarity of standardized feature vectors.
    Cosine,
    /// Dynamic time warping distance under a Sakoe-Chiba band, mapped to `1 / (1 + d)`.
    Dtw,
}

impl SimilarityMetric {
    pub const ALL: [SimilarityMetric; 4] = [
        SimilarityMetric::Correlation,
        SimilarityMetric::MutualInformation,
        SimilarityMetric::Cosine,
        SimilarityMetric::Dtw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Correlation => "correlation",
            SimilarityMetric::MutualInformation => "mutual_information",
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Dtw => "dtw",
        }
    }

    /// Largest attainable normalized similarity, if the metric is bounded.
    pub fn similarity_upper_bound(&self) -> Option<f64> {
        match self {
            SimilarityMetric::MutualInformation => None,
            _ => Some(1.0),
        }
    }

    /// Cosine compares feature vectors; the other metrics compare return series.
    pub fn uses_feature_vectors(&self) -> bool {
        matches!(self, SimilarityMetric::Cosine)
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a similarity matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairValue {
    /// `raw` is the metric's own value (a distance for DTW); `similarity` is
    /// oriented so that larger always means more similar.
    Value { raw: f64, similarity: f64 },
    /// The pair could not be computed. Distinct from a low similarity.
    Missing { reason: String },
}

impl PairValue {
    pub fn similarity(&self) -> Option<f64> {
        match self {
            PairValue::Value { similarity, .. } => Some(*similarity),
            PairValue::Missing { .. } => None,
        }
    }

    pub fn raw(&self) -> Option<f64> {
        match self {
            PairValue::Value { raw, .. } => Some(*raw),
            PairValue::Missing { .. } => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, PairValue::Missing { .. })
    }
}

/// Symmetric matrix over unordered pairs of distinct assets, stored as a packed
/// upper triangle so `(a, b)` and `(b, a)` resolve to the same entry.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    metric: SimilarityMetric,
    asset_ids: Vec<String>,
    entries: Vec<PairValue>,
}

impl SimilarityMatrix {
    /// `entries` must be in `(0,1), (0,2), .., (1,2), ..` order.
    pub fn new(
        metric: SimilarityMetric,
        asset_ids: Vec<String>,
        entries: Vec<PairValue>,
    ) -> Result<Self, String> {
        let n = asset_ids.len();
        let expected = n * n.saturating_sub(1) / 2;
        if entries.len() != expected {
            return Err(format!(
                "similarity matrix for {} assets needs {} entries, got {}",
                n,
                expected,
                entries.len()
            ));
        }
        Ok(Self {
            metric,
            asset_ids,
            entries,
        })
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn asset_ids(&self) -> &[String] {
        &self.asset_ids
    }

    pub fn len(&self) -> usize {
        self.asset_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asset_ids.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.asset_ids.iter().position(|a| a == id)
    }

    fn packed_index(&self, i: usize, j: usize) -> usize {
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let n = self.asset_ids.len();
        lo * n - lo * (lo + 1) / 2 + (hi - lo - 1)
    }

    /// Entry for a pair of distinct indices; `None` on the diagonal.
    pub fn entry(&self, i: usize, j: usize) -> Option<&PairValue> {
        if i == j || i >= self.len() || j >= self.len() {
            return None;
        }
        Some(&self.entries[self.packed_index(i, j)])
    }

    pub fn similarity(&self, i: usize, j: usize) -> Option<f64> {
        self.entry(i, j).and_then(PairValue::similarity)
    }

    pub fn similarity_by_id(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        self.similarity(i, j)
    }

    /// All pairs in packed order, `i < j`.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize, &PairValue)> + '_ {
        let n = self.len();
        (0..n)
            .flat_map(move |i| ((i + 1)..n).map(move |j| (i, j)))
            .zip(self.entries.iter())
            .map(|((i, j), v)| (i, j, v))
    }

    pub fn missing_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_missing()).count()
    }

    pub fn max_similarity(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter_map(PairValue::similarity)
            .fold(None, |acc, s| Some(acc.map_or(s, |m: f64| m.max(s))))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Thresholded view of a similarity matrix. Nodes are every asset of the
/// matrix, including ones left without edges.
#[derive(Debug, Clone)]
pub struct SimilarityGraph {
    metric: SimilarityMetric,
    node_ids: Vec<String>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl SimilarityGraph {
    pub fn from_edges(metric: SimilarityMetric, node_ids: Vec<String>, edges: Vec<Edge>) -> Self {
        let mut adjacency = vec![Vec::new(); node_ids.len()];
        for edge in &edges {
            adjacency[edge.source].push((edge.target, edge.weight));
            adjacency[edge.target].push((edge.source, edge.weight));
        }
        for neighbours in adjacency.iter_mut() {
            neighbours.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Self {
            metric,
            node_ids,
            edges,
            adjacency,
        }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn neighbours(&self, node: usize) -> &[(usize, f64)] {
        &self.adjacency[node]
    }

    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }

    pub fn is_isolated(&self, node: usize) -> bool {
        self.adjacency[node].is_empty()
    }

    pub fn isolated_count(&self) -> usize {
        self.adjacency.iter().filter(|n| n.is_empty()).count()
    }
}
