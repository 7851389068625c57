use dashmap::DashMap;
use std::sync::Arc;

use crate::models::similarity::{SimilarityGraph, SimilarityMatrix, SimilarityMetric};

/// Matrix and graph computed once for a metric and shared read-only.
#[derive(Debug)]
pub struct MetricArtifacts {
    pub matrix: SimilarityMatrix,
    pub graph: SimilarityGraph,
}

/// Either the shared artifacts or the error that prevented computing them.
pub type StoreEntry = Result<Arc<MetricArtifacts>, String>;

/// Thread-safe per-run store of similarity artifacts keyed by metric.
/// A recorded failure fails every method that needs that metric.
#[derive(Clone, Default)]
pub struct SimilarityStore {
    entries: Arc<DashMap<SimilarityMetric, StoreEntry>>,
}

impl SimilarityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metric: SimilarityMetric, artifacts: MetricArtifacts) -> Arc<MetricArtifacts> {
        let shared = Arc::new(artifacts);
        self.entries.insert(metric, Ok(shared.clone()));
        shared
    }

    pub fn record_failure(&self, metric: SimilarityMetric, error: impl Into<String>) {
        self.entries.insert(metric, Err(error.into()));
    }

    /// `None` when the metric was never requested for this run.
    pub fn get(&self, metric: SimilarityMetric) -> Option<StoreEntry> {
        self.entries.get(&metric).map(|entry| entry.value().clone())
    }

    /// Metrics whose computation failed, with their errors, sorted by metric.
    pub fn failures(&self) -> Vec<(SimilarityMetric, String)> {
        let mut failures: Vec<(SimilarityMetric, String)> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().as_ref().err().map(|e| (*entry.key(), e.clone())))
            .collect();
        failures.sort();
        failures
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::similarity::PairValue;

    fn artifacts(metric: SimilarityMetric) -> MetricArtifacts {
        let ids = vec!["AAPL".to_string(), "MSFT".to_string()];
        let matrix = SimilarityMatrix::new(
            metric,
            ids.clone(),
            vec![PairValue::Value {
                raw: 0.5,
                similarity: 0.5,
            }],
        )
        .unwrap();
        MetricArtifacts {
            graph: SimilarityGraph::from_edges(metric, ids, Vec::new()),
            matrix,
        }
    }

    #[test]
    fn test_insert_and_share() {
        let store = SimilarityStore::new();
        let shared = store.insert(SimilarityMetric::Correlation, artifacts(SimilarityMetric::Correlation));

        let fetched = store.get(SimilarityMetric::Correlation).unwrap().unwrap();
        assert!(Arc::ptr_eq(&shared, &fetched));
        assert!(store.get(SimilarityMetric::Dtw).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failure_is_recorded_per_metric() {
        let store = SimilarityStore::new();
        store.insert(SimilarityMetric::Cosine, artifacts(SimilarityMetric::Cosine));
        store.record_failure(SimilarityMetric::MutualInformation, "worker panicked");

        assert_eq!(
            store.get(SimilarityMetric::MutualInformation).unwrap().unwrap_err(),
            "worker panicked"
        );
        assert_eq!(
            store.failures(),
            vec![(SimilarityMetric::MutualInformation, "worker panicked".to_string())]
        );
    }
}
