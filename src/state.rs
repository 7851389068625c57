use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::config::AnalysisConfig;
use crate::models::report::{Diagnostics, ExcludedAsset, MissingPair};
use crate::services::worker_pool::WorkerPool;

/// Cooperative cancellation shared by every task of a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Thread-safe collector for absorbed per-asset, per-pair and per-method issues.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSink {
    inner: Arc<Mutex<Diagnostics>>,
}

impl DiagnosticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude_asset(&self, excluded: ExcludedAsset) {
        self.inner.lock().excluded_assets.push(excluded);
    }

    pub fn missing_pairs(&self, pairs: Vec<MissingPair>) {
        self.inner.lock().missing_pairs.extend(pairs);
    }

    pub fn note(&self, note: impl Into<String>) {
        self.inner.lock().notes.push(note.into());
    }

    /// Copy of everything collected so far, sorted so the report does not
    /// depend on task completion order.
    pub fn snapshot(&self) -> Diagnostics {
        let mut diagnostics = self.inner.lock().clone();
        diagnostics.excluded_assets.sort();
        diagnostics.missing_pairs.sort();
        diagnostics.notes.sort();
        diagnostics.notes.dedup();
        diagnostics
    }
}

/// Shared resources of one analysis run.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<AnalysisConfig>,
    pub cancel: CancellationFlag,
    pub diagnostics: DiagnosticsSink,
    pub pool: Arc<WorkerPool>,
}

impl JobContext {
    pub fn new(config: AnalysisConfig, pool: WorkerPool) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationFlag::new(),
            diagnostics: DiagnosticsSink::new(),
            pool: Arc::new(pool),
        }
    }
}

/// Processed / failed counts of one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobResult {
    pub items_processed: usize,
    pub items_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::similarity::SimilarityMetric;

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_diagnostics_snapshot_is_sorted() {
        let sink = DiagnosticsSink::new();
        let pair = |a: &str, b: &str| MissingPair {
            metric: SimilarityMetric::Dtw,
            asset_a: a.to_string(),
            asset_b: b.to_string(),
            reason: "length mismatch".to_string(),
        };
        sink.missing_pairs(vec![pair("MSFT", "TSLA"), pair("AAPL", "MSFT")]);
        sink.note("b");
        sink.note("a");
        sink.note("a");

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.missing_pairs[0].asset_a, "AAPL");
        assert_eq!(snapshot.notes, vec!["a".to_string(), "b".to_string()]);
    }
}
