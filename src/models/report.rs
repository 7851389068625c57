use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::cluster::ClusterStats;
use crate::models::similarity::SimilarityMetric;

/// Explained-variance share of one principal component (1-based index).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComponentImportance {
    pub component: usize,
    pub explained_variance_share: f64,
}

/// PCA outcome: components ordered by descending share.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PcaResult {
    pub components: Vec<ComponentImportance>,
    pub retained_components: usize,
    pub retained_variance_share: f64,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PcaSection {
    Completed(PcaResult),
    Failed { error: String },
    /// No configured method needed reduced features.
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodStatus {
    Completed,
    /// Iteration or time budget hit; stats describe the best assignment found.
    Partial { reason: String },
    Failed { error: String },
}

/// Report block for one configured method.
#[derive(Debug, Clone, Serialize)]
pub struct MethodReport {
    pub name: String,
    pub algorithm: String,
    /// Similarity input, `None` for methods on reduced features.
    pub metric: Option<SimilarityMetric>,
    /// Basis the intra-cluster similarity was measured on.
    pub evaluated_on: Option<String>,
    #[serde(flatten)]
    pub status: MethodStatus,
    pub seed: Option<u64>,
    pub iterations: Option<usize>,
    pub elapsed_ms: u128,
    pub stats: Option<ClusterStats>,
}

impl MethodReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, MethodStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExcludedAsset {
    pub asset: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct MissingPair {
    pub metric: SimilarityMetric,
    pub asset_a: String,
    pub asset_b: String,
    pub reason: String,
}

/// Errors absorbed during the run, listed so gaps in the report are explicit.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Diagnostics {
    pub excluded_assets: Vec<ExcludedAsset>,
    pub missing_pairs: Vec<MissingPair>,
    pub notes: Vec<String>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.excluded_assets.is_empty() && self.missing_pairs.is_empty() && self.notes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    /// Assets submitted to the run.
    pub input_assets: usize,
    /// Assets with a complete feature vector.
    pub universe_size: usize,
    pub feature_names: Vec<String>,
    pub worker_count: usize,
    pub methods_completed: usize,
    pub methods_failed: usize,
}

/// Comparable summary of every configured method, in configured order.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub run: RunMetadata,
    pub methods: Vec<MethodReport>,
    pub pca: PcaSection,
    pub diagnostics: Diagnostics,
}

impl SummaryReport {
    pub fn method(&self, name: &str) -> Option<&MethodReport> {
        self.methods.iter().find(|m| m.name == name)
    }
}
