use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusteringError {
    #[error("Insufficient data for {asset}: need at least {required} observations, got {actual}")]
    InsufficientData {
        asset: String,
        required: usize,
        actual: usize,
    },
    #[error("Invalid series for {asset}: {reason}")]
    InvalidSeries { asset: String, reason: String },
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),
    #[error("Series length mismatch between {asset_a} ({len_a}) and {asset_b} ({len_b})")]
    SeriesLengthMismatch {
        asset_a: String,
        asset_b: String,
        len_a: usize,
        len_b: usize,
    },
    #[error("Undefined similarity between {asset_a} and {asset_b}: {reason}")]
    UndefinedSimilarity {
        asset_a: String,
        asset_b: String,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Analysis run cancelled")]
    Cancelled,
    #[error("Worker error: {0}")]
    Worker(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClusteringError {
    /// Per-asset and per-pair errors are absorbed into diagnostics instead of
    /// failing the surrounding step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClusteringError::InsufficientData { .. }
                | ClusteringError::InvalidSeries { .. }
                | ClusteringError::SeriesLengthMismatch { .. }
                | ClusteringError::UndefinedSimilarity { .. }
        )
    }
}

impl From<String> for ClusteringError {
    fn from(value: String) -> Self {
        ClusteringError::InvalidConfig(value)
    }
}

impl From<tokio::task::JoinError> for ClusteringError {
    fn from(value: tokio::task::JoinError) -> Self {
        ClusteringError::Worker(value.to_string())
    }
}
