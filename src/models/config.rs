use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::ClusteringError;
use crate::models::asset::SeriesKind;
use crate::models::cluster::{AlgorithmConfig, CommunityAlgorithm, IsolatedNodes, Linkage};
use crate::models::similarity::SimilarityMetric;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MovingAverageKind {
    Simple,
    Exponential,
    Weighted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RsiMethod {
    /// Wilder smoothing (exponential, alpha = 1 / window).
    Wilder,
    /// Simple rolling mean of gains and losses.
    Cutler,
}

/// One column of the feature matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureStatistic {
    MeanReturn,
    Volatility,
    Skewness,
    Kurtosis,
    Autocorrelation { lag: usize },
    MaxDrawdown,
    Momentum { window: usize },
    MovingAverageRatio { window: usize, kind: MovingAverageKind },
    Rsi { window: usize, method: RsiMethod },
    MacdHistogram { fast: usize, slow: usize, signal: usize },
    BollingerBandwidth { window: usize, num_std: f64 },
    BollingerPercentB { window: usize, num_std: f64 },
}

impl FeatureStatistic {
    pub fn name(&self) -> String {
        match self {
            FeatureStatistic::MeanReturn => "mean_return".to_string(),
            FeatureStatistic::Volatility => "volatility".to_string(),
            FeatureStatistic::Skewness => "skewness".to_string(),
            FeatureStatistic::Kurtosis => "kurtosis".to_string(),
            FeatureStatistic::Autocorrelation { lag } => format!("autocorr_lag_{}", lag),
            FeatureStatistic::MaxDrawdown => "max_drawdown".to_string(),
            FeatureStatistic::Momentum { window } => format!("momentum_{}", window),
            FeatureStatistic::MovingAverageRatio { window, kind } => {
                let prefix = match kind {
                    MovingAverageKind::Simple => "sma",
                    MovingAverageKind::Exponential => "ema",
                    MovingAverageKind::Weighted => "wma",
                };
                format!("{}_ratio_{}", prefix, window)
            }
            FeatureStatistic::Rsi { window, .. } => format!("rsi_{}", window),
            FeatureStatistic::MacdHistogram { fast, slow, signal } => {
                format!("macd_hist_{}_{}_{}", fast, slow, signal)
            }
            FeatureStatistic::BollingerBandwidth { window, .. } => format!("bb_bandwidth_{}", window),
            FeatureStatistic::BollingerPercentB { window, .. } => format!("bb_percent_b_{}", window),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    pub statistics: Vec<FeatureStatistic>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            statistics: vec![
                FeatureStatistic::MeanReturn,
                FeatureStatistic::Volatility,
                FeatureStatistic::Skewness,
                FeatureStatistic::Kurtosis,
                FeatureStatistic::Autocorrelation { lag: 1 },
                FeatureStatistic::MaxDrawdown,
                FeatureStatistic::Momentum { window: 20 },
            ],
        }
    }
}

/// How many principal components to keep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ComponentSelection {
    /// Smallest count whose cumulative explained variance reaches `threshold`.
    VarianceThreshold { threshold: f64 },
    Fixed { count: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PcaConfig {
    pub components: ComponentSelection,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            components: ComponentSelection::VarianceThreshold { threshold: 0.9 },
        }
    }
}

/// Edge retention rule when turning a similarity matrix into a graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EdgeSelection {
    /// Keep pairs whose similarity is strictly greater than `value`.
    Threshold { value: f64 },
    /// Keep each node's `k` most similar neighbours.
    TopK { k: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimilarityConfig {
    pub correlation: EdgeSelection,
    pub mutual_information: EdgeSelection,
    pub cosine: EdgeSelection,
    pub dtw: EdgeSelection,
    /// Equal-frequency bins per series for mutual information.
    pub mi_bins: usize,
    /// Sakoe-Chiba band half-width, in observations.
    pub dtw_window: usize,
    /// Z-score each return series before warping.
    pub dtw_standardize: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            correlation: EdgeSelection::Threshold { value: 0.7 },
            mutual_information: EdgeSelection::Threshold { value: 0.5 },
            cosine: EdgeSelection::Threshold { value: 0.8 },
            dtw: EdgeSelection::TopK { k: 3 },
            mi_bins: 10,
            dtw_window: 10,
            dtw_standardize: false,
        }
    }
}

impl SimilarityConfig {
    pub fn edge_selection(&self, metric: SimilarityMetric) -> EdgeSelection {
        match metric {
            SimilarityMetric::Correlation => self.correlation,
            SimilarityMetric::MutualInformation => self.mutual_information,
            SimilarityMetric::Cosine => self.cosine,
            SimilarityMetric::Dtw => self.dtw,
        }
    }
}

/// Similarity used to judge a finished assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum QualityBasis {
    Metric { metric: SimilarityMetric },
    /// `1 / (1 + euclidean distance)` over the PCA-reduced features.
    FeatureDistance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Basis for methods that cluster reduced features and name no basis of their own.
    pub feature_methods_basis: QualityBasis,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            feature_methods_basis: QualityBasis::Metric {
                metric: SimilarityMetric::Correlation,
            },
        }
    }
}

/// One configured (algorithm, input) combination. Reported under `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodConfig {
    pub name: String,
    pub algorithm: AlgorithmConfig,
    /// Similarity input. Required for graph clustering, optional for
    /// hierarchical (absent = reduced features), rejected otherwise.
    #[serde(default)]
    pub metric: Option<SimilarityMetric>,
    #[serde(default)]
    pub evaluation: Option<QualityBasis>,
    /// Wall-clock budget; exceeding it yields a partial result.
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
}

impl MethodConfig {
    pub fn new(name: &str, algorithm: AlgorithmConfig, metric: Option<SimilarityMetric>) -> Self {
        Self {
            name: name.to_string(),
            algorithm,
            metric,
            evaluation: None,
            time_budget_ms: None,
        }
    }

    pub fn uses_reduced_features(&self) -> bool {
        self.metric.is_none()
    }

    pub fn quality_basis(&self, evaluation: &EvaluationConfig) -> QualityBasis {
        if let Some(basis) = self.evaluation {
            return basis;
        }
        match self.metric {
            Some(metric) => QualityBasis::Metric { metric },
            None => evaluation.feature_methods_basis,
        }
    }

    pub fn validate(&self) -> Result<(), ClusteringError> {
        let invalid = |msg: String| Err(ClusteringError::InvalidConfig(format!("method '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(ClusteringError::InvalidConfig("method name must not be empty".to_string()));
        }

        match &self.algorithm {
            AlgorithmConfig::KMeans { k, max_iterations, tolerance } => {
                if *k == 0 {
                    return invalid("k must be at least 1".to_string());
                }
                if *max_iterations == 0 {
                    return invalid("max_iterations must be at least 1".to_string());
                }
                if !(tolerance.is_finite() && *tolerance >= 0.0) {
                    return invalid(format!("tolerance {} must be a non-negative number", tolerance));
                }
                if self.metric.is_some() {
                    return invalid("k-means clusters reduced features and takes no metric".to_string());
                }
            }
            AlgorithmConfig::Dbscan { eps, min_samples } => {
                if !(eps.is_finite() && *eps > 0.0) {
                    return invalid(format!("eps {} must be positive", eps));
                }
                if *min_samples == 0 {
                    return invalid("min_samples must be at least 1".to_string());
                }
                if self.metric.is_some() {
                    return invalid("dbscan clusters reduced features and takes no metric".to_string());
                }
            }
            AlgorithmConfig::Hierarchical { n_clusters, linkage } => {
                if *n_clusters == 0 {
                    return invalid("n_clusters must be at least 1".to_string());
                }
                if *linkage == Linkage::Ward && self.metric.is_some() {
                    return invalid("ward linkage requires feature input".to_string());
                }
            }
            AlgorithmConfig::Graph { max_iterations, .. } => {
                if self.metric.is_none() {
                    return invalid("graph clustering requires a metric".to_string());
                }
                if *max_iterations == 0 {
                    return invalid("max_iterations must be at least 1".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Accepts either a byte count or a size string such as `"8GB"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MemoryLimit {
    Bytes(u64),
    Text(String),
}

impl MemoryLimit {
    pub fn to_bytes(&self) -> Result<u64, ClusteringError> {
        match self {
            MemoryLimit::Bytes(b) => Ok(*b),
            MemoryLimit::Text(text) => parse_memory_size(text),
        }
    }
}

fn parse_memory_size(text: &str) -> Result<u64, ClusteringError> {
    let cleaned = text.trim().to_uppercase().replace(' ', "");
    let split = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| ClusteringError::InvalidConfig(format!("invalid max_memory '{}'", text)))?;
    let multiplier: f64 = match unit {
        "" | "B" => 1.0,
        "K" | "KB" => 1024.0,
        "M" | "MB" => 1024.0 * 1024.0,
        "G" | "GB" => 1024.0 * 1024.0 * 1024.0,
        "T" | "TB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => {
            return Err(ClusteringError::InvalidConfig(format!(
                "unknown memory unit in max_memory '{}'",
                text
            )))
        }
    };
    Ok((value * multiplier) as u64)
}

/// Resource settings read from the external optimization config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ResourceLimits {
    pub max_memory: Option<MemoryLimit>,
    /// Worker count; zero or negative means every available core.
    pub n_jobs: Option<i64>,
}

/// The slice of the hyperparameter-optimization config this engine consumes.
/// Every other field of that document is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OptimizationConfig {
    #[serde(alias = "resources")]
    pub resource_limits: ResourceLimits,
}

/// Immutable settings for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub series_kind: SeriesKind,
    pub features: FeatureConfig,
    pub pca: PcaConfig,
    pub similarity: SimilarityConfig,
    pub evaluation: EvaluationConfig,
    /// Methods in report order.
    pub methods: Vec<MethodConfig>,
    /// Seed for every randomized algorithm in the run.
    pub seed: u64,
    pub resources: ResourceLimits,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let graph = |metric: SimilarityMetric| {
            (
                AlgorithmConfig::Graph {
                    algorithm: CommunityAlgorithm::Louvain,
                    isolated_nodes: IsolatedNodes::Exclude,
                    max_iterations: 100,
                },
                Some(metric),
            )
        };
        let methods = vec![
            (
                "kmeans",
                (
                    AlgorithmConfig::KMeans {
                        k: 5,
                        max_iterations: 300,
                        tolerance: 1e-6,
                    },
                    None,
                ),
            ),
            (
                "dbscan",
                (
                    AlgorithmConfig::Dbscan {
                        eps: 1.0,
                        min_samples: 5,
                    },
                    None,
                ),
            ),
            (
                "hierarchical",
                (
                    AlgorithmConfig::Hierarchical {
                        n_clusters: 5,
                        linkage: Linkage::Average,
                    },
                    None,
                ),
            ),
            ("graph_correlation", graph(SimilarityMetric::Correlation)),
            ("graph_mutual_information", graph(SimilarityMetric::MutualInformation)),
            ("graph_cosine", graph(SimilarityMetric::Cosine)),
            ("graph_dtw", graph(SimilarityMetric::Dtw)),
        ]
        .into_iter()
        .map(|(name, (algorithm, metric))| MethodConfig::new(name, algorithm, metric))
        .collect();

        Self {
            series_kind: SeriesKind::Price,
            features: FeatureConfig::default(),
            pca: PcaConfig::default(),
            similarity: SimilarityConfig::default(),
            evaluation: EvaluationConfig::default(),
            methods,
            seed: 42,
            resources: ResourceLimits::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ClusteringError> {
        let config: AnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Resource limits present in the optimization config take precedence.
    pub fn with_optimization_config(mut self, optimization: &OptimizationConfig) -> Self {
        let limits = &optimization.resource_limits;
        if limits.max_memory.is_some() {
            self.resources.max_memory = limits.max_memory.clone();
        }
        if limits.n_jobs.is_some() {
            self.resources.n_jobs = limits.n_jobs;
        }
        self
    }

    /// Metrics that some method clusters on or is evaluated against.
    pub fn required_metrics(&self) -> Vec<SimilarityMetric> {
        let mut metrics: Vec<SimilarityMetric> = self
            .methods
            .iter()
            .flat_map(|m| {
                let basis = match m.quality_basis(&self.evaluation) {
                    QualityBasis::Metric { metric } => Some(metric),
                    QualityBasis::FeatureDistance => None,
                };
                m.metric.into_iter().chain(basis)
            })
            .collect();
        metrics.sort();
        metrics.dedup();
        metrics
    }

    pub fn validate(&self) -> Result<(), ClusteringError> {
        if self.features.statistics.is_empty() {
            return Err(ClusteringError::InvalidConfig("at least one feature statistic is required".to_string()));
        }
        for stat in &self.features.statistics {
            validate_statistic(stat)?;
        }
        let mut names = HashSet::new();
        for stat in &self.features.statistics {
            if !names.insert(stat.name()) {
                return Err(ClusteringError::InvalidConfig(format!("duplicate feature {}", stat.name())));
            }
        }

        match self.pca.components {
            ComponentSelection::VarianceThreshold { threshold } => {
                if !(threshold > 0.0 && threshold <= 1.0) {
                    return Err(ClusteringError::InvalidConfig(format!(
                        "PCA variance threshold {} must be in (0, 1]",
                        threshold
                    )));
                }
            }
            ComponentSelection::Fixed { count } => {
                if count == 0 {
                    return Err(ClusteringError::InvalidConfig("PCA component count must be at least 1".to_string()));
                }
            }
        }

        for metric in SimilarityMetric::ALL {
            match self.similarity.edge_selection(metric) {
                EdgeSelection::Threshold { value } if !value.is_finite() => {
                    return Err(ClusteringError::InvalidConfig(format!("{} threshold must be finite", metric)));
                }
                EdgeSelection::TopK { k: 0 } => {
                    return Err(ClusteringError::InvalidConfig(format!("{} top_k must be at least 1", metric)));
                }
                _ => {}
            }
        }
        if self.similarity.mi_bins < 2 {
            return Err(ClusteringError::InvalidConfig("mi_bins must be at least 2".to_string()));
        }

        if self.methods.is_empty() {
            return Err(ClusteringError::InvalidConfig("no clustering methods configured".to_string()));
        }
        let mut method_names = HashSet::new();
        for method in &self.methods {
            if !method_names.insert(method.name.as_str()) {
                return Err(ClusteringError::InvalidConfig(format!("duplicate method name '{}'", method.name)));
            }
        }

        if let Some(limit) = &self.resources.max_memory {
            limit.to_bytes()?;
        }
        Ok(())
    }
}

fn validate_statistic(stat: &FeatureStatistic) -> Result<(), ClusteringError> {
    let bad = |msg: &str| Err(ClusteringError::InvalidConfig(format!("feature {}: {}", stat.name(), msg)));
    match stat {
        FeatureStatistic::Autocorrelation { lag } if *lag == 0 => bad("lag must be at least 1"),
        FeatureStatistic::Momentum { window }
        | FeatureStatistic::MovingAverageRatio { window, .. }
        | FeatureStatistic::Rsi { window, .. }
            if *window == 0 =>
        {
            bad("window must be at least 1")
        }
        FeatureStatistic::BollingerBandwidth { window, num_std }
        | FeatureStatistic::BollingerPercentB { window, num_std } => {
            if *window < 2 {
                bad("window must be at least 2")
            } else if !(num_std.is_finite() && *num_std > 0.0) {
                bad("num_std must be positive")
            } else {
                Ok(())
            }
        }
        FeatureStatistic::MacdHistogram { fast, slow, signal } => {
            if *fast == 0 || *signal == 0 || fast >= slow {
                bad("requires 0 < fast < slow and signal > 0")
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}
