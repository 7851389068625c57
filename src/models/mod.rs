pub mod asset;
pub mod cluster;
pub mod config;
pub mod report;
pub mod similarity;

pub use asset::{Asset, Observation, SeriesKind, Universe};
pub use cluster::{AlgorithmConfig, ClusterAssignment, ClusterLabel, ClusterStats, Convergence};
pub use config::{AnalysisConfig, MethodConfig, OptimizationConfig};
pub use report::{Diagnostics, MethodReport, MethodStatus, PcaSection, SummaryReport};
pub use similarity::{SimilarityGraph, SimilarityMatrix, SimilarityMetric};
