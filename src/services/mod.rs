pub mod cluster_quality_service;
pub mod clustering;
pub mod feature_service;
pub mod indicators;
pub mod pca_service;
pub mod report_service;
pub mod similarity_metrics;
pub mod similarity_service;
pub mod similarity_store;
pub mod worker_pool;
