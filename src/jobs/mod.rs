//! Analysis Jobs Module
//!
//! Entry points that run a complete analysis against a `JobContext`.
//!
//! # Available Jobs
//!
//! - `clustering_job` - Features, PCA, similarity graphs and every configured
//!   clustering method, summarized in one report
//!
//! # Job Architecture
//!
//! Jobs in this module are designed to be:
//! - Deterministic: the same seed and input give the same report
//! - Fault-tolerant: per-asset, per-pair and per-method failures are recorded
//!   in diagnostics instead of aborting the run
//! - Cancellable: a shared flag is checked between steps and inside long loops
//! - Observable: milestones are logged with `tracing`

pub mod clustering_job;
