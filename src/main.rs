use anyhow::{anyhow, Context};
use std::path::PathBuf;
use tracing::{error, info, warn};

use rustfolio_clustering::external::csv_universe::CsvUniverseSource;
use rustfolio_clustering::external::universe_source::UniverseSource;
use rustfolio_clustering::jobs::clustering_job;
use rustfolio_clustering::logging::{init_logging, LoggingConfig};
use rustfolio_clustering::models::config::{AnalysisConfig, OptimizationConfig};
use rustfolio_clustering::services::report_service;
use rustfolio_clustering::services::worker_pool::WorkerPool;
use rustfolio_clustering::state::JobContext;

fn load_analysis_config() -> anyhow::Result<AnalysisConfig> {
    let mut config = match std::env::var("CLUSTERING_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
            AnalysisConfig::from_json_str(&json).with_context(|| format!("parsing {}", path))?
        }
        Err(_) => {
            info!("⚙️ CLUSTERING_CONFIG not set, using default analysis config");
            AnalysisConfig::default()
        }
    };

    if let Ok(path) = std::env::var("OPTIMIZATION_CONFIG") {
        let json = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
        let optimization: OptimizationConfig =
            serde_json::from_str(&json).with_context(|| format!("parsing {}", path))?;
        config = config.with_optimization_config(&optimization);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    let logging = LoggingConfig::from_env();
    if let Err(e) = logging.validate() {
        eprintln!("Invalid logging configuration: {}", e);
    }
    init_logging(logging).map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    let universe_path = std::env::var("UNIVERSE_CSV").context("UNIVERSE_CSV must point to the series file")?;
    let source = CsvUniverseSource::new(PathBuf::from(universe_path));
    let config = load_analysis_config()?;

    let universe = source.load_universe().await?;
    let pool = WorkerPool::from_limits(&config.resources, clustering_job::estimate_task_bytes(&universe))?;
    info!("🧵 Worker pool sized to {} workers", pool.workers());

    let ctx = JobContext::new(config, pool);
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, cancelling analysis");
            cancel.cancel();
        }
    });

    let report = match clustering_job::run_clustering_analysis(ctx, universe).await {
        Ok(report) => report,
        Err(e) => {
            error!("❌ Clustering analysis failed: {}", e);
            return Err(e.into());
        }
    };

    let json = serde_json::to_string_pretty(&report)?;
    match std::env::var("REPORT_PATH") {
        Ok(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path))?;
            info!("💾 Report written to {}", path);
        }
        Err(_) => println!("{}", json),
    }

    info!("\n{}", report_service::render_text(&report));
    Ok(())
}
