/// Summary report assembly and plain-text rendering.

use chrono::Utc;
use std::fmt::Write;
use std::time::Duration;
use uuid::Uuid;

use crate::models::cluster::{ClusterAssignment, ClusterStats, Convergence};
use crate::models::config::MethodConfig;
use crate::models::report::{
    Diagnostics, MethodReport, MethodStatus, PcaSection, RunMetadata, SummaryReport,
};

/// Block for a method that produced an assignment.
pub fn method_block(
    method: &MethodConfig,
    assignment: &ClusterAssignment,
    stats: ClusterStats,
    evaluated_on: String,
    elapsed: Duration,
) -> MethodReport {
    let (status, iterations) = match assignment.convergence() {
        Convergence::Converged { iterations } => (MethodStatus::Completed, *iterations),
        Convergence::Partial { iterations, reason } => (
            MethodStatus::Partial {
                reason: reason.clone(),
            },
            *iterations,
        ),
    };
    MethodReport {
        name: method.name.clone(),
        algorithm: method.algorithm.family().to_string(),
        metric: method.metric,
        evaluated_on: Some(evaluated_on),
        status,
        seed: assignment.seed(),
        iterations: Some(iterations),
        elapsed_ms: elapsed.as_millis(),
        stats: Some(stats),
    }
}

/// Block for a method that failed; the rest of the report is unaffected.
pub fn failed_block(method: &MethodConfig, error: String, elapsed: Duration) -> MethodReport {
    MethodReport {
        name: method.name.clone(),
        algorithm: method.algorithm.family().to_string(),
        metric: method.metric,
        evaluated_on: None,
        status: MethodStatus::Failed { error },
        seed: None,
        iterations: None,
        elapsed_ms: elapsed.as_millis(),
        stats: None,
    }
}

/// Run-level facts recorded alongside the method blocks.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub seed: u64,
    pub input_assets: usize,
    pub universe_size: usize,
    pub feature_names: Vec<String>,
    pub worker_count: usize,
}

/// Assemble the final report. Methods keep their configured order.
pub fn build_report(
    run: RunSummary,
    methods: Vec<MethodReport>,
    pca: PcaSection,
    diagnostics: Diagnostics,
) -> SummaryReport {
    let methods_failed = methods.iter().filter(|m| m.is_failed()).count();
    SummaryReport {
        run: RunMetadata {
            run_id: run.run_id,
            generated_at: Utc::now(),
            seed: run.seed,
            input_assets: run.input_assets,
            universe_size: run.universe_size,
            feature_names: run.feature_names,
            worker_count: run.worker_count,
            methods_completed: methods.len() - methods_failed,
            methods_failed,
        },
        methods,
        pca,
        diagnostics,
    }
}

fn fmt_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
}

/// Human-readable rendering of the same report.
pub fn render_text(report: &SummaryReport) -> String {
    let mut out = String::new();
    let run = &report.run;

    let _ = writeln!(out, "Clustering analysis {}", run.run_id);
    let _ = writeln!(out, "Generated: {}", run.generated_at.to_rfc3339());
    let _ = writeln!(
        out,
        "Universe: {} of {} assets, seed {}, {} workers",
        run.universe_size, run.input_assets, run.seed, run.worker_count
    );
    let _ = writeln!(out, "Features: {}", run.feature_names.join(", "));
    let _ = writeln!(out);

    match &report.pca {
        PcaSection::Completed(pca) => {
            let _ = writeln!(
                out,
                "PCA: {} components retained ({:.1}% of variance)",
                pca.retained_components,
                pca.retained_variance_share * 100.0
            );
            for component in &pca.components {
                let _ = writeln!(
                    out,
                    "  PC{:<3} {:>6.2}%",
                    component.component,
                    component.explained_variance_share * 100.0
                );
            }
        }
        PcaSection::Failed { error } => {
            let _ = writeln!(out, "PCA: failed ({})", error);
        }
        PcaSection::Skipped => {
            let _ = writeln!(out, "PCA: skipped");
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "{:<28} {:<13} {:<19} {:>9} {:>7} {:>6} {:>10} {:>9}",
        "method", "algorithm", "metric", "status", "clusters", "noise", "avg_intra", "std"
    );
    for method in &report.methods {
        let metric = method.metric.map_or("features", |m| m.as_str());
        let status = match &method.status {
            MethodStatus::Completed => "completed",
            MethodStatus::Partial { .. } => "partial",
            MethodStatus::Failed { .. } => "failed",
        };
        match &method.stats {
            Some(stats) => {
                let _ = writeln!(
                    out,
                    "{:<28} {:<13} {:<19} {:>9} {:>7} {:>6} {:>10} {:>9}",
                    method.name,
                    method.algorithm,
                    metric,
                    status,
                    stats.num_clusters,
                    stats.noise_count,
                    fmt_optional(stats.avg_intra_similarity),
                    fmt_optional(stats.similarity_std)
                );
                let sizes: Vec<String> = stats.cluster_sizes.iter().map(usize::to_string).collect();
                let _ = writeln!(
                    out,
                    "    sizes [{}] total {} avg {:.2} max {} min {}",
                    sizes.join(", "),
                    stats.total_assets,
                    stats.avg_cluster_size,
                    stats.max_cluster_size,
                    stats.min_cluster_size
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "{:<28} {:<13} {:<19} {:>9}",
                    method.name, method.algorithm, metric, status
                );
            }
        }
        match &method.status {
            MethodStatus::Partial { reason } => {
                let _ = writeln!(out, "    partial: {}", reason);
            }
            MethodStatus::Failed { error } => {
                let _ = writeln!(out, "    error: {}", error);
            }
            MethodStatus::Completed => {}
        }
    }

    let diagnostics = &report.diagnostics;
    if !diagnostics.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Diagnostics: {} excluded assets, {} missing pairs, {} notes",
            diagnostics.excluded_assets.len(),
            diagnostics.missing_pairs.len(),
            diagnostics.notes.len()
        );
        for excluded in &diagnostics.excluded_assets {
            let _ = writeln!(out, "  excluded {}: {}", excluded.asset, excluded.reason);
        }
        for note in &diagnostics.notes {
            let _ = writeln!(out, "  note: {}", note);
        }
    }

    out
}
