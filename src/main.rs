//! TrafficForge CLI entrypoint: runs the full clustering pipeline on a traffic CSV

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use trafficforge::report::print_cluster_summaries;
use trafficforge::{run_analysis, AnalysisReport, Args};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.to_config()?;
    println!("=== Traffic Pattern Clustering ===\n");

    let start_time = Instant::now();
    let report = run_analysis(&config)?;

    print_report(&report);
    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

/// Install the fmt subscriber; `RUST_LOG` overrides the default level
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn print_report(report: &AnalysisReport) {
    let cleaning = &report.cleaning;
    println!("\n=== Data Cleaning ===");
    println!("Rows loaded: {}", cleaning.rows_loaded);
    println!("Rows with missing values removed: {}", cleaning.missing_removed);
    println!("Duplicate rows removed: {}", cleaning.duplicates_removed);
    println!("Rows remaining: {}", cleaning.rows_remaining);

    println!("\n=== Cluster Count Selection ===");
    println!("Features: {}", report.features.join(", "));
    for trial in &report.selection.trials {
        println!(
            "k = {}: inertia = {:.2}, silhouette = {:.4}",
            trial.k, trial.inertia, trial.silhouette
        );
    }
    if let Some((k, reason)) = &report.selection.failure {
        println!("Scan stopped at k = {}: {}", k, reason);
    }
    println!("✓ Chosen number of clusters: {}", report.chosen_k);

    print_cluster_summaries(&report.summaries);

    println!("=== Outputs ===");
    for artifact in &report.artifacts {
        println!("  {}", artifact.display());
    }
    if !report.failed_stages.is_empty() {
        println!("Stages that failed: {}", report.failed_stages.join(", "));
    }
}
