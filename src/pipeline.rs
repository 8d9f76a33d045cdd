//! End-to-end analysis run: load, scale, select k, cluster, report

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ndarray::{Array2, Axis};
use polars::prelude::DataFrame;
use tracing::{error, info, warn};

use crate::data::{
    feature_matrix, load_and_process_data, save_table, select_feature_columns,
    with_cluster_labels, CleaningReport, DEFAULT_FEATURES,
};
use crate::map::{has_coordinates, write_traffic_map};
use crate::model::{
    cluster_data, evaluate_cluster_counts, sample_indices, ClusterCountSelection, KMeansModel,
    DEFAULT_SEED,
};
use crate::pca::Projection2D;
use crate::report::{summarize_clusters, ClusterSummary};
use crate::scaler::{standardize, StandardScaler};
use crate::viz;

/// Everything a run needs; built from the command line or directly in tests
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub input: PathBuf,
    /// Cleaned table, written before selection and again with the cluster column
    pub processed_output: PathBuf,
    /// Root of `graphs/` and `maps/`
    pub output_dir: PathBuf,
    pub max_k: usize,
    /// Row cap of the selection subsample
    pub sample_size: usize,
    pub map_sample_size: usize,
    pub pca_sample_size: usize,
    pub seed: u64,
    pub features: Vec<String>,
    pub render_plots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input: PathBuf::from("data/raw/traffic_density_202501.csv"),
            processed_output: PathBuf::from("data/processed/cleaned_traffic.csv"),
            output_dir: PathBuf::from("results"),
            max_k: 6,
            sample_size: 200_000,
            map_sample_size: 10_000,
            pca_sample_size: 50_000,
            seed: DEFAULT_SEED,
            features: DEFAULT_FEATURES.iter().map(|name| name.to_string()).collect(),
            render_plots: true,
        }
    }
}

impl PipelineConfig {
    pub fn graphs_dir(&self) -> PathBuf {
        self.output_dir.join("graphs")
    }

    pub fn maps_dir(&self) -> PathBuf {
        self.output_dir.join("maps")
    }

    pub fn selection_plot_path(&self) -> PathBuf {
        self.graphs_dir().join("cluster_analysis.png")
    }

    pub fn pca_plot_path(&self) -> PathBuf {
        self.graphs_dir().join("pca_clusters.png")
    }

    pub fn characteristics_plot_path(&self) -> PathBuf {
        self.graphs_dir().join("cluster_characteristics.png")
    }

    pub fn map_path(&self) -> PathBuf {
        self.maps_dir().join("traffic_clusters.html")
    }
}

/// Create the output directories, replacing any plain file standing in the way
pub fn prepare_output_dirs(config: &PipelineConfig) -> crate::Result<()> {
    let mut dirs = vec![config.graphs_dir(), config.maps_dir()];
    if let Some(parent) = config
        .processed_output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        dirs.push(parent.to_path_buf());
    }

    for dir in dirs {
        ensure_dir(&dir)?;
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> crate::Result<()> {
    if dir.is_file() {
        warn!(path = %dir.display(), "Removing file in place of output directory");
        fs::remove_file(dir)
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

/// Outcome of a complete run
#[derive(Debug)]
pub struct AnalysisReport {
    pub cleaning: CleaningReport,
    pub features: Vec<String>,
    pub scaler: StandardScaler,
    pub selection: ClusterCountSelection,
    pub chosen_k: usize,
    pub model: KMeansModel,
    pub summaries: Vec<ClusterSummary>,
    /// Cleaned table with the `cluster` column
    pub table: DataFrame,
    /// Files written by the run
    pub artifacts: Vec<PathBuf>,
    /// Visual stages that failed without aborting the run
    pub failed_stages: Vec<String>,
}

/// Run every stage in order
///
/// Loading, feature selection and the final fit abort the run. Chart and map
/// stages only log their failure and are listed in `failed_stages`.
pub fn run_analysis(config: &PipelineConfig) -> crate::Result<AnalysisReport> {
    prepare_output_dirs(config)?;
    let mut artifacts = Vec::new();
    let mut failed_stages = Vec::new();

    // Step 1: Load, clean and derive features
    let table = load_and_process_data(&config.input)
        .with_context(|| format!("Failed to load {}", config.input.display()))?;
    save_table(&table.frame, &config.processed_output)?;
    artifacts.push(config.processed_output.clone());

    // Step 2: Feature selection and scaling
    let features = select_feature_columns(&table.frame, &config.features)?;
    info!(features = ?features, "Selected feature columns");
    let raw = feature_matrix(&table.frame, &features)?;
    let (scaled, scaler) = standardize(&raw)?;

    // Step 3: Cluster-count selection
    let selection = evaluate_cluster_counts(&scaled, config.max_k, config.sample_size, config.seed);
    let chosen_k = selection.chosen_k();
    if selection.trials.is_empty() {
        warn!(k = chosen_k, "No cluster count could be evaluated, using default");
    }
    info!(k = chosen_k, evaluated = ?selection.evaluated(), "Chosen cluster count");

    // Step 4: Final clustering
    let model = cluster_data(&scaled, chosen_k, config.seed)
        .with_context(|| format!("Clustering with k = {} failed", chosen_k))?;
    let labeled = with_cluster_labels(&table.frame, &model.labels)?;
    save_table(&labeled, &config.processed_output)?;

    let summaries = summarize_clusters(&labeled, &features, &model.labels, model.n_clusters)?;

    // Step 5: Charts and map
    if config.render_plots {
        let path = config.selection_plot_path();
        if soft_stage("cluster selection chart", &mut failed_stages, || {
            viz::plot_selection_curves(&selection.trials, &path)
        }) {
            artifacts.push(path);
        }

        let path = config.pca_plot_path();
        if soft_stage("PCA chart", &mut failed_stages, || {
            plot_pca(&scaled, &model, config, &path)
        }) {
            artifacts.push(path);
        }

        let path = config.characteristics_plot_path();
        if soft_stage("cluster characteristics chart", &mut failed_stages, || {
            viz::plot_cluster_characteristics(&summaries, &features, &path)
        }) {
            artifacts.push(path);
        }
    }

    if has_coordinates(&labeled) {
        let path = config.map_path();
        if soft_stage("traffic map", &mut failed_stages, || {
            write_traffic_map(&labeled, &model.labels, config.map_sample_size, config.seed, &path)
                .map(|_| ())
        }) {
            artifacts.push(path);
        }
    } else {
        info!("No LATITUDE/LONGITUDE columns, skipping map");
    }

    Ok(AnalysisReport {
        cleaning: table.report,
        features,
        scaler,
        selection,
        chosen_k,
        model,
        summaries,
        table: labeled,
        artifacts,
        failed_stages,
    })
}

/// Fit PCA on a seeded sample of scaled rows and plot it
fn plot_pca(
    scaled: &Array2<f64>,
    model: &KMeansModel,
    config: &PipelineConfig,
    output_path: &Path,
) -> crate::Result<()> {
    let indices = sample_indices(scaled.nrows(), config.pca_sample_size, config.seed);
    let sample = scaled.select(Axis(0), &indices);
    let labels: Vec<usize> = indices.iter().map(|&row| model.labels[row]).collect();

    let projection = Projection2D::fit(sample.view())?;
    let projected = projection.transform(sample.view())?;
    let points: Vec<(f64, f64)> = projected
        .outer_iter()
        .map(|row| (row[0], row[1]))
        .collect();

    viz::plot_pca_clusters(
        &points,
        &labels,
        projection.explained_variance_ratio,
        output_path,
    )
}

/// Run a stage whose failure must not abort the analysis
fn soft_stage<F>(name: &str, failed: &mut Vec<String>, stage: F) -> bool
where
    F: FnOnce() -> crate::Result<()>,
{
    match stage() {
        Ok(()) => true,
        Err(err) => {
            error!(stage = name, error = %err, "Stage failed, continuing");
            failed.push(name.to_string());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_paths() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_k, 6);
        assert_eq!(config.seed, 42);
        assert_eq!(config.features.len(), DEFAULT_FEATURES.len());
        assert_eq!(
            config.selection_plot_path(),
            PathBuf::from("results/graphs/cluster_analysis.png")
        );
        assert_eq!(
            config.map_path(),
            PathBuf::from("results/maps/traffic_clusters.html")
        );
    }

    #[test]
    fn test_prepare_output_dirs_replaces_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            output_dir: dir.path().join("out"),
            processed_output: dir.path().join("processed").join("clean.csv"),
            ..PipelineConfig::default()
        };
        fs::create_dir_all(&config.output_dir).unwrap();
        fs::write(config.graphs_dir(), "not a directory").unwrap();

        prepare_output_dirs(&config).unwrap();
        assert!(config.graphs_dir().is_dir());
        assert!(config.maps_dir().is_dir());
        assert!(dir.path().join("processed").is_dir());
    }

    #[test]
    fn test_soft_stage_records_failures() {
        let mut failed = Vec::new();
        assert!(soft_stage("ok", &mut failed, || Ok(())));
        assert!(!soft_stage("broken", &mut failed, || anyhow::bail!("boom")));
        assert_eq!(failed, vec!["broken".to_string()]);
    }
}
