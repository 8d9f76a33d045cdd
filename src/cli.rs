//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::data::DEFAULT_FEATURES;
use crate::model::{DEFAULT_SEED, MIN_CLUSTERS};
use crate::pipeline::PipelineConfig;

/// Traffic sensor pattern discovery using K-Means clustering
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the raw traffic CSV file
    #[arg(short, long, default_value = "data/raw/traffic_density_202501.csv")]
    pub input: String,

    /// Where to write the cleaned table (with the cluster column)
    #[arg(long, default_value = "data/processed/cleaned_traffic.csv")]
    pub processed_output: String,

    /// Directory for graphs/ and maps/
    #[arg(short, long, default_value = "results")]
    pub output_dir: String,

    /// Largest cluster count evaluated during selection
    #[arg(short = 'k', long, default_value = "6")]
    pub max_k: usize,

    /// Row cap of the selection subsample
    #[arg(long, default_value = "200000")]
    pub sample_size: usize,

    /// Maximum number of markers on the map
    #[arg(long, default_value = "10000")]
    pub map_sample_size: usize,

    /// Maximum number of points in the PCA scatter plot
    #[arg(long, default_value = "50000")]
    pub pca_sample_size: usize,

    /// Seed for sampling and K-Means initialisation
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Feature columns as a comma-separated list
    /// Example: --features "AVERAGE_SPEED,NUMBER_OF_VEHICLES,hour"
    #[arg(short, long)]
    pub features: Option<String>,

    /// Skip the PNG charts
    #[arg(long)]
    pub skip_plots: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Feature columns from `--features`, or the default traffic features
    pub fn parse_feature_list(&self) -> crate::Result<Vec<String>> {
        let Some(ref list) = self.features else {
            return Ok(DEFAULT_FEATURES.iter().map(|name| name.to_string()).collect());
        };

        let features: Vec<String> = list
            .split(',')
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if features.is_empty() {
            anyhow::bail!("Feature list must name at least one column, got '{}'", list);
        }
        Ok(features)
    }

    /// Validate the arguments and build the library configuration
    pub fn to_config(&self) -> crate::Result<PipelineConfig> {
        if self.max_k < MIN_CLUSTERS {
            anyhow::bail!("--max-k must be at least {}, got {}", MIN_CLUSTERS, self.max_k);
        }
        if self.sample_size == 0 {
            anyhow::bail!("--sample-size must be positive");
        }

        Ok(PipelineConfig {
            input: PathBuf::from(&self.input),
            processed_output: PathBuf::from(&self.processed_output),
            output_dir: PathBuf::from(&self.output_dir),
            max_k: self.max_k,
            sample_size: self.sample_size,
            map_sample_size: self.map_sample_size,
            pca_sample_size: self.pca_sample_size,
            seed: self.seed,
            features: self.parse_feature_list()?,
            render_plots: !self.skip_plots,
        })
    }
}
