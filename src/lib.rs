//! TrafficForge: traffic sensor pattern discovery with K-Means clustering
//!
//! Cleans raw sensor readings, derives calendar features, picks the cluster
//! count by silhouette score and reports the resulting traffic patterns as
//! console summaries, charts and an HTML map.

pub mod cli;
pub mod data;
pub mod error;
pub mod map;
pub mod model;
pub mod pca;
pub mod pipeline;
pub mod report;
pub mod scaler;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_and_process_data, FeatureTable};
pub use error::AnalysisError;
pub use model::{cluster_data, evaluate_cluster_counts, fit_kmeans, KMeansModel};
pub use pipeline::{run_analysis, AnalysisReport, PipelineConfig};
pub use scaler::{standardize, StandardScaler};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
