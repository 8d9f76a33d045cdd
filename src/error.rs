//! Domain errors raised by the analysis stages

use thiserror::Error;

/// Failures the pipeline distinguishes when deciding whether to abort a run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// None of the requested feature columns exist in the cleaned table
    #[error("no usable feature columns (requested: {requested:?})")]
    NoFeatureColumns { requested: Vec<String> },

    /// Cleaning removed every row
    #[error("dataset is empty after cleaning")]
    EmptyDataset,

    /// Fewer rows than requested clusters
    #[error("number of data points ({rows}) must be at least the number of clusters ({clusters})")]
    TooFewRows { rows: usize, clusters: usize },

    #[error("invalid cluster count {0}: at least 2 clusters are required")]
    InvalidClusterCount(usize),

    #[error("column '{0}' not found")]
    MissingColumn(String),

    /// Silhouette needs at least two distinct labels
    #[error("silhouette is undefined for {0} distinct label(s)")]
    DegenerateLabels(usize),
}
