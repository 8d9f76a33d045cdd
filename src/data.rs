//! Data loading, cleaning and time-feature derivation using Polars

use std::fs::{self, File};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::error::AnalysisError;

/// Columns derived from a parsed timestamp column
pub const TIME_FEATURES: [&str; 4] = ["hour", "day_of_week", "month", "is_weekend"];

/// Clustering features picked when present, in this order
pub const DEFAULT_FEATURES: [&str; 6] = [
    "AVERAGE_SPEED",
    "NUMBER_OF_VEHICLES",
    "MINIMUM_SPEED",
    "MAXIMUM_SPEED",
    "hour",
    "day_of_week",
];

/// Suffix of the pre-scaling copy kept for every numeric column
pub const ORIGINAL_SUFFIX: &str = "_original";

/// Name of the label column appended after clustering
pub const CLUSTER_COLUMN: &str = "cluster";

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// What the cleaning and feature steps did to the raw table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub rows_loaded: usize,
    pub missing_removed: usize,
    pub duplicates_removed: usize,
    pub rows_remaining: usize,
    /// Timestamp columns that produced time features
    pub parsed_time_columns: Vec<String>,
    /// Timestamp-like columns that failed to parse and were left untouched
    pub skipped_time_columns: Vec<String>,
}

/// Cleaned and feature-engineered table
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub frame: DataFrame,
    pub report: CleaningReport,
}

impl FeatureTable {
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        column_names(&self.frame)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }
}

/// Calendar features of one timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeParts {
    pub hour: u32,
    /// Monday = 0 .. Sunday = 6
    pub day_of_week: u32,
    pub month: u32,
    pub is_weekend: bool,
}

impl From<&NaiveDateTime> for TimeParts {
    fn from(stamp: &NaiveDateTime) -> Self {
        let day_of_week = stamp.weekday().num_days_from_monday();
        TimeParts {
            hour: stamp.hour(),
            day_of_week,
            month: stamp.month(),
            is_weekend: day_of_week >= 5,
        }
    }
}

/// Load a CSV file, clean it and derive the time and original-value columns
///
/// # Arguments
/// * `file_path` - Path to the raw CSV file (header row required)
///
/// # Returns
/// * `FeatureTable` with the cleaned frame and a report of what was removed
pub fn load_and_process_data(file_path: &Path) -> crate::Result<FeatureTable> {
    let raw = load_csv(file_path)?;
    info!(
        rows = raw.height(),
        columns = raw.width(),
        path = %file_path.display(),
        "Loaded raw dataset"
    );
    debug!(columns = ?column_names(&raw), "Raw columns");
    build_features(raw)
}

/// Cell texts read as missing in every column
pub const NULL_MARKERS: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Read a CSV file with a header row into a DataFrame
///
/// Empty cells and the texts in `NULL_MARKERS` become nulls.
pub fn load_csv(file_path: &Path) -> crate::Result<DataFrame> {
    let null_values = NullValues::AllColumns(NULL_MARKERS.iter().map(|s| s.to_string()).collect());
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .with_parse_options(CsvParseOptions::default().with_null_values(Some(null_values)))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))
        .with_context(|| format!("Failed to open input file {}", file_path.display()))?
        .finish()
        .with_context(|| format!("Failed to read CSV from {}", file_path.display()))?;
    Ok(df)
}

/// Run the cleaning and feature derivation steps on an already loaded frame
pub fn build_features(raw: DataFrame) -> crate::Result<FeatureTable> {
    let rows_loaded = raw.height();

    let (complete, missing_removed) = drop_missing(&raw)?;
    info!(removed = missing_removed, "Dropped rows with missing values");

    let (unique, duplicates_removed) = drop_duplicates(&complete)?;
    info!(removed = duplicates_removed, "Dropped duplicate rows");

    if unique.height() == 0 {
        return Err(AnalysisError::EmptyDataset.into());
    }

    let derived = derive_time_features(unique)?;
    let frame = preserve_originals(derived.frame)?;

    let report = CleaningReport {
        rows_loaded,
        missing_removed,
        duplicates_removed,
        rows_remaining: frame.height(),
        parsed_time_columns: derived.parsed,
        skipped_time_columns: derived.skipped,
    };
    info!(
        rows = report.rows_remaining,
        columns = frame.width(),
        "Feature engineering complete"
    );

    Ok(FeatureTable { frame, report })
}

/// Remove every row holding a null, or a NaN in a float column
///
/// # Returns
/// * The filtered frame and the number of rows removed
pub fn drop_missing(df: &DataFrame) -> crate::Result<(DataFrame, usize)> {
    let mut complete = lit(true);
    for series in df.get_columns() {
        let nulls = series.null_count();
        if nulls > 0 {
            debug!(column = series.name(), nulls, "Missing values");
        }

        let mut present = col(series.name()).is_not_null();
        if series.dtype().is_float() {
            present = present.and(col(series.name()).is_not_nan());
        }
        complete = complete.and(present);
    }

    let cleaned = df.clone().lazy().filter(complete).collect()?;
    let removed = df.height() - cleaned.height();
    Ok((cleaned, removed))
}

/// Remove rows equal to an earlier row across all columns, keeping the first
///
/// # Returns
/// * The filtered frame (original order preserved) and the number of rows removed
pub fn drop_duplicates(df: &DataFrame) -> crate::Result<(DataFrame, usize)> {
    let cleaned = df.unique_stable(None, UniqueKeepStrategy::First, None)?;
    let removed = df.height() - cleaned.height();
    Ok((cleaned, removed))
}

/// Result of the time-feature step
#[derive(Debug, Clone)]
pub struct TimeDerivation {
    pub frame: DataFrame,
    pub parsed: Vec<String>,
    pub skipped: Vec<String>,
}

/// Whether a column name marks a date/time column
pub fn is_time_column(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("date") || lower.contains("time")
}

/// Parse every date/time column and add hour, day_of_week, month and is_weekend
///
/// A column that fails to parse is skipped; the others are still processed.
/// When several columns parse, the last one provides the derived columns.
pub fn derive_time_features(mut df: DataFrame) -> crate::Result<TimeDerivation> {
    let candidates: Vec<String> = column_names(&df)
        .into_iter()
        .filter(|name| is_time_column(name))
        .collect();

    let mut parsed = Vec::new();
    let mut skipped = Vec::new();

    for name in candidates {
        let stamps = match parse_time_column(&df, &name) {
            Ok(stamps) => stamps,
            Err(err) => {
                warn!(column = %name, error = %err, "Could not parse time column, skipping");
                skipped.push(name);
                continue;
            }
        };

        let parts: Vec<TimeParts> = stamps.iter().map(TimeParts::from).collect();
        let canonical: Vec<String> = stamps
            .iter()
            .map(|stamp| stamp.format("%Y-%m-%d %H:%M:%S").to_string())
            .collect();

        df.with_column(Series::new(&name, canonical))?;
        df.with_column(Series::new(
            "hour",
            parts.iter().map(|p| p.hour as i32).collect::<Vec<i32>>(),
        ))?;
        df.with_column(Series::new(
            "day_of_week",
            parts.iter().map(|p| p.day_of_week as i32).collect::<Vec<i32>>(),
        ))?;
        df.with_column(Series::new(
            "month",
            parts.iter().map(|p| p.month as i32).collect::<Vec<i32>>(),
        ))?;
        df.with_column(Series::new(
            "is_weekend",
            parts.iter().map(|p| p.is_weekend as i32).collect::<Vec<i32>>(),
        ))?;

        info!(column = %name, "Derived time features");
        parsed.push(name);
    }

    Ok(TimeDerivation {
        frame: df,
        parsed,
        skipped,
    })
}

fn parse_time_column(df: &DataFrame, name: &str) -> crate::Result<Vec<NaiveDateTime>> {
    let as_text = df.column(name)?.cast(&DataType::String)?;
    as_text
        .str()?
        .into_iter()
        .map(|value| {
            let value = value.ok_or_else(|| anyhow::anyhow!("null timestamp"))?;
            parse_timestamp(value)
                .ok_or_else(|| anyhow::anyhow!("'{}' is not a recognised timestamp", value))
        })
        .collect()
}

/// Parse a timestamp in one of the accepted formats; offsets are converted to UTC
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.with_timezone(&Utc).naive_utc());
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Copy every numeric, non-time column to `<name>_original`
pub fn preserve_originals(mut df: DataFrame) -> crate::Result<DataFrame> {
    let copies: Vec<Series> = df
        .get_columns()
        .iter()
        .filter(|series| series.dtype().is_numeric())
        .filter(|series| {
            !TIME_FEATURES.contains(&series.name()) && !series.name().ends_with(ORIGINAL_SUFFIX)
        })
        .map(|series| {
            let name = format!("{}{}", series.name(), ORIGINAL_SUFFIX);
            series.clone().with_name(&name)
        })
        .collect();

    for copy in copies {
        df.with_column(copy)?;
    }
    Ok(df)
}

/// Pick the requested columns that exist and are numeric, keeping the requested order
pub fn select_feature_columns(df: &DataFrame, requested: &[String]) -> crate::Result<Vec<String>> {
    let selected: Vec<String> = requested
        .iter()
        .filter(|name| {
            df.column(name)
                .map(|series| series.dtype().is_numeric())
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(AnalysisError::NoFeatureColumns {
            requested: requested.to_vec(),
        }
        .into());
    }
    Ok(selected)
}

/// Extract the given columns, cast to f64, as an `(n_rows, n_columns)` matrix
pub fn feature_matrix(df: &DataFrame, columns: &[String]) -> crate::Result<Array2<f64>> {
    let mut matrix = Array2::zeros((df.height(), columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let values = numeric_column(df, name)?;
        for (i, value) in values.into_iter().enumerate() {
            matrix[[i, j]] = value;
        }
    }
    Ok(matrix)
}

/// Read one column as f64 values; nulls become NaN
pub fn numeric_column(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let series = df
        .column(name)
        .map_err(|_| AnalysisError::MissingColumn(name.to_string()))?;
    let as_float = series.cast(&DataType::Float64)?;
    let values = as_float
        .f64()?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

/// Return a new frame with the cluster labels appended as the `cluster` column
pub fn with_cluster_labels(df: &DataFrame, labels: &Array1<usize>) -> crate::Result<DataFrame> {
    if labels.len() != df.height() {
        anyhow::bail!(
            "Label count ({}) does not match row count ({})",
            labels.len(),
            df.height()
        );
    }
    let mut labeled = df.clone();
    let values = labels
        .iter()
        .map(|&label| u32::try_from(label))
        .collect::<std::result::Result<Vec<u32>, _>>()
        .context("Cluster label does not fit the cluster column")?;
    labeled.with_column(Series::new(CLUSTER_COLUMN, values))?;
    Ok(labeled)
}

/// Write a frame as CSV with a header row, creating the parent directory
pub fn save_table(df: &DataFrame, output_path: &Path) -> crate::Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut out = df.clone();
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut out)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    info!(rows = df.height(), path = %output_path.display(), "Saved table");
    Ok(())
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .map(|series| series.name().to_string())
        .collect()
}
