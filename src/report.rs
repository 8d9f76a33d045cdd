//! Per-cluster summaries and the console report

use std::fmt;

use ndarray::Array1;
use polars::prelude::DataFrame;

use crate::data::numeric_column;

pub const SPEED_COLUMN: &str = "AVERAGE_SPEED";
pub const VEHICLE_COLUMN: &str = "NUMBER_OF_VEHICLES";

/// Qualitative traffic label derived from mean speed and mean vehicle count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficPattern {
    /// Slow and crowded
    Congested,
    /// Fast and sparse
    FreeFlowing,
    Moderate,
    Mixed,
}

impl TrafficPattern {
    /// Classify a cluster from its mean speed (km/h) and mean vehicle count
    pub fn classify(avg_speed: f64, avg_vehicles: f64) -> Self {
        if avg_speed < 30.0 && avg_vehicles > 150.0 {
            TrafficPattern::Congested
        } else if avg_speed > 50.0 && avg_vehicles < 100.0 {
            TrafficPattern::FreeFlowing
        } else if (30.0..=50.0).contains(&avg_speed) {
            TrafficPattern::Moderate
        } else {
            TrafficPattern::Mixed
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrafficPattern::Congested => "Congested, heavy traffic",
            TrafficPattern::FreeFlowing => "Free-flowing, low density",
            TrafficPattern::Moderate => "Moderate density",
            TrafficPattern::Mixed => "Mixed traffic",
        }
    }
}

impl fmt::Display for TrafficPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Statistics of one cluster over the labeled table
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub rows: usize,
    /// Percentage of all rows
    pub share: f64,
    /// Mean of every selected feature, in feature order, on unscaled values
    pub feature_means: Vec<(String, f64)>,
    /// Present only when the table has an average speed column
    pub pattern: Option<TrafficPattern>,
}

impl ClusterSummary {
    pub fn mean_of(&self, feature: &str) -> Option<f64> {
        self.feature_means
            .iter()
            .find(|(name, _)| name == feature)
            .map(|(_, mean)| *mean)
    }
}

/// Build one summary per cluster label `0..n_clusters`
///
/// # Arguments
/// * `df` - Cleaned table holding the unscaled feature values
/// * `features` - Selected feature columns
/// * `labels` - Cluster label of every row of `df`
/// * `n_clusters` - Number of clusters
pub fn summarize_clusters(
    df: &DataFrame,
    features: &[String],
    labels: &Array1<usize>,
    n_clusters: usize,
) -> crate::Result<Vec<ClusterSummary>> {
    if labels.len() != df.height() {
        anyhow::bail!(
            "Label count ({}) does not match row count ({})",
            labels.len(),
            df.height()
        );
    }

    let mut sizes = vec![0usize; n_clusters];
    for &label in labels.iter() {
        if label < n_clusters {
            sizes[label] += 1;
        }
    }

    let mut feature_means = Vec::with_capacity(features.len());
    for name in features {
        let values = numeric_column(df, name)?;
        feature_means.push(cluster_means(&values, labels, n_clusters));
    }

    let speed_means = match numeric_column(df, SPEED_COLUMN) {
        Ok(values) => Some(cluster_means(&values, labels, n_clusters)),
        Err(_) => None,
    };
    let vehicle_means = numeric_column(df, VEHICLE_COLUMN)
        .ok()
        .map(|values| cluster_means(&values, labels, n_clusters));

    let total = labels.len().max(1) as f64;
    let summaries = (0..n_clusters)
        .map(|cluster| {
            let pattern = speed_means.as_ref().and_then(|speeds| {
                if sizes[cluster] == 0 {
                    return None;
                }
                let vehicles = vehicle_means.as_ref().map_or(0.0, |v| v[cluster]);
                Some(TrafficPattern::classify(speeds[cluster], vehicles))
            });

            ClusterSummary {
                cluster,
                rows: sizes[cluster],
                share: sizes[cluster] as f64 / total * 100.0,
                feature_means: features
                    .iter()
                    .zip(feature_means.iter())
                    .map(|(name, means)| (name.clone(), means[cluster]))
                    .collect(),
                pattern,
            }
        })
        .collect();

    Ok(summaries)
}

/// Mean of `values` per cluster; empty clusters get NaN
fn cluster_means(values: &[f64], labels: &Array1<usize>, n_clusters: usize) -> Vec<f64> {
    let mut sums = vec![0.0; n_clusters];
    let mut counts = vec![0usize; n_clusters];
    for (&value, &label) in values.iter().zip(labels.iter()) {
        if label < n_clusters {
            sums[label] += value;
            counts[label] += 1;
        }
    }
    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| if count == 0 { f64::NAN } else { sum / count as f64 })
        .collect()
}

/// Human-readable line for one feature mean
pub fn format_feature_mean(feature: &str, mean: f64) -> String {
    if feature.contains("SPEED") {
        format!("Average {}: {:.1} km/h", feature, mean)
    } else if feature.contains("VEHICLES") {
        format!("Average {}: {:.0} vehicles", feature, mean)
    } else if feature == "hour" {
        format!("Average hour: {:.1}", mean)
    } else {
        format!("Average {}: {:.2}", feature, mean)
    }
}

/// Render the cluster interpretation block printed at the end of a run
pub fn render_summary(summaries: &[ClusterSummary]) -> String {
    let mut out = String::new();
    out.push_str("=== Cluster Interpretation ===\n");
    for summary in summaries {
        out.push_str(&format!("\nCluster {}:\n", summary.cluster));
        out.push_str(&format!("  Rows: {}\n", summary.rows));
        out.push_str(&format!("  Share of data: {:.1}%\n", summary.share));
        for (feature, mean) in &summary.feature_means {
            out.push_str(&format!("  {}\n", format_feature_mean(feature, *mean)));
        }
        if let Some(pattern) = summary.pattern {
            out.push_str(&format!("  Traffic pattern: {}\n", pattern));
        }
    }
    out
}

/// Print cluster summaries to console
pub fn print_cluster_summaries(summaries: &[ClusterSummary]) {
    println!("\n{}", render_summary(summaries));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::prelude::*;

    fn labeled_frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new(SPEED_COLUMN, &[20.0, 24.0, 60.0, 70.0, 40.0]),
            Series::new(VEHICLE_COLUMN, &[200i64, 180, 40, 20, 120]),
            Series::new("hour", &[8i32, 9, 3, 2, 14]),
        ])
        .unwrap()
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(TrafficPattern::classify(25.0, 200.0), TrafficPattern::Congested);
        assert_eq!(TrafficPattern::classify(65.0, 50.0), TrafficPattern::FreeFlowing);
        assert_eq!(TrafficPattern::classify(30.0, 500.0), TrafficPattern::Moderate);
        assert_eq!(TrafficPattern::classify(50.0, 10.0), TrafficPattern::Moderate);
        // slow but not crowded
        assert_eq!(TrafficPattern::classify(20.0, 100.0), TrafficPattern::Mixed);
        // fast but crowded
        assert_eq!(TrafficPattern::classify(55.0, 150.0), TrafficPattern::Mixed);
    }

    #[test]
    fn test_summarize_clusters() {
        let df = labeled_frame();
        let features = vec![SPEED_COLUMN.to_string(), "hour".to_string()];
        let labels = Array1::from(vec![0, 0, 1, 1, 2]);

        let summaries = summarize_clusters(&df, &features, &labels, 3).unwrap();
        assert_eq!(summaries.len(), 3);

        assert_eq!(summaries[0].rows, 2);
        assert_abs_diff_eq!(summaries[0].share, 40.0);
        assert_abs_diff_eq!(summaries[0].mean_of(SPEED_COLUMN).unwrap(), 22.0);
        assert_abs_diff_eq!(summaries[0].mean_of("hour").unwrap(), 8.5);
        assert_eq!(summaries[0].pattern, Some(TrafficPattern::Congested));

        assert_eq!(summaries[1].pattern, Some(TrafficPattern::FreeFlowing));
        assert_eq!(summaries[2].pattern, Some(TrafficPattern::Moderate));
        assert_eq!(summaries[2].mean_of(VEHICLE_COLUMN), None);

        let total: usize = summaries.iter().map(|s| s.rows).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_summary_without_speed_has_no_pattern() {
        let df = DataFrame::new(vec![Series::new("hour", &[1i32, 2, 3, 4])]).unwrap();
        let labels = Array1::from(vec![0, 1, 0, 1]);
        let summaries = summarize_clusters(&df, &["hour".to_string()], &labels, 2).unwrap();

        assert!(summaries.iter().all(|s| s.pattern.is_none()));
        assert_abs_diff_eq!(summaries[1].mean_of("hour").unwrap(), 3.0);
    }

    #[test]
    fn test_render_summary() {
        let df = labeled_frame();
        let features = vec![SPEED_COLUMN.to_string(), VEHICLE_COLUMN.to_string(), "hour".to_string()];
        let labels = Array1::from(vec![0, 0, 1, 1, 1]);
        let summaries = summarize_clusters(&df, &features, &labels, 2).unwrap();

        let text = render_summary(&summaries);
        assert!(text.contains("Cluster 0:"));
        assert!(text.contains("Rows: 3"));
        assert!(text.contains("Share of data: 60.0%"));
        assert!(text.contains("Average AVERAGE_SPEED: 22.0 km/h"));
        assert!(text.contains("Average NUMBER_OF_VEHICLES: 190 vehicles"));
        assert!(text.contains("Average hour: 8.5"));
        assert!(text.contains("Traffic pattern: Congested, heavy traffic"));
    }
}
