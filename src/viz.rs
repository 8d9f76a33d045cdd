//! Visualization functions using Plotters for cluster analysis

use std::ops::Range;
use std::path::Path;

use plotters::prelude::*;
use tracing::info;

use crate::model::SelectionTrial;
use crate::report::ClusterSummary;

/// Color palette for different clusters
pub const CLUSTER_COLORS: [RGBColor; 8] = [
    RED,
    BLUE,
    GREEN,
    RGBColor(255, 165, 0),
    RGBColor(128, 0, 128),
    RGBColor(165, 42, 42),
    RGBColor(255, 192, 203),
    RGBColor(128, 128, 128),
];

/// Palette entry for a cluster, cycling when there are more clusters than colors
pub fn cluster_color(cluster: usize) -> RGBColor {
    CLUSTER_COLORS[cluster % CLUSTER_COLORS.len()]
}

/// Axis range covering `values` with some padding; flat data still gets a non-empty range
pub fn padded_range<I: IntoIterator<Item = f64>>(values: I, padding: f64) -> Range<f64> {
    let (min, max) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    let span = (max - min).abs();
    let pad = if span > 0.0 { span * padding } else { min.abs().max(1.0) * 0.5 };
    (min - pad)..(max + pad)
}

/// Two-panel chart: elbow curve (inertia vs k) and silhouette score vs k
pub fn plot_selection_curves(trials: &[SelectionTrial], output_path: &Path) -> crate::Result<()> {
    if trials.is_empty() {
        anyhow::bail!("No selection trials to plot");
    }

    let k_range = padded_range(trials.iter().map(|t| t.k as f64), 0.1);
    let root = BitMapBackend::new(output_path, (1500, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    let inertia: Vec<(f64, f64)> = trials.iter().map(|t| (t.k as f64, t.inertia)).collect();
    let silhouette: Vec<(f64, f64)> = trials.iter().map(|t| (t.k as f64, t.silhouette)).collect();

    for (panel, (title, y_desc, points, color)) in panels.iter().zip([
        ("Elbow Method - Optimal Cluster Count", "Inertia", &inertia, BLUE),
        ("Silhouette Scores", "Silhouette Score", &silhouette, RED),
    ]) {
        let y_range = padded_range(points.iter().map(|&(_, y)| y), 0.1);
        let mut chart = ChartBuilder::on(panel)
            .caption(title, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(70)
            .build_cartesian_2d(k_range.clone(), y_range)?;

        chart
            .configure_mesh()
            .x_desc("Number of clusters (k)")
            .y_desc(y_desc)
            .x_labels(trials.len() + 2)
            .x_label_formatter(&|x| format!("{:.0}", x))
            .axis_desc_style(("sans-serif", 15))
            .draw()?;

        chart.draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?;
        chart.draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 5, color.filled())),
        )?;
    }

    root.present()?;
    info!(path = %output_path.display(), "Cluster selection chart saved");
    Ok(())
}

/// Scatter plot of PCA-projected rows colored by cluster
///
/// # Arguments
/// * `points` - `(x, y)` coordinates on the first two principal components
/// * `labels` - Cluster label of every point
/// * `explained` - Explained variance ratio of each component, for the axis titles
/// * `output_path` - Path to save the PNG plot
pub fn plot_pca_clusters(
    points: &[(f64, f64)],
    labels: &[usize],
    explained: [f64; 2],
    output_path: &Path,
) -> crate::Result<()> {
    if points.is_empty() || points.len() != labels.len() {
        anyhow::bail!(
            "Cannot plot {} points with {} labels",
            points.len(),
            labels.len()
        );
    }

    let x_range = padded_range(points.iter().map(|p| p.0), 0.05);
    let y_range = padded_range(points.iter().map(|p| p.1), 0.05);

    let root = BitMapBackend::new(output_path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cluster Visualization with PCA", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(format!("PCA Component 1 (variance: {:.1}%)", explained[0] * 100.0))
        .y_desc(format!("PCA Component 2 (variance: {:.1}%)", explained[1] * 100.0))
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let n_clusters = labels.iter().max().map_or(0, |&max| max + 1);
    for cluster in 0..n_clusters {
        let color = cluster_color(cluster);
        let members: Vec<(f64, f64)> = points
            .iter()
            .zip(labels)
            .filter(|(_, &label)| label == cluster)
            .map(|(&point, _)| point)
            .collect();
        if members.is_empty() {
            continue;
        }

        chart
            .draw_series(
                members
                    .into_iter()
                    .map(move |point| Circle::new(point, 4, color.mix(0.7).filled())),
            )?
            .label(format!("Cluster {}", cluster))
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), points = points.len(), "PCA cluster chart saved");
    Ok(())
}

/// One bar chart per feature showing the per-cluster mean, laid out in a grid of up to 3 columns
pub fn plot_cluster_characteristics(
    summaries: &[ClusterSummary],
    features: &[String],
    output_path: &Path,
) -> crate::Result<()> {
    if features.is_empty() || summaries.is_empty() {
        anyhow::bail!("No features to visualize");
    }

    let cols = features.len().min(3);
    let rows = features.len().div_ceil(cols);
    let root =
        BitMapBackend::new(output_path, (500 * cols as u32, 400 * rows as u32)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((rows, cols));

    let x_range = -0.5..(summaries.len() as f64 - 0.5);

    for (panel, feature) in panels.iter().zip(features) {
        let means: Vec<(usize, f64)> = summaries
            .iter()
            .filter_map(|s| s.mean_of(feature).map(|mean| (s.cluster, mean)))
            .filter(|(_, mean)| mean.is_finite())
            .collect();

        let top = means.iter().map(|&(_, m)| m).fold(0.0, f64::max);
        let bottom = means.iter().map(|&(_, m)| m).fold(0.0, f64::min);
        let y_range = padded_range([bottom, top], 0.15);

        let mut chart = ChartBuilder::on(panel)
            .caption(format!("{} by Cluster", feature), ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_range.clone(), y_range)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc("Cluster")
            .y_desc(format!("Mean {}", feature))
            .x_labels(summaries.len())
            .x_label_formatter(&|x| format!("{:.0}", x))
            .draw()?;

        chart.draw_series(means.iter().map(|&(cluster, mean)| {
            let x = cluster as f64;
            Rectangle::new([(x - 0.4, 0.0), (x + 0.4, mean)], cluster_color(cluster).filled())
        }))?;

        chart.draw_series(means.iter().map(|&(cluster, mean)| {
            Text::new(
                format!("{:.2}", mean),
                (cluster as f64 - 0.2, mean),
                ("sans-serif", 13),
            )
        }))?;
    }

    root.present()?;
    info!(path = %output_path.display(), features = features.len(), "Cluster characteristics chart saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_color_cycles() {
        assert_eq!(cluster_color(0), RED);
        assert_eq!(cluster_color(1), BLUE);
        assert_eq!(cluster_color(8), RED);
        assert_eq!(cluster_color(11), cluster_color(3));
    }

    #[test]
    fn test_padded_range() {
        let range = padded_range([1.0, 3.0], 0.5);
        assert_eq!(range, 0.0..4.0);

        // flat data still gets a usable range
        let flat = padded_range([2.0, 2.0], 0.1);
        assert!(flat.start < 2.0 && flat.end > 2.0);

        let empty = padded_range(std::iter::empty(), 0.1);
        assert_eq!(empty, 0.0..1.0);

        let with_nan = padded_range([f64::NAN, 5.0, 7.0], 0.0);
        assert_eq!(with_nan, 5.0..7.0);
    }

    #[test]
    fn test_invalid_inputs_are_rejected_before_drawing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.png");

        assert!(plot_selection_curves(&[], &path).is_err());
        assert!(plot_pca_clusters(&[(0.0, 0.0)], &[], [0.5, 0.5], &path).is_err());
        assert!(plot_cluster_characteristics(&[], &["hour".to_string()], &path).is_err());
        assert!(!path.exists());
    }
}
