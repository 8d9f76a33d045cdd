//! K-Means clustering, cluster-count selection and clustering quality metrics

use linfa::metrics::SilhouetteScore;
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use tracing::{debug, info, warn};

use crate::error::AnalysisError;

/// Smallest cluster count evaluated during selection
pub const MIN_CLUSTERS: usize = 2;

/// Cluster count used when selection produced no usable trial
pub const DEFAULT_CLUSTERS: usize = 4;

/// Seed shared by every sampling and fitting step unless overridden
pub const DEFAULT_SEED: u64 = 42;

/// Hyperparameters for a single K-Means fit
///
/// Selection runs once per candidate k on a subsample; the final fit is the
/// reported result and uses its own, stricter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansSettings {
    /// Number of k-means++ restarts; the run with the lowest inertia wins
    pub n_runs: usize,
    pub max_iters: u64,
    pub tolerance: f64,
    pub seed: u64,
}

impl KMeansSettings {
    /// Loose settings used while scanning candidate cluster counts
    pub fn selection(seed: u64) -> Self {
        KMeansSettings {
            n_runs: 5,
            max_iters: 200,
            tolerance: 1e-3,
            seed,
        }
    }

    /// Careful settings used for the final clustering of the full matrix
    pub fn final_fit(seed: u64) -> Self {
        KMeansSettings {
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
            seed,
        }
    }
}

/// Result of a K-Means fit
#[derive(Debug, Clone)]
pub struct KMeansModel {
    pub n_clusters: usize,
    /// Cluster assignment for every training row
    pub labels: Array1<usize>,
    /// Centroids in standardized space, shape `(n_clusters, n_features)`
    pub centroids: Array2<f64>,
    /// Sum of squared distances from each row to its centroid
    pub inertia: f64,
}

impl KMeansModel {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Fit K-Means on the given rows
///
/// # Arguments
/// * `features` - Standardized feature matrix
/// * `n_clusters` - Number of clusters (at least 2)
/// * `settings` - Restarts, iteration cap, tolerance and seed
///
/// # Returns
/// * Fitted `KMeansModel` with labels, centroids and inertia
pub fn fit_kmeans(
    features: ArrayView2<f64>,
    n_clusters: usize,
    settings: &KMeansSettings,
) -> crate::Result<KMeansModel> {
    if n_clusters < MIN_CLUSTERS {
        return Err(AnalysisError::InvalidClusterCount(n_clusters).into());
    }
    if features.nrows() < n_clusters {
        return Err(AnalysisError::TooFewRows {
            rows: features.nrows(),
            clusters: n_clusters,
        }
        .into());
    }

    // Dummy targets for unsupervised learning
    let targets: Array1<usize> = Array1::zeros(features.nrows());
    let dataset = DatasetBase::new(features, targets);

    let rng = Xoshiro256Plus::seed_from_u64(settings.seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .n_runs(settings.n_runs)
        .max_n_iterations(settings.max_iters)
        .tolerance(settings.tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(&features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Cluster the full standardized matrix with the chosen k
pub fn cluster_data(features: &Array2<f64>, n_clusters: usize, seed: u64) -> crate::Result<KMeansModel> {
    let settings = KMeansSettings::final_fit(seed);
    info!(
        rows = features.nrows(),
        k = n_clusters,
        n_runs = settings.n_runs,
        max_iters = settings.max_iters,
        tolerance = settings.tolerance,
        "Fitting final K-Means"
    );

    let model = fit_kmeans(features.view(), n_clusters, &settings)?;
    info!(inertia = model.inertia, sizes = ?model.cluster_sizes(), "Final clustering complete");
    Ok(model)
}

/// One candidate cluster count evaluated on the selection subsample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionTrial {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

/// Outcome of the cluster-count scan
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCountSelection {
    /// Successful trials in increasing k
    pub trials: Vec<SelectionTrial>,
    /// Every k the scan was asked to cover
    pub candidates: Vec<usize>,
    /// Rows in the subsample shared by all trials
    pub sample_size: usize,
    /// First k that failed and why; later candidates were not tried
    pub failure: Option<(usize, String)>,
}

impl ClusterCountSelection {
    /// The k values that produced a trial
    pub fn evaluated(&self) -> Vec<usize> {
        self.trials.iter().map(|trial| trial.k).collect()
    }

    pub fn chosen_k(&self) -> usize {
        choose_cluster_count(&self.trials)
    }
}

/// Pick the k with the highest silhouette score, or `DEFAULT_CLUSTERS` without trials
///
/// Inertia never takes part in the decision. Ties keep the smaller k.
pub fn choose_cluster_count(trials: &[SelectionTrial]) -> usize {
    trials
        .iter()
        .filter(|trial| trial.silhouette.is_finite())
        .fold(None::<&SelectionTrial>, |best, trial| match best {
            Some(current) if current.silhouette >= trial.silhouette => Some(current),
            _ => Some(trial),
        })
        .map_or(DEFAULT_CLUSTERS, |best| best.k)
}

/// Draw up to `cap` distinct row indices out of `n_rows`, sorted ascending
pub fn sample_indices(n_rows: usize, cap: usize, seed: u64) -> Vec<usize> {
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let amount = cap.min(n_rows);
    let mut indices = rand::seq::index::sample(&mut rng, n_rows, amount).into_vec();
    indices.sort_unstable();
    indices
}

/// Evaluate k = 2..=max_k on one shared subsample of the standardized matrix
///
/// # Arguments
/// * `features` - Matrix already scaled with the full-data scaler
/// * `max_k` - Largest candidate cluster count
/// * `sample_cap` - Maximum number of rows in the subsample
/// * `seed` - Seed for the subsample and every fit
///
/// A failed fit stops the scan; trials collected so far are kept.
pub fn evaluate_cluster_counts(
    features: &Array2<f64>,
    max_k: usize,
    sample_cap: usize,
    seed: u64,
) -> ClusterCountSelection {
    let indices = sample_indices(features.nrows(), sample_cap, seed);
    let sample = features.select(Axis(0), &indices);
    let candidates: Vec<usize> = (MIN_CLUSTERS..=max_k).collect();
    info!(
        rows = features.nrows(),
        sample_rows = sample.nrows(),
        candidates = ?candidates,
        "Scanning cluster counts"
    );

    let settings = KMeansSettings::selection(seed);
    let mut trials = Vec::with_capacity(candidates.len());
    let mut failure = None;

    for &k in &candidates {
        match evaluate_candidate(sample.view(), k, &settings) {
            Ok(trial) => {
                info!(k, inertia = trial.inertia, silhouette = trial.silhouette, "Evaluated cluster count");
                trials.push(trial);
            }
            Err(err) => {
                warn!(k, error = %err, "Cluster count evaluation failed, stopping scan");
                failure = Some((k, err.to_string()));
                break;
            }
        }
    }

    ClusterCountSelection {
        trials,
        candidates,
        sample_size: sample.nrows(),
        failure,
    }
}

fn evaluate_candidate(
    sample: ArrayView2<f64>,
    k: usize,
    settings: &KMeansSettings,
) -> crate::Result<SelectionTrial> {
    let model = fit_kmeans(sample, k, settings)?;
    let silhouette = silhouette_score(sample, &model.labels)?;
    debug!(k, sizes = ?model.cluster_sizes(), "Candidate cluster sizes");
    Ok(SelectionTrial {
        k,
        inertia: model.inertia,
        silhouette,
    })
}

/// Mean silhouette coefficient over every row
///
/// Rows alone in their cluster score 0. At least two non-empty clusters are required.
pub fn silhouette_score(features: ArrayView2<f64>, labels: &Array1<usize>) -> crate::Result<f64> {
    let n_samples = features.nrows();
    if labels.len() != n_samples {
        anyhow::bail!(
            "Label count ({}) does not match row count ({})",
            labels.len(),
            n_samples
        );
    }

    let n_clusters = labels.iter().max().map_or(0, |&max| max + 1);
    let mut sizes = vec![0usize; n_clusters];
    for &label in labels.iter() {
        sizes[label] += 1;
    }
    let non_empty = sizes.iter().filter(|&&size| size > 0).count();
    if non_empty < 2 {
        return Err(AnalysisError::DegenerateLabels(non_empty).into());
    }

    let dataset = DatasetBase::new(features, labels.clone());
    let mean = dataset.silhouette_score()?;

    // linfa scores a row alone in its cluster as 1
    let singletons = sizes.iter().filter(|&&size| size == 1).count();
    Ok(mean - singletons as f64 / n_samples as f64)
}

/// Compute within-cluster sum of squares (inertia)
pub fn compute_inertia(features: ArrayView2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::collections::BTreeSet;

    /// Three tight, far apart groups of 20 points each
    fn three_blobs() -> Array2<f64> {
        let centers = [(0.0, 0.0), (20.0, 20.0), (-20.0, 20.0)];
        let mut values = Vec::new();
        for &(cx, cy) in &centers {
            for i in 0..20 {
                values.push(cx + (i % 5) as f64 * 0.1);
                values.push(cy + (i / 5) as f64 * 0.1);
            }
        }
        Array2::from_shape_vec((60, 2), values).unwrap()
    }

    fn trial(k: usize, inertia: f64, silhouette: f64) -> SelectionTrial {
        SelectionTrial { k, inertia, silhouette }
    }

    #[test]
    fn test_fit_kmeans_covers_every_label() {
        let features = three_blobs();
        let model = fit_kmeans(features.view(), 3, &KMeansSettings::final_fit(DEFAULT_SEED)).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 60);
        assert_eq!(model.centroids.shape(), &[3, 2]);

        let distinct: BTreeSet<usize> = model.labels.iter().copied().collect();
        assert_eq!(distinct, (0..3).collect::<BTreeSet<_>>());
        assert_eq!(model.cluster_sizes(), vec![20, 20, 20]);

        // every blob lands in a single cluster
        for blob in 0..3 {
            let first = model.labels[blob * 20];
            assert!(model.labels.iter().skip(blob * 20).take(20).all(|&l| l == first));
        }
    }

    #[test]
    fn test_invalid_cluster_count() {
        let features = three_blobs();
        let settings = KMeansSettings::selection(DEFAULT_SEED);

        assert!(fit_kmeans(features.view(), 1, &settings).is_err());

        let tiny = array![[0.0, 0.0], [1.0, 1.0]];
        let err = fit_kmeans(tiny.view(), 3, &settings).unwrap_err();
        assert_eq!(
            err.downcast_ref::<AnalysisError>(),
            Some(&AnalysisError::TooFewRows { rows: 2, clusters: 3 })
        );
    }

    #[test]
    fn test_settings_stay_distinct() {
        let selection = KMeansSettings::selection(7);
        let final_fit = KMeansSettings::final_fit(7);
        assert!(selection.tolerance > final_fit.tolerance);
        assert!(selection.max_iters < final_fit.max_iters);
        assert_eq!(selection.seed, final_fit.seed);
    }

    #[test]
    fn test_choose_cluster_count_uses_silhouette_only() {
        // inertia decreases with k but the best silhouette sits at k = 4
        let trials = vec![
            trial(2, 900.0, 0.41),
            trial(3, 500.0, 0.38),
            trial(4, 300.0, 0.57),
            trial(5, 100.0, 0.52),
        ];
        assert_eq!(choose_cluster_count(&trials), 4);

        // inertia order reversed, same answer
        let reversed: Vec<SelectionTrial> = trials
            .iter()
            .map(|t| trial(t.k, 1000.0 - t.inertia, t.silhouette))
            .collect();
        assert_eq!(choose_cluster_count(&reversed), 4);

        // ties keep the smaller k
        let tied = vec![trial(2, 10.0, 0.6), trial(3, 5.0, 0.6)];
        assert_eq!(choose_cluster_count(&tied), 2);
    }

    #[test]
    fn test_choose_cluster_count_falls_back_to_default() {
        assert_eq!(choose_cluster_count(&[]), DEFAULT_CLUSTERS);
        assert_eq!(choose_cluster_count(&[trial(2, 1.0, f64::NAN)]), DEFAULT_CLUSTERS);
    }

    #[test]
    fn test_failed_selection_falls_back_to_default() {
        // a single row cannot be split into two clusters, so k = 2 fails and the scan stops
        let features = array![[1.0, 2.0]];
        let selection = evaluate_cluster_counts(&features, 6, 200_000, DEFAULT_SEED);

        assert!(selection.trials.is_empty());
        assert_eq!(selection.failure.as_ref().map(|(k, _)| *k), Some(2));
        assert_eq!(selection.candidates, vec![2, 3, 4, 5, 6]);
        assert_eq!(selection.chosen_k(), DEFAULT_CLUSTERS);
    }

    #[test]
    fn test_selection_stops_at_first_failure() {
        // 4 rows: k = 2..=4 fit, k = 5 fails and k = 6 is never tried
        let features = array![[0.0, 0.0], [0.1, 0.0], [10.0, 10.0], [10.1, 10.0]];
        let selection = evaluate_cluster_counts(&features, 6, 200_000, DEFAULT_SEED);

        assert_eq!(selection.evaluated(), vec![2, 3, 4]);
        assert_eq!(selection.failure.as_ref().map(|(k, _)| *k), Some(5));
        assert_eq!(selection.chosen_k(), 2);
    }

    #[test]
    fn test_selection_finds_three_blobs() {
        let features = three_blobs();
        let selection = evaluate_cluster_counts(&features, 5, 200_000, DEFAULT_SEED);

        assert_eq!(selection.evaluated(), vec![2, 3, 4, 5]);
        assert!(selection.failure.is_none());
        assert_eq!(selection.chosen_k(), 3);
        for trial in &selection.trials {
            assert!(trial.inertia.is_finite() && trial.inertia >= 0.0);
            assert!((-1.0..=1.0).contains(&trial.silhouette));
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let features = three_blobs();
        let first = evaluate_cluster_counts(&features, 4, 30, 11);
        let second = evaluate_cluster_counts(&features, 4, 30, 11);

        assert_eq!(first, second);
        assert_eq!(first.sample_size, 30);

        let labels_a = cluster_data(&features, 3, 11).unwrap().labels;
        let labels_b = cluster_data(&features, 3, 11).unwrap().labels;
        assert_eq!(labels_a, labels_b);
    }

    #[test]
    fn test_sample_indices() {
        let indices = sample_indices(1000, 100, 42);
        assert_eq!(indices.len(), 100);
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        assert!(indices.iter().all(|&i| i < 1000));
        assert_eq!(indices, sample_indices(1000, 100, 42));

        // cap above the row count takes every row
        assert_eq!(sample_indices(5, 200_000, 42), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_silhouette_score_known_values() {
        let features = array![[0.0], [1.0], [10.0], [11.0]];
        let labels = Array1::from(vec![0, 0, 1, 1]);
        // a = 1 for every point, b = mean distance to the other pair
        let expected = [
            (10.5 - 1.0) / 10.5,
            (9.5 - 1.0) / 9.5,
            (9.5 - 1.0) / 9.5,
            (10.5 - 1.0) / 10.5,
        ]
        .iter()
        .sum::<f64>()
            / 4.0;
        let score = silhouette_score(features.view(), &labels).unwrap();
        assert_abs_diff_eq!(score, expected, epsilon = 1e-12);

        // singletons contribute zero; the pair has a = 1 and b = 10 or 9
        let labels = Array1::from(vec![0, 0, 1, 2]);
        let score = silhouette_score(features.view(), &labels).unwrap();
        assert_abs_diff_eq!(score, (0.9 + 8.0 / 9.0) / 4.0, epsilon = 1e-12);

        let single = Array1::from(vec![0, 0, 0, 0]);
        assert!(silhouette_score(features.view(), &single).is_err());
    }

    #[test]
    fn test_compute_inertia() {
        let features = array![[0.0, 0.0], [2.0, 0.0], [10.0, 10.0]];
        let labels = Array1::from(vec![0, 0, 1]);
        let centroids = array![[1.0, 0.0], [10.0, 10.0]];
        assert_abs_diff_eq!(compute_inertia(features.view(), &labels, &centroids), 2.0);
    }
}
