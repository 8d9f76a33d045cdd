//! Two-component principal component projection for cluster scatter plots

use ndarray::{Array1, Array2, ArrayView2, Axis};

const POWER_ITERATIONS: usize = 500;
const CONVERGENCE: f64 = 1e-12;

/// Linear projection onto the two leading principal components
#[derive(Debug, Clone)]
pub struct Projection2D {
    /// Column means of the fitted data
    pub mean: Array1<f64>,
    /// Principal axes as rows, shape `(2, n_features)`
    pub components: Array2<f64>,
    /// Share of total variance carried by each component
    pub explained_variance_ratio: [f64; 2],
}

impl Projection2D {
    /// Fit the projection with power iteration on the covariance matrix
    pub fn fit(features: ArrayView2<f64>) -> crate::Result<Self> {
        let n_samples = features.nrows();
        let n_features = features.ncols();
        if n_samples < 2 || n_features == 0 {
            anyhow::bail!(
                "PCA needs at least 2 samples and 1 feature, got {} x {}",
                n_samples,
                n_features
            );
        }

        let mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow::anyhow!("Cannot compute column means"))?;
        let centered = &features - &mean;
        let mut covariance = centered.t().dot(&centered) / (n_samples as f64 - 1.0);
        let total_variance: f64 = covariance.diag().sum();

        let mut components = Array2::zeros((2, n_features));
        let mut explained = [0.0; 2];

        for component in 0..2.min(n_features) {
            let (eigenvalue, eigenvector) = leading_eigenpair(&covariance);
            if eigenvalue <= 0.0 {
                break;
            }
            components.row_mut(component).assign(&eigenvector);
            if total_variance > 0.0 {
                explained[component] = eigenvalue / total_variance;
            }

            // deflate so the next pass finds the following component
            let outer = outer_product(&eigenvector);
            covariance = covariance - outer * eigenvalue;
        }

        Ok(Projection2D {
            mean,
            components,
            explained_variance_ratio: explained,
        })
    }

    /// Project rows onto the fitted components, shape `(n_rows, 2)`
    pub fn transform(&self, features: ArrayView2<f64>) -> crate::Result<Array2<f64>> {
        if features.ncols() != self.mean.len() {
            anyhow::bail!(
                "Number of features ({}) doesn't match training data ({})",
                features.ncols(),
                self.mean.len()
            );
        }
        let centered = &features - &self.mean;
        Ok(centered.dot(&self.components.t()))
    }
}

/// Largest eigenvalue and its unit eigenvector of a symmetric PSD matrix
fn leading_eigenpair(matrix: &Array2<f64>) -> (f64, Array1<f64>) {
    let n = matrix.nrows();

    // start from the column with the largest norm so the start is never orthogonal
    // to a dominant direction that has non-zero variance
    let start = (0..n)
        .max_by(|&a, &b| {
            let norm_a = matrix.column(a).dot(&matrix.column(a));
            let norm_b = matrix.column(b).dot(&matrix.column(b));
            norm_a.total_cmp(&norm_b)
        })
        .unwrap_or(0);
    let mut vector = matrix.column(start).to_owned();
    let norm = vector.dot(&vector).sqrt();
    if norm <= f64::EPSILON {
        let mut unit = Array1::zeros(n);
        unit[0] = 1.0;
        return (0.0, unit);
    }
    vector /= norm;

    for _ in 0..POWER_ITERATIONS {
        let mut next = matrix.dot(&vector);
        let next_norm = next.dot(&next).sqrt();
        if next_norm <= f64::EPSILON {
            return (0.0, vector);
        }
        next /= next_norm;
        let change = (&next - &vector).mapv(|d| d * d).sum();
        vector = next;
        if change < CONVERGENCE {
            break;
        }
    }

    // Rayleigh quotient
    let eigenvalue = vector.dot(&matrix.dot(&vector));
    (eigenvalue, orient(vector))
}

/// Flip the sign so the largest-magnitude entry is positive
fn orient(vector: Array1<f64>) -> Array1<f64> {
    let pivot = vector
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);
    if pivot < 0.0 {
        -vector
    } else {
        vector
    }
}

fn outer_product(vector: &Array1<f64>) -> Array2<f64> {
    let column = vector.view().insert_axis(Axis(1));
    let row = vector.view().insert_axis(Axis(0));
    column.dot(&row)
}
