//! Column standardization (zero mean, unit variance)

use linfa::prelude::*;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::{Array1, Array2, ArrayView2};

/// Per-column mean and standard deviation fitted once on the full feature matrix
#[derive(Debug)]
pub struct StandardScaler {
    fitted: LinearScaler<f64>,
}

impl StandardScaler {
    /// Fit the scaler on every row of `features`
    ///
    /// Non-finite values are rejected; cleaning must have removed them.
    pub fn fit(features: &Array2<f64>) -> crate::Result<Self> {
        if features.nrows() == 0 || features.ncols() == 0 {
            anyhow::bail!(
                "Cannot fit scaler on an empty matrix ({} x {})",
                features.nrows(),
                features.ncols()
            );
        }
        if let Some(((row, column), value)) = features.indexed_iter().find(|(_, v)| !v.is_finite()) {
            anyhow::bail!(
                "Cannot fit scaler: non-finite value {} at row {}, column {}",
                value,
                row,
                column
            );
        }

        // Dummy targets, only the records are used
        let dataset = DatasetBase::new(features.view(), Array1::<usize>::zeros(features.nrows()));
        let fitted = LinearScaler::standard().fit(&dataset)?;
        Ok(StandardScaler { fitted })
    }

    pub fn n_features(&self) -> usize {
        self.fitted.offsets().len()
    }

    pub fn means(&self) -> &Array1<f64> {
        self.fitted.offsets()
    }

    /// Population standard deviations; zero-variance columns report 1.0
    pub fn std_devs(&self) -> Array1<f64> {
        self.fitted.scales().mapv(|scale| 1.0 / scale)
    }

    /// Apply the fitted parameters to a matrix with the same columns
    pub fn transform(&self, features: ArrayView2<f64>) -> crate::Result<Array2<f64>> {
        if features.ncols() != self.n_features() {
            anyhow::bail!(
                "Scaler was fitted on {} features but got {}",
                self.n_features(),
                features.ncols()
            );
        }
        Ok(self.fitted.transform(features.to_owned()))
    }
}

/// Fit on `features` and return the scaled matrix together with the scaler
pub fn standardize(features: &Array2<f64>) -> crate::Result<(Array2<f64>, StandardScaler)> {
    let scaler = StandardScaler::fit(features)?;
    let scaled = scaler.transform(features.view())?;
    Ok((scaled, scaler))
}
