// Standard-score normalization fitted over a corpus matrix

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use super::features::FeatureVector;

/// Columns with a standard deviation below this are treated as constant.
const MIN_STD: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("cannot fit a normalizer on an empty corpus")]
    EmptyCorpus,

    #[error("corpus matrix contains a non-finite value at row {row}, column {column}")]
    NonFinite { row: usize, column: usize },
}

/// Per-dimension mean and standard deviation.
///
/// Only produced by [`Normalizer::fit`], [`NormalizationModel::identity`] or
/// deserialization of a model that was fitted earlier, so an unfitted model
/// cannot be used to transform anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationModel {
    mean: Array1<f64>,
    std: Array1<f64>,
    /// Rows the model was fitted on; 0 for the identity model
    samples: usize,
}

pub struct Normalizer;

impl Normalizer {
    /// Fit mean and population standard deviation for every column.
    ///
    /// Uses Welford's one-pass update per column.
    pub fn fit(corpus: &Array2<f64>) -> Result<NormalizationModel, NormalizeError> {
        let (rows, cols) = corpus.dim();
        if rows == 0 {
            return Err(NormalizeError::EmptyCorpus);
        }

        let mut mean = Array1::<f64>::zeros(cols);
        let mut m2 = Array1::<f64>::zeros(cols);

        for (i, row) in corpus.axis_iter(Axis(0)).enumerate() {
            let n = (i + 1) as f64;
            for (j, &x) in row.iter().enumerate() {
                if !x.is_finite() {
                    return Err(NormalizeError::NonFinite { row: i, column: j });
                }
                let delta = x - mean[j];
                mean[j] += delta / n;
                m2[j] += delta * (x - mean[j]);
            }
        }

        let std = m2.mapv(|v| (v / rows as f64).max(0.0).sqrt());
        Ok(NormalizationModel { mean, std, samples: rows })
    }
}

impl NormalizationModel {
    /// Mean 0, standard deviation 1 in every dimension. Stands in for a
    /// fitted model when the corpus is empty.
    pub fn identity(dimensions: usize) -> Self {
        Self {
            mean: Array1::zeros(dimensions),
            std: Array1::ones(dimensions),
            samples: 0,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.mean.len()
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }

    /// Standard-score one vector.
    ///
    /// # Panics
    /// If the vector's length differs from the model's dimensionality.
    pub fn transform(&self, vector: &FeatureVector) -> Array1<f64> {
        self.transform_view(ArrayView1::from(&vector.0[..]))
    }

    /// Standard-score one row of raw values.
    ///
    /// # Panics
    /// If the row's length differs from the model's dimensionality.
    pub fn transform_view(&self, row: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(
            row.len(),
            self.dimensions(),
            "vector has {} dimensions but the normalization model has {}",
            row.len(),
            self.dimensions()
        );
        Array1::from_iter(
            row.iter()
                .zip(self.mean.iter().zip(self.std.iter()))
                .map(|(&x, (&m, &s))| standard_score(x, m, s)),
        )
    }

    /// Standard-score every row of a matrix.
    ///
    /// # Panics
    /// If the column count differs from the model's dimensionality.
    pub fn transform_matrix(&self, matrix: &Array2<f64>) -> Array2<f64> {
        assert_eq!(
            matrix.ncols(),
            self.dimensions(),
            "matrix has {} columns but the normalization model has {}",
            matrix.ncols(),
            self.dimensions()
        );
        let mut out = matrix.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            for (j, x) in row.iter_mut().enumerate() {
                *x = standard_score(*x, self.mean[j], self.std[j]);
            }
        }
        out
    }
}

fn standard_score(x: f64, mean: f64, std: f64) -> f64 {
    if std < MIN_STD {
        0.0
    } else {
        (x - mean) / std
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fit_matches_population_statistics() {
        let corpus = array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0], [6.0, 10.0]];
        let model = Normalizer::fit(&corpus).unwrap();

        assert!((model.mean()[0] - 3.0).abs() < 1e-12);
        // population variance of [1,2,3,6] = (4+1+0+9)/4 = 3.5
        assert!((model.std()[0] - 3.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(model.std()[1], 0.0);
        assert_eq!(model.samples(), 4);
    }

    #[test]
    fn zero_variance_column_maps_to_zero() {
        let corpus = array![[1.0, 5.0], [3.0, 5.0]];
        let model = Normalizer::fit(&corpus).unwrap();
        let out = model.transform_matrix(&corpus);
        assert_eq!(out[[0, 1]], 0.0);
        assert_eq!(out[[1, 1]], 0.0);
        assert!((out[[0, 0]] + 1.0).abs() < 1e-12);
        assert!((out[[1, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn transformed_columns_have_zero_mean_unit_std() {
        let corpus = array![[1.0, -4.0], [2.0, 0.5], [7.0, 3.0], [4.0, 9.0], [0.5, 1.0]];
        let model = Normalizer::fit(&corpus).unwrap();
        let refit = Normalizer::fit(&model.transform_matrix(&corpus)).unwrap();
        for j in 0..2 {
            assert!(refit.mean()[j].abs() < 1e-9);
            assert!((refit.std()[j] - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn fit_is_deterministic() {
        let corpus = array![[0.3, 1.7], [2.2, -0.4], [5.1, 3.3]];
        assert_eq!(Normalizer::fit(&corpus).unwrap(), Normalizer::fit(&corpus).unwrap());
    }

    #[test]
    fn empty_corpus_cannot_be_fitted() {
        let corpus = Array2::<f64>::zeros((0, 10));
        assert_eq!(Normalizer::fit(&corpus), Err(NormalizeError::EmptyCorpus));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let corpus = array![[1.0, f64::NAN]];
        assert_eq!(
            Normalizer::fit(&corpus),
            Err(NormalizeError::NonFinite { row: 0, column: 1 })
        );
    }

    #[test]
    fn identity_leaves_values_unchanged() {
        let model = NormalizationModel::identity(3);
        let row = array![1.5, -2.0, 0.0];
        assert_eq!(model.transform_view(row.view()), row);
    }

    #[test]
    #[should_panic(expected = "dimensions")]
    fn mismatched_dimensions_panic() {
        let model = NormalizationModel::identity(3);
        let row = array![1.0, 2.0];
        model.transform_view(row.view());
    }
}
