use ndarray::{Array1, Array2};

/// A fitted regression model. Feature matrices are row-per-observation,
/// column-per-feature; the intercept is handled internally.
pub trait Regressor {
    fn predict(&self, x: &Array2<f64>) -> Array1<f64>;
}

/// Ordinary least squares fit via the normal equations.
///
/// `weights[0]` is the intercept, `weights[1..]` the per-feature
/// coefficients. Linearly dependent columns (a constant covariate, say)
/// get a zero coefficient instead of blowing up the solve.
#[derive(Debug, Clone)]
pub struct LinearModel {
    weights: Array1<f64>,
}

impl LinearModel {
    #[must_use]
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Self {
        let n = x.nrows();
        let k = x.ncols() + 1;

        // Design matrix with a leading column of ones for the intercept.
        let mut design = Array2::<f64>::ones((n, k));
        for row in 0..n {
            for col in 0..x.ncols() {
                design[[row, col + 1]] = x[[row, col]];
            }
        }

        let mut normal = Array2::<f64>::zeros((k, k));
        let mut rhs = Array1::<f64>::zeros(k);
        for i in 0..k {
            for j in 0..k {
                let mut sum = 0.0;
                for row in 0..n {
                    sum += design[[row, i]] * design[[row, j]];
                }
                normal[[i, j]] = sum;
            }
            let mut sum = 0.0;
            for row in 0..n {
                sum += design[[row, i]] * y[row];
            }
            rhs[i] = sum;
        }

        let weights = solve_symmetric(&normal, &rhs);
        Self { weights }
    }

    #[must_use]
    pub fn predict_one(&self, features: &[f64]) -> f64 {
        let mut value = self.weights[0];
        for (j, f) in features.iter().enumerate() {
            value += self.weights[j + 1] * f;
        }
        value
    }
}

impl Regressor for LinearModel {
    fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(x.nrows());
        for row in 0..x.nrows() {
            let mut value = self.weights[0];
            for col in 0..x.ncols() {
                value += self.weights[col + 1] * x[[row, col]];
            }
            out[row] = value;
        }
        out
    }
}

/// Gauss-Jordan elimination with partial pivoting. Columns whose pivot falls
/// below the tolerance are treated as dependent and their unknown set to 0.
fn solve_symmetric(a: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = a.nrows();
    let mut m = a.clone();
    let mut rhs = b.clone();

    let scale = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tol = 1e-10 * scale.max(1.0);

    let mut pivot_of_col: Vec<Option<usize>> = vec![None; n];
    let mut row_used = vec![false; n];

    for col in 0..n {
        let mut pivot = None;
        let mut best = tol;
        for row in 0..n {
            if !row_used[row] && m[[row, col]].abs() > best {
                best = m[[row, col]].abs();
                pivot = Some(row);
            }
        }
        let Some(p) = pivot else { continue };
        row_used[p] = true;
        pivot_of_col[col] = Some(p);

        for row in 0..n {
            if row == p || m[[row, col]] == 0.0 {
                continue;
            }
            let factor = m[[row, col]] / m[[p, col]];
            for c in 0..n {
                m[[row, c]] -= factor * m[[p, c]];
            }
            rhs[row] -= factor * rhs[p];
        }
    }

    let mut solution = Array1::<f64>::zeros(n);
    for col in 0..n {
        if let Some(p) = pivot_of_col[col] {
            solution[col] = rhs[p] / m[[p, col]];
        }
    }
    solution
}

const N_ESTIMATORS: usize = 100;
const LEARNING_RATE: f64 = 0.1;

#[derive(Debug, Clone)]
struct Stump {
    feature: usize,
    threshold: f64,
    left: f64,
    right: f64,
}

impl Stump {
    fn predict_row(&self, x: &Array2<f64>, row: usize) -> f64 {
        if x[[row, self.feature]] <= self.threshold {
            self.left
        } else {
            self.right
        }
    }
}

/// Gradient boosting on depth-1 regression trees under squared error:
/// start from the target mean, then repeatedly fit a stump to the residuals
/// and add it with a shrinkage factor. Like any tree ensemble it predicts a
/// constant beyond the observed feature range.
#[derive(Debug, Clone)]
pub struct GradientBoostedModel {
    base: f64,
    stumps: Vec<Stump>,
}

impl GradientBoostedModel {
    #[must_use]
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Self {
        let n = x.nrows();
        #[allow(clippy::cast_precision_loss)]
        let base = y.sum() / n as f64;

        let mut predictions = Array1::<f64>::from_elem(n, base);
        let mut stumps = Vec::with_capacity(N_ESTIMATORS);

        for _ in 0..N_ESTIMATORS {
            let residuals = y - &predictions;
            let stump = best_stump(x, &residuals);
            for row in 0..n {
                predictions[row] += LEARNING_RATE * stump.predict_row(x, row);
            }
            stumps.push(stump);
        }

        Self { base, stumps }
    }
}

impl Regressor for GradientBoostedModel {
    fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::from_elem(x.nrows(), self.base);
        for stump in &self.stumps {
            for row in 0..x.nrows() {
                out[row] += LEARNING_RATE * stump.predict_row(x, row);
            }
        }
        out
    }
}

/// Exhaustive best split over all features and midpoint thresholds,
/// minimizing the summed squared error of the two leaf means. Falls back to
/// a single-leaf stump when every feature is constant.
fn best_stump(x: &Array2<f64>, residuals: &Array1<f64>) -> Stump {
    let n = x.nrows();
    #[allow(clippy::cast_precision_loss)]
    let mean = residuals.sum() / n as f64;

    let mut best: Option<(f64, Stump)> = None;

    for feature in 0..x.ncols() {
        let mut values: Vec<f64> = (0..n).map(|row| x[[row, feature]]).collect();
        values.sort_by(f64::total_cmp);
        values.dedup();
        if values.len() < 2 {
            continue;
        }

        for pair in values.windows(2) {
            let threshold = (pair[0] + pair[1]) / 2.0;

            let mut left_sum = 0.0;
            let mut left_n = 0usize;
            let mut right_sum = 0.0;
            let mut right_n = 0usize;
            for row in 0..n {
                if x[[row, feature]] <= threshold {
                    left_sum += residuals[row];
                    left_n += 1;
                } else {
                    right_sum += residuals[row];
                    right_n += 1;
                }
            }
            #[allow(clippy::cast_precision_loss)]
            let left = left_sum / left_n as f64;
            #[allow(clippy::cast_precision_loss)]
            let right = right_sum / right_n as f64;

            let mut sse = 0.0;
            for row in 0..n {
                let fit = if x[[row, feature]] <= threshold {
                    left
                } else {
                    right
                };
                let diff = residuals[row] - fit;
                sse += diff * diff;
            }

            if best.as_ref().is_none_or(|(best_sse, _)| sse < *best_sse) {
                best = Some((
                    sse,
                    Stump {
                        feature,
                        threshold,
                        left,
                        right,
                    },
                ));
            }
        }
    }

    best.map_or(
        Stump {
            feature: 0,
            threshold: f64::INFINITY,
            left: mean,
            right: mean,
        },
        |(_, stump)| stump,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_exact_line() {
        // y = 1 + 2x
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];
        let model = LinearModel::fit(&x, &y);

        let preds = model.predict(&array![[4.0], [10.0]]);
        assert!((preds[0] - 9.0).abs() < 1e-9);
        assert!((preds[1] - 21.0).abs() < 1e-9);
        assert!((model.predict_one(&[5.0]) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_two_points() {
        let x = array![[0.0], [1.0]];
        let y = array![80.0, 79.8];
        let model = LinearModel::fit(&x, &y);
        assert!((model.predict_one(&[2.0]) - 79.6).abs() < 1e-9);
    }

    #[test]
    fn test_linear_multivariate() {
        // y = 1 + 2a + 3b
        let x = array![
            [0.0, 0.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [2.0, 1.0],
            [3.0, 2.0],
        ];
        let y = array![1.0, 3.0, 4.0, 8.0, 13.0];
        let model = LinearModel::fit(&x, &y);
        assert!((model.predict_one(&[4.0, 3.0]) - 18.0).abs() < 1e-8);
    }

    #[test]
    fn test_linear_constant_covariate_ignored() {
        // Second column carries no information; fit must still recover the
        // trend in the first.
        let x = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let y = array![10.0, 12.0, 14.0, 16.0];
        let model = LinearModel::fit(&x, &y);
        assert!((model.predict_one(&[4.0, 5.0]) - 18.0).abs() < 1e-8);
    }

    #[test]
    fn test_linear_degenerate_falls_back_to_mean() {
        // All observations share one x: slope is unidentifiable, so the
        // solve zeroes it and the prediction is the mean.
        let x = array![[2.0], [2.0], [2.0]];
        let y = array![1.0, 2.0, 3.0];
        let model = LinearModel::fit(&x, &y);
        assert!((model.predict_one(&[7.0]) - 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_linear_noisy_slope() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.1, 0.9, 2.1, 2.9, 4.1, 4.9];
        let model = LinearModel::fit(&x, &y);
        let pred = model.predict_one(&[6.0]);
        assert!((pred - 6.0).abs() < 0.2);
    }

    #[test]
    fn test_gbt_fits_step_function() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [10.0], [11.0], [12.0], [13.0]];
        let y = array![1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 5.0, 5.0];
        let model = GradientBoostedModel::fit(&x, &y);
        let preds = model.predict(&x);
        for row in 0..4 {
            assert!((preds[row] - 1.0).abs() < 0.05);
        }
        for row in 4..8 {
            assert!((preds[row] - 5.0).abs() < 0.05);
        }
    }

    #[test]
    fn test_gbt_extrapolates_constant() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![80.0, 79.5, 79.0, 78.5];
        let model = GradientBoostedModel::fit(&x, &y);
        let far = model.predict(&array![[50.0], [500.0]]);
        // Trees saturate past the training range
        assert!((far[0] - far[1]).abs() < 1e-9);
        assert!(far[0].is_finite());
    }

    #[test]
    fn test_gbt_constant_features_predicts_mean() {
        let x = array![[1.0], [1.0], [1.0], [1.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let model = GradientBoostedModel::fit(&x, &y);
        let preds = model.predict(&x);
        for row in 0..4 {
            assert!((preds[row] - 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_gbt_reduces_error_over_base() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![80.0, 79.7, 79.4, 79.2, 78.9, 78.6];
        #[allow(clippy::cast_precision_loss)]
        let base = y.sum() / y.len() as f64;
        let base_sse: f64 = y.iter().map(|v| (v - base).powi(2)).sum();

        let model = GradientBoostedModel::fit(&x, &y);
        let preds = model.predict(&x);
        let sse: f64 = y
            .iter()
            .zip(preds.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        assert!(sse < base_sse / 10.0);
    }
}
