use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::{Days, NaiveDate};
use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::regression::{GradientBoostedModel, LinearModel, Regressor};

/// Energy density of body mass used to turn a daily caloric surplus or
/// deficit into a weight delta. A deliberate simplification: no metabolic
/// adaptation is modeled.
pub const KCAL_PER_KG: f64 = 7700.0;

/// The one metric a caloric offset applies to.
pub const WEIGHT_METRIC: &str = "weight";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// An observed time series for one tracked metric. Points carry only the
/// dates where the metric was actually recorded.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    pub name: String,
    pub points: Vec<SeriesPoint>,
}

/// An auxiliary daily series (caloric intake, sleep hours, steps, heart
/// rate, SpO2) used as a regression covariate where available.
#[derive(Debug, Clone)]
pub struct CovariateSeries {
    pub name: String,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    #[default]
    Linear,
    GradientBoosted,
}

impl ModelKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "gbt" | "gradient_boosted" | "gradient-boosted" => Ok(Self::GradientBoosted),
            _ => bail!("Invalid model '{s}'. Must be 'linear' or 'gradient_boosted'"),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::GradientBoosted => "gradient_boosted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastOptions {
    pub horizon_days: u32,
    pub model: ModelKind,
    /// Hypothetical daily caloric surplus (+) or deficit (-) in kcal,
    /// applied to forecasted weight only.
    pub calorie_offset_kcal: f64,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            model: ModelKind::Linear,
            calorie_offset_kcal: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricForecast {
    pub metric: String,
    pub points: Vec<SeriesPoint>,
}

/// Outcome of a forecast request. Too little data is a normal state, not an
/// error.
#[derive(Debug, Clone)]
pub enum Forecast {
    InsufficientData,
    Predicted(Vec<MetricForecast>),
}

impl Forecast {
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&MetricForecast> {
        match self {
            Self::InsufficientData => None,
            Self::Predicted(series) => series.iter().find(|f| f.metric == name),
        }
    }
}

/// Forecast each metric for the `horizon_days` calendar days following the
/// last observation.
///
/// Each metric is fit independently against whole days elapsed since the
/// earliest observed date, plus any supplied covariates. A metric with fewer
/// than two observations yields no forecast. Future covariate values take
/// the historical mean of the (filled) column rather than a forecast of the
/// covariate itself, a known approximation.
#[must_use]
pub fn extrapolate(
    metrics: &[MetricSeries],
    covariates: &[CovariateSeries],
    options: &ForecastOptions,
) -> Forecast {
    // Date grid: union of all observation dates, ascending.
    let mut grid: Vec<NaiveDate> = metrics
        .iter()
        .flat_map(|m| m.points.iter().map(|p| p.date))
        .collect();
    grid.sort_unstable();
    grid.dedup();

    let (Some(&earliest), Some(&last)) = (grid.first(), grid.last()) else {
        return Forecast::InsufficientData;
    };

    let grid_index: BTreeMap<NaiveDate, usize> =
        grid.iter().enumerate().map(|(i, &d)| (d, i)).collect();
    #[allow(clippy::cast_precision_loss)]
    let day_of = |date: NaiveDate| (date - earliest).num_days() as f64;
    let last_day = day_of(last);

    // Covariates aligned to the grid, gaps filled forward, then backward,
    // then with zero. Future rows use the column mean.
    let filled: Vec<(Vec<f64>, f64)> = covariates
        .iter()
        .map(|cov| {
            let by_date: BTreeMap<NaiveDate, f64> =
                cov.points.iter().map(|p| (p.date, p.value)).collect();
            let mut column: Vec<Option<f64>> =
                grid.iter().map(|d| by_date.get(d).copied()).collect();
            fill_gaps(&mut column);
            let column: Vec<f64> = column.into_iter().map(|v| v.unwrap_or(0.0)).collect();
            #[allow(clippy::cast_precision_loss)]
            let mean = column.iter().sum::<f64>() / column.len() as f64;
            (column, mean)
        })
        .collect();

    let weight_offset = options.calorie_offset_kcal / KCAL_PER_KG;
    let horizon = options.horizon_days as usize;
    let n_features = 1 + filled.len();

    let mut forecasts = Vec::new();

    for series in metrics {
        let mut points = series.points.clone();
        points.sort_unstable_by_key(|p| p.date);
        if points.len() < 2 {
            continue;
        }

        let n = points.len();
        let mut x = Array2::<f64>::zeros((n, n_features));
        let mut y = Array1::<f64>::zeros(n);
        for (row, point) in points.iter().enumerate() {
            x[[row, 0]] = day_of(point.date);
            let idx = grid_index[&point.date];
            for (col, (column, _)) in filled.iter().enumerate() {
                x[[row, col + 1]] = column[idx];
            }
            y[row] = point.value;
        }

        let model: Box<dyn Regressor> = match options.model {
            ModelKind::Linear => Box::new(LinearModel::fit(&x, &y)),
            ModelKind::GradientBoosted => Box::new(GradientBoostedModel::fit(&x, &y)),
        };

        let mut future = Array2::<f64>::zeros((horizon, n_features));
        for h in 0..horizon {
            #[allow(clippy::cast_precision_loss)]
            let day = last_day + (h + 1) as f64;
            future[[h, 0]] = day;
            for (col, (_, mean)) in filled.iter().enumerate() {
                future[[h, col + 1]] = *mean;
            }
        }
        let predicted = model.predict(&future);

        let offset = if series.name == WEIGHT_METRIC {
            weight_offset
        } else {
            0.0
        };

        let points = (0..horizon)
            .map(|h| SeriesPoint {
                date: last + Days::new(h as u64 + 1),
                value: predicted[h] + offset,
            })
            .collect();

        forecasts.push(MetricForecast {
            metric: series.name.clone(),
            points,
        });
    }

    if forecasts.is_empty() {
        Forecast::InsufficientData
    } else {
        Forecast::Predicted(forecasts)
    }
}

/// Forward-fill, then backward-fill. Entries still `None` afterwards (an
/// all-empty column) are left for the caller's zero-fill.
fn fill_gaps(column: &mut [Option<f64>]) {
    let mut carry = None;
    for slot in column.iter_mut() {
        match slot {
            Some(v) => carry = Some(*v),
            None => *slot = carry,
        }
    }
    let mut carry = None;
    for slot in column.iter_mut().rev() {
        match slot {
            Some(v) => carry = Some(*v),
            None => *slot = carry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn series(name: &str, pairs: &[(i64, f64)]) -> MetricSeries {
        MetricSeries {
            name: name.to_string(),
            points: pairs
                .iter()
                .map(|&(offset, value)| SeriesPoint {
                    date: date(offset),
                    value,
                })
                .collect(),
        }
    }

    fn covariate(name: &str, pairs: &[(i64, f64)]) -> CovariateSeries {
        CovariateSeries {
            name: name.to_string(),
            points: pairs
                .iter()
                .map(|&(offset, value)| SeriesPoint {
                    date: date(offset),
                    value,
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        let forecast = extrapolate(&[], &[], &ForecastOptions::default());
        assert!(matches!(forecast, Forecast::InsufficientData));
    }

    #[test]
    fn test_single_observation_is_insufficient() {
        let metrics = vec![series(WEIGHT_METRIC, &[(0, 80.0)])];
        let forecast = extrapolate(&metrics, &[], &ForecastOptions::default());
        assert!(matches!(forecast, Forecast::InsufficientData));
    }

    #[test]
    fn test_short_metric_skipped_others_forecast() {
        let metrics = vec![
            series(WEIGHT_METRIC, &[(0, 80.0), (1, 79.8), (2, 79.5)]),
            series("fat_percent", &[(0, 22.0)]),
        ];
        let forecast = extrapolate(&metrics, &[], &ForecastOptions::default());
        assert!(forecast.metric(WEIGHT_METRIC).is_some());
        assert!(forecast.metric("fat_percent").is_none());
    }

    #[test]
    fn test_horizon_count_and_dates() {
        let metrics = vec![series(WEIGHT_METRIC, &[(0, 80.0), (3, 79.5), (7, 79.0)])];
        let options = ForecastOptions {
            horizon_days: 14,
            ..ForecastOptions::default()
        };
        let forecast = extrapolate(&metrics, &[], &options);

        let weight = forecast.metric(WEIGHT_METRIC).unwrap();
        assert_eq!(weight.points.len(), 14);
        assert_eq!(weight.points[0].date, date(8));
        for pair in weight.points.windows(2) {
            assert_eq!(pair[1].date, pair[0].date + chrono::Duration::days(1));
        }
    }

    #[test]
    fn test_linear_slope_example() {
        // slope ~ -0.25 kg/day
        let metrics = vec![series(WEIGHT_METRIC, &[(0, 80.0), (1, 79.8), (2, 79.5)])];
        let options = ForecastOptions {
            horizon_days: 3,
            ..ForecastOptions::default()
        };
        let forecast = extrapolate(&metrics, &[], &options);

        let weight = forecast.metric(WEIGHT_METRIC).unwrap();
        let values: Vec<f64> = weight.points.iter().map(|p| p.value).collect();
        assert!((values[0] - 79.25).abs() < 0.05);
        assert!((values[1] - 79.0).abs() < 0.05);
        assert!((values[2] - 78.75).abs() < 0.05);
    }

    #[test]
    fn test_calorie_offset_is_flat_and_exact() {
        let metrics = vec![
            series(WEIGHT_METRIC, &[(0, 80.0), (1, 79.8), (2, 79.5)]),
            series("fat_percent", &[(0, 22.0), (1, 21.9), (2, 21.7)]),
        ];
        let base_options = ForecastOptions {
            horizon_days: 7,
            ..ForecastOptions::default()
        };
        let offset_options = ForecastOptions {
            calorie_offset_kcal: 500.0,
            ..base_options.clone()
        };

        let base = extrapolate(&metrics, &[], &base_options);
        let shifted = extrapolate(&metrics, &[], &offset_options);

        let base_weight = base.metric(WEIGHT_METRIC).unwrap();
        let shifted_weight = shifted.metric(WEIGHT_METRIC).unwrap();
        for (a, b) in base_weight.points.iter().zip(&shifted_weight.points) {
            assert!((b.value - a.value - 500.0 / KCAL_PER_KG).abs() < 1e-12);
        }

        // Other metrics are untouched by the offset
        let base_fat = base.metric("fat_percent").unwrap();
        let shifted_fat = shifted.metric("fat_percent").unwrap();
        for (a, b) in base_fat.points.iter().zip(&shifted_fat.points) {
            assert!((b.value - a.value).abs() < 1e-12);
        }
    }

    #[test]
    fn test_deficit_of_one_kg_per_day() {
        let metrics = vec![series(WEIGHT_METRIC, &[(0, 80.0), (1, 79.8), (2, 79.5)])];
        let base_options = ForecastOptions {
            horizon_days: 10,
            ..ForecastOptions::default()
        };
        let deficit_options = ForecastOptions {
            calorie_offset_kcal: -7700.0,
            ..base_options.clone()
        };

        let base = extrapolate(&metrics, &[], &base_options);
        let shifted = extrapolate(&metrics, &[], &deficit_options);

        let base_weight = base.metric(WEIGHT_METRIC).unwrap();
        let shifted_weight = shifted.metric(WEIGHT_METRIC).unwrap();
        assert_eq!(shifted_weight.points.len(), 10);
        for (a, b) in base_weight.points.iter().zip(&shifted_weight.points) {
            assert!((a.value - b.value - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_offset_exact_for_gradient_boosted() {
        let metrics = vec![series(
            WEIGHT_METRIC,
            &[(0, 80.0), (1, 79.8), (2, 79.6), (3, 79.4), (4, 79.2)],
        )];
        let base_options = ForecastOptions {
            horizon_days: 5,
            model: ModelKind::GradientBoosted,
            calorie_offset_kcal: 0.0,
        };
        let offset_options = ForecastOptions {
            calorie_offset_kcal: -3850.0,
            ..base_options.clone()
        };

        let base = extrapolate(&metrics, &[], &base_options);
        let shifted = extrapolate(&metrics, &[], &offset_options);
        let base_weight = base.metric(WEIGHT_METRIC).unwrap();
        let shifted_weight = shifted.metric(WEIGHT_METRIC).unwrap();
        for (a, b) in base_weight.points.iter().zip(&shifted_weight.points) {
            assert!((a.value - b.value - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gradient_boosted_forecast_is_finite_and_bounded() {
        let metrics = vec![series(
            WEIGHT_METRIC,
            &[(0, 80.0), (1, 79.7), (2, 79.4), (3, 79.1), (4, 78.8)],
        )];
        let options = ForecastOptions {
            horizon_days: 7,
            model: ModelKind::GradientBoosted,
            calorie_offset_kcal: 0.0,
        };
        let forecast = extrapolate(&metrics, &[], &options);
        let weight = forecast.metric(WEIGHT_METRIC).unwrap();
        assert_eq!(weight.points.len(), 7);
        for p in &weight.points {
            assert!(p.value.is_finite());
            assert!(p.value > 77.0 && p.value < 81.0);
        }
    }

    #[test]
    fn test_covariates_do_not_break_forecast() {
        let metrics = vec![series(
            WEIGHT_METRIC,
            &[(0, 80.0), (2, 79.6), (4, 79.2), (6, 78.8)],
        )];
        // Sparse covariate: only two of four grid dates covered
        let covs = vec![
            covariate("calories", &[(2, 2100.0), (4, 1900.0)]),
            covariate("sleep_hours", &[]),
        ];
        let options = ForecastOptions {
            horizon_days: 5,
            ..ForecastOptions::default()
        };
        let forecast = extrapolate(&metrics, &covs, &options);
        let weight = forecast.metric(WEIGHT_METRIC).unwrap();
        assert_eq!(weight.points.len(), 5);
        for p in &weight.points {
            assert!(p.value.is_finite());
        }
    }

    #[test]
    fn test_missing_target_rows_excluded_per_metric() {
        // fat_percent is missing on day 1; weight still uses all three days,
        // fat_percent fits on its own two.
        let metrics = vec![
            series(WEIGHT_METRIC, &[(0, 80.0), (1, 79.8), (2, 79.6)]),
            series("fat_percent", &[(0, 22.0), (2, 21.8)]),
        ];
        let options = ForecastOptions {
            horizon_days: 2,
            ..ForecastOptions::default()
        };
        let forecast = extrapolate(&metrics, &[], &options);

        let fat = forecast.metric("fat_percent").unwrap();
        assert_eq!(fat.points.len(), 2);
        // Two-point fit: -0.1 per day from 21.8 at day 2
        assert!((fat.points[0].value - 21.7).abs() < 1e-9);
        assert!((fat.points[1].value - 21.6).abs() < 1e-9);
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!(ModelKind::parse("linear").unwrap(), ModelKind::Linear);
        assert_eq!(
            ModelKind::parse("gradient_boosted").unwrap(),
            ModelKind::GradientBoosted
        );
        assert_eq!(ModelKind::parse("GBT").unwrap(), ModelKind::GradientBoosted);
        assert!(ModelKind::parse("quadratic").is_err());
    }

    #[test]
    fn test_fill_gaps() {
        let mut column = vec![None, Some(2.0), None, None, Some(5.0), None];
        fill_gaps(&mut column);
        assert_eq!(
            column,
            vec![
                Some(2.0),
                Some(2.0),
                Some(2.0),
                Some(2.0),
                Some(5.0),
                Some(5.0)
            ]
        );

        let mut empty: Vec<Option<f64>> = vec![None, None];
        fill_gaps(&mut empty);
        assert_eq!(empty, vec![None, None]);
    }
}
