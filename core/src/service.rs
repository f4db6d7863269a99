use std::path::Path;

use anyhow::{Result, bail};
use chrono::{Local, NaiveDate};

use crate::csv_io::{self, WearableImportSummary};
use crate::db::Database;
use crate::forecast::{
    self, CovariateSeries, Forecast, ForecastOptions, MetricSeries, ModelKind, SeriesPoint,
    WEIGHT_METRIC,
};
use crate::models::{
    BodyMetrics, CachedFood, MacroTotals, MealItem, MealLog, MealTemplate, NewBodyMetrics,
    NewSimulation, NewWearableRecord, SimAction, SimulationEntry, WearableRecord, calculate_bmi,
    quantity_in_grams, validate_body_metrics, validate_meal_items, validate_unit,
    validate_wearable,
};
use crate::openfoodfacts::NutritionFacts;

/// Platform-native nutrition lookup.
///
/// The server implements this with reqwest against OpenFoodFacts; tests use
/// an in-memory mock. A lookup that fails or finds nothing both surface as
/// `None` to callers: no nutrition data available is a normal state.
pub trait NutritionLookupProvider: Send + Sync {
    fn lookup(&self, food_name: &str) -> Result<Option<NutritionFacts>>;
}

/// Metrics the dashboards chart and forecast.
pub const FORECAST_METRICS: &[&str] = &["weight", "fat_percent"];

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub action: SimAction,
    pub food: String,
    pub quantity: f64,
    pub unit: String,
    pub model: ModelKind,
    pub horizon_days: u32,
}

#[derive(Debug)]
pub struct SimulationOutcome {
    pub entry: SimulationEntry,
    pub baseline: Forecast,
    pub simulated: Forecast,
}

/// Macro estimation for foods with no nutrition data is intentionally left
/// unimplemented rather than guessed at; callers should treat items without
/// lookup results as unresolved.
pub fn estimate_macros_without_lookup(_items: &[MealItem]) -> Result<MacroTotals> {
    bail!("Macro estimation without a nutrition source is not implemented")
}

pub struct TrackerService {
    db: Database,
}

impl TrackerService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    // --- Body metrics ---

    /// Save a body-metrics entry, overwriting any entry for the same date.
    /// BMI is derived from weight and height when the caller did not supply
    /// one.
    pub fn save_body_metrics(&self, metrics: &NewBodyMetrics) -> Result<BodyMetrics> {
        validate_body_metrics(metrics)?;
        let mut metrics = metrics.clone();
        if metrics.bmi.is_none() {
            if let (Some(weight), Some(height_cm)) = (metrics.weight, metrics.height_cm) {
                metrics.bmi = calculate_bmi(weight, height_cm);
            }
        }
        self.db.upsert_body_metrics(&metrics)
    }

    pub fn get_body_metrics(&self, date: NaiveDate) -> Result<Option<BodyMetrics>> {
        self.db.get_body_metrics(date)
    }

    pub fn metrics_history(&self, days: Option<i64>) -> Result<Vec<BodyMetrics>> {
        self.db.get_body_metrics_history(days)
    }

    // --- Wearables ---

    pub fn save_wearable(&self, record: &NewWearableRecord) -> Result<WearableRecord> {
        validate_wearable(record)?;
        self.db.upsert_wearable(record)
    }

    pub fn wearable_history(&self) -> Result<Vec<WearableRecord>> {
        self.db.get_wearable_history()
    }

    pub fn import_wearable_csv(&self, csv_data: &str) -> Result<WearableImportSummary> {
        let rows = csv_io::parse_wearable_csv(csv_data.as_bytes())?;
        csv_io::import_wearable_rows(&self.db, &rows)
    }

    // --- Meal templates ---

    pub fn save_template(&self, name: &str, items: &[MealItem]) -> Result<MealTemplate> {
        if name.trim().is_empty() {
            bail!("Template name must not be empty");
        }
        validate_meal_items(items)?;
        self.db.save_template(name, items)
    }

    pub fn get_template(&self, name: &str) -> Result<Option<MealTemplate>> {
        self.db.get_template(name)
    }

    pub fn list_templates(&self) -> Result<Vec<MealTemplate>> {
        self.db.list_templates()
    }

    pub fn delete_template(&self, name: &str) -> Result<bool> {
        self.db.delete_template(name)
    }

    // --- Food cache and lookup ---

    pub fn cached_food(&self, name: &str) -> Result<Option<CachedFood>> {
        self.db.get_cached_food(name)
    }

    pub fn cache_food(&self, name: &str, facts: NutritionFacts) -> Result<CachedFood> {
        self.db.upsert_cached_food(&facts.into_cached(name))
    }

    pub fn list_cached_foods(&self) -> Result<Vec<CachedFood>> {
        self.db.list_cached_foods()
    }

    /// Resolve a food's nutrition: local cache first, then the provider,
    /// caching any hit. Lookup failures degrade to "no nutrition data".
    pub fn resolve_food(
        &self,
        provider: &dyn NutritionLookupProvider,
        name: &str,
    ) -> Result<Option<CachedFood>> {
        if let Some(cached) = self.db.get_cached_food(name)? {
            return Ok(Some(cached));
        }
        let facts = match provider.lookup(name) {
            Ok(facts) => facts,
            Err(_) => None,
        };
        match facts {
            Some(facts) => Ok(Some(self.cache_food(name, facts)?)),
            None => Ok(None),
        }
    }

    /// Macro totals for a list of meal items. Items with no nutrition data
    /// contribute nothing and are returned by name.
    pub fn nutrition_for_items(
        &self,
        provider: &dyn NutritionLookupProvider,
        items: &[MealItem],
    ) -> Result<(MacroTotals, Vec<String>)> {
        let mut totals = MacroTotals::default();
        let mut unresolved = Vec::new();
        for item in items {
            match self.resolve_food(provider, &item.food)? {
                Some(food) => {
                    let grams = quantity_in_grams(item.quantity, &item.unit);
                    totals.add_food(&food, grams);
                }
                None => unresolved.push(item.food.clone()),
            }
        }
        Ok((totals.rounded(), unresolved))
    }

    // --- Meal logging ---

    /// Log a meal: compute macro totals for its items and append a log
    /// entry. Returns the entry along with any item names that had no
    /// nutrition data.
    pub fn log_meal(
        &self,
        provider: &dyn NutritionLookupProvider,
        name: &str,
        items: &[MealItem],
        date: Option<NaiveDate>,
    ) -> Result<(MealLog, Vec<String>)> {
        validate_meal_items(items)?;
        let (nutrition, unresolved) = self.nutrition_for_items(provider, items)?;
        let log = self.log_meal_prepared(name, items, &nutrition, date)?;
        Ok((log, unresolved))
    }

    /// Append a meal log whose nutrition was already computed.
    pub fn log_meal_prepared(
        &self,
        name: &str,
        items: &[MealItem],
        nutrition: &MacroTotals,
        date: Option<NaiveDate>,
    ) -> Result<MealLog> {
        let name = if name.trim().is_empty() {
            "Unnamed Meal"
        } else {
            name
        };
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        self.db.insert_meal_log(name, items, nutrition, date)
    }

    pub fn meal_logs(&self) -> Result<Vec<MealLog>> {
        self.db.get_meal_logs()
    }

    // --- Forecasting ---

    /// Fit and extrapolate the tracked metric series, using whatever
    /// covariates (daily calories, wearable readings) exist.
    pub fn predict_trends(&self, options: &ForecastOptions) -> Result<Forecast> {
        let metrics = self.metric_series()?;
        let covariates = self.covariate_series()?;
        Ok(forecast::extrapolate(&metrics, &covariates, options))
    }

    fn metric_series(&self) -> Result<Vec<MetricSeries>> {
        let history = self.db.get_body_metrics_history(None)?;
        let series = FORECAST_METRICS
            .iter()
            .map(|&name| {
                let points = history
                    .iter()
                    .filter_map(|row| {
                        let value = match name {
                            "weight" => row.weight,
                            "fat_percent" => row.fat_percent,
                            _ => None,
                        }?;
                        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").ok()?;
                        Some(SeriesPoint { date, value })
                    })
                    .collect();
                MetricSeries {
                    name: name.to_string(),
                    points,
                }
            })
            .collect();
        Ok(series)
    }

    fn covariate_series(&self) -> Result<Vec<CovariateSeries>> {
        let mut covariates = Vec::new();

        let calorie_points: Vec<SeriesPoint> = self
            .db
            .get_daily_calorie_totals()?
            .into_iter()
            .filter_map(|(date, calories)| {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
                Some(SeriesPoint {
                    date,
                    value: calories,
                })
            })
            .collect();
        if !calorie_points.is_empty() {
            covariates.push(CovariateSeries {
                name: "calories".to_string(),
                points: calorie_points,
            });
        }

        let wearables = self.db.get_wearable_history()?;
        #[allow(clippy::cast_precision_loss)]
        let readings: [(&str, Box<dyn Fn(&WearableRecord) -> Option<f64>>); 4] = [
            ("sleep_hours", Box::new(|r| r.sleep_hours)),
            ("steps", Box::new(|r| r.steps.map(|s| s as f64))),
            ("heart_rate_avg", Box::new(|r| r.heart_rate_avg)),
            ("spo2_avg", Box::new(|r| r.spo2_avg)),
        ];
        for (name, read) in readings {
            let points: Vec<SeriesPoint> = wearables
                .iter()
                .filter_map(|row| {
                    let value = read(row)?;
                    let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").ok()?;
                    Some(SeriesPoint { date, value })
                })
                .collect();
            if !points.is_empty() {
                covariates.push(CovariateSeries {
                    name: name.to_string(),
                    points,
                });
            }
        }

        Ok(covariates)
    }

    // --- Simulations ---

    /// Run a what-if dietary intervention: price the caloric change of the
    /// food, append it to the ledger, and forecast with and without the
    /// change applied.
    pub fn simulate(
        &self,
        provider: &dyn NutritionLookupProvider,
        request: &SimulationRequest,
    ) -> Result<SimulationOutcome> {
        if request.food.trim().is_empty() {
            bail!("Food name must not be empty");
        }
        if request.quantity <= 0.0 {
            bail!("Quantity must be greater than 0");
        }
        let unit = validate_unit(&request.unit)?;

        let Some(food) = self.resolve_food(provider, &request.food)? else {
            bail!("No nutrition data available for '{}'", request.food);
        };

        let grams = quantity_in_grams(request.quantity, &unit);
        let caloric_change = request.action.signed(food.calories_per_100g * grams / 100.0);

        let entry = self.record_simulation(
            request.action,
            &food.name,
            request.quantity,
            &unit,
            caloric_change,
            i64::from(request.horizon_days),
        )?;

        let baseline_options = ForecastOptions {
            horizon_days: request.horizon_days,
            model: request.model,
            calorie_offset_kcal: 0.0,
        };
        let simulated_options = ForecastOptions {
            calorie_offset_kcal: caloric_change,
            ..baseline_options.clone()
        };

        Ok(SimulationOutcome {
            entry,
            baseline: self.predict_trends(&baseline_options)?,
            simulated: self.predict_trends(&simulated_options)?,
        })
    }

    /// Append one intervention to the ledger.
    pub fn record_simulation(
        &self,
        action: SimAction,
        food: &str,
        quantity: f64,
        unit: &str,
        caloric_change: f64,
        duration_days: i64,
    ) -> Result<SimulationEntry> {
        self.db.insert_simulation(&NewSimulation {
            action,
            food: food.to_string(),
            quantity,
            unit: unit.to_string(),
            caloric_change,
            duration_days,
        })
    }

    pub fn simulation_history(&self) -> Result<Vec<SimulationEntry>> {
        self.db.get_simulation_history()
    }

    /// CSV text for a forecast's simulated weight series, or `None` when
    /// there is no weight series to export.
    pub fn simulated_weight_csv(&self, forecast: &Forecast) -> Result<Option<String>> {
        let Some(weight) = forecast.metric(WEIGHT_METRIC) else {
            return Ok(None);
        };
        let mut out = Vec::new();
        csv_io::write_simulated_weight_csv(&mut out, &weight.points)?;
        Ok(Some(String::from_utf8(out)?))
    }
}
