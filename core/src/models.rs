use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One body-metrics row, keyed by calendar date. Saving a second row for the
/// same date overwrites the first (last write wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyMetrics {
    pub date: String,
    pub weight: Option<f64>,
    pub height_cm: Option<f64>,
    pub bmi: Option<f64>,
    pub fat_percent: Option<f64>,
    pub waist_cm: Option<f64>,
    pub biceps_cm: Option<f64>,
    pub lats_cm: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewBodyMetrics {
    pub date: NaiveDate,
    pub weight: Option<f64>,
    pub height_cm: Option<f64>,
    pub bmi: Option<f64>,
    pub fat_percent: Option<f64>,
    pub waist_cm: Option<f64>,
    pub biceps_cm: Option<f64>,
    pub lats_cm: Option<f64>,
}

/// One wearable-data row, keyed by calendar date, last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WearableRecord {
    pub date: String,
    pub heart_rate_avg: Option<f64>,
    pub spo2_avg: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub steps: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewWearableRecord {
    pub date: NaiveDate,
    pub heart_rate_avg: Option<f64>,
    pub spo2_avg: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub steps: Option<i64>,
}

/// One food line in a meal or a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealItem {
    pub food: String,
    pub quantity: f64,
    pub unit: String,
}

/// A named, reusable list of food items. Saving under an existing name
/// silently replaces the stored item list.
#[derive(Debug, Clone, Serialize)]
pub struct MealTemplate {
    pub name: String,
    pub items: Vec<MealItem>,
    pub created_at: String,
    pub updated_at: String,
}

/// Macro totals for a logged meal, in kcal and grams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacroTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl MacroTotals {
    /// Accumulate one food's contribution for a given gram amount.
    pub fn add_food(&mut self, food: &CachedFood, grams: f64) {
        self.calories += food.calories_per_100g * grams / 100.0;
        self.protein += food.protein_per_100g.unwrap_or(0.0) * grams / 100.0;
        self.carbs += food.carbs_per_100g.unwrap_or(0.0) * grams / 100.0;
        self.fat += food.fat_per_100g.unwrap_or(0.0) * grams / 100.0;
    }

    #[must_use]
    pub fn rounded(&self) -> Self {
        let r = |v: f64| (v * 100.0).round() / 100.0;
        Self {
            calories: r(self.calories),
            protein: r(self.protein),
            carbs: r(self.carbs),
            fat: r(self.fat),
        }
    }
}

/// An appended meal-log entry: name, items, computed macro totals, timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct MealLog {
    pub id: i64,
    pub name: String,
    pub items: Vec<MealItem>,
    pub nutrition: MacroTotals,
    pub date: String,
    pub logged_at: String,
}

/// Direction of a hypothetical dietary intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimAction {
    Add,
    Remove,
}

impl SimAction {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            _ => bail!("Invalid action '{s}'. Must be 'add' or 'remove'"),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }

    /// Apply the action's sign to a caloric magnitude: added food is a
    /// surplus, removed food a deficit.
    #[must_use]
    pub fn signed(self, kcal: f64) -> f64 {
        match self {
            Self::Add => kcal,
            Self::Remove => -kcal,
        }
    }
}

/// One simulation-ledger row. Entries are never mutated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationEntry {
    pub id: i64,
    pub date: String,
    pub action: String,
    pub food: String,
    pub quantity: f64,
    pub unit: String,
    pub caloric_change: f64,
    pub duration_days: i64,
}

#[derive(Debug, Clone)]
pub struct NewSimulation {
    pub action: SimAction,
    pub food: String,
    pub quantity: f64,
    pub unit: String,
    pub caloric_change: f64,
    pub duration_days: i64,
}

/// A locally cached nutrition lookup result, keyed by lowercased food name.
#[derive(Debug, Clone, Serialize)]
pub struct CachedFood {
    pub name: String,
    pub calories_per_100g: f64,
    pub protein_per_100g: Option<f64>,
    pub carbs_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewCachedFood {
    pub name: String,
    pub calories_per_100g: f64,
    pub protein_per_100g: Option<f64>,
    pub carbs_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
    pub source: String,
}

/// BMI from weight in kg and height in cm, rounded to 2 decimals.
/// Returns `None` unless both inputs are positive.
#[must_use]
pub fn calculate_bmi(weight_kg: f64, height_cm: f64) -> Option<f64> {
    if weight_kg <= 0.0 || height_cm <= 0.0 {
        return None;
    }
    let height_m = height_cm / 100.0;
    Some((weight_kg / (height_m * height_m) * 100.0).round() / 100.0)
}

/// Convert a quantity with a unit to grams.
/// Volume-based conversions assume water density (1 ml = 1 g).
/// Returns `(grams, is_approximate)` where `is_approximate` is true for volume conversions.
#[must_use]
pub fn convert_to_grams(quantity: f64, unit: &str) -> Option<(f64, bool)> {
    let lower = unit.to_lowercase();
    match lower.as_str() {
        "g" | "gm" | "gram" | "grams" => Some((quantity, false)),
        "kg" | "kilogram" | "kilograms" => Some((quantity * 1000.0, false)),
        "lb" | "lbs" | "pound" | "pounds" => Some((quantity * 454.0, false)),
        "oz" | "ounce" | "ounces" => Some((quantity * 28.35, false)),
        "tbsp" | "tablespoon" | "tablespoons" => Some((quantity * 15.0, true)),
        "tsp" | "teaspoon" | "teaspoons" => Some((quantity * 5.0, true)),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => {
            Some((quantity, true))
        }
        "l" | "liter" | "liters" | "litre" | "litres" => Some((quantity * 1000.0, true)),
        _ => None,
    }
}

/// Gram equivalent for nutrition math. Count units (piece, slice, cup) have
/// no weight conversion; their quantity is taken at face value, matching how
/// per-100g figures are applied to unweighed portions.
#[must_use]
pub fn quantity_in_grams(quantity: f64, unit: &str) -> f64 {
    convert_to_grams(quantity, unit).map_or(quantity, |(g, _)| g)
}

pub const UNIT_OPTIONS: &[&str] = &[
    "g", "gm", "ml", "tbsp", "tsp", "cup", "piece", "slice", "oz",
];

pub fn validate_unit(unit: &str) -> Result<String> {
    let lower = unit.to_lowercase();
    if UNIT_OPTIONS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid unit '{unit}'. Must be one of: {}",
            UNIT_OPTIONS.join(", ")
        )
    }
}

/// Validate a meal item list: every food named, every quantity positive,
/// every unit known.
pub fn validate_meal_items(items: &[MealItem]) -> Result<()> {
    if items.is_empty() {
        bail!("Meal must contain at least one item");
    }
    for item in items {
        if item.food.trim().is_empty() {
            bail!("Food name must not be empty");
        }
        if item.quantity <= 0.0 {
            bail!("Quantity for '{}' must be greater than 0", item.food);
        }
        validate_unit(&item.unit)?;
    }
    Ok(())
}

/// Validate a body-metrics entry: at least one measurement present, and every
/// present measurement in a plausible range.
pub fn validate_body_metrics(metrics: &NewBodyMetrics) -> Result<()> {
    if metrics.weight.is_none()
        && metrics.height_cm.is_none()
        && metrics.fat_percent.is_none()
        && metrics.waist_cm.is_none()
        && metrics.biceps_cm.is_none()
        && metrics.lats_cm.is_none()
    {
        bail!("At least one measurement must be provided");
    }
    if metrics.weight.is_some_and(|v| v <= 0.0) {
        bail!("weight must be greater than 0");
    }
    if metrics.height_cm.is_some_and(|v| v <= 0.0) {
        bail!("height_cm must be greater than 0");
    }
    if metrics
        .fat_percent
        .is_some_and(|v| !(0.0..=100.0).contains(&v))
    {
        bail!("fat_percent must be between 0 and 100");
    }
    for (name, value) in [
        ("waist_cm", metrics.waist_cm),
        ("biceps_cm", metrics.biceps_cm),
        ("lats_cm", metrics.lats_cm),
    ] {
        if value.is_some_and(|v| v <= 0.0) {
            bail!("{name} must be greater than 0");
        }
    }
    Ok(())
}

/// Validate a wearable row: every present reading in a plausible range.
pub fn validate_wearable(record: &NewWearableRecord) -> Result<()> {
    if record.heart_rate_avg.is_some_and(|v| v <= 0.0) {
        bail!("heart_rate_avg must be greater than 0");
    }
    if record.spo2_avg.is_some_and(|v| !(0.0..=100.0).contains(&v)) {
        bail!("spo2_avg must be between 0 and 100");
    }
    if record
        .sleep_hours
        .is_some_and(|v| !(0.0..=24.0).contains(&v))
    {
        bail!("sleep_hours must be between 0 and 24");
    }
    if record.steps.is_some_and(|v| v < 0) {
        bail!("steps must not be negative");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_bmi() {
        // 80 kg at 180 cm: 80 / 1.8^2 = 24.69
        assert_eq!(calculate_bmi(80.0, 180.0), Some(24.69));
        assert_eq!(calculate_bmi(0.0, 180.0), None);
        assert_eq!(calculate_bmi(80.0, 0.0), None);
    }

    #[test]
    fn test_sim_action_parse() {
        assert_eq!(SimAction::parse("add").unwrap(), SimAction::Add);
        assert_eq!(SimAction::parse("Remove").unwrap(), SimAction::Remove);
        assert!(SimAction::parse("delete").is_err());
        assert!(SimAction::parse("").is_err());
    }

    #[test]
    fn test_sim_action_signed() {
        assert!((SimAction::Add.signed(250.0) - 250.0).abs() < f64::EPSILON);
        assert!((SimAction::Remove.signed(250.0) + 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_convert_to_grams_weight_units() {
        let (g, approx) = convert_to_grams(1.0, "g").unwrap();
        assert!((g - 1.0).abs() < f64::EPSILON);
        assert!(!approx);

        let (g, _) = convert_to_grams(100.0, "gm").unwrap();
        assert!((g - 100.0).abs() < f64::EPSILON);

        let (g, _) = convert_to_grams(1.0, "oz").unwrap();
        assert!((g - 28.35).abs() < f64::EPSILON);
    }

    #[test]
    fn test_convert_to_grams_volume_units() {
        let (g, approx) = convert_to_grams(2.0, "tbsp").unwrap();
        assert!((g - 30.0).abs() < f64::EPSILON);
        assert!(approx);

        let (g, approx) = convert_to_grams(250.0, "ml").unwrap();
        assert!((g - 250.0).abs() < f64::EPSILON);
        assert!(approx);
    }

    #[test]
    fn test_quantity_in_grams_count_units_pass_through() {
        assert!((quantity_in_grams(2.0, "piece") - 2.0).abs() < f64::EPSILON);
        assert!((quantity_in_grams(1.0, "slice") - 1.0).abs() < f64::EPSILON);
        assert!((quantity_in_grams(200.0, "g") - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_unit() {
        assert_eq!(validate_unit("G").unwrap(), "g");
        assert_eq!(validate_unit("Piece").unwrap(), "piece");
        assert!(validate_unit("handful").is_err());
    }

    #[test]
    fn test_validate_meal_items() {
        let items = vec![MealItem {
            food: "banana".to_string(),
            quantity: 120.0,
            unit: "g".to_string(),
        }];
        assert!(validate_meal_items(&items).is_ok());
        assert!(validate_meal_items(&[]).is_err());

        let blank = vec![MealItem {
            food: "  ".to_string(),
            quantity: 120.0,
            unit: "g".to_string(),
        }];
        assert!(validate_meal_items(&blank).is_err());

        let zero_qty = vec![MealItem {
            food: "banana".to_string(),
            quantity: 0.0,
            unit: "g".to_string(),
        }];
        assert!(validate_meal_items(&zero_qty).is_err());
    }

    #[test]
    fn test_macro_totals_add_food() {
        let food = CachedFood {
            name: "oats".to_string(),
            calories_per_100g: 389.0,
            protein_per_100g: Some(16.9),
            carbs_per_100g: Some(66.3),
            fat_per_100g: Some(6.9),
            source: "openfoodfacts".to_string(),
            created_at: String::new(),
        };
        let mut totals = MacroTotals::default();
        totals.add_food(&food, 50.0);
        assert!((totals.calories - 194.5).abs() < 0.01);
        assert!((totals.protein - 8.45).abs() < 0.01);

        // Missing macros contribute nothing
        let sparse = CachedFood {
            protein_per_100g: None,
            carbs_per_100g: None,
            fat_per_100g: None,
            ..food
        };
        let mut totals = MacroTotals::default();
        totals.add_food(&sparse, 100.0);
        assert!((totals.calories - 389.0).abs() < 0.01);
        assert!(totals.protein.abs() < f64::EPSILON);
    }

    #[test]
    fn test_macro_totals_rounded() {
        let totals = MacroTotals {
            calories: 194.499,
            protein: 8.4501,
            carbs: 0.0,
            fat: 1.0 / 3.0,
        };
        let r = totals.rounded();
        assert!((r.calories - 194.5).abs() < f64::EPSILON);
        assert!((r.protein - 8.45).abs() < f64::EPSILON);
        assert!((r.fat - 0.33).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_body_metrics() {
        let all_empty = NewBodyMetrics {
            date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            weight: None,
            height_cm: None,
            bmi: None,
            fat_percent: None,
            waist_cm: None,
            biceps_cm: None,
            lats_cm: None,
        };
        assert!(validate_body_metrics(&all_empty).is_err());

        let ok = NewBodyMetrics {
            weight: Some(80.0),
            height_cm: Some(180.0),
            ..all_empty.clone()
        };
        assert!(validate_body_metrics(&ok).is_ok());

        let bad_fat = NewBodyMetrics {
            fat_percent: Some(140.0),
            ..all_empty.clone()
        };
        assert!(validate_body_metrics(&bad_fat).is_err());

        let bad_weight = NewBodyMetrics {
            weight: Some(-5.0),
            ..all_empty
        };
        assert!(validate_body_metrics(&bad_weight).is_err());
    }

    #[test]
    fn test_validate_wearable() {
        let base = NewWearableRecord {
            date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            heart_rate_avg: Some(62.0),
            spo2_avg: Some(97.5),
            sleep_hours: Some(7.5),
            steps: Some(9000),
        };
        assert!(validate_wearable(&base).is_ok());

        let bad_spo2 = NewWearableRecord {
            spo2_avg: Some(120.0),
            ..base.clone()
        };
        assert!(validate_wearable(&bad_spo2).is_err());

        let bad_sleep = NewWearableRecord {
            sleep_hours: Some(30.0),
            ..base.clone()
        };
        assert!(validate_wearable(&bad_sleep).is_err());

        let bad_steps = NewWearableRecord {
            steps: Some(-1),
            ..base
        };
        assert!(validate_wearable(&bad_steps).is_err());
    }
}
