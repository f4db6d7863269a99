use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, params};

use crate::models::{
    BodyMetrics, CachedFood, MacroTotals, MealItem, MealLog, MealTemplate, NewBodyMetrics,
    NewCachedFood, NewSimulation, NewWearableRecord, SimulationEntry, WearableRecord,
};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS body_metrics (
                    date TEXT PRIMARY KEY,
                    weight REAL,
                    height_cm REAL,
                    bmi REAL,
                    fat_percent REAL,
                    waist_cm REAL,
                    biceps_cm REAL,
                    lats_cm REAL
                );

                CREATE TABLE IF NOT EXISTS wearable_data (
                    date TEXT PRIMARY KEY,
                    heart_rate_avg REAL,
                    spo2_avg REAL,
                    sleep_hours REAL,
                    steps INTEGER
                );

                CREATE TABLE IF NOT EXISTS simulation_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    date TEXT NOT NULL,
                    action TEXT NOT NULL,
                    food TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    caloric_change REAL NOT NULL,
                    duration_days INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_templates (
                    name TEXT PRIMARY KEY,
                    items TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    items TEXT NOT NULL,
                    calories REAL NOT NULL,
                    protein REAL NOT NULL,
                    carbs REAL NOT NULL,
                    fat REAL NOT NULL,
                    date TEXT NOT NULL,
                    logged_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS food_cache (
                    name TEXT PRIMARY KEY,
                    calories_per_100g REAL NOT NULL,
                    protein_per_100g REAL,
                    carbs_per_100g REAL,
                    fat_per_100g REAL,
                    source TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_simulation_history_date ON simulation_history(date);
                CREATE INDEX IF NOT EXISTS idx_meal_logs_date ON meal_logs(date);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn body_metrics_from_row(row: &rusqlite::Row) -> rusqlite::Result<BodyMetrics> {
        Ok(BodyMetrics {
            date: row.get(0)?,
            weight: row.get(1)?,
            height_cm: row.get(2)?,
            bmi: row.get(3)?,
            fat_percent: row.get(4)?,
            waist_cm: row.get(5)?,
            biceps_cm: row.get(6)?,
            lats_cm: row.get(7)?,
        })
    }

    fn wearable_from_row(row: &rusqlite::Row) -> rusqlite::Result<WearableRecord> {
        Ok(WearableRecord {
            date: row.get(0)?,
            heart_rate_avg: row.get(1)?,
            spo2_avg: row.get(2)?,
            sleep_hours: row.get(3)?,
            steps: row.get(4)?,
        })
    }

    fn simulation_from_row(row: &rusqlite::Row) -> rusqlite::Result<SimulationEntry> {
        Ok(SimulationEntry {
            id: row.get(0)?,
            date: row.get(1)?,
            action: row.get(2)?,
            food: row.get(3)?,
            quantity: row.get(4)?,
            unit: row.get(5)?,
            caloric_change: row.get(6)?,
            duration_days: row.get(7)?,
        })
    }

    fn cached_food_from_row(row: &rusqlite::Row) -> rusqlite::Result<CachedFood> {
        Ok(CachedFood {
            name: row.get(0)?,
            calories_per_100g: row.get(1)?,
            protein_per_100g: row.get(2)?,
            carbs_per_100g: row.get(3)?,
            fat_per_100g: row.get(4)?,
            source: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    // --- Body metrics ---

    /// Save a body-metrics row. A second save for the same date overwrites
    /// the first.
    pub fn upsert_body_metrics(&self, metrics: &NewBodyMetrics) -> Result<BodyMetrics> {
        let date_str = metrics.date.format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT OR REPLACE INTO body_metrics
             (date, weight, height_cm, bmi, fat_percent, waist_cm, biceps_cm, lats_cm)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                date_str,
                metrics.weight,
                metrics.height_cm,
                metrics.bmi,
                metrics.fat_percent,
                metrics.waist_cm,
                metrics.biceps_cm,
                metrics.lats_cm,
            ],
        )?;
        self.get_body_metrics(metrics.date)?
            .context("Body metrics row missing after insert")
    }

    pub fn get_body_metrics(&self, date: NaiveDate) -> Result<Option<BodyMetrics>> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(
            "SELECT date, weight, height_cm, bmi, fat_percent, waist_cm, biceps_cm, lats_cm
             FROM body_metrics WHERE date = ?1",
        )?;
        let mut rows = stmt.query(params![date_str])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::body_metrics_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Full metric history, oldest first. `days` limits to the trailing
    /// window when given.
    pub fn get_body_metrics_history(&self, days: Option<i64>) -> Result<Vec<BodyMetrics>> {
        let sql = "SELECT date, weight, height_cm, bmi, fat_percent, waist_cm, biceps_cm, lats_cm
             FROM body_metrics";
        match days {
            Some(days) => {
                let cutoff = (Local::now().date_naive() - chrono::Duration::days(days))
                    .format("%Y-%m-%d")
                    .to_string();
                let mut stmt = self
                    .conn
                    .prepare(&format!("{sql} WHERE date >= ?1 ORDER BY date"))?;
                let history = stmt
                    .query_map(params![cutoff], Self::body_metrics_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(history)
            }
            None => {
                let mut stmt = self.conn.prepare(&format!("{sql} ORDER BY date"))?;
                let history = stmt
                    .query_map([], Self::body_metrics_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(history)
            }
        }
    }

    // --- Wearable data ---

    pub fn upsert_wearable(&self, record: &NewWearableRecord) -> Result<WearableRecord> {
        let date_str = record.date.format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT OR REPLACE INTO wearable_data
             (date, heart_rate_avg, spo2_avg, sleep_hours, steps)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                date_str,
                record.heart_rate_avg,
                record.spo2_avg,
                record.sleep_hours,
                record.steps,
            ],
        )?;
        self.get_wearable(record.date)?
            .context("Wearable row missing after insert")
    }

    pub fn get_wearable(&self, date: NaiveDate) -> Result<Option<WearableRecord>> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(
            "SELECT date, heart_rate_avg, spo2_avg, sleep_hours, steps
             FROM wearable_data WHERE date = ?1",
        )?;
        let mut rows = stmt.query(params![date_str])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::wearable_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_wearable_history(&self) -> Result<Vec<WearableRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, heart_rate_avg, spo2_avg, sleep_hours, steps
             FROM wearable_data ORDER BY date",
        )?;
        let history = stmt
            .query_map([], Self::wearable_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    // --- Simulation ledger (append-only) ---

    pub fn insert_simulation(&self, sim: &NewSimulation) -> Result<SimulationEntry> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.conn.execute(
            "INSERT INTO simulation_history
             (date, action, food, quantity, unit, caloric_change, duration_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                now,
                sim.action.as_str(),
                sim.food,
                sim.quantity,
                sim.unit,
                sim.caloric_change,
                sim.duration_days,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, date, action, food, quantity, unit, caloric_change, duration_days
                 FROM simulation_history WHERE id = ?1",
                params![id],
                Self::simulation_from_row,
            )
            .context("Simulation entry missing after insert")
    }

    /// All ledger entries, newest first. Duplicates are expected; nothing is
    /// ever updated or deleted here.
    pub fn get_simulation_history(&self) -> Result<Vec<SimulationEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, action, food, quantity, unit, caloric_change, duration_days
             FROM simulation_history ORDER BY date DESC, id DESC",
        )?;
        let history = stmt
            .query_map([], Self::simulation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    // --- Meal templates ---

    /// Save a template under a name, silently replacing any existing
    /// template with that name.
    pub fn save_template(&self, name: &str, items: &[MealItem]) -> Result<MealTemplate> {
        let now = Local::now().to_rfc3339();
        let items_json = serde_json::to_string(items).context("Failed to encode template items")?;
        let created_at: Option<String> = self
            .conn
            .query_row(
                "SELECT created_at FROM meal_templates WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .ok();
        let created_at = created_at.unwrap_or_else(|| now.clone());
        self.conn.execute(
            "INSERT OR REPLACE INTO meal_templates (name, items, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, items_json, created_at, now],
        )?;
        Ok(MealTemplate {
            name: name.to_string(),
            items: items.to_vec(),
            created_at,
            updated_at: now,
        })
    }

    pub fn get_template(&self, name: &str) -> Result<Option<MealTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, items, created_at, updated_at FROM meal_templates WHERE name = ?1",
        )?;
        let mut rows = stmt.query(params![name])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::template_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_templates(&self) -> Result<Vec<MealTemplate>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, items, created_at, updated_at FROM meal_templates ORDER BY name",
        )?;
        let templates = stmt
            .query_map([], Self::template_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    pub fn delete_template(&self, name: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM meal_templates WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }

    fn template_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealTemplate> {
        let items_json: String = row.get(1)?;
        let items = serde_json::from_str(&items_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        Ok(MealTemplate {
            name: row.get(0)?,
            items,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    // --- Meal logs (append-only) ---

    pub fn insert_meal_log(
        &self,
        name: &str,
        items: &[MealItem],
        nutrition: &MacroTotals,
        date: NaiveDate,
    ) -> Result<MealLog> {
        let logged_at = Local::now().to_rfc3339();
        let date_str = date.format("%Y-%m-%d").to_string();
        let items_json = serde_json::to_string(items).context("Failed to encode meal items")?;
        self.conn.execute(
            "INSERT INTO meal_logs (name, items, calories, protein, carbs, fat, date, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                name,
                items_json,
                nutrition.calories,
                nutrition.protein,
                nutrition.carbs,
                nutrition.fat,
                date_str,
                logged_at,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(MealLog {
            id,
            name: name.to_string(),
            items: items.to_vec(),
            nutrition: nutrition.clone(),
            date: date_str,
            logged_at,
        })
    }

    pub fn get_meal_logs(&self) -> Result<Vec<MealLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, items, calories, protein, carbs, fat, date, logged_at
             FROM meal_logs ORDER BY id",
        )?;
        let logs = stmt
            .query_map([], |row| {
                let items_json: String = row.get(2)?;
                let items = serde_json::from_str(&items_json).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        Box::new(err),
                    )
                })?;
                Ok(MealLog {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    items,
                    nutrition: MacroTotals {
                        calories: row.get(3)?,
                        protein: row.get(4)?,
                        carbs: row.get(5)?,
                        fat: row.get(6)?,
                    },
                    date: row.get(7)?,
                    logged_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Summed calories per calendar date, oldest first. Feeds the daily
    /// caloric-intake covariate.
    pub fn get_daily_calorie_totals(&self) -> Result<Vec<(String, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, SUM(calories) FROM meal_logs GROUP BY date ORDER BY date",
        )?;
        let totals = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(totals)
    }

    // --- Food cache ---

    pub fn get_cached_food(&self, name: &str) -> Result<Option<CachedFood>> {
        let key = name.to_lowercase();
        let mut stmt = self.conn.prepare(
            "SELECT name, calories_per_100g, protein_per_100g, carbs_per_100g, fat_per_100g,
                    source, created_at
             FROM food_cache WHERE name = ?1",
        )?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::cached_food_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn upsert_cached_food(&self, food: &NewCachedFood) -> Result<CachedFood> {
        let key = food.name.to_lowercase();
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO food_cache
             (name, calories_per_100g, protein_per_100g, carbs_per_100g, fat_per_100g, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key,
                food.calories_per_100g,
                food.protein_per_100g,
                food.carbs_per_100g,
                food.fat_per_100g,
                food.source,
                now,
            ],
        )?;
        self.get_cached_food(&key)?
            .context("Cached food missing after insert")
    }

    pub fn list_cached_foods(&self) -> Result<Vec<CachedFood>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, calories_per_100g, protein_per_100g, carbs_per_100g, fat_per_100g,
                    source, created_at
             FROM food_cache ORDER BY name",
        )?;
        let foods = stmt
            .query_map([], Self::cached_food_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(foods)
    }
}
