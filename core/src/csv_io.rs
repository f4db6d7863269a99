use std::collections::HashSet;
use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;

use crate::db::Database;
use crate::forecast::SeriesPoint;
use crate::models::NewWearableRecord;

/// A single row parsed from a wearable CSV export.
#[derive(Debug, Clone)]
pub struct WearableCsvRow {
    pub date: String,
    pub heart_rate_avg: Option<f64>,
    pub spo2_avg: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub steps: Option<i64>,
}

/// Summary of what a wearable CSV import did.
#[derive(Debug, Clone, Serialize)]
pub struct WearableImportSummary {
    pub rows_parsed: usize,
    pub rows_imported: usize,
    pub dates_spanned: usize,
}

const REQUIRED_COLUMNS: &[&str] = &["date", "heart_rate_avg", "spo2_avg", "sleep_hours", "steps"];

/// Parse a wearable CSV export from any reader.
///
/// Expected header: `date,heart_rate_avg,spo2_avg,sleep_hours,steps`.
/// Extra columns are ignored; blank readings stay empty rather than zero.
pub fn parse_wearable_csv<R: Read>(reader: R) -> Result<Vec<WearableCsvRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();

    for name in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            bail!("Missing required column: {name}");
        }
    }

    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let idx_date = col("date").context("Missing 'date' column")?;
    let idx_hr = col("heart_rate_avg").context("Missing 'heart_rate_avg' column")?;
    let idx_spo2 = col("spo2_avg").context("Missing 'spo2_avg' column")?;
    let idx_sleep = col("sleep_hours").context("Missing 'sleep_hours' column")?;
    let idx_steps = col("steps").context("Missing 'steps' column")?;

    let mut rows = Vec::new();

    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;

        let date = record.get(idx_date).unwrap_or("").trim().to_string();
        if date.is_empty() {
            continue; // skip blank rows
        }

        let parse_f64 = |idx: usize| -> Option<f64> {
            record
                .get(idx)
                .and_then(|v| v.trim().parse::<f64>().ok())
        };
        let parse_i64 = |idx: usize| -> Option<i64> {
            record
                .get(idx)
                .and_then(|v| v.trim().parse::<i64>().ok())
        };

        rows.push(WearableCsvRow {
            date,
            heart_rate_avg: parse_f64(idx_hr),
            spo2_avg: parse_f64(idx_spo2),
            sleep_hours: parse_f64(idx_sleep),
            steps: parse_i64(idx_steps),
        });
    }

    Ok(rows)
}

/// Normalize an exported date to YYYY-MM-DD format.
///
/// Wearable exports mostly use `YYYY-MM-DD`, but `M/D/YYYY` shows up too.
fn normalize_date(raw: &str) -> Result<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
        return Ok(d);
    }
    bail!("Cannot parse date: '{raw}'")
}

/// Import parsed wearable rows. Rows upsert by date, so re-importing the
/// same file is harmless.
pub fn import_wearable_rows(
    db: &Database,
    rows: &[WearableCsvRow],
) -> Result<WearableImportSummary> {
    let mut rows_imported = 0usize;
    let mut dates: HashSet<NaiveDate> = HashSet::new();

    for row in rows {
        let date = normalize_date(&row.date)?;
        db.upsert_wearable(&NewWearableRecord {
            date,
            heart_rate_avg: row.heart_rate_avg,
            spo2_avg: row.spo2_avg,
            sleep_hours: row.sleep_hours,
            steps: row.steps,
        })?;
        dates.insert(date);
        rows_imported += 1;
    }

    Ok(WearableImportSummary {
        rows_parsed: rows.len(),
        rows_imported,
        dates_spanned: dates.len(),
    })
}

/// Write a simulated weight series as CSV with columns
/// `date,simulated_weight`.
pub fn write_simulated_weight_csv<W: Write>(writer: W, points: &[SeriesPoint]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["date", "simulated_weight"])?;
    for point in points {
        wtr.write_record([
            point.date.format("%Y-%m-%d").to_string(),
            point.value.to_string(),
        ])?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}
