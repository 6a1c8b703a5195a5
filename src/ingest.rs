use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::config::Config;
use crate::db::DbPool;
use crate::models::connection::Connection;
use crate::models::metric::{Metric, TRACKED_METRICS};
use crate::oauth;
use crate::providers;

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub accepted: Vec<String>,
}

/// Insert one Metric row per numeric entry in `values`. Payloads come from
/// external providers and are only partially trusted: non-numeric entries are
/// silently skipped, not an error. No dedup happens here: re-ingesting the
/// same (user, date, name) appends another row, and backfill jobs must not
/// double-run.
pub fn ingest(
    pool: &DbPool,
    user_id: &str,
    source_name: &str,
    date: NaiveDate,
    values: &Map<String, Value>,
) -> Result<IngestOutcome, String> {
    let mut accepted = Vec::new();
    for (name, value) in values {
        let v = match value.as_f64() {
            Some(v) if v.is_finite() => v,
            _ => continue,
        };
        Metric::insert(pool, user_id, source_name, date, name, v, "{}")?;
        accepted.push(name.clone());
    }
    Ok(IngestOutcome {
        inserted: accepted.len(),
        accepted,
    })
}

#[derive(Debug, Serialize)]
pub struct BackfillOutcome {
    pub days_requested: u32,
    pub days_with_data: usize,
    pub days_failed: usize,
    pub inserted: usize,
    pub failures: Vec<String>,
}

/// Retroactive ingestion of `[today-days, today)` through the provider's read
/// API. A day the provider has nothing for writes no rows (not zeros), and one
/// day's failure is recorded without aborting the rest, so a 30-day backfill
/// with one transient error still yields 29 days of data.
pub fn backfill(
    pool: &DbPool,
    config: &Config,
    user_id: &str,
    source_name: &str,
    days: u32,
) -> Result<BackfillOutcome, String> {
    let connection = Connection::get(pool, user_id, source_name)
        .ok_or_else(|| format!("no {} connection for this user", source_name))?;
    let connection = oauth::refresh_if_needed(pool, config, &connection);

    let today = Utc::now().date_naive();
    let mut outcome = BackfillOutcome {
        days_requested: days,
        days_with_data: 0,
        days_failed: 0,
        inserted: 0,
        failures: Vec::new(),
    };

    for offset in (1..=days as i64).rev() {
        let date = today - Duration::days(offset);
        match providers::fetch_day(&connection, date) {
            Ok(values) if values.is_empty() => {}
            Ok(values) => match ingest(pool, user_id, source_name, date, &values) {
                Ok(r) => {
                    outcome.days_with_data += 1;
                    outcome.inserted += r.inserted;
                }
                Err(e) => {
                    outcome.days_failed += 1;
                    outcome.failures.push(format!("{}: {}", date, e));
                }
            },
            Err(e) => {
                outcome.days_failed += 1;
                outcome.failures.push(format!("{}: {}", date, e));
            }
        }
    }

    log::info!(
        "[ingest] backfill {} for user {}: {} days with data, {} failed, {} rows",
        source_name,
        user_id,
        outcome.days_with_data,
        outcome.days_failed,
        outcome.inserted
    );
    Ok(outcome)
}

#[derive(Debug, Serialize)]
pub struct Tile {
    pub name: String,
    pub value: f64,
}

/// All-time sums for each tracked metric. Metrics with no rows report zero,
/// never absent, so the dashboard has no undefined tiles.
pub fn dashboard_tiles(pool: &DbPool, user_id: &str) -> Vec<Tile> {
    TRACKED_METRICS
        .iter()
        .map(|name| Tile {
            name: name.to_string(),
            value: Metric::sum_all_time(pool, user_id, name),
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct TimelinePoint {
    pub date: NaiveDate,
    pub values: HashMap<String, f64>,
}

/// One point per day over the trailing window, every tracked metric present
/// (zero-filled). Rows are filtered by strict user-id equality; user A's
/// timeline can never include user B's rows.
pub fn timeline(pool: &DbPool, user_id: &str, window_days: u32) -> Vec<TimelinePoint> {
    let today = Utc::now().date_naive();
    let start = today - Duration::days(window_days as i64 - 1);

    let mut points: Vec<TimelinePoint> = (0..window_days as i64)
        .map(|offset| TimelinePoint {
            date: start + Duration::days(offset),
            values: TRACKED_METRICS
                .iter()
                .map(|name| (name.to_string(), 0.0))
                .collect(),
        })
        .collect();

    for (date, name, value) in Metric::grouped_range(pool, user_id, start, today) {
        if !TRACKED_METRICS.contains(&name.as_str()) {
            continue;
        }
        let idx = (date - start).num_days();
        if idx >= 0 && (idx as usize) < points.len() {
            points[idx as usize].values.insert(name, value);
        }
    }

    points
}
