use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// Canonical metric names shown on dashboard tiles and in digests.
pub const TRACKED_METRICS: &[&str] = &["sessions", "conversions", "reach", "engagement"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Metric {
    pub id: i64,
    pub user_id: String,
    pub source_name: String,
    pub metric_date: NaiveDate,
    pub metric_name: String,
    pub metric_value: f64,
    pub meta: String,
    pub created_at: Option<NaiveDateTime>,
}

/// How a widget collapses daily rows into a headline number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Agg {
    Sum,
    Avg,
}

impl Metric {
    const SELECT_COLS: &'static str =
        "id, user_id, source_name, metric_date, metric_name, metric_value, meta, created_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let date_str: String = row.get(3)?;
        let metric_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Metric {
            id: row.get(0)?,
            user_id: row.get(1)?,
            source_name: row.get(2)?,
            metric_date,
            metric_name: row.get(4)?,
            metric_value: row.get(5)?,
            meta: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// Append one metric row. Rows are never updated in place.
    pub fn insert(
        pool: &DbPool,
        user_id: &str,
        source_name: &str,
        metric_date: NaiveDate,
        metric_name: &str,
        metric_value: f64,
        meta: &str,
    ) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO metrics (user_id, source_name, metric_date, metric_name, metric_value, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                source_name,
                metric_date.format("%Y-%m-%d").to_string(),
                metric_name,
                metric_value,
                meta
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    /// All-time sum for one metric name. Zero when no rows exist.
    pub fn sum_all_time(pool: &DbPool, user_id: &str, metric_name: &str) -> f64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0.0,
        };
        conn.query_row(
            "SELECT COALESCE(SUM(metric_value), 0) FROM metrics
             WHERE user_id = ?1 AND metric_name = ?2",
            params![user_id, metric_name],
            |row| row.get(0),
        )
        .unwrap_or(0.0)
    }

    /// Aggregate over a date range, optionally filtered by source.
    pub fn aggregate_range(
        pool: &DbPool,
        user_id: &str,
        source_name: Option<&str>,
        metric_name: &str,
        start: NaiveDate,
        end: NaiveDate,
        agg: Agg,
    ) -> f64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0.0,
        };
        let func = match agg {
            Agg::Sum => "SUM",
            Agg::Avg => "AVG",
        };
        match source_name {
            Some(source) => conn
                .query_row(
                    &format!(
                        "SELECT COALESCE({}(metric_value), 0) FROM metrics
                         WHERE user_id = ?1 AND source_name = ?2 AND metric_name = ?3
                           AND metric_date >= ?4 AND metric_date <= ?5",
                        func
                    ),
                    params![
                        user_id,
                        source,
                        metric_name,
                        start.format("%Y-%m-%d").to_string(),
                        end.format("%Y-%m-%d").to_string()
                    ],
                    |row| row.get(0),
                )
                .unwrap_or(0.0),
            None => conn
                .query_row(
                    &format!(
                        "SELECT COALESCE({}(metric_value), 0) FROM metrics
                         WHERE user_id = ?1 AND metric_name = ?2
                           AND metric_date >= ?3 AND metric_date <= ?4",
                        func
                    ),
                    params![
                        user_id,
                        metric_name,
                        start.format("%Y-%m-%d").to_string(),
                        end.format("%Y-%m-%d").to_string()
                    ],
                    |row| row.get(0),
                )
                .unwrap_or(0.0),
        }
    }

    /// One (date, value) point per day with rows, aggregated per the widget's rule.
    /// Filtering is strict on `user_id`; a tenant never sees another tenant's rows.
    pub fn daily_series(
        pool: &DbPool,
        user_id: &str,
        source_name: Option<&str>,
        metric_name: &str,
        start: NaiveDate,
        end: NaiveDate,
        agg: Agg,
    ) -> Vec<(NaiveDate, f64)> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let func = match agg {
            Agg::Sum => "SUM",
            Agg::Avg => "AVG",
        };
        let map_point = |row: &rusqlite::Row| -> rusqlite::Result<(NaiveDate, f64)> {
            let d: String = row.get(0)?;
            let v: f64 = row.get(1)?;
            let date = NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok((date, v))
        };
        match source_name {
            Some(source) => {
                let sql = format!(
                    "SELECT metric_date, {}(metric_value) FROM metrics
                     WHERE user_id = ?1 AND source_name = ?2 AND metric_name = ?3
                       AND metric_date >= ?4 AND metric_date <= ?5
                     GROUP BY metric_date ORDER BY metric_date",
                    func
                );
                let mut stmt = match conn.prepare(&sql) {
                    Ok(s) => s,
                    Err(_) => return vec![],
                };
                stmt.query_map(
                    params![
                        user_id,
                        source,
                        metric_name,
                        start.format("%Y-%m-%d").to_string(),
                        end.format("%Y-%m-%d").to_string()
                    ],
                    map_point,
                )
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
                .unwrap_or_default()
            }
            None => {
                let sql = format!(
                    "SELECT metric_date, {}(metric_value) FROM metrics
                     WHERE user_id = ?1 AND metric_name = ?2
                       AND metric_date >= ?3 AND metric_date <= ?4
                     GROUP BY metric_date ORDER BY metric_date",
                    func
                );
                let mut stmt = match conn.prepare(&sql) {
                    Ok(s) => s,
                    Err(_) => return vec![],
                };
                stmt.query_map(
                    params![
                        user_id,
                        metric_name,
                        start.format("%Y-%m-%d").to_string(),
                        end.format("%Y-%m-%d").to_string()
                    ],
                    map_point,
                )
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
                .unwrap_or_default()
            }
        }
    }

    /// (date, name, summed value) tuples for a window, for digest KPI collection.
    pub fn grouped_range(
        pool: &DbPool,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<(NaiveDate, String, f64)> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT metric_date, metric_name, SUM(metric_value) FROM metrics
             WHERE user_id = ?1 AND metric_date >= ?2 AND metric_date <= ?3
             GROUP BY metric_date, metric_name ORDER BY metric_date",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(
            params![
                user_id,
                start.format("%Y-%m-%d").to_string(),
                end.format("%Y-%m-%d").to_string()
            ],
            |row| {
                let d: String = row.get(0)?;
                let name: String = row.get(1)?;
                let v: f64 = row.get(2)?;
                let date = NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok((date, name, v))
            },
        )
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    /// Raw rows for one (user, date), newest first. Mostly a debugging aid.
    pub fn list_for_date(pool: &DbPool, user_id: &str, date: NaiveDate) -> Vec<Metric> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM metrics WHERE user_id = ?1 AND metric_date = ?2 ORDER BY id DESC",
            Self::SELECT_COLS
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(
            params![user_id, date.format("%Y-%m-%d").to_string()],
            Self::from_row,
        )
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn count_for_user(pool: &DbPool, user_id: &str) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM metrics WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }
}
