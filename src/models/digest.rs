use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// One row per (user, period) digest attempt. The UNIQUE constraint on
/// (user_id, period_start, period_end) is the idempotency guarantee: a retry
/// for the same period is rejected by the index, never double-sent.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DigestLog {
    pub id: i64,
    pub user_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl DigestLog {
    const SELECT_COLS: &'static str =
        "id, user_id, period_start, period_end, status, error_message, created_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let start: String = row.get(2)?;
        let end: String = row.get(3)?;
        let parse = |s: &str, idx: usize| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        };
        Ok(DigestLog {
            id: row.get(0)?,
            user_id: row.get(1)?,
            period_start: parse(&start, 2)?,
            period_end: parse(&end, 3)?,
            status: row.get(4)?,
            error_message: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    pub fn get(
        pool: &DbPool,
        user_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Option<DigestLog> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM digest_log
                 WHERE user_id = ?1 AND period_start = ?2 AND period_end = ?3",
                Self::SELECT_COLS
            ),
            params![
                user_id,
                period_start.format("%Y-%m-%d").to_string(),
                period_end.format("%Y-%m-%d").to_string()
            ],
            Self::from_row,
        )
        .ok()
    }

    pub fn insert(
        pool: &DbPool,
        user_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO digest_log (user_id, period_start, period_end, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                period_start.format("%Y-%m-%d").to_string(),
                period_end.format("%Y-%m-%d").to_string(),
                status,
                error_message
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn count_for_user(pool: &DbPool, user_id: &str) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM digest_log WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }
}

/// One row per batch sweep invocation, used only for the 10-minute cooldown
/// that guards against a cron trigger firing twice.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DigestRun {
    pub id: i64,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub sent_count: i64,
    pub error_count: i64,
}

impl DigestRun {
    const SELECT_COLS: &'static str = "id, started_at, finished_at, sent_count, error_count";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(DigestRun {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            sent_count: row.get(3)?,
            error_count: row.get(4)?,
        })
    }

    pub fn latest(pool: &DbPool) -> Option<DigestRun> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM digest_runs ORDER BY started_at DESC LIMIT 1",
                Self::SELECT_COLS
            ),
            [],
            Self::from_row,
        )
        .ok()
    }

    pub fn start(pool: &DbPool) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let now = Utc::now().naive_utc();
        conn.execute(
            "INSERT INTO digest_runs (started_at) VALUES (?1)",
            params![now],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish(pool: &DbPool, id: i64, sent_count: i64, error_count: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let now = Utc::now().naive_utc();
        conn.execute(
            "UPDATE digest_runs SET finished_at = ?2, sent_count = ?3, error_count = ?4 WHERE id = ?1",
            params![id, now, sent_count, error_count],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}
