use chrono::NaiveDateTime;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

/// One row per provider webhook delivery notification. Append-only; the
/// UNIQUE index on provider_id makes redelivered webhooks no-ops.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmailEvent {
    pub id: i64,
    pub recipient: String,
    pub event_type: String,
    pub provider_id: String,
    pub subject: Option<String>,
    pub payload: String,
    pub created_at: Option<NaiveDateTime>,
}

impl EmailEvent {
    const SELECT_COLS: &'static str =
        "id, recipient, event_type, provider_id, subject, payload, created_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(EmailEvent {
            id: row.get(0)?,
            recipient: row.get(1)?,
            event_type: row.get(2)?,
            provider_id: row.get(3)?,
            subject: row.get(4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    /// Insert-or-ignore keyed on provider_id. Returns true when a new row landed,
    /// false when the event was already recorded.
    pub fn insert_ignore(
        pool: &DbPool,
        recipient: &str,
        event_type: &str,
        provider_id: &str,
        subject: Option<&str>,
        payload: &str,
    ) -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let n = conn
            .execute(
                "INSERT OR IGNORE INTO email_events (recipient, event_type, provider_id, subject, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![recipient, event_type, provider_id, subject, payload],
            )
            .map_err(|e| e.to_string())?;
        Ok(n > 0)
    }

    pub fn get_by_provider_id(pool: &DbPool, provider_id: &str) -> Option<EmailEvent> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM email_events WHERE provider_id = ?1",
                Self::SELECT_COLS
            ),
            params![provider_id],
            Self::from_row,
        )
        .ok()
    }

    pub fn count(pool: &DbPool) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row("SELECT COUNT(*) FROM email_events", [], |row| row.get(0))
            .unwrap_or(0)
    }
}
