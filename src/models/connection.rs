use chrono::{NaiveDateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

pub const SOURCE_GOOGLE: &str = "google_analytics";
pub const SOURCE_INSTAGRAM: &str = "instagram";

/// Stored OAuth credential set linking one user to one external data provider.
/// At most one row per (user, source); re-connecting overwrites. "Connected"
/// status is derived purely from row existence, which is why `delete` is a
/// hard delete and there is no revoked flag to resurrect.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub source_name: String,
    pub account_ref: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Connection {
    const SELECT_COLS: &'static str =
        "id, user_id, source_name, account_ref, access_token, refresh_token, expires_at, created_at, updated_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Connection {
            id: row.get(0)?,
            user_id: row.get(1)?,
            source_name: row.get(2)?,
            account_ref: row.get(3)?,
            access_token: row.get(4)?,
            refresh_token: row.get(5)?,
            expires_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub fn get(pool: &DbPool, user_id: &str, source_name: &str) -> Option<Connection> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM data_sources WHERE user_id = ?1 AND source_name = ?2",
                Self::SELECT_COLS
            ),
            params![user_id, source_name],
            Self::from_row,
        )
        .ok()
    }

    pub fn exists(pool: &DbPool, user_id: &str, source_name: &str) -> bool {
        Self::get(pool, user_id, source_name).is_some()
    }

    pub fn list_for_user(pool: &DbPool, user_id: &str) -> Vec<Connection> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM data_sources WHERE user_id = ?1",
            Self::SELECT_COLS
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![user_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Insert or overwrite the single row for (user, source).
    pub fn upsert(
        pool: &DbPool,
        user_id: &str,
        source_name: &str,
        account_ref: Option<&str>,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<Connection, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        conn.execute(
            "INSERT INTO data_sources (id, user_id, source_name, account_ref, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, source_name) DO UPDATE SET
                account_ref = excluded.account_ref,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![id, user_id, source_name, account_ref, access_token, refresh_token, expires_at, now],
        )
        .map_err(|e| e.to_string())?;
        Self::get(pool, user_id, source_name).ok_or_else(|| "connection vanished after upsert".to_string())
    }

    /// Overwrite token material after a refresh, keeping the row identity.
    pub fn update_tokens(
        pool: &DbPool,
        id: &str,
        access_token: &str,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let now = Utc::now().naive_utc();
        conn.execute(
            "UPDATE data_sources SET access_token = ?2, expires_at = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, access_token, expires_at, now],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Hard delete. Returns true if a row was removed.
    pub fn delete(pool: &DbPool, user_id: &str, source_name: &str) -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let n = conn
            .execute(
                "DELETE FROM data_sources WHERE user_id = ?1 AND source_name = ?2",
                params![user_id, source_name],
            )
            .map_err(|e| e.to_string())?;
        Ok(n > 0)
    }
}
