use chrono::{NaiveDateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub org_id: Option<String>,
    pub password_hash: Option<String>,
    pub google_sub: Option<String>,
    pub opt_in_digest: bool,
    pub last_digest_sent_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
}

impl User {
    const SELECT_COLS: &'static str =
        "id, email, org_id, password_hash, google_sub, opt_in_digest, last_digest_sent_at, created_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let opt_in: i64 = row.get(5)?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            org_id: row.get(2)?,
            password_hash: row.get(3)?,
            google_sub: row.get(4)?,
            opt_in_digest: opt_in != 0,
            last_digest_sent_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    // ── Lookups ──

    pub fn get_by_id(pool: &DbPool, id: &str) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::SELECT_COLS),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn get_by_email(pool: &DbPool, email: &str) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", Self::SELECT_COLS),
            params![email],
            Self::from_row,
        )
        .ok()
    }

    /// Users eligible for the digest sweep.
    pub fn list_opted_in(pool: &DbPool) -> Vec<User> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM users WHERE opt_in_digest = 1 ORDER BY created_at ASC",
            Self::SELECT_COLS
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map([], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    // ── Mutations ──

    pub fn create(
        pool: &DbPool,
        email: &str,
        password_hash: Option<&str>,
        google_sub: Option<&str>,
    ) -> Result<User, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, google_sub) VALUES (?1, ?2, ?3, ?4)",
            params![id, email, password_hash, google_sub],
        )
        .map_err(|e| e.to_string())?;
        Self::get_by_id(pool, &id).ok_or_else(|| "user vanished after insert".to_string())
    }

    pub fn set_google_sub(pool: &DbPool, id: &str, google_sub: Option<&str>) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET google_sub = ?2 WHERE id = ?1",
            params![id, google_sub],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn set_opt_in_digest(pool: &DbPool, id: &str, opted_in: bool) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET opt_in_digest = ?2 WHERE id = ?1",
            params![id, opted_in as i64],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn touch_last_digest_sent(pool: &DbPool, id: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let now = Utc::now().naive_utc();
        conn.execute(
            "UPDATE users SET last_digest_sent_at = ?2 WHERE id = ?1",
            params![id, now],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}
