use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_pool(path: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    if let Some(dir) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    // Enable WAL mode for better concurrent read performance
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        -- Accounts
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            org_id TEXT,
            password_hash TEXT,
            google_sub TEXT,
            opt_in_digest INTEGER NOT NULL DEFAULT 1,
            last_digest_sent_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- One row per (user, provider). Row existence == connected.
        CREATE TABLE IF NOT EXISTS data_sources (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            account_ref TEXT,
            access_token TEXT,
            refresh_token TEXT,
            expires_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(user_id, source_name),
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        -- Daily metric rows, append-only
        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            metric_date TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            metric_value REAL NOT NULL,
            meta TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );
        CREATE INDEX IF NOT EXISTS metrics_user_source_date_idx
            ON metrics (user_id, source_name, metric_date);

        -- Provider delivery notifications; provider_id dedupes webhook retries
        CREATE TABLE IF NOT EXISTS email_events (
            id INTEGER PRIMARY KEY,
            recipient TEXT NOT NULL,
            event_type TEXT NOT NULL,
            provider_id TEXT UNIQUE NOT NULL,
            subject TEXT,
            payload TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- One row per digest attempt; the unique key is the idempotency guarantee
        CREATE TABLE IF NOT EXISTS digest_log (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(user_id, period_start, period_end),
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        -- One row per batch sweep, used for the 10-minute cooldown
        CREATE TABLE IF NOT EXISTS digest_runs (
            id INTEGER PRIMARY KEY,
            started_at DATETIME NOT NULL,
            finished_at DATETIME,
            sent_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;

    Ok(())
}
