use serde_json::{json, Value};

use crate::config::Config;
use crate::db::DbPool;

/// Liveness: the process is up and serving requests.
pub fn liveness() -> Value {
    json!({ "status": "ok" })
}

/// Readiness: the database answers a probe query and required settings are
/// present. Reports degraded instead of failing outright so operators can
/// see which piece is missing.
pub fn readiness(pool: &DbPool, config: &Config) -> (bool, Value) {
    let db_ok = pool
        .get()
        .ok()
        .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).ok())
        .map(|v| v == 1)
        .unwrap_or(false);

    let missing = config.missing_required();
    let ready = db_ok && missing.is_empty();

    let body = json!({
        "status": if ready { "ready" } else { "degraded" },
        "database": if db_ok { "ok" } else { "unavailable" },
        "missing_config": missing,
    });
    (ready, body)
}
