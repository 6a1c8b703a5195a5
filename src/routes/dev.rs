use chrono::{Duration, Utc};
use rand::Rng;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};

use crate::auth::AdminUser;
use crate::db::DbPool;
use crate::ingest;
use crate::models::connection::{SOURCE_GOOGLE, SOURCE_INSTAGRAM};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Deserialize)]
pub struct SeedBody {
    pub user_id: String,
    pub days: Option<u32>,
}

/// Fill a user's account with plausible random metrics for demos and local
/// frontend work. Admin only, and rate limited since each call writes
/// hundreds of rows.
#[post("/seed-metrics", data = "<body>")]
pub fn seed_metrics(
    pool: &State<DbPool>,
    limiter: &State<RateLimiter>,
    _admin: AdminUser,
    body: Json<SeedBody>,
) -> Result<Json<Value>, (Status, Json<Value>)> {
    if !limiter.try_acquire("dev:seed-metrics") {
        return Err((
            Status::TooManyRequests,
            Json(json!({ "error": "Too many seed requests, slow down" })),
        ));
    }

    let days = body.days.unwrap_or(30).clamp(1, 90);
    let today = Utc::now().date_naive();
    let mut rng = rand::thread_rng();
    let mut inserted = 0usize;

    for offset in (0..days as i64).rev() {
        let date = today - Duration::days(offset);

        let mut ga: Map<String, Value> = Map::new();
        ga.insert("sessions".into(), num(rng.gen_range(40..400)));
        ga.insert("total_users".into(), num(rng.gen_range(30..300)));
        ga.insert("conversions".into(), num(rng.gen_range(0..25)));
        let out = ingest::ingest(pool, &body.user_id, SOURCE_GOOGLE, date, &ga)
            .map_err(internal)?;
        inserted += out.inserted;

        let mut ig: Map<String, Value> = Map::new();
        ig.insert("reach".into(), num(rng.gen_range(200..3000)));
        ig.insert("engagement".into(), num(rng.gen_range(10..250)));
        let out = ingest::ingest(pool, &body.user_id, SOURCE_INSTAGRAM, date, &ig)
            .map_err(internal)?;
        inserted += out.inserted;
    }

    Ok(Json(json!({ "days": days, "inserted": inserted })))
}

fn num(v: i64) -> Value {
    Value::Number(Number::from(v))
}

fn internal(e: String) -> (Status, Json<Value>) {
    (Status::InternalServerError, Json(json!({ "error": e })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![seed_metrics]
}
