use chrono::NaiveDate;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::ApiUser;
use crate::config::Config;
use crate::db::DbPool;
use crate::ingest::{BackfillOutcome, IngestOutcome, TimelinePoint};
use crate::models::connection::{SOURCE_GOOGLE, SOURCE_INSTAGRAM};
use crate::routes::CachedJson;

const MAX_BACKFILL_DAYS: u32 = 90;

fn valid_source(source: &str) -> bool {
    source == SOURCE_GOOGLE || source == SOURCE_INSTAGRAM
}

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub source_name: String,
    pub metric_date: NaiveDate,
    pub data: Map<String, Value>,
}

/// Accepts one day of raw metric values. Non-numeric values are skipped
/// without failing the request; the response names what was kept.
#[post("/ingest", data = "<body>")]
pub fn ingest(
    pool: &State<DbPool>,
    user: ApiUser,
    body: Json<IngestBody>,
) -> Result<Json<IngestOutcome>, (Status, Json<Value>)> {
    if !valid_source(&body.source_name) {
        return Err((
            Status::BadRequest,
            Json(json!({ "error": format!("unknown source '{}'", body.source_name) })),
        ));
    }
    crate::ingest::ingest(pool, &user.id, &body.source_name, body.metric_date, &body.data)
        .map(Json)
        .map_err(|e| (Status::InternalServerError, Json(json!({ "error": e }))))
}

#[derive(Debug, Deserialize)]
pub struct BackfillBody {
    pub source_name: String,
    pub days: Option<u32>,
}

/// Pull recent history from the provider, one day per request. Requires a
/// live connection for the source; partial failures are reported per day.
#[post("/backfill", data = "<body>")]
pub fn backfill(
    pool: &State<DbPool>,
    config: &State<Config>,
    user: ApiUser,
    body: Json<BackfillBody>,
) -> Result<Json<BackfillOutcome>, (Status, Json<Value>)> {
    if !valid_source(&body.source_name) {
        return Err((
            Status::BadRequest,
            Json(json!({ "error": format!("unknown source '{}'", body.source_name) })),
        ));
    }
    let days = body.days.unwrap_or(30).clamp(1, MAX_BACKFILL_DAYS);
    crate::ingest::backfill(pool, config, &user.id, &body.source_name, days)
        .map(Json)
        .map_err(|e| (Status::BadRequest, Json(json!({ "error": e }))))
}

/// Raw rows for one day, newest first. Handy when checking what a backfill
/// actually wrote.
#[get("/day?<date>")]
pub fn day(
    pool: &State<DbPool>,
    user: ApiUser,
    date: String,
) -> Result<Json<Vec<crate::models::metric::Metric>>, (Status, Json<Value>)> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| {
        (
            Status::BadRequest,
            Json(json!({ "error": "date must be YYYY-MM-DD" })),
        )
    })?;
    Ok(Json(crate::models::metric::Metric::list_for_date(
        pool, &user.id, date,
    )))
}

#[get("/timeline/day")]
pub fn timeline_day(pool: &State<DbPool>, user: ApiUser) -> CachedJson<Vec<TimelinePoint>> {
    CachedJson(Json(crate::ingest::timeline(pool, &user.id, 7)))
}

#[get("/timeline/month")]
pub fn timeline_month(pool: &State<DbPool>, user: ApiUser) -> CachedJson<Vec<TimelinePoint>> {
    CachedJson(Json(crate::ingest::timeline(pool, &user.id, 30)))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![ingest, backfill, day, timeline_day, timeline_month]
}
