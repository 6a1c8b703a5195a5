use chrono::{Duration, Utc};
use rocket::serde::json::Json;
use rocket::State;

use crate::auth::ApiUser;
use crate::db::DbPool;
use crate::insights::{self, InsightGroup};
use crate::routes::CachedJson;

#[get("/?<window>")]
pub fn list(
    pool: &State<DbPool>,
    user: ApiUser,
    window: Option<u32>,
) -> CachedJson<Vec<InsightGroup>> {
    let window = window.unwrap_or(7).clamp(1, 90);
    let end = Utc::now().date_naive();
    let start = end - Duration::days(window as i64 - 1);
    CachedJson(Json(insights::generate(pool, &user.id, start, end)))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list]
}
