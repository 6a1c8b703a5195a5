use rocket::serde::json::Json;
use rocket::State;

use crate::auth::ApiUser;
use crate::db::DbPool;
use crate::ingest::{self, Tile};
use crate::routes::CachedJson;

#[get("/tiles")]
pub fn tiles(pool: &State<DbPool>, user: ApiUser) -> CachedJson<Vec<Tile>> {
    CachedJson(Json(ingest::dashboard_tiles(pool, &user.id)))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![tiles]
}
