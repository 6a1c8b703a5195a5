use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::Value;

use crate::config::Config;
use crate::db::DbPool;
use crate::health;

#[get("/liveness")]
pub fn live() -> Json<Value> {
    Json(health::liveness())
}

#[get("/readiness")]
pub fn ready(pool: &State<DbPool>, config: &State<Config>) -> (Status, Json<Value>) {
    let (ready, body) = health::readiness(pool, config);
    let status = if ready {
        Status::Ok
    } else {
        Status::ServiceUnavailable
    };
    (status, Json(body))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![live, ready]
}
