#[macro_use]
extern crate rocket;

use std::sync::Arc;
use std::time::Duration;

use rocket::serde::json::Json;
use serde_json::{json, Value};

mod auth;
mod config;
mod db;
mod digest;
mod email;
mod health;
mod ingest;
mod insights;
mod models;
mod oauth;
mod providers;
mod rate_limit;
mod routes;
mod tasks;

#[cfg(test)]
mod tests;

use config::Config;
use email::{Mailer, ResendMailer};
use rate_limit::RateLimiter;

#[catch(404)]
fn not_found() -> Json<Value> {
    Json(json!({ "error": "Not found" }))
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    Json(json!({ "error": "Malformed request body" }))
}

#[catch(500)]
fn server_error() -> Json<Value> {
    Json(json!({ "error": "Internal server error" }))
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    let config = Config::from_env();
    let pool = db::init_pool(&config.db_path).expect("Failed to initialize database pool");
    db::run_migrations(&pool).expect("Failed to run database migrations");

    let mailer: Arc<dyn Mailer> = Arc::new(ResendMailer::from_config(&config));
    // 10 requests burst, one token back every 2 seconds.
    let limiter = RateLimiter::new(10, Duration::from_secs(2));

    rocket::build()
        .manage(pool)
        .manage(config)
        .manage(mailer)
        .manage(limiter)
        .attach(tasks::BackgroundTasks)
        .mount("/v1/auth", routes::auth::routes())
        .mount("/v1/connections", routes::connections::routes())
        .mount("/v1/metrics", routes::metrics::routes())
        .mount("/v1/dashboard", routes::dashboard::routes())
        .mount("/v1/widgets", routes::widgets::routes())
        .mount("/v1/insights", routes::insights::routes())
        .mount("/v1/digest", routes::digest::routes())
        .mount("/v1/webhooks", routes::webhooks::routes())
        .mount("/v1/dev", routes::dev::routes())
        .mount("/v1/health", routes::health::routes())
        .register("/", catchers![not_found, unprocessable, server_error])
}
