use chrono::{Duration, Utc};
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::ApiUser;
use crate::config::Config;
use crate::db::DbPool;
use crate::ingest;
use crate::models::connection::{Connection, SOURCE_INSTAGRAM};
use crate::oauth;

/// Days of history pulled right after a provider is first linked.
const INITIAL_BACKFILL_DAYS: u32 = 30;

#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    pub source_name: String,
    pub account_ref: Option<String>,
    pub connected_at: String,
}

#[get("/")]
pub fn list(pool: &State<DbPool>, user: ApiUser) -> Json<Vec<ConnectionSummary>> {
    let items = Connection::list_for_user(pool, &user.id)
        .into_iter()
        .map(|c| ConnectionSummary {
            source_name: c.source_name,
            account_ref: c.account_ref,
            connected_at: c
                .created_at
                .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                .unwrap_or_default(),
        })
        .collect();
    Json(items)
}

/// The browser cannot carry the bearer token through a provider redirect, so
/// the signed state embeds the user id instead and the callback trusts it.
#[get("/instagram/start?<return_to>")]
pub fn instagram_start(
    config: &State<Config>,
    user: ApiUser,
    return_to: Option<String>,
) -> Json<Value> {
    let state = oauth::issue_state(
        config.signing_key(),
        return_to.as_deref().unwrap_or("/dashboard"),
        Some(&user.id),
    );
    Json(json!({ "url": oauth::instagram_auth_url(config, &state) }))
}

#[get("/instagram/callback?<code>&<state>&<error>")]
pub fn instagram_callback(
    pool: &State<DbPool>,
    config: &State<Config>,
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
) -> Redirect {
    let fail = || {
        Redirect::to(format!(
            "{}/connect/callback?provider=instagram&status=error",
            config.frontend_url
        ))
    };

    if let Some(e) = error {
        log::warn!("[connections] instagram oauth denied: {}", e);
        return fail();
    }
    let (code, state) = match (code, state) {
        (Some(c), Some(s)) => (c, s),
        _ => return fail(),
    };
    let uid = match oauth::verify_state(config.signing_key(), &state).and_then(|s| s.uid) {
        Some(uid) => uid,
        None => {
            log::warn!("[connections] instagram callback with bad or anonymous state");
            return fail();
        }
    };

    let short = match oauth::exchange_instagram_code(config, &code) {
        Ok(t) => t,
        Err(e) => {
            log::error!("[connections] instagram code exchange failed: {}", e);
            return fail();
        }
    };
    let (long_token, expires_in) = match oauth::upgrade_instagram_token(config, &short.access_token) {
        Ok(t) => t,
        Err(e) => {
            log::error!("[connections] long-lived token exchange failed: {}", e);
            return fail();
        }
    };
    let account_ref = match oauth::fetch_instagram_profile(&long_token) {
        Ok((id, username)) => format!("{}:{}", id, username),
        Err(e) => {
            log::warn!("[connections] instagram profile fetch failed: {}", e);
            short.user_id.clone()
        }
    };

    let expires_at = Utc::now().naive_utc() + Duration::seconds(expires_in);
    if let Err(e) = Connection::upsert(
        pool,
        &uid,
        SOURCE_INSTAGRAM,
        Some(&account_ref),
        Some(&long_token),
        None,
        Some(expires_at),
    ) {
        log::error!("[connections] could not store instagram connection: {}", e);
        return fail();
    }

    // Pull initial history so the dashboard is not empty on first visit.
    // Failures here are logged, not surfaced; the connection itself stands.
    match ingest::backfill(pool, config, &uid, SOURCE_INSTAGRAM, INITIAL_BACKFILL_DAYS) {
        Ok(outcome) => log::info!(
            "[connections] instagram initial backfill: {} rows over {} days",
            outcome.inserted,
            outcome.days_with_data
        ),
        Err(e) => log::warn!("[connections] instagram initial backfill failed: {}", e),
    }

    Redirect::to(format!(
        "{}/connect/callback?provider=instagram&status=success",
        config.frontend_url
    ))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list, instagram_start, instagram_callback]
}
