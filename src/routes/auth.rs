use rocket::http::Status;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chrono::{Duration, Utc};

use crate::auth::{self, ApiUser};
use crate::config::Config;
use crate::db::DbPool;
use crate::models::connection::{Connection, SOURCE_GOOGLE, SOURCE_INSTAGRAM};
use crate::models::user::User;
use crate::oauth;
use crate::rate_limit::RateLimiter;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: String,
    pub email: String,
}

#[post("/register", data = "<body>")]
pub fn register(
    pool: &State<DbPool>,
    config: &State<Config>,
    body: Json<Credentials>,
) -> Result<Json<AuthResponse>, (Status, Json<Value>)> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err((
            Status::BadRequest,
            Json(json!({ "error": "A valid email address is required" })),
        ));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err((
            Status::BadRequest,
            Json(json!({ "error": "Password must be at least 8 characters" })),
        ));
    }
    if User::get_by_email(pool, &email).is_some() {
        return Err((
            Status::BadRequest,
            Json(json!({ "error": "An account with this email already exists" })),
        ));
    }

    let hash = auth::hash_password(&body.password).map_err(|e| {
        (
            Status::InternalServerError,
            Json(json!({ "error": e })),
        )
    })?;
    let user = User::create(pool, &email, Some(&hash), None).map_err(|e| {
        (
            Status::InternalServerError,
            Json(json!({ "error": e })),
        )
    })?;

    let token = auth::issue_access_token(config.signing_key(), &user.email, &user.id);
    Ok(Json(AuthResponse {
        token,
        user_id: user.id,
        email: user.email,
    }))
}

#[post("/login", data = "<body>")]
pub fn login(
    pool: &State<DbPool>,
    config: &State<Config>,
    limiter: &State<RateLimiter>,
    body: Json<Credentials>,
) -> Result<Json<AuthResponse>, (Status, Json<Value>)> {
    let email = body.email.trim().to_lowercase();
    if !limiter.try_acquire(&format!("login:{}", email)) {
        return Err((
            Status::TooManyRequests,
            Json(json!({ "error": "Too many attempts, slow down" })),
        ));
    }

    let user = User::get_by_email(pool, &email);
    let verified = match &user {
        Some(u) => match &u.password_hash {
            Some(hash) => auth::verify_password(&body.password, hash),
            None => false,
        },
        None => false,
    };
    let user = match (user, verified) {
        (Some(u), true) => u,
        _ => {
            return Err((
                Status::Unauthorized,
                Json(json!({ "error": "Invalid credentials" })),
            ))
        }
    };
    let token = auth::issue_access_token(config.signing_key(), &user.email, &user.id);
    Ok(Json(AuthResponse {
        token,
        user_id: user.id,
        email: user.email,
    }))
}

/// Always answers 200; `authenticated: false` with empty connections when no
/// valid bearer token came along.
#[get("/status")]
pub fn status(pool: &State<DbPool>, user: Option<ApiUser>) -> Json<Value> {
    match user {
        Some(u) => Json(json!({
            "authenticated": true,
            "email": u.email,
            "connections": {
                "google_analytics": Connection::exists(pool, &u.id, SOURCE_GOOGLE),
                "instagram": Connection::exists(pool, &u.id, SOURCE_INSTAGRAM),
            },
        })),
        None => Json(json!({
            "authenticated": false,
            "connections": {
                "google_analytics": false,
                "instagram": false,
            },
        })),
    }
}

fn frontend_redirect(config: &Config, provider: &str, status: &str, token: Option<&str>) -> Redirect {
    let mut url = format!(
        "{}/connect/callback?provider={}&status={}",
        config.frontend_url, provider, status
    );
    if let Some(t) = token {
        url.push_str(&format!("&token={}", t));
    }
    Redirect::to(url)
}

/// Kick off the Google OAuth flow. Doubles as sign-in: the callback creates
/// the account when the email is new.
#[get("/google/start?<return_to>")]
pub fn google_start(config: &State<Config>, return_to: Option<String>) -> Redirect {
    let state = oauth::issue_state(
        config.signing_key(),
        return_to.as_deref().unwrap_or("/dashboard"),
        None,
    );
    Redirect::to(oauth::google_auth_url(config, &state))
}

#[get("/google/callback?<code>&<state>&<error>")]
pub fn google_callback(
    pool: &State<DbPool>,
    config: &State<Config>,
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
) -> Redirect {
    if let Some(e) = error {
        log::warn!("[auth] google oauth denied: {}", e);
        return frontend_redirect(config, "google", "error", None);
    }
    let (code, state) = match (code, state) {
        (Some(c), Some(s)) => (c, s),
        _ => return frontend_redirect(config, "google", "error", None),
    };
    if oauth::verify_state(config.signing_key(), &state).is_none() {
        log::warn!("[auth] google callback with bad state");
        return frontend_redirect(config, "google", "error", None);
    }

    let tokens = match oauth::exchange_google_code(config, &code) {
        Ok(t) => t,
        Err(e) => {
            log::error!("[auth] google code exchange failed: {}", e);
            return frontend_redirect(config, "google", "error", None);
        }
    };
    let identity = match oauth::fetch_google_userinfo(&tokens.access_token) {
        Ok(i) => i,
        Err(e) => {
            log::error!("[auth] google userinfo failed: {}", e);
            return frontend_redirect(config, "google", "error", None);
        }
    };

    let user = match User::get_by_email(pool, &identity.email) {
        Some(u) => u,
        None => match User::create(pool, &identity.email, None, Some(&identity.sub)) {
            Ok(u) => u,
            Err(e) => {
                log::error!("[auth] could not create user for google login: {}", e);
                return frontend_redirect(config, "google", "error", None);
            }
        },
    };
    if user.google_sub.is_none() {
        let _ = User::set_google_sub(pool, &user.id, Some(&identity.sub));
    }

    let expires_at = Utc::now().naive_utc() + Duration::seconds(tokens.expires_in);
    if let Err(e) = Connection::upsert(
        pool,
        &user.id,
        SOURCE_GOOGLE,
        Some(&identity.sub),
        Some(&tokens.access_token),
        tokens.refresh_token.as_deref(),
        Some(expires_at),
    ) {
        log::error!("[auth] could not store google connection: {}", e);
        return frontend_redirect(config, "google", "error", None);
    }

    let token = auth::issue_access_token(config.signing_key(), &user.email, &user.id);
    frontend_redirect(config, "google", "success", Some(&token))
}

/// Hard-deletes the connection row; there is no soft-disconnected state.
#[post("/google/disconnect")]
pub fn google_disconnect(
    pool: &State<DbPool>,
    user: ApiUser,
) -> Result<Json<Value>, (Status, Json<Value>)> {
    let removed = Connection::delete(pool, &user.id, SOURCE_GOOGLE).map_err(|e| {
        (
            Status::InternalServerError,
            Json(json!({ "error": e })),
        )
    })?;
    let _ = User::set_google_sub(pool, &user.id, None);
    Ok(Json(json!({ "disconnected": removed })))
}

#[post("/instagram/disconnect")]
pub fn instagram_disconnect(
    pool: &State<DbPool>,
    user: ApiUser,
) -> Result<Json<Value>, (Status, Json<Value>)> {
    let removed = Connection::delete(pool, &user.id, SOURCE_INSTAGRAM).map_err(|e| {
        (
            Status::InternalServerError,
            Json(json!({ "error": e })),
        )
    })?;
    Ok(Json(json!({ "disconnected": removed })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        register,
        login,
        status,
        google_start,
        google_callback,
        google_disconnect,
        instagram_disconnect
    ]
}
