use rocket::http::Status;
use rocket::response::content::RawHtml;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{AdminUser, ApiUser};
use crate::config::Config;
use crate::db::DbPool;
use crate::digest::{self, DigestError, DigestOutcome, RunSummary};
use crate::email::Mailer;

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub email: Option<String>,
}

/// Trigger a digest for one user. A signed-in user runs it for themselves;
/// the admin token may target any email. Idempotent per period.
#[post("/run", data = "<body>")]
pub fn run(
    pool: &State<DbPool>,
    config: &State<Config>,
    mailer: &State<Arc<dyn Mailer>>,
    user: Option<ApiUser>,
    admin: Option<AdminUser>,
    body: Option<Json<RunBody>>,
) -> Result<Json<DigestOutcome>, (Status, Json<Value>)> {
    let requested = body.and_then(|b| b.email.clone());
    let email = match (&user, &admin, requested) {
        (_, Some(_), Some(email)) => email,
        (Some(u), _, None) => u.email.clone(),
        (Some(u), None, Some(email)) => {
            if email.to_lowercase() != u.email {
                return Err((
                    Status::Forbidden,
                    Json(json!({ "error": "Cannot run a digest for another user" })),
                ));
            }
            email
        }
        _ => {
            return Err((
                Status::Unauthorized,
                Json(json!({ "error": "Authentication required" })),
            ))
        }
    };

    match digest::run_for_user(pool, config, mailer.inner().as_ref(), &email) {
        Ok(outcome) => Ok(Json(outcome)),
        Err(DigestError::UserNotFound) => Err((
            Status::NotFound,
            Json(json!({ "error": "No account with that email" })),
        )),
        Err(DigestError::Db(e)) => Err((
            Status::InternalServerError,
            Json(json!({ "error": e })),
        )),
    }
}

/// Sweep every opted-in user. Admin only; answers 200 with a cooldown status
/// when a run started too recently, so at-least-once schedulers stay quiet.
#[post("/scheduled-run-all")]
pub fn run_all(
    pool: &State<DbPool>,
    config: &State<Config>,
    mailer: &State<Arc<dyn Mailer>>,
    _admin: AdminUser,
) -> Json<RunSummary> {
    Json(digest::run_for_all(pool, config, mailer.inner().as_ref()))
}

#[get("/unsubscribe?<token>")]
pub fn unsubscribe(
    pool: &State<DbPool>,
    config: &State<Config>,
    token: String,
) -> Result<RawHtml<String>, (Status, RawHtml<String>)> {
    match digest::unsubscribe(pool, config, &token) {
        Ok(user) => Ok(RawHtml(format!(
            "<html><body style=\"font-family: sans-serif; text-align: center; padding: 60px;\">\
             <h1>You're unsubscribed</h1>\
             <p>{} will no longer receive weekly digest emails.</p>\
             </body></html>",
            user.email
        ))),
        Err(e) => {
            log::warn!("[digest] unsubscribe rejected: {}", e);
            Err((
                Status::BadRequest,
                RawHtml(
                    "<html><body style=\"font-family: sans-serif; text-align: center; padding: 60px;\">\
                     <h1>Invalid link</h1>\
                     <p>This unsubscribe link is invalid or has expired.</p>\
                     </body></html>"
                        .to_string(),
                ),
            ))
        }
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![run, run_all, unsubscribe]
}
