use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use crate::auth::{self, WebhookSignature};
use crate::config::Config;
use crate::db::DbPool;
use crate::models::email_event::EmailEvent;

/// Email delivery events pushed by the provider. The signature covers the
/// raw body, so the handler takes the body as a string and parses after
/// verification. Duplicate deliveries dedupe on the provider's event id.
#[post("/email", data = "<body>")]
pub fn email_event(
    pool: &State<DbPool>,
    config: &State<Config>,
    signature: WebhookSignature,
    body: String,
) -> Result<Json<Value>, (Status, Json<Value>)> {
    let sig = signature.0.ok_or((
        Status::Unauthorized,
        Json(json!({ "error": "Missing signature" })),
    ))?;
    if !auth::verify_webhook_signature(&config.webhook_secret, &body, &sig) {
        log::warn!("[webhook] rejected email event with bad signature");
        return Err((
            Status::Unauthorized,
            Json(json!({ "error": "Invalid signature" })),
        ));
    }

    let payload: Value = serde_json::from_str(&body).map_err(|_| {
        (
            Status::BadRequest,
            Json(json!({ "error": "Body is not valid JSON" })),
        )
    })?;

    let event_type = payload["type"].as_str().unwrap_or("unknown");
    let data = &payload["data"];
    let provider_id = data["email_id"]
        .as_str()
        .or_else(|| payload["email_id"].as_str())
        .ok_or((
            Status::BadRequest,
            Json(json!({ "error": "Event has no email_id" })),
        ))?;
    let recipient = match &data["to"] {
        Value::Array(list) => list.first().and_then(|v| v.as_str()).unwrap_or(""),
        Value::String(s) => s.as_str(),
        _ => "",
    };
    let subject = data["subject"].as_str();

    let inserted = EmailEvent::insert_ignore(pool, recipient, event_type, provider_id, subject, &body)
        .map_err(|e| {
            (
                Status::InternalServerError,
                Json(json!({ "error": e })),
            )
        })?;

    if inserted {
        log::info!(
            "[webhook] email event type={} recipient={} id={}",
            event_type,
            recipient,
            provider_id
        );
    }
    Ok(Json(json!({ "received": true, "duplicate": !inserted })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![email_event]
}
