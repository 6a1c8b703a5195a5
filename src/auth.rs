use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::Config;
use crate::db::DbPool;
use crate::models::user::User;

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_TOKEN_DAYS: i64 = 30;
pub const UNSUBSCRIBE_TOKEN_DAYS: i64 = 365;

// ── Passwords ───────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String, String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| e.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

// ── Signed tokens ───────────────────────────────────────
//
// Format: `base64url(json payload).hmac_hex`. The signature covers the encoded
// payload, so any claim struct that serializes to JSON can ride in a token.

pub fn hmac_signature(secret: &str, data: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn sign_claims<T: Serialize>(secret: &str, claims: &T) -> String {
    let payload = serde_json::to_string(claims).unwrap_or_default();
    let encoded = URL_SAFE_NO_PAD.encode(payload.as_bytes());
    let sig = hmac_signature(secret, &encoded);
    format!("{}.{}", encoded, sig)
}

/// Verify the signature and decode the claims. Expiry is the caller's job
/// since not every claim struct carries one the same way.
pub fn verify_claims<T: DeserializeOwned>(secret: &str, token: &str) -> Option<T> {
    let dot = token.rfind('.')?;
    let encoded = &token[..dot];
    let sig = &token[dot + 1..];
    let expected = hmac_signature(secret, encoded);
    if !constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
        return None;
    }
    let payload = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    serde_json::from_slice(&payload).ok()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub uid: String,
    pub purpose: String,
    pub exp: i64,
}

pub fn issue_access_token(secret: &str, email: &str, user_id: &str) -> String {
    let claims = TokenClaims {
        sub: email.to_string(),
        uid: user_id.to_string(),
        purpose: "access".to_string(),
        exp: (Utc::now() + chrono::Duration::days(ACCESS_TOKEN_DAYS)).timestamp(),
    };
    sign_claims(secret, &claims)
}

/// Long-lived capability token embedded in digest unsubscribe links. It must
/// work from a cold email client, so all the authorization rides in the URL.
pub fn issue_unsubscribe_token(secret: &str, user_id: &str) -> String {
    let claims = TokenClaims {
        sub: String::new(),
        uid: user_id.to_string(),
        purpose: "unsubscribe".to_string(),
        exp: (Utc::now() + chrono::Duration::days(UNSUBSCRIBE_TOKEN_DAYS)).timestamp(),
    };
    sign_claims(secret, &claims)
}

pub fn verify_token(secret: &str, token: &str, purpose: &str) -> Option<TokenClaims> {
    let claims: TokenClaims = verify_claims(secret, token)?;
    if claims.purpose != purpose || claims.exp < Utc::now().timestamp() {
        return None;
    }
    Some(claims)
}

fn bearer_token<'a>(request: &'a Request<'_>) -> Option<&'a str> {
    request
        .headers()
        .get_one("Authorization")?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ── Request guards ──────────────────────────────────────

/// Guard for routes requiring a valid bearer access token. Resolves the
/// backing user row so deleted accounts can't keep using old tokens.
pub struct ApiUser {
    pub id: String,
    pub email: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ApiUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match request.guard::<&State<Config>>().await {
            Outcome::Success(c) => c,
            _ => return Outcome::Error((Status::Unauthorized, ())),
        };
        let pool = match request.guard::<&State<DbPool>>().await {
            Outcome::Success(p) => p,
            _ => return Outcome::Error((Status::Unauthorized, ())),
        };

        let token = match bearer_token(request) {
            Some(t) => t,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };
        let claims = match verify_token(config.signing_key(), token, "access") {
            Some(c) => c,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };
        match User::get_by_id(pool, &claims.uid) {
            Some(user) => Outcome::Success(ApiUser {
                id: user.id,
                email: user.email,
            }),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// Guard for admin endpoints. Compares the bearer token against ADMIN_TOKEN
/// and answers 404 on any mismatch so the routes stay invisible to outsiders.
pub struct AdminUser;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match request.guard::<&State<Config>>().await {
            Outcome::Success(c) => c,
            _ => return Outcome::Error((Status::NotFound, ())),
        };
        if config.admin_token.is_empty() {
            return Outcome::Error((Status::NotFound, ()));
        }
        match bearer_token(request) {
            Some(t) if constant_time_eq(t.as_bytes(), config.admin_token.as_bytes()) => {
                Outcome::Success(AdminUser)
            }
            _ => Outcome::Error((Status::NotFound, ())),
        }
    }
}

/// Raw value of the webhook signature header, if present.
pub struct WebhookSignature(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WebhookSignature {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let sig = request
            .headers()
            .get_one("X-Webhook-Signature")
            .map(|s| s.trim().to_string());
        Outcome::Success(WebhookSignature(sig))
    }
}

/// Verify an HMAC-SHA256 hex signature over the raw webhook body.
pub fn verify_webhook_signature(secret: &str, body: &str, signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let expected = hmac_signature(secret, body);
    constant_time_eq(signature.as_bytes(), expected.as_bytes())
}
