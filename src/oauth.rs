use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::auth;
use crate::config::Config;
use crate::db::DbPool;
use crate::models::connection::{Connection, SOURCE_GOOGLE, SOURCE_INSTAGRAM};

/// Provider rejected the code exchange (expired, reused, or mismatched
/// redirect). Callers surface this as an error redirect, never a 500.
#[derive(Debug)]
pub struct OAuthExchangeError(pub String);

impl std::fmt::Display for OAuthExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OAuth exchange failed: {}", self.0)
    }
}

/// Refresh lookahead per provider. Instagram long-lived tokens last ~60 days
/// and refresh within a 7-day window; Google access tokens last an hour.
const INSTAGRAM_REFRESH_LOOKAHEAD_DAYS: i64 = 7;
const GOOGLE_REFRESH_LOOKAHEAD_MINS: i64 = 5;

const STATE_TTL_MINS: i64 = 10;

fn http_client() -> Result<reqwest::blocking::Client, OAuthExchangeError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| OAuthExchangeError(format!("HTTP client error: {}", e)))
}

// ── State round-trip ────────────────────────────────────
//
// The `state` parameter is an HMAC-signed claim set carrying the caller's
// desired post-login destination (and the user id for connection-scoped
// flows), so the callback can redirect correctly without server-side state.

#[derive(Debug, Serialize, Deserialize)]
pub struct OauthState {
    pub return_to: String,
    pub uid: Option<String>,
    pub nonce: String,
    pub purpose: String,
    pub exp: i64,
}

pub fn issue_state(secret: &str, return_to: &str, uid: Option<&str>) -> String {
    use rand::Rng;
    let nonce: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let state = OauthState {
        return_to: return_to.to_string(),
        uid: uid.map(|s| s.to_string()),
        nonce,
        purpose: "oauth_state".to_string(),
        exp: (Utc::now() + ChronoDuration::minutes(STATE_TTL_MINS)).timestamp(),
    };
    auth::sign_claims(secret, &state)
}

pub fn verify_state(secret: &str, token: &str) -> Option<OauthState> {
    let state: OauthState = auth::verify_claims(secret, token)?;
    if state.purpose != "oauth_state" || state.exp < Utc::now().timestamp() {
        return None;
    }
    Some(state)
}

// ── Google ──────────────────────────────────────────────

pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

pub struct GoogleIdentity {
    pub email: String,
    pub sub: String,
}

pub fn google_auth_url(config: &Config, state: &str) -> String {
    let mut url = Url::parse("https://accounts.google.com/o/oauth2/v2/auth")
        .expect("static URL parses");
    url.query_pairs_mut()
        .append_pair("client_id", &config.google_client_id)
        .append_pair("redirect_uri", &config.google_redirect_uri)
        .append_pair("response_type", "code")
        .append_pair(
            "scope",
            "openid email profile https://www.googleapis.com/auth/analytics.readonly",
        )
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("state", state);
    url.to_string()
}

pub fn exchange_google_code(
    config: &Config,
    code: &str,
) -> Result<GoogleTokens, OAuthExchangeError> {
    let client = http_client()?;
    let resp = client
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("code", code),
            ("client_id", config.google_client_id.as_str()),
            ("client_secret", config.google_client_secret.as_str()),
            ("redirect_uri", config.google_redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .map_err(|e| OAuthExchangeError(format!("token request failed: {}", e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        return Err(OAuthExchangeError(format!(
            "Google token endpoint returned {}: {}",
            status, text
        )));
    }

    let body: Value = resp
        .json()
        .map_err(|e| OAuthExchangeError(format!("bad token response: {}", e)))?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| OAuthExchangeError("token response missing access_token".into()))?
        .to_string();
    Ok(GoogleTokens {
        access_token,
        refresh_token: body["refresh_token"].as_str().map(|s| s.to_string()),
        expires_in: body["expires_in"].as_i64().unwrap_or(3600),
    })
}

pub fn fetch_google_userinfo(access_token: &str) -> Result<GoogleIdentity, OAuthExchangeError> {
    let client = http_client()?;
    let resp = client
        .get("https://www.googleapis.com/oauth2/v3/userinfo")
        .header("Authorization", format!("Bearer {}", access_token))
        .send()
        .map_err(|e| OAuthExchangeError(format!("userinfo request failed: {}", e)))?;

    if !resp.status().is_success() {
        return Err(OAuthExchangeError(format!(
            "userinfo endpoint returned {}",
            resp.status()
        )));
    }

    let body: Value = resp
        .json()
        .map_err(|e| OAuthExchangeError(format!("bad userinfo response: {}", e)))?;
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let sub = body["sub"].as_str().unwrap_or_default().to_string();
    if email.is_empty() || sub.is_empty() {
        return Err(OAuthExchangeError("userinfo missing email or sub".into()));
    }
    Ok(GoogleIdentity { email, sub })
}

fn refresh_google_token(config: &Config, refresh_token: &str) -> Result<(String, i64), String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| e.to_string())?;
    let resp = client
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("client_id", config.google_client_id.as_str()),
            ("client_secret", config.google_client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("refresh returned {}", resp.status()));
    }
    let body: Value = resp.json().map_err(|e| e.to_string())?;
    let token = body["access_token"]
        .as_str()
        .ok_or("refresh response missing access_token")?
        .to_string();
    Ok((token, body["expires_in"].as_i64().unwrap_or(3600)))
}

// ── Instagram ───────────────────────────────────────────

pub struct InstagramTokens {
    pub access_token: String,
    pub user_id: String,
}

pub fn instagram_auth_url(config: &Config, state: &str) -> String {
    let mut url =
        Url::parse("https://api.instagram.com/oauth/authorize").expect("static URL parses");
    url.query_pairs_mut()
        .append_pair("client_id", &config.instagram_client_id)
        .append_pair("redirect_uri", &config.instagram_redirect_uri)
        .append_pair("scope", "user_profile,user_media")
        .append_pair("response_type", "code")
        .append_pair("state", state);
    url.to_string()
}

pub fn exchange_instagram_code(
    config: &Config,
    code: &str,
) -> Result<InstagramTokens, OAuthExchangeError> {
    let client = http_client()?;
    let resp = client
        .post("https://api.instagram.com/oauth/access_token")
        .form(&[
            ("client_id", config.instagram_client_id.as_str()),
            ("client_secret", config.instagram_client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", config.instagram_redirect_uri.as_str()),
            ("code", code),
        ])
        .send()
        .map_err(|e| OAuthExchangeError(format!("token request failed: {}", e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        return Err(OAuthExchangeError(format!(
            "Instagram token endpoint returned {}: {}",
            status, text
        )));
    }

    let body: Value = resp
        .json()
        .map_err(|e| OAuthExchangeError(format!("bad token response: {}", e)))?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| OAuthExchangeError("token response missing access_token".into()))?
        .to_string();
    // user_id comes back as a number
    let user_id = match &body["user_id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    Ok(InstagramTokens {
        access_token,
        user_id,
    })
}

/// Second hop: upgrade the short-lived token to a ~60-day long-lived one.
/// Returns (token, expires_in seconds).
pub fn upgrade_instagram_token(
    config: &Config,
    short_token: &str,
) -> Result<(String, i64), OAuthExchangeError> {
    let client = http_client()?;
    let resp = client
        .get("https://graph.instagram.com/access_token")
        .query(&[
            ("grant_type", "ig_exchange_token"),
            ("client_secret", config.instagram_client_secret.as_str()),
            ("access_token", short_token),
        ])
        .send()
        .map_err(|e| OAuthExchangeError(format!("exchange request failed: {}", e)))?;

    if !resp.status().is_success() {
        return Err(OAuthExchangeError(format!(
            "long-lived exchange returned {}",
            resp.status()
        )));
    }

    let body: Value = resp
        .json()
        .map_err(|e| OAuthExchangeError(format!("bad exchange response: {}", e)))?;
    let token = body["access_token"]
        .as_str()
        .ok_or_else(|| OAuthExchangeError("exchange response missing access_token".into()))?
        .to_string();
    Ok((token, body["expires_in"].as_i64().unwrap_or(5_184_000)))
}

pub fn fetch_instagram_profile(access_token: &str) -> Result<(String, String), OAuthExchangeError> {
    let client = http_client()?;
    let resp = client
        .get("https://graph.instagram.com/me")
        .query(&[("fields", "id,username"), ("access_token", access_token)])
        .send()
        .map_err(|e| OAuthExchangeError(format!("profile request failed: {}", e)))?;

    if !resp.status().is_success() {
        return Err(OAuthExchangeError(format!(
            "profile endpoint returned {}",
            resp.status()
        )));
    }

    let body: Value = resp
        .json()
        .map_err(|e| OAuthExchangeError(format!("bad profile response: {}", e)))?;
    let id = body["id"].as_str().unwrap_or_default().to_string();
    let username = body["username"].as_str().unwrap_or_default().to_string();
    Ok((id, username))
}

fn refresh_instagram_token(token: &str) -> Result<(String, i64), String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| e.to_string())?;
    let resp = client
        .get("https://graph.instagram.com/refresh_access_token")
        .query(&[("grant_type", "ig_refresh_token"), ("access_token", token)])
        .send()
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("refresh returned {}", resp.status()));
    }
    let body: Value = resp.json().map_err(|e| e.to_string())?;
    let new_token = body["access_token"]
        .as_str()
        .ok_or("refresh response missing access_token")?
        .to_string();
    Ok((new_token, body["expires_in"].as_i64().unwrap_or(5_184_000)))
}

// ── Lazy refresh ────────────────────────────────────────

/// Called before any provider-data read. If the stored token expires inside
/// the provider's lookahead window, refresh and overwrite it; on refresh
/// failure keep the old token and flag the connection stale in the log so
/// downstream reads still attempt it until it is provably dead.
pub fn refresh_if_needed(pool: &DbPool, config: &Config, connection: &Connection) -> Connection {
    let expires_at = match connection.expires_at {
        Some(t) => t,
        None => return connection.clone(),
    };
    let lookahead = match connection.source_name.as_str() {
        SOURCE_INSTAGRAM => ChronoDuration::days(INSTAGRAM_REFRESH_LOOKAHEAD_DAYS),
        _ => ChronoDuration::minutes(GOOGLE_REFRESH_LOOKAHEAD_MINS),
    };
    if expires_at > Utc::now().naive_utc() + lookahead {
        return connection.clone();
    }

    let refreshed = match connection.source_name.as_str() {
        SOURCE_GOOGLE => match connection.refresh_token.as_deref() {
            Some(rt) => refresh_google_token(config, rt),
            None => Err("no refresh token stored".to_string()),
        },
        SOURCE_INSTAGRAM => match connection.access_token.as_deref() {
            Some(t) => refresh_instagram_token(t),
            None => Err("no access token stored".to_string()),
        },
        other => Err(format!("unknown source {}", other)),
    };

    match refreshed {
        Ok((token, expires_in)) => {
            let new_expiry = Utc::now().naive_utc() + ChronoDuration::seconds(expires_in);
            if let Err(e) = Connection::update_tokens(pool, &connection.id, &token, Some(new_expiry))
            {
                log::error!("[oauth] failed to persist refreshed token: {}", e);
                return connection.clone();
            }
            log::info!(
                "[oauth] refreshed {} token for user {}",
                connection.source_name,
                connection.user_id
            );
            Connection::get(pool, &connection.user_id, &connection.source_name)
                .unwrap_or_else(|| connection.clone())
        }
        Err(e) => {
            log::warn!(
                "[oauth] {} token refresh failed for user {} ({}); connection is stale",
                connection.source_name,
                connection.user_id,
                e
            );
            connection.clone()
        }
    }
}
