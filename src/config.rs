use std::env;

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Runtime configuration, read once from the environment at startup and
/// managed as Rocket state.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub secret_key: String,
    pub admin_token: String,

    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_uri: String,

    pub instagram_client_id: String,
    pub instagram_client_secret: String,
    pub instagram_redirect_uri: String,

    pub resend_api_key: String,
    pub mail_from: String,
    pub mail_from_name: String,
    pub webhook_secret: String,

    pub frontend_url: String,
    pub public_api_url: String,
}

impl Config {
    pub fn from_env() -> Config {
        let secret_key = var_or("SECRET_KEY", "");
        if secret_key.is_empty() {
            log::warn!("[config] SECRET_KEY not set, using insecure dev key");
        }

        let public_api_url = var_or("PUBLIC_API_URL", "http://localhost:8000");

        Config {
            db_path: var_or("LYTICS_DB", "data/lytics.db"),
            secret_key,
            admin_token: var_or("ADMIN_TOKEN", ""),

            google_client_id: var_or("GOOGLE_CLIENT_ID", ""),
            google_client_secret: var_or("GOOGLE_CLIENT_SECRET", ""),
            google_redirect_uri: var_or(
                "GOOGLE_REDIRECT_URI",
                &format!("{}/v1/auth/google/callback", public_api_url),
            ),

            instagram_client_id: var_or("INSTAGRAM_CLIENT_ID", ""),
            instagram_client_secret: var_or("INSTAGRAM_CLIENT_SECRET", ""),
            instagram_redirect_uri: var_or(
                "INSTAGRAM_REDIRECT_URI",
                &format!("{}/v1/connections/instagram/callback", public_api_url),
            ),

            resend_api_key: var_or("RESEND_API_KEY", ""),
            mail_from: var_or("MAIL_FROM", "digest@livinglytics.com"),
            mail_from_name: var_or("MAIL_FROM_NAME", "Living Lytics"),
            webhook_secret: var_or("WEBHOOK_SECRET", ""),

            frontend_url: var_or("FRONTEND_URL", "http://localhost:5000"),
            public_api_url,
        }
    }

    /// Key used for signing tokens and OAuth state. Falls back to a fixed
    /// dev key so local setups work without any environment.
    pub fn signing_key(&self) -> &str {
        if self.secret_key.is_empty() {
            "dev-secret-change-me"
        } else {
            &self.secret_key
        }
    }

    /// Names of required settings that are still unset. Non-empty means the
    /// service can start but is not ready for production traffic.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.secret_key.is_empty() {
            missing.push("SECRET_KEY");
        }
        if self.resend_api_key.is_empty() {
            missing.push("RESEND_API_KEY");
        }
        if self.webhook_secret.is_empty() {
            missing.push("WEBHOOK_SECRET");
        }
        missing
    }
}

#[cfg(test)]
impl Config {
    /// Fixed settings for tests, no environment reads.
    pub fn for_tests() -> Config {
        Config {
            db_path: ":memory:".to_string(),
            secret_key: "test-secret".to_string(),
            admin_token: "test-admin-token".to_string(),
            google_client_id: "test-google-id".to_string(),
            google_client_secret: "test-google-secret".to_string(),
            google_redirect_uri: "http://localhost:8000/v1/auth/google/callback".to_string(),
            instagram_client_id: "test-ig-id".to_string(),
            instagram_client_secret: "test-ig-secret".to_string(),
            instagram_redirect_uri: "http://localhost:8000/v1/connections/instagram/callback"
                .to_string(),
            resend_api_key: "test-resend-key".to_string(),
            mail_from: "digest@example.com".to_string(),
            mail_from_name: "Living Lytics".to_string(),
            webhook_secret: "test-webhook-secret".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            public_api_url: "http://localhost:8000".to_string(),
        }
    }
}
