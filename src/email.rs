use serde_json::json;
use std::time::Duration;

use crate::config::Config;

/// One rendered message ready to hand to the provider.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Send failure, split by whether another attempt could plausibly succeed.
/// 429 and 5xx responses are retryable; other 4xx (bad address, invalid
/// template) are terminal and never retried.
#[derive(Debug)]
pub enum SendError {
    Retryable(String),
    Terminal(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Retryable(msg) => write!(f, "retryable send failure: {}", msg),
            SendError::Terminal(msg) => write!(f, "send failure: {}", msg),
        }
    }
}

/// Single outbound delivery attempt. Implementations must not retry or write
/// state; bookkeeping belongs to the digest dispatcher.
pub trait Mailer: Send + Sync {
    fn deliver(&self, mail: &OutboundEmail) -> Result<(), SendError>;
}

/// Resend API client (https://resend.com/docs/api-reference/emails/send-email)
pub struct ResendMailer {
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn from_config(config: &Config) -> ResendMailer {
        ResendMailer {
            api_key: config.resend_api_key.clone(),
            from: format!("{} <{}>", config.mail_from_name, config.mail_from),
        }
    }
}

impl Mailer for ResendMailer {
    fn deliver(&self, mail: &OutboundEmail) -> Result<(), SendError> {
        if self.api_key.is_empty() {
            return Err(SendError::Terminal("Resend API key not configured".into()));
        }

        let payload = json!({
            "from": self.from,
            "to": [mail.to],
            "subject": mail.subject,
            "html": mail.html,
            "text": mail.text,
        });

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SendError::Terminal(format!("HTTP client error: {}", e)))?;

        let resp = client
            .post("https://api.resend.com/emails")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .map_err(|e| SendError::Retryable(format!("Resend request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().unwrap_or_default();
        let msg = format!("Resend returned {}: {}", status, text);
        if status.as_u16() == 429 || status.is_server_error() {
            Err(SendError::Retryable(msg))
        } else {
            Err(SendError::Terminal(msg))
        }
    }
}

/// Backoff schedule between attempts. Three attempts total, so the 2s cap
/// is only reached if the schedule is ever lengthened.
const RETRY_DELAYS: &[Duration] = &[
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

pub const MAX_ATTEMPTS: usize = 3;

/// Wrap one delivery in the bounded retry policy. Retryable failures are
/// re-attempted after the scheduled delay; terminal failures surface
/// immediately. The loop itself writes no state.
pub fn send_with_retry(mailer: &dyn Mailer, mail: &OutboundEmail) -> Result<(), SendError> {
    let mut attempt = 0;
    loop {
        match mailer.deliver(mail) {
            Ok(()) => return Ok(()),
            Err(SendError::Terminal(msg)) => return Err(SendError::Terminal(msg)),
            Err(SendError::Retryable(msg)) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    // Out of attempts; the transient failure is now final.
                    return Err(SendError::Terminal(msg));
                }
                let delay = RETRY_DELAYS[(attempt - 1).min(RETRY_DELAYS.len() - 1)];
                log::warn!(
                    "[email] attempt {}/{} to {} failed ({}), retrying in {:?}",
                    attempt,
                    MAX_ATTEMPTS,
                    mail.to,
                    msg,
                    delay
                );
                std::thread::sleep(delay);
            }
        }
    }
}
