use chrono::{Datelike, Duration, NaiveDate, Utc};
use chrono_tz::America::Los_Angeles;
use serde::Serialize;

use crate::auth;
use crate::config::Config;
use crate::db::DbPool;
use crate::email::{send_with_retry, Mailer, OutboundEmail};
use crate::models::digest::{DigestLog, DigestRun};
use crate::models::metric::Metric;
use crate::models::user::User;

/// Minimum gap between batch sweeps. Guards against an at-least-once cron
/// trigger firing twice.
pub const SWEEP_COOLDOWN_MINS: i64 = 10;

/// Pause between per-user sends during a sweep, to stay under the email
/// provider's rate limits.
const SWEEP_THROTTLE_MS: u64 = 500;

#[derive(Debug)]
pub enum DigestError {
    UserNotFound,
    Db(String),
}

impl std::fmt::Display for DigestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestError::UserNotFound => write!(f, "user not found"),
            DigestError::Db(msg) => write!(f, "database error: {}", msg),
        }
    }
}

// ── Period calculation ──────────────────────────────────

/// Last completed Monday..Sunday week in America/Los_Angeles, as of `now`.
pub fn last_completed_week(now: chrono::DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let local = now.with_timezone(&Los_Angeles);
    let days_since_monday = local.weekday().num_days_from_monday() as i64;
    let current_monday = local.date_naive() - Duration::days(days_since_monday);
    let last_sunday = current_monday - Duration::days(1);
    let last_monday = last_sunday - Duration::days(6);
    (last_monday, last_sunday)
}

// ── KPI collection ──────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DayKpis {
    pub date: NaiveDate,
    pub sessions: i64,
    pub conversions: i64,
    pub reach: i64,
    pub engagement: i64,
}

impl DayKpis {
    fn get(&self, name: &str) -> i64 {
        match name {
            "sessions" => self.sessions,
            "conversions" => self.conversions,
            "reach" => self.reach,
            "engagement" => self.engagement,
            _ => 0,
        }
    }

    fn add(&mut self, name: &str, value: i64) {
        match name {
            "sessions" => self.sessions += value,
            "conversions" => self.conversions += value,
            "reach" => self.reach += value,
            "engagement" => self.engagement += value,
            _ => {}
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Kpis {
    pub totals: DayKpis,
    pub timeline: Vec<DayKpis>,
    pub best_day: DayKpis,
}

const KPI_NAMES: &[&str] = &["sessions", "conversions", "reach", "engagement"];

/// Totals and a zero-filled daily timeline for the window, plus the best day
/// (by conversions, falling back to sessions).
pub fn collect_kpis(pool: &DbPool, user_id: &str, start: NaiveDate, end: NaiveDate) -> Kpis {
    let span = (end - start).num_days().max(0);
    let mut timeline: Vec<DayKpis> = (0..=span)
        .map(|offset| DayKpis {
            date: start + Duration::days(offset),
            sessions: 0,
            conversions: 0,
            reach: 0,
            engagement: 0,
        })
        .collect();

    for (date, name, value) in Metric::grouped_range(pool, user_id, start, end) {
        let idx = (date - start).num_days();
        if idx >= 0 && (idx as usize) < timeline.len() {
            timeline[idx as usize].add(&name, value.round() as i64);
        }
    }

    let mut totals = DayKpis {
        date: start,
        sessions: 0,
        conversions: 0,
        reach: 0,
        engagement: 0,
    };
    for day in &timeline {
        for name in KPI_NAMES {
            totals.add(name, day.get(name));
        }
    }

    let best_day = timeline
        .iter()
        .max_by_key(|d| (d.conversions, d.sessions))
        .cloned()
        .unwrap_or_else(|| totals.clone());

    Kpis {
        totals,
        timeline,
        best_day,
    }
}

/// Week-over-week percentage deltas per KPI. A metric that appears from
/// nothing counts as +100%.
pub fn wow_deltas(current: &DayKpis, previous: &DayKpis) -> Vec<(&'static str, f64)> {
    KPI_NAMES
        .iter()
        .map(|name| {
            let cur = current.get(name) as f64;
            let prev = previous.get(name) as f64;
            let delta = if prev > 0.0 {
                (cur - prev) / prev * 100.0
            } else if cur > 0.0 {
                100.0
            } else {
                0.0
            };
            (*name, delta)
        })
        .collect()
}

// ── Rendering ───────────────────────────────────────────

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub fn subject_line(deltas: &[(&'static str, f64)]) -> String {
    let best = deltas
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    match best {
        Some((name, delta)) if *delta > 5.0 => {
            format!("Your Weekly Digest: {} up {:.0}%", capitalize(name), delta)
        }
        _ => "Your Weekly Living Lytics Digest".to_string(),
    }
}

fn delta_badge(deltas: &[(&'static str, f64)], name: &str) -> String {
    let delta = deltas
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| *d)
        .unwrap_or(0.0);
    if delta == 0.0 {
        return String::new();
    }
    let (color, arrow) = if delta > 0.0 {
        ("#10b981", "&uarr;")
    } else {
        ("#ef4444", "&darr;")
    };
    format!(
        "<div style=\"color: {}; font-size: 14px; margin-top: 5px;\">{} {:.1}% vs last week</div>",
        color,
        arrow,
        delta.abs()
    )
}

fn insight_bullets(totals: &DayKpis) -> Vec<String> {
    let mut insights = Vec::new();
    if totals.reach > 20_000 {
        insights.push(format!("Strong reach: {} impressions", totals.reach));
    }
    if totals.engagement > 1_000 {
        insights.push(format!("Great engagement: {} interactions", totals.engagement));
    }
    if totals.conversions > 500 {
        insights.push(format!("Excellent conversions: {}", totals.conversions));
    }
    if insights.is_empty() {
        insights.push("Keep building your presence!".to_string());
    }
    insights
}

pub fn render_digest_html(
    config: &Config,
    user: &User,
    period_start: NaiveDate,
    period_end: NaiveDate,
    kpis: &Kpis,
    deltas: &[(&'static str, f64)],
) -> String {
    let period_str = format!(
        "{} - {}",
        period_start.format("%b %d"),
        period_end.format("%b %d, %Y")
    );

    let unsubscribe_token = auth::issue_unsubscribe_token(config.signing_key(), &user.id);
    let unsubscribe_url = format!(
        "{}/v1/digest/unsubscribe?token={}",
        config.public_api_url, unsubscribe_token
    );

    let insights_html: String = insight_bullets(&kpis.totals)
        .iter()
        .map(|i| format!("<li>{}</li>", i))
        .collect();

    let timeline_html: String = kpis
        .timeline
        .iter()
        .map(|day| {
            format!(
                "<tr>\
                 <td style=\"padding: 8px; border-bottom: 1px solid #eee;\">{}</td>\
                 <td style=\"padding: 8px; border-bottom: 1px solid #eee; text-align: right;\">{}</td>\
                 <td style=\"padding: 8px; border-bottom: 1px solid #eee; text-align: right;\">{}</td>\
                 <td style=\"padding: 8px; border-bottom: 1px solid #eee; text-align: right;\">{}</td>\
                 <td style=\"padding: 8px; border-bottom: 1px solid #eee; text-align: right;\">{}</td>\
                 </tr>",
                day.date.format("%a %m/%d"),
                day.sessions,
                day.conversions,
                day.reach,
                day.engagement
            )
        })
        .collect();

    let card = |label: &str, value: i64, accent: &str, badge: String| {
        format!(
            "<div style=\"background: #f8f9fa; padding: 20px; border-radius: 8px; border-left: 4px solid {};\">\
             <div style=\"color: #666; font-size: 12px; text-transform: uppercase; letter-spacing: 1px;\">{}</div>\
             <div style=\"font-size: 32px; font-weight: bold; color: #333; margin-top: 5px;\">{}</div>{}</div>",
            accent, label, value, badge
        )
    };

    format!(
        "<!DOCTYPE html>\
<html><head><meta charset=\"UTF-8\"></head>\
<body style=\"font-family: -apple-system, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5;\">\
<div style=\"max-width: 600px; margin: 0 auto; background: white; border-radius: 8px; overflow: hidden;\">\
<div style=\"background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 30px; text-align: center;\">\
<h1 style=\"margin: 0; font-size: 28px;\">Your Weekly Analytics</h1>\
<p style=\"margin: 10px 0 0 0; opacity: 0.9;\">{period}</p></div>\
<div style=\"padding: 30px;\">\
<h2 style=\"margin: 0 0 20px 0; color: #333;\">Week Summary</h2>\
<div style=\"display: grid; grid-template-columns: 1fr 1fr; gap: 15px; margin-bottom: 30px;\">\
{card_sessions}{card_conversions}{card_reach}{card_engagement}</div>\
<h2 style=\"margin: 30px 0 15px 0; color: #333;\">Key Insights</h2>\
<ul style=\"padding-left: 20px; margin: 0;\">{insights}</ul>\
<div style=\"background: #fff8e1; padding: 20px; border-radius: 8px; margin: 20px 0; border-left: 4px solid #ffd54f;\">\
<h3 style=\"margin: 0 0 10px 0; color: #f57c00;\">Best Day</h3>\
<p style=\"margin: 0; color: #666;\"><strong>{best_date}</strong> was your highest performing day \
with <strong>{best_conv} conversions</strong> and <strong>{best_sess} sessions</strong>.</p></div>\
<h2 style=\"margin: 30px 0 15px 0; color: #333;\">Daily Breakdown</h2>\
<table style=\"width: 100%; border-collapse: collapse; font-size: 14px;\">\
<thead><tr style=\"background: #f8f9fa;\">\
<th style=\"padding: 12px 8px; text-align: left;\">Date</th>\
<th style=\"padding: 12px 8px; text-align: right;\">Sessions</th>\
<th style=\"padding: 12px 8px; text-align: right;\">Conv.</th>\
<th style=\"padding: 12px 8px; text-align: right;\">Reach</th>\
<th style=\"padding: 12px 8px; text-align: right;\">Eng.</th>\
</tr></thead><tbody>{timeline}</tbody></table>\
<div style=\"text-align: center; margin: 30px 0;\">\
<a href=\"{frontend}\" style=\"display: inline-block; background: #667eea; color: white; text-decoration: none; padding: 14px 32px; border-radius: 6px; font-weight: 600;\">View Full Dashboard</a></div></div>\
<div style=\"background: #f8f9fa; padding: 20px; text-align: center; font-size: 12px; color: #666;\">\
<p style=\"margin: 0 0 10px 0;\">Living Lytics Analytics</p>\
<p style=\"margin: 0;\"><a href=\"{unsub}\" style=\"color: #667eea; text-decoration: none;\">Unsubscribe from weekly digests</a></p>\
</div></div></body></html>",
        period = period_str,
        card_sessions = card("Sessions", kpis.totals.sessions, "#667eea", delta_badge(deltas, "sessions")),
        card_conversions = card("Conversions", kpis.totals.conversions, "#f093fb", delta_badge(deltas, "conversions")),
        card_reach = card("Reach", kpis.totals.reach, "#4facfe", delta_badge(deltas, "reach")),
        card_engagement = card("Engagement", kpis.totals.engagement, "#43e97b", delta_badge(deltas, "engagement")),
        insights = insights_html,
        best_date = kpis.best_day.date.format("%A, %B %d"),
        best_conv = kpis.best_day.conversions,
        best_sess = kpis.best_day.sessions,
        timeline = timeline_html,
        frontend = config.frontend_url,
        unsub = unsubscribe_url,
    )
}

pub fn render_digest_text(
    period_start: NaiveDate,
    period_end: NaiveDate,
    kpis: &Kpis,
) -> String {
    let mut text = format!(
        "Your weekly analytics, {} to {}\n\n\
         Sessions:    {}\n\
         Conversions: {}\n\
         Reach:       {}\n\
         Engagement:  {}\n\n\
         Best day: {} ({} conversions, {} sessions)\n",
        period_start.format("%b %d"),
        period_end.format("%b %d, %Y"),
        kpis.totals.sessions,
        kpis.totals.conversions,
        kpis.totals.reach,
        kpis.totals.engagement,
        kpis.best_day.date.format("%A, %B %d"),
        kpis.best_day.conversions,
        kpis.best_day.sessions,
    );
    for insight in insight_bullets(&kpis.totals) {
        text.push_str(&format!("- {}\n", insight));
    }
    text
}

// ── Dispatch ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DigestOutcome {
    pub status: String,
    pub message: String,
    pub user_email: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// Send this period's digest to one user, resolved by exact email match.
/// The explicit single-user send bypasses the opt-in flag; opt-in only
/// gates the batch sweep. Re-invoking for an already-logged period is a
/// no-op returning "skipped"; the caller already got what they asked for.
pub fn run_for_user(
    pool: &DbPool,
    config: &Config,
    mailer: &dyn Mailer,
    email: &str,
) -> Result<DigestOutcome, DigestError> {
    let user = User::get_by_email(pool, email).ok_or(DigestError::UserNotFound)?;
    let (period_start, period_end) = last_completed_week(Utc::now());

    if DigestLog::get(pool, &user.id, period_start, period_end).is_some() {
        log::info!(
            "[digest] user={} period={}..{} already attempted, skipping",
            user.email,
            period_start,
            period_end
        );
        return Ok(DigestOutcome {
            status: "skipped".to_string(),
            message: "Already sent for this period".to_string(),
            user_email: user.email,
            period_start,
            period_end,
        });
    }

    let kpis = collect_kpis(pool, &user.id, period_start, period_end);

    let prev_end = period_start - Duration::days(1);
    let prev_start = prev_end - Duration::days(6);
    let prev_kpis = collect_kpis(pool, &user.id, prev_start, prev_end);
    let deltas = wow_deltas(&kpis.totals, &prev_kpis.totals);

    let mail = OutboundEmail {
        to: user.email.clone(),
        subject: subject_line(&deltas),
        html: render_digest_html(config, &user, period_start, period_end, &kpis, &deltas),
        text: render_digest_text(period_start, period_end, &kpis),
    };

    match send_with_retry(mailer, &mail) {
        Ok(()) => {
            DigestLog::insert(pool, &user.id, period_start, period_end, "sent", None)
                .map_err(DigestError::Db)?;
            User::touch_last_digest_sent(pool, &user.id).map_err(DigestError::Db)?;
            log::info!(
                "[digest] user={} period={}..{} status=sent",
                user.email,
                period_start,
                period_end
            );
            Ok(DigestOutcome {
                status: "sent".to_string(),
                message: "Digest sent successfully".to_string(),
                user_email: user.email,
                period_start,
                period_end,
            })
        }
        Err(e) => {
            let msg = e.to_string();
            log::error!(
                "[digest] user={} period={}..{} status=error error={}",
                user.email,
                period_start,
                period_end,
                msg
            );
            DigestLog::insert(pool, &user.id, period_start, period_end, "error", Some(&msg))
                .map_err(DigestError::Db)?;
            Ok(DigestOutcome {
                status: "error".to_string(),
                message: msg,
                user_email: user.email,
                period_start,
                period_end,
            })
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub status: String,
    pub total_users: usize,
    pub sent: i64,
    pub skipped: i64,
    pub errors: i64,
    pub error_details: Vec<String>,
}

/// Sweep all opted-in users. Refuses to start when the newest digest run
/// began inside the cooldown window, reporting that run instead; otherwise
/// throttles between sends and records a digest_runs row.
pub fn run_for_all(pool: &DbPool, config: &Config, mailer: &dyn Mailer) -> RunSummary {
    if let Some(last) = DigestRun::latest(pool) {
        let age = Utc::now().naive_utc() - last.started_at;
        if age < Duration::minutes(SWEEP_COOLDOWN_MINS) {
            log::warn!(
                "[digest] sweep refused: previous run started {}s ago",
                age.num_seconds()
            );
            return RunSummary {
                status: "cooldown".to_string(),
                total_users: 0,
                sent: last.sent_count,
                skipped: 0,
                errors: last.error_count,
                error_details: vec![format!(
                    "previous run started at {} UTC",
                    last.started_at.format("%Y-%m-%d %H:%M:%S")
                )],
            };
        }
    }

    let run_id = match DigestRun::start(pool) {
        Ok(id) => id,
        Err(e) => {
            log::error!("[digest] could not record sweep start: {}", e);
            return RunSummary {
                status: "error".to_string(),
                total_users: 0,
                sent: 0,
                skipped: 0,
                errors: 1,
                error_details: vec![e],
            };
        }
    };

    let users = User::list_opted_in(pool);
    let mut summary = RunSummary {
        status: "completed".to_string(),
        total_users: users.len(),
        sent: 0,
        skipped: 0,
        errors: 0,
        error_details: Vec::new(),
    };

    for (i, user) in users.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(std::time::Duration::from_millis(SWEEP_THROTTLE_MS));
        }
        match run_for_user(pool, config, mailer, &user.email) {
            Ok(outcome) => match outcome.status.as_str() {
                "sent" => summary.sent += 1,
                "skipped" => summary.skipped += 1,
                _ => {
                    summary.errors += 1;
                    summary
                        .error_details
                        .push(format!("{}: {}", user.email, outcome.message));
                }
            },
            Err(e) => {
                summary.errors += 1;
                summary.error_details.push(format!("{}: {}", user.email, e));
            }
        }
    }

    if let Err(e) = DigestRun::finish(pool, run_id, summary.sent, summary.errors) {
        log::error!("[digest] could not record sweep finish: {}", e);
    }
    log::info!(
        "[digest] sweep complete: {} sent, {} skipped, {} errors",
        summary.sent,
        summary.skipped,
        summary.errors
    );
    summary
}

/// Verify an unsubscribe capability token and flip the user's opt-in flag.
/// Works with no session; authorization rides entirely in the token.
pub fn unsubscribe(pool: &DbPool, config: &Config, token: &str) -> Result<User, String> {
    let claims = auth::verify_token(config.signing_key(), token, "unsubscribe")
        .ok_or("invalid or expired unsubscribe token")?;
    let user = User::get_by_id(pool, &claims.uid).ok_or("user not found")?;
    User::set_opt_in_digest(pool, &user.id, false)?;
    log::info!("[digest] user={} unsubscribed", user.email);
    Ok(user)
}
