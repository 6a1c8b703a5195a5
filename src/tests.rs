#![cfg(test)]

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::{json, Map, Value};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::auth;
use crate::config::Config;
use crate::db::{run_migrations, DbPool};
use crate::digest;
use crate::email::{send_with_retry, Mailer, OutboundEmail, SendError, MAX_ATTEMPTS};
use crate::ingest;
use crate::insights;
use crate::models::connection::{Connection, SOURCE_GOOGLE, SOURCE_INSTAGRAM};
use crate::models::digest::{DigestLog, DigestRun};
use crate::models::email_event::EmailEvent;
use crate::models::metric::{Agg, Metric};
use crate::models::user::User;
use crate::oauth;
use crate::rate_limit::RateLimiter;

/// Atomic counter for unique shared-cache DB names so parallel tests don't collide.
static TEST_DB_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Fresh in-memory SQLite pool with migrations applied. Uses a named
/// shared-cache in-memory DB so multiple connections see the same data.
fn test_pool() -> DbPool {
    let id = TEST_DB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let uri = format!("file:testdb_{}?mode=memory&cache=shared", id);
    let manager = SqliteConnectionManager::file(uri);
    let pool = Pool::builder()
        .max_size(2)
        .build(manager)
        .expect("Failed to create test pool");
    {
        let conn = pool.get().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    }
    run_migrations(&pool).expect("Failed to run migrations");
    pool
}

/// Fast bcrypt hash for tests (cost=4 instead of DEFAULT_COST=12).
fn fast_hash(password: &str) -> String {
    bcrypt::hash(password, 4).unwrap()
}

fn make_user(pool: &DbPool, email: &str) -> User {
    User::create(pool, email, Some(&fast_hash("hunter2!pass")), None).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Records deliveries and plays back a scripted sequence of results.
/// An empty script means every delivery succeeds.
struct MockMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    script: Mutex<Vec<Result<(), SendError>>>,
}

impl MockMailer {
    fn new() -> MockMailer {
        MockMailer {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(Vec::new()),
        }
    }

    fn scripted(results: Vec<Result<(), SendError>>) -> MockMailer {
        MockMailer {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(results),
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn attempts(&self) -> usize {
        self.sent_count()
    }
}

impl Mailer for MockMailer {
    fn deliver(&self, mail: &OutboundEmail) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(OutboundEmail {
            to: mail.to.clone(),
            subject: mail.subject.clone(),
            html: mail.html.clone(),
            text: mail.text.clone(),
        });
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(())
        } else {
            script.remove(0)
        }
    }
}

fn sample_mail() -> OutboundEmail {
    OutboundEmail {
        to: "someone@example.com".to_string(),
        subject: "hello".to_string(),
        html: "<p>hi</p>".to_string(),
        text: "hi".to_string(),
    }
}

// ═══════════════════════════════════════════════════════════
// Users and auth
// ═══════════════════════════════════════════════════════════

#[test]
fn user_create_and_lookup() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    assert_eq!(user.email, "alice@example.com");
    assert!(user.opt_in_digest);

    let found = User::get_by_email(&pool, "alice@example.com").unwrap();
    assert_eq!(found.id, user.id);
    assert!(User::get_by_email(&pool, "nobody@example.com").is_none());
}

#[test]
fn duplicate_email_rejected() {
    let pool = test_pool();
    make_user(&pool, "alice@example.com");
    let dup = User::create(&pool, "alice@example.com", Some(&fast_hash("x")), None);
    assert!(dup.is_err());
}

#[test]
fn password_verification() {
    let hash = fast_hash("correct horse");
    assert!(auth::verify_password("correct horse", &hash));
    assert!(!auth::verify_password("wrong horse", &hash));
}

#[test]
fn access_token_round_trip() {
    let token = auth::issue_access_token("secret", "alice@example.com", "uid-1");
    let claims = auth::verify_token("secret", &token, "access").unwrap();
    assert_eq!(claims.sub, "alice@example.com");
    assert_eq!(claims.uid, "uid-1");
}

#[test]
fn token_rejects_wrong_purpose_and_tampering() {
    let token = auth::issue_unsubscribe_token("secret", "uid-1");
    assert!(auth::verify_token("secret", &token, "unsubscribe").is_some());
    // An unsubscribe link must never double as an API credential.
    assert!(auth::verify_token("secret", &token, "access").is_none());
    assert!(auth::verify_token("other-secret", &token, "unsubscribe").is_none());

    let mut tampered = token.clone();
    tampered.push('a');
    assert!(auth::verify_token("secret", &tampered, "unsubscribe").is_none());
}

#[test]
fn opted_in_listing_respects_flag() {
    let pool = test_pool();
    let a = make_user(&pool, "a@example.com");
    let b = make_user(&pool, "b@example.com");
    User::set_opt_in_digest(&pool, &b.id, false).unwrap();

    let opted: Vec<String> = User::list_opted_in(&pool).into_iter().map(|u| u.id).collect();
    assert!(opted.contains(&a.id));
    assert!(!opted.contains(&b.id));
}

// ═══════════════════════════════════════════════════════════
// OAuth state and connections
// ═══════════════════════════════════════════════════════════

#[test]
fn oauth_state_round_trip() {
    let token = oauth::issue_state("secret", "/dashboard", Some("uid-7"));
    let state = oauth::verify_state("secret", &token).unwrap();
    assert_eq!(state.return_to, "/dashboard");
    assert_eq!(state.uid.as_deref(), Some("uid-7"));
    assert!(oauth::verify_state("other", &token).is_none());
}

#[test]
fn connection_upsert_is_single_row() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");

    Connection::upsert(&pool, &user.id, SOURCE_GOOGLE, Some("sub-1"), Some("tok-1"), None, None)
        .unwrap();
    let again = Connection::upsert(
        &pool,
        &user.id,
        SOURCE_GOOGLE,
        Some("sub-1"),
        Some("tok-2"),
        Some("refresh-1"),
        None,
    )
    .unwrap();

    assert_eq!(again.access_token.as_deref(), Some("tok-2"));
    assert_eq!(Connection::list_for_user(&pool, &user.id).len(), 1);
}

#[test]
fn disconnect_deletes_the_row() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    Connection::upsert(&pool, &user.id, SOURCE_INSTAGRAM, None, Some("tok"), None, None).unwrap();
    assert!(Connection::exists(&pool, &user.id, SOURCE_INSTAGRAM));

    assert!(Connection::delete(&pool, &user.id, SOURCE_INSTAGRAM).unwrap());
    assert!(!Connection::exists(&pool, &user.id, SOURCE_INSTAGRAM));
    assert!(Connection::get(&pool, &user.id, SOURCE_INSTAGRAM).is_none());
    // Second delete is a no-op, not an error.
    assert!(!Connection::delete(&pool, &user.id, SOURCE_INSTAGRAM).unwrap());
}

// ═══════════════════════════════════════════════════════════
// Ingest and aggregation
// ═══════════════════════════════════════════════════════════

#[test]
fn ingest_skips_non_numeric_values() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");

    let mut values: Map<String, Value> = Map::new();
    values.insert("sessions".into(), json!(42));
    values.insert("conversions".into(), json!(3.5));
    values.insert("note".into(), json!("not a number"));
    values.insert("flags".into(), json!([1, 2]));

    let out = ingest::ingest(&pool, &user.id, SOURCE_GOOGLE, date("2026-08-20"), &values).unwrap();
    assert_eq!(out.inserted, 2);
    assert!(out.accepted.contains(&"sessions".to_string()));
    assert!(out.accepted.contains(&"conversions".to_string()));
    assert_eq!(Metric::count_for_user(&pool, &user.id), 2);
}

#[test]
fn ingest_is_append_only() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    let mut values: Map<String, Value> = Map::new();
    values.insert("sessions".into(), json!(10));

    ingest::ingest(&pool, &user.id, SOURCE_GOOGLE, date("2026-08-20"), &values).unwrap();
    ingest::ingest(&pool, &user.id, SOURCE_GOOGLE, date("2026-08-20"), &values).unwrap();

    // Same day twice means two rows; dedup is not this layer's job.
    assert_eq!(Metric::count_for_user(&pool, &user.id), 2);
    assert_eq!(Metric::sum_all_time(&pool, &user.id, "sessions"), 20.0);
}

#[test]
fn aggregates_are_tenant_isolated() {
    let pool = test_pool();
    let alice = make_user(&pool, "alice@example.com");
    let bob = make_user(&pool, "bob@example.com");

    let mut values: Map<String, Value> = Map::new();
    values.insert("sessions".into(), json!(100));
    ingest::ingest(&pool, &alice.id, SOURCE_GOOGLE, date("2026-08-20"), &values).unwrap();

    assert_eq!(Metric::sum_all_time(&pool, &alice.id, "sessions"), 100.0);
    assert_eq!(Metric::sum_all_time(&pool, &bob.id, "sessions"), 0.0);

    let bob_timeline = ingest::timeline(&pool, &bob.id, 30);
    let total: f64 = bob_timeline
        .iter()
        .flat_map(|p| p.values.values())
        .sum();
    assert_eq!(total, 0.0);
}

#[test]
fn dashboard_tiles_zero_fill_all_metrics() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    let tiles = ingest::dashboard_tiles(&pool, &user.id);
    assert_eq!(tiles.len(), 4);
    assert!(tiles.iter().all(|t| t.value == 0.0));

    let mut values: Map<String, Value> = Map::new();
    values.insert("reach".into(), json!(500));
    ingest::ingest(&pool, &user.id, SOURCE_INSTAGRAM, date("2026-08-20"), &values).unwrap();
    values.insert("reach".into(), json!(250));
    ingest::ingest(&pool, &user.id, SOURCE_INSTAGRAM, date("2026-08-21"), &values).unwrap();

    let tiles = ingest::dashboard_tiles(&pool, &user.id);
    let reach = tiles.iter().find(|t| t.name == "reach").unwrap();
    assert_eq!(reach.value, 750.0);
}

#[test]
fn timeline_has_one_point_per_day() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    let points = ingest::timeline(&pool, &user.id, 7);
    assert_eq!(points.len(), 7);
    for pair in points.windows(2) {
        assert_eq!(pair[1].date - pair[0].date, ChronoDuration::days(1));
    }
    // Every tracked metric present even with no data.
    assert!(points.iter().all(|p| p.values.len() == 4));
}

#[test]
fn aggregate_range_sum_and_avg() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    for (day, v) in [("2026-08-18", 10), ("2026-08-19", 20), ("2026-08-20", 30)] {
        let mut values: Map<String, Value> = Map::new();
        values.insert("engagement".into(), json!(v));
        ingest::ingest(&pool, &user.id, SOURCE_INSTAGRAM, date(day), &values).unwrap();
    }

    let start = date("2026-08-18");
    let end = date("2026-08-20");
    let sum = Metric::aggregate_range(
        &pool, &user.id, Some(SOURCE_INSTAGRAM), "engagement", start, end, Agg::Sum,
    );
    let avg = Metric::aggregate_range(
        &pool, &user.id, Some(SOURCE_INSTAGRAM), "engagement", start, end, Agg::Avg,
    );
    assert_eq!(sum, 60.0);
    assert_eq!(avg, 20.0);

    // Window filter excludes the last day.
    let partial = Metric::aggregate_range(
        &pool, &user.id, Some(SOURCE_INSTAGRAM), "engagement", start, date("2026-08-19"), Agg::Sum,
    );
    assert_eq!(partial, 30.0);
}

// ═══════════════════════════════════════════════════════════
// Rate limiter
// ═══════════════════════════════════════════════════════════

#[test]
fn rate_limiter_allows_burst_then_blocks() {
    let limiter = RateLimiter::new(10, Duration::from_secs(2));
    let now = Instant::now();
    for _ in 0..10 {
        assert!(limiter.try_acquire_at("key", now));
    }
    assert!(!limiter.try_acquire_at("key", now));
}

#[test]
fn rate_limiter_refills_over_time() {
    let limiter = RateLimiter::new(10, Duration::from_secs(2));
    let now = Instant::now();
    for _ in 0..10 {
        assert!(limiter.try_acquire_at("key", now));
    }
    assert!(!limiter.try_acquire_at("key", now));
    // One token back after the refill interval, exactly one more acquire.
    let later = now + Duration::from_secs(2);
    assert!(limiter.try_acquire_at("key", later));
    assert!(!limiter.try_acquire_at("key", later));
}

#[test]
fn rate_limiter_cleanup_keeps_depleted_buckets() {
    let limiter = RateLimiter::new(10, Duration::from_secs(2));
    let now = Instant::now();
    for _ in 0..10 {
        assert!(limiter.try_acquire_at("key", now));
    }
    // Cleanup only drops fully-refilled buckets; a depleted one must survive
    // so the caller cannot reset its own limit.
    limiter.cleanup();
    assert!(!limiter.try_acquire_at("key", now));
}

#[test]
fn rate_limiter_keys_are_independent() {
    let limiter = RateLimiter::new(10, Duration::from_secs(2));
    let now = Instant::now();
    for _ in 0..10 {
        assert!(limiter.try_acquire_at("alice", now));
    }
    assert!(!limiter.try_acquire_at("alice", now));
    assert!(limiter.try_acquire_at("bob", now));
}

// ═══════════════════════════════════════════════════════════
// Email retry policy
// ═══════════════════════════════════════════════════════════

#[test]
fn terminal_failure_is_not_retried() {
    let mailer = MockMailer::scripted(vec![Err(SendError::Terminal("bad recipient".into()))]);
    let result = send_with_retry(&mailer, &sample_mail());
    assert!(matches!(result, Err(SendError::Terminal(_))));
    assert_eq!(mailer.attempts(), 1);
}

#[test]
fn retryable_failure_retries_then_succeeds() {
    let mailer = MockMailer::scripted(vec![
        Err(SendError::Retryable("429".into())),
        Err(SendError::Retryable("503".into())),
        Ok(()),
    ]);
    assert!(send_with_retry(&mailer, &sample_mail()).is_ok());
    assert_eq!(mailer.attempts(), 3);
}

#[test]
fn retryable_failures_exhaust_into_terminal() {
    let mailer = MockMailer::scripted(vec![
        Err(SendError::Retryable("timeout".into())),
        Err(SendError::Retryable("timeout".into())),
        Err(SendError::Retryable("timeout".into())),
        Ok(()),
    ]);
    let result = send_with_retry(&mailer, &sample_mail());
    assert!(matches!(result, Err(SendError::Terminal(_))));
    assert_eq!(mailer.attempts(), MAX_ATTEMPTS);
}

// ═══════════════════════════════════════════════════════════
// Digest periods and KPIs
// ═══════════════════════════════════════════════════════════

#[test]
fn last_completed_week_is_monday_to_sunday() {
    // Wednesday 2026-08-26 18:00 UTC.
    let now = Utc.with_ymd_and_hms(2026, 8, 26, 18, 0, 0).unwrap();
    let (start, end) = digest::last_completed_week(now);
    assert_eq!(start, date("2026-08-17"));
    assert_eq!(end, date("2026-08-23"));
    assert_eq!((end - start).num_days(), 6);
}

#[test]
fn last_completed_week_on_monday_returns_previous_week() {
    // Monday 2026-08-24 just after midnight Pacific (07:01 UTC).
    let now = Utc.with_ymd_and_hms(2026, 8, 24, 7, 1, 0).unwrap();
    let (start, end) = digest::last_completed_week(now);
    assert_eq!(start, date("2026-08-17"));
    assert_eq!(end, date("2026-08-23"));
}

#[test]
fn collect_kpis_totals_and_best_day() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    let start = date("2026-08-17");
    let end = date("2026-08-23");

    for (day, sessions, conversions) in [
        ("2026-08-17", 100, 2),
        ("2026-08-19", 80, 9),
        ("2026-08-21", 120, 4),
    ] {
        let mut values: Map<String, Value> = Map::new();
        values.insert("sessions".into(), json!(sessions));
        values.insert("conversions".into(), json!(conversions));
        ingest::ingest(&pool, &user.id, SOURCE_GOOGLE, date(day), &values).unwrap();
    }

    let kpis = digest::collect_kpis(&pool, &user.id, start, end);
    assert_eq!(kpis.timeline.len(), 7);
    assert_eq!(kpis.totals.sessions, 300);
    assert_eq!(kpis.totals.conversions, 15);
    // Best day ranks by conversions first, not sessions.
    assert_eq!(kpis.best_day.date, date("2026-08-19"));
}

#[test]
fn wow_delta_edge_cases() {
    let pool = test_pool();
    let user = make_user(&pool, "a@example.com");
    let cur = digest::collect_kpis(&pool, &user.id, date("2026-08-17"), date("2026-08-23"));
    let prev = digest::collect_kpis(&pool, &user.id, date("2026-08-10"), date("2026-08-16"));

    // Nothing either week: all deltas are zero.
    let deltas = digest::wow_deltas(&cur.totals, &prev.totals);
    assert!(deltas.iter().all(|(_, d)| *d == 0.0));

    let mut values: Map<String, Value> = Map::new();
    values.insert("sessions".into(), json!(50));
    ingest::ingest(&pool, &user.id, SOURCE_GOOGLE, date("2026-08-18"), &values).unwrap();

    // Metric appearing from nothing reads as +100%.
    let cur = digest::collect_kpis(&pool, &user.id, date("2026-08-17"), date("2026-08-23"));
    let deltas = digest::wow_deltas(&cur.totals, &prev.totals);
    let sessions_delta = deltas.iter().find(|(n, _)| *n == "sessions").unwrap().1;
    assert_eq!(sessions_delta, 100.0);
}

#[test]
fn subject_leads_with_best_delta_when_meaningful() {
    let subject = digest::subject_line(&[("sessions", 23.4), ("reach", 4.0)]);
    assert_eq!(subject, "Your Weekly Digest: Sessions up 23%");

    // Nothing above the threshold falls back to the plain subject.
    let subject = digest::subject_line(&[("sessions", 4.9), ("reach", -12.0)]);
    assert_eq!(subject, "Your Weekly Living Lytics Digest");
}

// ═══════════════════════════════════════════════════════════
// Digest dispatch
// ═══════════════════════════════════════════════════════════

#[test]
fn digest_sends_once_per_period() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::new();
    let user = make_user(&pool, "alice@example.com");

    let first = digest::run_for_user(&pool, &config, &mailer, &user.email).unwrap();
    assert_eq!(first.status, "sent");
    assert_eq!(mailer.sent_count(), 1);
    assert_eq!(DigestLog::count_for_user(&pool, &user.id), 1);

    let second = digest::run_for_user(&pool, &config, &mailer, &user.email).unwrap();
    assert_eq!(second.status, "skipped");
    assert_eq!(mailer.sent_count(), 1);
    assert_eq!(DigestLog::count_for_user(&pool, &user.id), 1);
}

#[test]
fn digest_for_unknown_email_is_not_found() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::new();
    let result = digest::run_for_user(&pool, &config, &mailer, "ghost@example.com");
    assert!(matches!(result, Err(digest::DigestError::UserNotFound)));
    assert_eq!(mailer.sent_count(), 0);
}

#[test]
fn explicit_digest_bypasses_opt_out() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::new();
    let user = make_user(&pool, "alice@example.com");
    User::set_opt_in_digest(&pool, &user.id, false).unwrap();

    let outcome = digest::run_for_user(&pool, &config, &mailer, &user.email).unwrap();
    assert_eq!(outcome.status, "sent");
    assert_eq!(mailer.sent_count(), 1);
}

#[test]
fn failed_send_is_logged_as_error() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::scripted(vec![Err(SendError::Terminal("rejected".into()))]);
    let user = make_user(&pool, "alice@example.com");

    let outcome = digest::run_for_user(&pool, &config, &mailer, &user.email).unwrap();
    assert_eq!(outcome.status, "error");

    let (start, end) = digest::last_completed_week(Utc::now());
    let row = DigestLog::get(&pool, &user.id, start, end).unwrap();
    assert_eq!(row.status, "error");
    assert!(row.error_message.is_some());

    // The failed period is logged, so a blind re-run does not re-send.
    let again = digest::run_for_user(&pool, &config, &mailer, &user.email).unwrap();
    assert_eq!(again.status, "skipped");
}

#[test]
fn digest_email_contains_unsubscribe_link() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::new();
    let user = make_user(&pool, "alice@example.com");

    digest::run_for_user(&pool, &config, &mailer, &user.email).unwrap();
    let sent = mailer.sent.lock().unwrap();
    assert!(sent[0].html.contains("/v1/digest/unsubscribe?token="));
    assert_eq!(sent[0].to, user.email);
}

#[test]
fn sweep_only_reaches_opted_in_users() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::new();
    let alice = make_user(&pool, "alice@example.com");
    let bob = make_user(&pool, "bob@example.com");
    User::set_opt_in_digest(&pool, &bob.id, false).unwrap();

    let summary = digest::run_for_all(&pool, &config, &mailer);
    assert_eq!(summary.status, "completed");
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.errors, 0);

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, alice.email);
}

#[test]
fn sweep_refuses_within_cooldown() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::new();
    make_user(&pool, "alice@example.com");

    let first = digest::run_for_all(&pool, &config, &mailer);
    assert_eq!(first.status, "completed");

    let second = digest::run_for_all(&pool, &config, &mailer);
    assert_eq!(second.status, "cooldown");
    // No extra emails went out.
    assert_eq!(mailer.sent_count(), 1);
}

#[test]
fn sweep_records_run_row() {
    let pool = test_pool();
    let config = Config::for_tests();
    let mailer = MockMailer::new();
    make_user(&pool, "alice@example.com");

    digest::run_for_all(&pool, &config, &mailer);
    let run = DigestRun::latest(&pool).unwrap();
    assert_eq!(run.sent_count, 1);
    assert_eq!(run.error_count, 0);
    assert!(run.finished_at.is_some());
}

#[test]
fn unsubscribe_flips_opt_in() {
    let pool = test_pool();
    let config = Config::for_tests();
    let user = make_user(&pool, "alice@example.com");
    assert!(user.opt_in_digest);

    let token = auth::issue_unsubscribe_token(config.signing_key(), &user.id);
    let unsubbed = digest::unsubscribe(&pool, &config, &token).unwrap();
    assert_eq!(unsubbed.id, user.id);

    let reloaded = User::get_by_id(&pool, &user.id).unwrap();
    assert!(!reloaded.opt_in_digest);

    assert!(digest::unsubscribe(&pool, &config, "garbage-token").is_err());
}

// ═══════════════════════════════════════════════════════════
// Webhooks
// ═══════════════════════════════════════════════════════════

#[test]
fn webhook_signature_verification() {
    let body = r#"{"type":"email.delivered"}"#;
    let sig = auth::hmac_signature("hook-secret", body);
    assert!(auth::verify_webhook_signature("hook-secret", body, &sig));
    assert!(!auth::verify_webhook_signature("hook-secret", body, "deadbeef"));
    assert!(!auth::verify_webhook_signature("other-secret", body, &sig));
    // Empty secret means verification can never pass.
    assert!(!auth::verify_webhook_signature("", body, &sig));
}

#[test]
fn email_events_dedupe_on_provider_id() {
    let pool = test_pool();
    let first = EmailEvent::insert_ignore(
        &pool,
        "alice@example.com",
        "email.bounced",
        "evt_123",
        Some("Your Weekly Digest"),
        "{}",
    )
    .unwrap();
    let second = EmailEvent::insert_ignore(
        &pool,
        "alice@example.com",
        "email.bounced",
        "evt_123",
        Some("Your Weekly Digest"),
        "{}",
    )
    .unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(EmailEvent::count(&pool), 1);

    let stored = EmailEvent::get_by_provider_id(&pool, "evt_123").unwrap();
    assert_eq!(stored.event_type, "email.bounced");
}

// ═══════════════════════════════════════════════════════════
// Insights
// ═══════════════════════════════════════════════════════════

#[test]
fn insights_fall_back_when_nothing_connected() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    let groups = insights::generate(&pool, &user.id, date("2026-08-17"), date("2026-08-23"));
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group, "General");
}

#[test]
fn insights_mention_traffic_change() {
    let pool = test_pool();
    let user = make_user(&pool, "alice@example.com");
    Connection::upsert(&pool, &user.id, SOURCE_GOOGLE, None, Some("tok"), None, None).unwrap();

    // Previous window 100 sessions, current window 200: a 100% increase.
    let mut values: Map<String, Value> = Map::new();
    values.insert("sessions".into(), json!(100));
    ingest::ingest(&pool, &user.id, SOURCE_GOOGLE, date("2026-08-12"), &values).unwrap();
    values.insert("sessions".into(), json!(200));
    ingest::ingest(&pool, &user.id, SOURCE_GOOGLE, date("2026-08-19"), &values).unwrap();

    let groups = insights::generate(&pool, &user.id, date("2026-08-17"), date("2026-08-23"));
    let traffic = groups.iter().find(|g| g.group == "Traffic").unwrap();
    assert!(traffic.bullets.iter().any(|b| b.contains("increased")));
}
