use chrono::NaiveDate;
use serde::Serialize;

use crate::db::DbPool;
use crate::models::connection::{Connection, SOURCE_GOOGLE, SOURCE_INSTAGRAM};
use crate::models::metric::{Agg, Metric};

#[derive(Debug, Serialize)]
pub struct InsightGroup {
    pub group: String,
    pub bullets: Vec<String>,
}

struct WindowContext {
    ga_connected: bool,
    ig_connected: bool,
    sessions: f64,
    sessions_prev: f64,
    reach: f64,
    engagement: f64,
}

fn compare_period(start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
    let span = end - start;
    let compare_end = start - chrono::Duration::days(1);
    (compare_end - span, compare_end)
}

fn gather(pool: &DbPool, user_id: &str, start: NaiveDate, end: NaiveDate) -> WindowContext {
    let (prev_start, prev_end) = compare_period(start, end);
    WindowContext {
        ga_connected: Connection::exists(pool, user_id, SOURCE_GOOGLE),
        ig_connected: Connection::exists(pool, user_id, SOURCE_INSTAGRAM),
        sessions: Metric::aggregate_range(
            pool, user_id, Some(SOURCE_GOOGLE), "sessions", start, end, Agg::Sum,
        ),
        sessions_prev: Metric::aggregate_range(
            pool, user_id, Some(SOURCE_GOOGLE), "sessions", prev_start, prev_end, Agg::Sum,
        ),
        reach: Metric::aggregate_range(
            pool, user_id, Some(SOURCE_INSTAGRAM), "reach", start, end, Agg::Sum,
        ),
        engagement: Metric::aggregate_range(
            pool, user_id, Some(SOURCE_INSTAGRAM), "engagement", start, end, Agg::Avg,
        ),
    }
}

/// Rule-based insight bullets over the window's aggregates, grouped by theme.
/// Only cites metrics whose provider is actually connected.
pub fn generate(pool: &DbPool, user_id: &str, start: NaiveDate, end: NaiveDate) -> Vec<InsightGroup> {
    let ctx = gather(pool, user_id, start, end);
    let mut groups = Vec::new();

    if ctx.ga_connected {
        let mut bullets = Vec::new();
        if ctx.sessions_prev > 0.0 {
            let change_pct = (ctx.sessions - ctx.sessions_prev) / ctx.sessions_prev * 100.0;
            if change_pct.abs() > 5.0 {
                let direction = if change_pct > 0.0 { "increased" } else { "decreased" };
                bullets.push(format!(
                    "Sessions {} by {:.1}% vs previous period.",
                    direction,
                    change_pct.abs()
                ));
            } else {
                bullets.push("Sessions remained stable compared to previous period.".to_string());
            }
        } else if ctx.sessions > 0.0 {
            bullets.push(format!(
                "{:.0} sessions this period with no prior baseline yet.",
                ctx.sessions
            ));
        }
        if !bullets.is_empty() {
            groups.push(InsightGroup {
                group: "Traffic".to_string(),
                bullets,
            });
        }
    }

    if ctx.ig_connected {
        let mut bullets = Vec::new();
        if ctx.reach > 0.0 {
            bullets.push(format!(
                "Instagram reached {:.0} users during this period.",
                ctx.reach
            ));
        }
        if ctx.engagement > 0.0 {
            bullets.push(format!("Average engagement rate: {:.2}%.", ctx.engagement));
        }
        if !bullets.is_empty() {
            groups.push(InsightGroup {
                group: "Social Media".to_string(),
                bullets,
            });
        }
    }

    if groups.is_empty() {
        groups.push(InsightGroup {
            group: "General".to_string(),
            bullets: vec!["Not enough data available for insights.".to_string()],
        });
    }
    groups
}
