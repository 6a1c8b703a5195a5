use chrono::{Duration, NaiveDate, Utc};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::ApiUser;
use crate::db::DbPool;
use crate::models::connection::{SOURCE_GOOGLE, SOURCE_INSTAGRAM};
use crate::models::metric::{Agg, Metric};
use crate::routes::CachedJson;

struct WidgetDef {
    key: &'static str,
    source: &'static str,
    metric: &'static str,
    agg: Agg,
}

/// Known widget keys and how each one aggregates. Unknown keys are 404s,
/// not empty results.
const REGISTRY: &[WidgetDef] = &[
    WidgetDef {
        key: "ga4.users",
        source: SOURCE_GOOGLE,
        metric: "total_users",
        agg: Agg::Sum,
    },
    WidgetDef {
        key: "ga4.sessions",
        source: SOURCE_GOOGLE,
        metric: "sessions",
        agg: Agg::Sum,
    },
    WidgetDef {
        key: "ga4.conv_rate",
        source: SOURCE_GOOGLE,
        metric: "conversions",
        agg: Agg::Avg,
    },
    WidgetDef {
        key: "ig.engagement_rate",
        source: SOURCE_INSTAGRAM,
        metric: "engagement",
        agg: Agg::Avg,
    },
    WidgetDef {
        key: "ig.content_perf",
        source: SOURCE_INSTAGRAM,
        metric: "reach",
        agg: Agg::Sum,
    },
];

#[derive(Debug, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct WidgetData {
    pub key: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub value: f64,
    pub series: Vec<SeriesPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare: Option<WidgetCompare>,
}

#[derive(Debug, Serialize)]
pub struct WidgetCompare {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub value: f64,
    /// Fractional change vs the mirrored previous window; absent when the
    /// previous window had nothing to compare against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

#[get("/<key>?<start>&<end>&<compare>")]
pub fn widget(
    pool: &State<DbPool>,
    user: ApiUser,
    key: String,
    start: Option<String>,
    end: Option<String>,
    compare: Option<bool>,
) -> Result<CachedJson<WidgetData>, (Status, Json<Value>)> {
    let def = REGISTRY.iter().find(|d| d.key == key).ok_or((
        Status::NotFound,
        Json(json!({ "error": format!("unknown widget '{}'", key) })),
    ))?;

    let parse = |s: Option<String>, fallback: NaiveDate| {
        s.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
            .unwrap_or(fallback)
    };
    let today = Utc::now().date_naive();
    let end = parse(end, today);
    let start = parse(start, end - Duration::days(6));
    if start > end {
        return Err((
            Status::BadRequest,
            Json(json!({ "error": "start must not be after end" })),
        ));
    }

    let value = Metric::aggregate_range(
        pool,
        &user.id,
        Some(def.source),
        def.metric,
        start,
        end,
        def.agg,
    );
    let series = Metric::daily_series(
        pool,
        &user.id,
        Some(def.source),
        def.metric,
        start,
        end,
        def.agg,
    )
    .into_iter()
    .map(|(date, value)| SeriesPoint { date, value })
    .collect();

    let compare = if compare.unwrap_or(false) {
        let span = end - start;
        let prev_end = start - Duration::days(1);
        let prev_start = prev_end - span;
        let prev_value = Metric::aggregate_range(
            pool,
            &user.id,
            Some(def.source),
            def.metric,
            prev_start,
            prev_end,
            def.agg,
        );
        let delta = if prev_value > 0.0 {
            Some((value - prev_value) / prev_value)
        } else {
            None
        };
        Some(WidgetCompare {
            start: prev_start,
            end: prev_end,
            value: prev_value,
            delta,
        })
    } else {
        None
    };

    Ok(CachedJson(Json(WidgetData {
        key,
        start,
        end,
        value,
        series,
        compare,
    })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![widget]
}
