use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::models::connection::{Connection, SOURCE_GOOGLE, SOURCE_INSTAGRAM};

/// Read one day of metrics from the connection's provider, normalized to a
/// name → value map in our canonical metric names. An empty map means the
/// provider had no data for that day, so the caller writes nothing.
pub fn fetch_day(connection: &Connection, date: NaiveDate) -> Result<Map<String, Value>, String> {
    match connection.source_name.as_str() {
        SOURCE_GOOGLE => fetch_ga4_day(connection, date),
        SOURCE_INSTAGRAM => fetch_instagram_day(connection, date),
        other => Err(format!("unknown source {}", other)),
    }
}

fn client() -> Result<reqwest::blocking::Client, String> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| e.to_string())
}

/// GA4 Data API runReport for a single day.
/// account_ref holds the numeric property id.
fn fetch_ga4_day(connection: &Connection, date: NaiveDate) -> Result<Map<String, Value>, String> {
    let token = connection
        .access_token
        .as_deref()
        .ok_or("connection has no access token")?;
    let property = connection
        .account_ref
        .as_deref()
        .ok_or("connection has no GA4 property reference")?;
    let day = date.format("%Y-%m-%d").to_string();

    let body = json!({
        "dateRanges": [{ "startDate": day, "endDate": day }],
        "metrics": [
            { "name": "sessions" },
            { "name": "totalUsers" },
            { "name": "conversions" },
        ],
    });

    let resp = client()?
        .post(format!(
            "https://analyticsdata.googleapis.com/v1beta/properties/{}:runReport",
            property
        ))
        .header("Authorization", format!("Bearer {}", token))
        .json(&body)
        .send()
        .map_err(|e| format!("GA4 request failed: {}", e))?;

    if !resp.status().is_success() {
        return Err(format!("GA4 returned {}", resp.status()));
    }

    let report: Value = resp.json().map_err(|e| format!("bad GA4 response: {}", e))?;
    let mut out = Map::new();
    let names = ["sessions", "total_users", "conversions"];
    if let Some(values) = report["rows"][0]["metricValues"].as_array() {
        for (i, mv) in values.iter().enumerate().take(names.len()) {
            if let Some(v) = mv["value"].as_str().and_then(|s| s.parse::<f64>().ok()) {
                out.insert(names[i].to_string(), json!(v));
            }
        }
    }
    Ok(out)
}

/// Instagram Graph insights for a single day.
/// account_ref holds the IG user id.
fn fetch_instagram_day(
    connection: &Connection,
    date: NaiveDate,
) -> Result<Map<String, Value>, String> {
    let token = connection
        .access_token
        .as_deref()
        .ok_or("connection has no access token")?;
    let ig_user = connection
        .account_ref
        .as_deref()
        .ok_or("connection has no Instagram account reference")?;

    let since = date
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc().timestamp())
        .unwrap_or_default();
    let until = since + 86_400;

    let resp = client()?
        .get(format!("https://graph.instagram.com/{}/insights", ig_user))
        .query(&[
            ("metric", "reach,impressions,accounts_engaged"),
            ("period", "day"),
            ("since", &since.to_string()),
            ("until", &until.to_string()),
            ("access_token", token),
        ])
        .send()
        .map_err(|e| format!("Instagram request failed: {}", e))?;

    if !resp.status().is_success() {
        return Err(format!("Instagram returned {}", resp.status()));
    }

    let report: Value = resp
        .json()
        .map_err(|e| format!("bad Instagram response: {}", e))?;
    let mut out = Map::new();
    if let Some(series) = report["data"].as_array() {
        for entry in series {
            let name = match entry["name"].as_str() {
                Some("reach") => "reach",
                Some("impressions") => "impressions",
                Some("accounts_engaged") => "engagement",
                _ => continue,
            };
            if let Some(v) = entry["values"][0]["value"].as_f64() {
                out.insert(name.to_string(), json!(v));
            }
        }
    }
    Ok(out)
}
