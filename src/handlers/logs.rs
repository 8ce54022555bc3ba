// Call log retrieval and log-store connectivity endpoints.
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::types::LogQuery;
use crate::AppState;

// Raw query string of `GET /api/logs`. Everything is parsed by hand so bad
// values produce a `{success: false}` body instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    pub limit: Option<String>,
    pub skip: Option<String>,
    pub config_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl LogsParams {
    fn into_query(self) -> Result<LogQuery, String> {
        let mut query = LogQuery::default();

        if let Some(limit) = self.limit.filter(|v| !v.is_empty()) {
            query.limit = limit
                .parse::<i64>()
                .ok()
                .filter(|limit| *limit >= 0)
                .ok_or_else(|| format!("invalid limit: {}", limit))?;
        }
        if let Some(skip) = self.skip.filter(|v| !v.is_empty()) {
            query.skip = skip
                .parse()
                .map_err(|_| format!("invalid skip: {}", skip))?;
        }

        query.config_name = self.config_name.filter(|v| !v.is_empty());
        query.start_date = self.start_date.as_deref().map(parse_date).transpose()?;
        query.end_date = self.end_date.as_deref().map(parse_date).transpose()?;
        Ok(query)
    }
}

// Accepts RFC 3339 or a naive ISO date/datetime, read as UTC.
fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(at.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
        .ok_or_else(|| format!("invalid date: {}", raw))
}

// Handles `GET /api/logs`.
pub async fn handle_list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Json<Value> {
    let query = match params.into_query() {
        Ok(query) => query,
        Err(message) => return Json(json!({ "success": false, "message": message })),
    };
    debug!("Listing call logs: {:?}", query);

    let logs = state.log_sink.query(&query).await;
    Json(json!({ "success": true, "logs": logs }))
}

// Handles `GET /api/logs/stats`.
pub async fn handle_log_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.log_sink.stats().await;
    Json(json!({ "success": true, "stats": stats }))
}

// Handles `GET /api/test-mongodb`: reconnects with the current settings.
pub async fn handle_test_connection(State(state): State<AppState>) -> Json<Value> {
    let settings = state.settings.current();
    if state.log_sink.reconnect(&settings).await {
        Json(json!({ "success": true, "message": "MongoDB connection succeeded" }))
    } else {
        Json(json!({ "success": false, "message": "MongoDB connection failed" }))
    }
}
