//! Call log listing endpoint types and handler.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::keys::query_rejection;
use super::server::AppState;
use crate::admin::ADMIN_KEY_HEADER;
use crate::error::Error;
use crate::storage::{LogWindow, StoredCallLog};

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

/// Query parameters for GET /v1/logs.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub since: Option<String>,
    pub until: Option<String>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

/// Paginated response for GET /v1/logs.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub data: Vec<StoredCallLog>,
    pub offset: u32,
    pub limit: u32,
    pub total: i64,
    pub since: String,
    pub until: String,
}

fn parse_bound(name: &str, value: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::bad_request(format!("Invalid '{}' timestamp: {}", name, e)))
}

/// Resolve query parameters into a window. Defaults to the last 24 hours.
pub fn resolve_window(params: &LogsQuery) -> Result<LogWindow, Error> {
    let now = Utc::now();
    let since = match params.since.as_deref() {
        Some(s) => parse_bound("since", s)?,
        None => now - Duration::hours(24),
    };
    let until = match params.until.as_deref() {
        Some(u) => parse_bound("until", u)?,
        None => now,
    };
    if since > until {
        return Err(Error::bad_request("'since' must not be after 'until'"));
    }

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(Error::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    Ok(LogWindow {
        since: since.to_rfc3339(),
        until: until.to_rfc3339(),
        offset: params.offset.unwrap_or(0),
        limit,
    })
}

/// Handle GET /v1/logs. Admin only: entries contain prompts and replies.
pub async fn logs_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<impl IntoResponse, Error> {
    let presented = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    if !state.admin.is_admin(presented) {
        return Err(Error::Forbidden);
    }
    let Query(params) = query.map_err(query_rejection)?;

    let window = resolve_window(&params)?;
    tracing::debug!(
        since = %window.since,
        until = %window.until,
        offset = window.offset,
        limit = window.limit,
        "Logs query"
    );

    let (data, total) = state.logger.list(&window).await?;

    Ok(Json(LogsResponse {
        data,
        offset: window.offset,
        limit: window.limit,
        total,
        since: window.since,
        until: window.until,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(since: Option<&str>, until: Option<&str>, limit: Option<u32>) -> LogsQuery {
        LogsQuery {
            since: since.map(String::from),
            until: until.map(String::from),
            offset: None,
            limit,
        }
    }

    #[test]
    fn default_window_is_last_day() {
        let window = resolve_window(&query(None, None, None)).unwrap();
        let since = DateTime::parse_from_rfc3339(&window.since).unwrap();
        let until = DateTime::parse_from_rfc3339(&window.until).unwrap();
        assert_eq!((until - since).num_hours(), 24);
        assert_eq!(window.limit, DEFAULT_LIMIT);
        assert_eq!(window.offset, 0);
    }

    #[test]
    fn explicit_bounds_are_normalized_to_utc() {
        let window = resolve_window(&query(
            Some("2026-01-01T02:00:00+02:00"),
            Some("2026-01-02T00:00:00Z"),
            Some(5),
        ))
        .unwrap();
        assert_eq!(window.since, "2026-01-01T00:00:00+00:00");
        assert_eq!(window.until, "2026-01-02T00:00:00+00:00");
        assert_eq!(window.limit, 5);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(resolve_window(&query(Some("yesterday"), None, None)).is_err());
        assert!(resolve_window(&query(None, None, Some(0))).is_err());
        assert!(resolve_window(&query(None, None, Some(101))).is_err());
        assert!(resolve_window(&query(
            Some("2026-02-01T00:00:00Z"),
            Some("2026-01-01T00:00:00Z"),
            None
        ))
        .is_err());
    }
}
