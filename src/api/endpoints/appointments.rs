//! Calendar feed.
//!
//! `GET /api/appointments?start=..&end=..`: real sessions plus virtual
//! occurrences of active recurring rules. Accepts either full datetimes
//! or plain dates (a bare `end` date is inclusive).

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::scheduling::{self, CalendarEvent};

/// Default window when the client sends no bounds.
const DEFAULT_WINDOW_DAYS: i64 = 30;
/// Longest window a single feed request may span.
const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Deserialize)]
pub struct FeedQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

fn parse_bound(raw: &str, is_end: bool) -> Result<NaiveDateTime, ApiError> {
    let raw = raw.trim();
    // FullCalendar sends offsets; only the wall time is kept.
    let wall = raw.get(..19).unwrap_or(raw);
    if let Ok(dt) = NaiveDateTime::parse_from_str(wall, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(wall, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    let day = NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date: {raw}")))?;
    let midnight = day.and_time(NaiveTime::MIN);
    Ok(if is_end { midnight + Duration::days(1) } else { midnight })
}

fn check_window(start: NaiveDateTime, end: NaiveDateTime) -> Result<(), ApiError> {
    if end <= start {
        return Err(ApiError::BadRequest("end must be after start".into()));
    }
    if end - start > Duration::days(MAX_WINDOW_DAYS) {
        return Err(ApiError::BadRequest(format!(
            "window may span at most {MAX_WINDOW_DAYS} days"
        )));
    }
    Ok(())
}

/// `GET /api/appointments`
pub async fn feed(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<CalendarEvent>>, ApiError> {
    let start = match query.start.as_deref() {
        Some(raw) => parse_bound(raw, false)?,
        None => chrono::Local::now().date_naive().and_time(NaiveTime::MIN),
    };
    let end = match query.end.as_deref() {
        Some(raw) => parse_bound(raw, true)?,
        None => start + Duration::days(DEFAULT_WINDOW_DAYS),
    };
    check_window(start, end)?;

    let conn = ctx.core.open_db()?;
    let events = scheduling::calendar_feed(&conn, &auth.user.id, start, end)?;
    Ok(Json(events))
}
