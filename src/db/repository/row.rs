//! Column conversion helpers shared by the row mappers.
//!
//! Datetimes are stored as `YYYY-MM-DD HH:MM:SS` text, dates as
//! `YYYY-MM-DD`, times as `HH:MM`, ids as hyphenated UUID text.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn fmt_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn fmt_opt_datetime(dt: &Option<NaiveDateTime>) -> Option<String> {
    dt.as_ref().map(fmt_datetime)
}

pub fn fmt_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn fmt_time(t: &NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub fn uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

pub fn opt_uuid(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub fn datetime(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    parse_datetime(&s).map_err(|e| conversion_error(idx, e))
}

pub fn opt_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_datetime(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub fn date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

pub fn opt_date(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub fn time(row: &Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let s: String = row.get(idx)?;
    NaiveTime::parse_from_str(&s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(|e| conversion_error(idx, e))
}

/// Parse a str-backed enum column.
pub fn enumeration<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    T::from_str(&s).map_err(|e| conversion_error(idx, e))
}

pub fn opt_enumeration<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|s| T::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Accepts the canonical format plus the ISO `T` separator.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
}
