//! Canonical record → Notion page properties.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use tracing::warn;

use intakesync_notion::PropertyMap;
use intakesync_notion::properties;
use intakesync_shared::{CanonicalRequestRecord, IntakeSyncError, Result};

// Property names in the remote database.
pub const PROP_ID: &str = "ID";
pub const PROP_TITLE: &str = "Title";
pub const PROP_TYPE: &str = "Type";
pub const PROP_REQUEST_FOR: &str = "Request For";
pub const PROP_TEAM: &str = "Team";
pub const PROP_NOTES: &str = "Notes";
pub const PROP_AMOUNT: &str = "Amount";
pub const PROP_DUE_DATE: &str = "Due Date";
pub const PROP_URGENCY: &str = "Urgency";
pub const PROP_STATUS: &str = "Status";

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?").expect("valid regex")
});

/// Build the full property map for `record`.
///
/// `Amount` is only sent when the record carries one, so a page's amount is
/// never cleared by a sheet without the column. A malformed due date is sent
/// as an unset date.
pub fn build_properties(record: &CanonicalRequestRecord) -> PropertyMap {
    let mut props = PropertyMap::new();
    props.insert(PROP_ID.into(), properties::integer(i64::from(record.id)));
    props.insert(PROP_TITLE.into(), properties::title(&record.title));
    props.insert(
        PROP_TYPE.into(),
        properties::select(record.request_type.as_str()),
    );
    props.insert(
        PROP_REQUEST_FOR.into(),
        properties::rich_text(&record.request_for),
    );
    props.insert(PROP_TEAM.into(), properties::rich_text(&record.team));
    props.insert(PROP_NOTES.into(), properties::rich_text(&record.notes));

    if let Some(amount) = &record.amount {
        props.insert(PROP_AMOUNT.into(), properties::number(parse_amount(amount)));
    }

    let due = record.due_date.trim();
    let start = if due.is_empty() {
        None
    } else {
        match parse_due_date(due) {
            Ok(dt) => Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Err(e) => {
                warn!(id = record.id, due_date = %due, error = %e, "sending unset due date");
                None
            }
        }
    };
    props.insert(PROP_DUE_DATE.into(), properties::date(start.as_deref()));

    props.insert(PROP_URGENCY.into(), properties::select(&record.urgency));
    props.insert(PROP_STATUS.into(), properties::select(&record.status));
    props
}

/// Lenient amount parse: the longest leading numeric prefix, else `0`.
///
/// A leading currency symbol and thousands separators are ignored, so
/// `"$1,200.50 USD"` reads as `1200.5`.
pub fn parse_amount(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let unsigned = trimmed.trim_start_matches(['$', '€', '£']).trim_start();
    let cleaned: String = unsigned.chars().filter(|&c| c != ',').collect();

    LEADING_NUMBER
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parse a staging due date as UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]` and `MM/DD/YYYY`.
/// Dates without an offset are taken as UTC.
pub fn parse_due_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
        }
    }

    Err(IntakeSyncError::validation(format!(
        "unrecognized due date '{raw}'"
    )))
}
