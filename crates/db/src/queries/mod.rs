// crates/db/src/queries/mod.rs
// Job store operations for the bizdiag SQLite database.

mod jobs;
pub(crate) mod row_types;

pub use jobs::StaleJob;

use chrono::{DateTime, SecondsFormat, Utc};

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
/// string comparison orders them chronologically.
pub(crate) fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_db_time() -> String {
    to_db_time(Utc::now())
}
