//! Storage engine for the memory bank
//!
//! Handles SQLite database operations, WAL mode, and schema management.
//! Query modules take a `&Connection` and stay synchronous; async callers go
//! through [`Storage::call`] and [`Storage::transaction_for`].

mod connection;
mod migrations;
pub mod projects;
pub mod queries;
pub mod sessions;

pub use connection::Storage;
pub use migrations::SCHEMA_VERSION;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text
pub(crate) fn format_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Current time at the precision timestamps are stored with
pub(crate) fn timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
