//! tka - TikTok export import & analytics
//!
//! This library provides the core functionality for importing TikTok data
//! exports and analyzing post/follower history over time.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`error`] - Custom error types with rich context
//! - [`model`] - Data models for TikTok export data
//! - [`parser`] - Export parsing and shape detection
//! - [`importer`] - Reconciliation of parsed exports against the store
//! - [`history`] - Multi-export follower history diffing
//! - [`analytics`] - Trend, keyword, engagement, and growth reports
//! - [`storage`] - `SQLite` storage layer

pub mod analytics;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod importer;
pub mod logging;
pub mod model;
pub mod parser;
pub mod storage;

pub use cli::*;
pub use error::{
    Result, ResultExt, TkaError, VALID_GROUPINGS, VALID_METRICS, VALID_POLICIES, VALID_WINDOWS,
    find_closest_match, format_did_you_mean, format_error, format_unknown_value_error,
};
pub use importer::{DuplicatePolicy, ImportOptions, ImportReport};
pub use model::*;
pub use parser::ExportDocument;
pub use storage::Storage;

use chrono::{DateTime, Datelike, Utc};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "tka.db";

/// Standard width for content dividers in CLI output
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

/// Standard width for major header dividers in CLI output
pub const HEADER_DIVIDER_WIDTH: usize = 70;

/// Get the default data directory for tka
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("tka")
}

/// Get the default database path
#[must_use]
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Format an integer with thousands separators.
#[must_use]
pub fn format_number(value: i64) -> String {
    let abs = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(abs.len() + abs.len() / 3);

    for (idx, ch) in abs.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    let mut formatted: String = out.chars().rev().collect();
    if value < 0 {
        formatted.insert(0, '-');
    }
    formatted
}

/// Format a usize with thousands separators.
#[must_use]
pub fn format_number_usize(value: usize) -> String {
    format_number(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Format a signed delta with an explicit sign (`+3`, `-2`, `+0`).
#[must_use]
pub fn format_signed(value: i64) -> String {
    if value < 0 {
        format_number(value)
    } else {
        format!("+{}", format_number(value))
    }
}

/// Format a datetime as a human-friendly relative string.
///
/// Uses smart thresholds for readability:
/// - < 1 minute: "just now"
/// - < 1 hour: "Nm ago"
/// - < 24 hours: "Nh ago"
/// - < 7 days: "Nd ago"
/// - Same calendar year: "Mon D"
/// - Different year: "Mon D, YYYY"
#[must_use]
pub fn format_relative_date(dt: DateTime<Utc>) -> String {
    format_relative_date_with_base(dt, Utc::now())
}

/// Format a datetime relative to a fixed base time (useful for tests).
#[must_use]
pub fn format_relative_date_with_base(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(dt);

    // Handle future dates (shouldn't happen, but be safe)
    if duration.num_seconds() < 0 {
        return dt.format("%b %d, %Y").to_string();
    }

    let seconds = duration.num_seconds();
    let minutes = duration.num_minutes();
    let hours = duration.num_hours();
    let days = duration.num_days();

    if seconds < 60 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else if dt.year() == now.year() {
        // Same calendar year: "Jan 15"
        dt.format("%b %d").to_string()
    } else {
        // Different year: "Jan 15, 2023"
        dt.format("%b %d, %Y").to_string()
    }
}

/// Format an optional datetime with human-friendly output.
#[must_use]
pub fn format_optional_date(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(|| "unknown".to_string(), format_relative_date)
}
