//! Custom error types for tka.
//!
//! Provides structured error handling with detailed context for better
//! diagnostics and user experience.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for tka operations.
///
/// Each variant provides specific context about what went wrong,
/// enabling better error messages and programmatic error handling.
#[derive(Error, Debug)]
pub enum TkaError {
    // =========================================================================
    // Export Errors
    // =========================================================================
    /// Export file not found at the specified path.
    #[error("Export not found at '{path}'")]
    ExportNotFound { path: PathBuf },

    /// Export file exists but is not one of the two known shapes.
    #[error("Unrecognized export shape: {reason}")]
    UnrecognizedExport { reason: String },

    /// Failed to parse the export file.
    #[error("Failed to parse '{file}': {reason}")]
    ParseError { file: String, reason: String },

    // =========================================================================
    // Record Validation Errors
    // =========================================================================
    /// A required field is absent from a record.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// A date string could not be parsed.
    #[error("Invalid date '{value}' in {context}")]
    InvalidDate { value: String, context: String },

    /// A field value is out of its valid domain (negative count, empty name).
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Database file not found (nothing imported yet).
    #[error(
        "No imported data found. Run 'tka import <export.json>' first.\nExpected database at: {path}"
    )]
    DatabaseNotFound { path: PathBuf },

    /// Database schema version mismatch.
    #[error("Database schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// Uniqueness violation on direct insert.
    #[error("Conflict: {kind} '{key}' already exists")]
    Conflict { kind: &'static str, key: String },

    // =========================================================================
    // IO Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Path-specific IO error with context.
    #[error("Failed to {operation} '{path}': {source}")]
    PathError {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigError { path: PathBuf, reason: String },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// Target user does not exist. Fatal before any import begins.
    #[error("User '{username}' not found. Run 'tka user add {username}' first.")]
    UserNotFound { username: String },

    /// Data not found.
    #[error("{item_type} with ID '{id}' not found")]
    NotFound { item_type: &'static str, id: String },

    // =========================================================================
    // CLI Errors
    // =========================================================================
    /// Invalid command-line argument.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Catch-all for other errors with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wrapped anyhow error for gradual migration.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for tka operations.
pub type Result<T> = std::result::Result<T, TkaError>;

impl TkaError {
    /// Create an export not found error.
    pub fn export_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ExportNotFound { path: path.into() }
    }

    /// Create a parse error.
    pub fn parse_error(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing field error.
    #[must_use]
    pub const fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Create an invalid date error.
    pub fn invalid_date(value: impl Into<String>, context: impl Into<String>) -> Self {
        Self::InvalidDate {
            value: value.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Create a database not found error.
    pub fn database_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DatabaseNotFound { path: path.into() }
    }

    /// Create a user not found error.
    pub fn user_not_found(username: impl Into<String>) -> Self {
        Self::UserNotFound {
            username: username.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(item_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            item_type,
            id: id.into(),
        }
    }

    /// Create a path error with context.
    pub fn path_error(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::PathError {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Wrap an error with additional context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Check if this error is recoverable (user can fix it).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ExportNotFound { .. }
                | Self::DatabaseNotFound { .. }
                | Self::UserNotFound { .. }
                | Self::InvalidArgument { .. }
                | Self::NotFound { .. }
        )
    }

    /// Check if this error is a per-record validation failure.
    ///
    /// Record-level errors are isolated during import: counted, logged,
    /// and the batch continues. Anything else aborts the run.
    #[must_use]
    pub const fn is_record_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::InvalidDate { .. } | Self::InvalidValue { .. }
        )
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ExportNotFound { .. } => {
                Some("Verify the export path and ensure the TikTok data export is extracted.")
            }
            Self::DatabaseNotFound { .. } => {
                Some("Run 'tka import <export.json>' to create the database.")
            }
            Self::UserNotFound { .. } => {
                Some("Run 'tka user add <name>' to create the target user.")
            }
            Self::UnrecognizedExport { .. } => Some(
                "Expected either a flat JSON array of posts or an object with 'Post' / 'Profile And Settings' sections.",
            ),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TkaError::with_context(context, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| TkaError::with_context(f(), e))
    }
}

// =============================================================================
// CLI Error Formatting Utilities
// =============================================================================

use colored::Colorize;

/// Format a structured CLI error with explanation and suggestions.
///
/// # Arguments
/// * `title` - Brief error title (e.g., "Conflicting options")
/// * `explanation` - What went wrong and why
/// * `suggestions` - List of actionable suggestions
///
/// # Returns
/// A formatted error string ready for display.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    use std::fmt::Write;

    let mut output = format!("{} {}", "✗".red().bold(), title.bold());

    if !explanation.is_empty() {
        let _ = write!(output, "\n\n   {explanation}");
    }

    if !suggestions.is_empty() {
        output.push_str("\n\n   ");
        if suggestions.len() == 1 {
            let _ = write!(output, "{} {}", "Hint:".cyan(), suggestions[0]);
        } else {
            let _ = write!(output, "{}:", "Try".cyan());
            for suggestion in suggestions {
                let _ = write!(output, "\n     {} {}", "•".dimmed(), suggestion);
            }
        }
    }

    output
}

/// Calculate the Levenshtein edit distance between two strings.
///
/// This is used for "did you mean?" suggestions when users make typos.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    // Use two rows instead of full matrix for space efficiency
    let mut prev_row: Vec<usize> = (0..=b_len).collect();
    let mut curr_row: Vec<usize> = vec![0; b_len + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;

        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }

        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_len]
}

/// Find the best match from a list of candidates for a given input.
///
/// Returns `Some(match)` if a sufficiently close match is found,
/// `None` otherwise.
///
/// # Arguments
/// * `input` - The user's input (possibly a typo)
/// * `candidates` - List of valid options
/// * `max_distance` - Maximum edit distance to consider (default: 2)
#[must_use]
pub fn find_closest_match<'a>(
    input: &str,
    candidates: &[&'a str],
    max_distance: Option<usize>,
) -> Option<&'a str> {
    let max_dist = max_distance.unwrap_or(2);
    let input_lower = input.to_lowercase();

    candidates
        .iter()
        .map(|&candidate| {
            let candidate_lower = candidate.to_lowercase();
            let distance = levenshtein_distance(&input_lower, &candidate_lower);
            (candidate, distance)
        })
        .filter(|(_, distance)| *distance <= max_dist && *distance > 0)
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

/// Format a "did you mean?" suggestion.
#[must_use]
pub fn format_did_you_mean(suggestion: &str) -> String {
    format!("Did you mean '{}'?", suggestion.green())
}

/// Format an error for an unknown value with "did you mean?" support.
///
/// # Arguments
/// * `kind` - The kind of value (e.g., "metric", "window", "grouping")
/// * `input` - The user's input
/// * `valid_options` - List of valid options
///
/// # Returns
/// A formatted error string with suggestions if available.
pub fn format_unknown_value_error(kind: &str, input: &str, valid_options: &[&str]) -> String {
    let title = format!("Unknown {kind}: '{input}'");

    let mut suggestions = Vec::new();

    // Check for close matches
    if let Some(closest) = find_closest_match(input, valid_options, None) {
        suggestions.push(format_did_you_mean(closest));
    }

    // Show valid options if list is short
    if valid_options.len() <= 8 {
        suggestions.push(format!("Valid {kind}s: {}", valid_options.join(", ")));
    }

    let suggestion_refs: Vec<&str> = suggestions.iter().map(String::as_str).collect();
    format_error(&title, "", &suggestion_refs)
}

/// Valid metrics for top-post ranking.
pub const VALID_METRICS: &[&str] = &["likes", "views", "engagement"];

/// Valid time windows for top-post grouping.
pub const VALID_WINDOWS: &[&str] = &["daily", "weekly", "monthly"];

/// Valid trend groupings.
pub const VALID_GROUPINGS: &[&str] = &["day", "week", "month"];

/// Valid duplicate policies.
pub const VALID_POLICIES: &[&str] = &["skip", "update", "clear-then-import"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TkaError::export_not_found("/path/to/export.json");
        assert!(err.to_string().contains("/path/to/export.json"));
    }

    #[test]
    fn test_error_suggestions() {
        let err = TkaError::database_not_found("/path/to/db");
        assert!(err.suggestion().is_some());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_missing_field_names_the_field() {
        let err = TkaError::missing_field("cover_url");
        assert_eq!(err.to_string(), "Missing required field: cover_url");
        assert!(err.is_record_error());
    }

    #[test]
    fn test_record_error_classification() {
        assert!(TkaError::invalid_date("nope", "post 3").is_record_error());
        assert!(TkaError::invalid_value("likes", "negative").is_record_error());
        assert!(!TkaError::user_not_found("ghost").is_record_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let tka_err: TkaError = io_err.into();
        assert!(matches!(tka_err, TkaError::IoError(_)));
    }

    #[test]
    fn test_from_rusqlite_error() {
        // This test verifies the From impl exists
        fn accepts_tka_error(_: TkaError) {}
        let sqlite_err = rusqlite::Error::InvalidQuery;
        accepts_tka_error(sqlite_err.into());
    }

    // =========================================================================
    // Levenshtein Distance Tests
    // =========================================================================

    #[test]
    fn levenshtein_identical_strings() {
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
    }

    #[test]
    fn levenshtein_one_char_difference() {
        assert_eq!(levenshtein_distance("hello", "hallo"), 1);
        assert_eq!(levenshtein_distance("cat", "car"), 1);
    }

    #[test]
    fn levenshtein_empty_strings() {
        assert_eq!(levenshtein_distance("", "hello"), 5);
        assert_eq!(levenshtein_distance("hello", ""), 5);
        assert_eq!(levenshtein_distance("", ""), 0);
    }

    #[test]
    fn find_closest_match_typo() {
        assert_eq!(
            find_closest_match("likse", VALID_METRICS, None),
            Some("likes")
        );
        assert_eq!(find_closest_match("views", VALID_METRICS, None), None); // exact match not returned
        assert_eq!(find_closest_match("xyz", VALID_METRICS, None), None);
    }

    #[test]
    fn format_error_single_suggestion() {
        let output = format_error("Test Error", "Something went wrong", &["Try this"]);
        assert!(output.contains("Test Error"));
        assert!(output.contains("Something went wrong"));
        assert!(output.contains("Try this"));
    }

    #[test]
    fn format_unknown_value_with_suggestion() {
        let output = format_unknown_value_error("metric", "engagment", VALID_METRICS);
        assert!(output.contains("Unknown metric"));
        assert!(output.contains("engagment"));
        assert!(output.contains("engagement")); // did you mean
    }
}
