//! TikTok export data parser.
//!
//! Handles the two JSON shapes TikTok exports come in:
//!
//! - **Legacy**: a flat array of post objects.
//! - **Nested**: a full data export with `Post.Posts.VideoList`,
//!   `Profile And Settings.Follower.FansList`, and
//!   `Profile And Settings.Following.Following` sections.
//!
//! The shape is detected once up front into [`ExportDocument`]; all
//! extraction is a pure transformation over the already-deserialized JSON.
//! File reading lives with the caller.

use crate::error::{Result, TkaError};
use crate::model::{FollowerRecord, FollowingRecord, Post};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rayon::prelude::*;
use serde_json::Value;
use tracing::info;

/// TikTok post IDs are 19-digit numeric strings; IDs derived from video
/// links are truncated to this length.
const POST_ID_LEN: usize = 19;

/// An export payload with its shape decided exactly once.
#[derive(Debug, Clone)]
pub enum ExportDocument {
    /// Flat array of post objects (legacy per-post export).
    Legacy(Vec<Value>),
    /// Full data export with nested sections.
    Nested(Value),
}

impl ExportDocument {
    /// Detect the export shape from deserialized JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TkaError::UnrecognizedExport`] when the payload is neither
    /// a flat post array nor a nested export object.
    pub fn from_value(data: Value) -> Result<Self> {
        match data {
            Value::Array(items) => Ok(Self::Legacy(items)),
            Value::Object(map) => {
                if map.contains_key("Post") || map.contains_key("Profile And Settings") {
                    Ok(Self::Nested(Value::Object(map)))
                } else {
                    Err(TkaError::UnrecognizedExport {
                        reason: "object has neither a 'Post' nor a 'Profile And Settings' section"
                            .to_string(),
                    })
                }
            }
            other => Err(TkaError::UnrecognizedExport {
                reason: format!("top-level JSON must be an array or object, got {other}"),
            }),
        }
    }

    /// Extract canonical posts, one result per source record in order.
    ///
    /// Individual record failures do not abort the batch; each entry is
    /// validated independently so the caller can count and report them.
    #[must_use]
    pub fn posts(&self) -> Vec<Result<Post>> {
        let items: &[Value] = match self {
            Self::Legacy(items) => items,
            Self::Nested(data) => {
                let list = data["Post"]["Posts"]["VideoList"].as_array();
                list.map_or(&[][..], Vec::as_slice)
            }
        };

        let posts: Vec<Result<Post>> = items.par_iter().map(canonicalize_post).collect();
        info!("Parsed {} post records", posts.len());
        posts
    }

    /// Extract follower entries from `Profile And Settings > Follower > FansList`.
    #[must_use]
    pub fn followers(&self) -> Vec<Result<FollowerRecord>> {
        let entries = self.relation_entries("Follower", "FansList");
        let followers: Vec<Result<FollowerRecord>> = entries
            .iter()
            .map(|entry| {
                let (username, date_followed) = parse_relation_entry(entry)?;
                Ok(FollowerRecord {
                    username,
                    date_followed,
                })
            })
            .collect();
        info!("Parsed {} follower records", followers.len());
        followers
    }

    /// Extract following entries from `Profile And Settings > Following > Following`.
    #[must_use]
    pub fn following(&self) -> Vec<Result<FollowingRecord>> {
        let entries = self.relation_entries("Following", "Following");
        let following: Vec<Result<FollowingRecord>> = entries
            .iter()
            .map(|entry| {
                let (username, date_followed) = parse_relation_entry(entry)?;
                Ok(FollowingRecord {
                    username,
                    date_followed,
                })
            })
            .collect();
        info!("Parsed {} following records", following.len());
        following
    }

    fn relation_entries(&self, section: &str, list_key: &str) -> &[Value] {
        match self {
            // Legacy exports carry only posts.
            Self::Legacy(_) => &[],
            Self::Nested(data) => data["Profile And Settings"][section][list_key]
                .as_array()
                .map_or(&[][..], Vec::as_slice),
        }
    }
}

/// Parse the date formats seen in TikTok exports.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, and bare `YYYY-MM-DD`.
#[must_use]
pub fn parse_export_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

/// Derive a post ID from the trailing path segment of a video link.
#[must_use]
pub fn post_id_from_link(link: &str) -> String {
    let segment = link.rsplit('/').next().unwrap_or(link);
    segment.chars().take(POST_ID_LEN).collect()
}

/// Convert one post object to canonical form, validating as we go.
///
/// TikTok-native records (detected by the `Date` key) use the alternate
/// field names `Link`/`Title`/`Likes`/`Date`/`CoverImage`; everything else
/// is expected to already be in canonical naming.
fn canonicalize_post(item: &Value) -> Result<Post> {
    if item.get("Date").is_some() {
        canonicalize_native_post(item)
    } else {
        canonicalize_internal_post(item)
    }
}

fn canonicalize_native_post(item: &Value) -> Result<Post> {
    let link = item["Link"]
        .as_str()
        .ok_or_else(|| TkaError::missing_field("video_link"))?;
    let post_id = post_id_from_link(link);
    if post_id.is_empty() {
        return Err(TkaError::invalid_value(
            "id",
            format!("cannot derive post ID from link '{link}'"),
        ));
    }

    let date_str = item["Date"].as_str().unwrap_or_default();
    let date = parse_export_date(date_str)
        .ok_or_else(|| TkaError::invalid_date(date_str, format!("post {post_id}")))?;

    let likes = json_count(&item["Likes"], "likes")?.unwrap_or(0);

    Ok(Post {
        post_id,
        title: item["Title"].as_str().unwrap_or_default().to_string(),
        likes,
        date,
        cover_url: item["CoverImage"].as_str().unwrap_or(link).to_string(),
        video_link: link.to_string(),
        views: None,
        comments: None,
        shares: None,
        bookmarks: None,
        duration: None,
        hashtags: vec![],
        music: None,
        location: None,
        is_private: false,
        is_pinned: false,
    })
}

fn canonicalize_internal_post(item: &Value) -> Result<Post> {
    let post_id = match &item["id"] {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => return Err(TkaError::missing_field("id")),
        other => {
            return Err(TkaError::invalid_value(
                "id",
                format!("expected string or number, got {other}"),
            ));
        }
    };

    let title = item["title"]
        .as_str()
        .ok_or_else(|| TkaError::missing_field("title"))?
        .to_string();

    let likes =
        json_count(&item["likes"], "likes")?.ok_or_else(|| TkaError::missing_field("likes"))?;

    let date_str = item["date"]
        .as_str()
        .ok_or_else(|| TkaError::missing_field("date"))?;
    let date = parse_export_date(date_str)
        .ok_or_else(|| TkaError::invalid_date(date_str, format!("post {post_id}")))?;

    let cover_url = item["cover_url"]
        .as_str()
        .ok_or_else(|| TkaError::missing_field("cover_url"))?
        .to_string();

    let video_link = item["video_link"]
        .as_str()
        .ok_or_else(|| TkaError::missing_field("video_link"))?
        .to_string();

    Ok(Post {
        post_id,
        title,
        likes,
        date,
        cover_url,
        video_link,
        views: json_count(&item["views"], "views")?,
        comments: json_count(&item["comments"], "comments")?,
        shares: json_count(&item["shares"], "shares")?,
        bookmarks: json_count(&item["bookmarks"], "bookmarks")?,
        duration: json_count(&item["duration"], "duration")?,
        hashtags: item["hashtags"]
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        music: item["music"].as_str().map(String::from),
        location: item["location"].as_str().map(String::from),
        is_private: item["is_private"].as_bool().unwrap_or(false),
        is_pinned: item["is_pinned"].as_bool().unwrap_or(false),
    })
}

/// Read a non-negative count that may arrive as a JSON number or a numeric
/// string. `None`/absent is passed through for optional fields.
fn json_count(value: &Value, field: &'static str) -> Result<Option<i64>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| TkaError::invalid_value(field, format!("not an integer: {n}")))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| TkaError::invalid_value(field, format!("not an integer: '{s}'")))?,
        other => {
            return Err(TkaError::invalid_value(
                field,
                format!("expected integer, got {other}"),
            ));
        }
    };

    if parsed < 0 {
        return Err(TkaError::invalid_value(
            field,
            format!("must be non-negative, got {parsed}"),
        ));
    }
    Ok(Some(parsed))
}

fn parse_relation_entry(entry: &Value) -> Result<(String, DateTime<Utc>)> {
    let username = entry["UserName"].as_str().unwrap_or_default().trim();
    if username.is_empty() {
        return Err(TkaError::missing_field("UserName"));
    }

    let date_str = entry["Date"].as_str().unwrap_or_default();
    let date = parse_export_date(date_str)
        .ok_or_else(|| TkaError::invalid_date(date_str, format!("entry for '{username}'")))?;

    Ok((username.to_string(), date))
}
