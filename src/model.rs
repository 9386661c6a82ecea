//! Data models for TikTok export data.
//!
//! These structures represent the normalized form of TikTok data after
//! parsing from the JSON export formats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A TikTok post (one video) in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Stable external identifier (19-digit numeric string).
    pub post_id: String,
    /// Caption/description.
    pub title: String,
    pub likes: i64,
    /// Post creation date (source-reported).
    pub date: DateTime<Utc>,
    pub cover_url: String,
    pub video_link: String,
    pub views: Option<i64>,
    pub comments: Option<i64>,
    pub shares: Option<i64>,
    pub bookmarks: Option<i64>,
    /// Video duration in seconds.
    pub duration: Option<i64>,
    /// Hashtags in source order.
    pub hashtags: Vec<String>,
    pub music: Option<String>,
    pub location: Option<String>,
    pub is_private: bool,
    pub is_pinned: bool,
}

impl Post {
    /// Likes per view, when view data is available.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn engagement_ratio(&self) -> Option<f64> {
        match self.views {
            Some(views) if views > 0 => Some(self.likes as f64 / views as f64),
            _ => None,
        }
    }

    /// Likes + comments + shares, with absent counts treated as zero.
    #[must_use]
    pub fn total_engagement(&self) -> i64 {
        self.likes + self.comments.unwrap_or(0) + self.shares.unwrap_or(0)
    }
}

/// A follower relation entry: someone who follows the owning user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerRecord {
    pub username: String,
    /// Source-reported follow timestamp, not the import timestamp.
    pub date_followed: DateTime<Utc>,
}

/// A following relation entry: someone the owning user follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowingRecord {
    pub username: String,
    pub date_followed: DateTime<Utc>,
}

/// A registered owner of follower/following data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time follower/following counts for a user.
///
/// Snapshots are an independent historical record: their counts come from
/// an export, not from live row counts, and may predate full history
/// backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerSnapshot {
    pub snapshot_date: DateTime<Utc>,
    pub follower_count: i64,
    pub following_count: i64,
}

impl FollowerSnapshot {
    /// Followers per following, when the user follows anyone.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn follower_ratio(&self) -> Option<f64> {
        if self.following_count > 0 {
            Some(self.follower_count as f64 / self.following_count as f64)
        } else {
            None
        }
    }
}

/// What happened to one record during reconciliation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Created,
    Updated,
    Skipped,
}

impl std::fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Aggregate counts and date bounds for the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub posts_count: i64,
    pub followers_count: i64,
    pub following_count: i64,
    pub snapshots_count: i64,
    pub users_count: i64,
    pub first_post_date: Option<DateTime<Utc>>,
    pub last_post_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_post() -> Post {
        Post {
            post_id: "7234567890123456789".to_string(),
            title: "test".to_string(),
            likes: 100,
            date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap(),
            cover_url: "https://p16.tiktokcdn.com/img.jpg".to_string(),
            video_link: "https://www.tiktok.com/@u/video/7234567890123456789".to_string(),
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
        }
    }

    #[test]
    fn engagement_ratio_requires_views() {
        let mut post = sample_post();
        assert_eq!(post.engagement_ratio(), None);

        post.views = Some(0);
        assert_eq!(post.engagement_ratio(), None);

        post.views = Some(400);
        assert_eq!(post.engagement_ratio(), Some(0.25));
    }

    #[test]
    fn total_engagement_treats_nulls_as_zero() {
        let mut post = sample_post();
        assert_eq!(post.total_engagement(), 100);

        post.comments = Some(10);
        post.shares = Some(5);
        assert_eq!(post.total_engagement(), 115);
    }

    #[test]
    fn follower_ratio_undefined_when_following_nobody() {
        let snapshot = FollowerSnapshot {
            snapshot_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap(),
            follower_count: 500,
            following_count: 0,
        };
        assert_eq!(snapshot.follower_ratio(), None);

        let snapshot = FollowerSnapshot {
            following_count: 200,
            ..snapshot
        };
        assert_eq!(snapshot.follower_ratio(), Some(2.5));
    }
}
