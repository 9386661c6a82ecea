//! Read-only analytics over imported posts and follower data.
//!
//! Each report is a pure function of store state and query parameters, and
//! every result type is `Serialize`: the JSON an API layer would return.
//! Window/metric/grouping strings are parsed into enums once at the
//! boundary; nothing in here re-branches on raw strings.

use crate::error::Result;
use crate::model::Post;
use crate::storage::{DateTruncation, MetricColumn, RelationKind, Storage};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Query enums
// =============================================================================

/// Trend bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    Day,
    Week,
    Month,
}

impl Grouping {
    const fn truncation(self) -> DateTruncation {
        match self {
            Self::Day => DateTruncation::Day,
            Self::Week => DateTruncation::Week,
            Self::Month => DateTruncation::Month,
        }
    }
}

/// Top-post time window. Each window has a fixed day span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Daily,
    Weekly,
    Monthly,
}

impl Window {
    const fn truncation(self) -> DateTruncation {
        match self {
            Self::Daily => DateTruncation::Day,
            Self::Weekly => DateTruncation::Week,
            Self::Monthly => DateTruncation::Month,
        }
    }

    const fn span_days(self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }

    fn period_label(self, period: NaiveDate) -> String {
        match self {
            Self::Daily => period.format("%b %d, %Y").to_string(),
            Self::Weekly => format!("Week of {}", period.format("%b %d, %Y")),
            Self::Monthly => period.format("%B %Y").to_string(),
        }
    }
}

/// Ranking metric for top posts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Likes,
    Views,
    /// Likes + comments + shares. Not a stored column, so ranking happens
    /// in memory.
    Engagement,
}

/// Lookback period for snapshot growth analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthPeriod {
    Week,
    #[default]
    Month,
    Year,
    All,
}

impl GrowthPeriod {
    fn start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Week => Some(now - Duration::days(7)),
            Self::Month => Some(now - Duration::days(30)),
            Self::Year => Some(now - Duration::days(365)),
            Self::All => None,
        }
    }
}

/// Simple page request for the comparison listings.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    pub size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 1,
            size: 100,
        }
    }
}

// =============================================================================
// Trends
// =============================================================================

/// Parameters for [`TrendReport::compute`].
#[derive(Debug, Clone, Copy)]
pub struct TrendQuery {
    pub grouping: Grouping,
    /// Days to look back from `now`.
    pub days: i64,
}

/// One trend bucket. Buckets with no posts do not appear.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    /// Bucket start as `YYYY-MM-DD`.
    pub date: String,
    pub post_count: i64,
    pub total_likes: i64,
    pub avg_likes: f64,
    pub total_views: i64,
    pub avg_views: f64,
}

/// Likes/views trends over a lookback window.
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub grouping: Grouping,
    pub days: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub data: Vec<TrendPoint>,
}

impl TrendReport {
    /// Compute bucketed trends for posts within the window.
    ///
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    pub fn compute(storage: &Storage, query: &TrendQuery, now: DateTime<Utc>) -> Result<Self> {
        let start = now - Duration::days(query.days);
        let rows = storage.trend_buckets(query.grouping.truncation(), start, now)?;

        let data = rows
            .into_iter()
            .map(|row| TrendPoint {
                date: row.bucket,
                post_count: row.post_count,
                total_likes: row.total_likes,
                avg_likes: round2(row.avg_likes),
                total_views: row.total_views,
                avg_views: round2(row.avg_views),
            })
            .collect();

        Ok(Self {
            grouping: query.grouping,
            days: query.days,
            start_date: start,
            end_date: now,
            data,
        })
    }
}

// =============================================================================
// Top posts by time window
// =============================================================================

/// Parameters for [`TopPostsReport::compute`].
#[derive(Debug, Clone, Copy)]
pub struct TopPostsQuery {
    pub window: Window,
    pub limit: usize,
    pub metric: Metric,
}

/// Top posts within one period.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodTopPosts {
    /// Period start as `YYYY-MM-DD`.
    pub period: String,
    pub period_label: String,
    pub top_posts: Vec<Post>,
}

/// The most recent periods, each with its top-K posts by metric.
#[derive(Debug, Clone, Serialize)]
pub struct TopPostsReport {
    pub window: Window,
    pub metric: Metric,
    pub limit: usize,
    pub data: Vec<PeriodTopPosts>,
}

/// How many recent periods the report covers.
const TOP_POSTS_PERIOD_COUNT: usize = 10;

impl TopPostsReport {
    /// Compute top posts for the most recent distinct periods.
    ///
    /// Ties in stored metrics break by insertion order; the in-memory
    /// engagement sort is stable over insertion order for the same reason.
    ///
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    pub fn compute(storage: &Storage, query: &TopPostsQuery) -> Result<Self> {
        let periods =
            storage.recent_period_starts(query.window.truncation(), TOP_POSTS_PERIOD_COUNT)?;

        let mut data = Vec::with_capacity(periods.len());
        for period in periods {
            let Ok(period_date) = NaiveDate::parse_from_str(&period, "%Y-%m-%d") else {
                continue;
            };
            let start = period_date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            let Some(start) = start else { continue };
            let end = start + Duration::days(query.window.span_days());

            let top_posts = match query.metric {
                Metric::Likes => {
                    storage.top_posts_between(start, end, MetricColumn::Likes, query.limit)?
                }
                Metric::Views => {
                    storage.top_posts_between(start, end, MetricColumn::Views, query.limit)?
                }
                Metric::Engagement => {
                    let mut posts = storage.posts_between(start, end)?;
                    posts.sort_by_key(|p| std::cmp::Reverse(p.total_engagement()));
                    posts.truncate(query.limit);
                    posts
                }
            };

            data.push(PeriodTopPosts {
                period_label: query.window.period_label(period_date),
                period,
                top_posts,
            });
        }

        Ok(Self {
            window: query.window,
            metric: query.metric,
            limit: query.limit,
            data,
        })
    }
}

// =============================================================================
// Keyword frequency
// =============================================================================

/// Parameters for [`KeywordReport::compute`].
#[derive(Debug, Clone, Copy)]
pub struct KeywordQuery {
    pub limit: usize,
    pub min_length: usize,
}

/// A keyword with its frequency share.
#[derive(Debug, Clone, Serialize)]
pub struct KeywordCount {
    pub word: String,
    pub count: usize,
    /// Share of all qualifying word occurrences, rounded to 2 decimals.
    pub percentage: f64,
}

/// Keyword frequency across all post titles.
#[derive(Debug, Clone, Serialize)]
pub struct KeywordReport {
    /// Total qualifying word occurrences (after length/stopword filtering).
    pub total_words: usize,
    pub unique_words: usize,
    pub keywords: Vec<KeywordCount>,
}

// Strip everything except word characters, whitespace, and hashtag marks.
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s#]").expect("valid regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "this", "that", "from", "was", "are", "been", "have", "has",
        "had", "but", "not",
    ]
    .into_iter()
    .collect()
});

/// Extract qualifying words from one title.
fn title_words(title: &str, min_length: usize) -> Vec<String> {
    let lowercased = title.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowercased, " ");
    cleaned
        .split_whitespace()
        .map(|word| word.trim_start_matches('#'))
        .filter(|word| word.len() >= min_length && !STOPWORDS.contains(word))
        .map(String::from)
        .collect()
}

impl KeywordReport {
    /// Count keyword frequency across all stored titles.
    ///
    /// The percentage denominator is the total word count AFTER filtering,
    /// not before.
    ///
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    pub fn compute(storage: &Storage, query: &KeywordQuery) -> Result<Self> {
        let titles = storage.all_titles()?;
        Ok(Self::from_titles(&titles, query))
    }

    /// Pure computation over a title list.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_titles(titles: &[String], query: &KeywordQuery) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for title in titles {
            for word in title_words(title, query.min_length) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }

        let total_words: usize = counts.values().sum();
        let unique_words = counts.len();

        // Highest count first; ties alphabetical for stable output.
        let keywords = counts
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(query.limit)
            .map(|(word, count)| KeywordCount {
                word,
                count,
                percentage: if total_words > 0 {
                    round2(count as f64 / total_words as f64 * 100.0)
                } else {
                    0.0
                },
            })
            .collect();

        Self {
            total_words,
            unique_words,
            keywords,
        }
    }
}

// =============================================================================
// Engagement ratio ranking
// =============================================================================

/// A post ranked by daily engagement rate.
#[derive(Debug, Clone, Serialize)]
pub struct EngagementEntry {
    #[serde(flatten)]
    pub post: Post,
    pub days_since_post: i64,
    pub total_engagement: i64,
    pub engagement_per_day: f64,
    pub likes_per_day: f64,
}

/// Posts ranked by engagement per day since posting.
#[derive(Debug, Clone, Serialize)]
pub struct EngagementReport {
    pub limit: usize,
    pub posts: Vec<EngagementEntry>,
}

impl EngagementReport {
    /// Rank all posts by engagement per day.
    ///
    /// `days_since_post` floors at 1 so same-day and future-dated posts
    /// never divide by zero or a negative.
    ///
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(storage: &Storage, limit: usize, now: DateTime<Utc>) -> Result<Self> {
        let posts = storage.all_posts()?;

        let mut entries: Vec<EngagementEntry> = posts
            .into_iter()
            .map(|post| {
                let days_since_post = (now - post.date).num_days().max(1);
                let total_engagement = post.total_engagement();
                let engagement_per_day = total_engagement as f64 / days_since_post as f64;
                let likes_per_day = post.likes as f64 / days_since_post as f64;
                EngagementEntry {
                    post,
                    days_since_post,
                    total_engagement,
                    engagement_per_day: round2(engagement_per_day),
                    likes_per_day: round2(likes_per_day),
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.engagement_per_day
                .partial_cmp(&a.engagement_per_day)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(limit);

        Ok(Self {
            limit,
            posts: entries,
        })
    }
}

// =============================================================================
// Follower/following set algebra
// =============================================================================

/// One username in a follower/following comparison listing.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonEntry {
    pub username: String,
    /// When they followed the user (None for following-only entries).
    pub date_followed: Option<DateTime<Utc>>,
    /// When the user followed them (None for followers-only entries).
    pub date_following: Option<DateTime<Utc>>,
    pub is_mutual: bool,
}

/// Which comparison listing to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    Mutuals,
    FollowersOnly,
    FollowingOnly,
}

/// A paginated comparison listing.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub kind: ComparisonKind,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<ComparisonEntry>,
}

impl ComparisonReport {
    /// Compute one comparison listing for a user.
    ///
    /// Set operations are hash-based, so this stays O(n) at thousands of
    /// entries per side.
    ///
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    pub fn compute(
        storage: &Storage,
        user_id: i64,
        kind: ComparisonKind,
        page: Page,
    ) -> Result<Self> {
        let followers = storage.relation_dates(RelationKind::Follower, user_id)?;
        let following = storage.relation_dates(RelationKind::Following, user_id)?;

        let mut entries: Vec<ComparisonEntry> = match kind {
            ComparisonKind::Mutuals => followers
                .iter()
                .filter_map(|(username, followed)| {
                    following.get(username).map(|following_date| ComparisonEntry {
                        username: username.clone(),
                        date_followed: Some(*followed),
                        date_following: Some(*following_date),
                        is_mutual: true,
                    })
                })
                .collect(),
            ComparisonKind::FollowersOnly => followers
                .iter()
                .filter(|(username, _)| !following.contains_key(*username))
                .map(|(username, followed)| ComparisonEntry {
                    username: username.clone(),
                    date_followed: Some(*followed),
                    date_following: None,
                    is_mutual: false,
                })
                .collect(),
            ComparisonKind::FollowingOnly => following
                .iter()
                .filter(|(username, _)| !followers.contains_key(*username))
                .map(|(username, following_date)| ComparisonEntry {
                    username: username.clone(),
                    date_followed: None,
                    date_following: Some(*following_date),
                    is_mutual: false,
                })
                .collect(),
        };

        // Mutuals sort by the most recent of the two dates; one-sided
        // listings by their single date. Newest first.
        entries.sort_by_key(|entry| {
            std::cmp::Reverse(entry.date_followed.max(entry.date_following))
        });

        let total_count = entries.len();
        let start = page.number.saturating_sub(1) * page.size;
        let results: Vec<ComparisonEntry> =
            entries.into_iter().skip(start).take(page.size).collect();

        Ok(Self {
            kind,
            total_count,
            page: page.number,
            page_size: page.size,
            results,
        })
    }
}

/// Gains over a trailing window, per relation.
#[derive(Debug, Clone, Serialize)]
pub struct WindowGrowth {
    pub followers: i64,
    pub following: i64,
}

/// A day on which many followers arrived.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionDate {
    pub date: String,
    pub followers_gained: i64,
}

/// Headline follower statistics for a user.
#[derive(Debug, Clone, Serialize)]
pub struct FollowerStatsReport {
    pub total_followers: usize,
    pub total_following: usize,
    pub mutuals_count: usize,
    pub followers_only_count: usize,
    pub following_only_count: usize,
    /// |followers| / |following|, None when following nobody.
    pub follower_ratio: Option<f64>,
    pub weekly_growth: WindowGrowth,
    pub monthly_growth: WindowGrowth,
    pub top_acquisition_dates: Vec<AcquisitionDate>,
}

impl FollowerStatsReport {
    /// Compute headline follower statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(storage: &Storage, user_id: i64, now: DateTime<Utc>) -> Result<Self> {
        let followers = storage.relation_usernames(RelationKind::Follower, user_id)?;
        let following = storage.relation_usernames(RelationKind::Following, user_id)?;

        let mutuals_count = followers.intersection(&following).count();
        let followers_only_count = followers.len() - mutuals_count;
        let following_only_count = following.len() - mutuals_count;

        let follower_ratio = if following.is_empty() {
            None
        } else {
            Some(round2(followers.len() as f64 / following.len() as f64))
        };

        let week_ago = now - Duration::days(7);
        let month_ago = now - Duration::days(30);

        let weekly_growth = WindowGrowth {
            followers: storage.relation_count_since(RelationKind::Follower, user_id, week_ago)?,
            following: storage.relation_count_since(RelationKind::Following, user_id, week_ago)?,
        };
        let monthly_growth = WindowGrowth {
            followers: storage.relation_count_since(RelationKind::Follower, user_id, month_ago)?,
            following: storage.relation_count_since(RelationKind::Following, user_id, month_ago)?,
        };

        let top_acquisition_dates = storage
            .relation_top_dates(RelationKind::Follower, user_id, 10)?
            .into_iter()
            .map(|(date, followers_gained)| AcquisitionDate {
                date,
                followers_gained,
            })
            .collect();

        Ok(Self {
            total_followers: followers.len(),
            total_following: following.len(),
            mutuals_count,
            followers_only_count,
            following_only_count,
            follower_ratio,
            weekly_growth,
            monthly_growth,
            top_acquisition_dates,
        })
    }
}

// =============================================================================
// Growth from snapshots
// =============================================================================

/// One snapshot with deltas against the previous one.
#[derive(Debug, Clone, Serialize)]
pub struct GrowthPoint {
    pub date: DateTime<Utc>,
    pub follower_count: i64,
    pub following_count: i64,
    pub follower_ratio: Option<f64>,
    pub followers_gained: i64,
    pub followers_lost: i64,
    pub following_gained: i64,
    pub following_lost: i64,
    pub net_follower_growth: i64,
    pub net_following_growth: i64,
}

/// Follower/following growth reconstructed from stored snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct GrowthReport {
    pub period: GrowthPeriod,
    pub data_points: usize,
    pub growth: Vec<GrowthPoint>,
}

impl GrowthReport {
    /// Walk snapshots ordered by date, reporting count deltas.
    ///
    /// The first snapshot in range has no baseline, so all its deltas are
    /// zero. Gained/lost are `max(0, delta)` per direction; net is signed.
    ///
    /// # Errors
    ///
    /// Returns an error if database queries fail.
    pub fn compute(
        storage: &Storage,
        user_id: i64,
        period: GrowthPeriod,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let snapshots = storage.snapshots_since(user_id, period.start(now))?;

        let mut growth = Vec::with_capacity(snapshots.len());
        let mut prev: Option<&crate::model::FollowerSnapshot> = None;

        for snapshot in &snapshots {
            let (fg, fl, gg, gl, net_f, net_g) = prev.map_or((0, 0, 0, 0, 0, 0), |p| {
                let net_f = snapshot.follower_count - p.follower_count;
                let net_g = snapshot.following_count - p.following_count;
                (
                    net_f.max(0),
                    (-net_f).max(0),
                    net_g.max(0),
                    (-net_g).max(0),
                    net_f,
                    net_g,
                )
            });

            growth.push(GrowthPoint {
                date: snapshot.snapshot_date,
                follower_count: snapshot.follower_count,
                following_count: snapshot.following_count,
                follower_ratio: snapshot.follower_ratio().map(round2),
                followers_gained: fg,
                followers_lost: fl,
                following_gained: gg,
                following_lost: gl,
                net_follower_growth: net_f,
                net_following_growth: net_g,
            });

            prev = Some(snapshot);
        }

        Ok(Self {
            period,
            data_points: growth.len(),
            growth,
        })
    }
}
