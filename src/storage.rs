//! `SQLite` storage for TikTok export data.
//!
//! Provides persistent storage with a schema tuned for the import pipeline
//! (keyed upserts, conflict-ignore bulk inserts, scoped transactions) and
//! for the aggregate queries the analytics layer runs.

use crate::error::{Result, TkaError};
use crate::model::{
    FollowerRecord, FollowerSnapshot, FollowingRecord, Post, RecordOutcome, StoreStats, User,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

const SCHEMA_VERSION: i32 = 1;
// SQLite default limit on host parameters is usually 999 or 32766.
// We use a safe batch size to avoid "too many SQL variables" errors.
const SQLITE_BATCH_SIZE: usize = 900;
// Four bound parameters per relation row in the multi-row insert.
const RELATION_INSERT_FIELDS: usize = 4;

/// Which relation table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Follower,
    Following,
}

impl RelationKind {
    const fn table(self) -> &'static str {
        match self {
            Self::Follower => "followers",
            Self::Following => "following",
        }
    }
}

fn parse_rfc3339_or_now(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn parse_rfc3339_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `SQLite` storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;

        // Set pragmas for performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// Open an existing database, failing when nothing has been imported yet.
    ///
    /// # Errors
    ///
    /// Returns [`TkaError::DatabaseNotFound`] when the file does not exist.
    pub fn open_existing(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(TkaError::database_not_found(path));
        }
        Self::open(path)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// Get a reference to the underlying database connection.
    ///
    /// This is useful for modules that need to execute custom queries.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let current_version = self.get_schema_version();

        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            self.create_schema()?;
            self.set_schema_version(SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn get_schema_version(&self) -> i32 {
        let result: std::result::Result<i32, _> = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                let value: String = row.get(0)?;
                Ok(value.parse().unwrap_or(0))
            },
        );

        // Treat missing schema table as version 0.
        result.unwrap_or_default()
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![version.to_string()],
        )?;
        Ok(())
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            -- Metadata table
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Owners of follower/following data
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            -- Posts (globally keyed by the external post ID)
            CREATE TABLE IF NOT EXISTS posts (
                post_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                likes INTEGER NOT NULL CHECK (likes >= 0),
                date TEXT NOT NULL,
                cover_url TEXT NOT NULL,
                video_link TEXT NOT NULL,
                views INTEGER,
                comments INTEGER,
                shares INTEGER,
                bookmarks INTEGER,
                duration INTEGER,
                hashtags_json TEXT,
                music TEXT,
                location TEXT,
                is_private INTEGER NOT NULL DEFAULT 0,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_date ON posts(date);
            CREATE INDEX IF NOT EXISTS idx_posts_likes ON posts(likes);

            -- Followers (one row per user/username pair)
            CREATE TABLE IF NOT EXISTS followers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                username TEXT NOT NULL,
                date_followed TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, username)
            );
            CREATE INDEX IF NOT EXISTS idx_followers_date ON followers(user_id, date_followed);

            -- Following (accounts the user follows)
            CREATE TABLE IF NOT EXISTS following (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                username TEXT NOT NULL,
                date_followed TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, username)
            );
            CREATE INDEX IF NOT EXISTS idx_following_date ON following(user_id, date_followed);

            -- Point-in-time follower/following counts
            CREATE TABLE IF NOT EXISTS follower_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                snapshot_date TEXT NOT NULL,
                follower_count INTEGER NOT NULL,
                following_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, snapshot_date)
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_date ON follower_snapshots(user_id, snapshot_date);
            ",
        )?;

        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Look up a user by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        let result = self.conn.query_row(
            "SELECT id, username, created_at FROM users WHERE username = ?",
            params![username],
            |row| {
                let created_at: String = row.get(2)?;
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    created_at: parse_rfc3339_or_now(&created_at),
                })
            },
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by name, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TkaError::UserNotFound`] for unknown users.
    pub fn require_user(&self, username: &str) -> Result<User> {
        self.find_user(username)?
            .ok_or_else(|| TkaError::user_not_found(username))
    }

    /// Create a user if absent. Returns the user and whether it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or lookup fails.
    pub fn ensure_user(&self, username: &str) -> Result<(User, bool)> {
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO users (username, created_at) VALUES (?, ?)",
            params![username, Utc::now().to_rfc3339()],
        )? > 0;

        let user = self.require_user(username)?;
        Ok((user, created))
    }

    /// List all users, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, username, created_at FROM users ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(2)?;
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                created_at: parse_rfc3339_or_now(&created_at),
            })
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // =========================================================================
    // Import session (scoped transaction)
    // =========================================================================

    /// Begin a reconciliation batch.
    ///
    /// All writes go through the returned session and become visible only
    /// when it is finished with `commit = true`. Dropping the session, or
    /// finishing with `commit = false`, rolls every write back; this is
    /// how dry-run guarantees zero persisted mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub fn import_session(&mut self) -> Result<ImportSession<'_>> {
        let tx = self.conn.transaction()?;
        Ok(ImportSession { tx })
    }

    // =========================================================================
    // Read-side queries
    // =========================================================================

    /// All usernames in a relation for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn relation_usernames(&self, kind: RelationKind, user_id: i64) -> Result<HashSet<String>> {
        let sql = format!("SELECT username FROM {} WHERE user_id = ?", kind.table());
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;

        let mut usernames = HashSet::new();
        for row in rows {
            usernames.insert(row?);
        }
        Ok(usernames)
    }

    /// Username → follow date map for a relation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn relation_dates(
        &self,
        kind: RelationKind,
        user_id: i64,
    ) -> Result<HashMap<String, DateTime<Utc>>> {
        let sql = format!(
            "SELECT username, date_followed FROM {} WHERE user_id = ?",
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], |row| {
            let username: String = row.get(0)?;
            let date: String = row.get(1)?;
            Ok((username, date))
        })?;

        let mut dates = HashMap::new();
        for row in rows {
            let (username, date) = row?;
            dates.insert(username, parse_rfc3339_or_now(&date));
        }
        Ok(dates)
    }

    /// Count relation rows followed at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn relation_count_since(
        &self,
        kind: RelationKind,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE user_id = ? AND date_followed >= ?",
            kind.table()
        );
        let count = self.conn.query_row(
            &sql,
            params![user_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Top acquisition dates: the days with the most new rows in a relation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn relation_top_dates(
        &self,
        kind: RelationKind,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        let sql = format!(
            "SELECT DATE(date_followed) AS day, COUNT(*) AS n
             FROM {}
             WHERE user_id = ?
             GROUP BY day
             ORDER BY n DESC, day DESC
             LIMIT ?",
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![user_id, limit_i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut dates = Vec::new();
        for row in rows {
            dates.push(row?);
        }
        Ok(dates)
    }

    /// Snapshots for a user ordered ascending by date, optionally bounded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn snapshots_since(
        &self,
        user_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<FollowerSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_date, follower_count, following_count
             FROM follower_snapshots
             WHERE user_id = ?1 AND (?2 IS NULL OR snapshot_date >= ?2)
             ORDER BY snapshot_date ASC",
        )?;
        let rows = stmt.query_map(
            params![user_id, since.map(|dt| dt.to_rfc3339())],
            |row| {
                let date: String = row.get(0)?;
                Ok(FollowerSnapshot {
                    snapshot_date: parse_rfc3339_or_now(&date),
                    follower_count: row.get(1)?,
                    following_count: row.get(2)?,
                })
            },
        )?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    /// All post titles (for keyword analysis).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn all_titles(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT title FROM posts ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut titles = Vec::new();
        for row in rows {
            titles.push(row?);
        }
        Ok(titles)
    }

    /// All posts in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn all_posts(&self) -> Result<Vec<Post>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts ORDER BY rowid"
        ))?;
        let rows = stmt.query_map([], post_from_row)?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// Posts with `start <= date < end`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn posts_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Post>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE date >= ? AND date < ? ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(
            params![start.to_rfc3339(), end.to_rfc3339()],
            post_from_row,
        )?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// Top posts within `start <= date < end` ranked by a stored column.
    ///
    /// `column` must be one of the stored metric columns; ties fall back to
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn top_posts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        column: MetricColumn,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE date >= ? AND date < ?
             ORDER BY COALESCE({}, 0) DESC, rowid ASC
             LIMIT ?",
            column.as_sql()
        ))?;
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(
            params![start.to_rfc3339(), end.to_rfc3339(), limit_i64],
            post_from_row,
        )?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// The most recent distinct period start dates under a truncation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn recent_period_starts(
        &self,
        truncation: DateTruncation,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {} AS period FROM posts ORDER BY period DESC LIMIT ?",
            truncation.as_sql()
        ))?;
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit_i64], |row| row.get::<_, String>(0))?;

        let mut periods = Vec::new();
        for row in rows {
            periods.push(row?);
        }
        Ok(periods)
    }

    /// Aggregate likes/views per bucket within a date window, ascending.
    ///
    /// Buckets with no posts are simply absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn trend_buckets(
        &self,
        truncation: DateTruncation,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TrendRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} AS bucket,
                    COUNT(*),
                    COALESCE(SUM(likes), 0),
                    AVG(likes),
                    COALESCE(SUM(views), 0),
                    AVG(views)
             FROM posts
             WHERE date >= ? AND date <= ?
             GROUP BY bucket
             ORDER BY bucket ASC",
            truncation.as_sql()
        ))?;
        let rows = stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339()], |row| {
            Ok(TrendRow {
                bucket: row.get(0)?,
                post_count: row.get(1)?,
                total_likes: row.get(2)?,
                avg_likes: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                total_views: row.get(4)?,
                avg_views: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            })
        })?;

        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row?);
        }
        Ok(buckets)
    }

    /// Aggregate counts and post date bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics queries fail.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        let (first, last): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(date), MAX(date) FROM posts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            posts_count: count("SELECT COUNT(*) FROM posts")?,
            followers_count: count("SELECT COUNT(*) FROM followers")?,
            following_count: count("SELECT COUNT(*) FROM following")?,
            snapshots_count: count("SELECT COUNT(*) FROM follower_snapshots")?,
            users_count: count("SELECT COUNT(*) FROM users")?,
            first_post_date: parse_rfc3339_opt(first),
            last_post_date: parse_rfc3339_opt(last),
        })
    }

    /// Total data rows across posts, relations, and snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn total_rows(&self) -> Result<i64> {
        let stats = self.get_stats()?;
        Ok(stats.posts_count
            + stats.followers_count
            + stats.following_count
            + stats.snapshots_count)
    }
}

/// Stored metric columns usable for SQL-side ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricColumn {
    Likes,
    Views,
}

impl MetricColumn {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Likes => "likes",
            Self::Views => "views",
        }
    }
}

/// SQL date-truncation expressions over the `posts.date` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTruncation {
    Day,
    /// Monday-start weeks.
    Week,
    Month,
}

impl DateTruncation {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Day => "DATE(date)",
            Self::Week => "DATE(date, 'weekday 0', '-6 days')",
            Self::Month => "DATE(date, 'start of month')",
        }
    }
}

/// One aggregate row from [`Storage::trend_buckets`].
#[derive(Debug, Clone)]
pub struct TrendRow {
    /// Bucket start as `YYYY-MM-DD`.
    pub bucket: String,
    pub post_count: i64,
    pub total_likes: i64,
    pub avg_likes: f64,
    pub total_views: i64,
    pub avg_views: f64,
}

const POST_COLUMNS: &str = "post_id, title, likes, date, cover_url, video_link, views, comments, \
     shares, bookmarks, duration, hashtags_json, music, location, is_private, is_pinned";

fn post_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    let date: String = row.get(3)?;
    let hashtags_json: Option<String> = row.get(11)?;
    let hashtags = hashtags_json
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();

    Ok(Post {
        post_id: row.get(0)?,
        title: row.get(1)?,
        likes: row.get(2)?,
        date: parse_rfc3339_or_now(&date),
        cover_url: row.get(4)?,
        video_link: row.get(5)?,
        views: row.get(6)?,
        comments: row.get(7)?,
        shares: row.get(8)?,
        bookmarks: row.get(9)?,
        duration: row.get(10)?,
        hashtags,
        music: row.get(12)?,
        location: row.get(13)?,
        is_private: row.get::<_, i64>(14)? != 0,
        is_pinned: row.get::<_, i64>(15)? != 0,
    })
}

/// A reconciliation batch bound to one transaction.
///
/// Every mutation in an import run flows through a session. The commit or
/// rollback decision is taken explicitly via [`ImportSession::finish`];
/// dropping the session without finishing rolls back.
pub struct ImportSession<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl ImportSession<'_> {
    /// End the batch, committing only when asked to.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit or rollback fails.
    pub fn finish(self, commit: bool) -> Result<()> {
        if commit {
            self.tx.commit()?;
        } else {
            self.tx.rollback()?;
        }
        Ok(())
    }

    /// Check whether a post with this external ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn post_exists(&self, post_id: &str) -> Result<bool> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM posts WHERE post_id = ?",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a new post row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_post(&self, post: &Post) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.tx.execute(
            "INSERT INTO posts
             (post_id, title, likes, date, cover_url, video_link, views, comments, shares,
              bookmarks, duration, hashtags_json, music, location, is_private, is_pinned,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                post.post_id,
                post.title,
                post.likes,
                post.date.to_rfc3339(),
                post.cover_url,
                post.video_link,
                post.views,
                post.comments,
                post.shares,
                post.bookmarks,
                post.duration,
                serde_json::to_string(&post.hashtags).unwrap_or_else(|_| "[]".to_string()),
                post.music,
                post.location,
                i64::from(post.is_private),
                i64::from(post.is_pinned),
                now,
                now,
            ],
        )?;
        Ok(())
    }

    /// Overwrite all mutable fields of an existing post. The key is never
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn update_post(&self, post: &Post) -> Result<()> {
        self.tx.execute(
            "UPDATE posts SET
             title = ?, likes = ?, date = ?, cover_url = ?, video_link = ?, views = ?,
             comments = ?, shares = ?, bookmarks = ?, duration = ?, hashtags_json = ?,
             music = ?, location = ?, is_private = ?, is_pinned = ?, updated_at = ?
             WHERE post_id = ?",
            params![
                post.title,
                post.likes,
                post.date.to_rfc3339(),
                post.cover_url,
                post.video_link,
                post.views,
                post.comments,
                post.shares,
                post.bookmarks,
                post.duration,
                serde_json::to_string(&post.hashtags).unwrap_or_else(|_| "[]".to_string()),
                post.music,
                post.location,
                i64::from(post.is_private),
                i64::from(post.is_pinned),
                Utc::now().to_rfc3339(),
                post.post_id,
            ],
        )?;
        Ok(())
    }

    /// Reconcile one post under the given outcome decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn apply_post(&self, post: &Post, outcome: RecordOutcome) -> Result<()> {
        match outcome {
            RecordOutcome::Created => self.insert_post(post),
            RecordOutcome::Updated => self.update_post(post),
            RecordOutcome::Skipped => Ok(()),
        }
    }

    /// Usernames already present in a relation (for created/skipped
    /// classification ahead of the bulk insert).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn relation_usernames(&self, kind: RelationKind, user_id: i64) -> Result<HashSet<String>> {
        let sql = format!("SELECT username FROM {} WHERE user_id = ?", kind.table());
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;

        let mut usernames = HashSet::new();
        for row in rows {
            usernames.insert(row?);
        }
        Ok(usernames)
    }

    /// Bulk-insert follower rows, silently ignoring uniqueness conflicts.
    ///
    /// Returns the number of rows actually inserted. Conflicting rows leave
    /// the existing row untouched, so reprocessing overlapping exports is
    /// cheap and idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert statement fails; the error is fatal
    /// for the sub-phase.
    pub fn bulk_insert_followers(
        &self,
        user_id: i64,
        records: &[FollowerRecord],
    ) -> Result<usize> {
        let rows: Vec<(&str, DateTime<Utc>)> = records
            .iter()
            .map(|r| (r.username.as_str(), r.date_followed))
            .collect();
        self.bulk_insert_relation(RelationKind::Follower, user_id, &rows)
    }

    /// Bulk-insert following rows, silently ignoring uniqueness conflicts.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert statement fails.
    pub fn bulk_insert_following(
        &self,
        user_id: i64,
        records: &[FollowingRecord],
    ) -> Result<usize> {
        let rows: Vec<(&str, DateTime<Utc>)> = records
            .iter()
            .map(|r| (r.username.as_str(), r.date_followed))
            .collect();
        self.bulk_insert_relation(RelationKind::Following, user_id, &rows)
    }

    fn bulk_insert_relation(
        &self,
        kind: RelationKind,
        user_id: i64,
        rows: &[(&str, DateTime<Utc>)],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;

        for chunk in rows.chunks(SQLITE_BATCH_SIZE / RELATION_INSERT_FIELDS) {
            let placeholders: String = chunk
                .iter()
                .map(|_| "(?, ?, ?, ?)")
                .collect::<Vec<_>>()
                .join(",");
            let sql = format!(
                "INSERT OR IGNORE INTO {} (user_id, username, date_followed, created_at) VALUES {placeholders}",
                kind.table()
            );

            let mut values: Vec<rusqlite::types::Value> =
                Vec::with_capacity(chunk.len() * RELATION_INSERT_FIELDS);
            for (username, date) in chunk {
                values.push(user_id.into());
                values.push((*username).to_string().into());
                values.push(date.to_rfc3339().into());
                values.push(now.clone().into());
            }

            let mut stmt = self.tx.prepare_cached(&sql)?;
            inserted += stmt.execute(rusqlite::params_from_iter(values))?;
        }

        info!("Bulk-inserted {} {} rows", inserted, kind.table());
        Ok(inserted)
    }

    /// Delete all posts. Administrative, irreversible outside the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_all_posts(&self) -> Result<usize> {
        Ok(self.tx.execute("DELETE FROM posts", [])?)
    }

    /// Delete all rows of a relation for one user.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_all_relation(&self, kind: RelationKind, user_id: i64) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE user_id = ?", kind.table());
        Ok(self.tx.execute(&sql, params![user_id])?)
    }

    /// Upsert a snapshot keyed by `(user, snapshot_date)`.
    ///
    /// Counts are overwritten, never summed; re-running the same analysis
    /// reconciles to the same row. Returns whether a row was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_snapshot(&self, user_id: i64, snapshot: &FollowerSnapshot) -> Result<bool> {
        let existing: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM follower_snapshots WHERE user_id = ? AND snapshot_date = ?",
            params![user_id, snapshot.snapshot_date.to_rfc3339()],
            |row| row.get(0),
        )?;

        self.tx.execute(
            "INSERT INTO follower_snapshots
             (user_id, snapshot_date, follower_count, following_count, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, snapshot_date) DO UPDATE SET
             follower_count = excluded.follower_count,
             following_count = excluded.following_count",
            params![
                user_id,
                snapshot.snapshot_date.to_rfc3339(),
                snapshot.follower_count,
                snapshot.following_count,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(existing == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).single().unwrap()
    }

    fn sample_post(id: &str, likes: i64, date: DateTime<Utc>) -> Post {
        Post {
            post_id: id.to_string(),
            title: format!("post {id}"),
            likes,
            date,
            cover_url: "https://example.com/c.jpg".to_string(),
            video_link: format!("https://example.com/v/{id}"),
            views: Some(likes * 10),
            comments: None,
            shares: None,
            bookmarks: None,
            duration: None,
            hashtags: vec!["fyp".to_string()],
            music: None,
            location: None,
            is_private: false,
            is_pinned: false,
        }
    }

    #[test]
    fn schema_version_is_recorded() {
        let storage = Storage::open_memory().unwrap();
        assert_eq!(storage.get_schema_version(), SCHEMA_VERSION);
    }

    #[test]
    fn ensure_user_is_idempotent() {
        let storage = Storage::open_memory().unwrap();
        let (user, created) = storage.ensure_user("admin").unwrap();
        assert!(created);

        let (again, created) = storage.ensure_user("admin").unwrap();
        assert!(!created);
        assert_eq!(user.id, again.id);
    }

    #[test]
    fn require_user_fails_for_unknown() {
        let storage = Storage::open_memory().unwrap();
        let err = storage.require_user("ghost").unwrap_err();
        assert!(matches!(err, TkaError::UserNotFound { .. }));
    }

    #[test]
    fn post_roundtrip_preserves_fields() {
        let mut storage = Storage::open_memory().unwrap();
        let post = sample_post("p1", 50, utc(2024, 2, 1, 12));

        let session = storage.import_session().unwrap();
        session.insert_post(&post).unwrap();
        session.finish(true).unwrap();

        let posts = storage.all_posts().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_id, "p1");
        assert_eq!(posts[0].hashtags, vec!["fyp"]);
        assert_eq!(posts[0].views, Some(500));
    }

    #[test]
    fn rolled_back_session_leaves_no_rows() {
        let mut storage = Storage::open_memory().unwrap();
        let post = sample_post("p1", 50, utc(2024, 2, 1, 12));

        let session = storage.import_session().unwrap();
        session.insert_post(&post).unwrap();
        session.finish(false).unwrap();

        assert_eq!(storage.total_rows().unwrap(), 0);
    }

    #[test]
    fn bulk_insert_ignores_conflicts() {
        let mut storage = Storage::open_memory().unwrap();
        let (user, _) = storage.ensure_user("admin").unwrap();

        let records = vec![
            FollowerRecord {
                username: "alice".to_string(),
                date_followed: utc(2024, 1, 1, 0),
            },
            FollowerRecord {
                username: "bob".to_string(),
                date_followed: utc(2024, 1, 2, 0),
            },
        ];

        let session = storage.import_session().unwrap();
        assert_eq!(session.bulk_insert_followers(user.id, &records).unwrap(), 2);
        // Replaying the same rows inserts nothing and leaves state identical.
        assert_eq!(session.bulk_insert_followers(user.id, &records).unwrap(), 0);
        session.finish(true).unwrap();

        let usernames = storage
            .relation_usernames(RelationKind::Follower, user.id)
            .unwrap();
        assert_eq!(usernames.len(), 2);
    }

    #[test]
    fn snapshot_upsert_overwrites_counts() {
        let mut storage = Storage::open_memory().unwrap();
        let (user, _) = storage.ensure_user("admin").unwrap();
        let date = utc(2024, 3, 1, 0);

        let session = storage.import_session().unwrap();
        let created = session
            .upsert_snapshot(
                user.id,
                &FollowerSnapshot {
                    snapshot_date: date,
                    follower_count: 100,
                    following_count: 50,
                },
            )
            .unwrap();
        assert!(created);

        let created = session
            .upsert_snapshot(
                user.id,
                &FollowerSnapshot {
                    snapshot_date: date,
                    follower_count: 120,
                    following_count: 50,
                },
            )
            .unwrap();
        assert!(!created);
        session.finish(true).unwrap();

        let snapshots = storage.snapshots_since(user.id, None).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].follower_count, 120);
    }

    #[test]
    fn trend_buckets_group_by_day() {
        let mut storage = Storage::open_memory().unwrap();

        let session = storage.import_session().unwrap();
        session
            .insert_post(&sample_post("p1", 10, utc(2024, 2, 1, 9)))
            .unwrap();
        session
            .insert_post(&sample_post("p2", 30, utc(2024, 2, 1, 18)))
            .unwrap();
        session
            .insert_post(&sample_post("p3", 5, utc(2024, 2, 3, 12)))
            .unwrap();
        session.finish(true).unwrap();

        let buckets = storage
            .trend_buckets(DateTruncation::Day, utc(2024, 1, 1, 0), utc(2024, 3, 1, 0))
            .unwrap();

        assert_eq!(buckets.len(), 2); // Feb 2 has no posts, so no bucket
        assert_eq!(buckets[0].bucket, "2024-02-01");
        assert_eq!(buckets[0].post_count, 2);
        assert_eq!(buckets[0].total_likes, 40);
        assert!((buckets[0].avg_likes - 20.0).abs() < f64::EPSILON);
        assert_eq!(buckets[1].bucket, "2024-02-03");
    }

    #[test]
    fn top_posts_tie_break_by_insertion_order() {
        let mut storage = Storage::open_memory().unwrap();

        let session = storage.import_session().unwrap();
        session
            .insert_post(&sample_post("first", 10, utc(2024, 2, 1, 9)))
            .unwrap();
        session
            .insert_post(&sample_post("second", 10, utc(2024, 2, 1, 10)))
            .unwrap();
        session.finish(true).unwrap();

        let top = storage
            .top_posts_between(
                utc(2024, 1, 1, 0),
                utc(2024, 3, 1, 0),
                MetricColumn::Likes,
                1,
            )
            .unwrap();
        assert_eq!(top[0].post_id, "first");
    }
}
