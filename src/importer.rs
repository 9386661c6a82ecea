//! Export reconciliation engine.
//!
//! Applies a parsed export against persisted state under an explicit
//! [`ImportOptions`] configuration: duplicate policy, dry-run, and
//! kind filters. The whole batch runs inside one scoped transaction;
//! dry-run performs every step (create/update/skip detection, per-row
//! validation) and then rolls the transaction back, guaranteeing zero
//! persisted mutation.
//!
//! Individual record failures are isolated: counted, collected with their
//! index, and the batch continues. Only file/parse/user-lookup failures
//! abort a run.

use crate::error::{Result, TkaError};
use crate::model::{FollowerSnapshot, RecordOutcome};
use crate::parser::ExportDocument;
use crate::storage::{ImportSession, RelationKind, Storage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// How a re-imported record interacts with an existing row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Leave the existing row untouched.
    #[default]
    Skip,
    /// Overwrite all mutable fields; the key never changes.
    Update,
    /// Delete all existing rows of the affected kinds before importing.
    /// Administrative and irreversible.
    ClearThenImport,
}

impl std::fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Update => write!(f, "update"),
            Self::ClearThenImport => write!(f, "clear-then-import"),
        }
    }
}

/// Configuration for one import run. Passed explicitly into the entry
/// point; there are no implicit global defaults.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Target user owning follower/following data.
    pub user: String,
    pub policy: DuplicatePolicy,
    /// Validate-only: run the full batch, then roll back.
    pub dry_run: bool,
    /// Delete existing rows of the affected kinds before importing.
    pub clear_existing: bool,
    /// Import posts only (skip followers/following).
    pub posts_only: bool,
    /// Import followers/following only (skip posts).
    pub followers_only: bool,
}

impl ImportOptions {
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            policy: DuplicatePolicy::default(),
            dry_run: false,
            clear_existing: false,
            posts_only: false,
            followers_only: false,
        }
    }

    const fn import_posts(&self) -> bool {
        !self.followers_only
    }

    const fn import_relations(&self) -> bool {
        !self.posts_only
    }

    const fn clears(&self) -> bool {
        self.clear_existing || matches!(self.policy, DuplicatePolicy::ClearThenImport)
    }
}

/// One record's failure, by position in the source batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    /// Zero-based index into the source list.
    pub index: usize,
    pub message: String,
}

/// Per-kind reconciliation counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errored: usize,
    pub errors: Vec<RecordError>,
}

impl KindSummary {
    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }

    fn record_error(&mut self, index: usize, error: &TkaError) {
        self.errored += 1;
        self.errors.push(RecordError {
            index,
            message: error.to_string(),
        });
    }
}

/// Structured result of one import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub dry_run: bool,
    pub cleared_posts: usize,
    pub cleared_followers: usize,
    pub cleared_following: usize,
    pub posts: KindSummary,
    pub followers: KindSummary,
    pub following: KindSummary,
    /// Snapshot written at the end of a real (non-dry-run) relation import.
    pub snapshot: Option<FollowerSnapshot>,
}

/// Import one parsed export document for a user.
///
/// Fatal errors (unknown user, transaction failure) abort before or during
/// setup; per-record validation failures are isolated into the report.
///
/// # Errors
///
/// Returns an error when the target user does not exist or a storage
/// operation outside per-record scope fails.
pub fn import_document(
    storage: &mut Storage,
    document: &ExportDocument,
    options: &ImportOptions,
) -> Result<ImportReport> {
    // User lookup is fatal before any reconciliation begins.
    let user = storage.require_user(&options.user)?;

    let mut report = ImportReport {
        dry_run: options.dry_run,
        cleared_posts: 0,
        cleared_followers: 0,
        cleared_following: 0,
        posts: KindSummary::default(),
        followers: KindSummary::default(),
        following: KindSummary::default(),
        snapshot: None,
    };

    let session = storage.import_session()?;

    if options.clears() {
        if options.import_posts() {
            report.cleared_posts = session.delete_all_posts()?;
        }
        if options.import_relations() {
            report.cleared_followers =
                session.delete_all_relation(RelationKind::Follower, user.id)?;
            report.cleared_following =
                session.delete_all_relation(RelationKind::Following, user.id)?;
        }
        info!(
            "Cleared {} posts, {} followers, {} following",
            report.cleared_posts, report.cleared_followers, report.cleared_following
        );
    }

    if options.import_posts() {
        report.posts = reconcile_posts(&session, document, options.policy)?;
    }

    let mut latest_relation_date: Option<DateTime<Utc>> = None;
    let mut follower_total = 0;
    let mut following_total = 0;

    if options.import_relations() {
        let (summary, unique, latest) =
            reconcile_relation(&session, RelationKind::Follower, user.id, document)?;
        report.followers = summary;
        follower_total = unique;
        latest_relation_date = max_date(latest_relation_date, latest);

        let (summary, unique, latest) =
            reconcile_relation(&session, RelationKind::Following, user.id, document)?;
        report.following = summary;
        following_total = unique;
        latest_relation_date = max_date(latest_relation_date, latest);

        // One snapshot per real import run; dry-run writes nothing.
        if !options.dry_run && (follower_total > 0 || following_total > 0) {
            let snapshot = FollowerSnapshot {
                snapshot_date: latest_relation_date.unwrap_or_else(Utc::now),
                follower_count: i64::try_from(follower_total).unwrap_or(i64::MAX),
                following_count: i64::try_from(following_total).unwrap_or(i64::MAX),
            };
            session.upsert_snapshot(user.id, &snapshot)?;
            report.snapshot = Some(snapshot);
        }
    }

    // The rollback here is the point of dry-run, not a failure.
    session.finish(!options.dry_run)?;

    info!(
        "Import {}: posts {}/{}/{}, followers {}/{}/{}, following {}/{}/{}",
        if options.dry_run { "validated" } else { "committed" },
        report.posts.created,
        report.posts.skipped,
        report.posts.errored,
        report.followers.created,
        report.followers.skipped,
        report.followers.errored,
        report.following.created,
        report.following.skipped,
        report.following.errored,
    );

    Ok(report)
}

fn max_date(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn reconcile_posts(
    session: &ImportSession<'_>,
    document: &ExportDocument,
    policy: DuplicatePolicy,
) -> Result<KindSummary> {
    let parsed = document.posts();
    let mut summary = KindSummary {
        total: parsed.len(),
        ..KindSummary::default()
    };

    for (index, record) in parsed.into_iter().enumerate() {
        let post = match record {
            Ok(post) => post,
            Err(err) => {
                summary.record_error(index, &err);
                continue;
            }
        };

        let outcome = if session.post_exists(&post.post_id)? {
            match policy {
                DuplicatePolicy::Update => RecordOutcome::Updated,
                // With clear-then-import the tables were wiped up front, so
                // a hit here means the export itself repeats the ID.
                DuplicatePolicy::Skip | DuplicatePolicy::ClearThenImport => RecordOutcome::Skipped,
            }
        } else {
            RecordOutcome::Created
        };

        match session.apply_post(&post, outcome) {
            Ok(()) => summary.record(outcome),
            Err(err) => summary.record_error(index, &err),
        }
    }

    debug!(
        "Posts reconciled: {} created, {} updated, {} skipped, {} errored",
        summary.created, summary.updated, summary.skipped, summary.errored
    );
    Ok(summary)
}

type RelationResult = (KindSummary, usize, Option<DateTime<Utc>>);

/// Reconcile follower or following entries.
///
/// Created/skipped classification happens against a username set loaded
/// once, then all new rows go through a single chunked conflict-ignore
/// bulk insert. The bulk path and a per-row check-then-insert converge to
/// the same final state; the set just makes the counts cheap to report.
fn reconcile_relation(
    session: &ImportSession<'_>,
    kind: RelationKind,
    user_id: i64,
    document: &ExportDocument,
) -> Result<RelationResult> {
    let records: Vec<Result<(String, DateTime<Utc>)>> = match kind {
        RelationKind::Follower => document
            .followers()
            .into_iter()
            .map(|r| r.map(|rec| (rec.username, rec.date_followed)))
            .collect(),
        RelationKind::Following => document
            .following()
            .into_iter()
            .map(|r| r.map(|rec| (rec.username, rec.date_followed)))
            .collect(),
    };

    let mut summary = KindSummary {
        total: records.len(),
        ..KindSummary::default()
    };

    let mut existing = session.relation_usernames(kind, user_id)?;
    let mut to_insert: Vec<(String, DateTime<Utc>)> = Vec::new();
    let mut latest: Option<DateTime<Utc>> = None;

    for (index, record) in records.into_iter().enumerate() {
        match record {
            Ok((username, date_followed)) => {
                latest = max_date(latest, Some(date_followed));
                if existing.contains(&username) {
                    summary.record(RecordOutcome::Skipped);
                } else {
                    // Track within-batch duplicates too, so counts match
                    // what the conflict-ignore insert will actually do.
                    existing.insert(username.clone());
                    to_insert.push((username, date_followed));
                    summary.record(RecordOutcome::Created);
                }
            }
            Err(err) => summary.record_error(index, &err),
        }
    }

    match kind {
        RelationKind::Follower => {
            let rows: Vec<crate::model::FollowerRecord> = to_insert
                .into_iter()
                .map(|(username, date_followed)| crate::model::FollowerRecord {
                    username,
                    date_followed,
                })
                .collect();
            session.bulk_insert_followers(user_id, &rows)?;
        }
        RelationKind::Following => {
            let rows: Vec<crate::model::FollowingRecord> = to_insert
                .into_iter()
                .map(|(username, date_followed)| crate::model::FollowingRecord {
                    username,
                    date_followed,
                })
                .collect();
            session.bulk_insert_following(user_id, &rows)?;
        }
    }

    let unique = existing.len();
    Ok((summary, unique, latest))
}

/// The first few errors of a kind, for verbose display. The rest are
/// reported as a count only.
#[must_use]
pub fn verbose_errors(summary: &KindSummary, limit: usize) -> &[RecordError] {
    &summary.errors[..summary.errors.len().min(limit)]
}

/// Number of verbose errors shown before collapsing to a count.
pub const VERBOSE_ERROR_LIMIT: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage_with_user() -> Storage {
        let storage = Storage::open_memory().unwrap();
        storage.ensure_user("admin").unwrap();
        storage
    }

    fn post_json(id: &str, likes: i64) -> serde_json::Value {
        json!({
            "id": id,
            "title": format!("post {id}"),
            "likes": likes,
            "date": "2024-02-01 10:00:00",
            "cover_url": "https://example.com/c.jpg",
            "video_link": format!("https://example.com/v/{id}")
        })
    }

    fn nested_export() -> ExportDocument {
        ExportDocument::from_value(json!({
            "Post": {"Posts": {"VideoList": [post_json("p1", 10), post_json("p2", 20)]}},
            "Profile And Settings": {
                "Follower": {"FansList": [
                    {"UserName": "alice", "Date": "2024-02-01 09:00:00"},
                    {"UserName": "bob", "Date": "2024-02-02 09:00:00"}
                ]},
                "Following": {"Following": [
                    {"UserName": "carol", "Date": "2024-02-01 09:00:00"}
                ]}
            }
        }))
        .unwrap()
    }

    #[test]
    fn import_creates_everything_once() {
        let mut storage = storage_with_user();
        let report =
            import_document(&mut storage, &nested_export(), &ImportOptions::new("admin")).unwrap();

        assert_eq!(report.posts.created, 2);
        assert_eq!(report.followers.created, 2);
        assert_eq!(report.following.created, 1);
        let snapshot = report.snapshot.unwrap();
        assert_eq!(snapshot.follower_count, 2);
        assert_eq!(snapshot.following_count, 1);
    }

    #[test]
    fn skip_policy_reimport_is_idempotent() {
        let mut storage = storage_with_user();
        let doc = nested_export();
        import_document(&mut storage, &doc, &ImportOptions::new("admin")).unwrap();
        let rows_after_first = storage.total_rows().unwrap();

        let report = import_document(&mut storage, &doc, &ImportOptions::new("admin")).unwrap();

        assert_eq!(report.posts.created, 0);
        assert_eq!(report.posts.skipped, 2);
        assert_eq!(report.followers.skipped, 2);
        assert_eq!(storage.total_rows().unwrap(), rows_after_first);
    }

    #[test]
    fn update_policy_overwrites_mutable_fields_only() {
        let mut storage = storage_with_user();
        let doc = ExportDocument::from_value(json!([post_json("p1", 10)])).unwrap();
        import_document(&mut storage, &doc, &ImportOptions::new("admin")).unwrap();

        let changed = ExportDocument::from_value(json!([post_json("p1", 999)])).unwrap();
        let options = ImportOptions {
            policy: DuplicatePolicy::Update,
            ..ImportOptions::new("admin")
        };
        let report = import_document(&mut storage, &changed, &options).unwrap();
        assert_eq!(report.posts.updated, 1);

        let posts = storage.all_posts().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_id, "p1");
        assert_eq!(posts[0].likes, 999);
    }

    #[test]
    fn dry_run_leaves_row_count_unchanged() {
        let mut storage = storage_with_user();
        let before = storage.total_rows().unwrap();

        let options = ImportOptions {
            dry_run: true,
            ..ImportOptions::new("admin")
        };
        let report = import_document(&mut storage, &nested_export(), &options).unwrap();

        // The batch ran in full...
        assert_eq!(report.posts.created, 2);
        assert_eq!(report.followers.created, 2);
        assert!(report.snapshot.is_none());
        // ...but nothing persisted.
        assert_eq!(storage.total_rows().unwrap(), before);
    }

    #[test]
    fn dry_run_still_detects_duplicates() {
        let mut storage = storage_with_user();
        let doc = nested_export();
        import_document(&mut storage, &doc, &ImportOptions::new("admin")).unwrap();

        let options = ImportOptions {
            dry_run: true,
            ..ImportOptions::new("admin")
        };
        let report = import_document(&mut storage, &doc, &options).unwrap();
        assert_eq!(report.posts.skipped, 2);
        assert_eq!(report.followers.skipped, 2);
    }

    #[test]
    fn malformed_record_does_not_abort_batch() {
        let mut storage = storage_with_user();
        let doc = ExportDocument::from_value(json!([
            post_json("good1", 5),
            {"id": "bad", "title": "no likes", "date": "2024-01-01",
             "cover_url": "c", "video_link": "v"},
            post_json("good2", 7)
        ]))
        .unwrap();

        let report = import_document(&mut storage, &doc, &ImportOptions::new("admin")).unwrap();
        assert_eq!(report.posts.total, 3);
        assert_eq!(report.posts.created, 2);
        assert_eq!(report.posts.errored, 1);
        assert_eq!(report.posts.errors[0].index, 1);
        assert!(report.posts.errors[0].message.contains("likes"));
    }

    #[test]
    fn clear_then_import_replaces_rows() {
        let mut storage = storage_with_user();
        let doc = ExportDocument::from_value(json!([post_json("old", 1)])).unwrap();
        import_document(&mut storage, &doc, &ImportOptions::new("admin")).unwrap();

        let replacement = ExportDocument::from_value(json!([post_json("new", 2)])).unwrap();
        let options = ImportOptions {
            policy: DuplicatePolicy::ClearThenImport,
            ..ImportOptions::new("admin")
        };
        let report = import_document(&mut storage, &replacement, &options).unwrap();

        assert_eq!(report.cleared_posts, 1);
        assert_eq!(report.posts.created, 1);
        let posts = storage.all_posts().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_id, "new");
    }

    #[test]
    fn unknown_user_is_fatal_before_any_mutation() {
        let mut storage = Storage::open_memory().unwrap();
        let err = import_document(
            &mut storage,
            &nested_export(),
            &ImportOptions::new("nobody"),
        )
        .unwrap_err();
        assert!(matches!(err, TkaError::UserNotFound { .. }));
        assert_eq!(storage.total_rows().unwrap(), 0);
    }

    #[test]
    fn followers_only_skips_posts() {
        let mut storage = storage_with_user();
        let options = ImportOptions {
            followers_only: true,
            ..ImportOptions::new("admin")
        };
        let report = import_document(&mut storage, &nested_export(), &options).unwrap();
        assert_eq!(report.posts.total, 0);
        assert_eq!(report.followers.created, 2);
        assert_eq!(storage.get_stats().unwrap().posts_count, 0);
    }

    #[test]
    fn verbose_errors_caps_at_limit() {
        let mut summary = KindSummary::default();
        for i in 0..8 {
            summary.record_error(i, &TkaError::missing_field("likes"));
        }
        assert_eq!(verbose_errors(&summary, VERBOSE_ERROR_LIMIT).len(), 5);
        assert_eq!(summary.errored, 8);
    }
}
