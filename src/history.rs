//! Multi-export follower history diffing.
//!
//! Given a sequence of exports taken at different dates, computes who was
//! gained and lost between each consecutive pair, aggregate period changes,
//! and the global ever-gained/ever-lost totals. Everything here is pure set
//! algebra over username sets; persistence is a separate step.

use crate::error::Result;
use crate::model::FollowerSnapshot;
use crate::parser::ExportDocument;
use crate::storage::ImportSession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// The follower/following state captured by one export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSnapshot {
    /// Where this snapshot came from (filename or label).
    pub source: String,
    /// Snapshot date: the latest source-reported follow date in the export.
    pub date: DateTime<Utc>,
    pub followers: HashSet<String>,
    pub following: HashSet<String>,
}

impl ExportSnapshot {
    /// Build a snapshot from a parsed export.
    ///
    /// Entries that fail per-record validation are ignored here; the import
    /// path is where they get counted and reported. `fallback_date` is used
    /// when the export carries no parseable dates at all (the CLI passes
    /// the file's modification time).
    #[must_use]
    pub fn from_document(
        document: &ExportDocument,
        source: impl Into<String>,
        fallback_date: DateTime<Utc>,
    ) -> Self {
        let mut latest: Option<DateTime<Utc>> = None;
        let mut followers = HashSet::new();
        let mut following = HashSet::new();

        for record in document.followers().into_iter().flatten() {
            if latest.is_none_or(|d| record.date_followed > d) {
                latest = Some(record.date_followed);
            }
            followers.insert(record.username);
        }
        for record in document.following().into_iter().flatten() {
            if latest.is_none_or(|d| record.date_followed > d) {
                latest = Some(record.date_followed);
            }
            following.insert(record.username);
        }

        Self {
            source: source.into(),
            date: latest.unwrap_or(fallback_date),
            followers,
            following,
        }
    }

    #[must_use]
    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    #[must_use]
    pub fn following_count(&self) -> usize {
        self.following.len()
    }
}

/// A snapshot plus its deltas relative to the previous snapshot.
///
/// The first snapshot in a sequence is the baseline: all sets empty.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDelta {
    pub source: String,
    pub date: DateTime<Utc>,
    pub follower_count: usize,
    pub following_count: usize,
    pub gained_followers: Vec<String>,
    pub lost_followers: Vec<String>,
    pub gained_following: Vec<String>,
    pub lost_following: Vec<String>,
}

/// Aggregate change between two consecutive exports.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodChange {
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub from_source: String,
    pub to_source: String,
    pub followers_gained: Vec<String>,
    pub followers_lost: Vec<String>,
    pub following_gained: Vec<String>,
    pub following_lost: Vec<String>,
    pub net_followers: i64,
    pub net_following: i64,
}

/// Full history analysis over an ordered export sequence.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryAnalysis {
    pub snapshots: Vec<SnapshotDelta>,
    pub changes: Vec<PeriodChange>,
    /// Every username gained in any period. A follower gained and later
    /// lost appears in both totals; this is not first-vs-last.
    pub total_gained: Vec<String>,
    pub total_lost: Vec<String>,
}

impl HistoryAnalysis {
    #[must_use]
    pub fn net_follower_growth(&self) -> i64 {
        self.changes.iter().map(|c| c.net_followers).sum()
    }

    #[must_use]
    pub fn net_following_growth(&self) -> i64 {
        self.changes.iter().map(|c| c.net_following).sum()
    }
}

/// Sort snapshots ascending by date.
///
/// `analyze` requires ascending input; this is the helper callers use to
/// establish that precondition.
pub fn sort_snapshots(snapshots: &mut [ExportSnapshot]) {
    snapshots.sort_by_key(|s| s.date);
}

fn sorted_difference(a: &HashSet<String>, b: &HashSet<String>) -> Vec<String> {
    let mut diff: Vec<String> = a.difference(b).cloned().collect();
    diff.sort_unstable();
    diff
}

/// Analyze an ordered sequence of export snapshots.
///
/// Precondition: `snapshots` is sorted ascending by date (see
/// [`sort_snapshots`]). Mis-ordered input produces misleading deltas and is
/// not auto-corrected.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn analyze(snapshots: &[ExportSnapshot]) -> HistoryAnalysis {
    debug_assert!(
        snapshots.windows(2).all(|w| w[0].date <= w[1].date),
        "snapshots must be sorted ascending by date"
    );

    let mut deltas = Vec::with_capacity(snapshots.len());
    let mut changes = Vec::new();
    let mut total_gained: HashSet<String> = HashSet::new();
    let mut total_lost: HashSet<String> = HashSet::new();

    for (i, export) in snapshots.iter().enumerate() {
        let mut delta = SnapshotDelta {
            source: export.source.clone(),
            date: export.date,
            follower_count: export.follower_count(),
            following_count: export.following_count(),
            gained_followers: Vec::new(),
            lost_followers: Vec::new(),
            gained_following: Vec::new(),
            lost_following: Vec::new(),
        };

        if i > 0 {
            let prev = &snapshots[i - 1];

            let gained_followers = sorted_difference(&export.followers, &prev.followers);
            let lost_followers = sorted_difference(&prev.followers, &export.followers);
            let gained_following = sorted_difference(&export.following, &prev.following);
            let lost_following = sorted_difference(&prev.following, &export.following);

            total_gained.extend(gained_followers.iter().cloned());
            total_lost.extend(lost_followers.iter().cloned());

            changes.push(PeriodChange {
                from_date: prev.date,
                to_date: export.date,
                from_source: prev.source.clone(),
                to_source: export.source.clone(),
                net_followers: gained_followers.len() as i64 - lost_followers.len() as i64,
                net_following: gained_following.len() as i64 - lost_following.len() as i64,
                followers_gained: gained_followers.clone(),
                followers_lost: lost_followers.clone(),
                following_gained: gained_following.clone(),
                following_lost: lost_following.clone(),
            });

            delta.gained_followers = gained_followers;
            delta.lost_followers = lost_followers;
            delta.gained_following = gained_following;
            delta.lost_following = lost_following;
        }

        deltas.push(delta);
    }

    let mut total_gained: Vec<String> = total_gained.into_iter().collect();
    let mut total_lost: Vec<String> = total_lost.into_iter().collect();
    total_gained.sort_unstable();
    total_lost.sort_unstable();

    HistoryAnalysis {
        snapshots: deltas,
        changes,
        total_gained,
        total_lost,
    }
}

/// Persist the analysis: one snapshot row per export date, keyed upsert.
///
/// Re-running the same analysis reconciles to the same rows; counts are
/// overwritten, never summed. Returns how many rows were newly created.
///
/// # Errors
///
/// Returns an error if a snapshot upsert fails.
#[allow(clippy::cast_possible_wrap)]
pub fn apply(session: &ImportSession<'_>, user_id: i64, analysis: &HistoryAnalysis) -> Result<usize> {
    let mut created = 0;
    for snapshot in &analysis.snapshots {
        let row = FollowerSnapshot {
            snapshot_date: snapshot.date,
            follower_count: snapshot.follower_count as i64,
            following_count: snapshot.following_count as i64,
        };
        if session.upsert_snapshot(user_id, &row)? {
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).single().unwrap()
    }

    fn snapshot(source: &str, date: DateTime<Utc>, followers: &[&str], following: &[&str]) -> ExportSnapshot {
        ExportSnapshot {
            source: source.to_string(),
            date,
            followers: followers.iter().map(|s| (*s).to_string()).collect(),
            following: following.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn first_snapshot_is_baseline() {
        let analysis = analyze(&[snapshot("a.json", utc(2024, 1, 1), &["a", "b"], &["x"])]);

        assert_eq!(analysis.snapshots.len(), 1);
        assert!(analysis.changes.is_empty());
        assert!(analysis.snapshots[0].gained_followers.is_empty());
        assert!(analysis.snapshots[0].lost_followers.is_empty());
        assert_eq!(analysis.snapshots[0].follower_count, 2);
    }

    #[test]
    fn two_exports_gained_and_lost() {
        // day 1: {a, b, c}; day 2: {b, c, d} -> gained {d}, lost {a}, net 0
        let analysis = analyze(&[
            snapshot("day1.json", utc(2024, 1, 1), &["a", "b", "c"], &[]),
            snapshot("day2.json", utc(2024, 1, 2), &["b", "c", "d"], &[]),
        ]);

        assert_eq!(analysis.changes.len(), 1);
        let change = &analysis.changes[0];
        assert_eq!(change.followers_gained, vec!["d"]);
        assert_eq!(change.followers_lost, vec!["a"]);
        assert_eq!(change.net_followers, 0);
    }

    #[test]
    fn gained_and_lost_are_disjoint() {
        let analysis = analyze(&[
            snapshot("a", utc(2024, 1, 1), &["a", "b", "c", "d"], &[]),
            snapshot("b", utc(2024, 1, 8), &["c", "d", "e", "f"], &[]),
        ]);

        let change = &analysis.changes[0];
        let gained: HashSet<_> = change.followers_gained.iter().collect();
        let lost: HashSet<_> = change.followers_lost.iter().collect();
        assert!(gained.is_disjoint(&lost));
    }

    #[test]
    fn totals_count_gained_then_lost_in_both() {
        // "zoe" is gained in period 1 and lost in period 2: both totals.
        let analysis = analyze(&[
            snapshot("a", utc(2024, 1, 1), &["a"], &[]),
            snapshot("b", utc(2024, 1, 8), &["a", "zoe"], &[]),
            snapshot("c", utc(2024, 1, 15), &["a"], &[]),
        ]);

        assert_eq!(analysis.total_gained, vec!["zoe"]);
        assert_eq!(analysis.total_lost, vec!["zoe"]);
        assert_eq!(analysis.net_follower_growth(), 0);
    }

    #[test]
    fn following_changes_tracked_separately() {
        let analysis = analyze(&[
            snapshot("a", utc(2024, 1, 1), &["f1"], &["g1", "g2"]),
            snapshot("b", utc(2024, 1, 8), &["f1"], &["g2", "g3"]),
        ]);

        let change = &analysis.changes[0];
        assert!(change.followers_gained.is_empty());
        assert_eq!(change.following_gained, vec!["g3"]);
        assert_eq!(change.following_lost, vec!["g1"]);
        assert_eq!(change.net_following, 0);
    }

    #[test]
    fn sort_snapshots_orders_by_date() {
        let mut snapshots = vec![
            snapshot("late", utc(2024, 3, 1), &[], &[]),
            snapshot("early", utc(2024, 1, 1), &[], &[]),
        ];
        sort_snapshots(&mut snapshots);
        assert_eq!(snapshots[0].source, "early");
    }

    #[test]
    fn snapshot_from_document_collects_sets_and_latest_date() {
        let doc = ExportDocument::from_value(serde_json::json!({
            "Profile And Settings": {
                "Follower": {
                    "FansList": [
                        {"UserName": "alice", "Date": "2024-02-01 10:00:00"},
                        {"UserName": "bob", "Date": "2024-02-05 10:00:00"},
                        {"UserName": "", "Date": "2024-02-09 10:00:00"}
                    ]
                },
                "Following": {
                    "Following": [
                        {"UserName": "carol", "Date": "2024-02-03 10:00:00"}
                    ]
                }
            }
        }))
        .unwrap();

        let snap = ExportSnapshot::from_document(&doc, "export.json", utc(2020, 1, 1));
        assert_eq!(snap.follower_count(), 2);
        assert_eq!(snap.following_count(), 1);
        // Latest valid date wins; the invalid entry is ignored.
        let expected = Utc.with_ymd_and_hms(2024, 2, 5, 10, 0, 0).single().unwrap();
        assert_eq!(snap.date, expected);
    }

    #[test]
    fn snapshot_without_dates_uses_fallback() {
        let doc = ExportDocument::from_value(serde_json::json!({
            "Profile And Settings": {}
        }))
        .unwrap();

        let fallback = utc(2024, 6, 1);
        let snap = ExportSnapshot::from_document(&doc, "empty.json", fallback);
        assert_eq!(snap.date, fallback);
    }
}
