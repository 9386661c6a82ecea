//! End-to-end CLI tests for tka.
//!
//! These tests run the actual tka binary and verify:
//! - Command-line interface behavior
//! - Output format and content
//! - Error handling and messages
//! - Integration between all components

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const SAMPLE_EXPORT: &str = r#"{
    "Post": {
        "Posts": {
            "VideoList": [
                {
                    "Date": "2024-02-01 10:00:00",
                    "Title": "dance challenge #fyp",
                    "Likes": "1200",
                    "Link": "https://www.tiktok.com/@creator/video/7301234567890123456",
                    "CoverImage": "https://p16.tiktokcdn.com/cover1.jpg"
                }
            ]
        }
    },
    "Profile And Settings": {
        "Follower": {
            "FansList": [
                {"UserName": "alice", "Date": "2024-01-15 09:00:00"},
                {"UserName": "bob", "Date": "2024-01-20 14:00:00"}
            ]
        },
        "Following": {
            "Following": [
                {"UserName": "bob", "Date": "2024-01-21 10:00:00"}
            ]
        }
    }
}"#;

/// Create a temp workspace with an export file and a db path.
fn setup() -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let export_path = temp_dir.path().join("export.json");
    fs::write(&export_path, SAMPLE_EXPORT).expect("Failed to write export");
    let db_path = temp_dir.path().join("tka.db");
    (temp_dir, export_path, db_path)
}

fn tka() -> Command {
    Command::cargo_bin("tka").expect("tka binary should build")
}

fn add_user(db_path: &PathBuf, name: &str) {
    tka()
        .args(["--db", db_path.to_str().unwrap(), "user", "add", name])
        .assert()
        .success();
}

// =============================================================================
// General CLI
// =============================================================================

#[test]
fn test_cli_help() {
    tka()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("TikTok"))
        .stdout(predicate::str::contains("import"));
}

#[test]
fn test_cli_version() {
    tka()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tka"));
}

#[test]
fn test_cli_completions() {
    tka()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tka"));
}

// =============================================================================
// Import
// =============================================================================

#[test]
fn test_import_creates_records() {
    let (_tmp, export_path, db_path) = setup();
    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "import",
            export_path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("IMPORT SUMMARY"))
        .stdout(predicate::str::contains("Import complete"));
}

#[test]
fn test_import_dry_run_is_marked_and_persists_nothing() {
    let (_tmp, export_path, db_path) = setup();
    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "import",
            export_path.to_str().unwrap(),
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));

    // Nothing was imported, so stats shows zero posts.
    tka()
        .args(["--db", db_path.to_str().unwrap(), "--format", "json", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"posts_count\":0"));
}

#[test]
fn test_import_unknown_user_fails() {
    let (_tmp, export_path, db_path) = setup();

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "import",
            export_path.to_str().unwrap(),
            "--user",
            "ghost",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_import_missing_file_fails() {
    let (_tmp, _export, db_path) = setup();
    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "import",
            "/nonexistent/export.json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Export not found"));
}

#[test]
fn test_import_json_report() {
    let (_tmp, export_path, db_path) = setup();
    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "--format",
            "json",
            "import",
            export_path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dry_run\":false"))
        .stdout(predicate::str::contains("\"created\":1"));
}

// =============================================================================
// Analytics commands
// =============================================================================

#[test]
fn test_stats_after_import() {
    let (_tmp, export_path, db_path) = setup();
    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "import",
            export_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    tka()
        .args(["--db", db_path.to_str().unwrap(), "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Posts:"))
        .stdout(predicate::str::contains("Followers:"));
}

#[test]
fn test_followers_stats_report() {
    let (_tmp, export_path, db_path) = setup();
    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "import",
            export_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    // followers = {alice, bob}, following = {bob} -> 1 mutual, ratio 2.0
    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "--format",
            "json",
            "followers",
            "stats",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_followers\":2"))
        .stdout(predicate::str::contains("\"mutuals_count\":1"))
        .stdout(predicate::str::contains("\"follower_ratio\":2.0"));
}

#[test]
fn test_keywords_json_output() {
    let (_tmp, export_path, db_path) = setup();
    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "import",
            export_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "--format",
            "json",
            "keywords",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"word\":\"fyp\""));
}

#[test]
fn test_analytics_without_database_fails() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("missing.db");

    tka()
        .args(["--db", db_path.to_str().unwrap(), "trends"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No imported data"));
}

// =============================================================================
// Users
// =============================================================================

#[test]
fn test_user_add_and_list() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tka.db");

    tka()
        .args(["--db", db_path.to_str().unwrap(), "user", "add", "creator"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created user 'creator'"));

    tka()
        .args(["--db", db_path.to_str().unwrap(), "user", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("creator"));

    // Adding again is a no-op, not an error.
    tka()
        .args(["--db", db_path.to_str().unwrap(), "user", "add", "creator"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

// =============================================================================
// History
// =============================================================================

#[test]
fn test_history_two_exports() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tka.db");

    let export1 = r#"{
        "Profile And Settings": {
            "Follower": {"FansList": [
                {"UserName": "a", "Date": "2024-03-01 10:00:00"},
                {"UserName": "b", "Date": "2024-03-01 10:00:00"},
                {"UserName": "c", "Date": "2024-03-01 10:00:00"}
            ]}
        }
    }"#;
    let export2 = r#"{
        "Profile And Settings": {
            "Follower": {"FansList": [
                {"UserName": "b", "Date": "2024-03-01 10:00:00"},
                {"UserName": "c", "Date": "2024-03-01 10:00:00"},
                {"UserName": "d", "Date": "2024-03-02 10:00:00"}
            ]}
        }
    }"#;
    let path1 = temp_dir.path().join("export1.json");
    let path2 = temp_dir.path().join("export2.json");
    fs::write(&path1, export1).unwrap();
    fs::write(&path2, export2).unwrap();

    add_user(&db_path, "admin");

    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "history",
            path1.to_str().unwrap(),
            path2.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("PERIOD CHANGES"))
        .stdout(predicate::str::contains("New: d"))
        .stdout(predicate::str::contains("Lost: a"));

    // Snapshots landed and growth reads them back.
    tka()
        .args([
            "--db",
            db_path.to_str().unwrap(),
            "--format",
            "json",
            "followers",
            "growth",
            "--period",
            "all",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"data_points\":2"));
}
