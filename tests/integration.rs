use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use timeline_harness::config::load_config;
use timeline_harness::models::Post;
use timeline_harness::sqlite_store::SqliteRepository;
use timeline_harness::traits::PostRepository;

fn tlh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tlh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/tlh.sqlite"

[stream]
poll_interval_secs = 30
keywords = ["rust"]

[source]
path = "{root}/data/timeline.jsonl"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("tlh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tlh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tlh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tlh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn make_post(id: &str, author: &str, text: &str, created: DateTime<Utc>) -> Post {
    Post {
        uri: format!("at://did:plc:{}/app.bsky.feed.post/{}", author, id),
        cid: format!("cid-{}", id),
        author_handle: author.to_string(),
        author_did: format!("did:plc:{}", author),
        text: text.to_string(),
        created_at: created,
        like_count: 0,
        repost_count: 0,
        reply_count: 0,
        indexed_at: created,
    }
}

fn seed(config_path: &Path, posts: Vec<Post>) {
    let cfg = load_config(config_path).unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let repo = SqliteRepository::open(&cfg).await.unwrap();
        repo.upsert(&posts).await.unwrap();
        repo.close().await;
    });
}

/// One post by `tester.bsky.social` at noon on each given day of January 2025.
fn seed_posts(config_path: &Path, days: &[u32]) {
    let posts = days
        .iter()
        .map(|day| {
            make_post(
                &day.to_string(),
                "tester.bsky.social",
                &format!("post from day {}", day),
                Utc.with_ymd_and_hms(2025, 1, *day, 12, 0, 0).unwrap(),
            )
        })
        .collect();
    seed(config_path, posts);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tlh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("tlh.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_tlh(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tlh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();

    run_tlh(&config_path, &["init"]);
    let (stdout, stderr, success) = run_tlh(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Posts:       0"));
    assert!(stdout.contains("Last stream: never"));
}

#[test]
fn test_posts_lists_date_range() {
    let (_tmp, config_path) = setup_test_env();
    seed_posts(&config_path, &[3, 5, 7, 9]);

    let (stdout, stderr, success) = run_tlh(
        &config_path,
        &["posts", "--since", "2025-01-04", "--until", "2025-01-07"],
    );
    assert!(success, "posts failed: {}", stderr);
    assert!(stdout.contains("post from day 5"));
    assert!(stdout.contains("post from day 7"));
    assert!(!stdout.contains("post from day 3"));
    assert!(!stdout.contains("post from day 9"));

    let first = stdout.find("day 5").unwrap();
    let second = stdout.find("day 7").unwrap();
    assert!(first < second, "posts should be oldest first");
}

#[test]
fn test_posts_filters_by_author() {
    let (_tmp, config_path) = setup_test_env();
    let noon = Utc.with_ymd_and_hms(2025, 1, 3, 12, 0, 0).unwrap();
    seed(
        &config_path,
        vec![
            make_post("1", "alice.bsky.social", "hello from alice", noon),
            make_post("2", "bob.bsky.social", "hello from bob", noon),
        ],
    );

    let (stdout, stderr, success) = run_tlh(&config_path, &["posts", "--author", "ALICE"]);
    assert!(success, "posts failed: {}", stderr);
    assert!(stdout.contains("hello from alice"));
    assert!(!stdout.contains("hello from bob"));
    assert!(stdout.contains("author contains 'ALICE'"));
}

#[test]
fn test_posts_relative_days() {
    let (_tmp, config_path) = setup_test_env();
    let now = Utc::now();
    seed(
        &config_path,
        vec![
            make_post("recent", "tester.bsky.social", "yesterday's post", now - Duration::days(1)),
            make_post("old", "tester.bsky.social", "last month's post", now - Duration::days(40)),
        ],
    );

    let (stdout, stderr, success) = run_tlh(&config_path, &["posts", "--days", "3"]);
    assert!(success, "posts failed: {}", stderr);
    assert!(stdout.contains("yesterday's post"));
    assert!(!stdout.contains("last month's post"));

    let (_, _, success) = run_tlh(
        &config_path,
        &["posts", "--days", "3", "--since", "2025-01-01"],
    );
    assert!(!success, "--days and --since should conflict");
}

#[test]
fn test_posts_empty() {
    let (_tmp, config_path) = setup_test_env();

    run_tlh(&config_path, &["init"]);
    let (stdout, _, success) = run_tlh(&config_path, &["posts"]);
    assert!(success);
    assert!(stdout.contains("No posts found."));
}

#[test]
fn test_prune_removes_old_posts() {
    let (_tmp, config_path) = setup_test_env();
    seed_posts(&config_path, &[1, 2, 10]);

    let (stdout, stderr, success) = run_tlh(&config_path, &["prune", "--before", "2025-01-05"]);
    assert!(success, "prune failed: {}", stderr);
    assert!(stdout.contains("pruned 2 posts"));
    assert!(stdout.contains("Remaining:   1"));
    assert!(stdout.contains("Vacuum:      yes"));

    let (stdout, _, _) = run_tlh(&config_path, &["stats"]);
    assert!(stdout.contains("Posts:       1"));
}

#[test]
fn test_prune_older_than_days_without_vacuum() {
    let (_tmp, config_path) = setup_test_env();
    let now = Utc::now();
    seed(
        &config_path,
        vec![
            make_post("new", "tester.bsky.social", "keep me", now - Duration::days(2)),
            make_post("old1", "tester.bsky.social", "drop me", now - Duration::days(45)),
            make_post("old2", "tester.bsky.social", "drop me too", now - Duration::days(90)),
        ],
    );

    let (stdout, stderr, success) = run_tlh(
        &config_path,
        &["prune", "--older-than-days", "30", "--no-vacuum"],
    );
    assert!(success, "prune failed: {}", stderr);
    assert!(stdout.contains("pruned 2 posts"));
    assert!(stdout.contains("Remaining:   1"));
    assert!(stdout.contains("Vacuum:      no"));
    assert!(stdout.contains("Size:"));

    let (stdout, _, _) = run_tlh(&config_path, &["posts"]);
    assert!(stdout.contains("keep me"));
    assert!(!stdout.contains("drop me"));
}

#[test]
fn test_prune_with_nothing_to_delete_skips_vacuum() {
    let (_tmp, config_path) = setup_test_env();
    seed_posts(&config_path, &[10]);

    let (stdout, stderr, success) = run_tlh(&config_path, &["prune", "--before", "2025-01-01"]);
    assert!(success, "prune failed: {}", stderr);
    assert!(stdout.contains("pruned 0 posts"));
    assert!(stdout.contains("Vacuum:      no"));
}

#[test]
fn test_prune_requires_a_cutoff() {
    let (_tmp, config_path) = setup_test_env();
    run_tlh(&config_path, &["init"]);

    let (_, _, success) = run_tlh(&config_path, &["prune"]);
    assert!(!success);

    let (_, _, success) = run_tlh(
        &config_path,
        &["prune", "--before", "2025-01-01", "--older-than-days", "3"],
    );
    assert!(!success);
}

#[test]
fn test_prune_rejects_bad_date() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tlh(&config_path, &["prune", "--before", "last week"]);
    assert!(!success);
    assert!(stderr.contains("YYYY-MM-DD"));
}

#[test]
fn test_invalid_config_is_reported() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"x.sqlite\"\n[stream]\npoll_interval_secs = 0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_tlh(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("poll_interval_secs"));
}

#[test]
fn test_stream_rejects_zero_poll_interval_flag() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_tlh(&config_path, &["stream", "--poll-interval", "0"]);
    assert!(!success);
}
