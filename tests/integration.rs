use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;

use httpmock::Method::{GET, PUT};
use httpmock::MockServer;
use serde_json::json;
use tempfile::TempDir;

fn gv_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("gv");
    path
}

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn setup_test_env(api_base: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
dir = "{}/data/tenants"

[remote]
api_base = "{}"
timeout_secs = 5
max_attempts = 2
base_backoff_ms = 1

[coordinator]
flush_threshold = 10
"#,
        root.display(),
        api_base
    );

    let config_path = config_dir.join("gv.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_gv(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = gv_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("GV_TENANT")
        .env_remove("GV_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run gv binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_tenant_database() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_gv(&config_path, &["--tenant", "acme", "init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/tenants/acme.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, _, success1) = run_gv(&config_path, &["--tenant", "acme", "init"]);
    assert!(success1);
    let (_, _, success2) = run_gv(&config_path, &["--tenant", "acme", "init"]);
    assert!(success2);
}

#[test]
fn test_status_on_fresh_tenant() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_gv(&config_path, &["--tenant", "acme", "status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("Index Status (acme)"));
    assert!(stdout.contains("Articles:      0 / 1000"));
    assert!(stdout.contains("Pending tasks: 0"));
}

#[test]
fn test_articles_empty() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, _, success) = run_gv(&config_path, &["--tenant", "acme", "articles"]);
    assert!(success);
    assert!(stdout.contains("No articles."));
}

#[test]
fn test_lookup_unknown_title_fails() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, stderr, success) = run_gv(&config_path, &["--tenant", "acme", "lookup", "Nothing"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_invalid_tenant_rejected() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, stderr, success) = run_gv(&config_path, &["--tenant", "../etc", "status"]);
    assert!(!success);
    assert!(stderr.contains("invalid tenant"));
}

#[test]
fn test_reset_requires_confirmation() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, stderr, success) = run_gv(&config_path, &["--tenant", "acme", "reset"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, _, success) = run_gv(&config_path, &["--tenant", "acme", "reset", "--yes"]);
    assert!(success);
    assert!(stdout.contains("reset"));
}

#[test]
fn test_debug_reports_consistent_counters() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_gv(&config_path, &["--tenant", "acme", "debug"]);
    assert!(success, "debug failed: {}", stderr);
    assert!(stdout.contains("titleIndex"));
    assert!(stdout.contains("Counters consistent."));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, _, success) = run_gv(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("gv"));
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, _, success) = run_gv(&missing, &["completions", "zsh"]);
    assert!(success);
    assert!(!stdout.is_empty());
}

#[test]
fn test_submit_and_process_against_mock_api() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let missing = server.mock(|when, then| {
        when.method(GET).path_contains("/repos/acme/notes/contents/");
        then.status(404);
    });
    let created = server.mock(|when, then| {
        when.method(PUT)
            .path_contains("/repos/acme/notes/contents/")
            .header("authorization", "Bearer ghs_test");
        then.status(201)
            .json_body(json!({ "content": { "sha": "abc123" } }));
    });

    let (_tmp, config_path) = setup_test_env(&server.base_url());
    let (stdout, stderr, success) = run_gv(
        &config_path,
        &[
            "--tenant",
            "acme",
            "submit",
            "--owner",
            "acme",
            "--repo",
            "notes",
            "--installation-id",
            "42",
            "--token",
            "ghs_test",
            "--vault-path",
            "vaults",
            "--vault-name",
            "team",
            "--title",
            "Hello",
            "--content",
            "First note",
            "--process",
        ],
    );
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Submitted task"));
    assert!(stdout.contains("path: vaults/team/Folder_0/Article_0.md"));
    assert!(stdout.contains("sha:  abc123"));
    // folder marker, index file, article
    assert_eq!(created.hits(), 3);
    assert!(missing.hits() >= 1);

    let (stdout, _, success) = run_gv(&config_path, &["--tenant", "acme", "lookup", "Hello"]);
    assert!(success);
    assert!(stdout.contains("vaults/team/Folder_0/Article_0.md"));

    let (stdout, _, success) = run_gv(&config_path, &["--tenant", "acme", "articles"]);
    assert!(success);
    assert!(stdout.contains("Hello"));
    assert!(stdout.contains("1 total"));
}

#[test]
fn test_failed_push_leaves_task_pending() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path_contains("/contents/");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(PUT).path_contains("/contents/");
        then.status(500).body("boom");
    });

    let (_tmp, config_path) = setup_test_env(&server.base_url());
    let (_, stderr, success) = run_gv(
        &config_path,
        &[
            "--tenant",
            "acme",
            "submit",
            "--owner",
            "acme",
            "--repo",
            "notes",
            "--installation-id",
            "42",
            "--token",
            "ghs_test",
            "--vault-name",
            "team",
            "--content",
            "body",
            "--process",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("remote store error"));

    let (stdout, _, success) = run_gv(&config_path, &["--tenant", "acme", "status"]);
    assert!(success);
    assert!(stdout.contains("Pending tasks: 1"));
}

#[test]
fn test_submit_with_missing_file_names_the_path() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let missing = tmp.path().join("no-such-note.md");

    let (_, stderr, success) = run_gv(
        &config_path,
        &[
            "--tenant",
            "acme",
            "submit",
            "--owner",
            "acme",
            "--repo",
            "notes",
            "--installation-id",
            "42",
            "--token",
            "ghs_test",
            "--vault-name",
            "team",
            "--file",
            missing.to_str().unwrap(),
        ],
    );
    assert!(!success);
    assert!(stderr.contains("Failed to read"), "stderr={}", stderr);
    assert!(stderr.contains("no-such-note.md"));
}
