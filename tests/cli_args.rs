//! Integration tests for the madecache binary
//!
//! Drives the CLI against a temporary cache directory.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::thread;

use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_madecache"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute madecache")
}

/// Runs the CLI against `dir`
fn run_in(dir: &Path, args: &[&str]) -> std::process::Output {
    let dir = dir.to_str().expect("temp dir should be UTF-8");
    let mut full = vec!["--dir", dir];
    full.extend_from_slice(args);
    run_cli(&full)
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("madecache"), "Help should mention madecache");
    assert!(stdout.contains("weed"), "Help should mention the weed command");
}

#[test]
fn test_put_then_get_roundtrip() {
    let temp_dir = TempDir::new().unwrap();

    let put = run_in(temp_dir.path(), &["put", "user", r#"{"name":"Ada","age":36}"#]);
    assert!(put.status.success());

    let get = run_in(temp_dir.path(), &["get", "user"]);
    assert!(get.status.success());
    let value: serde_json::Value = serde_json::from_str(&stdout(&get)).unwrap();
    assert_eq!(value, serde_json::json!({"name": "Ada", "age": 36}));
}

#[test]
fn test_get_missing_key_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_in(temp_dir.path(), &["get", "absent"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No entry"), "stderr: {}", stderr);
}

#[test]
fn test_put_null_does_not_create_entry() {
    let temp_dir = TempDir::new().unwrap();

    let put = run_in(temp_dir.path(), &["put", "nothing", "null"]);
    assert!(put.status.success());

    let contains = run_in(temp_dir.path(), &["contains", "nothing"]);
    assert_eq!(stdout(&contains), "false");
}

#[test]
fn test_put_invalid_json_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_in(temp_dir.path(), &["put", "key", "{not json"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid JSON"), "stderr: {}", stderr);
}

#[test]
fn test_remove_and_keys() {
    let temp_dir = TempDir::new().unwrap();
    run_in(temp_dir.path(), &["put", "a", "1"]);
    run_in(temp_dir.path(), &["put", "b", "2"]);

    assert_eq!(stdout(&run_in(temp_dir.path(), &["keys"])), "a\nb");

    let remove = run_in(temp_dir.path(), &["remove", "a"]);
    assert!(remove.status.success());
    assert_eq!(stdout(&run_in(temp_dir.path(), &["keys"])), "b");
    assert_eq!(stdout(&run_in(temp_dir.path(), &["contains", "a"])), "false");
}

#[test]
fn test_weed_keeps_fresh_and_removes_with_future_cutoff() {
    let temp_dir = TempDir::new().unwrap();
    run_in(temp_dir.path(), &["put", "fresh", "\"value\""]);

    let weed = run_in(temp_dir.path(), &["weed", "--days", "1"]);
    assert!(weed.status.success());
    assert_eq!(stdout(&weed), "Removed 0 entries");

    let weed = run_in(
        temp_dir.path(),
        &["weed", "--before", "2999-01-01T00:00:00Z", "--by", "created"],
    );
    assert!(weed.status.success());
    assert_eq!(stdout(&weed), "Removed 1 entries");
    assert_eq!(stdout(&run_in(temp_dir.path(), &["contains", "fresh"])), "false");
}

#[test]
fn test_weed_without_age_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_in(temp_dir.path(), &["weed"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--days"), "stderr: {}", stderr);
}

#[test]
fn test_weed_invalid_timestamp_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_in(temp_dir.path(), &["weed", "--days", "1", "--by", "accessed"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid timestamp"), "stderr: {}", stderr);
}

#[test]
fn test_fetch_invalid_cache_policy_fails_before_dispatch() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_in(
        temp_dir.path(),
        &["fetch", "http://127.0.0.1:9/never", "--cache", "forever"],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid cache policy"), "stderr: {}", stderr);
}

#[test]
fn test_clear_removes_everything() {
    let temp_dir = TempDir::new().unwrap();
    run_in(temp_dir.path(), &["put", "a", "1"]);
    run_in(temp_dir.path(), &["put", "b", "[1,2]"]);

    let clear = run_in(temp_dir.path(), &["clear"]);

    assert_eq!(stdout(&clear), "Removed 2 entries");
    assert_eq!(stdout(&run_in(temp_dir.path(), &["keys"])), "");
}

#[test]
fn test_invalid_arguments_leave_cache_folder_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let pending = temp_dir.path().join(".pending.tmp");
    fs::write(&pending, "partial").unwrap();

    let output = run_in(temp_dir.path(), &["weed", "--days", "1", "--by", "accessed"]);

    assert!(!output.status.success());
    assert!(pending.exists(), "Validation must fail before the cache is opened");
}

/// Serves one canned JSON response on a local port and returns its URL
fn serve_json_once(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/items", listener.local_addr().unwrap());

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).unwrap();
    });

    url
}

#[test]
fn test_fetch_prints_response_and_memoizes_it() {
    let temp_dir = TempDir::new().unwrap();
    let url = serve_json_once(r#"[{"id":1},{"id":2}]"#);
    let dir = temp_dir.path().to_str().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_madecache"))
        .args(["--dir", dir, "fetch", url.as_str(), "--cache", "memoize"])
        .env("RUST_LOG", "warn")
        .env_remove("HTTP_PROXY")
        .env_remove("http_proxy")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy")
        .output()
        .expect("Failed to execute madecache");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(value, serde_json::json!([{"id": 1}, {"id": 2}]));

    let keys = stdout(&run_in(temp_dir.path(), &["keys"]));
    assert!(keys.starts_with("request-"), "keys: {}", keys);
}
