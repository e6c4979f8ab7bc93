//! CLI integration tests

use std::process::{Command, Output};

fn rmon(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rmon"))
        .args(args)
        .env_remove("RMON_API_URL")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute command")
}

const STATS_BODY: &str = r#"[
    {"target":"abc123def456","kind":"container","cpu_percent":12.5,"memory_percent":40.0,
     "sample_count":3,"window_started_at":"2024-01-01T12:00:00Z"},
    {"target":"Server","kind":"host","cpu_percent":3.0,"memory_percent":61.2,
     "sample_count":0,"window_started_at":"2024-01-01T12:00:00Z"}
]"#;

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = rmon(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Resource Monitor"), "Should show app name");
    assert!(stdout.contains("stats"), "Should show stats command");
    assert!(stdout.contains("health"), "Should show health command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = rmon(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("rmon"), "Should show binary name");
}

/// Test that unknown subcommands are rejected
#[test]
fn test_invalid_command() {
    let output = rmon(&["recommendations"]);
    assert!(!output.status.success(), "Unknown command should fail");
}

/// Test that an unknown kind filter is rejected before any request
#[test]
fn test_invalid_kind_filter() {
    let output = rmon(&["stats", "--kind", "pod"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("container"), "Should list valid kinds");
}

/// Test stats as a table against a mocked monitor
#[test]
fn test_stats_table() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/stats")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(STATS_BODY)
        .create();

    let output = rmon(&["--api-url", &server.url(), "stats"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    mock.assert();
    assert!(output.status.success());
    assert!(stdout.contains("abc123def456"));
    assert!(stdout.contains("12.50%"));
    assert!(stdout.contains("N/A"), "Empty window should show N/A");
}

/// Test stats as JSON with a kind filter
#[test]
fn test_stats_json_with_kind() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/stats")
        .match_query(mockito::Matcher::UrlEncoded("kind".into(), "host".into()))
        .with_status(200)
        .with_body("[]")
        .create();

    let output = rmon(&["--api-url", &server.url(), "--format", "json", "stats", "--kind", "host"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    mock.assert();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

/// Test health output when the monitor reports unhealthy
#[test]
fn test_health_unhealthy() {
    let mut server = mockito::Server::new();
    let _health = server
        .mock("GET", "/healthz")
        .with_status(503)
        .with_body(
            r#"{"status":"unhealthy","components":{"host_source":{"status":"unhealthy",
                "message":"all targets failed","checked_at":"2024-01-01T12:00:00Z"}}}"#,
        )
        .create();
    let _ready = server
        .mock("GET", "/readyz")
        .with_status(200)
        .with_body(r#"{"ready":true}"#)
        .create();

    let output = rmon(&["--api-url", &server.url(), "health"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("unhealthy"));
    assert!(stdout.contains("host_source"));
    assert!(stdout.contains("all targets failed"));
}

/// Test that an unreachable monitor is an error
#[test]
fn test_unreachable_monitor() {
    let output = rmon(&["--api-url", "http://127.0.0.1:1", "stats"]);
    assert!(!output.status.success());
}
