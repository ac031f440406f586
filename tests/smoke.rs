//! Smoke tests -- verify the binary runs and the scan path works end to
//! end against a scratch database.

use std::path::Path;

use assert_cmd::Command;

fn authsentry() -> Command {
    let mut cmd = Command::cargo_bin("authsentry").unwrap();
    // Keep runs hermetic: no operator configuration or delivery
    // credentials may leak in from the environment.
    cmd.env_remove("AUTHSENTRY_CONFIG")
        .env_remove("ALERTER_URL")
        .env_remove("ALERTER_EMAIL")
        .env_remove("ALERTER_PASSWORD")
        .env_remove("ALERTER_TO")
        .env_remove("ALERT_THRESHOLD");
    cmd
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("authsentry.toml");
    let contents = format!(
        "[storage]\ndatabase_path = \"{}\"\nfailure_log_path = \"{}\"\n",
        dir.join("alerts.db").display(),
        dir.join("failed.jsonl").display(),
    );
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("authsentry")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Anomaly detection and alert dispatch",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("authsentry")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("authsentry"));
}

#[test]
fn test_watch_subcommand_exists() {
    Command::cargo_bin("authsentry")
        .unwrap()
        .args(["watch", "--help"])
        .assert()
        .success();
}

#[test]
fn test_scan_quiet_file_prints_summary() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());
    let csv = dir.path().join("logins.csv");
    std::fs::write(
        &csv,
        "timestamp,ip_address,user_id,country\n2024-03-01T10:00:00Z,10.0.0.1,alice,US\n",
    )
    .unwrap();

    authsentry()
        .arg("scan")
        .args(["--input", csv.to_str().unwrap()])
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("=== AuthSentry Run Summary ==="))
        .stdout(predicates::str::contains("Events ingested: 1"))
        .stdout(predicates::str::contains("No alerts raised."));
}

#[test]
fn test_scan_rejects_unusable_csv() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());
    let csv = dir.path().join("bad.csv");
    std::fs::write(&csv, "timestamp,ip_address\n2024-03-01T10:00:00Z,10.0.0.1\n").unwrap();

    authsentry()
        .arg("scan")
        .args(["--input", csv.to_str().unwrap()])
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("missing required columns"));
}

#[test]
fn test_scan_then_alerts_shows_persisted_row() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());
    let csv = dir.path().join("feed.csv");
    std::fs::write(
        &csv,
        "timestamp,ip,confidence,threat_type\n2024-03-01T10:00:00Z,185.22.33.4,95,malware\n",
    )
    .unwrap();

    // Delivery is unconfigured in this environment, so the alert is
    // recorded as failed rather than dropped.
    authsentry()
        .arg("scan")
        .args(["--input", csv.to_str().unwrap()])
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .success();

    authsentry()
        .arg("alerts")
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("threat"))
        .stdout(predicates::str::contains("failed"))
        .stdout(predicates::str::contains("185.22.33.4"));

    authsentry()
        .arg("failures")
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("185.22.33.4"))
        .stdout(predicates::str::contains("not configured"));
}

#[test]
fn test_failures_empty_message() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());

    authsentry()
        .arg("failures")
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("No delivery failures recorded."));
}

#[test]
fn test_alerts_csv_export() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());
    let csv = dir.path().join("feed.csv");
    std::fs::write(
        &csv,
        "timestamp,ip,confidence,threat_type\n2024-03-01T10:00:00Z,185.22.33.4,95,malware\n",
    )
    .unwrap();

    authsentry()
        .arg("scan")
        .args(["--input", csv.to_str().unwrap()])
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .success();

    let out = dir.path().join("export.csv");
    authsentry()
        .arg("alerts")
        .args(["--csv", out.to_str().unwrap()])
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("Exported 1 alerts"));

    let exported = std::fs::read_to_string(&out).unwrap();
    assert!(exported.contains("alert_type,ip_address"));
    assert!(exported.contains("malware"));
}
