use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

fn clinica(appdata: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("clinica").expect("binary builds");
    cmd.env("CLINICA_FAKE_APPDATA", appdata.path());
    cmd.env("CLINICA_BACKUP_FAKE_FREE_BYTES", "10000000000");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn db_status_reports_healthy_on_a_fresh_database() {
    let appdata = TempDir::new().unwrap();
    let output = clinica(&appdata)
        .args(["db", "status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let report = stdout_json(&output);
    assert_eq!(report["status"], "ok");
    assert!(report["checks"].as_array().unwrap().len() >= 3);
}

#[test]
fn db_backup_writes_a_manifest_that_matches_the_snapshot() {
    let appdata = TempDir::new().unwrap();
    clinica(&appdata)
        .args(["db", "status"])
        .assert()
        .success();

    let output = clinica(&appdata)
        .args(["db", "backup", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let payload = stdout_json(&output);
    let sqlite_path = payload["entry"]["sqlitePath"].as_str().unwrap();
    let manifest_path = payload["entry"]["manifestPath"].as_str().unwrap();
    assert!(std::path::Path::new(sqlite_path).exists());

    let manifest = clinica_lib::db::manifest::read_manifest(manifest_path.as_ref()).unwrap();
    let actual = clinica_lib::db::manifest::file_sha256(sqlite_path.as_ref()).unwrap();
    assert_eq!(manifest.sha256, actual);
    assert!(!manifest.schema_hash.is_empty());
}

#[test]
fn db_backups_lists_the_latest_snapshot() {
    let appdata = TempDir::new().unwrap();
    clinica(&appdata).args(["db", "status"]).assert().success();
    clinica(&appdata).args(["db", "backup"]).assert().success();

    let output = clinica(&appdata)
        .args(["db", "backups", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let info = stdout_json(&output);
    assert_eq!(info["backups"].as_array().unwrap().len(), 1);
    assert_eq!(info["availableBytes"], 10_000_000_000_u64);
}

#[test]
fn sync_run_with_an_unreachable_remote_leaves_the_queue_alone() {
    let appdata = TempDir::new().unwrap();
    clinica(&appdata)
        .args(["sync", "run"])
        .env("CLINICA_REMOTE_URL", "http://127.0.0.1:9")
        .env("CLINICA_REMOTE_TOKEN", "token")
        .assert()
        .failure();

    let output = clinica(&appdata)
        .args(["sync", "status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let counts = stdout_json(&output);
    assert_eq!(counts["pending"], 0);
    assert_eq!(counts["error"], 0);
}

#[test]
fn usb_toggle_feeds_the_privacy_status() {
    let appdata = TempDir::new().unwrap();

    clinica(&appdata).args(["usb", "present"]).assert().success();
    let output = clinica(&appdata)
        .args(["privacy", "status", "--json"])
        .output()
        .unwrap();
    let payload = stdout_json(&output);
    assert_eq!(payload["signals"]["usb_key_present"], true);
    assert_eq!(payload["namesVisible"], false);

    clinica(&appdata)
        .args(["privacy", "set-mode", "name", "--yes"])
        .assert()
        .success();
    let output = clinica(&appdata)
        .args(["privacy", "status", "--json"])
        .output()
        .unwrap();
    let payload = stdout_json(&output);
    assert_eq!(payload["signals"]["mode"], "name");
    assert_eq!(payload["namesVisible"], true);
}

#[test]
fn set_mode_without_the_key_is_refused() {
    let appdata = TempDir::new().unwrap();
    clinica(&appdata)
        .args(["privacy", "set-mode", "name", "--yes"])
        .assert()
        .failure();
}

#[test]
fn sync_status_reports_an_empty_queue() {
    let appdata = TempDir::new().unwrap();
    let output = clinica(&appdata)
        .args(["sync", "status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let counts = stdout_json(&output);
    assert_eq!(counts["pending"], 0);
    assert_eq!(counts["error"], 0);
}
