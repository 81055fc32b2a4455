use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn base_cmd(cwd: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("rproj");
    cmd.current_dir(cwd);
    cmd.env_remove("RPROJ_CONFIG_FILE");
    cmd.env("RUST_LOG", "info");
    cmd
}

fn write_config(root: &Path, body: &str) -> std::path::PathBuf {
    let path = root.join("config.yml");
    fs::write(&path, body).unwrap();
    path
}

fn local_config(root: &Path, mode: &str) -> String {
    format!(
        "dir:\n  input_dir: '{}'\n  output_dir: '{}'\n  work_dir: '{}'\ndata_refresh_mode: {mode}\n",
        root.join("in").display(),
        root.join("out").display(),
        root.join("work").display(),
    )
}

fn populate_input(root: &Path) {
    fs::create_dir_all(root.join("in")).unwrap();
    fs::write(root.join("in/samples.csv"), "id,value\n1,42\n").unwrap();
}

#[test]
fn sync_copies_local_input_and_records_time() {
    let tmp = TempDir::new().unwrap();
    populate_input(tmp.path());
    let config = write_config(tmp.path(), &local_config(tmp.path(), "always"));

    base_cmd(tmp.path())
        .args(["sync", "--config-file"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("local"))
        .stdout(contains("1 files"));

    assert!(tmp.path().join("work/data/samples.csv").is_file());
    assert!(tmp.path().join("out").is_dir());
    let recorded: i64 = fs::read_to_string(tmp.path().join("work/last_update.txt"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let now = chrono::Utc::now().timestamp();
    assert!((now - recorded).abs() < 120, "recorded {recorded}, now {now}");
}

#[test]
fn sync_defaults_to_config_yml_in_current_dir() {
    let tmp = TempDir::new().unwrap();
    populate_input(tmp.path());
    write_config(tmp.path(), &local_config(tmp.path(), "auto"));

    base_cmd(tmp.path()).arg("sync").assert().success();

    assert!(tmp.path().join("work/data/samples.csv").is_file());
}

#[test]
fn sync_skips_fresh_cache_in_manual_mode() {
    let tmp = TempDir::new().unwrap();
    populate_input(tmp.path());
    let body = format!("{}data_refresh_days: 30\n", local_config(tmp.path(), "manual"));
    write_config(tmp.path(), &body);
    fs::create_dir_all(tmp.path().join("work/data")).unwrap();
    fs::write(tmp.path().join("work/data/old.csv"), "x").unwrap();
    let recent = chrono::Utc::now().timestamp() - 3600;
    fs::write(tmp.path().join("work/last_update.txt"), recent.to_string()).unwrap();

    base_cmd(tmp.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("skipped"));

    assert!(!tmp.path().join("work/data/samples.csv").exists());
    assert_eq!(
        fs::read_to_string(tmp.path().join("work/last_update.txt")).unwrap(),
        recent.to_string()
    );
}

#[test]
fn sync_unknown_host_fails_before_any_transfer() {
    let tmp = TempDir::new().unwrap();
    write_config(
        tmp.path(),
        &format!(
            "dir:\n  input_dir: 'hostA:/remote/data'\n  output_dir: '{}'\n  work_dir: '{}'\n",
            tmp.path().join("out").display(),
            tmp.path().join("work").display(),
        ),
    );

    base_cmd(tmp.path())
        .args(["sync", "--no-prompt"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("unknown host 'hostA'"));

    assert!(!tmp.path().join("work").exists());
    assert!(!tmp.path().join("out").exists());
}

#[test]
fn sync_missing_input_dir_creates_nothing() {
    let tmp = TempDir::new().unwrap();
    write_config(
        tmp.path(),
        &format!(
            "dir:\n  output_dir: '{}'\n  work_dir: '{}'\n",
            tmp.path().join("out").display(),
            tmp.path().join("work").display(),
        ),
    );

    base_cmd(tmp.path())
        .arg("sync")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("dir.input_dir"));

    assert!(!tmp.path().join("work").exists());
    assert!(!tmp.path().join("out").exists());
}

#[test]
fn sync_rejects_unknown_refresh_mode() {
    let tmp = TempDir::new().unwrap();
    write_config(tmp.path(), &local_config(tmp.path(), "hourly"));

    base_cmd(tmp.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("data_refresh_mode"))
        .stderr(contains("hourly"));
}

#[test]
fn sync_without_config_file_fails() {
    let tmp = TempDir::new().unwrap();

    base_cmd(tmp.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("config file not found"));
}

#[test]
fn sync_json_report_on_stdout() {
    let tmp = TempDir::new().unwrap();
    populate_input(tmp.path());
    write_config(tmp.path(), &local_config(tmp.path(), "always"));

    let assert = base_cmd(tmp.path())
        .args(["sync", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: Value = serde_json::from_str(&stdout).expect("stdout is a JSON report");

    assert_eq!(json["decision"]["should_refresh"], true);
    assert_eq!(json["decision"]["reason"], "always");
    assert_eq!(json["locations"][0]["strategy"], "local_copy");
    assert_eq!(json["locations"][0]["outcome"]["status"], "fetched");
    assert!(json["record_written"].is_i64());
}

#[test]
fn sync_unreachable_host_reports_partial_failure() {
    let tmp = TempDir::new().unwrap();
    populate_input(tmp.path());
    // Bind then drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    write_config(
        tmp.path(),
        &format!(
            "dir:\n  input_dir: ['dead:/exports', '{}']\n  output_dir: '{}'\n  work_dir: '{}'\n\
             data_refresh_mode: always\n\
             hosts:\n  dead: {{ location: 127.0.0.1, port: {port}, username: u, password: p }}\n",
            tmp.path().join("in").display(),
            tmp.path().join("out").display(),
            tmp.path().join("work").display(),
        ),
    );

    base_cmd(tmp.path())
        .arg("sync")
        .assert()
        .failure()
        .code(3)
        .stdout(contains("dead:/exports"))
        .stdout(contains("record unchanged"));

    // The local location still ran; the record is left for the next run to retry.
    assert!(tmp.path().join("work/data/samples.csv").is_file());
    assert!(!tmp.path().join("work/last_update.txt").exists());
}

#[test]
fn sync_stamp_every_attempt_records_after_failure() {
    let tmp = TempDir::new().unwrap();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    write_config(
        tmp.path(),
        &format!(
            "dir:\n  input_dir: 'dead:/exports'\n  output_dir: '{}'\n  work_dir: '{}'\n\
             data_refresh_mode: always\n\
             hosts:\n  dead: {{ location: 127.0.0.1, port: {port}, username: u, password: p }}\n",
            tmp.path().join("out").display(),
            tmp.path().join("work").display(),
        ),
    );

    base_cmd(tmp.path())
        .args(["sync", "--stamp-every-attempt"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("last update recorded"));

    assert!(tmp.path().join("work/last_update.txt").is_file());
}
