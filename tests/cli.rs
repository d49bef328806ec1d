//! Drives the `finr` binary against a temporary config.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn finr_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_finr"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("balance.csv"),
        "Acme Ltd\n,,\nItem,Code,2023,2024\n\
         Total Assets,1999,1000,1200\nTotal Liabilities,2999,450,400\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("notes.txt"),
        "Inventory turnover improved while receivables grew.",
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("finreport.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{root}/data/finreport.sqlite"

[blobs]
root = "{root}/data/blobs"

[server]
bind = "127.0.0.1:7421"
"#,
            root = root.display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run_finr(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(finr_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run finr");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_finr(&config, &["init"]);
    assert!(ok, "init failed: {stderr}");
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/finreport.sqlite").exists());

    let (_, _, ok) = run_finr(&config, &["init"]);
    assert!(ok, "init is not idempotent");
}

#[test]
fn test_upload_list_search_delete() {
    let (tmp, config) = setup_test_env();
    let csv = tmp.path().join("files/balance.csv");
    let notes = tmp.path().join("files/notes.txt");

    let (stdout, stderr, ok) = run_finr(&config, &["upload", csv.to_str().unwrap()]);
    assert!(ok, "upload failed: {stderr}");
    assert!(stdout.contains("completed"));
    assert!(stdout.contains("balance.csv"));
    let id = stdout.split_whitespace().next().unwrap().to_string();

    let (_, stderr, ok) = run_finr(&config, &["upload", notes.to_str().unwrap()]);
    assert!(ok, "upload failed: {stderr}");

    let (stdout, _, ok) = run_finr(&config, &["list", "--category", "csv"]);
    assert!(ok);
    assert!(stdout.contains("balance.csv"));
    assert!(!stdout.contains("notes.txt"));

    let (stdout, _, ok) = run_finr(&config, &["search", "inventory"]);
    assert!(ok);
    assert!(stdout.contains("notes.txt"));

    let (stdout, _, ok) = run_finr(&config, &["delete", &id]);
    assert!(ok);
    assert!(stdout.contains("Deleted"));

    let (stdout, _, ok) = run_finr(&config, &["list"]);
    assert!(ok);
    assert!(!stdout.contains("balance.csv"));
}

#[test]
fn test_report_requires_completion_provider() {
    let (tmp, config) = setup_test_env();
    let csv = tmp.path().join("files/balance.csv");
    let (stdout, _, ok) = run_finr(&config, &["upload", csv.to_str().unwrap()]);
    assert!(ok);
    let id = stdout.split_whitespace().next().unwrap().to_string();

    let (_, stderr, ok) = run_finr(&config, &["report", "generate", &id]);
    assert!(!ok);
    assert!(stderr.contains("completion provider"));
}

#[test]
fn test_templates_without_config() {
    let output = Command::new(finr_binary())
        .args(["--config", "/nonexistent/finreport.toml", "templates"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("comprehensive"));
    assert!(stdout.contains("executive"));
}

#[test]
fn test_missing_config_fails() {
    let output = Command::new(finr_binary())
        .args(["--config", "/nonexistent/finreport.toml", "list"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
