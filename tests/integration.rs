use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn wfcollector_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("wfcollector");
    path
}

fn archive_file(archive: &Path, name: &str, contents: &str) {
    let fields: Vec<&str> = name.split('.').collect();
    let dir = archive
        .join(fields[5])
        .join(fields[0])
        .join(fields[1])
        .join(format!("{}.{}", fields[3], fields[4]));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), contents).unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let archive = root.join("archive");
    for day in 1..=4 {
        let name = format!("NL.HGN.02.BHZ.D.2020.{:03}", day);
        archive_file(&archive, &name, &format!("records of {}", name));
    }
    archive_file(&archive, "NL.WIT.02.BHZ.D.2020.001", "records of WIT");

    let config_content = format!(
        r#"[archive]
root = "{}/archive"
fdsn_station_url = "http://127.0.0.1:9/fdsnws/station/1/query"

[store]
path = "{}/data/wfcollector.sqlite"

[scheduler]
workers = 2
chunk_size = 2
task_timeout_secs = 60
grace_period_secs = 5

[filtering]
enabled = true
allow = ["NL.*"]
deny = ["NL.WIT.*"]
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("wfcollector.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_wfcollector(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = wfcollector_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wfcollector binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn summary_value(stdout: &str, label: &str) -> usize {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(&format!("{}: ", label)))
        .unwrap_or_else(|| panic!("no '{}' line in output:\n{}", label, stdout))
        .parse()
        .unwrap()
}

#[test]
fn test_collect_directory() {
    let (tmp, config) = setup_test_env();
    let archive = tmp.path().join("archive");

    let (stdout, stderr, success) =
        run_wfcollector(&config, &["--dir", archive.to_str().unwrap()]);
    assert!(success, "collect failed: {}", stderr);
    // The WIT file is denied by the filter chain.
    assert_eq!(summary_value(&stdout, "files considered"), 4);
    assert_eq!(summary_value(&stdout, "files selected"), 4);
    assert_eq!(summary_value(&stdout, "completed"), 4);
    assert_eq!(summary_value(&stdout, "failures"), 0);
    assert!(stdout.contains("ok"));
    assert!(tmp.path().join("data/wfcollector.sqlite").exists());
}

#[test]
fn test_second_run_is_a_noop() {
    let (tmp, config) = setup_test_env();
    let archive = tmp.path().join("archive");
    let dir = archive.to_str().unwrap();

    let (_, stderr, success) = run_wfcollector(&config, &["--dir", dir]);
    assert!(success, "first run failed: {}", stderr);

    let (stdout, stderr, success) = run_wfcollector(&config, &["--dir", dir]);
    assert!(success, "second run failed: {}", stderr);
    assert_eq!(summary_value(&stdout, "files selected"), 0);
}

#[test]
fn test_changed_file_selects_neighbours() {
    let (tmp, config) = setup_test_env();
    let archive = tmp.path().join("archive");
    let dir = archive.to_str().unwrap();

    let (_, stderr, success) = run_wfcollector(&config, &["--dir", dir]);
    assert!(success, "first run failed: {}", stderr);

    archive_file(&archive, "NL.HGN.02.BHZ.D.2020.002", "rewritten records");

    let (stdout, stderr, success) = run_wfcollector(&config, &["--dir", dir]);
    assert!(success, "second run failed: {}", stderr);
    assert_eq!(summary_value(&stdout, "files selected"), 3);
    assert_eq!(summary_value(&stdout, "completed"), 3);
}

#[test]
fn test_force_reprocesses() {
    let (_tmp, config) = setup_test_env();

    let (_, stderr, success) = run_wfcollector(&config, &["--file", "NL.HGN.02.BHZ.D.2020.004"]);
    assert!(success, "first run failed: {}", stderr);

    let (stdout, stderr, success) = run_wfcollector(
        &config,
        &["--file", "NL.HGN.02.BHZ.D.2020.004", "--force"],
    );
    assert!(success, "forced run failed: {}", stderr);
    // Day 005 does not exist, so the window is 003 and 004.
    assert_eq!(summary_value(&stdout, "files selected"), 2);
}

#[test]
fn test_date_range() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) =
        run_wfcollector(&config, &["--date", "2020-01-03", "--range", "-2"]);
    assert!(success, "date run failed: {}", stderr);
    assert_eq!(summary_value(&stdout, "files considered"), 2);
}

#[test]
fn test_glob_selection() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) =
        run_wfcollector(&config, &["--glob", "NL.HGN.02.BH?.D.2020.00[12]"]);
    assert!(success, "glob run failed: {}", stderr);
    assert_eq!(summary_value(&stdout, "files considered"), 2);
}

#[test]
fn test_ambiguous_selection_fails() {
    let (_tmp, config) = setup_test_env();

    let (_, stderr, success) = run_wfcollector(
        &config,
        &["--file", "NL.HGN.02.BHZ.D.2020.001", "--past", "week"],
    );
    assert!(!success);
    assert!(stderr.contains("choose one"), "stderr: {}", stderr);
}

#[test]
fn test_no_selection_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, _, success) = run_wfcollector(&config, &[]);
    assert!(!success);
}

#[test]
fn test_missing_file_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_wfcollector(&config, &["--file", "NL.HGN.02.BHZ.D.2021.001"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "stderr: {}", stderr);
}

#[test]
fn test_empty_list_is_nothing_to_do() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, success) = run_wfcollector(&config, &["--list", "[]"]);
    assert!(success, "empty list failed: {}", stderr);
    assert!(!tmp.path().join("data/wfcollector.sqlite").exists());
}

#[test]
fn test_print_config() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_wfcollector(&config, &["--print-config"]);
    assert!(success, "print-config failed: {}", stderr);
    assert!(stdout.contains("[scheduler]"));
    assert!(stdout.contains("workers = 2"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_wfcollector(
        &tmp.path().join("nope.toml"),
        &["--past", "today"],
    );
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}
