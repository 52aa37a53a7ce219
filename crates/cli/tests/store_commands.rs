use crashvault_core::db::{CrashLedger, StoreLayout};
use predicates::prelude::*;
use tempfile::tempdir;

/// Running the CLI with no arguments should default to the Status command.
#[test]
fn status_is_the_default_command() {
    let dir = tempdir().expect("tempdir");
    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("crashvault v"))
        .stdout(predicate::str::contains("(MISSING)"));
}

#[test]
fn init_creates_store_layout() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("init")
        .arg("--root")
        .arg(root)
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized crash store:"));

    let layout = StoreLayout::new(root.canonicalize().expect("canon root"));
    assert!(layout.config_path.is_file(), "policy should exist");
    assert!(layout.dump_location.is_dir(), "dump location should exist");
    assert!(layout.cache_dir.is_dir(), "debuginfo cache should exist");
    assert!(layout.plugins_conf_dir.join("SQLite3.conf").is_file());
    assert!(layout.plugins_conf_dir.join("Logger.conf").is_file());
    CrashLedger::open(&layout.db_path).expect("ledger should open");

    // Second init keeps existing files.
    std::fs::write(&layout.config_path, "[Common]\nBlackList = bash\n").expect("edit policy");
    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("init")
        .arg("--root")
        .arg(root)
        .assert()
        .success();
    let policy = std::fs::read_to_string(&layout.config_path).expect("policy");
    assert_eq!(policy, "[Common]\nBlackList = bash\n");

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .current_dir(root)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("- Dump location: OK"));
}

#[test]
fn policy_reports_effective_settings() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("init")
        .arg("--root")
        .arg(root)
        .assert()
        .success();

    let output = assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("policy")
        .arg("--root")
        .arg(root)
        .arg("--json")
        .output()
        .expect("run policy");
    assert!(output.status.success());
    let policy: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(policy["database"], "SQLite3");
    assert_eq!(policy["max_crash_reports_size_mb"], 1000);
    assert_eq!(policy["analyzer_actions_and_reporters"]["Python"][0]["name"], "Logger");
    let blacklist = policy["blacklist"].as_array().expect("blacklist");
    assert!(blacklist.iter().any(|name| name.as_str() == Some("valgrind")));

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("policy")
        .arg("--root")
        .arg(root)
        .assert()
        .success()
        .stdout(predicate::str::contains("Database: SQLite3"))
        .stdout(predicate::str::contains("CCpp: Logger"));
}

#[test]
fn plugins_lists_builtin_catalog() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("init")
        .arg("--root")
        .arg(root)
        .assert()
        .success();

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("plugins")
        .arg("--root")
        .arg(root)
        .assert()
        .success()
        .stdout(predicate::str::contains("Plugins (5):"))
        .stdout(predicate::str::contains("Logger [Reporter, enabled]"))
        .stdout(predicate::str::contains("SQLite3 [Database, enabled]"));

    let output = assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("plugins")
        .arg("--root")
        .arg(root)
        .arg("--json")
        .output()
        .expect("run plugins");
    let listing: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let names: Vec<&str> = listing["plugins"]
        .as_array()
        .expect("plugins")
        .iter()
        .filter_map(|plugin| plugin["name"].as_str())
        .collect();
    assert_eq!(names, vec!["CCpp", "Logger", "Python", "RunApp", "SQLite3"]);
}
