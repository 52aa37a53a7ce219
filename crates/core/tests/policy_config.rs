use std::fs;
use std::path::PathBuf;

use crashvault_core::db::{
    layout_defaults, load_policy_config, ConfigError, PluginCall, PolicyConfig, StoreLayout,
};
use tempfile::tempdir;

#[test]
fn parses_common_keys_and_reporter_mappings() {
    let text = r#"
# global settings
[Common]
BlackList = nspluginwrapper, valgrind, strace
EnabledPlugins = Logger, CCpp
Database = SQLite3
OpenGPGCheck = yes
OpenGPGPublicKeys = /etc/pki/rpm-gpg/RPM-GPG-KEY-fedora
MaxCrashReportsSize = 250
DumpLocation = "/srv/crash dumps"
ActionsAndReporters = RunApp("date", date)

[AnalyzerActionsAndReporters]
CCpp = Logger, RunApp("uname -a", uname)
Kerneloops = Logger
"#;
    let config = PolicyConfig::parse(text).expect("parse");

    assert!(config.is_blacklisted("valgrind"));
    assert!(!config.is_blacklisted("bash"));
    assert_eq!(config.enabled_plugins, vec!["Logger", "CCpp"]);
    assert!(config.open_gpg_check);
    assert_eq!(config.open_gpg_public_keys.len(), 1);
    assert_eq!(config.max_crash_reports_size_mb, 250);
    assert_eq!(config.dump_location, PathBuf::from("/srv/crash dumps"));
    assert_eq!(config.actions_and_reporters, vec![PluginCall::new("RunApp", "\"date\",date")]);
    assert_eq!(
        config.reporters_for("CCpp", "bash"),
        &[PluginCall::new("Logger", ""), PluginCall::new("RunApp", "\"uname -a\",uname")][..]
    );

    let referenced = config.referenced_plugins();
    for name in ["CCpp", "Kerneloops", "Logger", "RunApp", "SQLite3"] {
        assert!(referenced.contains(name), "{name} should be referenced");
    }
}

#[test]
fn rejects_bad_values_and_headers() {
    match PolicyConfig::parse("[Common]\nMaxCrashReportsSize = lots\n") {
        Err(ConfigError::InvalidValue { key, value }) => {
            assert_eq!(key, "MaxCrashReportsSize");
            assert_eq!(value, "lots");
        }
        other => panic!("expected InvalidValue, got {other:?}"),
    }
    match PolicyConfig::parse("BlackList = a\n[Common\n") {
        Err(ConfigError::MalformedSection { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected MalformedSection, got {other:?}"),
    }
}

#[test]
fn unknown_sections_and_keys_are_ignored() {
    let config =
        PolicyConfig::parse("[Cron]\nBlackList = bash\n[Common]\nColor = blue\n").expect("parse");
    assert!(config.blacklist.is_empty());
    assert_eq!(config, PolicyConfig::default());
}

#[test]
fn store_policy_points_into_the_layout() {
    let tmp = tempdir().expect("tempdir");
    let layout = StoreLayout::new(tmp.path());

    let config = load_policy_config(&layout).expect("missing file uses defaults");
    assert_eq!(config, layout_defaults(&layout));
    assert_eq!(config.dump_location, layout.dump_location);

    fs::write(&layout.config_path, "[Common]\nBlackList = bash\n").expect("write");
    let config = load_policy_config(&layout).expect("load");
    assert!(config.is_blacklisted("bash"));
    assert_eq!(config.plugins_conf_dir, layout.plugins_conf_dir);
}
