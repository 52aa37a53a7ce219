use std::fs;

use crashvault::{canonicalize_or_current, parse_field};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current(".").expect("canonicalize").canonicalize().expect("canon");
    let expected = tmp.path().canonicalize().expect("canon tmp");
    assert_eq!(result, expected);

    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
fn canonicalize_or_current_resolves_existing_path() {
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");

    let result = canonicalize_or_current(&subdir.display().to_string()).expect("canonicalize");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));
}

#[test]
fn canonicalize_or_current_keeps_missing_absolute_path() {
    let tmp = tempdir().expect("tempdir");
    let missing = tmp.path().join("not-yet");
    let result = canonicalize_or_current(&missing.display().to_string()).expect("canonicalize");
    assert_eq!(result, missing);
}

#[test]
fn parse_field_splits_on_first_equals() {
    assert_eq!(
        parse_field("cmdline=/usr/bin/foo --opt=1").expect("parse"),
        ("cmdline".to_string(), "/usr/bin/foo --opt=1".to_string())
    );
    assert_eq!(parse_field(" comment =").expect("parse"), ("comment".into(), String::new()));
}

#[test]
fn parse_field_rejects_malformed_input() {
    let err = parse_field("analyzer").unwrap_err();
    assert!(err.to_string().contains("not of the form name=value"), "unexpected error: {err}");
    let err = parse_field("=CCpp").unwrap_err();
    assert!(err.to_string().contains("empty name"), "unexpected error: {err}");
}
