use std::fs;

use crashvault_core::dump::{is_locked, DumpDir, DumpError, OpenFlags};
use crashvault_core::model::items;
use tempfile::tempdir;

#[test]
fn create_writes_basic_items_and_refuses_existing_path() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("ccpp-1");

    let dir = DumpDir::create(&path, 500).expect("create");
    assert_eq!(dir.load_text(items::UID).expect("uid"), "500");
    assert!(dir.exists(items::TIME));
    assert!(dir.exists(items::ARCHITECTURE));
    assert!(is_locked(&path));
    dir.close();
    assert!(!is_locked(&path));

    match DumpDir::create(&path, 500) {
        Err(DumpError::AlreadyExists(existing)) => assert_eq!(existing, path),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

#[test]
fn fail_quietly_open_reports_busy_while_locked() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("ccpp-1");
    let holder = DumpDir::create(&path, 500).expect("create");

    assert!(matches!(DumpDir::open(&path, OpenFlags::fail_quietly()), Err(DumpError::Busy(_))));
    assert!(DumpDir::try_open(&path, None).expect("try_open").is_none());

    drop(holder);
    assert!(DumpDir::try_open(&path, None).expect("try_open").is_some());
}

#[test]
fn missing_directory_is_not_found() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("nope");
    assert!(matches!(DumpDir::open(&path, OpenFlags::default()), Err(DumpError::NotFound(_))));
    assert!(DumpDir::try_open(&path, Some(500)).expect("try_open").is_none());
}

#[test]
fn stale_lock_from_dead_process_is_reclaimed() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("ccpp-1");
    DumpDir::create(&path, 500).expect("create").close();

    // PIDs never get this large on Linux.
    fs::write(tmp.path().join("ccpp-1.lock"), "4294967290").expect("write marker");
    let dir = DumpDir::open(&path, OpenFlags::fail_quietly()).expect("reclaim");
    assert_eq!(dir.owner_uid().expect("uid"), Some(500));
}

#[test]
fn open_checks_owner_unless_privileged() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("ccpp-1");
    DumpDir::create(&path, 500).expect("create").close();

    assert!(DumpDir::open(&path, OpenFlags::default().for_uid(500)).is_ok());
    assert!(DumpDir::open(&path, OpenFlags::default().for_uid(0)).is_ok());
    match DumpDir::open(&path, OpenFlags::default().for_uid(501)) {
        Err(DumpError::PermissionDenied { uid, .. }) => assert_eq!(uid, 501),
        other => panic!("expected PermissionDenied, got {other:?}"),
    }
}

#[test]
fn items_round_trip_and_enumerate_classifies_binary() {
    let tmp = tempdir().expect("tempdir");
    let dir = DumpDir::create(tmp.path().join("ccpp-1"), 0).expect("create");

    dir.save_text(items::EXECUTABLE, "/usr/bin/bash").expect("executable");
    dir.save_binary(items::COREDUMP, b"ELF").expect("coredump");
    dir.save_binary("blob", &[0x00, 0x01, 0xff]).expect("blob");

    assert_eq!(dir.load_text(items::EXECUTABLE).expect("load"), "/usr/bin/bash");
    assert_eq!(dir.item_size("blob").expect("size"), Some(3));
    assert!(matches!(dir.load_text("blob"), Err(DumpError::NotText { .. })));
    assert!(matches!(dir.load_text("nothing"), Err(DumpError::MissingItem { .. })));
    assert!(matches!(dir.save_text("../escape", "x"), Err(DumpError::InvalidItemName(_))));

    let listing: Vec<(String, bool)> = dir
        .enumerate()
        .expect("enumerate")
        .into_iter()
        .map(|item| (item.name, item.is_text))
        .collect();
    assert!(listing.contains(&("blob".to_string(), false)));
    assert!(listing.contains(&(items::COREDUMP.to_string(), false)));
    assert!(listing.contains(&(items::EXECUTABLE.to_string(), true)));

    assert!(dir.delete_item("blob").expect("delete"));
    assert!(!dir.delete_item("blob").expect("delete again"));
}

#[test]
fn delete_removes_directory_and_releases_lock() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("ccpp-1");
    let dir = DumpDir::create(&path, 0).expect("create");
    dir.delete().expect("delete");

    assert!(!path.exists());
    assert!(!is_locked(&path));
}
