use crashvault::commands::{
    delete_element_command, info_command, init_command, new_problem_command, set_element_command,
};
use predicates::prelude::*;
use tempfile::tempdir;

fn new_problem(root: &str) -> String {
    let output = assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("new-problem")
        .arg("--root")
        .arg(root)
        .arg("--uid")
        .arg("500")
        .arg("--field")
        .arg("analyzer=CCpp")
        .arg("--field")
        .arg("executable=/usr/bin/true")
        .output()
        .expect("run new-problem");
    assert!(output.status.success(), "new-problem failed: {output:?}");
    String::from_utf8(output.stdout).expect("utf8").trim().to_string()
}

#[test]
fn new_problem_then_edit_elements() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().display().to_string();
    init_command(&root).expect("init");
    let id = new_problem(&root);
    assert!(id.contains("CCpp-"), "unexpected id: {id}");

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("info")
        .arg("--root")
        .arg(&root)
        .arg("--dir")
        .arg(&id)
        .arg("--uid")
        .arg("500")
        .arg("--element")
        .arg("executable")
        .assert()
        .success()
        .stdout(predicate::str::contains("executable: /usr/bin/true"));

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("set-element")
        .arg("--root")
        .arg(&root)
        .arg("--dir")
        .arg(&id)
        .arg("--uid")
        .arg("500")
        .arg("--field")
        .arg("comment=crashed while saving")
        .assert()
        .success()
        .stdout(predicate::str::contains("Set comment"));

    let output = assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("info")
        .arg("--root")
        .arg(&root)
        .arg("--dir")
        .arg(&id)
        .arg("--uid")
        .arg("500")
        .arg("--json")
        .output()
        .expect("run info");
    let record: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(record["comment"]["content"], "crashed while saving");
    assert_eq!(record["uid"]["content"], "500");

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("delete-element")
        .arg("--root")
        .arg(&root)
        .arg("--dir")
        .arg(&id)
        .arg("--uid")
        .arg("500")
        .arg("--name")
        .arg("comment")
        .assert()
        .success();
    let err = delete_element_command(&root, &id, 500, "comment").unwrap_err();
    assert!(err.to_string().contains("does not exist"), "unexpected: {err}");
}

#[test]
fn problem_commands_enforce_access_rules() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().display().to_string();
    init_command(&root).expect("init");
    let id = new_problem(&root);

    let err = info_command(&root, &id, 501, &[], false).unwrap_err();
    assert!(format!("{err:#}").contains("may not access"), "unexpected: {err:#}");

    let err = set_element_command(&root, &id, 500, "uid=0").unwrap_err();
    assert!(format!("{err:#}").contains("can't be changed"), "unexpected: {err:#}");

    let err = set_element_command(&root, &id, 500, "comment").unwrap_err();
    assert!(err.to_string().contains("name=value"), "unexpected: {err}");

    let err = new_problem_command(&root, &["executable=/bin/sh".to_string()], 500).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("missing required field 'analyzer'"), "unexpected: {message}");

    assert_cmd::cargo::cargo_bin_cmd!("crashvault")
        .arg("info")
        .arg("--root")
        .arg(&root)
        .arg("--dir")
        .arg("no-such-problem")
        .arg("--uid")
        .arg("500")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
