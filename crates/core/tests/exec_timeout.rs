use std::process::Command;
use std::time::{Duration, Instant};

use crashvault_core::services::{run_with_timeout, ExecError};

#[test]
fn captures_stdout_of_finished_process() {
    let mut command = Command::new("sh");
    command.arg("-c").arg("echo hello; echo world");
    let output = run_with_timeout(&mut command, Duration::from_secs(10)).expect("run");
    assert!(output.success());
    assert!(!output.timed_out);
    assert_eq!(output.stdout, "hello\nworld\n");
}

#[test]
fn kills_on_timeout_and_keeps_partial_output() {
    let mut command = Command::new("sh");
    command.arg("-c").arg("echo started; sleep 30");
    let started = Instant::now();
    let output = run_with_timeout(&mut command, Duration::from_secs(1)).expect("run");

    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(output.timed_out);
    assert!(!output.success());
    assert!(output.stdout.starts_with("started\n"));
    assert!(output.stdout.ends_with("\nTimeout exceeded: 1 seconds, killing sh\n"));
}

#[test]
fn failing_exit_status_is_not_success() {
    let mut command = Command::new("sh");
    command.arg("-c").arg("exit 3");
    let output = run_with_timeout(&mut command, Duration::from_secs(10)).expect("run");
    assert!(!output.timed_out);
    assert_eq!(output.status.and_then(|status| status.code()), Some(3));
    assert!(!output.success());
}

#[test]
fn missing_program_is_a_spawn_error() {
    let mut command = Command::new("/nonexistent/crashvault-test-binary");
    match run_with_timeout(&mut command, Duration::from_secs(1)) {
        Err(ExecError::Spawn { program, .. }) => {
            assert_eq!(program, "/nonexistent/crashvault-test-binary")
        }
        other => panic!("expected spawn error, got {other:?}"),
    }
}
