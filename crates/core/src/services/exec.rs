use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a bounded subprocess run.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output; on timeout, whatever was read plus a timeout note.
    pub stdout: String,
    /// `None` if the child could not be reaped after being killed.
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }
}

/// Run `command` capturing stdout, killing it after `timeout`.
///
/// A timeout is not an error: the partial output is kept and
/// `"\nTimeout exceeded: <secs> seconds, killing <program>\n"` is appended.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<ExecOutput, ExecError> {
    let program = command.get_program().to_string_lossy().into_owned();
    command.stdin(Stdio::null()).stdout(Stdio::piped());
    let mut child =
        command.spawn().map_err(|source| ExecError::Spawn { program: program.clone(), source })?;

    let captured = Arc::new(Mutex::new(Vec::new()));
    let reader = child.stdout.take().map(|mut stdout| {
        let captured = Arc::clone(&captured);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match stdout.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = captured.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        })
    });

    let deadline = Instant::now() + timeout;
    let (status, timed_out) = loop {
        match child.try_wait() {
            Ok(Some(status)) => break (Some(status), false),
            Ok(None) => {}
            Err(source) => return Err(ExecError::Wait { program, source }),
        }
        if Instant::now() >= deadline {
            if let Err(err) = child.kill() {
                warn!(%program, "failed to kill timed out process: {err}");
            }
            break (child.wait().ok(), true);
        }
        thread::sleep(POLL_INTERVAL);
    };

    // After a kill, grandchildren may still hold the pipe open; don't wait for them.
    if !timed_out {
        if let Some(reader) = reader {
            let _ = reader.join();
        }
    }

    let bytes = captured.lock().map(|buf| buf.clone()).unwrap_or_default();
    let mut stdout = String::from_utf8_lossy(&bytes).into_owned();
    if timed_out {
        warn!(%program, seconds = timeout.as_secs(), "subprocess timed out, killed");
        stdout.push_str(&format!(
            "\nTimeout exceeded: {} seconds, killing {}\n",
            timeout.as_secs(),
            program
        ));
    }

    Ok(ExecOutput { stdout, status, timed_out })
}
