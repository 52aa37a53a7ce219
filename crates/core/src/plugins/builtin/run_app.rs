use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::dump::{DumpDir, OpenFlags};
use crate::plugins::{Action, Plugin, PluginError, PluginSettings};
use crate::services::exec::run_with_timeout;

const DEFAULT_TIMEOUT_SEC: u64 = 60;

/// Runs `sh -c <command>` inside the dump directory.
///
/// Arguments: `command[, item]`. With an item name, the command's stdout is
/// saved into that item.
#[derive(Debug, Clone)]
pub struct RunAppAction {
    timeout: Duration,
}

impl Default for RunAppAction {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(DEFAULT_TIMEOUT_SEC) }
    }
}

/// Split on commas outside double quotes; quotes are dropped.
fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in args.chars() {
        match c {
            '"' => in_quote = !in_quote,
            ',' if !in_quote => out.push(std::mem::take(&mut current).trim().to_string()),
            c => current.push(c),
        }
    }
    out.push(current.trim().to_string());
    out
}

impl Plugin for RunAppAction {
    fn apply_settings(&mut self, settings: &PluginSettings) {
        if let Some(secs) = settings.get("TimeoutSec").and_then(|v| v.parse().ok()) {
            self.timeout = Duration::from_secs(secs);
        }
    }
}

impl Action for RunAppAction {
    fn run(&self, dump_dir: &Path, args: &str) -> Result<(), PluginError> {
        let args = split_args(args);
        let program = args.first().map(String::as_str).unwrap_or_default();
        if program.is_empty() {
            return Err(PluginError::failed("RunApp: no command given"));
        }

        let mut command = Command::new("sh");
        command.arg("-c").arg(program).current_dir(dump_dir);
        let output = run_with_timeout(&mut command, self.timeout)?;
        if !output.success() {
            return Err(PluginError::failed(format!("RunApp: '{program}' failed")));
        }
        debug!(dir = %dump_dir.display(), command = program, "RunApp finished");

        if let Some(item) = args.get(1).filter(|item| !item.is_empty()) {
            let dir = DumpDir::open(dump_dir, OpenFlags::default())?;
            dir.save_text(item, &output.stdout)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::PolicyConfig;

    #[test]
    fn splits_quoted_arguments() {
        assert_eq!(split_args(r#""echo a, b", out"#), vec!["echo a, b", "out"]);
        assert_eq!(split_args("date"), vec!["date"]);
    }

    #[test]
    fn saves_command_output_as_item() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("ccpp-1");
        DumpDir::create(&path, 0).expect("create").close();

        RunAppAction::default().run(&path, "echo hello, greeting").expect("run");
        let dir = DumpDir::open(&path, OpenFlags::default()).expect("open");
        assert_eq!(dir.load_text("greeting").expect("item"), "hello\n");
    }

    #[test]
    fn policy_arguments_keep_quoted_commas_in_the_command() {
        let policy = r#"ActionsAndReporters = RunApp("echo a, b", out)"#;
        let config = PolicyConfig::parse(policy).expect("parse");
        let call = &config.actions_and_reporters[0];

        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("ccpp-2");
        DumpDir::create(&path, 0).expect("create").close();

        RunAppAction::default().run(&path, &call.args).expect("run");
        let dir = DumpDir::open(&path, OpenFlags::default()).expect("open");
        assert_eq!(dir.load_text("out").expect("item"), "a, b\n");
        assert!(dir.load_text("b").is_err());
    }
}
