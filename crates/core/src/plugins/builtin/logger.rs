use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::model::{make_description, CrashRecord};
use crate::plugins::settings::setting_bool;
use crate::plugins::{Plugin, PluginError, PluginSettings, Reporter};

const DEFAULT_LOG_PATH: &str = "/var/log/abrt.log";

/// Writes the plain-text rendering of a report to a log file.
#[derive(Debug, Clone)]
pub struct LoggerReporter {
    log_path: PathBuf,
    append: bool,
}

impl Default for LoggerReporter {
    fn default() -> Self {
        Self { log_path: PathBuf::from(DEFAULT_LOG_PATH), append: true }
    }
}

impl Plugin for LoggerReporter {
    fn apply_settings(&mut self, settings: &PluginSettings) {
        if let Some(path) = settings.get("LogPath") {
            self.log_path = PathBuf::from(path);
        }
        if let Some(value) = settings.get("AppendLogs") {
            self.append = setting_bool(value);
        }
    }
}

impl Reporter for LoggerReporter {
    fn report(&self, record: &CrashRecord, _args: &str) -> Result<String, PluginError> {
        let mut options = OpenOptions::new();
        options.create(true);
        if self.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.log_path)?;
        file.write_all(make_description(record).as_bytes())?;
        file.write_all(b"\n\n\n")?;
        debug!(path = %self.log_path.display(), "report written");

        let verb = if self.append { "appended" } else { "stored" };
        Ok(format!("The report was {verb} to {}", self.log_path.display()))
    }
}
