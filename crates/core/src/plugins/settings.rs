//! `key = value` settings files.
//!
//! Whitespace outside double quotes is dropped, `#` outside quotes starts a
//! comment, the first unquoted `=` separates key from value. Quotes protect
//! whitespace, `=` and `#`; the quote characters themselves are not kept.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Parsed settings of one plugin.
pub type PluginSettings = BTreeMap<String, String>;

/// Header line written at the top of saved settings files.
pub const SETTINGS_HEADER: &str = "# Settings were written by crashvault";

/// Parse one line. Returns `None` for comments, blank lines, lines without a
/// value and lines ending inside an open quote.
pub fn parse_line(line: &str) -> Option<(String, String)> {
    tokenize_line(line, false)
}

/// Like [`parse_line`], but the quote characters stay in the value, so a later
/// parser can still tell quoted commas apart.
pub fn parse_line_keeping_quotes(line: &str) -> Option<(String, String)> {
    tokenize_line(line, true)
}

fn tokenize_line(line: &str, keep_quotes: bool) -> Option<(String, String)> {
    let mut key = String::new();
    let mut value = String::new();
    let mut in_quote = false;
    let mut in_value = false;

    for c in line.chars() {
        let target = if in_value { &mut value } else { &mut key };
        if c == '"' {
            in_quote = !in_quote;
            if keep_quotes && in_value {
                target.push(c);
            }
            continue;
        }
        if in_quote {
            target.push(c);
            continue;
        }
        match c {
            c if c.is_whitespace() => {}
            '#' => break,
            '=' if !in_value => in_value = true,
            c => target.push(c),
        }
    }

    if in_quote || key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

pub fn parse_settings(text: &str) -> PluginSettings {
    text.lines().filter_map(parse_line).collect()
}

/// Load a settings file; a missing file yields empty settings.
pub fn load_settings_file(path: &Path) -> io::Result<PluginSettings> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse_settings(&text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PluginSettings::new()),
        Err(err) => Err(err),
    }
}

/// Render settings in a form `parse_settings` reads back unchanged.
pub fn render_settings(settings: &PluginSettings) -> String {
    let mut out = String::from(SETTINGS_HEADER);
    out.push('\n');
    for (key, value) in settings {
        let needs_quotes = value.chars().any(|c| c.is_whitespace() || c == '#' || c == '=');
        if needs_quotes {
            out.push_str(&format!("{key} = \"{value}\"\n"));
        } else {
            out.push_str(&format!("{key} = {value}\n"));
        }
    }
    out
}

pub fn save_settings_file(path: &Path, settings: &PluginSettings) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_settings(settings))
}

/// `yes`/`true`/`on`/`1`, case-insensitive.
pub fn setting_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "on" | "1")
}
