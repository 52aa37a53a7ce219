//! Crash fingerprints.
//!
//! - The local UUID is available before a backtrace exists: it hashes the
//!   normalized package, the executable and the build-id/offset pairs of the
//!   mapped modules.
//! - The global UUID hashes the package, the executable and an address-free
//!   rendering of the top frames of the backtrace, so the same crash on another
//!   machine collapses to the same value.

use std::collections::BTreeSet;

use sha1::{Digest, Sha1};

/// Only frames `#0` up to (excluding) this number feed the global UUID.
pub const MAX_HASHED_FRAMES: u32 = 8;

/// SHA-1 of `input` as 40 lowercase hex characters.
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize a `name-version-release[.arch]` package string.
///
/// Cuts at the first `.` not followed by a digit (drops the distro tag), then
/// if more than one `.` remains, cuts at the last one.
///
/// `foo-1.2.3-1.fc20` becomes `foo-1.2`.
pub fn normalize_package(package: &str) -> String {
    let bytes = package.as_bytes();
    let cut = bytes
        .iter()
        .enumerate()
        .find(|&(i, &b)| b == b'.' && !bytes.get(i + 1).is_some_and(|next| next.is_ascii_digit()))
        .map(|(i, _)| i)
        .unwrap_or(package.len());
    let mut normalized = &package[..cut];

    if let (Some(first), Some(last)) = (normalized.find('.'), normalized.rfind('.')) {
        if first != last {
            normalized = &normalized[..last];
        }
    }
    normalized.to_string()
}

/// Extract the build-id/offset part of `eu-unstrip -n` style output.
///
/// For every line, the characters between the first `+` and the following `@`
/// (or end of line) are kept with whitespace removed; lines are concatenated.
pub fn independent_build_ids(unstrip_output: &str) -> String {
    let mut out = String::new();
    for line in unstrip_output.lines() {
        let Some(plus) = line.find('+') else {
            continue;
        };
        out.extend(
            line[plus + 1..].chars().take_while(|&c| c != '@').filter(|c| !c.is_whitespace()),
        );
    }
    out
}

pub fn local_uuid(package: &str, executable: &str, unstrip_output: &str) -> String {
    let input = format!(
        "{}{}{}",
        normalize_package(package),
        executable,
        independent_build_ids(unstrip_output)
    );
    sha1_hex(&input)
}

/// Address-free rendering of the top `MAX_HASHED_FRAMES` frames of the first
/// thread in the trace.
///
/// Only the first frame block is read: it ends at a `Thread` header or at a
/// frame number that does not increase. Each frame header is reduced to its
/// function and library (argument values, quoted strings, char literals,
/// addresses and the trailing `at file:line` are dropped), and the unique
/// headers are concatenated in sorted order.
pub fn independent_backtrace(backtrace: &str) -> String {
    let mut headers = BTreeSet::new();
    let mut lines = backtrace.lines().peekable();
    let mut previous: Option<u32> = None;

    while let Some(line) = lines.next() {
        if previous.is_some() && line.trim_start().starts_with("Thread ") {
            break;
        }
        let Some((number, rest)) = split_frame_header(line) else {
            continue;
        };
        if previous.is_some_and(|prev| number <= prev) {
            break;
        }
        previous = Some(number);

        let mut header = rest.to_string();
        // Argument lists may wrap over several lines, never into the next frame.
        while !is_balanced(&header) {
            match lines.next_if(|next| split_frame_header(next).is_none()) {
                Some(next) => {
                    header.push(' ');
                    header.push_str(next.trim());
                }
                None => break,
            }
        }
        if number >= MAX_HASHED_FRAMES {
            continue;
        }
        let normalized = normalize_frame(&header);
        if !normalized.is_empty() {
            headers.insert(normalized);
        }
    }

    headers.into_iter().collect()
}

/// Global UUID: a precomputed duplicate hash wins, otherwise hash the backtrace.
pub fn global_uuid(
    duphash: Option<&str>,
    package: &str,
    executable: &str,
    backtrace: &str,
) -> String {
    if let Some(hash) = duphash.map(str::trim).filter(|hash| !hash.is_empty()) {
        return hash.to_string();
    }
    sha1_hex(&format!("{package}{executable}{}", independent_backtrace(backtrace)))
}

/// `#12  0x... in f ()` -> `(12, "  0x... in f ()")`.
pub(crate) fn split_frame_header(line: &str) -> Option<(u32, &str)> {
    let rest = line.strip_prefix('#')?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let number = rest[..digits].parse().unwrap_or(u32::MAX);
    Some((number, &rest[digits..]))
}

/// Drop quoted strings and char literals. The flag is false when a string is
/// left open at the end of `text`.
fn strip_literals(text: &str) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '"' => {
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return (out, false),
                        Some('\\') => j += 2,
                        Some('"') => break,
                        Some(_) => j += 1,
                    }
                }
                i = j + 1;
            }
            '\'' => match char_literal_len(&chars[i..]) {
                Some(len) => i += len,
                None => {
                    out.push('\'');
                    i += 1;
                }
            },
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, true)
}

/// Length of a gdb char literal at the start of `chars`: `'x'`, `'"'`, `'\''`, `'\377'`.
fn char_literal_len(chars: &[char]) -> Option<usize> {
    match chars.get(1)? {
        '\\' => {
            let close = chars.iter().skip(3).take(4).position(|&c| c == '\'')?;
            Some(close + 4)
        }
        '\'' => None,
        _ => (chars.get(2) == Some(&'\'')).then_some(3),
    }
}

fn is_balanced(text: &str) -> bool {
    let (stripped, closed) = strip_literals(text);
    let mut depth: i32 = 0;
    for c in stripped.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    closed && depth <= 0
}

fn normalize_frame(header: &str) -> String {
    // Keep only top-level text; a top-level argument list collapses to "()".
    let (stripped, _) = strip_literals(header);
    let mut outer = String::with_capacity(stripped.len());
    let mut depth: u32 = 0;
    for c in stripped.chars() {
        match c {
            '(' => {
                if depth == 0 {
                    outer.push('(');
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    outer.push(')');
                }
            }
            _ if depth == 0 => outer.push(c),
            _ => {}
        }
    }
    if depth > 0 {
        outer.push(')');
    }

    let without_location = match outer.rfind(" at ") {
        Some(pos) if outer[pos + 4..].contains(':') => &outer[..pos],
        _ => outer.as_str(),
    };

    let mut tokens = without_location
        .split_whitespace()
        .filter(|token| !token.starts_with(|c: char| c.is_ascii_digit()))
        .peekable();
    // "0x... in f" and "f" name the same frame.
    if tokens.peek() == Some(&"in") {
        tokens.next();
    }
    tokens.collect()
}
