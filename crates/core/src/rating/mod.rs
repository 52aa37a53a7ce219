//! Backtrace quality rating on a 0..=4 scale.
//!
//! Frames closer to the bottom of the trace weigh less than frames near the
//! crash point: frames are processed bottom-up and each one gets a multiplier
//! one higher than the previous.

use serde::{Deserialize, Serialize};

use crate::fingerprint::split_frame_header;

/// Highest possible rating.
pub const MAX_RATING: u8 = 4;

/// How much useful information a single frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrameQuality {
    MissingEverything,
    MissingFunction,
    MissingLibrary,
    MissingSourceFile,
    Good,
}

impl FrameQuality {
    /// Classify one frame's text (header plus any continuation lines).
    pub fn classify(frame: &str) -> Self {
        if frame.contains(" at ") {
            return FrameQuality::Good;
        }
        let has_function =
            frame.match_indices(" in ").any(|(pos, _)| !frame[pos + 4..].starts_with("??"));
        let has_library = frame.contains(" from ");
        match (has_function, has_library) {
            (true, true) => FrameQuality::MissingSourceFile,
            (true, false) => FrameQuality::MissingLibrary,
            (false, true) => FrameQuality::MissingFunction,
            (false, false) => FrameQuality::MissingEverything,
        }
    }

    pub fn score(self) -> u64 {
        match self {
            FrameQuality::MissingEverything => 0,
            FrameQuality::MissingFunction => 1,
            FrameQuality::MissingLibrary => 2,
            FrameQuality::MissingSourceFile => 3,
            FrameQuality::Good => 4,
        }
    }
}

/// Split raw debugger output into `(frame number, frame text)` pairs.
///
/// A frame starts at a line beginning with `#<digit>`; following lines up to
/// the next frame belong to it. Tabs and newlines become spaces.
pub fn split_frames(backtrace: &str) -> Vec<(u32, String)> {
    let mut frames: Vec<(u32, String)> = Vec::new();
    for line in backtrace.lines() {
        if let Some((number, _)) = split_frame_header(line) {
            frames.push((number, line.replace('\t', " ")));
        } else if let Some((_, text)) = frames.last_mut() {
            text.push(' ');
            text.push_str(&line.replace('\t', " "));
        }
    }
    frames
}

/// Rate a raw backtrace. Returns 0 when there are no frames.
pub fn rate_backtrace(backtrace: &str) -> u8 {
    let frames = split_frames(backtrace);

    let mut multiplier: u64 = 0;
    let mut rating: u64 = 0;
    let mut best: u64 = 0;
    let mut last_number: Option<u32> = None;

    for (number, text) in frames.iter().rev() {
        // gdb re-prints the crashing frame at the top; count it once.
        if last_number == Some(*number) {
            continue;
        }
        last_number = Some(*number);

        multiplier += 1;
        rating += FrameQuality::classify(text).score() * multiplier;
        best += FrameQuality::Good.score() * multiplier;
    }

    stars(rating, best)
}

fn stars(rating: u64, best: u64) -> u8 {
    if best == 0 {
        return 0;
    }
    let scaled = rating * 10;
    if scaled >= best * 8 {
        4
    } else if scaled >= best * 6 {
        3
    } else if scaled >= best * 4 {
        2
    } else if scaled >= best * 2 {
        1
    } else {
        0
    }
}
