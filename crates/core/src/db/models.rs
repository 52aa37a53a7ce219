use serde::{Deserialize, Serialize};

/// Ledger entry for one (fingerprint, user) pair.
///
/// `dump_dir` always points at the first on-disk copy of the crash; later
/// occurrences only bump `count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRow {
    pub uuid: String,
    pub uid: u32,
    pub dump_dir: String,
    pub count: u32,
    pub reported: bool,
    /// Concatenated reporter messages from the last dispatch.
    pub message: String,
    /// Unix time of the latest occurrence.
    pub time: i64,
}

/// Values needed to record one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCrashEntry {
    pub uuid: String,
    pub uid: u32,
    pub dump_dir: String,
    pub time: i64,
}

impl NewCrashEntry {
    pub fn new(uuid: impl Into<String>, uid: u32, dump_dir: impl Into<String>, time: i64) -> Self {
        Self { uuid: uuid.into(), uid, dump_dir: dump_dir.into(), time }
    }
}

/// What an insert did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertDisposition {
    /// First occurrence; a new row with `count == 1`.
    Created,
    /// Existing row from another dump directory; `count` was incremented.
    Repeat,
    /// The row already points at this very dump directory; nothing changed.
    AlreadyStored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub row: DedupRow,
    pub disposition: InsertDisposition,
}
