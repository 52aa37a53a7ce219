//! Crash record data model shared by the store, the wire codec and the pipeline.
//!
//! A `CrashRecord` is an ordered `name -> CrashItem` mapping. Items carry a kind
//! (system/binary/text), an editable flag and their content. Binary items hold a
//! path to the blob rather than the bytes themselves.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Text items larger than this many bytes are attachments rather than inline text.
pub const ATTACHMENT_THRESHOLD: usize = 2048;

/// Item (file) names used inside a dump directory.
pub mod items {
    pub const UUID: &str = "uuid";
    pub const DUPHASH: &str = "duphash";
    pub const UID: &str = "uid";
    pub const TIME: &str = "time";
    pub const LAST_OCCURRENCE: &str = "last_occurrence";
    pub const ANALYZER: &str = "analyzer";
    pub const EXECUTABLE: &str = "executable";
    pub const PACKAGE: &str = "package";
    pub const COMPONENT: &str = "component";
    pub const DESCRIPTION: &str = "description";
    pub const ARCHITECTURE: &str = "architecture";
    pub const KERNEL: &str = "kernel";
    pub const RELEASE: &str = "release";
    pub const CMDLINE: &str = "cmdline";
    pub const REASON: &str = "reason";
    pub const COMMENT: &str = "comment";
    pub const REPRODUCE: &str = "reproduce";
    pub const BACKTRACE: &str = "backtrace";
    pub const RATING: &str = "rating";
    pub const COREDUMP: &str = "coredump";
    pub const BUILD_IDS: &str = "build_ids";
}

/// Item names that only exist in assembled reports, never on disk.
pub mod report_items {
    /// Global UUID of the crash.
    pub const UUID: &str = "UUID";
    pub const ANALYZER: &str = "_MWAnalyzer";
    pub const UID: &str = "_MWUID";
    pub const LOCAL_UUID: &str = "_MWUUID";
}

/// Default reproduction-steps template added to reports.
pub const DEFAULT_REPRODUCE: &str = "1.\n2.\n3.\n";

/// Kind of a crash item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Bookkeeping data that is never shown to users.
    System,
    /// Reference (path) to a binary blob.
    Binary,
    Text,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::System => "system",
            ItemKind::Binary => "binary",
            ItemKind::Text => "text",
        }
    }
}

/// One named piece of crash data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashItem {
    pub kind: ItemKind,
    pub editable: bool,
    pub content: String,
}

impl CrashItem {
    pub fn new(kind: ItemKind, editable: bool, content: impl Into<String>) -> Self {
        Self { kind, editable, content: content.into() }
    }

    pub fn text(content: impl Into<String>, editable: bool) -> Self {
        Self::new(ItemKind::Text, editable, content)
    }

    /// Binary items are never editable; `path` points at the blob on disk.
    pub fn binary(path: impl Into<String>) -> Self {
        Self::new(ItemKind::Binary, false, path)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ItemKind::System, false, content)
    }

    /// Whether a front end should show this item as an attachment instead of inline text.
    pub fn is_attachment(&self) -> bool {
        self.kind == ItemKind::Text && self.content.len() > ATTACHMENT_THRESHOLD
    }
}

/// Full data of one crash, ordered by item name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrashRecord {
    items: BTreeMap<String, CrashItem>,
}

impl CrashRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an item, returning the previous value if any.
    pub fn insert(&mut self, name: impl Into<String>, item: CrashItem) -> Option<CrashItem> {
        self.items.insert(name.into(), item)
    }

    /// Insert only when no item of that name exists yet.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, item: CrashItem) {
        self.items.entry(name.into()).or_insert(item);
    }

    pub fn get(&self, name: &str) -> Option<&CrashItem> {
        self.items.get(name)
    }

    /// Content of an item, if present.
    pub fn content(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(|item| item.content.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<CrashItem> {
        self.items.remove(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CrashItem)> {
        self.items.iter().map(|(name, item)| (name.as_str(), item))
    }
}

impl FromIterator<(String, CrashItem)> for CrashRecord {
    fn from_iter<T: IntoIterator<Item = (String, CrashItem)>>(iter: T) -> Self {
        Self { items: iter.into_iter().collect() }
    }
}

/// Render a record as plain text for file- and mail-style reporters.
///
/// Short single-line text items come first as `name: value`, then multi-line
/// text blocks, then a listing of attachments and binary blobs. System items
/// are omitted.
pub fn make_description(record: &CrashRecord) -> String {
    let mut header = String::new();
    let mut blocks = String::new();
    let mut attachments = String::new();

    for (name, item) in record.iter() {
        match item.kind {
            ItemKind::System => {}
            ItemKind::Binary => {
                let _ = writeln!(attachments, "{name}: Binary file, {}", item.content);
            }
            ItemKind::Text if item.is_attachment() => {
                let _ = writeln!(attachments, "{name}: Text file, {} bytes", item.content.len());
            }
            ItemKind::Text => {
                let content = item.content.trim_end_matches('\n');
                if content.contains('\n') {
                    let _ = write!(blocks, "\n{name}\n-----\n{content}\n");
                } else {
                    let _ = writeln!(header, "{name}: {content}");
                }
            }
        }
    }

    let mut out = header;
    out.push_str(&blocks);
    if !attachments.is_empty() {
        out.push_str("\nAttachments\n-----\n");
        out.push_str(&attachments);
    }
    out
}
