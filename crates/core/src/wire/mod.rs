//! Length-prefixed text frames for exchanging crash records between processes.
//!
//! Grammar:
//!
//! ```text
//! frame   := MARKER data END
//! END     := 0x17 '\n'
//! list    := prefix record*            (prefix = number of records)
//! record  := prefix item*              (prefix = number of items)
//! item    := field(name) field(kind) field(editable) field(content)
//! field   := prefix bytes              (prefix = byte length)
//! prefix  := '(' digit+ ')'
//! ```
//!
//! Every length prefix is checked against the remaining buffer before slicing.

use thiserror::Error;

use crate::model::{CrashItem, CrashRecord, ItemKind};

/// Frame terminator.
pub const FRAME_END: [u8; 2] = [0x17, b'\n'];

/// Decoding errors. Offsets are byte positions in the decoded buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("expected '{expected}' at offset {offset}, found byte 0x{found:02x}")]
    UnexpectedByte { offset: usize, expected: char, found: u8 },

    #[error("invalid length prefix at offset {offset}")]
    InvalidLength { offset: usize },

    #[error("field at offset {offset} declares {declared} bytes but only {available} remain")]
    Truncated { offset: usize, declared: usize, available: usize },

    #[error("field at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("unknown item kind '{0}'")]
    UnknownKind(String),

    #[error("unknown editable flag '{0}'")]
    UnknownEditable(String),

    #[error("frame does not start with a known marker")]
    UnknownMarker,

    #[error("frame is missing its end marker")]
    MissingEnd,

    #[error("{count} trailing bytes after offset {offset}")]
    TrailingData { offset: usize, count: usize },
}

pub type WireResult<T> = Result<T, WireError>;

/// Request/reply markers that open a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    DeleteDebugDump,
    GetCrashInfos,
    Report,
    CreateReport,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::DeleteDebugDump,
        MessageKind::GetCrashInfos,
        MessageKind::Report,
        MessageKind::CreateReport,
    ];

    pub fn marker(self) -> &'static str {
        match self {
            MessageKind::DeleteDebugDump => "(DELETE_DEBUG_DUMP)",
            MessageKind::GetCrashInfos => "(GET_CRASH_INFOS)",
            MessageKind::Report => "(REPORT)",
            MessageKind::CreateReport => "(CREATE_REPORT)",
        }
    }
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(kind: MessageKind, data: impl Into<Vec<u8>>) -> Self {
        Self { kind, data: data.into() }
    }

    /// Frame carrying a list of records (e.g. a crash-info reply).
    pub fn records(kind: MessageKind, records: &[CrashRecord]) -> Self {
        Self::new(kind, encode_record_list(records))
    }

    pub fn encode(&self) -> Vec<u8> {
        let marker = self.kind.marker().as_bytes();
        let mut out = Vec::with_capacity(marker.len() + self.data.len() + FRAME_END.len());
        out.extend_from_slice(marker);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&FRAME_END);
        out
    }

    /// Decode a complete frame. The buffer must end with `FRAME_END`.
    pub fn decode(buf: &[u8]) -> WireResult<Self> {
        let kind = MessageKind::ALL
            .into_iter()
            .find(|kind| buf.starts_with(kind.marker().as_bytes()))
            .ok_or(WireError::UnknownMarker)?;
        let start = kind.marker().len();
        if buf.len() < start + FRAME_END.len() || !buf.ends_with(&FRAME_END) {
            return Err(WireError::MissingEnd);
        }
        let data = buf.get(start..buf.len() - FRAME_END.len()).ok_or(WireError::MissingEnd)?;
        Ok(Self { kind, data: data.to_vec() })
    }

    pub fn decode_records(&self) -> WireResult<Vec<CrashRecord>> {
        decode_record_list(&self.data)
    }
}

fn kind_tag(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::System => "s",
        ItemKind::Binary => "b",
        ItemKind::Text => "t",
    }
}

fn parse_kind_tag(tag: &str) -> WireResult<ItemKind> {
    match tag {
        "s" => Ok(ItemKind::System),
        "b" => Ok(ItemKind::Binary),
        // Older peers send attachments with their own tag.
        "t" | "a" => Ok(ItemKind::Text),
        other => Err(WireError::UnknownKind(other.to_string())),
    }
}

fn push_field(out: &mut String, field: &str) {
    out.push('(');
    out.push_str(&field.len().to_string());
    out.push(')');
    out.push_str(field);
}

/// Encode one record as `(nitems)` followed by its items.
pub fn encode_record(record: &CrashRecord) -> String {
    let mut out = format!("({})", record.len());
    for (name, item) in record.iter() {
        push_field(&mut out, name);
        push_field(&mut out, kind_tag(item.kind));
        push_field(&mut out, if item.editable { "y" } else { "n" });
        push_field(&mut out, &item.content);
    }
    out
}

/// Encode a list of records as `(nrecords)` followed by each record.
pub fn encode_record_list(records: &[CrashRecord]) -> String {
    let mut out = format!("({})", records.len());
    for record in records {
        out.push_str(&encode_record(record));
    }
    out
}

/// Decode exactly one record; trailing bytes are an error.
pub fn decode_record(buf: &[u8]) -> WireResult<CrashRecord> {
    let mut cursor = Cursor::new(buf);
    let record = cursor.read_record()?;
    cursor.finish()?;
    Ok(record)
}

/// Decode a record list; trailing bytes are an error.
pub fn decode_record_list(buf: &[u8]) -> WireResult<Vec<CrashRecord>> {
    let mut cursor = Cursor::new(buf);
    let count = cursor.read_prefix()?;
    let mut records = Vec::new();
    for _ in 0..count {
        records.push(cursor.read_record()?);
    }
    cursor.finish()?;
    Ok(records)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn expect(&mut self, byte: u8) -> WireResult<()> {
        match self.buf.get(self.pos) {
            Some(&found) if found == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(&found) => {
                Err(WireError::UnexpectedByte { offset: self.pos, expected: byte as char, found })
            }
            None => Err(WireError::UnexpectedEnd { offset: self.pos }),
        }
    }

    fn read_prefix(&mut self) -> WireResult<usize> {
        let offset = self.pos;
        self.expect(b'(')?;
        let mut value: usize = 0;
        let mut digits = 0;
        while let Some(&byte) = self.buf.get(self.pos) {
            if !byte.is_ascii_digit() {
                break;
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(usize::from(byte - b'0')))
                .ok_or(WireError::InvalidLength { offset })?;
            digits += 1;
            self.pos += 1;
        }
        if digits == 0 {
            return Err(WireError::InvalidLength { offset });
        }
        self.expect(b')')?;
        Ok(value)
    }

    fn read_field(&mut self) -> WireResult<&'a [u8]> {
        let offset = self.pos;
        let declared = self.read_prefix()?;
        let available = self.remaining();
        if declared > available {
            return Err(WireError::Truncated { offset, declared, available });
        }
        let field = self
            .buf
            .get(self.pos..self.pos + declared)
            .ok_or(WireError::Truncated { offset, declared, available })?;
        self.pos += declared;
        Ok(field)
    }

    fn read_str(&mut self) -> WireResult<&'a str> {
        let offset = self.pos;
        let field = self.read_field()?;
        std::str::from_utf8(field).map_err(|_| WireError::InvalidUtf8 { offset })
    }

    fn read_record(&mut self) -> WireResult<CrashRecord> {
        let count = self.read_prefix()?;
        let mut record = CrashRecord::new();
        for _ in 0..count {
            let name = self.read_str()?;
            let kind = parse_kind_tag(self.read_str()?)?;
            let editable = match self.read_str()? {
                "y" => true,
                "n" => false,
                other => return Err(WireError::UnknownEditable(other.to_string())),
            };
            let content = self.read_str()?;
            record.insert(name, CrashItem::new(kind, editable, content));
        }
        Ok(record)
    }

    fn finish(&self) -> WireResult<()> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(WireError::TrailingData { offset: self.pos, count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> CrashRecord {
        let mut record = CrashRecord::new();
        record.insert("executable", CrashItem::text("/usr/bin/(12)foo", false));
        record.insert("comment", CrashItem::text("", true));
        record.insert("coredump", CrashItem::binary("/var/spool/ccpp-1/coredump"));
        record.insert("_MWUID", CrashItem::system("500"));
        record
    }

    #[test]
    fn encodes_items_in_name_order() {
        let mut record = CrashRecord::new();
        record.insert("b", CrashItem::text("xy", true));
        record.insert("a", CrashItem::system("1"));
        assert_eq!(encode_record(&record), "(2)(1)a(1)s(1)n(1)1(1)b(1)t(1)y(2)xy");
    }

    #[test]
    fn frame_round_trip_with_records() {
        let frame = Frame::records(MessageKind::GetCrashInfos, &[sample(), CrashRecord::new()]);
        let bytes = frame.encode();
        assert!(bytes.starts_with(b"(GET_CRASH_INFOS)(2)"));
        assert!(bytes.ends_with(&FRAME_END));

        let decoded = Frame::decode(&bytes).expect("decode frame");
        assert_eq!(decoded.kind, MessageKind::GetCrashInfos);
        assert_eq!(decoded.decode_records().expect("records"), vec![sample(), CrashRecord::new()]);
    }

    #[test]
    fn frame_without_end_is_rejected() {
        let mut bytes = Frame::new(MessageKind::Report, "(0)").encode();
        bytes.pop();
        assert_eq!(Frame::decode(&bytes), Err(WireError::MissingEnd));
        assert_eq!(Frame::decode(b"(NOPE)(0)\x17\n"), Err(WireError::UnknownMarker));
    }

    #[test]
    fn truncated_field_is_flagged() {
        let err = decode_record(b"(1)(4)name(1)t(1)y(50)short").unwrap_err();
        assert_eq!(err, WireError::Truncated { offset: 18, declared: 50, available: 5 });
    }

    #[test]
    fn malformed_prefixes_are_flagged() {
        assert_eq!(decode_record(b"()"), Err(WireError::InvalidLength { offset: 0 }));
        assert_eq!(decode_record(b"(1"), Err(WireError::UnexpectedEnd { offset: 2 }));
        assert!(matches!(
            decode_record(b"(99999999999999999999999999)"),
            Err(WireError::InvalidLength { offset: 0 })
        ));
        assert_eq!(
            decode_record(b"(1)(1)a(1)q(1)y(0)"),
            Err(WireError::UnknownKind("q".to_string()))
        );
    }

    #[test]
    fn attachment_tag_decodes_as_text() {
        let record = decode_record(b"(1)(3)log(1)a(1)y(2)hi").expect("decode");
        assert_eq!(record.get("log"), Some(&CrashItem::text("hi", true)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode_record(&sample()).into_bytes();
        bytes.extend_from_slice(b"(1)");
        assert!(matches!(decode_record(&bytes), Err(WireError::TrailingData { count: 3, .. })));
    }

    fn item_strategy() -> impl Strategy<Value = CrashItem> {
        (
            prop_oneof![Just(ItemKind::System), Just(ItemKind::Binary), Just(ItemKind::Text)],
            any::<bool>(),
            "[()0-9a-z \\n\\x17]{0,40}|\\PC{0,20}",
        )
            .prop_map(|(kind, editable, content)| CrashItem::new(kind, editable, content))
    }

    fn record_strategy() -> impl Strategy<Value = CrashRecord> {
        proptest::collection::btree_map("[()0-9A-Za-z_]{1,12}", item_strategy(), 0..8)
            .prop_map(|items| items.into_iter().collect())
    }

    proptest::proptest! {
        #[test]
        fn prop_record_round_trip(record in record_strategy()) {
            let encoded = encode_record(&record);
            prop_assert_eq!(decode_record(encoded.as_bytes()), Ok(record));
        }

        #[test]
        fn prop_frame_round_trip(records in proptest::collection::vec(record_strategy(), 0..4)) {
            let bytes = Frame::records(MessageKind::Report, &records).encode();
            let frame = Frame::decode(&bytes).expect("frame");
            prop_assert_eq!(frame.decode_records(), Ok(records));
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_record(&bytes);
            let _ = decode_record_list(&bytes);
            let _ = Frame::decode(&bytes);
        }

        #[test]
        fn prop_truncation_is_always_an_error(record in record_strategy(), cut in 0usize..512) {
            let encoded = encode_record(&record).into_bytes();
            prop_assume!(cut < encoded.len());
            prop_assert!(decode_record(&encoded[..cut]).is_err());
        }
    }
}
