// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::attr::{Attribute, FileInfo, NameType, StandardInformation, decode_attribute};
use crate::errors::MftError;
use crate::fixup::apply_fixups;

/* FILE record entry flags. */
pub const ENTRY_FLAG_IN_USE: u16 = 0x0001;
pub const ENTRY_FLAG_DIRECTORY: u16 = 0x0002;
pub const ENTRY_FLAG_METADATA: u16 = 0x0004;
pub const ENTRY_FLAG_INDEX_VIEW: u16 = 0x0008;

/// A 48-bit MFT file reference: slot index plus reuse generation.
/// A zero sequence number leaves the generation unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct MftEntryInfo {
    pub entry_number: u64,
    pub sequence_number: u16,
}

impl MftEntryInfo {
    /// Decode the on-disk 8-byte reference: 32-bit low entry field,
    /// 16-bit high field scaled by 2^24, 16-bit sequence number.
    pub fn from_bytes(raw: &[u8; 8]) -> Self {
        let low = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64;
        let high = u16::from_le_bytes([raw[4], raw[5]]) as u64;
        let sequence_number = u16::from_le_bytes([raw[6], raw[7]]);
        MftEntryInfo {
            entry_number: low + (high << 24),
            sequence_number,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.entry_number == 0 && self.sequence_number == 0
    }

    /// Lookup key shared with `FileRecord::key`.
    pub fn key(&self) -> String {
        format!("{:08X}-{:08X}", self.entry_number, self.sequence_number)
    }
}

/// Terminal classification of one 1024-byte MFT slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RecordState {
    /// FILE signature, in-use flag set.
    Live,
    /// FILE signature, in-use flag clear (deallocated entry).
    Free,
    /// BAAD signature: sector write failure caught by the OS.
    Bad,
    /// No recognizable signature (never written, or wiped).
    Uninitialized,
}

/// One decoded MFT slot: header fields plus the ordered attribute set.
/// Immutable once constructed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecord {
    /// Byte offset of the slot in the source buffer.
    pub offset: usize,
    pub entry_number: u64,
    pub sequence_number: u16,
    pub entry_flags: u16,
    pub log_sequence_number: u64,
    /// Non-zero when this slot only continues another record's
    /// attribute list.
    pub base_record_reference: MftEntryInfo,
    pub reference_count: u16,
    pub fixup_ok: bool,
    pub state: RecordState,
    /// True when the attribute stream did not end exactly on the
    /// terminator at the declared record size.
    pub has_slack: bool,
    pub attributes: Vec<Attribute>,
    /// Contained decode failures; a non-empty list marks the record as
    /// partially decoded.
    #[serde(skip)]
    pub decode_errors: Vec<MftError>,
}

impl FileRecord {
    fn empty(state: RecordState, offset: usize) -> Self {
        FileRecord {
            offset,
            entry_number: 0,
            sequence_number: 0,
            entry_flags: 0,
            log_sequence_number: 0,
            base_record_reference: MftEntryInfo {
                entry_number: 0,
                sequence_number: 0,
            },
            reference_count: 0,
            fixup_ok: false,
            state,
            has_slack: false,
            attributes: Vec::new(),
            decode_errors: Vec::new(),
        }
    }

    /// Decode one slot. Never fails: signature problems classify the
    /// record, field/attribute problems are contained in
    /// `decode_errors`.
    pub fn from_bytes(raw: &[u8], offset: usize) -> FileRecord {
        if raw.len() < 4 {
            return FileRecord::empty(RecordState::Uninitialized, offset);
        }
        match &raw[0..4] {
            b"BAAD" => {
                warn!("BAAD record at offset {:#x}", offset);
                FileRecord::empty(RecordState::Bad, offset)
            }
            b"FILE" => FileRecord::decode_file(raw, offset),
            _ => FileRecord::empty(RecordState::Uninitialized, offset),
        }
    }

    fn decode_file(raw: &[u8], offset: usize) -> FileRecord {
        let mut record = FileRecord::empty(RecordState::Uninitialized, offset);
        if raw.len() < 0x30 {
            record
                .decode_errors
                .push(MftError::Truncation(format!(
                    "FILE record header needs 0x30 bytes, got {}",
                    raw.len()
                )));
            return record;
        }

        // Mutable copy: the update sequence bytes are patched in place
        // before any field past the first sector boundary is read.
        let mut buf = raw.to_vec();
        let fixup_offset = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let fixup_count = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        let outcome = apply_fixups(&mut buf, fixup_offset, fixup_count);
        record.fixup_ok = outcome.ok;
        for boundary in outcome.mismatches {
            record
                .decode_errors
                .push(MftError::FixupMismatch { offset: boundary });
        }

        let mut c = Cursor::new(&buf);
        // Field reads below cannot fail: the 0x30-byte header was length
        // checked above, so errors only surface for the attribute stream.
        let _ = c.seek(SeekFrom::Start(8));
        let header = (|| -> Result<_, MftError> {
            let log_sequence_number = c.read_u64::<LittleEndian>()?;
            let sequence_number = c.read_u16::<LittleEndian>()?;
            let reference_count = c.read_u16::<LittleEndian>()?;
            let first_attribute_offset = c.read_u16::<LittleEndian>()?;
            let entry_flags = c.read_u16::<LittleEndian>()?;
            let actual_record_size = c.read_u32::<LittleEndian>()?;
            let _allocated_record_size = c.read_u32::<LittleEndian>()?;
            let mut reference = [0u8; 8];
            c.read_exact(&mut reference)?;
            let base_record_reference = MftEntryInfo::from_bytes(&reference);
            let _next_attribute_id = c.read_u16::<LittleEndian>()?;
            let _ = c.seek(SeekFrom::Start(0x2C));
            let entry_number = c.read_u32::<LittleEndian>()? as u64;
            Ok((
                log_sequence_number,
                sequence_number,
                reference_count,
                first_attribute_offset,
                entry_flags,
                actual_record_size,
                base_record_reference,
                entry_number,
            ))
        })();
        let (
            log_sequence_number,
            sequence_number,
            reference_count,
            first_attribute_offset,
            entry_flags,
            actual_record_size,
            base_record_reference,
            entry_number,
        ) = match header {
            Ok(h) => h,
            Err(e) => {
                record.decode_errors.push(e);
                return record;
            }
        };

        record.log_sequence_number = log_sequence_number;
        record.sequence_number = sequence_number;
        record.reference_count = reference_count;
        record.entry_flags = entry_flags;
        record.base_record_reference = base_record_reference;
        record.entry_number = entry_number;
        record.state = if entry_flags & ENTRY_FLAG_IN_USE != 0 {
            RecordState::Live
        } else {
            RecordState::Free
        };

        // Walk the attribute stream: (type, size) pairs until the end
        // marker. Everything after the terminator is record slack.
        let mut cursor = first_attribute_offset as usize;
        let mut saw_terminator = false;
        while cursor + 8 <= buf.len() {
            let type_tag = u32::from_le_bytes([
                buf[cursor],
                buf[cursor + 1],
                buf[cursor + 2],
                buf[cursor + 3],
            ]);
            if type_tag == 0xFFFF_FFFF {
                saw_terminator = true;
                break;
            }
            let size = u32::from_le_bytes([
                buf[cursor + 4],
                buf[cursor + 5],
                buf[cursor + 6],
                buf[cursor + 7],
            ]) as usize;
            if size == 0 {
                break;
            }
            if cursor + size > buf.len() {
                warn!(
                    "entry {}: attribute at {:#x} declares {} bytes, only {} remain",
                    entry_number,
                    cursor,
                    size,
                    buf.len() - cursor
                );
                record.decode_errors.push(MftError::Truncation(format!(
                    "attribute at {:#x} declares {} bytes, {} remain",
                    cursor,
                    size,
                    buf.len() - cursor
                )));
                break;
            }
            match decode_attribute(&buf[cursor..cursor + size]) {
                Ok(Some(attribute)) => record.attributes.push(attribute),
                Ok(None) => {} // recoverable skip, already logged
                Err(e) => {
                    warn!("entry {}: dropping attribute at {:#x}: {}", entry_number, cursor, e);
                    record.decode_errors.push(e);
                }
            }
            cursor += size;
        }

        record.has_slack = !(saw_terminator && cursor + 8 == actual_record_size as usize);
        if record.has_slack {
            debug!(
                "entry {}: attribute stream ends at {:#x}, record size {:#x} (slack)",
                entry_number, cursor, actual_record_size
            );
        }

        record
    }

    /// Key shared by the live/free tables. Free records key with the
    /// previous generation so stale parent references still resolve.
    pub fn key(&self) -> String {
        let sequence = match self.state {
            RecordState::Free => self.sequence_number.saturating_sub(1),
            _ => self.sequence_number,
        };
        format!("{:08X}-{:08X}", self.entry_number, sequence)
    }

    pub fn is_directory(&self) -> bool {
        self.entry_flags & ENTRY_FLAG_DIRECTORY != 0
    }

    /// True when this slot only continues another record via its
    /// attribute list and must not be resolved as an entry of its own.
    pub fn is_extension_record(&self) -> bool {
        !self.base_record_reference.is_zero()
            && self.base_record_reference.entry_number != self.entry_number
    }

    /// Every $FILE_NAME on the record (hard links, DOS/Win32 doubles).
    pub fn file_names(&self) -> Vec<&FileInfo> {
        self.attributes
            .iter()
            .filter_map(|a| {
                if let Attribute::FileName { info, .. } = a {
                    Some(info)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Preferred display name: first non-DOS name, else whatever exists.
    pub fn primary_name(&self) -> Option<String> {
        let names = self.file_names();
        names
            .iter()
            .find(|f| f.name_type != NameType::Dos)
            .or_else(|| names.first())
            .map(|f| f.name.clone())
    }

    pub fn standard_information(&self) -> Option<&StandardInformation> {
        self.attributes.iter().find_map(|a| {
            if let Attribute::StandardInformation { info, .. } = a {
                Some(info)
            } else {
                None
            }
        })
    }

    /// Convert the record to a human-readable table string.
    pub fn to_string(&self) -> String {
        let mut out = String::new();

        let mut hdr = Table::new();
        hdr.add_row(row!["MFT Entry Header Values"]);
        hdr.add_row(row![b -> "Entry", format!("{} (key {})", self.entry_number, self.key())]);
        hdr.add_row(row![b -> "Sequence", self.sequence_number]);
        hdr.add_row(row![b -> "$LogFile Sequence Number", self.log_sequence_number]);
        hdr.add_row(row![b -> "State", format!("{:?}", self.state)]);
        hdr.add_row(row![b -> "Flags", record_flags_to_string(self.entry_flags)]);
        hdr.add_row(row![b -> "Links", self.reference_count]);
        hdr.add_row(row![b -> "Fixups", if self.fixup_ok { "OK" } else { "MISMATCH" }]);
        if self.is_extension_record() {
            hdr.add_row(row![b -> "Base Record", self.base_record_reference.key()]);
        }
        out.push_str(&hdr.to_string());

        let mut attrs = Table::new();
        attrs.add_row(row!["Attribute", "Name", "Status", "#"]);
        for a in &self.attributes {
            let h = a.header();
            attrs.add_row(row![
                format!("{:?} (0x{:X})", h.attribute_type, h.attribute_type as u32),
                if h.name.is_empty() { "N/A" } else { h.name.as_str() },
                if h.is_resident { "Resident" } else { "Non-resident" },
                h.attribute_number
            ]);
        }
        out.push('\n');
        out.push_str(&attrs.to_string());

        if let Some(std) = self.standard_information() {
            let mut t = Table::new();
            t.add_row(row!["$STANDARD_INFORMATION"]);
            t.add_row(row![b -> "Created", std.created.to_rfc3339()]);
            t.add_row(row![b -> "File Modified", std.modified.to_rfc3339()]);
            t.add_row(row![b -> "MFT Modified", std.mft_modified.to_rfc3339()]);
            t.add_row(row![b -> "Accessed", std.accessed.to_rfc3339()]);
            t.add_row(row![b -> "Flags", si_flags_to_string(std.flags)]);
            out.push('\n');
            out.push_str(&t.to_string());
        }

        let names = self.file_names();
        if !names.is_empty() {
            let mut t = Table::new();
            t.add_row(row!["$FILE_NAME Attributes"]);
            for fname in names {
                t.add_row(row![b -> "Name", format!("{} ({:?})", fname.name, fname.name_type)]);
                t.add_row(row![b -> "Parent MFT", fname.parent_mft_record.key()]);
                t.add_row(row![b -> "Allocated", fname.physical_size]);
                t.add_row(row![b -> "Actual", fname.logical_size]);
                t.add_row(row![b -> "Created", fname.created.to_rfc3339()]);
                t.add_row(row![b -> "Modified", fname.modified.to_rfc3339()]);
                t.add_row(row!["", ""]);
            }
            out.push('\n');
            out.push_str(&t.to_string());
        }

        if !self.decode_errors.is_empty() {
            let mut t = Table::new();
            t.add_row(row!["Decode Warnings"]);
            for e in &self.decode_errors {
                t.add_row(row![e.to_string()]);
            }
            out.push('\n');
            out.push_str(&t.to_string());
        }

        out
    }

    /// Serialize to JSON (uses `serde`).
    pub fn to_json(&self) -> Value {
        json!({
            "key": self.key(),
            "state": self.state,
            "flags": record_flags_to_string(self.entry_flags),
            "record": self,
            "partial": !self.decode_errors.is_empty(),
        })
    }
}

/// Decode MFT record entry flags.
pub fn record_flags_to_string(flags: u16) -> String {
    let mut v = Vec::new();
    if flags & ENTRY_FLAG_IN_USE != 0 {
        v.push("InUse");
    }
    if flags & ENTRY_FLAG_DIRECTORY != 0 {
        v.push("Directory");
    }
    if flags & ENTRY_FLAG_METADATA != 0 {
        v.push("Metadata");
    }
    if flags & ENTRY_FLAG_INDEX_VIEW != 0 {
        v.push("IndexView");
    }
    if v.is_empty() {
        "None".into()
    } else {
        v.join(" | ")
    }
}

/// Decode FILE attribute flags inside $STANDARD_INFORMATION.
pub fn si_flags_to_string(flags: u32) -> String {
    let mut v = Vec::new();
    if flags & 0x0001 != 0 {
        v.push("READONLY");
    }
    if flags & 0x0002 != 0 {
        v.push("HIDDEN");
    }
    if flags & 0x0004 != 0 {
        v.push("SYSTEM");
    }
    if flags & 0x0020 != 0 {
        v.push("ARCHIVE");
    }
    if flags & 0x0200 != 0 {
        v.push("SPARSE_FILE");
    }
    if flags & 0x0400 != 0 {
        v.push("REPARSE_POINT");
    }
    if flags & 0x0800 != 0 {
        v.push("COMPRESSED");
    }
    if flags & 0x4000 != 0 {
        v.push("ENCRYPTED");
    }
    if flags & 0x10000000 != 0 {
        v.push("DIRECTORY");
    }
    if flags & 0x20000000 != 0 {
        v.push("INDEX_VIEW");
    }
    if v.is_empty() {
        "None".to_string()
    } else {
        v.join(" | ")
    }
}
