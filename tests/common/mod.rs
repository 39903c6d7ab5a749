//! Synthetic MFT buffers for integration tests: hand-assembled FILE
//! records with valid update sequence arrays, built the way they appear
//! on disk.
#![allow(dead_code)] // each test binary uses a subset of the helpers

pub const RECORD_SIZE: usize = 1024;

pub fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// On-disk 8-byte file reference (entries below 2^24 keep the high
/// field zero).
pub fn mft_ref(entry: u32, seq: u16) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw[0..4].copy_from_slice(&entry.to_le_bytes());
    raw[6..8].copy_from_slice(&seq.to_le_bytes());
    raw
}

/// Wrap `content` in a resident attribute of the given type tag.
pub fn resident_attribute(type_tag: u32, content: &[u8]) -> Vec<u8> {
    let content_offset = 0x18u16;
    let size = (content_offset as usize + content.len() + 7) & !7;
    let mut v = Vec::new();
    v.extend_from_slice(&type_tag.to_le_bytes());
    v.extend_from_slice(&(size as u32).to_le_bytes());
    v.push(0); // resident
    v.push(0); // unnamed
    v.extend_from_slice(&0u16.to_le_bytes()); // name offset
    v.extend_from_slice(&0u16.to_le_bytes()); // data flags
    v.extend_from_slice(&0u16.to_le_bytes()); // attribute number
    v.extend_from_slice(&(content.len() as u32).to_le_bytes());
    v.extend_from_slice(&content_offset.to_le_bytes());
    v.extend_from_slice(&[0u8; 2]);
    v.extend_from_slice(content);
    v.resize(size, 0);
    v
}

/// $STANDARD_INFORMATION with zeroed timestamps and the given DOS flags.
pub fn standard_information_attr(flags: u32) -> Vec<u8> {
    let mut content = vec![0u8; 0x30];
    content[0x20..0x24].copy_from_slice(&flags.to_le_bytes());
    resident_attribute(0x10, &content)
}

/// $FILE_NAME pointing at `(parent_entry, parent_seq)`.
pub fn file_name_attr(parent_entry: u32, parent_seq: u16, name: &str) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(&mft_ref(parent_entry, parent_seq));
    content.extend_from_slice(&[0u8; 32]); // four timestamps
    content.extend_from_slice(&4096u64.to_le_bytes()); // allocated
    content.extend_from_slice(&100u64.to_le_bytes()); // real
    content.extend_from_slice(&0u32.to_le_bytes()); // flags
    content.extend_from_slice(&0u32.to_le_bytes()); // reparse value
    content.push(name.encode_utf16().count() as u8);
    content.push(1); // Win32 namespace
    content.extend_from_slice(&utf16_bytes(name));
    resident_attribute(0x30, &content)
}

/// Unnamed resident $DATA.
pub fn data_attr(payload: &[u8]) -> Vec<u8> {
    resident_attribute(0x80, payload)
}

/// Assemble a 1024-byte FILE record with a valid update sequence array.
pub fn file_record(entry: u32, seq: u16, flags: u16, attributes: &[Vec<u8>]) -> Vec<u8> {
    file_record_with_base(entry, seq, flags, [0u8; 8], attributes)
}

pub fn file_record_with_base(
    entry: u32,
    seq: u16,
    flags: u16,
    base_reference: [u8; 8],
    attributes: &[Vec<u8>],
) -> Vec<u8> {
    let mut raw = vec![0u8; RECORD_SIZE];
    raw[0..4].copy_from_slice(b"FILE");
    raw[4..6].copy_from_slice(&0x30u16.to_le_bytes()); // usa offset
    raw[6..8].copy_from_slice(&3u16.to_le_bytes()); // usa count (2 sectors)
    raw[8..16].copy_from_slice(&0x1000u64.to_le_bytes()); // lsn
    raw[0x10..0x12].copy_from_slice(&seq.to_le_bytes());
    raw[0x12..0x14].copy_from_slice(&1u16.to_le_bytes()); // link count
    raw[0x14..0x16].copy_from_slice(&0x38u16.to_le_bytes()); // first attribute
    raw[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
    raw[0x1C..0x20].copy_from_slice(&(RECORD_SIZE as u32).to_le_bytes());
    raw[0x20..0x28].copy_from_slice(&base_reference);
    raw[0x28..0x2A].copy_from_slice(&1u16.to_le_bytes()); // next attribute id
    raw[0x2C..0x30].copy_from_slice(&entry.to_le_bytes());

    let mut cursor = 0x38;
    for attribute in attributes {
        raw[cursor..cursor + attribute.len()].copy_from_slice(attribute);
        cursor += attribute.len();
    }
    raw[cursor..cursor + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    // terminator size stays zero; record size lands just past it
    let in_use = (cursor + 8) as u32;
    raw[0x18..0x1C].copy_from_slice(&in_use.to_le_bytes());

    // Move the live sector-boundary bytes into the update sequence array
    // and stamp the sentinel over them, exactly as the OS writes records.
    let sentinel = [0x21u8, 0x43];
    raw[0x30] = sentinel[0];
    raw[0x31] = sentinel[1];
    for sector in 1..=2usize {
        let boundary = sector * 512 - 2;
        let slot = 0x30 + 2 * sector;
        raw[slot] = raw[boundary];
        raw[slot + 1] = raw[boundary + 1];
        raw[boundary] = sentinel[0];
        raw[boundary + 1] = sentinel[1];
    }
    raw
}

/// Root directory record (entry 5): its $FILE_NAME points at itself.
pub fn root_record(seq: u16) -> Vec<u8> {
    file_record(
        5,
        seq,
        0x0003, // in use + directory
        &[
            standard_information_attr(0x0006),
            file_name_attr(5, seq, "."),
        ],
    )
}

/// Concatenate records into a full $MFT buffer.
pub fn mft_buffer(records: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        assert_eq!(record.len(), RECORD_SIZE);
        buf.extend_from_slice(record);
    }
    buf
}
