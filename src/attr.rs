// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use core::convert::TryFrom;
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::errors::MftError;
use crate::record::MftEntryInfo;
use crate::runs::{DataRun, decode_data_runs};

/// Closed set of NTFS attribute type tags. Anything else on disk means a
/// newer NTFS revision or corruption and is surfaced, never skipped.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum AttributeType {
    Unused = 0x0,
    StandardInformation = 0x10,
    AttributeList = 0x20,
    FileName = 0x30,
    ObjectId = 0x40,
    SecurityDescriptor = 0x50,
    VolumeName = 0x60,
    VolumeInformation = 0x70,
    Data = 0x80,
    IndexRoot = 0x90,
    IndexAllocation = 0xA0,
    Bitmap = 0xB0,
    ReparsePoint = 0xC0,
    ExtendedAttributeInformation = 0xD0,
    ExtendedAttribute = 0xE0,
    LoggedUtilityStream = 0x100,
    EndOfAttributes = 0xFFFF_FFFF,
}

impl TryFrom<u32> for AttributeType {
    type Error = MftError;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use AttributeType::*;
        Ok(match value {
            0x0 => Unused,
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => ExtendedAttributeInformation,
            0xE0 => ExtendedAttribute,
            0x100 => LoggedUtilityStream,
            0xFFFF_FFFF => EndOfAttributes,
            other => return Err(MftError::UnknownAttributeType(other)),
        })
    }
}

/* Attribute data flags (compression/encryption/sparseness of content). */
pub const DATA_FLAG_COMPRESSED: u16 = 0x0001;
pub const DATA_FLAG_ENCRYPTED: u16 = 0x4000;
pub const DATA_FLAG_SPARSE: u16 = 0x8000;

pub fn data_flags_to_string(flags: u16) -> String {
    let mut v = Vec::new();
    if flags & DATA_FLAG_COMPRESSED != 0 {
        v.push("Compressed");
    }
    if flags & DATA_FLAG_ENCRYPTED != 0 {
        v.push("Encrypted");
    }
    if flags & DATA_FLAG_SPARSE != 0 {
        v.push("Sparse");
    }
    if v.is_empty() {
        "None".into()
    } else {
        v.join(" | ")
    }
}

/// Shared 24-byte header every attribute starts with, embedded by
/// composition in each variant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeHeader {
    pub attribute_type: AttributeType,
    pub attribute_size: u32,
    pub is_resident: bool,
    /// UTF-16 attribute name; empty except for alternate data streams
    /// and named index attributes ($I30 etc.).
    pub name: String,
    pub content_offset: u16,
    pub content_length: u32,
    /// Disambiguates repeated attributes of the same type.
    pub attribute_number: u16,
    pub attribute_data_flags: u16,
}

/// Inline payload of a resident attribute.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResidentData {
    pub data: Vec<u8>,
}

/// Cluster-level description of a non-resident attribute.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NonResidentData {
    pub starting_vcn: u64,
    pub ending_vcn: u64,
    pub allocated_size: u64,
    pub actual_size: u64,
    pub initialized_size: u64,
    pub data_runs: Vec<DataRun>,
}

/// Payload of attributes that can be stored either way ($DATA, $BITMAP,
/// $SECURITY_DESCRIPTOR, ...).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum StreamData {
    Resident(ResidentData),
    NonResident(NonResidentData),
}

/// $STANDARD_INFORMATION content. Optional fields are length-gated:
/// pre-3.0 volumes stop after the class id.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StandardInformation {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub flags: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub update_sequence_number: Option<u64>,
}

impl StandardInformation {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MftError> {
        if raw.len() < 0x30 {
            return Err(MftError::Truncation(format!(
                "$STANDARD_INFORMATION needs 0x30 bytes, got {}",
                raw.len()
            )));
        }
        let mut c = Cursor::new(raw);
        let created = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let mft_modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let accessed = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let flags = c.read_u32::<LittleEndian>()?;
        let max_versions = c.read_u32::<LittleEndian>()?;
        let version_number = c.read_u32::<LittleEndian>()?;
        let class_id = c.read_u32::<LittleEndian>()?;
        let owner_id = (raw.len() >= 0x34)
            .then(|| c.read_u32::<LittleEndian>())
            .transpose()?;
        let security_id = (raw.len() >= 0x38)
            .then(|| c.read_u32::<LittleEndian>())
            .transpose()?;
        let quota_charged = (raw.len() >= 0x40)
            .then(|| c.read_u64::<LittleEndian>())
            .transpose()?;
        let update_sequence_number = (raw.len() >= 0x48)
            .then(|| c.read_u64::<LittleEndian>())
            .transpose()?;
        Ok(Self {
            created,
            modified,
            mft_modified,
            accessed,
            flags,
            max_versions,
            version_number,
            class_id,
            owner_id,
            security_id,
            quota_charged,
            update_sequence_number,
        })
    }
}

/// Namespace of a $FILE_NAME entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum NameType {
    Posix,
    Windows,
    Dos,
    DosWindows,
}

impl From<u8> for NameType {
    fn from(v: u8) -> Self {
        match v {
            1 => NameType::Windows,
            2 => NameType::Dos,
            3 => NameType::DosWindows,
            _ => NameType::Posix,
        }
    }
}

/// $FILE_NAME content, also embedded in index entry keys.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileInfo {
    pub parent_mft_record: MftEntryInfo,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    /// Allocated (cluster-rounded) size.
    pub physical_size: u64,
    /// Real byte size.
    pub logical_size: u64,
    pub flags: u32,
    pub reparse_value: u32,
    pub name_type: NameType,
    pub name: String,
}

impl FileInfo {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MftError> {
        if raw.len() < 66 {
            return Err(MftError::Truncation(format!(
                "$FILE_NAME needs 66 bytes, got {}",
                raw.len()
            )));
        }
        let mut c = Cursor::new(raw);
        let mut reference = [0u8; 8];
        std::io::Read::read_exact(&mut c, &mut reference)?;
        let parent_mft_record = MftEntryInfo::from_bytes(&reference);
        let created = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let mft_modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let accessed = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let physical_size = c.read_u64::<LittleEndian>()?;
        let logical_size = c.read_u64::<LittleEndian>()?;
        let flags = c.read_u32::<LittleEndian>()?;
        let reparse_value = c.read_u32::<LittleEndian>()?;
        let name_len = c.read_u8()? as usize;
        let name_type = NameType::from(c.read_u8()?);
        let name = read_utf16(raw, 66, name_len)?;
        Ok(Self {
            parent_mft_record,
            created,
            modified,
            mft_modified,
            accessed,
            physical_size,
            logical_size,
            flags,
            reparse_value,
            name_type,
            name,
        })
    }
}

/// One continuation pointer inside an $ATTRIBUTE_LIST.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeInfo {
    pub attribute_type: AttributeType,
    pub entry_length: u16,
    pub name: String,
    pub starting_vcn: u64,
    /// Record holding the continued attribute (base or extension).
    pub file_reference: MftEntryInfo,
    pub attribute_id: u16,
}

fn decode_attribute_list(raw: &[u8]) -> Result<Vec<AttributeInfo>, MftError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 0x1A <= raw.len() {
        let slice = &raw[pos..];
        let mut c = Cursor::new(slice);
        let attribute_type = AttributeType::try_from(c.read_u32::<LittleEndian>()?)?;
        let entry_length = c.read_u16::<LittleEndian>()?;
        if entry_length == 0 {
            break;
        }
        let name_length = c.read_u8()? as usize;
        let name_offset = c.read_u8()? as usize;
        let starting_vcn = c.read_u64::<LittleEndian>()?;
        let mut reference = [0u8; 8];
        std::io::Read::read_exact(&mut c, &mut reference)?;
        let file_reference = MftEntryInfo::from_bytes(&reference);
        let attribute_id = c.read_u16::<LittleEndian>()?;
        let name = if name_length > 0 {
            read_utf16(slice, name_offset, name_length)?
        } else {
            String::new()
        };
        entries.push(AttributeInfo {
            attribute_type,
            entry_length,
            name,
            starting_vcn,
            file_reference,
            attribute_id,
        });
        pos += entry_length as usize;
    }
    Ok(entries)
}

/// $OBJECT_ID content: the object GUID plus optional birth ids.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectIdInfo {
    pub object_id: String,
    pub birth_volume_id: Option<String>,
    pub birth_object_id: Option<String>,
    pub birth_domain_id: Option<String>,
}

impl ObjectIdInfo {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MftError> {
        if raw.len() < 0x10 {
            return Err(MftError::Truncation(format!(
                "$OBJECT_ID needs 16 bytes, got {}",
                raw.len()
            )));
        }
        let guid_at = |off: usize| -> Option<String> {
            (raw.len() >= off + 0x10).then(|| guid_to_string(&raw[off..off + 0x10]))
        };
        Ok(Self {
            object_id: guid_to_string(&raw[0..0x10]),
            birth_volume_id: guid_at(0x10),
            birth_object_id: guid_at(0x20),
            birth_domain_id: guid_at(0x30),
        })
    }
}

fn guid_to_string(raw: &[u8]) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
        u16::from_le_bytes([raw[4], raw[5]]),
        u16::from_le_bytes([raw[6], raw[7]]),
        raw[8],
        raw[9],
        raw[10],
        raw[11],
        raw[12],
        raw[13],
        raw[14],
        raw[15],
    )
}

/// $REPARSE_POINT content. Substitute/print names are decoded for
/// symlinks and junctions; other tags keep the raw blob.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReparsePoint {
    pub tag: u32,
    pub substitute_name: Option<String>,
    pub print_name: Option<String>,
    pub data: Vec<u8>,
}

pub const REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

impl ReparsePoint {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MftError> {
        if raw.len() < 8 {
            return Err(MftError::Truncation(format!(
                "$REPARSE_POINT needs 8 bytes, got {}",
                raw.len()
            )));
        }
        let mut c = Cursor::new(raw);
        let tag = c.read_u32::<LittleEndian>()?;
        let data_size = c.read_u16::<LittleEndian>()? as usize;
        c.read_u16::<LittleEndian>()?; // reserved
        if raw.len() < 8 + data_size {
            return Err(MftError::Truncation(format!(
                "reparse data declares {} bytes, {} remain",
                data_size,
                raw.len() - 8
            )));
        }
        let data = raw[8..8 + data_size].to_vec();

        let (substitute_name, print_name) = match tag {
            REPARSE_TAG_SYMLINK | REPARSE_TAG_MOUNT_POINT => {
                let mut d = Cursor::new(&data);
                let sub_off = d.read_u16::<LittleEndian>()? as usize;
                let sub_len = d.read_u16::<LittleEndian>()? as usize;
                let print_off = d.read_u16::<LittleEndian>()? as usize;
                let print_len = d.read_u16::<LittleEndian>()? as usize;
                // The path buffer follows the header; symlinks carry an
                // extra flags word before it.
                let path_buffer = if tag == REPARSE_TAG_SYMLINK { 12 } else { 8 };
                let sub = read_utf16(&data, path_buffer + sub_off, sub_len / 2)?;
                let print = read_utf16(&data, path_buffer + print_off, print_len / 2)?;
                (Some(sub), Some(print))
            }
            _ => (None, None),
        };

        Ok(Self {
            tag,
            substitute_name,
            print_name,
            data,
        })
    }
}

/// One entry of an index node ($INDEX_ROOT).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexEntry {
    pub mft_reference: MftEntryInfo,
    pub flags: u8,
    /// $FILE_NAME key, absent on the last-entry sentinel.
    pub file_info: Option<FileInfo>,
}

/// Decoded $INDEX_ROOT content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexRootInfo {
    pub indexed_attribute_type: u32,
    pub collation_type: u32,
    pub index_entry_size: u32,
    pub entries: Vec<IndexEntry>,
}

impl IndexRootInfo {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MftError> {
        if raw.len() < 0x20 {
            return Err(MftError::Truncation(format!(
                "$INDEX_ROOT needs 0x20 bytes, got {}",
                raw.len()
            )));
        }
        let mut c = Cursor::new(raw);
        let indexed_attribute_type = c.read_u32::<LittleEndian>()?;
        let collation_type = c.read_u32::<LittleEndian>()?;
        let index_entry_size = c.read_u32::<LittleEndian>()?;
        // clusters-per-index-block byte + 3 padding bytes, then the index
        // node header the entry offsets are relative to.
        let node_base = 0x10usize;
        let mut n = Cursor::new(&raw[node_base..]);
        let entries_offset = n.read_u32::<LittleEndian>()? as usize;
        let total_size = n.read_u32::<LittleEndian>()? as usize;

        let mut entries = Vec::new();
        let mut off = node_base + entries_offset;
        let end = (node_base + total_size).min(raw.len());
        while off + 0x10 <= end {
            let slice = &raw[off..];
            let mut e = Cursor::new(slice);
            let mut reference = [0u8; 8];
            std::io::Read::read_exact(&mut e, &mut reference)?;
            let mft_reference = MftEntryInfo::from_bytes(&reference);
            let entry_length = e.read_u16::<LittleEndian>()? as usize;
            let key_length = e.read_u16::<LittleEndian>()? as usize;
            let flags = e.read_u8()?;

            let file_info = if key_length >= 66 && slice.len() >= 0x10 + key_length {
                Some(FileInfo::from_bytes(&slice[0x10..0x10 + key_length])?)
            } else {
                None
            };
            entries.push(IndexEntry {
                mft_reference,
                flags,
                file_info,
            });
            if flags & 0x02 != 0 || entry_length == 0 {
                break; // last entry
            }
            off += entry_length;
        }
        Ok(Self {
            indexed_attribute_type,
            collation_type,
            index_entry_size,
            entries,
        })
    }
}

/// One fully decoded attribute. Closed union: dispatch is an exhaustive
/// match on the type tag, each variant embedding the shared header.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum Attribute {
    StandardInformation {
        header: AttributeHeader,
        info: StandardInformation,
    },
    AttributeList {
        header: AttributeHeader,
        data: StreamData,
        /// Parsed continuation pointers (resident lists only).
        entries: Vec<AttributeInfo>,
    },
    FileName {
        header: AttributeHeader,
        info: FileInfo,
    },
    ObjectId {
        header: AttributeHeader,
        info: ObjectIdInfo,
    },
    SecurityDescriptor {
        header: AttributeHeader,
        data: StreamData,
    },
    VolumeName {
        header: AttributeHeader,
        volume_name: String,
    },
    VolumeInformation {
        header: AttributeHeader,
        major_version: u8,
        minor_version: u8,
        volume_flags: u16,
    },
    Data {
        header: AttributeHeader,
        data: StreamData,
    },
    IndexRoot {
        header: AttributeHeader,
        index: IndexRootInfo,
    },
    IndexAllocation {
        header: AttributeHeader,
        data: NonResidentData,
    },
    Bitmap {
        header: AttributeHeader,
        data: StreamData,
    },
    ReparsePoint {
        header: AttributeHeader,
        reparse: ReparsePoint,
    },
    ExtendedAttributeInformation {
        header: AttributeHeader,
        ea_size: u16,
        need_ea_count: u16,
        unpacked_size: u32,
    },
    ExtendedAttribute {
        header: AttributeHeader,
        data: StreamData,
    },
    LoggedUtilityStream {
        header: AttributeHeader,
        data: StreamData,
    },
}

impl Attribute {
    pub fn header(&self) -> &AttributeHeader {
        use Attribute::*;
        match self {
            StandardInformation { header, .. }
            | AttributeList { header, .. }
            | FileName { header, .. }
            | ObjectId { header, .. }
            | SecurityDescriptor { header, .. }
            | VolumeName { header, .. }
            | VolumeInformation { header, .. }
            | Data { header, .. }
            | IndexRoot { header, .. }
            | IndexAllocation { header, .. }
            | Bitmap { header, .. }
            | ReparsePoint { header, .. }
            | ExtendedAttributeInformation { header, .. }
            | ExtendedAttribute { header, .. }
            | LoggedUtilityStream { header, .. } => header,
        }
    }
}

/// Non-resident headers put the mapping pairs at this fixed offset.
const NON_RESIDENT_RUNS_OFFSET: usize = 0x40;

/// Decode one attribute from its exact byte slice.
///
/// Returns `Ok(None)` only for the one recoverable case: a reparse point
/// whose content fails to decode is logged and omitted so the rest of the
/// attribute stream survives.
pub fn decode_attribute(raw: &[u8]) -> Result<Option<Attribute>, MftError> {
    if raw.len() < 0x18 {
        return Err(MftError::Truncation(format!(
            "attribute header needs 0x18 bytes, got {}",
            raw.len()
        )));
    }
    let mut c = Cursor::new(raw);
    let type_tag = c.read_u32::<LittleEndian>()?;
    let attribute_type = AttributeType::try_from(type_tag)?;
    let attribute_size = c.read_u32::<LittleEndian>()?;
    let is_resident = c.read_u8()? == 0;
    let name_length = c.read_u8()? as usize;
    let name_offset = c.read_u16::<LittleEndian>()? as usize;
    let attribute_data_flags = c.read_u16::<LittleEndian>()?;
    let attribute_number = c.read_u16::<LittleEndian>()?;

    let name = if name_length > 0 {
        read_utf16(raw, name_offset, name_length)?
    } else {
        String::new()
    };

    let (header, payload) = if is_resident {
        let content_length = c.read_u32::<LittleEndian>()?;
        let content_offset = c.read_u16::<LittleEndian>()?;
        let start = content_offset as usize;
        let end = start + content_length as usize;
        if end > raw.len() {
            return Err(MftError::Truncation(format!(
                "resident content {}..{} outside attribute of {} bytes",
                start,
                end,
                raw.len()
            )));
        }
        (
            AttributeHeader {
                attribute_type,
                attribute_size,
                is_resident,
                name,
                content_offset,
                content_length,
                attribute_number,
                attribute_data_flags,
            },
            StreamData::Resident(ResidentData {
                data: raw[start..end].to_vec(),
            }),
        )
    } else {
        if raw.len() < NON_RESIDENT_RUNS_OFFSET {
            return Err(MftError::Truncation(format!(
                "non-resident header needs 0x40 bytes, got {}",
                raw.len()
            )));
        }
        let starting_vcn = c.read_u64::<LittleEndian>()?;
        let ending_vcn = c.read_u64::<LittleEndian>()?;
        let mapping_pairs_offset = c.read_u16::<LittleEndian>()?;
        let _compression_unit = c.read_u16::<LittleEndian>()?;
        c.read_u32::<LittleEndian>()?; // padding
        let allocated_size = c.read_u64::<LittleEndian>()?;
        let actual_size = c.read_u64::<LittleEndian>()?;
        let initialized_size = c.read_u64::<LittleEndian>()?;
        let data_runs = decode_data_runs(&raw[NON_RESIDENT_RUNS_OFFSET..])?;
        (
            AttributeHeader {
                attribute_type,
                attribute_size,
                is_resident,
                name,
                content_offset: mapping_pairs_offset,
                content_length: 0,
                attribute_number,
                attribute_data_flags,
            },
            StreamData::NonResident(NonResidentData {
                starting_vcn,
                ending_vcn,
                allocated_size,
                actual_size,
                initialized_size,
                data_runs,
            }),
        )
    };

    let attr = match attribute_type {
        AttributeType::StandardInformation => Attribute::StandardInformation {
            info: StandardInformation::from_bytes(resident_content(&payload, attribute_type)?)?,
            header,
        },
        AttributeType::AttributeList => {
            let entries = match &payload {
                StreamData::Resident(res) => decode_attribute_list(&res.data)?,
                // Non-resident lists need cluster reads; collaborators
                // chase the runs.
                StreamData::NonResident(_) => Vec::new(),
            };
            Attribute::AttributeList {
                header,
                data: payload,
                entries,
            }
        }
        AttributeType::FileName => Attribute::FileName {
            info: FileInfo::from_bytes(resident_content(&payload, attribute_type)?)?,
            header,
        },
        AttributeType::ObjectId => Attribute::ObjectId {
            info: ObjectIdInfo::from_bytes(resident_content(&payload, attribute_type)?)?,
            header,
        },
        AttributeType::SecurityDescriptor => Attribute::SecurityDescriptor {
            header,
            data: payload,
        },
        AttributeType::VolumeName => Attribute::VolumeName {
            volume_name: {
                let content = resident_content(&payload, attribute_type)?;
                read_utf16(content, 0, content.len() / 2)?
            },
            header,
        },
        AttributeType::VolumeInformation => {
            let content = resident_content(&payload, attribute_type)?;
            if content.len() < 0x0C {
                return Err(MftError::Truncation(format!(
                    "$VOLUME_INFORMATION needs 12 bytes, got {}",
                    content.len()
                )));
            }
            Attribute::VolumeInformation {
                major_version: content[8],
                minor_version: content[9],
                volume_flags: u16::from_le_bytes([content[10], content[11]]),
                header,
            }
        }
        AttributeType::Data => Attribute::Data {
            header,
            data: payload,
        },
        AttributeType::IndexRoot => Attribute::IndexRoot {
            index: IndexRootInfo::from_bytes(resident_content(&payload, attribute_type)?)?,
            header,
        },
        AttributeType::IndexAllocation => match payload {
            StreamData::NonResident(data) => Attribute::IndexAllocation { header, data },
            StreamData::Resident(_) => {
                return Err(MftError::Truncation(
                    "$INDEX_ALLOCATION is only ever non-resident".into(),
                ));
            }
        },
        AttributeType::Bitmap => Attribute::Bitmap {
            header,
            data: payload,
        },
        AttributeType::ReparsePoint => {
            let content = resident_content(&payload, attribute_type)?;
            match ReparsePoint::from_bytes(content) {
                Ok(reparse) => Attribute::ReparsePoint { header, reparse },
                Err(e) => {
                    // Recoverable: drop this attribute, keep the stream.
                    warn!("skipping undecodable reparse point: {}", e);
                    return Ok(None);
                }
            }
        }
        AttributeType::ExtendedAttributeInformation => {
            let content = resident_content(&payload, attribute_type)?;
            if content.len() < 8 {
                return Err(MftError::Truncation(format!(
                    "$EA_INFORMATION needs 8 bytes, got {}",
                    content.len()
                )));
            }
            Attribute::ExtendedAttributeInformation {
                ea_size: u16::from_le_bytes([content[0], content[1]]),
                need_ea_count: u16::from_le_bytes([content[2], content[3]]),
                unpacked_size: u32::from_le_bytes([content[4], content[5], content[6], content[7]]),
                header,
            }
        }
        AttributeType::ExtendedAttribute => Attribute::ExtendedAttribute {
            header,
            data: payload,
        },
        AttributeType::LoggedUtilityStream => Attribute::LoggedUtilityStream {
            header,
            data: payload,
        },
        // Neither is a constructible attribute; the record decoder stops
        // on the end marker before dispatching here.
        AttributeType::Unused | AttributeType::EndOfAttributes => {
            return Err(MftError::UnknownAttributeType(type_tag));
        }
    };
    Ok(Some(attr))
}

fn resident_content<'a>(
    payload: &'a StreamData,
    attribute_type: AttributeType,
) -> Result<&'a [u8], MftError> {
    match payload {
        StreamData::Resident(res) => Ok(&res.data),
        StreamData::NonResident(_) => Err(MftError::Truncation(format!(
            "{:?} attribute stored non-resident, content unavailable in record",
            attribute_type
        ))),
    }
}

fn read_utf16(raw: &[u8], byte_offset: usize, units: usize) -> Result<String, MftError> {
    let end = byte_offset + units * 2;
    if end > raw.len() {
        return Err(MftError::Truncation(format!(
            "UTF-16 string {}..{} outside buffer of {} bytes",
            byte_offset,
            end,
            raw.len()
        )));
    }
    let code_units: Vec<u16> = raw[byte_offset..end]
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&code_units))
}

/// Convert a Windows FILETIME (100ns ticks since 1601) to UTC.
pub(crate) fn filetime_to_datetime(ft: u64) -> DateTime<Utc> {
    const DELTA_MICROS: i64 = 11_644_473_600_000_000;
    let unix_micros = (ft / 10) as i64 - DELTA_MICROS;
    let secs = unix_micros.div_euclid(1_000_000);
    let nanos = unix_micros.rem_euclid(1_000_000) * 1_000;
    Utc.timestamp_opt(secs, nanos as u32)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn utf16_bytes(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn file_name_content(parent: u32, parent_seq: u16, name: &str) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&parent.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes()); // high 16 bits
        v.extend_from_slice(&parent_seq.to_le_bytes());
        v.extend_from_slice(&[0u8; 32]); // four timestamps
        v.extend_from_slice(&4096u64.to_le_bytes()); // physical
        v.extend_from_slice(&1234u64.to_le_bytes()); // logical
        v.extend_from_slice(&0u32.to_le_bytes()); // flags
        v.extend_from_slice(&0u32.to_le_bytes()); // reparse value
        v.push(name.encode_utf16().count() as u8);
        v.push(1); // Win32 namespace
        v.extend_from_slice(&utf16_bytes(name));
        v
    }

    pub(crate) fn resident_attribute(type_tag: u32, content: &[u8]) -> Vec<u8> {
        let content_offset = 0x18u16;
        let size = (content_offset as usize + content.len() + 7) & !7;
        let mut v = Vec::new();
        v.extend_from_slice(&type_tag.to_le_bytes());
        v.extend_from_slice(&(size as u32).to_le_bytes());
        v.push(0); // resident
        v.push(0); // no name
        v.extend_from_slice(&0u16.to_le_bytes()); // name offset
        v.extend_from_slice(&0u16.to_le_bytes()); // data flags
        v.extend_from_slice(&0u16.to_le_bytes()); // attribute number
        v.extend_from_slice(&(content.len() as u32).to_le_bytes());
        v.extend_from_slice(&content_offset.to_le_bytes());
        v.extend_from_slice(&[0u8; 2]); // indexed flag + padding
        v.extend_from_slice(content);
        v.resize(size, 0);
        v
    }

    #[test]
    fn decodes_file_name_attribute() {
        let raw = resident_attribute(0x30, &file_name_content(5, 5, "notes.txt"));
        let attr = decode_attribute(&raw).unwrap().unwrap();
        let Attribute::FileName { header, info } = attr else {
            panic!("expected a FileName variant");
        };
        assert!(header.is_resident);
        assert_eq!(header.attribute_type, AttributeType::FileName);
        assert_eq!(info.name, "notes.txt");
        assert_eq!(info.name_type, NameType::Windows);
        assert_eq!(info.parent_mft_record.entry_number, 5);
        assert_eq!(info.parent_mft_record.sequence_number, 5);
        assert_eq!(info.logical_size, 1234);
    }

    #[test]
    fn decodes_standard_information() {
        let mut content = vec![0u8; 0x30];
        // accessed = 2020-01-01 00:00:00 UTC in FILETIME ticks
        let ft: u64 = 132_223_104_000_000_000;
        content[0x18..0x20].copy_from_slice(&ft.to_le_bytes());
        content[0x20..0x24].copy_from_slice(&0x0006u32.to_le_bytes()); // hidden|system
        let raw = resident_attribute(0x10, &content);
        let attr = decode_attribute(&raw).unwrap().unwrap();
        let Attribute::StandardInformation { info, .. } = attr else {
            panic!("expected StandardInformation");
        };
        assert_eq!(info.flags, 0x0006);
        assert_eq!(info.accessed.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert!(info.owner_id.is_none());
    }

    #[test]
    fn decodes_non_resident_data_with_runs() {
        let mut v = Vec::new();
        v.extend_from_slice(&0x80u32.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes()); // size patched below
        v.push(1); // non-resident
        v.push(0);
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&0u64.to_le_bytes()); // starting vcn
        v.extend_from_slice(&15u64.to_le_bytes()); // ending vcn
        v.extend_from_slice(&0x40u16.to_le_bytes()); // mapping pairs offset
        v.extend_from_slice(&0u16.to_le_bytes()); // compression unit
        v.extend_from_slice(&0u32.to_le_bytes()); // padding
        v.extend_from_slice(&65536u64.to_le_bytes()); // allocated
        v.extend_from_slice(&60000u64.to_le_bytes()); // actual
        v.extend_from_slice(&60000u64.to_le_bytes()); // initialized
        v.extend_from_slice(&[0x21, 0x10, 0x00, 0x10, 0x00]); // 16 clusters @ +0x1000
        v.resize((v.len() + 7) & !7, 0);
        let size = v.len() as u32;
        v[4..8].copy_from_slice(&size.to_le_bytes());

        let attr = decode_attribute(&v).unwrap().unwrap();
        let Attribute::Data { header, data } = attr else {
            panic!("expected Data");
        };
        assert!(!header.is_resident);
        let StreamData::NonResident(nr) = data else {
            panic!("expected non-resident payload");
        };
        assert_eq!(nr.actual_size, 60000);
        assert_eq!(nr.ending_vcn, 15);
        assert_eq!(
            nr.data_runs,
            vec![DataRun {
                cluster_count: 16,
                cluster_offset: 0x1000
            }]
        );
    }

    #[test]
    fn unknown_type_tag_is_a_hard_error() {
        let raw = resident_attribute(0x123, &[0u8; 8]);
        assert_eq!(
            decode_attribute(&raw).unwrap_err(),
            MftError::UnknownAttributeType(0x123)
        );
    }

    #[test]
    fn broken_reparse_point_is_omitted_not_fatal() {
        // Declares 200 bytes of reparse data but carries none.
        let mut content = Vec::new();
        content.extend_from_slice(&REPARSE_TAG_SYMLINK.to_le_bytes());
        content.extend_from_slice(&200u16.to_le_bytes());
        content.extend_from_slice(&0u16.to_le_bytes());
        let raw = resident_attribute(0xC0, &content);
        assert!(decode_attribute(&raw).unwrap().is_none());
    }

    #[test]
    fn decodes_resident_attribute_list() {
        let mut entry = Vec::new();
        entry.extend_from_slice(&0x80u32.to_le_bytes()); // $DATA continued
        entry.extend_from_slice(&0x20u16.to_le_bytes()); // entry length
        entry.push(0); // name length
        entry.push(0x1A); // name offset
        entry.extend_from_slice(&0u64.to_le_bytes()); // starting vcn
        entry.extend_from_slice(&42u32.to_le_bytes()); // extension record
        entry.extend_from_slice(&0u16.to_le_bytes());
        entry.extend_from_slice(&3u16.to_le_bytes()); // sequence
        entry.extend_from_slice(&7u16.to_le_bytes()); // attribute id
        entry.resize(0x20, 0);
        let raw = resident_attribute(0x20, &entry);
        let attr = decode_attribute(&raw).unwrap().unwrap();
        let Attribute::AttributeList { entries, .. } = attr else {
            panic!("expected AttributeList");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attribute_type, AttributeType::Data);
        assert_eq!(entries[0].file_reference.entry_number, 42);
        assert_eq!(entries[0].file_reference.sequence_number, 3);
        assert_eq!(entries[0].attribute_id, 7);
    }

    #[test]
    fn volume_name_round_trip() {
        let raw = resident_attribute(0x60, &utf16_bytes("EVIDENCE"));
        let attr = decode_attribute(&raw).unwrap().unwrap();
        let Attribute::VolumeName { volume_name, .. } = attr else {
            panic!("expected VolumeName");
        };
        assert_eq!(volume_name, "EVIDENCE");
    }
}
