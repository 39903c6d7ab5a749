// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use log::{debug, error, info, warn};
use prettytable::{Table, row};
use serde_json::{Value, json};
use std::collections::HashMap;

use dir::{DirectoryTree, resolve_directory_tree};
use errors::MftError;
use record::{FileRecord, MftEntryInfo, RecordState};

pub mod attr;
pub mod dir;
pub mod errors;
pub mod fixup;
pub mod record;
pub mod runs;

/// Fixed MFT slot size in bytes.
pub const RECORD_SIZE: usize = 1024;
/// The volume root directory always occupies entry 5.
pub const ROOT_ENTRY_NUMBER: u64 = 5;

/// A fully decoded $MFT: every slot classified into one of four disjoint
/// sets, plus the directory tree resolved over the live set.
#[derive(Debug, Clone)]
pub struct Mft {
    /// In-use records, keyed `"{entry:X8}-{sequence:X8}"`.
    pub live: HashMap<String, FileRecord>,
    /// Deallocated records, keyed with the previous generation.
    pub free: HashMap<String, FileRecord>,
    /// BAAD-signature slots.
    pub bad: Vec<FileRecord>,
    /// Slots with no recognizable signature.
    pub uninitialized: Vec<FileRecord>,
    /// Key of the root directory record (entry 5).
    pub root_key: String,
    pub directory: DirectoryTree,
}

impl Mft {
    /// Decode a complete $MFT dump. Slots decode independently; any
    /// per-record problem is contained in that record. The only hard
    /// failure is a missing or ambiguous root directory.
    pub fn from_buffer(buf: &[u8]) -> Result<Self, MftError> {
        let slots = buf.len() / RECORD_SIZE;
        if buf.len() % RECORD_SIZE != 0 {
            warn!(
                "buffer length {} is not a multiple of {}, ignoring the tail",
                buf.len(),
                RECORD_SIZE
            );
        }
        debug!("decoding {} MFT slots", slots);

        let mut live = HashMap::new();
        let mut free = HashMap::new();
        let mut bad = Vec::new();
        let mut uninitialized = Vec::new();

        for slot in 0..slots {
            let offset = slot * RECORD_SIZE;
            let record = FileRecord::from_bytes(&buf[offset..offset + RECORD_SIZE], offset);
            match record.state {
                RecordState::Live => {
                    let key = record.key();
                    if live.insert(key.clone(), record).is_some() {
                        // Well-formed volumes cannot collide here.
                        error!("duplicate live key {}", key);
                        debug_assert!(false, "duplicate live key {}", key);
                    }
                }
                RecordState::Free => {
                    let key = record.key();
                    if free.insert(key.clone(), record).is_some() {
                        error!("duplicate free key {}", key);
                        debug_assert!(false, "duplicate free key {}", key);
                    }
                }
                RecordState::Bad => bad.push(record),
                RecordState::Uninitialized => uninitialized.push(record),
            }
        }

        let root_keys: Vec<String> = live
            .values()
            .filter(|r| r.entry_number == ROOT_ENTRY_NUMBER)
            .map(|r| r.key())
            .collect();
        let root_key = match root_keys.as_slice() {
            [only] => only.clone(),
            other => {
                error!(
                    "expected exactly one live root record, found {}",
                    other.len()
                );
                return Err(MftError::MissingOrDuplicateRoot(other.len()));
            }
        };

        info!(
            "MFT decoded: {} live, {} free, {} bad, {} uninitialized (root {})",
            live.len(),
            free.len(),
            bad.len(),
            uninitialized.len(),
            root_key
        );

        let directory = resolve_directory_tree(&live, &root_key);

        Ok(Mft {
            live,
            free,
            bad,
            uninitialized,
            root_key,
            directory,
        })
    }

    /// Look a file reference up in the live set. A zero sequence number
    /// is unconstrained and matches any live generation of that entry.
    pub fn record(&self, reference: &MftEntryInfo) -> Option<&FileRecord> {
        if reference.sequence_number != 0 {
            return self.live.get(&reference.key());
        }
        self.live
            .values()
            .find(|r| r.entry_number == reference.entry_number)
    }

    /// Find an entry by slot number alone, searching live then free.
    pub fn record_by_number(&self, entry_number: u64) -> Option<&FileRecord> {
        self.live
            .values()
            .find(|r| r.entry_number == entry_number)
            .or_else(|| {
                self.free
                    .values()
                    .find(|r| r.entry_number == entry_number)
            })
    }

    /// Full root-relative path of a resolved record.
    pub fn full_path(&self, key: &str) -> Option<String> {
        self.directory.path_of(key)
    }

    /// Records that finished with contained decode errors.
    pub fn partial_records(&self) -> Vec<&FileRecord> {
        self.live
            .values()
            .chain(self.free.values())
            .filter(|r| !r.decode_errors.is_empty())
            .collect()
    }

    /// Partition summary as a human-readable table string.
    pub fn to_string(&self) -> String {
        let mut t = Table::new();
        t.add_row(row!["Master File Table"]);
        t.add_row(row![b -> "Live records", self.live.len()]);
        t.add_row(row![b -> "Free records", self.free.len()]);
        t.add_row(row![b -> "Bad records", self.bad.len()]);
        t.add_row(row![b -> "Uninitialized slots", self.uninitialized.len()]);
        t.add_row(row![b -> "Root key", &self.root_key]);
        t.add_row(row![b -> "Directory nodes", self.directory.len()]);
        t.add_row(row![b -> "Partial records", self.partial_records().len()]);
        t.to_string()
    }

    /// Serialize the partition summary to JSON (uses `serde`).
    pub fn to_json(&self) -> Value {
        json!({
            "live": self.live.len(),
            "free": self.free.len(),
            "bad": self.bad.len(),
            "uninitialized": self.uninitialized.len(),
            "root_key": self.root_key,
            "directory_nodes": self.directory.len(),
            "partial_records": self.partial_records().len(),
        })
    }
}
