mod common;

use common::*;
use ntfs_mft::Mft;
use ntfs_mft::errors::MftError;
use ntfs_mft::record::{FileRecord, MftEntryInfo, RecordState};

#[test]
fn partitions_slots_into_four_disjoint_sets() {
    let mut baad = vec![0u8; RECORD_SIZE];
    baad[0..4].copy_from_slice(b"BAAD");

    let records = [
        root_record(5),
        file_record(
            10,
            2,
            0x0001,
            &[
                standard_information_attr(0x0020),
                file_name_attr(5, 5, "report.pdf"),
                data_attr(b"%PDF-1.7"),
            ],
        ),
        file_record(
            11,
            6,
            0x0000, // deallocated
            &[
                standard_information_attr(0),
                file_name_attr(5, 5, "deleted.tmp"),
            ],
        ),
        baad,
        vec![0u8; RECORD_SIZE], // never written
    ];
    let mft = Mft::from_buffer(&mft_buffer(&records)).unwrap();

    assert_eq!(mft.live.len(), 2);
    assert_eq!(mft.free.len(), 1);
    assert_eq!(mft.bad.len(), 1);
    assert_eq!(mft.uninitialized.len(), 1);
    assert_eq!(mft.root_key, "00000005-00000005");

    // Free records key with the previous generation so stale parent
    // references still hit them.
    assert!(mft.free.contains_key("0000000B-00000005"));
    assert_eq!(mft.bad[0].state, RecordState::Bad);
    assert!(mft.bad[0].attributes.is_empty());

    let report = mft.live.get("0000000A-00000002").unwrap();
    assert_eq!(report.primary_name().unwrap(), "report.pdf");
    assert!(report.fixup_ok);
    assert!(report.decode_errors.is_empty());
}

#[test]
fn missing_root_aborts_the_build() {
    let records = [file_record(
        10,
        1,
        0x0001,
        &[file_name_attr(5, 5, "stray.bin")],
    )];
    let err = Mft::from_buffer(&mft_buffer(&records)).unwrap_err();
    assert_eq!(err, MftError::MissingOrDuplicateRoot(0));
}

#[test]
fn oversized_attribute_marks_record_partial_not_fatal() {
    // Patch the first attribute of a well-formed record so its declared
    // size runs past the slot.
    let mut broken = file_record(12, 1, 0x0001, &[file_name_attr(5, 5, "hm")]);
    broken[0x3C..0x40].copy_from_slice(&8192u32.to_le_bytes());
    let records = [root_record(5), broken];
    let mft = Mft::from_buffer(&mft_buffer(&records)).unwrap();

    let record = mft.record_by_number(12).unwrap();
    assert_eq!(record.state, RecordState::Live);
    assert!(record.attributes.is_empty());
    assert!(
        record
            .decode_errors
            .iter()
            .any(|e| matches!(e, MftError::Truncation(_)))
    );
    assert_eq!(mft.partial_records().len(), 1);
}

#[test]
fn reference_lookup_honors_sequence_constraints() {
    let records = [
        root_record(5),
        file_record(20, 7, 0x0001, &[file_name_attr(5, 5, "a.txt")]),
    ];
    let mft = Mft::from_buffer(&mft_buffer(&records)).unwrap();

    let exact = MftEntryInfo {
        entry_number: 20,
        sequence_number: 7,
    };
    assert!(mft.record(&exact).is_some());

    let stale = MftEntryInfo {
        entry_number: 20,
        sequence_number: 3,
    };
    assert!(mft.record(&stale).is_none());

    // Sequence zero is unconstrained.
    let unconstrained = MftEntryInfo {
        entry_number: 20,
        sequence_number: 0,
    };
    assert_eq!(mft.record(&unconstrained).unwrap().sequence_number, 7);
}

#[test]
fn fixup_mismatch_is_repaired_and_reported() {
    let mut tampered = file_record(13, 1, 0x0001, &[file_name_attr(5, 5, "x")]);
    tampered[510] ^= 0xFF; // clobber the first sector sentinel
    let records = [root_record(5), tampered];
    let mft = Mft::from_buffer(&mft_buffer(&records)).unwrap();

    let record = mft.record_by_number(13).unwrap();
    assert!(!record.fixup_ok);
    assert!(
        record
            .decode_errors
            .iter()
            .any(|e| matches!(e, MftError::FixupMismatch { offset: 510 }))
    );
    // The record still decodes past the repaired boundary.
    assert_eq!(record.primary_name().unwrap(), "x");
}

#[test]
fn single_record_unit_decode_matches_table_decode() {
    let raw = file_record(
        30,
        2,
        0x0003,
        &[standard_information_attr(0), file_name_attr(5, 5, "dir")],
    );
    let record = FileRecord::from_bytes(&raw, 0);
    assert_eq!(record.state, RecordState::Live);
    assert!(record.is_directory());
    assert_eq!(record.entry_number, 30);
    assert_eq!(record.key(), "0000001E-00000002");
    assert!(!record.has_slack);
    assert_eq!(record.file_names().len(), 1);
}
