use thiserror::Error;

/// Everything that can go wrong while decoding MFT structures.
///
/// Record and attribute level failures are recoverable: the table builder
/// attaches them to the offending record and keeps going. Only
/// `MissingOrDuplicateRoot` aborts a whole table build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MftError {
    #[error("signature mismatch: expected {expected}, found {found:?}")]
    SignatureMismatch { expected: &'static str, found: String },

    #[error("fixup value mismatch at sector boundary offset {offset:#x}")]
    FixupMismatch { offset: usize },

    #[error("structure truncated: {0}")]
    Truncation(String),

    #[error("unknown attribute type {0:#x}")]
    UnknownAttributeType(u32),

    #[error("parent record {key} is not in the live set")]
    OrphanedParent { key: String },

    #[error("cycle detected while walking parent references at {key}")]
    CycleDetected { key: String },

    #[error("expected exactly one live root record (entry 5), found {0}")]
    MissingOrDuplicateRoot(usize),
}

impl From<std::io::Error> for MftError {
    fn from(e: std::io::Error) -> Self {
        MftError::Truncation(e.to_string())
    }
}
