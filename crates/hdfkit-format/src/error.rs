//! Error types for HDF5 format parsing and encoding.

use thiserror::Error;

/// Crate-local result type.
pub type Result<T> = core::result::Result<T, FormatError>;

/// Errors that can occur when decoding or encoding HDF5 binary structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The HDF5 magic signature was not found at any valid offset.
    #[error("HDF5 signature not found at any valid offset")]
    SignatureNotFound,
    /// A structure carries a version this decoder does not handle.
    #[error("unsupported {structure} version: {version}")]
    UnsupportedVersion {
        /// Which structure was being decoded.
        structure: &'static str,
        /// The version byte found in the file.
        version: u8,
    },
    /// A read ran past the end of the available bytes.
    #[error("unexpected EOF at offset {at}: need {needed} bytes, have {available}")]
    UnexpectedEof {
        /// Position of the attempted read.
        at: usize,
        /// Number of bytes requested.
        needed: usize,
        /// Number of bytes remaining at that position.
        available: usize,
    },
    /// Invalid offset size (must be 2, 4, or 8).
    #[error("invalid offset size: {0} (must be 2, 4, or 8)")]
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    #[error("invalid length size: {0} (must be 2, 4, or 8)")]
    InvalidLengthSize(u8),
    /// A 4-byte structure tag did not match.
    #[error("invalid {structure} signature at offset {at:#x}")]
    InvalidSignature {
        /// Which structure was expected.
        structure: &'static str,
        /// File offset of the tag.
        at: u64,
    },
    /// Metadata checksum mismatch.
    #[error("{structure} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Which structure failed verification.
        structure: &'static str,
        /// The checksum stored in the file.
        stored: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// A structure is internally inconsistent.
    #[error("corrupted {structure}: {reason}")]
    Corrupted {
        /// Which structure is inconsistent.
        structure: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// The file uses a feature this library does not implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    /// The datatype class or encoding cannot be decoded.
    #[error("unsupported datatype: {0}")]
    UnsupportedDatatype(String),
    /// A filter in the pipeline cannot be applied.
    #[error("unsupported filter id {0}")]
    UnsupportedFilter(u16),
    /// Unknown message type that is marked as must-understand.
    #[error("unsupported message type {0:#06x} marked as must-understand")]
    UnsupportedMessage(u16),
    /// A required header message was not present.
    #[error("missing required {0} message")]
    MissingMessage(&'static str),
    /// A required address field holds the undefined address.
    #[error("undefined address for {0}")]
    UndefinedAddress(&'static str),
    /// A global heap reference points at an index that does not exist.
    #[error("global heap object {index} not found in collection at {collection:#x}")]
    HeapObjectNotFound {
        /// Address of the collection.
        collection: u64,
        /// Object index within the collection.
        index: u16,
    },
    /// A filter failed while transforming chunk bytes.
    #[error("filter {filter} failed: {reason}")]
    FilterFailed {
        /// Filter name.
        filter: &'static str,
        /// Failure detail.
        reason: String,
    },
    /// Caller-supplied data cannot be encoded as requested.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FormatError {
    pub(crate) fn corrupted(structure: &'static str, reason: impl Into<String>) -> Self {
        FormatError::Corrupted {
            structure,
            reason: reason.into(),
        }
    }
}
