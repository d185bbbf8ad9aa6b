//! Error types for the high-level API.
//!
//! Every error names the file and the object path it concerns. The
//! low-level cause is kept as the error source and is only appended to the
//! message while debug mode is on (see [`crate::set_debug`]).

use std::fmt;

use hdfkit_format::error::FormatError;
use thiserror::Error;

use crate::debug::debug_enabled;

/// Name used in place of a path for files opened from memory.
pub const MEMORY_FILE: &str = "<memory>";

/// Where an error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub object: String,
}

impl Location {
    pub fn new(file: impl Into<String>, object: impl Into<String>) -> Self {
        Location {
            file: file.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.object.is_empty() {
            write!(f, "{}", self.file)
        } else {
            write!(f, "{}:{}", self.file, self.object)
        }
    }
}

/// Underlying failure.
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
}

fn cause_suffix(cause: &Option<Cause>) -> String {
    match cause {
        Some(c) if debug_enabled() => format!(" (caused by: {c})"),
        _ => String::new(),
    }
}

/// Errors returned by the high-level API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot access {at}: {detail}{}", cause_suffix(.cause))]
    FileAccess {
        at: Location,
        detail: String,
        #[source]
        cause: Option<Cause>,
    },
    #[error("invalid signature in {at}: {detail}{}", cause_suffix(.cause))]
    InvalidSignature {
        at: Location,
        detail: String,
        #[source]
        cause: Option<Cause>,
    },
    #[error("unsupported version in {at}: {detail}{}", cause_suffix(.cause))]
    UnsupportedVersion {
        at: Location,
        detail: String,
        #[source]
        cause: Option<Cause>,
    },
    #[error("corrupted file {at}: {detail}{}", cause_suffix(.cause))]
    CorruptedFile {
        at: Location,
        detail: String,
        #[source]
        cause: Option<Cause>,
    },
    #[error("unsupported feature in {at}: {detail}{}", cause_suffix(.cause))]
    UnsupportedFeature {
        at: Location,
        detail: String,
        #[source]
        cause: Option<Cause>,
    },
    #[error("unsupported datatype in {at}: {detail}{}", cause_suffix(.cause))]
    UnsupportedDatatype {
        at: Location,
        detail: String,
        #[source]
        cause: Option<Cause>,
    },
    #[error("dataset not found: {at}")]
    DatasetNotFound { at: Location },
    #[error("group not found: {at}")]
    GroupNotFound { at: Location },
    #[error("not a dataset: {at}")]
    NotADataset { at: Location },
    #[error("not a group: {at}")]
    NotAGroup { at: Location },
    #[error("circular link at {at}: {detail}")]
    CircularLink { at: Location, detail: String },
    /// The caller asked for something that cannot be done (bad selection,
    /// mismatched shapes, duplicate paths when writing).
    #[error("invalid argument for {at}: {detail}{}", cause_suffix(.cause))]
    InvalidArgument {
        at: Location,
        detail: String,
        #[source]
        cause: Option<Cause>,
    },
}

/// Fieldless mirror of [`Error`] for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FileAccess,
    InvalidSignature,
    UnsupportedVersion,
    CorruptedFile,
    UnsupportedFeature,
    UnsupportedDatatype,
    DatasetNotFound,
    GroupNotFound,
    NotADataset,
    NotAGroup,
    CircularLink,
    InvalidArgument,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FileAccess { .. } => ErrorKind::FileAccess,
            Error::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            Error::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Error::CorruptedFile { .. } => ErrorKind::CorruptedFile,
            Error::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            Error::UnsupportedDatatype { .. } => ErrorKind::UnsupportedDatatype,
            Error::DatasetNotFound { .. } => ErrorKind::DatasetNotFound,
            Error::GroupNotFound { .. } => ErrorKind::GroupNotFound,
            Error::NotADataset { .. } => ErrorKind::NotADataset,
            Error::NotAGroup { .. } => ErrorKind::NotAGroup,
            Error::CircularLink { .. } => ErrorKind::CircularLink,
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            Error::FileAccess { at, .. }
            | Error::InvalidSignature { at, .. }
            | Error::UnsupportedVersion { at, .. }
            | Error::CorruptedFile { at, .. }
            | Error::UnsupportedFeature { at, .. }
            | Error::UnsupportedDatatype { at, .. }
            | Error::DatasetNotFound { at }
            | Error::GroupNotFound { at }
            | Error::NotADataset { at }
            | Error::NotAGroup { at }
            | Error::CircularLink { at, .. }
            | Error::InvalidArgument { at, .. } => at,
        }
    }

    pub(crate) fn io(at: Location, err: std::io::Error) -> Self {
        Error::FileAccess {
            at,
            detail: err.kind().to_string(),
            cause: Some(Cause::Io(err)),
        }
    }

    pub(crate) fn invalid(at: Location, detail: impl Into<String>) -> Self {
        Error::InvalidArgument {
            at,
            detail: detail.into(),
            cause: None,
        }
    }

    pub(crate) fn corrupted(at: Location, detail: impl Into<String>) -> Self {
        Error::CorruptedFile {
            at,
            detail: detail.into(),
            cause: None,
        }
    }

    /// Classify a low-level error.
    pub(crate) fn format(at: Location, err: FormatError) -> Self {
        let detail = match &err {
            FormatError::SignatureNotFound => "no HDF5 signature at any valid offset".to_owned(),
            FormatError::UnsupportedVersion { structure, version } => {
                format!("{structure} version {version}")
            }
            FormatError::InvalidInput(msg) => msg.clone(),
            other => other.to_string(),
        };
        let cause = Some(Cause::Format(err.clone()));
        match err {
            FormatError::SignatureNotFound => Error::InvalidSignature { at, detail, cause },
            FormatError::UnsupportedVersion { .. } => Error::UnsupportedVersion { at, detail, cause },
            FormatError::UnsupportedFeature(_)
            | FormatError::UnsupportedFilter(_)
            | FormatError::UnsupportedMessage(_) => Error::UnsupportedFeature { at, detail, cause },
            FormatError::UnsupportedDatatype(_) => Error::UnsupportedDatatype { at, detail, cause },
            FormatError::InvalidInput(_) => Error::InvalidArgument { at, detail, cause },
            FormatError::UnexpectedEof { .. }
            | FormatError::InvalidOffsetSize(_)
            | FormatError::InvalidLengthSize(_)
            | FormatError::InvalidSignature { .. }
            | FormatError::ChecksumMismatch { .. }
            | FormatError::Corrupted { .. }
            | FormatError::MissingMessage(_)
            | FormatError::UndefinedAddress(_)
            | FormatError::HeapObjectNotFound { .. }
            | FormatError::FilterFailed { .. } => Error::CorruptedFile { at, detail, cause },
        }
    }
}
