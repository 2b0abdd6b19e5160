#![forbid(unsafe_code)]
//! Error types for ChainFS.
//!
//! # Error Taxonomy
//!
//! ChainFS uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Decoding | `ParseError` | `cfs-types` | Byte-level violations while decoding superblock, chain or record bytes |
//! | Runtime | `CfsError` | `cfs-error` (this crate) | Every failure surfaced to volume callers |
//!
//! `cfs-error` does not depend on `cfs-types`. The volume I/O layer
//! (`cfs-block`) converts `ParseError` into `CfsError::Corruption` when live
//! metadata fails to decode, and into `CfsError::InvalidVolume` when the
//! superblock fails to decode at attach time.
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`CfsError::to_errno`].
//! The match is exhaustive so a new variant cannot be added without an errno.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error or `EIO` |
//! | `Corruption` | `EIO` |
//! | `Format` | `EINVAL` |
//! | `InvalidVolume` | `EINVAL` |
//! | `Parse` | `EINVAL` |
//! | `OutOfSpace` | `ENOSPC` |
//! | `OutOfRecords` | `ENOSPC` |
//! | `ContentTooLarge` | `EFBIG` |
//! | `ProtectedRecord` | `EPERM` |
//! | `NameConflict` | `EEXIST` |
//! | `NotFound` | `ENOENT` |
//! | `NotEmpty` | `ENOTEMPTY` |
//! | `InvalidMove` | `EINVAL` |
//! | `InvalidName` | `EINVAL` |
//!
//! Nothing is retried. Disk I/O failures abort the current operation and are
//! propagated unchanged.

use thiserror::Error;

/// Unified error type for all ChainFS operations.
#[derive(Debug, Error)]
pub enum CfsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Live metadata is inconsistent (broken chain link, undecodable record,
    /// directory slot pointing at a free record).
    ///
    /// `offset` is the byte position in the volume file where the bad
    /// structure lives, for triage with a hex editor.
    #[error("corrupt metadata at byte {offset}: {detail}")]
    Corruption { offset: u64, detail: String },

    /// Rejected format request: bad volume name, illegal characters,
    /// misaligned cluster size, oversize volume, or an existing file at the
    /// target path.
    #[error("invalid format request: {0}")]
    Format(String),

    /// The file is not a ChainFS volume (missing file, bad signatures,
    /// geometry that disagrees with the file length).
    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    /// Decode failure surfaced without block context.
    ///
    /// Prefer `Corruption` when the byte offset is known.
    #[error("parse error: {0}")]
    Parse(String),

    /// No free cluster left in the chain table.
    #[error("no free cluster left on volume")]
    OutOfSpace,

    /// No free slot left in the record table.
    #[error("no free record slot left on volume")]
    OutOfRecords,

    /// A write needs more new clusters than the volume has free.
    #[error("content too large: needs {requested} new clusters, {available} free")]
    ContentTooLarge { requested: u64, available: u64 },

    /// Attempt to rename, move, or delete the root record.
    #[error("the root record cannot be modified")]
    ProtectedRecord,

    /// A sibling with the same name and kind already exists.
    #[error("name already exists in directory: {0}")]
    NameConflict(String),

    /// Path segment or record could not be resolved.
    #[error("not found: {0}")]
    NotFound(String),

    /// Directory deletion with children still present.
    #[error("directory not empty")]
    NotEmpty,

    /// Move that would make a directory its own ancestor.
    #[error("invalid move: {0}")]
    InvalidMove(String),

    /// Record name is empty, too long, or contains a reserved character.
    #[error("invalid record name: {0}")]
    InvalidName(String),
}

impl CfsError {
    /// Convert this error into a POSIX errno.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Format(_)
            | Self::InvalidVolume(_)
            | Self::Parse(_)
            | Self::InvalidMove(_)
            | Self::InvalidName(_) => libc::EINVAL,
            Self::OutOfSpace | Self::OutOfRecords => libc::ENOSPC,
            Self::ContentTooLarge { .. } => libc::EFBIG,
            Self::ProtectedRecord => libc::EPERM,
            Self::NameConflict(_) => libc::EEXIST,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotEmpty => libc::ENOTEMPTY,
        }
    }
}

/// Result alias using `CfsError`.
pub type Result<T> = std::result::Result<T, CfsError>;
