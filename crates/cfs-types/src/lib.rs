#![forbid(unsafe_code)]
//! Shared identifiers, format constants, and byte helpers for ChainFS.
//!
//! Everything in this crate is pure: no I/O, no allocation state. The
//! on-disk structures in `cfs-ondisk` and every layer above build on the
//! index newtypes defined here so that cluster numbers, record numbers and
//! byte offsets cannot be mixed up.

pub mod time;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use time::{DateCode, TimeCode, Timestamp};

/// First word of every volume file.
pub const LEAD_SIGNATURE: u32 = 0x5346_4843;
/// Last word of the superblock.
pub const TAIL_SIGNATURE: u32 = 0x55AA_F5C3;

/// "No next / no previous cluster" and "no parent" marker.
pub const SENTINEL: u32 = 0xFFFF_FFFF;

pub const SUPERBLOCK_SIZE: usize = 64;
pub const CHAIN_ENTRY_SIZE: usize = 8;
pub const RECORD_SIZE: usize = 96;

/// Record name width in UTF-16 code units.
pub const RECORD_NAME_UNITS: usize = 32;
/// Volume name width in UTF-16 code units.
pub const VOLUME_NAME_UNITS: usize = 8;

/// Largest total volume file accepted at format time (16 GiB).
pub const MAX_VOLUME_BYTES: u64 = 16 * 1024 * 1024 * 1024;

/// Characters that may not appear in volume or record names.
pub const RESERVED_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Index into the cluster chain table and the data area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterIndex(pub u32);

impl ClusterIndex {
    /// Head cluster of the root directory.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index into the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordIndex(pub u32);

impl RecordIndex {
    /// The root directory record. Never renamed, moved, or deleted.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Byte offset inside the volume file.
///
/// Unit-carrying wrapper so byte positions are never confused with indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

/// Validated cluster size (divisible by 4, large enough for a count word and
/// one directory slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterSize(u32);

impl ClusterSize {
    pub const MIN: u32 = 8;

    pub fn new(value: u32) -> Result<Self, ParseError> {
        if value < Self::MIN {
            return Err(ParseError::InvalidField {
                field: "cluster_size",
                reason: "must be at least 8 bytes",
            });
        }
        if value % 4 != 0 {
            return Err(ParseError::InvalidField {
                field: "cluster_size",
                reason: "must be divisible by 4",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of 32-bit words in one cluster.
    #[must_use]
    pub fn words(self) -> u32 {
        self.0 / 4
    }

    /// Clusters needed to hold `bytes` bytes (rounding up).
    #[must_use]
    pub fn clusters_for(self, bytes: u64) -> u64 {
        bytes.div_ceil(u64::from(self.0))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid signature: expected {expected:#x}, got {actual:#x}")]
    InvalidSignature { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Read `N` consecutive little-endian UTF-16 code units.
#[inline]
pub fn read_utf16_units<const N: usize>(data: &[u8], offset: usize) -> Result<[u16; N], ParseError> {
    let bytes = ensure_slice(data, offset, N * 2)?;
    let mut out = [0_u16; N];
    for (unit, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *unit = u16::from_le_bytes([pair[0], pair[1]]);
    }
    Ok(out)
}

/// Decode a zero-padded UTF-16 name field.
#[must_use]
pub fn trim_nul_padded_utf16(units: &[u16]) -> String {
    let end = units.iter().position(|u| *u == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

/// Whether `name` is usable as a volume or record name.
#[must_use]
pub fn is_valid_name_charset(name: &str) -> bool {
    !name.is_empty() && !name.contains(RESERVED_NAME_CHARS) && name != "." && name != ".."
}

impl fmt::Display for ClusterIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RecordIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ClusterSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
