#![forbid(unsafe_code)]
//! ChainFS volume session.
//!
//! [`Volume`] owns one open volume: the device handle plus the cached
//! superblock. Every mutation goes through it, so the cached superblock
//! and the on-disk copy never diverge after an operation returns.
//!
//! # Opening a volume
//!
//! ```no_run
//! use cfs_core::{FormatOptions, Volume};
//!
//! let mut vol = Volume::format("disk.cfs", &FormatOptions::default())?;
//! vol.create_file("/hello.txt")?;
//! vol.write_file("/hello.txt", b"hi")?;
//! vol.close()?;
//!
//! let vol = Volume::attach("disk.cfs")?;
//! assert_eq!(vol.read_file("/hello.txt")?, b"hi");
//! # Ok::<(), cfs_core::CfsError>(())
//! ```

mod defrag;
mod format;
mod ops;
pub mod path;
pub mod verify;

pub use cfs_block::{ByteDevice, FileByteDevice, MemoryByteDevice, StreamByteDevice};
pub use cfs_error::{CfsError, Result};
pub use cfs_ondisk::{Layout, Record, RecordKind, Superblock};
pub use cfs_types::{ClusterIndex, ClusterSize, RecordIndex, Timestamp};
pub use defrag::DefragReport;
pub use verify::{ConsistencyIssue, ConsistencyReport};

use cfs_block::VolumeIo;
use serde::{Deserialize, Serialize};

/// Parameters for a new volume.
///
/// Deserializes with defaults for missing fields, so a harness can load a
/// partial JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// Up to 8 UTF-16 code units, none of them reserved path characters.
    pub volume_name: String,
    /// Bytes per cluster. Divisible by 4, at least 8.
    pub cluster_size: u32,
    /// Net data capacity in bytes; rounded up to whole clusters.
    pub capacity: u64,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            volume_name: "CFS".to_owned(),
            cluster_size: 4096,
            capacity: 4 * 1024 * 1024,
        }
    }
}

/// Options for attaching an existing volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachOptions {
    /// Run the full consistency check before returning the session.
    pub verify: bool,
}

/// One child in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub record: RecordIndex,
    pub name: String,
    pub kind: RecordKind,
    /// Byte length for files, 0 for directories.
    pub size: u64,
    pub created: Timestamp,
    pub modified: Timestamp,
}

impl DirEntry {
    fn from_record(record: RecordIndex, value: Record) -> Self {
        Self {
            record,
            name: value.name,
            kind: value.kind,
            size: value.size,
            created: value.created,
            modified: value.modified,
        }
    }
}

/// Metadata of one resolved record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStat {
    pub record: RecordIndex,
    pub name: String,
    pub kind: RecordKind,
    pub size: u64,
    pub first_cluster: ClusterIndex,
    /// Length of the record's cluster chain.
    pub clusters: u32,
    pub parent: Option<RecordIndex>,
    pub created: Timestamp,
    pub modified: Timestamp,
}

/// An attached volume.
///
/// The session exclusively owns its device; dropping it releases the
/// handle, [`Volume::close`] additionally flushes it first. One session per
/// volume: nothing here guards against a second writer.
pub struct Volume<D: ByteDevice = FileByteDevice> {
    io: VolumeIo<D>,
    sb: Superblock,
}

impl<D: ByteDevice> std::fmt::Debug for Volume<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("superblock", &self.sb)
            .field("dev_len", &self.io.device().len_bytes())
            .finish()
    }
}

impl<D: ByteDevice> Volume<D> {
    /// Cached superblock, identical to the on-disk copy.
    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        self.io.layout()
    }

    #[must_use]
    pub fn free_clusters(&self) -> u32 {
        self.sb.free_clusters
    }

    #[must_use]
    pub fn device(&self) -> &D {
        self.io.device()
    }

    /// Release the session and hand back the device without syncing.
    #[must_use]
    pub fn into_device(self) -> D {
        self.io.into_device()
    }

    /// Flush pending writes and release the device.
    pub fn close(self) -> Result<()> {
        self.io.sync()?;
        tracing::debug!(volume = %self.sb.volume_name, "volume closed");
        Ok(())
    }

    /// Full consistency scan. Findings are reported, not repaired.
    pub fn verify(&self) -> Result<ConsistencyReport> {
        verify::check_volume(&self.io, &self.sb)
    }
}
