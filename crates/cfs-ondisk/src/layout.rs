//! Offset arithmetic for the volume file.
//!
//! ```text
//! [Superblock][Chain table: reserved × 8][Record table: reserved × 96][Data: reserved × cluster_size]
//! ```
//!
//! All functions are pure. Indices handed in are produced by the engine and
//! are always below `reserved_clusters`.

use cfs_types::{
    ByteOffset, CHAIN_ENTRY_SIZE, ClusterIndex, ClusterSize, RECORD_SIZE, RecordIndex,
    SUPERBLOCK_SIZE,
};
use serde::{Deserialize, Serialize};

use crate::Superblock;

/// Named fields of the superblock ("reserved space").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuperblockField {
    LeadSignature,
    VolumeName,
    ClusterSize,
    VolumeSize,
    ReservedClusters,
    CreationDate,
    CreationTime,
    DefragDate,
    DefragTime,
    NextClusterHint,
    FreeClusters,
    NextRecordHint,
    TailSignature,
}

impl SuperblockField {
    /// Byte offset of the field from the start of the volume.
    #[must_use]
    pub const fn offset(self) -> usize {
        match self {
            Self::LeadSignature => 0,
            Self::VolumeName => 4,
            Self::ClusterSize => 20,
            Self::VolumeSize => 24,
            Self::ReservedClusters => 32,
            Self::CreationDate => 36,
            Self::CreationTime => 38,
            Self::DefragDate => 40,
            Self::DefragTime => 42,
            Self::NextClusterHint => 44,
            Self::FreeClusters => 48,
            Self::NextRecordHint => 52,
            Self::TailSignature => 60,
        }
    }
}

/// Geometry needed to place every structure in the volume file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    cluster_size: ClusterSize,
    reserved_clusters: u32,
}

impl Layout {
    /// The chain table starts right after the superblock.
    pub const CHAIN_TABLE_OFFSET: u64 = SUPERBLOCK_SIZE as u64;

    #[must_use]
    pub fn new(cluster_size: ClusterSize, reserved_clusters: u32) -> Self {
        Self {
            cluster_size,
            reserved_clusters,
        }
    }

    #[must_use]
    pub fn from_superblock(sb: &Superblock) -> Self {
        Self::new(sb.cluster_size, sb.reserved_clusters)
    }

    /// `ceil(capacity / cluster_size)`, or `None` when it does not fit a
    /// 32-bit index.
    #[must_use]
    pub fn reserved_for_capacity(cluster_size: ClusterSize, capacity: u64) -> Option<u32> {
        u32::try_from(cluster_size.clusters_for(capacity)).ok()
    }

    #[must_use]
    pub fn cluster_size(&self) -> ClusterSize {
        self.cluster_size
    }

    #[must_use]
    pub fn reserved_clusters(&self) -> u32 {
        self.reserved_clusters
    }

    #[must_use]
    pub fn chain_table_size(&self) -> u64 {
        u64::from(self.reserved_clusters) * CHAIN_ENTRY_SIZE as u64
    }

    #[must_use]
    pub fn record_table_size(&self) -> u64 {
        u64::from(self.reserved_clusters) * RECORD_SIZE as u64
    }

    #[must_use]
    pub fn record_table_offset(&self) -> ByteOffset {
        ByteOffset(Self::CHAIN_TABLE_OFFSET + self.chain_table_size())
    }

    #[must_use]
    pub fn data_area_offset(&self) -> ByteOffset {
        ByteOffset(self.record_table_offset().0 + self.record_table_size())
    }

    #[must_use]
    pub fn chain_entry_position(&self, cluster: ClusterIndex) -> ByteOffset {
        ByteOffset(Self::CHAIN_TABLE_OFFSET + u64::from(cluster.0) * CHAIN_ENTRY_SIZE as u64)
    }

    #[must_use]
    pub fn record_position(&self, record: RecordIndex) -> ByteOffset {
        ByteOffset(self.record_table_offset().0 + u64::from(record.0) * RECORD_SIZE as u64)
    }

    #[must_use]
    pub fn cluster_position(&self, cluster: ClusterIndex) -> ByteOffset {
        ByteOffset(
            self.data_area_offset().0 + u64::from(cluster.0) * u64::from(self.cluster_size.get()),
        )
    }

    /// Size in bytes of the whole volume file.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.data_area_offset().0
            + u64::from(self.reserved_clusters) * u64::from(self.cluster_size.get())
    }

    #[must_use]
    pub fn contains_cluster(&self, cluster: ClusterIndex) -> bool {
        cluster.0 < self.reserved_clusters
    }

    #[must_use]
    pub fn contains_record(&self, record: RecordIndex) -> bool {
        record.0 < self.reserved_clusters
    }
}
