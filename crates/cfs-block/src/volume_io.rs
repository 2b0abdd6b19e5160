//! Typed reads and writes of volume structures.

use cfs_error::{CfsError, Result};
use cfs_ondisk::{ChainEntry, Layout, Record, Superblock};
use cfs_types::{
    ByteOffset, CHAIN_ENTRY_SIZE, ClusterIndex, ParseError, RECORD_SIZE, RecordIndex,
    SUPERBLOCK_SIZE,
};
use tracing::trace;

use crate::ByteDevice;

fn corruption(offset: ByteOffset, err: &ParseError) -> CfsError {
    CfsError::Corruption {
        offset: offset.0,
        detail: err.to_string(),
    }
}

/// Read the raw 64-byte superblock region.
pub fn read_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; SUPERBLOCK_SIZE];
    dev.read_exact_at(0, &mut buf)?;
    Ok(buf)
}

/// Structure-level access to one volume.
///
/// Owns the device for the lifetime of the session. Indices are
/// bounds-checked against the layout; an out-of-range index can only come
/// from a corrupt link, so it is reported as `Corruption`.
#[derive(Debug)]
pub struct VolumeIo<D: ByteDevice> {
    dev: D,
    layout: Layout,
}

impl<D: ByteDevice> VolumeIo<D> {
    #[must_use]
    pub fn new(dev: D, layout: Layout) -> Self {
        Self { dev, layout }
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.dev
    }

    #[must_use]
    pub fn into_device(self) -> D {
        self.dev
    }

    #[must_use]
    pub fn cluster_size(&self) -> usize {
        self.layout.cluster_size().as_usize()
    }

    fn check_cluster(&self, cluster: ClusterIndex) -> Result<()> {
        if self.layout.contains_cluster(cluster) {
            Ok(())
        } else {
            Err(CfsError::Corruption {
                offset: self.layout.chain_entry_position(cluster).0,
                detail: format!(
                    "cluster {cluster} outside table of {}",
                    self.layout.reserved_clusters()
                ),
            })
        }
    }

    fn check_record(&self, record: RecordIndex) -> Result<()> {
        if self.layout.contains_record(record) {
            Ok(())
        } else {
            Err(CfsError::Corruption {
                offset: self.layout.record_position(record).0,
                detail: format!(
                    "record {record} outside table of {}",
                    self.layout.reserved_clusters()
                ),
            })
        }
    }

    // ── Superblock ──────────────────────────────────────────────────────────

    pub fn read_superblock(&self) -> Result<Superblock> {
        let region = read_superblock_region(&self.dev)?;
        Superblock::parse_region(&region).map_err(|err| corruption(ByteOffset::ZERO, &err))
    }

    pub fn write_superblock(&self, sb: &Superblock) -> Result<()> {
        self.dev.write_all_at(0, &sb.to_bytes())
    }

    // ── Chain table ─────────────────────────────────────────────────────────

    pub fn read_chain_entry(&self, cluster: ClusterIndex) -> Result<ChainEntry> {
        self.check_cluster(cluster)?;
        let pos = self.layout.chain_entry_position(cluster);
        let mut buf = [0_u8; CHAIN_ENTRY_SIZE];
        self.dev.read_exact_at(pos.0, &mut buf)?;
        ChainEntry::parse(&buf).map_err(|err| corruption(pos, &err))
    }

    /// Read the whole chain table in one transfer.
    pub fn read_chain_table(&self) -> Result<Vec<ChainEntry>> {
        let start = Layout::CHAIN_TABLE_OFFSET;
        let len = usize::try_from(self.layout.chain_table_size())
            .map_err(|_| CfsError::Parse("chain table does not fit in memory".to_owned()))?;
        let mut buf = vec![0_u8; len];
        self.dev.read_exact_at(start, &mut buf)?;
        buf.chunks_exact(CHAIN_ENTRY_SIZE)
            .enumerate()
            .map(|(i, raw)| {
                ChainEntry::parse(raw).map_err(|err| {
                    corruption(ByteOffset(start + (i * CHAIN_ENTRY_SIZE) as u64), &err)
                })
            })
            .collect()
    }

    pub fn write_chain_entry(&self, cluster: ClusterIndex, entry: ChainEntry) -> Result<()> {
        self.check_cluster(cluster)?;
        trace!(
            cluster = cluster.0,
            next = entry.next,
            prev = entry.prev,
            "write chain entry"
        );
        let pos = self.layout.chain_entry_position(cluster);
        self.dev.write_all_at(pos.0, &entry.to_bytes())
    }

    // ── Record table ────────────────────────────────────────────────────────

    pub fn read_record(&self, record: RecordIndex) -> Result<Record> {
        self.check_record(record)?;
        let pos = self.layout.record_position(record);
        let mut buf = [0_u8; RECORD_SIZE];
        self.dev.read_exact_at(pos.0, &mut buf)?;
        Record::parse(&buf).map_err(|err| corruption(pos, &err))
    }

    pub fn write_record(&self, record: RecordIndex, value: &Record) -> Result<()> {
        self.check_record(record)?;
        trace!(record = record.0, name = %value.name, "write record");
        let pos = self.layout.record_position(record);
        self.dev.write_all_at(pos.0, &value.to_bytes())
    }

    /// Zero the whole slot, freeing it.
    pub fn zero_record(&self, record: RecordIndex) -> Result<()> {
        self.check_record(record)?;
        trace!(record = record.0, "zero record");
        let pos = self.layout.record_position(record);
        self.dev.write_all_at(pos.0, &[0_u8; RECORD_SIZE])
    }

    /// Whether the record slot is unallocated (zero creation date).
    pub fn record_is_free(&self, record: RecordIndex) -> Result<bool> {
        self.check_record(record)?;
        let pos = self.layout.record_position(record);
        let mut buf = [0_u8; RECORD_SIZE];
        self.dev.read_exact_at(pos.0, &mut buf)?;
        Record::is_free_slot(&buf).map_err(|err| corruption(pos, &err))
    }

    // ── Data clusters ───────────────────────────────────────────────────────

    pub fn read_cluster(&self, cluster: ClusterIndex) -> Result<Vec<u8>> {
        self.check_cluster(cluster)?;
        let mut buf = vec![0_u8; self.cluster_size()];
        self.dev
            .read_exact_at(self.layout.cluster_position(cluster).0, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` at the start of the cluster and zero the remainder.
    pub fn write_cluster(&self, cluster: ClusterIndex, data: &[u8]) -> Result<()> {
        self.check_cluster(cluster)?;
        let size = self.cluster_size();
        if data.len() > size {
            return Err(CfsError::Parse(format!(
                "cluster payload of {} bytes exceeds cluster size {size}",
                data.len()
            )));
        }
        trace!(cluster = cluster.0, bytes = data.len(), "write cluster");
        let pos = self.layout.cluster_position(cluster).0;
        if data.len() == size {
            return self.dev.write_all_at(pos, data);
        }
        let mut buf = vec![0_u8; size];
        buf[..data.len()].copy_from_slice(data);
        self.dev.write_all_at(pos, &buf)
    }

    /// Write `data` at byte `offset` inside the cluster, leaving the rest.
    pub fn write_cluster_at(&self, cluster: ClusterIndex, offset: usize, data: &[u8]) -> Result<()> {
        self.check_cluster(cluster)?;
        let end = offset.checked_add(data.len());
        if end.is_none_or(|end| end > self.cluster_size()) {
            return Err(CfsError::Parse(format!(
                "write of {} bytes at {offset} crosses cluster boundary",
                data.len()
            )));
        }
        let pos = self.layout.cluster_position(cluster).0 + offset as u64;
        self.dev.write_all_at(pos, data)
    }

    pub fn zero_cluster(&self, cluster: ClusterIndex) -> Result<()> {
        self.write_cluster(cluster, &[])
    }

    /// Read a little-endian word at `slot * 4` inside the cluster.
    pub fn read_cluster_word(&self, cluster: ClusterIndex, slot: u32) -> Result<u32> {
        self.check_cluster(cluster)?;
        let offset = u64::from(slot) * 4;
        if offset + 4 > self.cluster_size() as u64 {
            return Err(CfsError::Parse(format!("word slot {slot} outside cluster")));
        }
        let mut buf = [0_u8; 4];
        self.dev
            .read_exact_at(self.layout.cluster_position(cluster).0 + offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_cluster_word(&self, cluster: ClusterIndex, slot: u32, value: u32) -> Result<()> {
        self.write_cluster_at(cluster, slot as usize * 4, &value.to_le_bytes())
    }

    pub fn sync(&self) -> Result<()> {
        self.dev.sync()
    }
}
