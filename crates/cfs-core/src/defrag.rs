//! Defragmentation.
//!
//! Two passes, each made of single relocations whose link fix-ups are all
//! written before the next relocation starts:
//!
//! 1. **Record compaction**: the highest live record moves into the lowest
//!    free slot until no free slot sits below a live one. The parent's child
//!    slot and every child's parent link follow each move.
//! 2. **Cluster compaction**: records are visited in index order and each
//!    chain in chain order; every cluster is swapped into the next physical
//!    position. Neighbour links and record head pointers follow each swap.
//!
//! Afterwards every chain is physically contiguous, used clusters occupy
//! `0..used` and live records occupy `0..live`.

use std::collections::HashMap;

use cfs_alloc::{chain_clusters, swap_clusters};
use cfs_block::ByteDevice;
use cfs_dir::{dir_entries, dir_replace};
use cfs_error::{CfsError, Result};
use cfs_types::{ClusterIndex, RecordIndex, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::Volume;

/// What a defragmentation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefragReport {
    pub records_moved: u32,
    pub clusters_moved: u32,
}

impl<D: ByteDevice> Volume<D> {
    /// Compact the record table and make every chain contiguous.
    ///
    /// There is no journal: an I/O failure part-way leaves earlier
    /// relocations complete and the failing one possibly half-applied, and
    /// the error is returned at once. Run [`Volume::verify`] before further
    /// use in that case.
    pub fn defragment(&mut self) -> Result<DefragReport> {
        let records_moved = self.compact_records()?;
        let clusters_moved = self.compact_clusters()?;

        let used = self.sb.used_clusters();
        let live = self.live_record_count()?;
        self.sb.next_cluster_hint = ClusterIndex(used % self.sb.reserved_clusters);
        self.sb.next_record_hint = RecordIndex(live % self.sb.reserved_clusters);
        self.sb.defragmented = Timestamp::now();
        self.io.write_superblock(&self.sb)?;
        self.io.sync()?;

        let report = DefragReport {
            records_moved,
            clusters_moved,
        };
        info!(
            records_moved,
            clusters_moved,
            used_clusters = used,
            live_records = live,
            "defragmented volume"
        );
        Ok(report)
    }

    fn live_flags(&self) -> Result<Vec<bool>> {
        (0..self.sb.reserved_clusters)
            .map(|i| self.io.record_is_free(RecordIndex(i)).map(|free| !free))
            .collect()
    }

    fn live_record_count(&self) -> Result<u32> {
        let flags = self.live_flags()?;
        Ok(u32::try_from(flags.iter().filter(|live| **live).count()).unwrap_or(u32::MAX))
    }

    fn compact_records(&mut self) -> Result<u32> {
        let mut live = self.live_flags()?;
        let mut moved = 0_u32;
        loop {
            let Some(hole) = live.iter().position(|l| !l) else {
                break;
            };
            let Some(top) = live.iter().rposition(|l| *l) else {
                break;
            };
            if top < hole {
                break;
            }
            self.relocate_record(RecordIndex(top as u32), RecordIndex(hole as u32))?;
            live[hole] = true;
            live[top] = false;
            moved += 1;
        }
        Ok(moved)
    }

    /// Move record `from` into the free slot `to`, fixing every reference.
    fn relocate_record(&mut self, from: RecordIndex, to: RecordIndex) -> Result<()> {
        if from.is_root() {
            return Err(CfsError::ProtectedRecord);
        }
        let record = self.io.read_record(from)?;
        let parent = record.parent.ok_or_else(|| CfsError::Corruption {
            offset: self.io.layout().record_position(from).0,
            detail: format!("non-root record {from} has no parent"),
        })?;

        self.io.write_record(to, &record)?;
        let parent_head = self.io.read_record(parent)?.first_cluster;
        dir_replace(&self.io, parent_head, record.parent_slot, to)?;
        if record.is_dir() {
            for child in dir_entries(&self.io, record.first_cluster)? {
                let mut value = self.io.read_record(child)?;
                value.parent = Some(to);
                self.io.write_record(child, &value)?;
            }
        }
        self.io.zero_record(from)?;
        trace!(from = from.0, to = to.0, name = %record.name, "relocated record");
        Ok(())
    }

    fn compact_clusters(&mut self) -> Result<u32> {
        let mut heads: HashMap<ClusterIndex, RecordIndex> = HashMap::new();
        for i in 0..self.sb.reserved_clusters {
            let index = RecordIndex(i);
            if !self.io.record_is_free(index)? {
                heads.insert(self.io.read_record(index)?.first_cluster, index);
            }
        }
        let mut order: Vec<RecordIndex> = heads.values().copied().collect();
        order.sort_unstable();

        let mut target = 0_u32;
        let mut moved = 0_u32;
        for index in order {
            let head = self.io.read_record(index)?.first_cluster;
            let mut chain = chain_clusters(&self.io, head)?;
            for pos in 0..chain.len() {
                let here = chain[pos];
                let dest = ClusterIndex(target);
                target += 1;
                if here == dest {
                    continue;
                }
                // A later cluster of this same chain may sit at `dest`.
                if let Some(later) = chain[pos + 1..].iter().position(|c| *c == dest) {
                    chain[pos + 1 + later] = here;
                }
                swap_clusters(&self.io, here, dest)?;
                self.fix_heads(&mut heads, here, dest)?;
                chain[pos] = dest;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// After swapping `a` and `b`, repoint any record whose head was either.
    fn fix_heads(
        &self,
        heads: &mut HashMap<ClusterIndex, RecordIndex>,
        a: ClusterIndex,
        b: ClusterIndex,
    ) -> Result<()> {
        let owner_a = heads.remove(&a);
        let owner_b = heads.remove(&b);
        for (owner, new_head) in [(owner_a, b), (owner_b, a)] {
            if let Some(index) = owner {
                let mut record = self.io.read_record(index)?;
                record.first_cluster = new_head;
                self.io.write_record(index, &record)?;
                heads.insert(new_head, index);
            }
        }
        Ok(())
    }
}
