#![forbid(unsafe_code)]
//! Cluster chain and record allocation.
//!
//! ## Design
//!
//! The chain table is a FAT-style doubly linked list per record, with free
//! slots marked in place (`{0, 0}`) instead of by a separate bitmap. The
//! record table uses the zero creation date the same way.
//!
//! 1. **Traversal**: chain walks with back-link checks and cycle detection.
//! 2. **Cluster allocation**: hint-directed wrapping scan, append to a chain.
//! 3. **Freeing**: zero-fill, splice out, reset to the free marker.
//! 4. **Record allocation**: hint-directed wrapping scan of the record table.
//! 5. **Relocation**: swap two clusters while keeping every link valid
//!    (used by defragmentation).
//!
//! Every function that changes the free count writes the superblock before
//! returning, so the cached count on disk never lags a completed operation.

use cfs_block::{ByteDevice, VolumeIo};
use cfs_error::{CfsError, Result};
use cfs_ondisk::{ChainEntry, Record, Superblock};
use cfs_types::{ClusterIndex, RecordIndex};
use std::collections::BTreeSet;
use tracing::{debug, trace};

fn chain_corruption<D: ByteDevice>(io: &VolumeIo<D>, at: ClusterIndex, detail: String) -> CfsError {
    CfsError::Corruption {
        offset: io.layout().chain_entry_position(at).0,
        detail,
    }
}

// ── Traversal ───────────────────────────────────────────────────────────────

/// Clusters of the chain starting at `head`, in chain order.
pub fn chain_clusters<D: ByteDevice>(
    io: &VolumeIo<D>,
    head: ClusterIndex,
) -> Result<Vec<ClusterIndex>> {
    let limit = io.layout().reserved_clusters() as usize;
    let mut out = Vec::new();
    let mut cur = head;
    let mut prev: Option<ClusterIndex> = None;
    loop {
        let entry = io.read_chain_entry(cur)?;
        if entry.is_free() {
            return Err(chain_corruption(
                io,
                cur,
                format!("chain from {head} reaches free cluster {cur}"),
            ));
        }
        if entry.prev_cluster() != prev {
            return Err(chain_corruption(
                io,
                cur,
                format!(
                    "cluster {cur} back link {:?} disagrees with predecessor {prev:?}",
                    entry.prev_cluster()
                ),
            ));
        }
        out.push(cur);
        if out.len() > limit {
            return Err(chain_corruption(
                io,
                head,
                format!("cycle in chain from {head}"),
            ));
        }
        match entry.next_cluster() {
            Some(next) => {
                prev = Some(cur);
                cur = next;
            }
            None => return Ok(out),
        }
    }
}

// ── Cluster allocation ──────────────────────────────────────────────────────

/// Scan the chain table from the superblock hint, wrapping once.
pub fn find_free_cluster<D: ByteDevice>(io: &VolumeIo<D>, sb: &Superblock) -> Result<ClusterIndex> {
    if sb.free_clusters == 0 {
        return Err(CfsError::OutOfSpace);
    }
    let reserved = sb.reserved_clusters;
    let start = sb.next_cluster_hint.0 % reserved;
    for i in (start..reserved).chain(0..start) {
        let cluster = ClusterIndex(i);
        if io.read_chain_entry(cluster)?.is_free() {
            return Ok(cluster);
        }
    }
    Err(CfsError::OutOfSpace)
}

/// Allocate one cluster and link it after `tail`, or start a new chain when
/// `tail` is `None`. The new cluster's data is zeroed.
pub fn allocate_cluster<D: ByteDevice>(
    io: &VolumeIo<D>,
    sb: &mut Superblock,
    tail: Option<ClusterIndex>,
) -> Result<ClusterIndex> {
    let cluster = find_free_cluster(io, sb)?;
    if let Some(tail) = tail {
        let tail_entry = io.read_chain_entry(tail)?;
        if !tail_entry.is_tail() {
            return Err(chain_corruption(
                io,
                tail,
                format!("cluster {tail} is not a chain tail"),
            ));
        }
    }

    io.zero_cluster(cluster)?;
    io.write_chain_entry(cluster, ChainEntry::linked(tail, None))?;
    if let Some(tail) = tail {
        let mut tail_entry = io.read_chain_entry(tail)?;
        tail_entry.next = cluster.0;
        io.write_chain_entry(tail, tail_entry)?;
    }

    sb.free_clusters -= 1;
    sb.next_cluster_hint = ClusterIndex((cluster.0 + 1) % sb.reserved_clusters);
    io.write_superblock(sb)?;
    debug!(
        cluster = cluster.0,
        after = tail.map(|t| t.0),
        free = sb.free_clusters,
        "allocated cluster"
    );
    Ok(cluster)
}

// ── Freeing ─────────────────────────────────────────────────────────────────

/// Splice `cluster` out of its chain, zero its data, and mark it free.
///
/// Returns the cluster that took its place in the chain (its successor),
/// if any.
pub fn unlink_cluster<D: ByteDevice>(
    io: &VolumeIo<D>,
    sb: &mut Superblock,
    cluster: ClusterIndex,
) -> Result<Option<ClusterIndex>> {
    if cluster == ClusterIndex::ROOT {
        return Err(CfsError::ProtectedRecord);
    }
    let entry = io.read_chain_entry(cluster)?;
    if entry.is_free() {
        return Err(chain_corruption(
            io,
            cluster,
            format!("cluster {cluster} is already free"),
        ));
    }

    if let Some(prev) = entry.prev_cluster() {
        let mut p = io.read_chain_entry(prev)?;
        p.next = entry.next;
        io.write_chain_entry(prev, p)?;
    }
    if let Some(next) = entry.next_cluster() {
        let mut n = io.read_chain_entry(next)?;
        n.prev = entry.prev;
        io.write_chain_entry(next, n)?;
    }
    io.zero_cluster(cluster)?;
    io.write_chain_entry(cluster, ChainEntry::FREE)?;

    sb.free_clusters += 1;
    if cluster < sb.next_cluster_hint {
        sb.next_cluster_hint = cluster;
    }
    io.write_superblock(sb)?;
    trace!(
        cluster = cluster.0,
        free = sb.free_clusters,
        "unlinked cluster"
    );
    Ok(entry.next_cluster())
}

/// Free every cluster of the chain starting at `head`. Returns how many
/// clusters were released.
pub fn free_chain<D: ByteDevice>(
    io: &VolumeIo<D>,
    sb: &mut Superblock,
    head: ClusterIndex,
) -> Result<u32> {
    let clusters = chain_clusters(io, head)?;
    if clusters.contains(&ClusterIndex::ROOT) {
        return Err(CfsError::ProtectedRecord);
    }
    for &cluster in &clusters {
        io.zero_cluster(cluster)?;
        io.write_chain_entry(cluster, ChainEntry::FREE)?;
    }
    let released = u32::try_from(clusters.len()).unwrap_or(u32::MAX);
    sb.free_clusters = sb.free_clusters.saturating_add(released);
    if let Some(lowest) = clusters.iter().min() {
        if *lowest < sb.next_cluster_hint {
            sb.next_cluster_hint = *lowest;
        }
    }
    io.write_superblock(sb)?;
    debug!(
        head = head.0,
        released,
        free = sb.free_clusters,
        "freed chain"
    );
    Ok(released)
}

/// Free entries in a chain table read with [`VolumeIo::read_chain_table`].
#[must_use]
pub fn count_free(table: &[ChainEntry]) -> u32 {
    u32::try_from(table.iter().filter(|e| e.is_free()).count()).unwrap_or(u32::MAX)
}

// ── Record allocation ───────────────────────────────────────────────────────

/// Scan the record table from the superblock hint, wrapping once.
pub fn find_free_record<D: ByteDevice>(io: &VolumeIo<D>, sb: &Superblock) -> Result<RecordIndex> {
    let reserved = sb.reserved_clusters;
    let start = sb.next_record_hint.0 % reserved;
    for i in (start..reserved).chain(0..start) {
        let record = RecordIndex(i);
        if io.record_is_free(record)? {
            return Ok(record);
        }
    }
    Err(CfsError::OutOfRecords)
}

/// Write `value` into the free slot `index` and advance the record hint.
pub fn claim_record<D: ByteDevice>(
    io: &VolumeIo<D>,
    sb: &mut Superblock,
    index: RecordIndex,
    value: &Record,
) -> Result<()> {
    if !io.record_is_free(index)? {
        return Err(CfsError::Corruption {
            offset: io.layout().record_position(index).0,
            detail: format!("record slot {index} is already in use"),
        });
    }
    io.write_record(index, value)?;
    sb.next_record_hint = RecordIndex((index.0 + 1) % sb.reserved_clusters);
    io.write_superblock(sb)?;
    debug!(record = index.0, name = %value.name, "claimed record");
    Ok(())
}

/// Zero the record slot and pull the record hint back if it is lower.
pub fn release_record<D: ByteDevice>(
    io: &VolumeIo<D>,
    sb: &mut Superblock,
    index: RecordIndex,
) -> Result<()> {
    if index.is_root() {
        return Err(CfsError::ProtectedRecord);
    }
    io.zero_record(index)?;
    if index < sb.next_record_hint {
        sb.next_record_hint = index;
        io.write_superblock(sb)?;
    }
    Ok(())
}

// ── Relocation ──────────────────────────────────────────────────────────────

/// Exchange the physical positions of clusters `a` and `b`.
///
/// Data, both chain entries, and every neighbour link pointing at either
/// cluster are rewritten so each chain keeps its logical order. Either
/// cluster may be free. Record head pointers are the caller's job.
pub fn swap_clusters<D: ByteDevice>(
    io: &VolumeIo<D>,
    a: ClusterIndex,
    b: ClusterIndex,
) -> Result<()> {
    if a == b {
        return Ok(());
    }
    if a == ClusterIndex::ROOT || b == ClusterIndex::ROOT {
        return Err(chain_corruption(
            io,
            ClusterIndex::ROOT,
            "root head cluster cannot be relocated".to_owned(),
        ));
    }

    let ea = io.read_chain_entry(a)?;
    let eb = io.read_chain_entry(b)?;

    let remap = |x: u32| {
        if x == a.0 {
            b.0
        } else if x == b.0 {
            a.0
        } else {
            x
        }
    };
    // The sentinel never equals a cluster index, so remap leaves it alone.
    let relink = |e: ChainEntry| {
        if e.is_free() {
            e
        } else {
            ChainEntry {
                next: remap(e.next),
                prev: remap(e.prev),
            }
        }
    };

    let mut neighbours = BTreeSet::new();
    for entry in [ea, eb] {
        neighbours.extend(entry.next_cluster());
        neighbours.extend(entry.prev_cluster());
    }
    neighbours.remove(&a);
    neighbours.remove(&b);

    let data_a = io.read_cluster(a)?;
    let data_b = io.read_cluster(b)?;
    io.write_cluster(a, &data_b)?;
    io.write_cluster(b, &data_a)?;
    io.write_chain_entry(a, relink(eb))?;
    io.write_chain_entry(b, relink(ea))?;
    for n in neighbours {
        let entry = io.read_chain_entry(n)?;
        io.write_chain_entry(n, relink(entry))?;
    }
    trace!(a = a.0, b = b.0, "swapped clusters");
    Ok(())
}
