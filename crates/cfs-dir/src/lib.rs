#![forbid(unsafe_code)]
//! Directory operations.
//!
//! A directory's cluster chain holds a packed array of child record
//! indices. Every cluster reserves its first 32-bit word: in the head
//! cluster it is the count of valid children, in chained clusters it stays
//! zero. The remaining `cluster_size / 4 - 1` words of each cluster are
//! child slots, filled in order. Logical entry `j` therefore lives in chain
//! cluster `j / per` at word `1 + j % per`, and a record's `parent_slot` is
//! its `j` in the parent.
//!
//! Removal swaps the last entry into the hole, so the array stays packed
//! and every removal is O(1) in the number of children.

use cfs_alloc::{allocate_cluster, chain_clusters, unlink_cluster};
use cfs_block::{ByteDevice, VolumeIo};
use cfs_error::{CfsError, Result};
use cfs_ondisk::{Record, RecordKind, Superblock};
use cfs_types::{ClusterIndex, ClusterSize, RecordIndex};
use tracing::{debug, trace};

/// Word index of the child count in the head cluster.
const COUNT_WORD: u32 = 0;

/// Child slots available in one directory cluster.
#[must_use]
pub fn slots_per_cluster(cluster_size: ClusterSize) -> u32 {
    cluster_size.words() - 1
}

/// Where logical entry `entry` lives: chain position and word index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPosition {
    pub chain_pos: usize,
    pub word: u32,
}

#[must_use]
pub fn slot_position(entry: u32, per_cluster: u32) -> SlotPosition {
    SlotPosition {
        chain_pos: (entry / per_cluster) as usize,
        word: 1 + entry % per_cluster,
    }
}

/// Chain clusters needed to hold `count` children. Never less than one:
/// the head cluster stays even when the directory is empty.
#[must_use]
pub fn clusters_for_entries(count: u32, per_cluster: u32) -> usize {
    count.div_ceil(per_cluster).max(1) as usize
}

/// Decode the non-zero child slots of one cluster, stopping at the first
/// zero slot or after `limit` slots.
#[must_use]
pub fn decode_slots(cluster: &[u8], limit: usize) -> Vec<RecordIndex> {
    cluster
        .chunks_exact(4)
        .skip(1)
        .take(limit)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .take_while(|&raw| raw != 0)
        .map(RecordIndex)
        .collect()
}

fn dir_corruption<D: ByteDevice>(io: &VolumeIo<D>, head: ClusterIndex, detail: String) -> CfsError {
    CfsError::Corruption {
        offset: io.layout().cluster_position(head).0,
        detail,
    }
}

/// Number of children of the directory whose chain starts at `head`.
pub fn child_count<D: ByteDevice>(io: &VolumeIo<D>, head: ClusterIndex) -> Result<u32> {
    io.read_cluster_word(head, COUNT_WORD)
}

pub fn is_empty<D: ByteDevice>(io: &VolumeIo<D>, head: ClusterIndex) -> Result<bool> {
    Ok(child_count(io, head)? == 0)
}

/// Child record indices in slot order.
pub fn dir_entries<D: ByteDevice>(io: &VolumeIo<D>, head: ClusterIndex) -> Result<Vec<RecordIndex>> {
    let per = slots_per_cluster(io.layout().cluster_size());
    let chain = chain_clusters(io, head)?;
    let count = child_count(io, head)?;
    if clusters_for_entries(count, per) > chain.len() {
        return Err(dir_corruption(
            io,
            head,
            format!(
                "count {count} needs more than the {} chained clusters",
                chain.len()
            ),
        ));
    }

    let mut out = Vec::with_capacity(count as usize);
    let mut remaining = count as usize;
    for cluster in chain {
        if remaining == 0 {
            break;
        }
        let data = io.read_cluster(cluster)?;
        let slots = decode_slots(&data, remaining.min(per as usize));
        remaining -= slots.len();
        let short = slots.len() < per as usize && remaining > 0;
        out.extend(slots);
        if short {
            return Err(dir_corruption(
                io,
                head,
                format!("zero slot in cluster {cluster} before {count} entries"),
            ));
        }
    }
    Ok(out)
}

/// Whether appending one more child needs a new cluster. Fails when the
/// stored count does not fit the chain.
pub fn insert_needs_cluster<D: ByteDevice>(io: &VolumeIo<D>, head: ClusterIndex) -> Result<bool> {
    let per = slots_per_cluster(io.layout().cluster_size());
    let count = child_count(io, head)?;
    let chain = chain_clusters(io, head)?;
    let pos = slot_position(count, per);
    if pos.chain_pos > chain.len() {
        return Err(dir_corruption(
            io,
            head,
            format!("count {count} past the end of a {}-cluster chain", chain.len()),
        ));
    }
    Ok(pos.chain_pos == chain.len())
}

/// Append `child` to the directory, extending its chain when the tail
/// cluster is full. Returns the child's slot number. The child's record is
/// not touched.
pub fn dir_insert<D: ByteDevice>(
    io: &VolumeIo<D>,
    sb: &mut Superblock,
    head: ClusterIndex,
    child: RecordIndex,
) -> Result<u32> {
    if child.is_root() {
        return Err(dir_corruption(
            io,
            head,
            "root record cannot be a child".to_owned(),
        ));
    }
    let per = slots_per_cluster(io.layout().cluster_size());
    let count = child_count(io, head)?;
    let mut chain = chain_clusters(io, head)?;
    let pos = slot_position(count, per);

    if pos.chain_pos == chain.len() {
        let tail = chain.last().copied();
        chain.push(allocate_cluster(io, sb, tail)?);
    } else if pos.chain_pos > chain.len() {
        return Err(dir_corruption(
            io,
            head,
            format!("count {count} past the end of a {}-cluster chain", chain.len()),
        ));
    }

    io.write_cluster_word(chain[pos.chain_pos], pos.word, child.0)?;
    io.write_cluster_word(head, COUNT_WORD, count + 1)?;
    trace!(
        head = head.0,
        record = child.0,
        slot = count,
        "directory insert"
    );
    Ok(count)
}

/// Overwrite the child index stored at `slot`.
pub fn dir_replace<D: ByteDevice>(
    io: &VolumeIo<D>,
    head: ClusterIndex,
    slot: u32,
    child: RecordIndex,
) -> Result<()> {
    let per = slots_per_cluster(io.layout().cluster_size());
    let count = child_count(io, head)?;
    if slot >= count {
        return Err(dir_corruption(
            io,
            head,
            format!("slot {slot} out of {count} entries"),
        ));
    }
    let chain = chain_clusters(io, head)?;
    let pos = slot_position(slot, per);
    let cluster = chain.get(pos.chain_pos).copied().ok_or_else(|| {
        dir_corruption(io, head, format!("slot {slot} beyond directory chain"))
    })?;
    io.write_cluster_word(cluster, pos.word, child.0)
}

/// Chain cluster and word holding `slot`, after checking that the slot is
/// within the child count and stores `child`.
fn locate_child<D: ByteDevice>(
    io: &VolumeIo<D>,
    head: ClusterIndex,
    chain: &[ClusterIndex],
    count: u32,
    slot: u32,
    child: RecordIndex,
) -> Result<(ClusterIndex, u32)> {
    if slot >= count {
        return Err(dir_corruption(
            io,
            head,
            format!("slot {slot} out of {count} entries"),
        ));
    }
    let per = slots_per_cluster(io.layout().cluster_size());
    let pos = slot_position(slot, per);
    let cluster = chain.get(pos.chain_pos).copied().ok_or_else(|| {
        dir_corruption(io, head, format!("slot {slot} beyond directory chain"))
    })?;
    let stored = io.read_cluster_word(cluster, pos.word)?;
    if stored != child.0 {
        return Err(dir_corruption(
            io,
            head,
            format!("slot {slot} holds record {stored}, expected {child}"),
        ));
    }
    Ok((cluster, pos.word))
}

/// Check that `slot` of the directory holds `child`. Reads only.
pub fn check_slot<D: ByteDevice>(
    io: &VolumeIo<D>,
    head: ClusterIndex,
    slot: u32,
    child: RecordIndex,
) -> Result<()> {
    let count = child_count(io, head)?;
    let chain = chain_clusters(io, head)?;
    locate_child(io, head, &chain, count, slot, child).map(|_| ())
}

/// Remove `child` from `slot` by swapping the last entry into its place.
///
/// The moved child's record gets its new `parent_slot`. When the directory's
/// last chained cluster ends up empty it is released. Returns the record
/// that was moved, if any. Nothing is written when `slot` does not hold
/// `child`.
pub fn dir_remove<D: ByteDevice>(
    io: &VolumeIo<D>,
    sb: &mut Superblock,
    head: ClusterIndex,
    child: RecordIndex,
    slot: u32,
) -> Result<Option<RecordIndex>> {
    let per = slots_per_cluster(io.layout().cluster_size());
    let count = child_count(io, head)?;
    let chain = chain_clusters(io, head)?;
    let (hole_cluster, hole_word) = locate_child(io, head, &chain, count, slot, child)?;
    let word_at = |entry: u32| -> Result<(ClusterIndex, u32)> {
        let pos = slot_position(entry, per);
        chain
            .get(pos.chain_pos)
            .map(|c| (*c, pos.word))
            .ok_or_else(|| {
                dir_corruption(io, head, format!("slot {entry} beyond directory chain"))
            })
    };

    let last = count - 1;
    let (last_cluster, last_word) = word_at(last)?;
    let mut moved = None;
    if slot != last {
        let tail_child = RecordIndex(io.read_cluster_word(last_cluster, last_word)?);
        io.write_cluster_word(hole_cluster, hole_word, tail_child.0)?;
        let mut record = io.read_record(tail_child)?;
        record.parent_slot = slot;
        io.write_record(tail_child, &record)?;
        moved = Some(tail_child);
    }
    io.write_cluster_word(last_cluster, last_word, 0)?;
    io.write_cluster_word(head, COUNT_WORD, last)?;

    let needed = clusters_for_entries(last, per);
    for &surplus in chain.iter().skip(needed).rev() {
        unlink_cluster(io, sb, surplus)?;
        debug!(
            head = head.0,
            cluster = surplus.0,
            "released empty directory cluster"
        );
    }
    trace!(
        head = head.0,
        record = child.0,
        slot,
        moved = moved.map(|m| m.0),
        "directory remove"
    );
    Ok(moved)
}

/// Find the child named `name` of the given kind.
pub fn find_child<D: ByteDevice>(
    io: &VolumeIo<D>,
    head: ClusterIndex,
    name: &str,
    kind: RecordKind,
) -> Result<Option<(RecordIndex, Record)>> {
    for index in dir_entries(io, head)? {
        let record = io.read_record(index)?;
        if record.kind == kind && record.name == name {
            return Ok(Some((index, record)));
        }
    }
    Ok(None)
}

/// Children with their decoded records, in slot order.
pub fn read_children<D: ByteDevice>(
    io: &VolumeIo<D>,
    head: ClusterIndex,
) -> Result<Vec<(RecordIndex, Record)>> {
    dir_entries(io, head)?
        .into_iter()
        .map(|index| io.read_record(index).map(|record| (index, record)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_block::MemoryByteDevice;
    use cfs_ondisk::{ChainEntry, Layout};
    use cfs_types::Timestamp;
    use proptest::prelude::*;

    // 16-byte clusters: three child slots per cluster.
    const CLUSTER: u32 = 16;

    fn fresh(reserved: u32) -> (VolumeIo<MemoryByteDevice>, Superblock) {
        let cs = ClusterSize::new(CLUSTER).unwrap();
        let layout = Layout::new(cs, reserved);
        let io = VolumeIo::new(
            MemoryByteDevice::zeroed(usize::try_from(layout.total_size()).unwrap()),
            layout,
        );
        let sb = Superblock {
            volume_name: "D".to_owned(),
            cluster_size: cs,
            volume_size: layout.total_size(),
            reserved_clusters: reserved,
            created: Timestamp::now(),
            defragmented: Timestamp::default(),
            next_cluster_hint: ClusterIndex(1),
            free_clusters: reserved - 1,
            next_record_hint: RecordIndex(1),
        };
        io.write_superblock(&sb).unwrap();
        io.write_chain_entry(ClusterIndex::ROOT, ChainEntry::SINGLETON).unwrap();
        let root = Record::new(
            "D",
            RecordKind::Directory,
            ClusterIndex::ROOT,
            None,
            Timestamp::now(),
        );
        io.write_record(RecordIndex::ROOT, &root).unwrap();
        (io, sb)
    }

    fn add_child(
        io: &VolumeIo<MemoryByteDevice>,
        sb: &mut Superblock,
        index: u32,
        name: &str,
    ) -> RecordIndex {
        let record_index = RecordIndex(index);
        let slot = dir_insert(io, sb, ClusterIndex::ROOT, record_index).unwrap();
        let mut record = Record::new(
            name,
            RecordKind::File,
            ClusterIndex(0),
            Some(RecordIndex::ROOT),
            Timestamp::now(),
        );
        record.parent_slot = slot;
        io.write_record(record_index, &record).unwrap();
        record_index
    }

    fn assert_slots_consistent(io: &VolumeIo<MemoryByteDevice>) {
        for (slot, index) in dir_entries(io, ClusterIndex::ROOT).unwrap().into_iter().enumerate() {
            let record = io.read_record(index).unwrap();
            assert_eq!(record.parent_slot as usize, slot, "{}", record.name);
        }
    }

    #[test]
    fn slot_mapping_skips_leading_word_in_every_cluster() {
        assert_eq!(slot_position(0, 3), SlotPosition { chain_pos: 0, word: 1 });
        assert_eq!(slot_position(2, 3), SlotPosition { chain_pos: 0, word: 3 });
        assert_eq!(slot_position(3, 3), SlotPosition { chain_pos: 1, word: 1 });
        assert_eq!(slot_position(7, 3), SlotPosition { chain_pos: 2, word: 2 });
        assert_eq!(clusters_for_entries(0, 3), 1);
        assert_eq!(clusters_for_entries(3, 3), 1);
        assert_eq!(clusters_for_entries(4, 3), 2);
        assert_eq!(slots_per_cluster(ClusterSize::new(4096).unwrap()), 1023);
    }

    #[test]
    fn decode_stops_at_zero_and_limit() {
        let mut cluster = vec![0_u8; 16];
        cluster[0..4].copy_from_slice(&2_u32.to_le_bytes());
        cluster[4..8].copy_from_slice(&5_u32.to_le_bytes());
        cluster[8..12].copy_from_slice(&9_u32.to_le_bytes());
        assert_eq!(
            decode_slots(&cluster, 3),
            vec![RecordIndex(5), RecordIndex(9)]
        );
        assert_eq!(decode_slots(&cluster, 1), vec![RecordIndex(5)]);
    }

    #[test]
    fn insert_extends_chain_when_tail_is_full() {
        let (io, mut sb) = fresh(16);
        for i in 1..=3 {
            add_child(&io, &mut sb, i, &format!("f{i}"));
        }
        assert_eq!(chain_clusters(&io, ClusterIndex::ROOT).unwrap().len(), 1);
        assert!(insert_needs_cluster(&io, ClusterIndex::ROOT).unwrap());
        assert_eq!(sb.free_clusters, 15);

        add_child(&io, &mut sb, 4, "f4");
        let chain = chain_clusters(&io, ClusterIndex::ROOT).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(sb.free_clusters, 14);
        // Chained cluster keeps its leading word zero.
        assert_eq!(io.read_cluster_word(chain[1], 0).unwrap(), 0);
        assert_eq!(io.read_cluster_word(chain[1], 1).unwrap(), 4);
        assert_eq!(child_count(&io, ClusterIndex::ROOT).unwrap(), 4);
        assert_eq!(
            dir_entries(&io, ClusterIndex::ROOT).unwrap(),
            (1..=4).map(RecordIndex).collect::<Vec<_>>()
        );
    }

    #[test]
    fn remove_swaps_last_entry_and_updates_its_slot() {
        let (io, mut sb) = fresh(16);
        for i in 1..=5 {
            add_child(&io, &mut sb, i, &format!("f{i}"));
        }
        let moved = dir_remove(&io, &mut sb, ClusterIndex::ROOT, RecordIndex(2), 1).unwrap();
        assert_eq!(moved, Some(RecordIndex(5)));
        assert_eq!(
            dir_entries(&io, ClusterIndex::ROOT).unwrap(),
            vec![RecordIndex(1), RecordIndex(5), RecordIndex(3), RecordIndex(4)]
        );
        assert_eq!(io.read_record(RecordIndex(5)).unwrap().parent_slot, 1);
        assert_slots_consistent(&io);

        // Removing the last entry moves nothing.
        let moved = dir_remove(&io, &mut sb, ClusterIndex::ROOT, RecordIndex(4), 3).unwrap();
        assert_eq!(moved, None);
        assert_eq!(child_count(&io, ClusterIndex::ROOT).unwrap(), 3);
    }

    #[test]
    fn remove_releases_emptied_tail_cluster() {
        let (io, mut sb) = fresh(16);
        for i in 1..=4 {
            add_child(&io, &mut sb, i, &format!("f{i}"));
        }
        let tail = chain_clusters(&io, ClusterIndex::ROOT).unwrap()[1];
        let free_before = sb.free_clusters;

        dir_remove(&io, &mut sb, ClusterIndex::ROOT, RecordIndex(1), 0).unwrap();
        assert_eq!(
            chain_clusters(&io, ClusterIndex::ROOT).unwrap(),
            vec![ClusterIndex::ROOT]
        );
        assert!(io.read_chain_entry(tail).unwrap().is_free());
        assert_eq!(sb.free_clusters, free_before + 1);
        assert_eq!(
            io.read_superblock().unwrap().free_clusters,
            sb.free_clusters
        );
        assert_slots_consistent(&io);
    }

    #[test]
    fn remove_rejects_mismatched_slot() {
        let (io, mut sb) = fresh(8);
        add_child(&io, &mut sb, 1, "a");
        add_child(&io, &mut sb, 2, "b");
        assert!(matches!(
            dir_remove(&io, &mut sb, ClusterIndex::ROOT, RecordIndex(2), 0),
            Err(CfsError::Corruption { .. })
        ));
        assert!(dir_remove(&io, &mut sb, ClusterIndex::ROOT, RecordIndex(2), 5).is_err());
        assert_eq!(child_count(&io, ClusterIndex::ROOT).unwrap(), 2);
    }

    #[test]
    fn check_slot_reads_without_writing() {
        let (io, mut sb) = fresh(16);
        for i in 1..=4 {
            add_child(&io, &mut sb, i, &format!("f{i}"));
        }
        let before = io.device().snapshot();
        check_slot(&io, ClusterIndex::ROOT, 3, RecordIndex(4)).unwrap();
        assert!(matches!(
            check_slot(&io, ClusterIndex::ROOT, 1, RecordIndex(1)),
            Err(CfsError::Corruption { .. })
        ));
        assert!(check_slot(&io, ClusterIndex::ROOT, 4, RecordIndex(4)).is_err());
        assert!(dir_remove(&io, &mut sb, ClusterIndex::ROOT, RecordIndex(4), 0).is_err());
        assert_eq!(io.device().snapshot(), before);
    }

    #[test]
    fn find_child_matches_name_and_kind() {
        let (io, mut sb) = fresh(8);
        add_child(&io, &mut sb, 1, "same");
        let (index, record) = find_child(&io, ClusterIndex::ROOT, "same", RecordKind::File)
            .unwrap()
            .unwrap();
        assert_eq!(index, RecordIndex(1));
        assert_eq!(record.name, "same");
        assert!(
            find_child(&io, ClusterIndex::ROOT, "same", RecordKind::Directory)
                .unwrap()
                .is_none()
        );
        assert_eq!(read_children(&io, ClusterIndex::ROOT).unwrap().len(), 1);
    }

    #[test]
    fn replace_rewrites_slot_in_chained_cluster() {
        let (io, mut sb) = fresh(16);
        for i in 1..=4 {
            add_child(&io, &mut sb, i, &format!("f{i}"));
        }
        dir_replace(&io, ClusterIndex::ROOT, 3, RecordIndex(9)).unwrap();
        assert_eq!(
            dir_entries(&io, ClusterIndex::ROOT).unwrap()[3],
            RecordIndex(9)
        );
        assert!(dir_replace(&io, ClusterIndex::ROOT, 4, RecordIndex(9)).is_err());
    }

    #[test]
    fn count_past_chain_is_corruption() {
        let (io, _sb) = fresh(8);
        io.write_cluster_word(ClusterIndex::ROOT, 0, 7).unwrap();
        assert!(matches!(
            dir_entries(&io, ClusterIndex::ROOT),
            Err(CfsError::Corruption { .. })
        ));
        assert!(matches!(
            insert_needs_cluster(&io, ClusterIndex::ROOT),
            Err(CfsError::Corruption { .. })
        ));
    }

    proptest! {
        #[test]
        fn slot_positions_are_unique_and_in_range(per in 1_u32..64, count in 0_u32..512) {
            let mut seen = std::collections::HashSet::new();
            let clusters = clusters_for_entries(count, per);
            for entry in 0..count {
                let pos = slot_position(entry, per);
                prop_assert!(pos.word >= 1 && pos.word <= per);
                prop_assert!(pos.chain_pos < clusters);
                prop_assert!(seen.insert((pos.chain_pos, pos.word)));
            }
        }

        #[test]
        fn random_insert_remove_keeps_array_packed(ops in proptest::collection::vec(any::<bool>(), 1..40)) {
            let (io, mut sb) = fresh(64);
            let mut live: Vec<RecordIndex> = Vec::new();
            let mut next = 1_u32;
            for insert in ops {
                if insert || live.is_empty() {
                    live.push(add_child(&io, &mut sb, next, &format!("n{next}")));
                    next += 1;
                } else {
                    let victim = live.remove(0);
                    let slot = io.read_record(victim).unwrap().parent_slot;
                    dir_remove(&io, &mut sb, ClusterIndex::ROOT, victim, slot).unwrap();
                    io.zero_record(victim).unwrap();
                }
                let mut entries = dir_entries(&io, ClusterIndex::ROOT).unwrap();
                entries.sort();
                let mut expected = live.clone();
                expected.sort();
                prop_assert_eq!(entries, expected);
                let per = slots_per_cluster(sb.cluster_size);
                prop_assert_eq!(
                    chain_clusters(&io, ClusterIndex::ROOT).unwrap().len(),
                    clusters_for_entries(u32::try_from(live.len()).unwrap(), per)
                );
                assert_slots_consistent(&io);
            }
        }
    }
}
