//! File and directory operations on an attached volume.
//!
//! Every operation validates its preconditions (existence, uniqueness,
//! root protection, free space) before the first write, so a rejected call
//! leaves the volume untouched.

use cfs_alloc::{
    allocate_cluster, chain_clusters, claim_record, find_free_record, free_chain, release_record,
};
use cfs_block::ByteDevice;
use cfs_dir::{
    check_slot, child_count, dir_insert, dir_remove, find_child, insert_needs_cluster, is_empty,
    read_children,
};
use cfs_error::{CfsError, Result};
use cfs_ondisk::{Record, RecordKind, validate_record_name};
use cfs_types::{RecordIndex, Timestamp};
use tracing::debug;

use crate::path::{join, segments, split_leaf};
use crate::{DirEntry, RecordStat, Volume};

impl<D: ByteDevice> Volume<D> {
    // ── Resolution ──────────────────────────────────────────────────────────

    fn root(&self) -> Result<Record> {
        self.io.read_record(RecordIndex::ROOT)
    }

    /// Walk `segs` from the root. Intermediate segments must be
    /// directories, the last one must be of `kind`.
    fn walk(&self, segs: &[&str], kind: RecordKind) -> Result<(RecordIndex, Record)> {
        if segs.is_empty() {
            return match kind {
                RecordKind::Directory => Ok((RecordIndex::ROOT, self.root()?)),
                RecordKind::File => Err(CfsError::NotFound("/ is not a file".to_owned())),
            };
        }
        let mut current = (RecordIndex::ROOT, self.root()?);
        for (i, seg) in segs.iter().enumerate() {
            let want = if i + 1 == segs.len() {
                kind
            } else {
                RecordKind::Directory
            };
            current = find_child(&self.io, current.1.first_cluster, seg, want)?
                .ok_or_else(|| CfsError::NotFound(format!("{} {}", want.as_str(), join(&segs[..=i]))))?;
        }
        Ok(current)
    }

    fn resolve(&self, path: &str, kind: RecordKind) -> Result<(RecordIndex, Record)> {
        self.walk(&segments(path), kind)
    }

    fn parent_of(&self, record: &Record) -> Result<(RecordIndex, Record)> {
        let parent = record.parent.ok_or(CfsError::ProtectedRecord)?;
        Ok((parent, self.io.read_record(parent)?))
    }

    fn check_name_free(&self, dir: &Record, name: &str, kind: RecordKind) -> Result<()> {
        if find_child(&self.io, dir.first_cluster, name, kind)?.is_some() {
            return Err(CfsError::NameConflict(name.to_owned()));
        }
        Ok(())
    }

    fn touch(&self, index: RecordIndex) -> Result<()> {
        let mut record = self.io.read_record(index)?;
        record.modified = Timestamp::now();
        self.io.write_record(index, &record)
    }

    /// Whether `candidate` is `ancestor` or lies below it.
    fn is_within(&self, candidate: RecordIndex, ancestor: RecordIndex) -> Result<bool> {
        let mut cur = Some(candidate);
        let mut steps = 0_u32;
        while let Some(index) = cur {
            if index == ancestor {
                return Ok(true);
            }
            steps += 1;
            if steps > self.sb.reserved_clusters {
                return Err(CfsError::Corruption {
                    offset: self.io.layout().record_position(candidate).0,
                    detail: format!("parent links above record {candidate} form a cycle"),
                });
            }
            cur = self.io.read_record(index)?.parent;
        }
        Ok(false)
    }

    // ── Create ──────────────────────────────────────────────────────────────

    fn create(&mut self, path: &str, kind: RecordKind) -> Result<RecordIndex> {
        let (parent_segs, name) = split_leaf(path)?;
        validate_record_name(name).map_err(|err| CfsError::InvalidName(format!("{name:?}: {err}")))?;
        let (parent_index, parent) = self.walk(&parent_segs, RecordKind::Directory)?;
        self.check_name_free(&parent, name, kind)?;

        let index = find_free_record(&self.io, &self.sb)?;
        let needed = 1 + u32::from(insert_needs_cluster(&self.io, parent.first_cluster)?);
        if needed > self.sb.free_clusters {
            return Err(CfsError::OutOfSpace);
        }

        let head = allocate_cluster(&self.io, &mut self.sb, None)?;
        let mut record = Record::new(name, kind, head, Some(parent_index), Timestamp::now());
        record.parent_slot = child_count(&self.io, parent.first_cluster)?;
        claim_record(&self.io, &mut self.sb, index, &record)?;
        let slot = dir_insert(&self.io, &mut self.sb, parent.first_cluster, index)?;
        if slot != record.parent_slot {
            record.parent_slot = slot;
            self.io.write_record(index, &record)?;
        }
        self.touch(parent_index)?;
        debug!(
            record = index.0,
            cluster = head.0,
            parent = parent_index.0,
            kind = kind.as_str(),
            path,
            "created"
        );
        Ok(index)
    }

    /// Create an empty file. Parent directories must exist.
    pub fn create_file(&mut self, path: &str) -> Result<RecordIndex> {
        self.create(path, RecordKind::File)
    }

    /// Create an empty directory. Parent directories must exist.
    pub fn create_dir(&mut self, path: &str) -> Result<RecordIndex> {
        self.create(path, RecordKind::Directory)
    }

    // ── Content ─────────────────────────────────────────────────────────────

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (index, record) = self.resolve(path, RecordKind::File)?;
        self.read_content(index, &record)
    }

    fn read_content(&self, index: RecordIndex, record: &Record) -> Result<Vec<u8>> {
        let cs = self.io.layout().cluster_size();
        let chain = chain_clusters(&self.io, record.first_cluster)?;
        let needed = cs.clusters_for(record.size);
        if (chain.len() as u64) < needed {
            return Err(CfsError::Corruption {
                offset: self.io.layout().record_position(index).0,
                detail: format!(
                    "record {index} claims {} bytes but owns {} clusters",
                    record.size,
                    chain.len()
                ),
            });
        }
        let size = usize::try_from(record.size).map_err(|_| {
            CfsError::Parse(format!(
                "file of {} bytes does not fit in memory",
                record.size
            ))
        })?;
        let mut out = Vec::with_capacity(size);
        for &cluster in chain.iter().take(usize::try_from(needed).unwrap_or(usize::MAX)) {
            let data = self.io.read_cluster(cluster)?;
            let take = (size - out.len()).min(data.len());
            out.extend_from_slice(&data[..take]);
        }
        Ok(out)
    }

    /// Write `data` at byte `offset` of the record's content, extending the
    /// chain as needed. The chain never shrinks. Returns the end offset.
    fn write_range(&mut self, index: RecordIndex, record: &Record, offset: u64, data: &[u8]) -> Result<u64> {
        let cs = self.io.layout().cluster_size();
        let cs_bytes = u64::from(cs.get());
        let end = offset + data.len() as u64;

        let mut chain = chain_clusters(&self.io, record.first_cluster)?;
        let required = cs.clusters_for(end).max(1);
        let missing = required.saturating_sub(chain.len() as u64);
        if missing > u64::from(self.sb.free_clusters) {
            return Err(CfsError::ContentTooLarge {
                requested: missing,
                available: u64::from(self.sb.free_clusters),
            });
        }
        for _ in 0..missing {
            let tail = chain.last().copied();
            chain.push(allocate_cluster(&self.io, &mut self.sb, tail)?);
        }

        let mut pos = offset;
        let mut rest = data;
        while !rest.is_empty() {
            let logical = usize::try_from(pos / cs_bytes)
                .map_err(|_| CfsError::Parse("write offset overflows usize".to_owned()))?;
            let within = (pos % cs_bytes) as usize;
            let take = rest.len().min(cs.as_usize() - within);
            let cluster = chain[logical];
            self.io.write_cluster_at(cluster, within, &rest[..take])?;
            pos += take as u64;
            rest = &rest[take..];
        }
        debug!(
            record = index.0,
            offset,
            bytes = data.len(),
            new_clusters = missing,
            "wrote content"
        );
        Ok(end)
    }

    /// Replace the file's content with `data`.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let (index, mut record) = self.resolve(path, RecordKind::File)?;
        record.size = self.write_range(index, &record, 0, data)?;
        record.modified = Timestamp::now();
        self.io.write_record(index, &record)
    }

    /// Append `data` after the file's current end. Clusters already written
    /// are kept; the last partial cluster is filled first.
    pub fn append_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let (index, mut record) = self.resolve(path, RecordKind::File)?;
        record.size = self.write_range(index, &record, record.size, data)?;
        record.modified = Timestamp::now();
        self.io.write_record(index, &record)
    }

    // ── Delete ──────────────────────────────────────────────────────────────

    /// Delete the record at `index`: zero and free its chain, remove it from
    /// its parent's child array, and zero its slot.
    pub fn delete_record(&mut self, index: RecordIndex) -> Result<()> {
        if index.is_root() {
            return Err(CfsError::ProtectedRecord);
        }
        if !self.io.layout().contains_record(index) || self.io.record_is_free(index)? {
            return Err(CfsError::NotFound(format!("record {index}")));
        }
        let record = self.io.read_record(index)?;
        if record.is_dir() && !is_empty(&self.io, record.first_cluster)? {
            return Err(CfsError::NotEmpty);
        }
        let (parent_index, parent) = self.parent_of(&record)?;
        check_slot(&self.io, parent.first_cluster, record.parent_slot, index)?;

        let released = free_chain(&self.io, &mut self.sb, record.first_cluster)?;
        dir_remove(
            &self.io,
            &mut self.sb,
            parent.first_cluster,
            index,
            record.parent_slot,
        )?;
        release_record(&self.io, &mut self.sb, index)?;
        self.touch(parent_index)?;
        debug!(record = index.0, name = %record.name, clusters = released, "deleted");
        Ok(())
    }

    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        let (index, _) = self.resolve(path, RecordKind::File)?;
        self.delete_record(index)
    }

    /// Delete an empty directory.
    pub fn delete_dir(&mut self, path: &str) -> Result<()> {
        let (index, _) = self.resolve(path, RecordKind::Directory)?;
        self.delete_record(index)
    }

    // ── Rename / move ───────────────────────────────────────────────────────

    fn rename(&mut self, path: &str, kind: RecordKind, new_name: &str) -> Result<()> {
        let (index, mut record) = self.resolve(path, kind)?;
        if index.is_root() {
            return Err(CfsError::ProtectedRecord);
        }
        validate_record_name(new_name)
            .map_err(|err| CfsError::InvalidName(format!("{new_name:?}: {err}")))?;
        if record.name == new_name {
            return Ok(());
        }
        let (_, parent) = self.parent_of(&record)?;
        self.check_name_free(&parent, new_name, kind)?;

        debug!(record = index.0, from = %record.name, to = new_name, "renamed");
        record.name = new_name.to_owned();
        record.modified = Timestamp::now();
        self.io.write_record(index, &record)
    }

    pub fn rename_file(&mut self, path: &str, new_name: &str) -> Result<()> {
        self.rename(path, RecordKind::File, new_name)
    }

    pub fn rename_dir(&mut self, path: &str, new_name: &str) -> Result<()> {
        self.rename(path, RecordKind::Directory, new_name)
    }

    fn relocate(&mut self, path: &str, kind: RecordKind, dest_dir: &str) -> Result<()> {
        let (index, mut record) = self.resolve(path, kind)?;
        if index.is_root() {
            return Err(CfsError::ProtectedRecord);
        }
        let (dest_index, dest) = self.resolve(dest_dir, RecordKind::Directory)?;
        let (old_parent_index, old_parent) = self.parent_of(&record)?;
        if old_parent_index == dest_index {
            return Ok(());
        }
        if record.is_dir() && self.is_within(dest_index, index)? {
            return Err(CfsError::InvalidMove(format!(
                "{} cannot move into itself or a descendant",
                join(&segments(path))
            )));
        }
        check_slot(
            &self.io,
            old_parent.first_cluster,
            record.parent_slot,
            index,
        )?;
        self.check_name_free(&dest, &record.name, kind)?;
        if insert_needs_cluster(&self.io, dest.first_cluster)? && self.sb.free_clusters == 0 {
            return Err(CfsError::OutOfSpace);
        }

        dir_remove(
            &self.io,
            &mut self.sb,
            old_parent.first_cluster,
            index,
            record.parent_slot,
        )?;
        let slot = dir_insert(&self.io, &mut self.sb, dest.first_cluster, index)?;
        record.parent = Some(dest_index);
        record.parent_slot = slot;
        record.modified = Timestamp::now();
        self.io.write_record(index, &record)?;
        self.touch(old_parent_index)?;
        self.touch(dest_index)?;
        debug!(
            record = index.0,
            from = old_parent_index.0,
            to = dest_index.0,
            slot,
            "moved"
        );
        Ok(())
    }

    /// Move a file into the directory `dest_dir`, keeping its name.
    pub fn move_file(&mut self, path: &str, dest_dir: &str) -> Result<()> {
        self.relocate(path, RecordKind::File, dest_dir)
    }

    /// Move a directory (with its subtree) into `dest_dir`.
    pub fn move_dir(&mut self, path: &str, dest_dir: &str) -> Result<()> {
        self.relocate(path, RecordKind::Directory, dest_dir)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Children of the directory at `path`, in slot order.
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let (_, dir) = self.resolve(path, RecordKind::Directory)?;
        Ok(read_children(&self.io, dir.first_cluster)?
            .into_iter()
            .map(|(index, record)| DirEntry::from_record(index, record))
            .collect())
    }

    pub fn stat(&self, path: &str, kind: RecordKind) -> Result<RecordStat> {
        let (index, record) = self.resolve(path, kind)?;
        let clusters = chain_clusters(&self.io, record.first_cluster)?.len();
        Ok(RecordStat {
            record: index,
            clusters: u32::try_from(clusters).unwrap_or(u32::MAX),
            name: record.name,
            kind: record.kind,
            size: record.size,
            first_cluster: record.first_cluster,
            parent: record.parent,
            created: record.created,
            modified: record.modified,
        })
    }

    /// Whether `path` resolves to a record of `kind`. Only `NotFound` maps
    /// to `false`; other failures propagate.
    pub fn exists(&self, path: &str, kind: RecordKind) -> Result<bool> {
        match self.resolve(path, kind) {
            Ok(_) => Ok(true),
            Err(CfsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
