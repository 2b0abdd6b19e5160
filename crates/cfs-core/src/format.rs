//! Volume creation and attach.

use std::io::ErrorKind;
use std::path::Path;

use cfs_block::{ByteDevice, FileByteDevice, VolumeIo, read_superblock_region};
use cfs_error::{CfsError, Result};
use cfs_ondisk::{ChainEntry, Layout, Record, RecordKind, Superblock};
use cfs_types::{
    ClusterIndex, ClusterSize, MAX_VOLUME_BYTES, RecordIndex, SUPERBLOCK_SIZE, Timestamp,
    VOLUME_NAME_UNITS, is_valid_name_charset,
};
use tracing::{info, warn};

use crate::{AttachOptions, FormatOptions, Volume};

/// Zero-fill granularity when clearing the metadata tables.
const ZERO_CHUNK: usize = 64 * 1024;

impl FormatOptions {
    /// Validate every parameter and compute the resulting layout.
    ///
    /// Nothing is touched on failure.
    pub fn layout(&self) -> Result<Layout> {
        let units = self.volume_name.encode_utf16().count();
        if units == 0 || units > VOLUME_NAME_UNITS {
            return Err(CfsError::Format(format!(
                "volume name must be 1..={VOLUME_NAME_UNITS} characters, got {units}"
            )));
        }
        if !is_valid_name_charset(&self.volume_name) {
            return Err(CfsError::Format(format!(
                "volume name {:?} contains reserved characters",
                self.volume_name
            )));
        }
        let cluster_size = ClusterSize::new(self.cluster_size).map_err(|err| {
            CfsError::Format(format!("cluster size {}: {err}", self.cluster_size))
        })?;
        if self.capacity == 0 {
            return Err(CfsError::Format("capacity must be positive".to_owned()));
        }
        let reserved = Layout::reserved_for_capacity(cluster_size, self.capacity)
            .ok_or_else(|| CfsError::Format(format!("capacity {} too large", self.capacity)))?;
        let layout = Layout::new(cluster_size, reserved);
        let total = layout.total_size();
        if total > MAX_VOLUME_BYTES {
            return Err(CfsError::Format(format!(
                "volume of {total} bytes exceeds the {MAX_VOLUME_BYTES}-byte limit"
            )));
        }
        Ok(layout)
    }

    /// Total bytes the formatted volume file occupies.
    pub fn volume_size(&self) -> Result<u64> {
        Ok(self.layout()?.total_size())
    }
}

fn fresh_superblock(options: &FormatOptions, layout: &Layout, now: Timestamp) -> Superblock {
    let reserved = layout.reserved_clusters();
    Superblock {
        volume_name: options.volume_name.clone(),
        cluster_size: layout.cluster_size(),
        volume_size: layout.total_size(),
        reserved_clusters: reserved,
        created: now,
        defragmented: Timestamp::default(),
        next_cluster_hint: ClusterIndex(1 % reserved),
        free_clusters: reserved - 1,
        next_record_hint: RecordIndex(1 % reserved),
    }
}

/// Write an empty volume: superblock, zeroed tables, root chain and record.
fn write_fresh<D: ByteDevice>(io: &VolumeIo<D>, sb: &Superblock) -> Result<()> {
    let layout = io.layout();
    let tables_end = layout.data_area_offset().0;
    let zeros = vec![0_u8; ZERO_CHUNK];
    let mut pos = Layout::CHAIN_TABLE_OFFSET;
    while pos < tables_end {
        let len = usize::try_from(tables_end - pos).map_or(ZERO_CHUNK, |n| n.min(ZERO_CHUNK));
        io.device().write_all_at(pos, &zeros[..len])?;
        pos += len as u64;
    }

    io.zero_cluster(ClusterIndex::ROOT)?;
    io.write_chain_entry(ClusterIndex::ROOT, ChainEntry::SINGLETON)?;
    let root = Record::new(
        &sb.volume_name,
        RecordKind::Directory,
        ClusterIndex::ROOT,
        None,
        sb.created,
    );
    io.write_record(RecordIndex::ROOT, &root)?;
    io.write_superblock(sb)?;
    io.sync()
}

impl Volume<FileByteDevice> {
    /// Create a new volume file at `path`.
    ///
    /// Refuses to overwrite an existing file. If any write fails after the
    /// file was created, the file is removed again.
    pub fn format(path: impl AsRef<Path>, options: &FormatOptions) -> Result<Self> {
        let path = path.as_ref();
        let layout = options.layout()?;
        if path.exists() {
            return Err(CfsError::Format(format!(
                "{} already exists",
                path.display()
            )));
        }
        let dev = FileByteDevice::create_new(path, layout.total_size()).map_err(|err| match err {
            CfsError::Io(io) if io.kind() == ErrorKind::AlreadyExists => {
                CfsError::Format(format!("{} already exists", path.display()))
            }
            other => other,
        })?;

        match Self::format_device_with_layout(dev, options, layout) {
            Ok(vol) => Ok(vol),
            Err(err) => {
                if let Err(cleanup) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %cleanup, "failed to remove partial volume");
                }
                Err(err)
            }
        }
    }

    /// Attach the volume file at `path` with default options.
    pub fn attach(path: impl AsRef<Path>) -> Result<Self> {
        Self::attach_with_options(path, &AttachOptions::default())
    }

    pub fn attach_with_options(path: impl AsRef<Path>, options: &AttachOptions) -> Result<Self> {
        let path = path.as_ref();
        let dev = FileByteDevice::open(path).map_err(|err| {
            CfsError::InvalidVolume(format!("cannot open {}: {err}", path.display()))
        })?;
        Self::attach_device(dev, options)
    }
}

impl<D: ByteDevice> Volume<D> {
    /// Format an already-open device. Its length must equal
    /// [`FormatOptions::volume_size`].
    pub fn format_device(dev: D, options: &FormatOptions) -> Result<Self> {
        let layout = options.layout()?;
        Self::format_device_with_layout(dev, options, layout)
    }

    fn format_device_with_layout(dev: D, options: &FormatOptions, layout: Layout) -> Result<Self> {
        if dev.len_bytes() != layout.total_size() {
            return Err(CfsError::Format(format!(
                "device holds {} bytes, volume needs {}",
                dev.len_bytes(),
                layout.total_size()
            )));
        }
        let io = VolumeIo::new(dev, layout);
        let sb = fresh_superblock(options, &layout, Timestamp::now());
        write_fresh(&io, &sb)?;
        info!(
            volume = %sb.volume_name,
            cluster_size = sb.cluster_size.get(),
            reserved = sb.reserved_clusters,
            bytes = sb.volume_size,
            "formatted volume"
        );
        Ok(Self { io, sb })
    }

    /// Attach a device holding a formatted volume.
    pub fn attach_device(dev: D, options: &AttachOptions) -> Result<Self> {
        let len = dev.len_bytes();
        if len < SUPERBLOCK_SIZE as u64 {
            return Err(CfsError::InvalidVolume(format!(
                "{len} bytes is smaller than a superblock"
            )));
        }
        let region = read_superblock_region(&dev)?;
        if !Superblock::has_signatures(&region) {
            return Err(CfsError::InvalidVolume("signature mismatch".to_owned()));
        }
        let sb = Superblock::parse_region(&region)
            .map_err(|err| CfsError::InvalidVolume(format!("superblock: {err}")))?;
        let layout = Layout::from_superblock(&sb);
        if sb.volume_size != len || layout.total_size() != len {
            return Err(CfsError::InvalidVolume(format!(
                "recorded size {} and geometry size {} disagree with file length {len}",
                sb.volume_size,
                layout.total_size()
            )));
        }

        let vol = Self {
            io: VolumeIo::new(dev, layout),
            sb,
        };
        if options.verify {
            let report = vol.verify()?;
            if let Some(issue) = report.issues.first() {
                return Err(CfsError::Corruption {
                    offset: 0,
                    detail: format!("{} consistency issues, first: {issue}", report.issues.len()),
                });
            }
        }
        info!(
            volume = %vol.sb.volume_name,
            free = vol.sb.free_clusters,
            reserved = vol.sb.reserved_clusters,
            "attached volume"
        );
        Ok(vol)
    }
}
