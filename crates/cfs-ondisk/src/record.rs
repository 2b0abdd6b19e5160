use cfs_types::{
    ClusterIndex, DateCode, ParseError, RECORD_NAME_UNITS, RECORD_SIZE, RecordIndex, SENTINEL,
    TimeCode, Timestamp, ensure_slice, is_valid_name_charset, read_le_u16, read_le_u32,
    read_le_u64, read_utf16_units, trim_nul_padded_utf16,
};
use serde::{Deserialize, Serialize};

use crate::{put_u16, put_u32, put_u64, put_utf16_padded};

const OFF_NAME: usize = 0;
const OFF_CREATED_DATE: usize = 64;
const OFF_CREATED_TIME: usize = 66;
const OFF_FIRST_CLUSTER: usize = 68;
const OFF_MODIFIED_DATE: usize = 72;
const OFF_MODIFIED_TIME: usize = 74;
const OFF_SIZE: usize = 76;
const OFF_PARENT: usize = 84;
const OFF_PARENT_SLOT: usize = 88;
const OFF_IS_FILE: usize = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    File,
    Directory,
}

impl RecordKind {
    #[must_use]
    pub fn is_file(self) -> bool {
        self == Self::File
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

/// A file or directory entry in the record table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    /// Zero date code marks a free slot.
    pub created: Timestamp,
    /// Head of the record's own cluster chain.
    pub first_cluster: ClusterIndex,
    pub modified: Timestamp,
    /// Byte length for files; always 0 for directories.
    pub size: u64,
    /// `None` only for the root record.
    pub parent: Option<RecordIndex>,
    /// Position inside the parent's packed child array.
    pub parent_slot: u32,
    pub kind: RecordKind,
}

impl Record {
    #[must_use]
    pub fn new(
        name: &str,
        kind: RecordKind,
        first_cluster: ClusterIndex,
        parent: Option<RecordIndex>,
        now: Timestamp,
    ) -> Self {
        Self {
            name: name.to_owned(),
            created: now,
            first_cluster,
            modified: now,
            size: 0,
            parent,
            parent_slot: 0,
            kind,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, RECORD_SIZE)?;
        let units: [u16; RECORD_NAME_UNITS] = read_utf16_units(bytes, OFF_NAME)?;
        let kind = match bytes[OFF_IS_FILE] {
            0 => RecordKind::Directory,
            1 => RecordKind::File,
            _ => {
                return Err(ParseError::InvalidField {
                    field: "is_file",
                    reason: "flag must be 0 or 1",
                });
            }
        };
        let parent = read_le_u32(bytes, OFF_PARENT)?;

        Ok(Self {
            name: trim_nul_padded_utf16(&units),
            created: Timestamp {
                date: DateCode(read_le_u16(bytes, OFF_CREATED_DATE)?),
                time: TimeCode(read_le_u16(bytes, OFF_CREATED_TIME)?),
            },
            first_cluster: ClusterIndex(read_le_u32(bytes, OFF_FIRST_CLUSTER)?),
            modified: Timestamp {
                date: DateCode(read_le_u16(bytes, OFF_MODIFIED_DATE)?),
                time: TimeCode(read_le_u16(bytes, OFF_MODIFIED_TIME)?),
            },
            size: read_le_u64(bytes, OFF_SIZE)?,
            parent: (parent != SENTINEL).then_some(RecordIndex(parent)),
            parent_slot: read_le_u32(bytes, OFF_PARENT_SLOT)?,
            kind,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0_u8; RECORD_SIZE];
        put_utf16_padded(&mut buf, OFF_NAME, RECORD_NAME_UNITS, &self.name);
        put_u16(&mut buf, OFF_CREATED_DATE, self.created.date.0);
        put_u16(&mut buf, OFF_CREATED_TIME, self.created.time.0);
        put_u32(&mut buf, OFF_FIRST_CLUSTER, self.first_cluster.0);
        put_u16(&mut buf, OFF_MODIFIED_DATE, self.modified.date.0);
        put_u16(&mut buf, OFF_MODIFIED_TIME, self.modified.time.0);
        put_u64(&mut buf, OFF_SIZE, self.size);
        put_u32(
            &mut buf,
            OFF_PARENT,
            self.parent.map_or(SENTINEL, |parent| parent.0),
        );
        put_u32(&mut buf, OFF_PARENT_SLOT, self.parent_slot);
        buf[OFF_IS_FILE] = u8::from(self.kind.is_file());
        buf
    }

    /// Slot is unallocated (creation date never set).
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.created.date.is_unset()
    }

    /// Cheap free-slot check on raw bytes, without decoding the name.
    pub fn is_free_slot(bytes: &[u8]) -> Result<bool, ParseError> {
        Ok(read_le_u16(bytes, OFF_CREATED_DATE)? == 0)
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        !self.kind.is_file()
    }
}

/// Validate a record name: non-empty, no reserved characters, at most 32
/// UTF-16 code units.
pub fn validate_record_name(name: &str) -> Result<(), ParseError> {
    if !is_valid_name_charset(name) {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "empty, reserved, or contains a path delimiter",
        });
    }
    if name.encode_utf16().count() > RECORD_NAME_UNITS {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "longer than 32 UTF-16 code units",
        });
    }
    Ok(())
}
