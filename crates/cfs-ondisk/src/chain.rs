use cfs_types::{CHAIN_ENTRY_SIZE, ClusterIndex, ParseError, SENTINEL, read_le_u32};
use serde::{Deserialize, Serialize};

use crate::put_u32;

/// One slot of the cluster chain table: doubly linked `{next, prev}`.
///
/// `SENTINEL` marks the chain head (`prev`) or tail (`next`). An entry with
/// both fields zero is free; no live entry can look like that because
/// cluster 0 is the root head and is never anybody's successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChainEntry {
    pub next: u32,
    pub prev: u32,
}

impl ChainEntry {
    pub const FREE: Self = Self { next: 0, prev: 0 };
    pub const SINGLETON: Self = Self {
        next: SENTINEL,
        prev: SENTINEL,
    };

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            next: read_le_u32(bytes, 0)?,
            prev: read_le_u32(bytes, 4)?,
        })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; CHAIN_ENTRY_SIZE] {
        let mut buf = [0_u8; CHAIN_ENTRY_SIZE];
        put_u32(&mut buf, 0, self.next);
        put_u32(&mut buf, 4, self.prev);
        buf
    }

    /// Slot is unallocated.
    #[must_use]
    pub fn is_free(self) -> bool {
        self == Self::FREE
    }

    #[must_use]
    pub fn is_head(self) -> bool {
        !self.is_free() && self.prev == SENTINEL
    }

    #[must_use]
    pub fn is_tail(self) -> bool {
        !self.is_free() && self.next == SENTINEL
    }

    #[must_use]
    pub fn next_cluster(self) -> Option<ClusterIndex> {
        (!self.is_free() && self.next != SENTINEL).then_some(ClusterIndex(self.next))
    }

    #[must_use]
    pub fn prev_cluster(self) -> Option<ClusterIndex> {
        (!self.is_free() && self.prev != SENTINEL).then_some(ClusterIndex(self.prev))
    }

    #[must_use]
    pub fn linked(prev: Option<ClusterIndex>, next: Option<ClusterIndex>) -> Self {
        Self {
            next: next.map_or(SENTINEL, |c| c.0),
            prev: prev.map_or(SENTINEL, |c| c.0),
        }
    }
}
