//! Whole-volume consistency check.
//!
//! Cross-checks the chain table, the record table and every directory's
//! child array against each other and against the superblock's cached free
//! count. Read-only: findings are collected, never repaired.

use std::collections::HashMap;

use cfs_alloc::count_free;
use cfs_block::{ByteDevice, VolumeIo};
use cfs_dir::dir_entries;
use cfs_error::Result;
use cfs_ondisk::{Record, Superblock};
use cfs_types::{ClusterIndex, RecordIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// One violated volume invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConsistencyIssue {
    #[error("cluster {cluster}: successor {next} does not link back")]
    BrokenForwardLink { cluster: u32, next: u32 },

    #[error("cluster {cluster}: predecessor {prev} does not link forward")]
    BrokenBackLink { cluster: u32, prev: u32 },

    #[error("cluster {cluster}: link {link} outside the chain table")]
    LinkOutOfRange { cluster: u32, link: u32 },

    #[error("superblock counts {recorded} free clusters, table has {counted}")]
    FreeCountMismatch { recorded: u32, counted: u32 },

    #[error("record {record}: broken chain: {detail}")]
    BrokenChain { record: u32, detail: String },

    #[error("record {record}: head cluster {cluster} has a predecessor")]
    HeadHasPredecessor { record: u32, cluster: u32 },

    #[error("cluster {cluster} is claimed by records {first} and {second}")]
    SharedCluster { cluster: u32, first: u32, second: u32 },

    #[error("cluster {cluster} is allocated but belongs to no record")]
    OrphanCluster { cluster: u32 },

    #[error("record {record} does not decode: {detail}")]
    UnreadableRecord { record: u32, detail: String },

    #[error("directory {directory}: {detail}")]
    UnreadableDirectory { directory: u32, detail: String },

    #[error("directory {directory} slot {slot} references free record {child}")]
    DanglingChild { directory: u32, slot: u32, child: u32 },

    #[error("record {child} is listed in directory {directory} but names parent {claimed:?}")]
    WrongParent {
        child: u32,
        directory: u32,
        claimed: Option<u32>,
    },

    #[error("record {child} sits at slot {actual} but stores slot {recorded}")]
    WrongSlot { child: u32, actual: u32, recorded: u32 },

    #[error("record {record} is missing from its parent {parent:?}")]
    Unlisted { record: u32, parent: Option<u32> },

    #[error("record {record}: {size} bytes need {needed} clusters, chain has {actual}")]
    ShortChain {
        record: u32,
        size: u64,
        needed: u64,
        actual: u64,
    },

    #[error("directory {record} stores size {size}")]
    DirectoryWithSize { record: u32, size: u64 },

    #[error("root record: {0}")]
    BadRoot(String),
}

/// Outcome of [`check_volume`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub issues: Vec<ConsistencyIssue>,
    /// Free chain entries found by scanning the table.
    pub free_clusters_counted: u32,
    pub live_records: u32,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[allow(clippy::too_many_lines)]
pub fn check_volume<D: ByteDevice>(io: &VolumeIo<D>, sb: &Superblock) -> Result<ConsistencyReport> {
    let table = io.read_chain_table()?;
    let reserved = table.len();
    let cluster_size = io.layout().cluster_size();
    let mut issues = Vec::new();

    // Link symmetry.
    for (i, entry) in table.iter().enumerate() {
        if entry.is_free() {
            continue;
        }
        let cluster = i as u32;
        if let Some(next) = entry.next_cluster() {
            match table.get(next.as_usize()) {
                None => issues.push(ConsistencyIssue::LinkOutOfRange {
                    cluster,
                    link: next.0,
                }),
                Some(n) if n.is_free() || n.prev != cluster => {
                    issues.push(ConsistencyIssue::BrokenForwardLink {
                        cluster,
                        next: next.0,
                    });
                }
                Some(_) => {}
            }
        }
        if let Some(prev) = entry.prev_cluster() {
            match table.get(prev.as_usize()) {
                None => issues.push(ConsistencyIssue::LinkOutOfRange {
                    cluster,
                    link: prev.0,
                }),
                Some(p) if p.is_free() || p.next != cluster => {
                    issues.push(ConsistencyIssue::BrokenBackLink {
                        cluster,
                        prev: prev.0,
                    });
                }
                Some(_) => {}
            }
        }
    }

    let counted = count_free(&table);
    if counted != sb.free_clusters {
        issues.push(ConsistencyIssue::FreeCountMismatch {
            recorded: sb.free_clusters,
            counted,
        });
    }

    let mut records: Vec<Option<Record>> = Vec::with_capacity(reserved);
    for i in 0..sb.reserved_clusters {
        match io.read_record(RecordIndex(i)) {
            Ok(record) if !record.is_free() => records.push(Some(record)),
            Ok(_) => records.push(None),
            Err(err) => {
                issues.push(ConsistencyIssue::UnreadableRecord {
                    record: i,
                    detail: err.to_string(),
                });
                records.push(None);
            }
        }
    }
    let live = || {
        records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i as u32, r)))
    };

    match records.first().and_then(Option::as_ref) {
        None => issues.push(ConsistencyIssue::BadRoot("slot is free".to_owned())),
        Some(root) => {
            if !root.is_dir() {
                issues.push(ConsistencyIssue::BadRoot("not a directory".to_owned()));
            }
            if root.parent.is_some() {
                issues.push(ConsistencyIssue::BadRoot("has a parent".to_owned()));
            }
            if root.first_cluster != ClusterIndex::ROOT {
                issues.push(ConsistencyIssue::BadRoot(format!(
                    "head cluster is {}",
                    root.first_cluster
                )));
            }
        }
    }

    // Chain ownership.
    let mut owner: Vec<Option<u32>> = vec![None; reserved];
    for (index, record) in live() {
        let head = record.first_cluster.as_usize();
        match table.get(head) {
            None => {
                issues.push(ConsistencyIssue::BrokenChain {
                    record: index,
                    detail: format!("head {} outside the table", record.first_cluster),
                });
                continue;
            }
            Some(entry) if entry.is_free() => {
                issues.push(ConsistencyIssue::BrokenChain {
                    record: index,
                    detail: format!("head {} is free", record.first_cluster),
                });
                continue;
            }
            Some(entry) if !entry.is_head() => {
                issues.push(ConsistencyIssue::HeadHasPredecessor {
                    record: index,
                    cluster: record.first_cluster.0,
                });
            }
            Some(_) => {}
        }

        let mut length = 0_u64;
        let mut cur = head;
        loop {
            let seen = owner[cur];
            match seen {
                Some(first) if first == index => {
                    issues.push(ConsistencyIssue::BrokenChain {
                        record: index,
                        detail: format!("cycle at cluster {cur}"),
                    });
                    break;
                }
                Some(first) => {
                    issues.push(ConsistencyIssue::SharedCluster {
                        cluster: cur as u32,
                        first,
                        second: index,
                    });
                    break;
                }
                None => owner[cur] = Some(index),
            }
            length += 1;
            match table[cur].next_cluster() {
                None => break,
                Some(next) if next.as_usize() >= reserved => break,
                Some(next) if table[next.as_usize()].is_free() => {
                    issues.push(ConsistencyIssue::BrokenChain {
                        record: index,
                        detail: format!("cluster {cur} links to free cluster {next}"),
                    });
                    break;
                }
                Some(next) => cur = next.as_usize(),
            }
        }

        if record.is_file() {
            let needed = cluster_size.clusters_for(record.size);
            if length < needed {
                issues.push(ConsistencyIssue::ShortChain {
                    record: index,
                    size: record.size,
                    needed,
                    actual: length,
                });
            }
        } else if record.size != 0 {
            issues.push(ConsistencyIssue::DirectoryWithSize {
                record: index,
                size: record.size,
            });
        }
    }
    for (i, entry) in table.iter().enumerate() {
        if !entry.is_free() && owner[i].is_none() {
            issues.push(ConsistencyIssue::OrphanCluster { cluster: i as u32 });
        }
    }

    // Directory arrays against parent links.
    let mut listed: HashMap<u32, u32> = HashMap::new();
    for (index, record) in live().filter(|(_, r)| r.is_dir()) {
        let entries = match dir_entries(io, record.first_cluster) {
            Ok(entries) => entries,
            Err(err) => {
                issues.push(ConsistencyIssue::UnreadableDirectory {
                    directory: index,
                    detail: err.to_string(),
                });
                continue;
            }
        };
        for (slot, child) in entries.into_iter().enumerate() {
            let slot = slot as u32;
            match records.get(child.as_usize()) {
                Some(Some(c)) => {
                    if c.parent != Some(RecordIndex(index)) {
                        issues.push(ConsistencyIssue::WrongParent {
                            child: child.0,
                            directory: index,
                            claimed: c.parent.map(|p| p.0),
                        });
                    }
                    if c.parent_slot != slot {
                        issues.push(ConsistencyIssue::WrongSlot {
                            child: child.0,
                            actual: slot,
                            recorded: c.parent_slot,
                        });
                    }
                    listed.insert(child.0, index);
                }
                _ => issues.push(ConsistencyIssue::DanglingChild {
                    directory: index,
                    slot,
                    child: child.0,
                }),
            }
        }
    }
    for (index, record) in live().filter(|(i, _)| *i != 0) {
        if listed.get(&index).copied() != record.parent.map(|p| p.0) {
            issues.push(ConsistencyIssue::Unlisted {
                record: index,
                parent: record.parent.map(|p| p.0),
            });
        }
    }

    let live_records = u32::try_from(live().count()).unwrap_or(u32::MAX);
    for issue in &issues {
        warn!(%issue, "consistency issue");
    }
    debug!(
        issues = issues.len(),
        free = counted,
        records = live_records,
        "consistency check finished"
    );
    Ok(ConsistencyReport {
        issues,
        free_clusters_counted: counted,
        live_records,
    })
}
