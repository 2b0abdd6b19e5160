use cfs_types::{
    ClusterIndex, ClusterSize, DateCode, LEAD_SIGNATURE, ParseError, RecordIndex,
    SUPERBLOCK_SIZE, TAIL_SIGNATURE, TimeCode, Timestamp, VOLUME_NAME_UNITS, ensure_slice,
    read_le_u16, read_le_u32, read_le_u64, read_utf16_units, trim_nul_padded_utf16,
};
use serde::{Deserialize, Serialize};

use crate::layout::SuperblockField as F;
use crate::{put_u16, put_u32, put_u64, put_utf16_padded};

/// Volume header stored at offset 0.
///
/// `next_cluster_hint` and `next_record_hint` only say where a free-slot scan
/// should start; allocators re-validate them every time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub volume_name: String,
    pub cluster_size: ClusterSize,
    /// Total byte length of the volume file.
    pub volume_size: u64,
    pub reserved_clusters: u32,
    pub created: Timestamp,
    /// Zero date code until the first defragmentation.
    pub defragmented: Timestamp,
    pub next_cluster_hint: ClusterIndex,
    pub free_clusters: u32,
    pub next_record_hint: RecordIndex,
}

impl Superblock {
    /// Parse the 64-byte header region.
    pub fn parse_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let lead = read_le_u32(region, F::LeadSignature.offset())?;
        if lead != LEAD_SIGNATURE {
            return Err(ParseError::InvalidSignature {
                expected: LEAD_SIGNATURE,
                actual: lead,
            });
        }
        let tail = read_le_u32(region, F::TailSignature.offset())?;
        if tail != TAIL_SIGNATURE {
            return Err(ParseError::InvalidSignature {
                expected: TAIL_SIGNATURE,
                actual: tail,
            });
        }

        let cluster_size = ClusterSize::new(read_le_u32(region, F::ClusterSize.offset())?)?;
        let reserved_clusters = read_le_u32(region, F::ReservedClusters.offset())?;
        if reserved_clusters == 0 {
            return Err(ParseError::InvalidField {
                field: "reserved_clusters",
                reason: "volume has no clusters",
            });
        }
        let free_clusters = read_le_u32(region, F::FreeClusters.offset())?;
        if free_clusters >= reserved_clusters {
            // Cluster 0 always belongs to the root directory.
            return Err(ParseError::InvalidField {
                field: "free_clusters",
                reason: "exceeds reserved clusters",
            });
        }

        // Hints outside the table are harmless: scans wrap. Normalise them.
        let next_cluster = read_le_u32(region, F::NextClusterHint.offset())?;
        let next_record = read_le_u32(region, F::NextRecordHint.offset())?;

        let name_units: [u16; VOLUME_NAME_UNITS] =
            read_utf16_units(region, F::VolumeName.offset())?;

        Ok(Self {
            volume_name: trim_nul_padded_utf16(&name_units),
            cluster_size,
            volume_size: read_le_u64(region, F::VolumeSize.offset())?,
            reserved_clusters,
            created: Timestamp {
                date: DateCode(read_le_u16(region, F::CreationDate.offset())?),
                time: TimeCode(read_le_u16(region, F::CreationTime.offset())?),
            },
            defragmented: Timestamp {
                date: DateCode(read_le_u16(region, F::DefragDate.offset())?),
                time: TimeCode(read_le_u16(region, F::DefragTime.offset())?),
            },
            next_cluster_hint: ClusterIndex(next_cluster % reserved_clusters),
            free_clusters,
            next_record_hint: RecordIndex(next_record % reserved_clusters),
        })
    }

    /// Whether `region` starts and ends with the volume signatures.
    #[must_use]
    pub fn has_signatures(region: &[u8]) -> bool {
        ensure_slice(region, 0, SUPERBLOCK_SIZE).is_ok()
            && read_le_u32(region, F::LeadSignature.offset()) == Ok(LEAD_SIGNATURE)
            && read_le_u32(region, F::TailSignature.offset()) == Ok(TAIL_SIGNATURE)
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0_u8; SUPERBLOCK_SIZE];
        put_u32(&mut buf, F::LeadSignature.offset(), LEAD_SIGNATURE);
        put_utf16_padded(
            &mut buf,
            F::VolumeName.offset(),
            VOLUME_NAME_UNITS,
            &self.volume_name,
        );
        put_u32(&mut buf, F::ClusterSize.offset(), self.cluster_size.get());
        put_u64(&mut buf, F::VolumeSize.offset(), self.volume_size);
        put_u32(
            &mut buf,
            F::ReservedClusters.offset(),
            self.reserved_clusters,
        );
        put_u16(&mut buf, F::CreationDate.offset(), self.created.date.0);
        put_u16(&mut buf, F::CreationTime.offset(), self.created.time.0);
        put_u16(&mut buf, F::DefragDate.offset(), self.defragmented.date.0);
        put_u16(&mut buf, F::DefragTime.offset(), self.defragmented.time.0);
        put_u32(
            &mut buf,
            F::NextClusterHint.offset(),
            self.next_cluster_hint.0,
        );
        put_u32(&mut buf, F::FreeClusters.offset(), self.free_clusters);
        put_u32(
            &mut buf,
            F::NextRecordHint.offset(),
            self.next_record_hint.0,
        );
        put_u32(&mut buf, F::TailSignature.offset(), TAIL_SIGNATURE);
        buf
    }

    /// Clusters currently owned by some chain.
    #[must_use]
    pub fn used_clusters(&self) -> u32 {
        self.reserved_clusters - self.free_clusters
    }

    #[must_use]
    pub fn was_defragmented(&self) -> bool {
        !self.defragmented.date.is_unset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock {
            volume_name: "DATA".to_owned(),
            cluster_size: ClusterSize::new(4096).expect("cluster size"),
            volume_size: 4_200_064,
            reserved_clusters: 1000,
            created: Timestamp {
                date: DateCode::new(2025, 6, 1).expect("date"),
                time: TimeCode::new(8, 30, 0).expect("time"),
            },
            defragmented: Timestamp::default(),
            next_cluster_hint: ClusterIndex(1),
            free_clusters: 999,
            next_record_hint: RecordIndex(1),
        }
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let sb = sample();
        let bytes = sb.to_bytes();
        assert_eq!(&bytes[0..4], &LEAD_SIGNATURE.to_le_bytes());
        assert_eq!(&bytes[60..64], &TAIL_SIGNATURE.to_le_bytes());
        assert!(Superblock::has_signatures(&bytes));

        let parsed = Superblock::parse_region(&bytes).expect("parse");
        assert_eq!(parsed, sb);
        assert!(!parsed.was_defragmented());
        assert_eq!(parsed.used_clusters(), 1);
    }

    #[test]
    fn rejects_bad_signatures() {
        let mut bytes = sample().to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            Superblock::parse_region(&bytes),
            Err(ParseError::InvalidSignature { expected, .. }) if expected == LEAD_SIGNATURE
        ));

        let mut bytes = sample().to_bytes();
        bytes[63] ^= 0xFF;
        assert!(matches!(
            Superblock::parse_region(&bytes),
            Err(ParseError::InvalidSignature { expected, .. }) if expected == TAIL_SIGNATURE
        ));
        assert!(!Superblock::has_signatures(&bytes));
    }

    #[test]
    fn rejects_truncated_and_inconsistent_headers() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Superblock::parse_region(&bytes[..40]),
            Err(ParseError::InsufficientData { needed: 64, .. })
        ));

        let mut sb = sample();
        sb.free_clusters = 1000;
        assert!(matches!(
            Superblock::parse_region(&sb.to_bytes()),
            Err(ParseError::InvalidField {
                field: "free_clusters",
                ..
            })
        ));

        let mut bytes = sample().to_bytes();
        bytes[20..24].copy_from_slice(&4094_u32.to_le_bytes());
        assert!(matches!(
            Superblock::parse_region(&bytes),
            Err(ParseError::InvalidField {
                field: "cluster_size",
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_hints_wrap() {
        let mut sb = sample();
        sb.next_cluster_hint = ClusterIndex(1003);
        let parsed = Superblock::parse_region(&sb.to_bytes()).expect("parse");
        assert_eq!(parsed.next_cluster_hint, ClusterIndex(3));
    }
}
