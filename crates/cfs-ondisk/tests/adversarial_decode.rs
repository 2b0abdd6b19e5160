#![forbid(unsafe_code)]

use cfs_ondisk::{ChainEntry, Record, RecordKind, Superblock};
use cfs_types::{
    ClusterIndex, ClusterSize, DateCode, ParseError, RecordIndex, TimeCode, Timestamp,
};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Default)]
struct ErrorCoverage {
    insufficient_data: u32,
    invalid_signature: u32,
    invalid_field: u32,
}

impl ErrorCoverage {
    fn observe(&mut self, err: &ParseError) {
        match err {
            ParseError::InsufficientData { .. } => self.insufficient_data += 1,
            ParseError::InvalidSignature { .. } => self.invalid_signature += 1,
            ParseError::InvalidField { .. } => self.invalid_field += 1,
        }
    }
}

/// Deterministic xorshift so the corpus is identical on every run.
struct Noise(u64);

impl Noise {
    fn next_byte(&mut self) -> u8 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0.to_le_bytes()[0]
    }

    fn fill(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next_byte()).collect()
    }
}

fn stamp() -> Timestamp {
    Timestamp {
        date: DateCode::new(2024, 12, 24).expect("date"),
        time: TimeCode::new(18, 0, 0).expect("time"),
    }
}

fn valid_superblock() -> Vec<u8> {
    Superblock {
        volume_name: "FUZZ".to_owned(),
        cluster_size: ClusterSize::new(512).expect("cluster size"),
        volume_size: 1 << 20,
        reserved_clusters: 64,
        created: stamp(),
        defragmented: Timestamp::default(),
        next_cluster_hint: ClusterIndex(1),
        free_clusters: 63,
        next_record_hint: RecordIndex(1),
    }
    .to_bytes()
    .to_vec()
}

fn valid_record() -> Vec<u8> {
    Record::new(
        "sample.dat",
        RecordKind::File,
        ClusterIndex(5),
        Some(RecordIndex(0)),
        stamp(),
    )
    .to_bytes()
    .to_vec()
}

fn corpus() -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    for (label, base) in [("superblock", valid_superblock()), ("record", valid_record())] {
        for cut in 0..base.len() {
            out.push((format!("{label}-truncated-{cut}"), base[..cut].to_vec()));
        }
        for pos in 0..base.len() {
            for bit in [0_u8, 3, 7] {
                let mut flipped = base.clone();
                flipped[pos] ^= 1 << bit;
                out.push((format!("{label}-flip-{pos}-{bit}"), flipped));
            }
        }
    }
    let mut noise = Noise(0x9E37_79B9_7F4A_7C15);
    for i in 0..256 {
        let len = usize::from(noise.next_byte()) % 128;
        out.push((format!("noise-{i}"), noise.fill(len)));
    }
    out
}

fn run_parser<T, F>(
    sample_name: &str,
    parser_name: &'static str,
    parser_hits: &mut BTreeMap<&'static str, u32>,
    coverage: &mut ErrorCoverage,
    parser: F,
) -> bool
where
    F: FnOnce() -> Result<T, ParseError>,
{
    *parser_hits.entry(parser_name).or_default() += 1;
    match catch_unwind(AssertUnwindSafe(parser)) {
        Ok(Ok(_)) => false,
        Ok(Err(err)) => {
            coverage.observe(&err);
            true
        }
        Err(_) => panic!("parser `{parser_name}` panicked on sample `{sample_name}`"),
    }
}

#[test]
fn adversarial_inputs_are_panic_free_and_exercise_parse_error_variants() {
    let samples = corpus();
    let mut parser_hits = BTreeMap::new();
    let mut coverage = ErrorCoverage::default();
    let mut rejected = 0_u32;

    for (name, bytes) in &samples {
        let mut sample_had_error = false;
        sample_had_error |= run_parser(
            name,
            "superblock_parse_region",
            &mut parser_hits,
            &mut coverage,
            || Superblock::parse_region(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "record_parse",
            &mut parser_hits,
            &mut coverage,
            || Record::parse(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "record_is_free_slot",
            &mut parser_hits,
            &mut coverage,
            || Record::is_free_slot(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "chain_entry_parse",
            &mut parser_hits,
            &mut coverage,
            || ChainEntry::parse(bytes),
        );
        let _ = Superblock::has_signatures(bytes);
        if sample_had_error {
            rejected += 1;
        }
    }

    assert_eq!(parser_hits.len(), 4);
    assert!(rejected > 0);
    assert!(coverage.insufficient_data > 0, "{coverage:?}");
    assert!(coverage.invalid_signature > 0, "{coverage:?}");
    assert!(coverage.invalid_field > 0, "{coverage:?}");
}

#[test]
fn every_superblock_signature_bit_is_checked() {
    let base = valid_superblock();
    for pos in (0..4).chain(60..64) {
        for bit in 0..8 {
            let mut flipped = base.clone();
            flipped[pos] ^= 1 << bit;
            assert!(
                matches!(
                    Superblock::parse_region(&flipped),
                    Err(ParseError::InvalidSignature { .. })
                ),
                "flip at byte {pos} bit {bit} was accepted"
            );
        }
    }
}
