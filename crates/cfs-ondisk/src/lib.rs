#![forbid(unsafe_code)]
//! On-disk structures for ChainFS volumes.
//!
//! Pure encoding crate: no I/O, no side effects. Decodes byte slices into the
//! superblock, cluster chain entries and records, encodes them back, and
//! computes where each of them lives in the volume file.

pub mod chain;
pub mod layout;
pub mod record;
pub mod superblock;

pub use chain::ChainEntry;
pub use layout::{Layout, SuperblockField};
pub use record::{Record, RecordKind, validate_record_name};
pub use superblock::Superblock;

// Encoders only ever write at compile-time field offsets inside fixed-size
// buffers, so these helpers index directly.

fn put_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

/// Write `name` as UTF-16LE into a `units`-wide zero-padded field,
/// truncating anything that does not fit.
fn put_utf16_padded(buf: &mut [u8], off: usize, units: usize, name: &str) {
    let field = &mut buf[off..off + units * 2];
    field.fill(0);
    for (slot, unit) in field.chunks_exact_mut(2).zip(name.encode_utf16()) {
        slot.copy_from_slice(&unit.to_le_bytes());
    }
}
