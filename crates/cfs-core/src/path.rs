//! Path tokenizing.
//!
//! Paths are `/`-separated; `\` is accepted as well. Empty segments are
//! dropped, so `"/a//b/"`, `"a/b"` and `"\\a\\b"` all name the same record.
//! There is no `.` or `..` handling; such segments are invalid record names
//! and simply fail to resolve.

use cfs_error::{CfsError, Result};

const DELIMITERS: [char; 2] = ['/', '\\'];

/// Non-empty segments of `path`, in order. The root is the empty list.
#[must_use]
pub fn segments(path: &str) -> Vec<&str> {
    path.split(DELIMITERS).filter(|s| !s.is_empty()).collect()
}

/// Split `path` into its parent's segments and the final name.
///
/// Fails with `NotFound` when the path names the root, which has no parent.
pub fn split_leaf(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut segs = segments(path);
    let leaf = segs
        .pop()
        .ok_or_else(|| CfsError::NotFound(format!("{path:?} has no final component")))?;
    Ok((segs, leaf))
}

/// Canonical `/a/b` spelling of a segment list.
#[must_use]
pub fn join(segs: &[&str]) -> String {
    if segs.is_empty() {
        return "/".to_owned();
    }
    segs.iter().fold(String::new(), |mut out, seg| {
        out.push('/');
        out.push_str(seg);
        out
    })
}
