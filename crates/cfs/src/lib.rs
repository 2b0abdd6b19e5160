#![forbid(unsafe_code)]
//! ChainFS public API facade.
//!
//! Re-exports the volume session from `cfs-core` through a stable external
//! interface. Downstream tools (a CLI, a test harness) depend on this crate
//! rather than on the engine crates directly.

pub use cfs_core::*;
