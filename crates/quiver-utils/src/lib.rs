//! Shared utilities for the quiver artifact client.
//!
//! - [`hash`]: the content-addressable integrity engine (per-file hashes,
//!   aggregate integrity digests and directory verification)
//! - [`version`]: semantic version validation, comparison and sorting
//! - [`fs`], [`path`], [`time`]: small filesystem, path and duration helpers

pub mod error;
pub mod fs;
pub mod hash;
pub mod path;
pub mod time;
pub mod version;
