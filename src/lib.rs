//! Incremental diff engine for packaged app bundles.
//!
//! Compares two package archives and emits a compact patch package: a delta
//! for the bundle payload, raw bytes for added files, and a manifest of
//! copies and deletions a client-side applier uses to rebuild the new
//! snapshot from the old one.

pub mod archive;
pub mod block_diff;
pub mod delta;
pub mod diff;
pub mod error;
pub mod manifest;
pub mod pack;
pub mod rolling_hash;
pub mod snapshot;
pub mod util;
pub mod writer;
