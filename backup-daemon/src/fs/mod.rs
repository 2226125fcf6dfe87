//! File system scanning.

pub mod snapshot;

pub use snapshot::{snapshot, Snapshot, WalkOptions};
