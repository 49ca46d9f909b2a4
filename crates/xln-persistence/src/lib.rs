//! Write-ahead log and snapshot persistence for crash recovery (spec §4.6).
//!
//! This crate only captures, writes, reads, and verifies WAL entries and
//! snapshots — replaying them through entity replicas after a crash is the
//! scheduler's job (`xln-runtime`), not this crate's.

mod snapshot;
mod wal;

pub use snapshot::{
    latest_snapshot_at_or_below, read_snapshot, state_root, verify_integrity, write_snapshot, ReplicaSnapshot, Snapshot,
};
pub use wal::{Wal, WalEntry};
