//! Storage layer: collections, the database registry, the write-ahead log,
//! and snapshot serialization.
//!
//! Durability model: every mutation is appended to the collection's WAL
//! (CRC-32 framed, fsynced) before it touches the in-memory index;
//! snapshots checkpoint the index to disk and truncate the log; loading
//! restores the snapshot and replays whatever the log holds beyond it.

/// Collection orchestrator: WAL-before-index mutations, search, recovery.
pub mod collection;
/// Named collection registry with startup auto-load.
pub mod database;
/// `meta.json` / `metadata.json` serialization.
pub mod meta;
/// Write-ahead log wire format and file handle.
pub mod wal;

pub use collection::Collection;
pub use database::Database;
pub use meta::RecoveryMetadata;
pub use wal::{OperationType, Wal, WalEntry, WalHeader};
