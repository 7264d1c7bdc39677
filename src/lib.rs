//! # quiver
//!
//! An embedded vector database: fixed-dimension f32 vectors with optional
//! scalar metadata, approximate k-nearest-neighbor search over an HNSW
//! graph, and crash recovery through a CRC-protected write-ahead log.
//!
//! ## Features
//!
//! - **HNSW vector search** with heuristic neighbor selection, lazy
//!   deletion, and concurrent readers
//! - **Write-ahead logging** with per-record CRC-32 checksums and an
//!   fsync before every acknowledged mutation
//! - **Snapshots** (`meta.json` + `index.bin` + optional `metadata.json`)
//!   that checkpoint the index and truncate the log
//! - **Recovery** that replays post-snapshot log entries and resumes the
//!   LSN/TxID sequence without gaps
//!
//! ## Architecture
//!
//! ```text
//! Database → Collection → { HNSW index, WAL, metadata table }
//! Mutation: caller → collection (assign LSN/TxID) → WAL (fsync) → index
//! Read:     caller → collection → index            (no WAL, no counters)
//! Recovery: meta.json → index.bin → metadata.json → WAL replay
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use quiver::{ClientOptions, CollectionConfig, Database, DistanceMetric};
//!
//! # fn main() -> quiver::Result<()> {
//! let db = Database::open(ClientOptions {
//!     data_dir: Some("./data".into()),
//!     ..Default::default()
//! })?;
//! let articles = db.create_collection(
//!     "articles",
//!     CollectionConfig::new("articles", 384, DistanceMetric::Cosine),
//! )?;
//! articles.insert(1, &vec![0.1; 384])?;
//! let hits = articles.search(&vec![0.1; 384], 10)?;
//! println!("top hit: {:?}", hits.first());
//! db.close()?;
//! # Ok(())
//! # }
//! ```

mod binary;

/// Global tuning constants and validation limits.
pub mod config;
/// Error enum and `Result` alias.
pub mod error;
/// HNSW approximate nearest neighbor index.
pub mod hnsw;
/// Collections, database registry, WAL, and snapshots.
pub mod storage;
/// Identifiers, metadata values, configuration, and result shapes.
pub mod types;

pub use error::{Error, Result};
pub use hnsw::{DistanceMetric, HnswIndex};
pub use storage::{Collection, Database, OperationType, RecoveryMetadata, Wal, WalEntry, WalHeader};
pub use types::{
    BatchEntryResult, BatchInsertResult, ClientOptions, CollectionConfig, DataType, IndexOptions,
    IndexType, Metadata, MetadataValue, QueryHit, QueryResult, SearchResult, VectorId,
};
