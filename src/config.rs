//! Global configuration constants for quiver.
//!
//! Compile-time defaults and validation limits. Per-collection tuning is
//! done through [`IndexOptions`](crate::types::IndexOptions) at creation
//! time; these constants supply its defaults.

/// Default number of bidirectional links per HNSW node in upper layers.
///
/// Layer 0 uses `2 * M`. Higher values improve recall at the cost of memory
/// and build time; 64 targets 100K+ vector collections (~91-92% recall@10).
/// For small collections (<10K vectors), 16-32 is usually enough.
pub const HNSW_DEFAULT_M: usize = 64;

/// Default beam width during HNSW index construction.
///
/// Size of the dynamic candidate list while inserting. Higher values
/// produce a better graph but slow down builds.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default beam width during HNSW search.
///
/// Higher values improve recall at the cost of latency. Overridable
/// per call via the `_with_ef` search variants.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 200;

/// Default initial capacity of an HNSW index.
///
/// The index grows past this by doubling when an insert would exceed it.
pub const HNSW_DEFAULT_MAX_ELEMENTS: usize = 1_000_000;

/// Maximum number of layers in the HNSW graph.
///
/// Level draws above this are clamped; with `ml = 1/ln(M)` the cap is
/// effectively unreachable for realistic collection sizes.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Maximum embedding dimension accepted from a WAL record.
///
/// Bounds the allocation a single record can force while replaying an
/// untrusted log; anything larger fails the read as a bad record.
pub const WAL_MAX_DIMENSION: u32 = 65_536;

/// Maximum worker threads a batch search fans out onto.
pub const SEARCH_BATCH_MAX_THREADS: usize = 8;
