//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor
//! index.
//!
//! The graph lives in a Struct-of-Arrays layout with a contiguous f32
//! vector arena and dense internal offsets; caller-visible u64 ids map
//! through a translation table. Insertion uses heuristic neighbor
//! selection with bidirectional links, deletion is a lazy tombstone that
//! keeps the node routable, and the whole graph round-trips through a
//! self-describing binary snapshot.

/// Distance metrics and f32 distance kernels.
pub mod distance;
/// Graph structure, configuration, and SoA storage.
pub mod graph;
/// Insertion with heuristic neighbor pruning.
pub mod insert;
/// Snapshot save/load for the graph.
pub mod persistence;
/// Layer beam search and k-NN entry points.
pub mod search;
/// Generation-stamped visited set for traversal.
pub mod visited;

pub use distance::DistanceMetric;
pub use graph::HnswIndex;
pub use visited::VisitedSet;
