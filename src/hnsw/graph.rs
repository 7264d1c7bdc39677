//! HNSW graph structure.
//!
//! [`HnswIndex`] stores the multi-layer proximity graph in a
//! Struct-of-Arrays layout: one contiguous f32 arena for vector payloads,
//! with parallel arrays for neighbor lists, layer assignments, and
//! tombstone flags. Nodes are addressed internally by dense u32 offsets;
//! caller-visible u64 ids are translated through a pair of maps. This keeps
//! the cyclic graph free of ownership cycles and makes persistence a flat
//! walk over the arrays.

use std::collections::HashMap;

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::types::{IndexOptions, VectorId};

/// In-memory HNSW index over fixed-dimension f32 vectors.
///
/// Mutations require `&mut self` and must be serialized by the caller;
/// searches take `&self` and are safe to run concurrently.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) dimension: usize,
    pub(crate) metric: DistanceMetric,
    /// Neighbor capacity in upper layers; layer 0 holds `m_max0`.
    pub(crate) m: usize,
    pub(crate) m_max0: usize,
    pub(crate) ef_construction: usize,
    /// Logical capacity; doubled when an insert would exceed it.
    pub(crate) max_elements: usize,
    /// Vector arena, `node_count * dimension` floats.
    pub(crate) vectors: Vec<f32>,
    /// Per-node, per-layer neighbor offsets: `[node][layer][neighbor]`.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Top layer of each node.
    pub(crate) levels: Vec<u8>,
    /// Tombstone flags; deleted nodes stay in the graph for routing.
    pub(crate) deleted: Vec<bool>,
    pub(crate) id_to_offset: HashMap<VectorId, u32>,
    pub(crate) offset_to_id: Vec<VectorId>,
    /// Offset of the node with the highest layer, ties broken by age.
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
    pub(crate) node_count: u32,
}

impl HnswIndex {
    /// Creates an empty index.
    ///
    /// # Panics
    ///
    /// Panics if `dimension` is zero or `options.m < 2`; both make the
    /// graph degenerate and are construction bugs.
    pub fn new(dimension: usize, metric: DistanceMetric, options: &IndexOptions) -> Self {
        assert!(dimension > 0, "dimension must be > 0");
        assert!(options.m >= 2, "M must be >= 2");
        Self {
            dimension,
            metric,
            m: options.m,
            m_max0: options.m * 2,
            ef_construction: options.ef_construction.max(1),
            max_elements: options.max_elements.max(1),
            vectors: Vec::new(),
            neighbors: Vec::new(),
            levels: Vec::new(),
            deleted: Vec::new(),
            id_to_offset: HashMap::new(),
            offset_to_id: Vec::new(),
            entry_point: None,
            max_layer: 0,
            node_count: 0,
        }
    }

    /// Creates an empty index with default options.
    pub fn with_defaults(dimension: usize, metric: DistanceMetric) -> Self {
        Self::new(dimension, metric, &IndexOptions::default())
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of stored nodes, tombstoned nodes included.
    pub fn size(&self) -> usize {
        self.node_count as usize
    }

    /// Number of live (non-deleted) nodes.
    pub fn live_count(&self) -> usize {
        self.deleted.iter().filter(|&&d| !d).count()
    }

    /// `true` if the index holds no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }

    /// `true` if `id` was ever inserted (tombstoned ids included).
    pub fn contains(&self, id: VectorId) -> bool {
        self.id_to_offset.contains_key(&id)
    }

    /// Marks `id` as deleted. The node stays in the graph as a routing
    /// waypoint but is filtered from search results.
    pub fn mark_delete(&mut self, id: VectorId) -> Result<()> {
        let offset = self
            .id_to_offset
            .get(&id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("vector {id} is not in the index")))?;
        self.deleted[offset as usize] = true;
        Ok(())
    }

    /// Grows the logical capacity to `capacity`. No-op if already as large.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity <= self.max_elements {
            return;
        }
        self.max_elements = capacity;
        let nodes = self.node_count as usize;
        let extra = capacity - nodes;
        self.vectors.reserve(extra * self.dimension);
        self.neighbors.reserve(extra);
        self.levels.reserve(extra);
        self.deleted.reserve(extra);
        self.offset_to_id.reserve(extra);
    }

    /// Doubles the logical capacity when the next insert would exceed it.
    pub(crate) fn ensure_capacity(&mut self) {
        if (self.node_count as usize) < self.max_elements {
            return;
        }
        let grown = (self.max_elements * 2).max(self.max_elements + 1);
        tracing::debug!(
            from = self.max_elements,
            to = grown,
            "growing index capacity"
        );
        self.reserve(grown);
    }

    /// Vector payload of the node at `offset`.
    #[inline]
    pub(crate) fn vector(&self, offset: u32) -> &[f32] {
        let start = offset as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Tombstone flag of the node at `offset`.
    #[inline]
    pub(crate) fn is_deleted(&self, offset: u32) -> bool {
        self.deleted[offset as usize]
    }

    /// Draws a level from the geometric distribution with `ml = 1/ln(M)`,
    /// clamped to the layer cap.
    pub(crate) fn random_level(&self) -> usize {
        let ml = 1.0 / (self.m as f64).ln();
        let r: f64 = rand::random();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(config::HNSW_MAX_LAYERS - 1)
    }

    /// Appends a node's SoA fields and registers its id mapping.
    /// `neighbors` must hold one list per layer `0..=level`.
    pub(crate) fn push_node(
        &mut self,
        id: VectorId,
        vector: &[f32],
        level: usize,
        neighbors: Vec<Vec<u32>>,
    ) {
        debug_assert_eq!(neighbors.len(), level + 1);
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(neighbors);
        self.levels.push(level as u8);
        self.deleted.push(false);
        self.id_to_offset.insert(id, self.node_count);
        self.offset_to_id.push(id);
        self.node_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_options() -> IndexOptions {
        IndexOptions {
            max_elements: 4,
            m: 4,
            ef_construction: 32,
            ef_search: 32,
        }
    }

    #[test]
    fn new_empty_index() {
        let index = HnswIndex::with_defaults(128, DistanceMetric::Cosine);
        assert_eq!(index.dimension(), 128);
        assert_eq!(index.size(), 0);
        assert_eq!(index.live_count(), 0);
        assert!(index.is_empty());
        assert!(index.entry_point.is_none());
    }

    #[test]
    #[should_panic(expected = "dimension must be > 0")]
    fn zero_dimension_panics() {
        let _ = HnswIndex::with_defaults(0, DistanceMetric::L2);
    }

    #[test]
    fn mark_delete_keeps_node_in_size() {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, &small_options());
        index.insert(7, &[1.0, 0.0]).unwrap();
        index.insert(8, &[0.0, 1.0]).unwrap();
        assert_eq!(index.size(), 2);

        index.mark_delete(7).unwrap();
        assert_eq!(index.size(), 2, "tombstones still count toward size");
        assert_eq!(index.live_count(), 1);
        assert!(index.contains(7));
    }

    #[test]
    fn mark_delete_unknown_id_is_not_found() {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, &small_options());
        assert!(matches!(index.mark_delete(99), Err(Error::NotFound(_))));
    }

    #[test]
    fn capacity_doubles_when_exceeded() {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, &small_options());
        for i in 0..10u64 {
            index.insert(i, &[i as f32, 1.0]).unwrap();
        }
        assert_eq!(index.size(), 10);
        assert!(index.max_elements >= 10, "capacity must have grown");
    }

    #[test]
    fn reserve_never_shrinks() {
        let mut index = HnswIndex::new(2, DistanceMetric::L2, &small_options());
        index.reserve(100);
        assert_eq!(index.max_elements, 100);
        index.reserve(10);
        assert_eq!(index.max_elements, 100);
    }

    #[test]
    fn random_level_respects_cap() {
        let index = HnswIndex::with_defaults(4, DistanceMetric::Cosine);
        for _ in 0..200 {
            assert!(index.random_level() < config::HNSW_MAX_LAYERS);
        }
    }
}
