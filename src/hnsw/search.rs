//! HNSW search: single-layer beam search and the multi-layer k-NN entry
//! point.
//!
//! The beam keeps two heaps: a min-heap of frontier candidates still to be
//! expanded and a bounded max-heap of the best results found so far. A
//! frontier candidate worse than the current worst retained result ends the
//! scan. Tombstoned nodes are traversed for routing but never reported.

use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;
use crate::types::SearchResult;

/// A frontier entry: negated distance so the std max-heap pops nearest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    offset: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A retained result: max-heap by distance so the worst is cheap to evict.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    offset: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Searches a single layer, returning up to `ef` nearest live nodes as
/// `(distance, offset)` pairs in ascending distance order.
///
/// `visited` is cleared on entry and reused across calls to avoid
/// reallocation.
pub(crate) fn search_layer(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.clear();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst retained distance; avoids a heap peek per neighbor.
    let mut worst = f32::MAX;

    for &entry in entry_points {
        if visited.insert(entry) {
            let dist = index.metric.distance(query, index.vector(entry));
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                offset: entry,
            });
            if !index.is_deleted(entry) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    offset: entry,
                });
                if results.len() >= ef {
                    worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let dist = -candidate.neg_distance.0;
        if results.len() >= ef && dist > worst {
            break;
        }

        let node = candidate.offset as usize;
        let Some(neighbor_list) = index.neighbors[node].get(layer) else {
            continue;
        };
        for &neighbor in neighbor_list {
            if !visited.insert(neighbor) {
                continue;
            }
            let dist = index.metric.distance(query, index.vector(neighbor));
            if results.len() < ef || dist < worst {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    offset: neighbor,
                });
                if !index.is_deleted(neighbor) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        offset: neighbor,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.offset))
        .collect()
}

impl HnswIndex {
    /// Approximate k-nearest-neighbor search.
    ///
    /// Descends greedily from the entry point to layer 1, then runs a
    /// layer-0 beam of width `max(ef, k)`. Returns at most `k` live nodes,
    /// best score first. Tombstoned nodes never appear in results.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be >= 1".into()));
        }
        let Some(entry_point) = self.entry_point else {
            return Ok(Vec::new());
        };
        let ef = ef.max(k);

        let mut visited = VisitedSet::new(self.node_count as usize);
        let mut current = entry_point;
        for layer in (1..=self.max_layer).rev() {
            let nearest = search_layer(
                self,
                query,
                std::slice::from_ref(&current),
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, best)) = nearest.first() {
                current = best;
            }
        }

        let mut found = search_layer(
            self,
            query,
            std::slice::from_ref(&current),
            ef,
            0,
            &mut visited,
        );
        found.truncate(k);
        Ok(found
            .into_iter()
            .map(|(dist, offset)| SearchResult {
                id: self.offset_to_id[offset as usize],
                score: self.metric.score(dist),
            })
            .collect())
    }
}
