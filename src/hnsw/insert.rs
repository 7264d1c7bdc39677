//! HNSW insertion.
//!
//! Inserts place a node on a geometrically drawn level, descend greedily
//! from the entry point, collect candidates with an `ef_construction` beam
//! per layer, and wire bidirectional links chosen by heuristic neighbor
//! selection (Algorithm 4 of the HNSW paper). When a neighbor's list
//! overflows its cap, the same heuristic re-prunes it and the reverse edges
//! of evicted neighbors are dropped too, so links stay symmetric.

use std::cell::RefCell;

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use crate::types::VectorId;

thread_local! {
    /// Reused visited set for inserts; avoids a per-insert allocation that
    /// grows with the node count.
    static INSERT_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

impl HnswIndex {
    /// Inserts a vector under a caller-assigned id.
    ///
    /// Fails with `DimensionMismatch` for wrong-length vectors and
    /// `AlreadyExists` for ids already present (tombstoned ids included;
    /// re-insertion is not supported). On any error the graph is unchanged.
    pub fn insert(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if self.id_to_offset.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "vector {id} is already in the index"
            )));
        }
        self.ensure_capacity();

        let offset = self.node_count;
        let level = self.random_level();

        // First node becomes the entry point at its own level.
        let Some(entry_point) = self.entry_point else {
            self.push_node(id, vector, level, vec![Vec::new(); level + 1]);
            self.entry_point = Some(offset);
            self.max_layer = level;
            return Ok(());
        };

        let top = level.min(self.max_layer);

        let node_neighbors = INSERT_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.grow(self.node_count as usize);

            // Phase 1: greedy descent from the top layer to level + 1.
            let mut current = entry_point;
            for layer in (level + 1..=self.max_layer).rev() {
                let nearest = search_layer(
                    self,
                    vector,
                    std::slice::from_ref(&current),
                    1,
                    layer,
                    &mut visited,
                );
                if let Some(&(_, best)) = nearest.first() {
                    current = best;
                }
            }

            // Phase 2: beam search each layer from top down to 0, keeping
            // the heuristic-selected neighbors for the new node.
            let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
            let mut layer_entries: Vec<u32> = vec![current];
            for layer in (0..=top).rev() {
                let candidates = search_layer(
                    self,
                    vector,
                    &layer_entries,
                    self.ef_construction,
                    layer,
                    &mut visited,
                );
                let cap = if layer == 0 { self.m_max0 } else { self.m };
                let selected = select_neighbors_heuristic(self, &candidates, cap);
                node_neighbors[layer] = selected.iter().map(|&(_, n)| n).collect();

                // Candidates seed the next (lower) layer's beam.
                layer_entries.clear();
                layer_entries.extend(candidates.iter().map(|&(_, n)| n));
                if layer_entries.is_empty() {
                    layer_entries.push(entry_point);
                }
            }
            node_neighbors
        });

        self.push_node(id, vector, level, node_neighbors);

        // Phase 3: install reverse edges; re-prune any neighbor list that
        // overflows its cap, dropping reverse edges of evicted nodes.
        for layer in 0..=top {
            let cap = if layer == 0 { self.m_max0 } else { self.m };
            let own_neighbors: Vec<u32> = self.neighbors[offset as usize][layer].clone();
            for &neighbor in &own_neighbors {
                let nid = neighbor as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(offset);

                if self.neighbors[nid][layer].len() > cap {
                    let over: Vec<u32> = self.neighbors[nid][layer].clone();
                    let candidates: Vec<(f32, u32)> = over
                        .iter()
                        .map(|&c| {
                            let dist = self.metric.distance(self.vector(neighbor), self.vector(c));
                            (dist, c)
                        })
                        .collect();
                    let pruned = select_neighbors_heuristic(self, &candidates, cap);
                    let kept: Vec<u32> = pruned.iter().map(|&(_, n)| n).collect();
                    for &evicted in over.iter().filter(|n| !kept.contains(*n)) {
                        if let Some(list) = self.neighbors[evicted as usize].get_mut(layer) {
                            if let Some(pos) = list.iter().position(|&n| n == neighbor) {
                                list.swap_remove(pos);
                            }
                        }
                    }
                    self.neighbors[nid][layer] = kept;
                }
            }
        }

        // A node above the current top layer becomes the new entry point.
        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(offset);
        }

        Ok(())
    }
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// Walks candidates in ascending distance and accepts one only if no
/// already-accepted neighbor is strictly closer to it than the base node
/// is. This favors diverse directions over redundant near-duplicates and
/// keeps the graph navigable.
fn select_neighbors_heuristic(
    index: &HnswIndex,
    candidates: &[(f32, u32)],
    cap: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let metric = index.metric;
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(cap.min(sorted.len()));
    for &(dist_to_base, candidate) in &sorted {
        if selected.len() >= cap {
            break;
        }
        let candidate_vec = index.vector(candidate);
        let diverse = selected
            .iter()
            .all(|&(_, kept)| dist_to_base <= metric.distance(candidate_vec, index.vector(kept)));
        if diverse {
            selected.push((dist_to_base, candidate));
        }
    }
    selected
}
