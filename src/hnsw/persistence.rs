//! On-disk persistence for the HNSW graph (`index.bin`).
//!
//! The format is self-describing: a fixed header carrying the graph
//! geometry, followed by one record per node in internal offset order.
//! Neighbor lists are stored as internal offsets, so loading is a single
//! pass that rebuilds the id maps as it goes. Writes go to a temp file
//! that is fsynced and renamed into place.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic (u32) | version (u16) | metric tag (u8) | dimension (u32) |
//! M (u32) | max_layer (u32) | entry_point id (u64, MAX = none) | count (u64)
//! per node:
//!   id (u64) | level (u8) | deleted (u8) | vector (f32 x dim)
//!   per layer 0..=level: neighbor count (u32) | offsets (u32 x count)
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::binary::{ByteReader, ByteWriter};
use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::HnswIndex;

/// Magic number for the index file: "QIDX".
const INDEX_MAGIC: u32 = 0x5149_4458;

/// Index format version this build reads and writes.
const INDEX_FORMAT_VERSION: u16 = 1;

/// Sentinel for "no entry point" in the header.
const NO_ENTRY_POINT: u64 = u64::MAX;

impl HnswIndex {
    /// Serializes the full graph to `path`.
    ///
    /// The bytes are written to a sibling temp file, fsynced, and renamed
    /// into place so a crash mid-save leaves the previous file intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = ByteWriter::with_capacity(
            64 + self.size() * (self.dimension * 4 + 16 + self.m_max0 * 4),
        );
        w.put_u32(INDEX_MAGIC);
        w.put_u16(INDEX_FORMAT_VERSION);
        w.put_u8(self.metric.tag());
        w.put_u32(self.dimension as u32);
        w.put_u32(self.m as u32);
        w.put_u32(self.max_layer as u32);
        let entry_id = self
            .entry_point
            .map_or(NO_ENTRY_POINT, |offset| self.offset_to_id[offset as usize]);
        w.put_u64(entry_id);
        w.put_u64(self.node_count as u64);

        for offset in 0..self.node_count {
            let node = offset as usize;
            w.put_u64(self.offset_to_id[node]);
            w.put_u8(self.levels[node]);
            w.put_u8(u8::from(self.deleted[node]));
            w.put_f32_slice(self.vector(offset));
            for layer in 0..=self.levels[node] as usize {
                let list = self.neighbors[node]
                    .get(layer)
                    .map_or(&[][..], |l| l.as_slice());
                w.put_u32(list.len() as u32);
                for &neighbor in list {
                    w.put_u32(neighbor);
                }
            }
        }

        let bytes = w.into_bytes();
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        tracing::info!(
            path = %path.display(),
            nodes = self.size(),
            bytes = bytes.len(),
            "saved index"
        );
        Ok(())
    }

    /// Reconstructs an index from a file written by [`save`](Self::save).
    ///
    /// Every structural field is validated: bad magic, truncation,
    /// out-of-bounds offsets, duplicate ids, or an unresolvable entry
    /// point fail with `Corruption`; an unknown format version fails with
    /// `VersionMismatch`. `ef_construction` is not part of the format and
    /// comes back at its default until the owner applies its own options.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        parse_index(&raw).map_err(|err| match err {
            // A short file is structural damage, not a clean end of stream.
            Error::Eof => Error::Corruption(format!("index file {} is truncated", path.display())),
            other => other,
        })
    }
}

fn parse_index(raw: &[u8]) -> Result<HnswIndex> {
    let mut r = ByteReader::new(raw);

    let magic = r.get_u32()?;
    if magic != INDEX_MAGIC {
        return Err(Error::Corruption(format!(
            "bad index magic: {magic:#010x}"
        )));
    }
    let version = r.get_u16()?;
    if version != INDEX_FORMAT_VERSION {
        return Err(Error::VersionMismatch {
            expected: INDEX_FORMAT_VERSION,
            actual: version,
        });
    }
    let metric_tag = r.get_u8()?;
    let metric = DistanceMetric::from_tag(metric_tag)
        .ok_or_else(|| Error::Corruption(format!("unknown metric tag {metric_tag}")))?;
    let dimension = r.get_u32()? as usize;
    if dimension == 0 {
        return Err(Error::Corruption("index dimension is zero".into()));
    }
    let m = r.get_u32()? as usize;
    if m < 2 {
        return Err(Error::Corruption(format!("implausible M value {m}")));
    }
    let max_layer = r.get_u32()? as usize;
    if max_layer >= config::HNSW_MAX_LAYERS {
        return Err(Error::Corruption(format!(
            "max layer {max_layer} exceeds layer cap"
        )));
    }
    let entry_id = r.get_u64()?;
    let count = r.get_u64()?;
    let count_usize = usize::try_from(count)
        .map_err(|_| Error::Corruption(format!("implausible node count {count}")))?;
    // Cheapest possible node record bounds the count a file of this size
    // can legitimately claim; rejects absurd counts before preallocating.
    let min_node_size = 14 + dimension * 4;
    if count_usize > r.remaining() / min_node_size {
        return Err(Error::Corruption(format!(
            "node count {count} exceeds what {} remaining bytes can hold",
            r.remaining()
        )));
    }

    let mut index = HnswIndex {
        dimension,
        metric,
        m,
        m_max0: m * 2,
        ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
        max_elements: count_usize.max(1),
        vectors: Vec::with_capacity(count_usize.saturating_mul(dimension)),
        neighbors: Vec::with_capacity(count_usize),
        levels: Vec::with_capacity(count_usize),
        deleted: Vec::with_capacity(count_usize),
        id_to_offset: HashMap::with_capacity(count_usize),
        offset_to_id: Vec::with_capacity(count_usize),
        entry_point: None,
        max_layer,
        node_count: 0,
    };

    for offset in 0..count_usize {
        let id = r.get_u64()?;
        let level = r.get_u8()? as usize;
        if level > max_layer {
            return Err(Error::Corruption(format!(
                "node {id} level {level} exceeds max layer {max_layer}"
            )));
        }
        let deleted_flag = r.get_u8()?;
        if deleted_flag > 1 {
            return Err(Error::Corruption(format!(
                "node {id} carries invalid deleted flag {deleted_flag}"
            )));
        }
        let vector = r.get_f32_vec(dimension)?;

        let mut layers = Vec::with_capacity(level + 1);
        for layer in 0..=level {
            let len = r.get_u32()? as usize;
            if len > count_usize {
                return Err(Error::Corruption(format!(
                    "node {id} layer {layer} neighbor count {len} exceeds node count"
                )));
            }
            let mut list = Vec::with_capacity(len);
            for _ in 0..len {
                let neighbor = r.get_u32()?;
                if neighbor as u64 >= count {
                    return Err(Error::Corruption(format!(
                        "node {id} references out-of-bounds neighbor {neighbor}"
                    )));
                }
                list.push(neighbor);
            }
            layers.push(list);
        }

        if index.id_to_offset.insert(id, offset as u32).is_some() {
            return Err(Error::Corruption(format!("duplicate vector id {id}")));
        }
        index.vectors.extend_from_slice(&vector);
        index.neighbors.push(layers);
        index.levels.push(level as u8);
        index.deleted.push(deleted_flag == 1);
        index.offset_to_id.push(id);
        index.node_count += 1;
    }

    if r.remaining() != 0 {
        return Err(Error::Corruption(format!(
            "{} trailing bytes after last node record",
            r.remaining()
        )));
    }

    if entry_id != NO_ENTRY_POINT {
        let offset = index.id_to_offset.get(&entry_id).copied().ok_or_else(|| {
            Error::Corruption(format!("entry point id {entry_id} is not a stored node"))
        })?;
        index.entry_point = Some(offset);
    } else if count != 0 {
        return Err(Error::Corruption(
            "non-empty index without an entry point".into(),
        ));
    }

    tracing::debug!(nodes = index.size(), dimension, "loaded index");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndexOptions;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn test_options() -> IndexOptions {
        IndexOptions {
            max_elements: 256,
            m: 8,
            ef_construction: 64,
            ef_search: 64,
        }
    }

    fn build_index(n: u64, dim: usize) -> HnswIndex {
        let mut rng = StdRng::seed_from_u64(17);
        let mut index = HnswIndex::new(dim, DistanceMetric::L2, &test_options());
        for i in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            index.insert(i, &v).unwrap();
        }
        index
    }

    #[test]
    fn save_load_round_trip_preserves_graph() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        let mut index = build_index(80, 8);
        index.mark_delete(3).unwrap();
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path).unwrap();
        assert_eq!(loaded.size(), index.size());
        assert_eq!(loaded.dimension(), index.dimension());
        assert_eq!(loaded.metric(), index.metric());
        assert_eq!(loaded.max_layer, index.max_layer);
        assert_eq!(loaded.entry_point, index.entry_point);
        assert_eq!(loaded.levels, index.levels);
        assert_eq!(loaded.deleted, index.deleted);
        assert_eq!(loaded.neighbors, index.neighbors);
        assert_eq!(loaded.vectors, index.vectors);
        assert_eq!(loaded.offset_to_id, index.offset_to_id);
    }

    #[test]
    fn round_trip_search_is_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        let index = build_index(100, 8);
        index.save(&path).unwrap();
        let loaded = HnswIndex::load(&path).unwrap();

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..10 {
            let query: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            let before = index.search(&query, 5, 50).unwrap();
            let after = loaded.search(&query, 5, 50).unwrap();
            assert_eq!(
                before.iter().map(|r| r.id).collect::<Vec<_>>(),
                after.iter().map(|r| r.id).collect::<Vec<_>>()
            );
            for (b, a) in before.iter().zip(&after) {
                assert!((b.score - a.score).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn empty_index_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        let index = HnswIndex::new(4, DistanceMetric::Cosine, &test_options());
        index.save(&path).unwrap();
        let loaded = HnswIndex::load(&path).unwrap();
        assert_eq!(loaded.size(), 0);
        assert!(loaded.entry_point.is_none());
    }

    #[test]
    fn bad_magic_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        let index = build_index(10, 4);
        index.save(&path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[0] ^= 0xFF;
        fs::write(&path, &raw).unwrap();
        assert!(matches!(
            HnswIndex::load(&path),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn unknown_version_is_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        build_index(5, 4).save(&path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[4] = 0xEE; // version low byte
        fs::write(&path, &raw).unwrap();
        assert!(matches!(
            HnswIndex::load(&path),
            Err(Error::VersionMismatch { expected: 1, .. })
        ));
    }

    #[test]
    fn truncated_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        build_index(20, 4).save(&path).unwrap();

        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..raw.len() / 2]).unwrap();
        assert!(matches!(
            HnswIndex::load(&path),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            HnswIndex::load(&dir.path().join("absent.bin")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn save_does_not_leave_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        build_index(10, 4).save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
