//! JSON snapshot sidecars: `meta.json` and `metadata.json`.
//!
//! `meta.json` records the collection configuration, index parameters, and
//! the recovery watermark the loader compares WAL entries against.
//! `metadata.json` stores the per-vector scalar metadata table keyed by the
//! decimal form of each vector id; it is written only when non-empty.
//! Both files are replaced atomically via temp-file + rename.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::hnsw::DistanceMetric;
use crate::types::{CollectionConfig, DataType, IndexOptions, IndexType, Metadata, VectorId};

/// Collection configuration file name.
pub const META_FILE: &str = "meta.json";

/// Graph snapshot file name.
pub const INDEX_FILE: &str = "index.bin";

/// Scalar metadata table file name.
pub const METADATA_FILE: &str = "metadata.json";

/// WAL subdirectory name inside a collection directory.
pub const WAL_DIR: &str = "wal";

/// Recovery watermark persisted in `meta.json`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryMetadata {
    /// LSN of the last mutation captured by the snapshot.
    pub last_persisted_lsn: u64,
    /// TxID of the last mutation captured by the snapshot.
    pub last_persisted_txid: u64,
    /// Whether the snapshot was produced by an orderly save.
    pub clean_shutdown: bool,
}

impl Default for RecoveryMetadata {
    fn default() -> Self {
        Self {
            last_persisted_lsn: 0,
            last_persisted_txid: 0,
            clean_shutdown: true,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HnswSection {
    max_elements: u64,
    #[serde(rename = "M")]
    m: u64,
    ef_construction: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaFile {
    name: String,
    dimensions: u32,
    metric: DistanceMetric,
    dtype: DataType,
    idx_type: IndexType,
    hnsw: HnswSection,
    #[serde(default)]
    recovery: RecoveryMetadata,
}

/// Writes `meta.json` for a collection.
pub fn write_meta(
    path: &Path,
    config: &CollectionConfig,
    options: &IndexOptions,
    recovery: &RecoveryMetadata,
) -> Result<()> {
    let meta = MetaFile {
        name: config.name.clone(),
        dimensions: config.dimensions,
        metric: config.metric,
        dtype: DataType::Float32,
        idx_type: IndexType::Hnsw,
        hnsw: HnswSection {
            max_elements: options.max_elements as u64,
            m: options.m as u64,
            ef_construction: options.ef_construction as u64,
        },
        recovery: *recovery,
    };
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|err| Error::Internal(format!("failed to serialize meta.json: {err}")))?;
    write_atomic(path, json.as_bytes())
}

/// Reads and validates `meta.json`.
pub fn read_meta(path: &Path) -> Result<(CollectionConfig, IndexOptions, RecoveryMetadata)> {
    let raw = fs::read_to_string(path)?;
    let meta: MetaFile = serde_json::from_str(&raw)
        .map_err(|err| Error::Corruption(format!("malformed meta.json: {err}")))?;
    if meta.dimensions == 0 {
        return Err(Error::Corruption(
            "meta.json declares a zero dimension".into(),
        ));
    }
    if meta.hnsw.m < 2 {
        return Err(Error::Corruption(format!(
            "meta.json declares implausible M value {}",
            meta.hnsw.m
        )));
    }
    let config = CollectionConfig {
        name: meta.name,
        dimensions: meta.dimensions,
        metric: meta.metric,
    };
    let options = IndexOptions {
        max_elements: meta.hnsw.max_elements as usize,
        m: meta.hnsw.m as usize,
        ef_construction: meta.hnsw.ef_construction as usize,
        ef_search: IndexOptions::default().ef_search,
    };
    Ok((config, options, meta.recovery))
}

/// Writes the metadata table keyed by decimal vector id strings.
pub fn write_metadata_table(path: &Path, table: &HashMap<VectorId, Metadata>) -> Result<()> {
    // BTreeMap keeps the file diffable across saves
    let keyed: BTreeMap<String, &Metadata> = table
        .iter()
        .map(|(id, metadata)| (id.to_string(), metadata))
        .collect();
    let json = serde_json::to_string_pretty(&keyed)
        .map_err(|err| Error::Internal(format!("failed to serialize metadata.json: {err}")))?;
    write_atomic(path, json.as_bytes())
}

/// Reads the metadata table back.
///
/// Non-numeric keys and values outside the scalar union (arrays, nested
/// objects, null) fail with `Corruption` rather than being coerced.
pub fn read_metadata_table(path: &Path) -> Result<HashMap<VectorId, Metadata>> {
    let raw = fs::read_to_string(path)?;
    let keyed: HashMap<String, Metadata> = serde_json::from_str(&raw)
        .map_err(|err| Error::Corruption(format!("malformed metadata.json: {err}")))?;
    let mut table = HashMap::with_capacity(keyed.len());
    for (key, metadata) in keyed {
        let id: VectorId = key.parse().map_err(|_| {
            Error::Corruption(format!("metadata.json key '{key}' is not a vector id"))
        })?;
        table.insert(id, metadata);
    }
    Ok(table)
}

/// Replaces `path` atomically: write temp sibling, fsync, rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
