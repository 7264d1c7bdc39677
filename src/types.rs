//! Core public types: identifiers, metadata values, configuration, and
//! search/insert result shapes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config;
use crate::error::Result;
use crate::hnsw::DistanceMetric;

/// Unique identifier for a vector within a collection. Assigned by the caller.
pub type VectorId = u64;

/// A typed scalar metadata value attached to a vector.
///
/// Serialized untagged so `metadata.json` stores bare JSON scalars.
/// JSON arrays, objects, and `null` are not representable and fail
/// deserialization; the storage layer surfaces that as corruption rather
/// than coercing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean value (`true` / `false`).
    Bool(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

/// Per-vector metadata: a mapping from string keys to scalar values.
pub type Metadata = HashMap<String, MetadataValue>;

/// Data types for vector storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit IEEE 754 floating point, the only supported payload type.
    Float32,
}

/// Index types for search acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    /// Hierarchical Navigable Small World graph index.
    #[serde(rename = "HNSW")]
    Hnsw,
}

/// A single search hit: vector id and its score under the collection metric.
///
/// Scores are "best first": descending similarity for Cosine/InnerProduct,
/// ascending squared distance for L2. Callers must not assume a sign.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Identifier of the matched vector.
    pub id: VectorId,
    /// Score under the collection's metric.
    pub score: f32,
}

/// A search hit joined with the vector's metadata, if any was set.
#[derive(Debug, Clone)]
pub struct QueryHit {
    /// Identifier of the matched vector.
    pub id: VectorId,
    /// Score under the collection's metric.
    pub score: f32,
    /// Metadata attached to the vector, absent if none was ever set.
    pub metadata: Option<Metadata>,
}

/// Result of a metadata-joined query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Matched vectors, best score first.
    pub hits: Vec<QueryHit>,
}

/// Configuration for a vector collection. Immutable after creation.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Collection name.
    pub name: String,
    /// Dimension of every vector in this collection. Must be > 0.
    pub dimensions: u32,
    /// Distance metric used for similarity computation.
    pub metric: DistanceMetric,
}

impl CollectionConfig {
    /// Creates a collection configuration.
    ///
    /// # Panics
    ///
    /// Panics if `dimensions` is zero. A zero-dimension collection can
    /// never hold a vector, so this is treated as a construction bug
    /// rather than a runtime error.
    pub fn new(name: impl Into<String>, dimensions: u32, metric: DistanceMetric) -> Self {
        assert!(dimensions > 0, "dimension must be > 0");
        Self {
            name: name.into(),
            dimensions,
            metric,
        }
    }
}

/// Tuning parameters for the HNSW index of a collection.
///
/// Defaults target large collections; see [`crate::config`] for guidance
/// on smaller datasets.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Initial capacity; the index grows by doubling when exceeded.
    pub max_elements: usize,
    /// Bidirectional links per node in upper layers (layer 0 uses `2 * m`).
    pub m: usize,
    /// Beam width during construction.
    pub ef_construction: usize,
    /// Default beam width during search.
    pub ef_search: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_elements: config::HNSW_DEFAULT_MAX_ELEMENTS,
            m: config::HNSW_DEFAULT_M,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
        }
    }
}

/// Options for opening a [`Database`](crate::storage::Database).
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Directory for storing collections. `None` disables persistence.
    pub data_dir: Option<PathBuf>,
    /// Default index configuration for newly created collections.
    pub default_index_options: IndexOptions,
}

/// Per-vector outcome of a batch insert.
#[derive(Debug)]
pub struct BatchEntryResult {
    /// Identifier the caller supplied for this record.
    pub id: VectorId,
    /// `Ok` if the vector was durably logged and indexed.
    pub status: Result<()>,
}

/// Outcome of [`Collection::insert_batch`](crate::storage::Collection::insert_batch).
///
/// `results` is index-aligned with the input batch so callers can see
/// which records succeeded and which failed, and why.
#[derive(Debug)]
pub struct BatchInsertResult {
    /// One entry per input record, in input order.
    pub results: Vec<BatchEntryResult>,
    /// Number of records inserted successfully.
    pub success_count: usize,
    /// Number of records that failed validation or insertion.
    pub failure_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_value_json_scalars() {
        let cases = [
            (MetadataValue::Bool(true), "true"),
            (MetadataValue::Integer(-7), "-7"),
            (MetadataValue::Float(0.5), "0.5"),
            (MetadataValue::String("dog".into()), "\"dog\""),
        ];
        for (value, expected) in cases {
            assert_eq!(serde_json::to_string(&value).unwrap(), expected);
        }
    }

    #[test]
    fn metadata_value_json_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), MetadataValue::String("image".into()));
        metadata.insert("score".into(), MetadataValue::Float(0.95));
        metadata.insert("views".into(), MetadataValue::Integer(42));
        metadata.insert("active".into(), MetadataValue::Bool(true));

        let json = serde_json::to_string(&metadata).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn metadata_value_rejects_unsupported_json() {
        for bad in ["null", "[1, 2]", "{\"nested\": 1}"] {
            assert!(
                serde_json::from_str::<MetadataValue>(bad).is_err(),
                "{bad} should not parse as a metadata scalar"
            );
        }
    }

    #[test]
    fn metadata_integer_not_coerced_to_float() {
        let value: MetadataValue = serde_json::from_str("3").unwrap();
        assert_eq!(value, MetadataValue::Integer(3));
        let value: MetadataValue = serde_json::from_str("3.0").unwrap();
        assert_eq!(value, MetadataValue::Float(3.0));
    }

    #[test]
    #[should_panic(expected = "dimension must be > 0")]
    fn zero_dimension_config_panics() {
        let _ = CollectionConfig::new("bad", 0, DistanceMetric::Cosine);
    }

    #[test]
    fn index_options_defaults() {
        let options = IndexOptions::default();
        assert_eq!(options.m, 64);
        assert_eq!(options.ef_construction, 200);
        assert_eq!(options.ef_search, 200);
        assert_eq!(options.max_elements, 1_000_000);
    }
}
