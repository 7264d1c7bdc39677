//! Collection orchestrator.
//!
//! A [`Collection`] binds the HNSW index, the write-ahead log, and the
//! scalar metadata table into a crash-consistent store. It owns the LSN
//! and TxID counters, routes every mutation through the WAL before the
//! index, checkpoints to a snapshot directory, and replays the log on
//! load.
//!
//! Mutations (`insert`, `insert_batch`, `remove`, `save`) must be
//! serialized by the caller; reads (`search`, `search_batch`, `query`)
//! may run concurrently with each other.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::{DistanceMetric, HnswIndex};
use crate::storage::meta::{self, RecoveryMetadata};
use crate::storage::wal::{OperationType, Wal, WalEntry, WalHeader};
use crate::types::{
    BatchEntryResult, BatchInsertResult, CollectionConfig, IndexOptions, Metadata, QueryHit,
    QueryResult, SearchResult, VectorId,
};

/// Mutable orchestrator state guarded by one mutex: both counters hold the
/// *next* value to assign and stay gap-free because failed WAL appends
/// roll them back.
#[derive(Debug)]
struct TxnState {
    lsn: u64,
    txid: u64,
    last_persisted_lsn: u64,
    recovered_from_wal: bool,
}

/// A named set of vectors sharing one dimension and metric, durably
/// backed by a WAL and snapshots when a persistence path is configured.
pub struct Collection {
    config: CollectionConfig,
    index_options: IndexOptions,
    index: RwLock<HnswIndex>,
    metadata: RwLock<HashMap<VectorId, Metadata>>,
    wal: Option<Wal>,
    persistence_path: Option<PathBuf>,
    state: Mutex<TxnState>,
}

impl Collection {
    /// Creates an in-memory collection with default index options.
    pub fn new(config: CollectionConfig) -> Self {
        Self::with_options(config, IndexOptions::default())
    }

    /// Creates an in-memory collection with custom index options.
    pub fn with_options(config: CollectionConfig, options: IndexOptions) -> Self {
        let index = HnswIndex::new(config.dimensions as usize, config.metric, &options);
        Self {
            config,
            index_options: options,
            index: RwLock::new(index),
            metadata: RwLock::new(HashMap::new()),
            wal: None,
            persistence_path: None,
            state: Mutex::new(TxnState {
                lsn: 1,
                txid: 1,
                last_persisted_lsn: 0,
                recovered_from_wal: false,
            }),
        }
    }

    /// Creates a WAL-backed collection rooted at `dir`.
    ///
    /// The `wal/` subdirectory and `db.wal` are created on the spot; a
    /// fresh log gets its header immediately so the first append never
    /// races the file format.
    pub fn with_persistence(
        config: CollectionConfig,
        options: IndexOptions,
        dir: &Path,
    ) -> Result<Self> {
        let wal = Wal::open(&dir.join(meta::WAL_DIR))?;
        if wal.is_empty()? {
            wal.write_header(&WalHeader::new())?;
        }
        let mut collection = Self::with_options(config, options);
        collection.wal = Some(wal);
        collection.persistence_path = Some(dir.to_path_buf());
        tracing::debug!(
            collection = %collection.config.name,
            dir = %dir.display(),
            "opened persistent collection"
        );
        Ok(collection)
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Declared vector dimension.
    pub fn dimension(&self) -> u32 {
        self.config.dimensions
    }

    /// Distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    /// Index options the collection was created with.
    pub fn index_options(&self) -> &IndexOptions {
        &self.index_options
    }

    /// Number of stored vectors, tombstoned ones included.
    pub fn size(&self) -> usize {
        self.index.read().size()
    }

    /// `true` if loading this collection replayed at least one WAL entry.
    pub fn recovered_from_wal(&self) -> bool {
        self.state.lock().recovered_from_wal
    }

    /// Next LSN that will be assigned to a mutation.
    pub fn current_lsn(&self) -> u64 {
        self.state.lock().lsn
    }

    /// Next TxID that will be assigned to a mutation.
    pub fn current_txid(&self) -> u64 {
        self.state.lock().txid
    }

    fn next_txn(&self) -> (u64, u64) {
        let mut state = self.state.lock();
        let pair = (state.lsn, state.txid);
        state.lsn += 1;
        state.txid += 1;
        pair
    }

    fn rollback_txn(&self, count: u64) {
        let mut state = self.state.lock();
        state.lsn -= count;
        state.txid -= count;
    }

    /// Inserts a vector: validate, assign LSN/TxID, log durably, index.
    ///
    /// A WAL failure rolls the counters back so the sequence stays
    /// gap-free; an index failure after a durable append surfaces as
    /// `Internal` and is reconciled by replay on the next load.
    pub fn insert(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        let dim = self.config.dimensions as usize;
        if vector.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        if self.index.read().contains(id) {
            return Err(Error::AlreadyExists(format!(
                "vector {id} already exists in collection '{}'",
                self.config.name
            )));
        }

        let (lsn, txid) = self.next_txn();
        if let Some(wal) = &self.wal {
            let entry = WalEntry::insert(lsn, txid, id, vector.to_vec());
            if let Err(err) = wal.append(&entry) {
                self.rollback_txn(1);
                return Err(err);
            }
        }

        self.index
            .write()
            .insert(id, vector)
            .map_err(|err| Error::Internal(format!("index insert failed for vector {id}: {err}")))
    }

    /// Inserts a batch with partial-success semantics.
    ///
    /// All records are validated upfront; the valid ones are logged with a
    /// single fsync, then indexed one by one. A WAL failure rolls the
    /// counters back by the number of logged records and fails the whole
    /// batch; a per-record index failure is reported in that record's slot
    /// without affecting the others.
    pub fn insert_batch(&self, batch: &[(VectorId, Vec<f32>)]) -> Result<BatchInsertResult> {
        let dim = self.config.dimensions as usize;

        let mut rejections: Vec<Option<Error>> = Vec::with_capacity(batch.len());
        {
            let index = self.index.read();
            let mut seen: HashSet<VectorId> = HashSet::with_capacity(batch.len());
            for (id, vector) in batch {
                let rejection = if vector.len() != dim {
                    Some(Error::DimensionMismatch {
                        expected: dim,
                        actual: vector.len(),
                    })
                } else if index.contains(*id) || !seen.insert(*id) {
                    Some(Error::AlreadyExists(format!(
                        "vector {id} already exists in collection '{}'",
                        self.config.name
                    )))
                } else {
                    None
                };
                rejections.push(rejection);
            }
        }

        let mut entries = Vec::with_capacity(batch.len());
        for (i, (id, vector)) in batch.iter().enumerate() {
            if rejections[i].is_none() {
                let (lsn, txid) = self.next_txn();
                entries.push(WalEntry::insert(lsn, txid, *id, vector.clone()));
            }
        }

        if let Some(wal) = &self.wal {
            if let Err(err) = wal.append_batch(&entries) {
                self.rollback_txn(entries.len() as u64);
                return Err(err);
            }
        }

        let mut results = Vec::with_capacity(batch.len());
        let mut success_count = 0;
        let mut failure_count = 0;
        let mut index = self.index.write();
        for (i, (id, vector)) in batch.iter().enumerate() {
            let status = match rejections[i].take() {
                Some(err) => Err(err),
                None => index.insert(*id, vector).map_err(|err| {
                    Error::Internal(format!("index insert failed for vector {id}: {err}"))
                }),
            };
            match &status {
                Ok(()) => success_count += 1,
                Err(_) => failure_count += 1,
            }
            results.push(BatchEntryResult { id: *id, status });
        }

        Ok(BatchInsertResult {
            results,
            success_count,
            failure_count,
        })
    }

    /// Removes a vector: log a DELETE, tombstone the node, erase metadata.
    ///
    /// Propagates `NotFound` from the index for unknown ids; a DELETE
    /// logged for an id the index rejects is harmless on replay, which
    /// ignores tombstone misses.
    pub fn remove(&self, id: VectorId) -> Result<()> {
        let (lsn, txid) = self.next_txn();
        if let Some(wal) = &self.wal {
            let entry = WalEntry::delete(lsn, txid, id);
            if let Err(err) = wal.append(&entry) {
                self.rollback_txn(1);
                return Err(err);
            }
        }

        self.index.write().mark_delete(id)?;
        self.metadata.write().remove(&id);
        Ok(())
    }

    /// Attaches scalar metadata to a vector id, replacing any prior value.
    /// Persisted at the next save; never WAL-logged.
    pub fn set_metadata(&self, id: VectorId, metadata: Metadata) {
        self.metadata.write().insert(id, metadata);
    }

    /// Metadata for `id`, if any was set.
    pub fn get_metadata(&self, id: VectorId) -> Option<Metadata> {
        self.metadata.read().get(&id).cloned()
    }

    /// k-NN search with the collection's default beam width.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.search_with_ef(query, k, self.index_options.ef_search)
    }

    /// k-NN search with an explicit beam width.
    pub fn search_with_ef(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<SearchResult>> {
        self.index.read().search(query, k, ef)
    }

    /// k-NN search joined with each hit's metadata.
    pub fn query(&self, query: &[f32], k: usize) -> Result<QueryResult> {
        let hits = self.search(query, k)?;
        let metadata = self.metadata.read();
        Ok(QueryResult {
            hits: hits
                .into_iter()
                .map(|hit| QueryHit {
                    id: hit.id,
                    score: hit.score,
                    metadata: metadata.get(&hit.id).cloned(),
                })
                .collect(),
        })
    }

    /// Evaluates many queries, fanning out across worker threads.
    ///
    /// All dimensions are validated upfront. Work is split over up to
    /// `min(available_parallelism, 8, queries)` scoped threads, each
    /// holding a read lock on the index; the call joins every worker
    /// before returning.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        ef: usize,
    ) -> Result<Vec<Vec<SearchResult>>> {
        let dim = self.config.dimensions as usize;
        for query in queries {
            if query.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: query.len(),
                });
            }
        }
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(config::SEARCH_BATCH_MAX_THREADS)
            .min(queries.len());

        if workers <= 1 {
            let index = self.index.read();
            return queries.iter().map(|q| index.search(q, k, ef)).collect();
        }

        let chunk_size = queries.len().div_ceil(workers);
        let per_chunk: Result<Vec<Vec<Vec<SearchResult>>>> = thread::scope(|scope| {
            let handles: Vec<_> = queries
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || -> Result<Vec<Vec<SearchResult>>> {
                        let index = self.index.read();
                        chunk.iter().map(|q| index.search(q, k, ef)).collect()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| Error::Internal("batch search worker panicked".into()))
                        .and_then(|result| result)
                })
                .collect()
        });

        let mut results = Vec::with_capacity(queries.len());
        for chunk in per_chunk? {
            results.extend(chunk);
        }
        Ok(results)
    }

    /// Checkpoints the collection into `dir`.
    ///
    /// Writes `meta.json` (with the recovery watermark), `index.bin`, and
    /// `metadata.json` when non-empty, then truncates the WAL: everything
    /// the log captured is now in the snapshot.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let mut state = self.state.lock();
        let recovery = RecoveryMetadata {
            last_persisted_lsn: state.lsn.saturating_sub(1),
            last_persisted_txid: state.txid.saturating_sub(1),
            clean_shutdown: true,
        };

        meta::write_meta(
            &dir.join(meta::META_FILE),
            &self.config,
            &self.index_options,
            &recovery,
        )?;
        self.index.read().save(&dir.join(meta::INDEX_FILE))?;

        let metadata = self.metadata.read();
        if !metadata.is_empty() {
            meta::write_metadata_table(&dir.join(meta::METADATA_FILE), &metadata)?;
        }
        drop(metadata);

        if let Some(wal) = &self.wal {
            wal.truncate()?;
        }
        state.last_persisted_lsn = recovery.last_persisted_lsn;
        tracing::info!(
            collection = %self.config.name,
            last_persisted_lsn = recovery.last_persisted_lsn,
            "saved collection"
        );
        Ok(())
    }

    /// Loads a collection from a snapshot directory and replays the WAL.
    ///
    /// Counters resume from the persisted watermark, then jump past the
    /// highest replayed entry. Parse errors in the log propagate; no
    /// guessing around corruption.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "collection directory does not exist: {}",
                dir.display()
            )));
        }
        let meta_path = dir.join(meta::META_FILE);
        if !meta_path.exists() {
            return Err(Error::NotFound(format!(
                "meta.json not found in {}",
                dir.display()
            )));
        }
        let (config, options, recovery) = meta::read_meta(&meta_path)?;

        let index_path = dir.join(meta::INDEX_FILE);
        if !index_path.exists() {
            return Err(Error::NotFound(format!(
                "index.bin not found in {}",
                dir.display()
            )));
        }
        let mut index = HnswIndex::load(&index_path)?;
        if index.dimension() != config.dimensions as usize {
            return Err(Error::Corruption(format!(
                "index dimension {} does not match meta.json dimensions {}",
                index.dimension(),
                config.dimensions
            )));
        }
        if index.metric() != config.metric {
            return Err(Error::Corruption(
                "index metric does not match meta.json metric".into(),
            ));
        }
        index.ef_construction = options.ef_construction.max(1);
        if options.max_elements > index.max_elements {
            index.max_elements = options.max_elements;
        }

        let metadata_path = dir.join(meta::METADATA_FILE);
        let metadata = if metadata_path.exists() {
            meta::read_metadata_table(&metadata_path)?
        } else {
            HashMap::new()
        };

        let wal = Wal::open(&dir.join(meta::WAL_DIR))?;
        if wal.is_empty()? {
            wal.write_header(&WalHeader::new())?;
        }

        let collection = Self {
            config,
            index_options: options,
            index: RwLock::new(index),
            metadata: RwLock::new(metadata),
            wal: Some(wal),
            persistence_path: Some(dir.to_path_buf()),
            state: Mutex::new(TxnState {
                lsn: recovery.last_persisted_lsn + 1,
                txid: recovery.last_persisted_txid + 1,
                last_persisted_lsn: recovery.last_persisted_lsn,
                recovered_from_wal: false,
            }),
        };
        collection.replay_wal(recovery.last_persisted_lsn)?;
        Ok(collection)
    }

    /// Saves to the configured persistence path; no-op for in-memory
    /// collections. Call before dropping the handle for an orderly
    /// shutdown; dropping without `close` models a crash and relies on
    /// WAL replay.
    pub fn close(&self) -> Result<()> {
        match self.persistence_path.clone() {
            Some(dir) => self.save(&dir),
            None => Ok(()),
        }
    }

    /// Replays WAL entries with `lsn > from_lsn` into the index.
    fn replay_wal(&self, from_lsn: u64) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let entries = match wal.read_all() {
            Ok(entries) => entries,
            // A missing or empty log means nothing to recover.
            Err(Error::Eof) => return Ok(()),
            Err(err) => return Err(err),
        };

        let mut state = self.state.lock();
        let mut index = self.index.write();
        let mut metadata = self.metadata.write();
        let mut next_lsn = state.lsn;
        let mut next_txid = state.txid;
        let mut replayed = 0u64;

        for entry in entries {
            if entry.lsn <= from_lsn {
                continue;
            }
            if entry.lsn >= next_lsn {
                next_lsn = entry.lsn + 1;
            }
            if entry.txid >= next_txid {
                next_txid = entry.txid + 1;
            }

            match entry.op {
                OperationType::Insert => {
                    index.insert(entry.vector_id, &entry.payload).map_err(|err| {
                        Error::Internal(format!(
                            "failed to replay insert for vector {}: {err}",
                            entry.vector_id
                        ))
                    })?;
                    replayed += 1;
                }
                OperationType::Delete => {
                    // the logged delete may target an id the snapshot never saw
                    let _ = index.mark_delete(entry.vector_id);
                    metadata.remove(&entry.vector_id);
                    replayed += 1;
                }
                _ => {}
            }
        }

        state.lsn = next_lsn;
        state.txid = next_txid;
        if replayed > 0 {
            state.recovered_from_wal = true;
            tracing::info!(
                collection = %self.config.name,
                replayed,
                next_lsn,
                "recovered collection from WAL"
            );
        }
        Ok(())
    }
}
