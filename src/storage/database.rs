//! Database: a registry of named collections.
//!
//! A [`Database`] owns every collection under one data directory. Opening
//! it loads any collection directory that carries a `meta.json`; closing
//! it (explicitly or on drop) checkpoints every persistent collection.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::collection::Collection;
use crate::storage::meta;
use crate::types::{ClientOptions, CollectionConfig, IndexOptions};

/// Top-level handle owning a set of named collections.
pub struct Database {
    data_dir: Option<PathBuf>,
    default_index_options: IndexOptions,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Opens a database, creating the data directory if configured and
    /// loading every collection already stored in it.
    pub fn open(options: ClientOptions) -> Result<Self> {
        if let Some(dir) = &options.data_dir {
            fs::create_dir_all(dir)?;
        }
        let db = Self {
            data_dir: options.data_dir,
            default_index_options: options.default_index_options,
            collections: RwLock::new(HashMap::new()),
        };
        db.load_existing_collections()?;
        Ok(db)
    }

    /// Opens a purely in-memory database. Nothing is persisted.
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            default_index_options: IndexOptions::default(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Configured data directory, if persistence is enabled.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn load_existing_collections(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let mut collections = self.collections.write();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !path.join(meta::META_FILE).exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match Collection::load(&path) {
                Ok(collection) => {
                    collections.insert(name, Arc::new(collection));
                }
                Err(err) => {
                    tracing::warn!(
                        collection = %name,
                        %err,
                        "skipping collection directory that failed to load"
                    );
                }
            }
        }
        if !collections.is_empty() {
            tracing::info!(count = collections.len(), "loaded existing collections");
        }
        Ok(())
    }

    /// Creates a collection with the database's default index options.
    pub fn create_collection(
        &self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<Arc<Collection>> {
        self.create_collection_with_options(name, config, self.default_index_options.clone())
    }

    /// Creates a collection with explicit index options.
    ///
    /// The collection is rooted at `<data_dir>/<name>` when persistence is
    /// configured. Duplicate names fail with `AlreadyExists`.
    pub fn create_collection_with_options(
        &self,
        name: &str,
        mut config: CollectionConfig,
        options: IndexOptions,
    ) -> Result<Arc<Collection>> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "collection '{name}' already exists"
            )));
        }
        if config.name.is_empty() {
            config.name = name.to_string();
        }

        let collection = match &self.data_dir {
            Some(dir) => Collection::with_persistence(config, options, &dir.join(name))?,
            None => Collection::with_options(config, options),
        };
        let collection = Arc::new(collection);
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// Returns a handle to the named collection.
    pub fn get_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("collection '{name}' not found")))
    }

    /// Drops a collection: releases the in-memory state and removes its
    /// directory when persisted.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        if self.collections.write().remove(name).is_none() {
            return Err(Error::NotFound(format!("collection '{name}' not found")));
        }
        if let Some(dir) = &self.data_dir {
            let path = dir.join(name);
            if path.exists() {
                fs::remove_dir_all(&path)?;
            }
        }
        tracing::debug!(collection = %name, "dropped collection");
        Ok(())
    }

    /// Names of all collections.
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// `true` if a collection with this name exists.
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    /// Checkpoints every persistent collection and clears the registry.
    pub fn close(&self) -> Result<()> {
        let mut collections = self.collections.write();
        for collection in collections.values() {
            collection.close()?;
        }
        collections.clear();
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let collections = std::mem::take(&mut *self.collections.write());
        for (name, collection) in collections {
            if let Err(err) = collection.close() {
                tracing::warn!(collection = %name, %err, "failed to close collection on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::DistanceMetric;
    use tempfile::TempDir;

    fn config(name: &str, dim: u32) -> CollectionConfig {
        CollectionConfig::new(name, dim, DistanceMetric::Cosine)
    }

    fn small_options() -> IndexOptions {
        IndexOptions {
            max_elements: 64,
            m: 8,
            ef_construction: 32,
            ef_search: 32,
        }
    }

    #[test]
    fn create_get_list_has() {
        let db = Database::in_memory();
        db.create_collection("alpha", config("alpha", 4)).unwrap();
        db.create_collection("beta", config("beta", 8)).unwrap();

        assert!(db.has_collection("alpha"));
        assert!(!db.has_collection("gamma"));
        let mut names = db.list_collections();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta"]);

        let alpha = db.get_collection("alpha").unwrap();
        assert_eq!(alpha.dimension(), 4);
    }

    #[test]
    fn duplicate_create_is_already_exists() {
        let db = Database::in_memory();
        db.create_collection("dup", config("dup", 4)).unwrap();
        assert!(matches!(
            db.create_collection("dup", config("dup", 4)),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn missing_lookup_is_not_found() {
        let db = Database::in_memory();
        assert!(matches!(
            db.get_collection("ghost"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            db.drop_collection("ghost"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn empty_config_name_inherits_registry_name() {
        let db = Database::in_memory();
        let collection = db
            .create_collection(
                "named",
                CollectionConfig {
                    name: String::new(),
                    dimensions: 4,
                    metric: DistanceMetric::L2,
                },
            )
            .unwrap();
        assert_eq!(collection.name(), "named");
    }

    #[test]
    fn drop_collection_removes_directory() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(ClientOptions {
            data_dir: Some(dir.path().to_path_buf()),
            default_index_options: small_options(),
        })
        .unwrap();
        let collection = db.create_collection("gone", config("gone", 4)).unwrap();
        collection.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        collection.close().unwrap();
        assert!(dir.path().join("gone").is_dir());

        db.drop_collection("gone").unwrap();
        assert!(!db.has_collection("gone"));
        assert!(!dir.path().join("gone").exists());
    }

    #[test]
    fn close_persists_and_reopen_loads() {
        let dir = TempDir::new().unwrap();
        let options = ClientOptions {
            data_dir: Some(dir.path().to_path_buf()),
            default_index_options: small_options(),
        };
        {
            let db = Database::open(options.clone()).unwrap();
            let articles = db
                .create_collection("articles", config("articles", 4))
                .unwrap();
            articles.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
            articles.insert(2, &[0.0, 1.0, 0.0, 0.0]).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(options).unwrap();
        assert!(db.has_collection("articles"));
        let articles = db.get_collection("articles").unwrap();
        assert_eq!(articles.size(), 2);
    }

    #[test]
    fn drop_checkpoints_collections() {
        let dir = TempDir::new().unwrap();
        let options = ClientOptions {
            data_dir: Some(dir.path().to_path_buf()),
            default_index_options: small_options(),
        };
        {
            let db = Database::open(options.clone()).unwrap();
            let c = db.create_collection("auto", config("auto", 2)).unwrap();
            c.insert(1, &[1.0, 0.0]).unwrap();
            // db dropped without an explicit close
        }
        let db = Database::open(options).unwrap();
        let c = db.get_collection("auto").unwrap();
        assert_eq!(c.size(), 1);
        assert!(!c.recovered_from_wal(), "drop saved a snapshot");
    }

    #[test]
    fn unloadable_directory_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("broken")).unwrap();
        fs::write(dir.path().join("broken").join("meta.json"), "{garbage").unwrap();

        let db = Database::open(ClientOptions {
            data_dir: Some(dir.path().to_path_buf()),
            default_index_options: small_options(),
        })
        .unwrap();
        assert!(!db.has_collection("broken"));
    }

    #[test]
    fn in_memory_database_has_no_data_dir() {
        let db = Database::in_memory();
        assert!(db.data_dir().is_none());
        let c = db.create_collection("mem", config("mem", 2)).unwrap();
        c.insert(1, &[0.5, 0.5]).unwrap();
        assert_eq!(c.size(), 1);
    }
}
