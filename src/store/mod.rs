//! Small namespaced key/value storage for values that must survive a reboot.
//!
//! Writes are staged by [`PersistentStore::set_u8`] and only become durable
//! after [`PersistentStore::commit`].

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use log::debug;
use thiserror::Error;

use crate::lock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("write of {namespace}/{key} rejected")]
    Write { namespace: String, key: String },
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store contents malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait PersistentStore: Send + Sync {
    fn get_u8(&self, namespace: &str, key: &str) -> Result<Option<u8>, StoreError>;
    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
}

type Namespaces = BTreeMap<String, BTreeMap<String, u8>>;

fn lookup(map: &Namespaces, namespace: &str, key: &str) -> Option<u8> {
    map.get(namespace).and_then(|keys| keys.get(key)).copied()
}

fn insert(map: &mut Namespaces, namespace: &str, key: &str, value: u8) {
    map.entry(namespace.to_string())
        .or_default()
        .insert(key.to_string(), value);
}

/// Volatile store, with switches to make reads or writes fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Namespaces>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(namespace: &str, key: &str, value: u8) -> Self {
        let store = Self::default();
        insert(&mut lock(&store.values), namespace, key, value);
        store
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn value(&self, namespace: &str, key: &str) -> Option<u8> {
        lookup(&lock(&self.values), namespace, key)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl PersistentStore for MemoryStore {
    fn get_u8(&self, namespace: &str, key: &str) -> Result<Option<u8>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.value(namespace, key))
    }

    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
        insert(&mut lock(&self.values), namespace, key, value);
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON file backed store. Staged writes live in memory until `commit`; a
/// failed commit drops them again.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    staged: Mutex<Namespaces>,
    committed: Mutex<Namespaces>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let staged = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("store: {} does not exist yet", path.display());
                Namespaces::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            committed: Mutex::new(staged.clone()),
            staged: Mutex::new(staged),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, namespaces: &Namespaces) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(namespaces)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistentStore for FileStore {
    fn get_u8(&self, namespace: &str, key: &str) -> Result<Option<u8>, StoreError> {
        Ok(lookup(&lock(&self.staged), namespace, key))
    }

    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<(), StoreError> {
        insert(&mut lock(&self.staged), namespace, key, value);
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut staged = lock(&self.staged);
        match self.write(&staged) {
            Ok(()) => {
                *lock(&self.committed) = staged.clone();
                debug!("store: committed {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                *staged = lock(&self.committed).clone();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_failures() {
        let store = MemoryStore::with_value("Network", "NetworkState", 1);
        assert_eq!(store.get_u8("Network", "NetworkState").unwrap(), Some(1));
        assert_eq!(store.get_u8("Network", "Other").unwrap(), None);

        store.fail_reads(true);
        assert!(matches!(
            store.get_u8("Network", "NetworkState"),
            Err(StoreError::Unavailable)
        ));

        store.fail_writes(true);
        assert!(store.set_u8("Network", "NetworkState", 0).is_err());
        assert!(store.commit().is_err());
        assert_eq!(store.value("Network", "NetworkState"), Some(1));
        assert_eq!(store.commits(), 0);
    }

    #[test]
    fn test_file_store_drops_failed_commit() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory never exists, so every write fails
        let path = dir.path().join("missing").join("state.json");

        let store = FileStore::open(&path).unwrap();
        store.set_u8("Network", "NetworkState", 1).unwrap();
        assert_eq!(store.get_u8("Network", "NetworkState").unwrap(), Some(1));

        assert!(matches!(store.commit(), Err(StoreError::Io(_))));
        assert_eq!(store.get_u8("Network", "NetworkState").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_u8("Network", "NetworkState").unwrap(), None);
        store.set_u8("Network", "NetworkState", 1).unwrap();
        drop(store);

        // Nothing was committed
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_u8("Network", "NetworkState").unwrap(), None);
        store.set_u8("Network", "NetworkState", 1).unwrap();
        store.commit().unwrap();
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_u8("Network", "NetworkState").unwrap(), Some(1));
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(FileStore::open(&path), Err(StoreError::Serde(_))));
    }
}
