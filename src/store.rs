//! The storage interface the registry persists through.
//!
//! The protocol doesn't mandate a storage engine; it asks for an opaque
//! key-value store and writes canonical byte blobs into it. An in-memory
//! implementation is included because every caller ends up wanting one, if
//! only for tests.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// An abstract key-value store. Values are opaque byte blobs; keys are
/// utf8 strings namespaced by the caller (the registry uses
/// `identity:<id>:<seq>`-style keys).
///
/// Implementation failures surface as [Error::StoreIo].
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value by key, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value under a key, overwriting any existing value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// A process-local key-value store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new, empty memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| Error::StoreIo(String::from("poisoned lock")))?;
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::StoreIo(String::from("poisoned lock")))?;
        guard.insert(String::from(key), Vec::from(value));
        Ok(())
    }
}
