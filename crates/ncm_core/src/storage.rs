//! Parameter storage contract
//!
//! The persistent backend is provided by the platform. The manager only
//! ever reads and writes individual keys, so a partial save can never
//! clobber fields it did not select.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::NcmError;

/// Storage-internal value encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageValue {
    /// Fixed-capacity string
    Str(String),
    /// Tagged raw integer
    Raw(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("stored value for {key} is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

impl From<StorageError> for NcmError {
    fn from(err: StorageError) -> Self {
        NcmError::External(err.to_string())
    }
}

/// Key/value persistence used by the parameter mapper
pub trait ParameterStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<StorageValue>, StorageError>;
    fn save(&self, key: &str, value: &StorageValue) -> Result<(), StorageError>;
}

/// Volatile store, used on hosts and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StorageValue>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<StorageValue> {
        self.entries.lock().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: StorageValue) {
        self.entries.lock().insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ParameterStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<StorageValue>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &StorageValue) -> Result<(), StorageError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("store is read-only".to_string()));
        }
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}
