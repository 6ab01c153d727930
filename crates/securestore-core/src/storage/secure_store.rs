use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use thiserror::Error;

use crate::{
    cipher::{CipherError, MaskCipher, ValueCipher},
    entry::{EntryKey, InvalidKey, StoredValue},
};

/// Errors produced by secure store implementations.
///
/// None of the variants carry secret values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecureStoreError {
    /// Backing file exists but could not be read or parsed.
    #[error("cannot load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    /// Lock marker already held by another writer.
    #[error("cannot lock {path}")]
    Lock { path: PathBuf },
    /// Lock marker permissions could not be restricted; nothing was written.
    #[error("cannot restrict permissions on {path}: {reason}")]
    Permission { path: PathBuf, reason: String },
    /// Atomic rename of the lock marker over the target failed.
    #[error("cannot commit write to {path}: {reason}")]
    Commit { path: PathBuf, reason: String },
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),
    /// Value carries the cipher marker but does not decode.
    #[error("corrupt entry {key}: {reason}")]
    CorruptEntry { key: String, reason: String },
    #[error(transparent)]
    Cipher(#[from] CipherError),
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Keyed credential store with encode-on-write / decode-on-read semantics.
///
/// Every mutating call persists before returning; reads never touch disk.
pub trait SecureStore: Send + Sync {
    /// Single value for a key. On a list-valued key this is the first element.
    fn get(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<Option<String>, SecureStoreError>;

    /// All values for a key in stored order; `None` when the key is unset.
    fn get_list(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<Option<Vec<String>>, SecureStoreError>;

    /// Store a single value, or unset the key when `value` is `None`.
    fn set(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), SecureStoreError>;

    /// Store an ordered list, replacing any prior value. An empty slice stores
    /// an empty list; use [`SecureStore::unset`] to remove the key.
    fn set_list(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        values: &[String],
    ) -> Result<(), SecureStoreError>;

    /// Remove a key (idempotent).
    fn unset(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<(), SecureStoreError>;

    /// Every stored key. No values are decoded.
    fn list(&self) -> Result<BTreeSet<EntryKey>, SecureStoreError>;
}

/// Map a decode failure on `key` into [`SecureStoreError::CorruptEntry`].
pub fn corrupt(key: &EntryKey, err: CipherError) -> SecureStoreError {
    SecureStoreError::CorruptEntry {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

/// In-memory secure store that masks values for tests and smoke runs.
/// Nothing is persisted.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecureStore {
    inner: Arc<Mutex<HashMap<EntryKey, StoredValue>>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<EntryKey, StoredValue>>, SecureStoreError> {
        self.inner.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn read(&self, key: &EntryKey) -> Result<Option<StoredValue>, SecureStoreError> {
        let map = self.entries()?;
        map.get(key)
            .map(|stored| stored.try_map(|v| MaskCipher.decode(v)))
            .transpose()
            .map_err(|err| corrupt(key, err))
    }
}

impl SecureStore for InMemorySecureStore {
    fn get(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<Option<String>, SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        Ok(self
            .read(&key)?
            .and_then(|value| value.first().map(str::to_string)))
    }

    fn get_list(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<Option<Vec<String>>, SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        Ok(self.read(&key)?.map(|value| value.to_vec()))
    }

    fn set(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), SecureStoreError> {
        let Some(value) = value else {
            return self.unset(section, subsection, name);
        };
        let key = EntryKey::from_parts(section, subsection, name);
        key.validate()?;
        let masked = MaskCipher.encode(value)?;
        self.entries()?.insert(key, StoredValue::Single(masked));
        Ok(())
    }

    fn set_list(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        values: &[String],
    ) -> Result<(), SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        key.validate()?;
        let masked = values
            .iter()
            .map(|v| MaskCipher.encode(v))
            .collect::<Result<Vec<_>, _>>()?;
        self.entries()?.insert(key, StoredValue::List(masked));
        Ok(())
    }

    fn unset(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<(), SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        self.entries()?.remove(&key);
        Ok(())
    }

    fn list(&self) -> Result<BTreeSet<EntryKey>, SecureStoreError> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}
