use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use securestore_core::{
    storage::corrupt, EntryKey, SecureStore, SecureStoreError, StoredValue, ValueCipher,
};
use tracing::{debug, instrument, warn};

use crate::{
    config_file::{ConfigError, ConfigFile},
    lock_file::{lock_path_for, LockFile},
};

impl From<ConfigError> for SecureStoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => SecureStoreError::Load {
                path,
                reason: source.to_string(),
            },
            ConfigError::Parse { path, reason } => SecureStoreError::Load { path, reason },
            ConfigError::InvalidKey(err) => SecureStoreError::InvalidKey(err),
            ConfigError::Serialize(reason) => SecureStoreError::Storage { reason },
        }
    }
}

/// Secure store persisted to a single config file.
///
/// Values pass through the injected [`ValueCipher`] on the way in and out.
/// Every mutation is followed by a guarded save: the file is rewritten through
/// its lock marker and renamed into place, and a failed save rolls the
/// mutation back so memory never runs ahead of disk.
pub struct FileSecureStore<C: ValueCipher> {
    path: PathBuf,
    cipher: C,
    config: Mutex<ConfigFile>,
}

impl<C: ValueCipher> FileSecureStore<C> {
    /// Open the store at `path`, loading it eagerly. A missing file is an
    /// empty store; an unreadable or malformed one fails construction.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, cipher: C) -> Result<Self, SecureStoreError> {
        let path = path.as_ref().to_path_buf();
        let config = ConfigFile::load(&path)?;
        Ok(Self {
            path,
            cipher,
            config: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    /// True when another writer changed the backing file since it was loaded
    /// or last saved by this store.
    pub fn is_outdated(&self) -> Result<bool, SecureStoreError> {
        Ok(self.state()?.is_outdated()?)
    }

    /// Discard the in-memory model and re-read the backing file. On failure
    /// the current model is kept.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn reload(&self) -> Result<(), SecureStoreError> {
        self.state()?.reload()?;
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, ConfigFile>, SecureStoreError> {
        self.config.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn decoded(&self, key: &EntryKey) -> Result<Option<StoredValue>, SecureStoreError> {
        let config = self.state()?;
        config
            .raw(key)
            .map(|stored| stored.try_map(|v| self.cipher.decode(v)))
            .transpose()
            .map_err(|err| corrupt(key, err))
    }

    /// Apply `mutate` and persist; on save failure restore the key's prior value.
    fn mutate(
        &self,
        key: &EntryKey,
        mutate: impl FnOnce(&mut ConfigFile) -> Result<(), SecureStoreError>,
    ) -> Result<(), SecureStoreError> {
        let mut config = self.state()?;
        let prior = config.raw(key).cloned();
        mutate(&mut *config)?;
        if let Err(err) = save(&mut *config) {
            warn!(entry = %key, error = %err, "save failed; rolling back");
            config.restore(key, prior);
            return Err(err);
        }
        Ok(())
    }
}

/// Guarded atomic save. No-op when nothing changed since the last save.
fn save(config: &mut ConfigFile) -> Result<(), SecureStoreError> {
    if !config.is_modified() {
        return Ok(());
    }
    let bytes = config.serialize()?;
    let path = config.path().to_path_buf();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SecureStoreError::Storage {
            reason: format!("cannot create {}: {e}", parent.display()),
        })?;
    }

    let mut lock = LockFile::acquire(&path)?;
    lock.write(&bytes)?;
    lock.commit()?;

    debug!(path = %path.display(), bytes = bytes.len(), "saved secure config");
    config.mark_persisted(bytes);
    Ok(())
}

impl<C: ValueCipher> SecureStore for FileSecureStore<C> {
    #[instrument(skip_all, fields(section = %section, subsection = ?subsection, name = %name))]
    fn get(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<Option<String>, SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        Ok(self
            .decoded(&key)?
            .and_then(|value| value.first().map(str::to_string)))
    }

    #[instrument(skip_all, fields(section = %section, subsection = ?subsection, name = %name))]
    fn get_list(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<Option<Vec<String>>, SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        Ok(self.decoded(&key)?.map(|value| value.to_vec()))
    }

    #[instrument(skip_all, fields(section = %section, subsection = ?subsection, name = %name))]
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
        let encoded = self.cipher.encode(value)?;
        self.mutate(&key, |config| Ok(config.set(&key, encoded)?))
    }

    #[instrument(
        skip_all,
        fields(section = %section, subsection = ?subsection, name = %name, count = values.len())
    )]
    fn set_list(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        values: &[String],
    ) -> Result<(), SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        let encoded = values
            .iter()
            .map(|v| self.cipher.encode(v))
            .collect::<Result<Vec<_>, _>>()?;
        self.mutate(&key, |config| Ok(config.set_list(&key, encoded)?))
    }

    #[instrument(skip_all, fields(section = %section, subsection = ?subsection, name = %name))]
    fn unset(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
    ) -> Result<(), SecureStoreError> {
        let key = EntryKey::from_parts(section, subsection, name);
        self.mutate(&key, |config| {
            config.unset(&key);
            Ok(())
        })
    }

    fn list(&self) -> Result<BTreeSet<EntryKey>, SecureStoreError> {
        let config = self.state()?;
        let mut keys = BTreeSet::new();
        for section in config.sections() {
            for subsection in config.subsections(&section) {
                for name in config.names(&section, Some(&subsection)) {
                    keys.insert(EntryKey::new(section.as_str(), Some(subsection.as_str()), name));
                }
            }
            for name in config.names(&section, None) {
                keys.insert(EntryKey::new(section.as_str(), None::<String>, name));
            }
        }
        Ok(keys)
    }
}
