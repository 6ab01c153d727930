//! Lock-marker file used to serialize writers of one target file.
//!
//! The marker lives next to the target as `<name>.lock` and is created with
//! create-new semantics, so a second writer fails immediately instead of
//! waiting. The marker doubles as the staging file: bytes are written into it
//! and it is renamed over the target to commit, which is atomic on the same
//! filesystem. Dropping an uncommitted guard removes the marker.

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use securestore_core::SecureStoreError;
use thiserror::Error;
use tracing::{debug, warn};

pub const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Error)]
pub enum LockError {
    /// Another writer holds the marker.
    #[error("cannot lock {target}: {lock} already exists")]
    AlreadyLocked { target: PathBuf, lock: PathBuf },
    #[error("cannot create lock {lock}: {source}")]
    Create {
        lock: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot restrict permissions on {lock}: {source}")]
    Permission {
        lock: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write {lock}: {source}")]
    Write {
        lock: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot commit write to {target}: {source}")]
    Commit {
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<LockError> for SecureStoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyLocked { target, .. } => SecureStoreError::Lock { path: target },
            LockError::Create { lock, source } => {
                warn!(lock = %lock.display(), error = %source, "lock marker could not be created");
                SecureStoreError::Lock { path: lock }
            }
            LockError::Permission { lock, source } => SecureStoreError::Permission {
                path: lock,
                reason: source.to_string(),
            },
            LockError::Write { lock, source } => SecureStoreError::Storage {
                reason: format!("cannot write {}: {source}", lock.display()),
            },
            LockError::Commit { target, source } => SecureStoreError::Commit {
                path: target,
                reason: source.to_string(),
            },
        }
    }
}

/// Derive the marker path: same directory, file name plus [`LOCK_SUFFIX`].
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(LOCK_SUFFIX);
    target.with_file_name(name)
}

/// Held lock on a target file. Released on drop unless committed.
#[derive(Debug)]
pub struct LockFile {
    target: PathBuf,
    lock: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl LockFile {
    /// Create the marker for `target`, restricted to the owner before any
    /// content is written.
    pub fn acquire(target: &Path) -> Result<Self, LockError> {
        let lock = lock_path_for(target);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = match options.open(&lock) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::AlreadyLocked {
                    target: target.to_path_buf(),
                    lock,
                })
            }
            Err(source) => return Err(LockError::Create { lock, source }),
        };

        // From here on the guard owns the marker and removes it on any error.
        let guard = Self {
            target: target.to_path_buf(),
            lock,
            file: Some(file),
            committed: false,
        };
        guard.restrict_permissions()?;
        debug!(lock = %guard.lock.display(), "lock acquired");
        Ok(guard)
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock
    }

    #[cfg(unix)]
    fn restrict_permissions(&self) -> Result<(), LockError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|source| LockError::Permission {
                lock: self.lock.clone(),
                source,
            })
    }

    #[cfg(not(unix))]
    fn restrict_permissions(&self) -> Result<(), LockError> {
        Ok(())
    }

    /// Write the full contents into the marker and flush them to disk.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), LockError> {
        let lock = self.lock.clone();
        let write_err = |source| LockError::Write { lock, source };
        let Some(file) = self.file.as_mut() else {
            return Err(write_err(io::Error::other("lock file already closed")));
        };
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(write_err)
    }

    /// Rename the marker over the target, publishing the written bytes.
    pub fn commit(mut self) -> Result<(), LockError> {
        // Close the handle before renaming so the rename also works on Windows.
        drop(self.file.take());
        fs::rename(&self.lock, &self.target).map_err(|source| LockError::Commit {
            target: self.target.clone(),
            source,
        })?;
        self.committed = true;
        debug!(target = %self.target.display(), "lock committed");
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        // Best-effort release; the marker may already be gone.
        if let Err(err) = fs::remove_file(&self.lock) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(lock = %self.lock.display(), error = %err, "failed to release lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/etc/site/secure.toml")),
            PathBuf::from("/etc/site/secure.toml.lock")
        );
    }

    #[test]
    fn second_acquire_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("secure.toml");

        let held = LockFile::acquire(&target).expect("first acquire");
        let err = LockFile::acquire(&target).expect_err("second acquire must fail");
        assert!(matches!(err, LockError::AlreadyLocked { .. }));
        drop(held);

        LockFile::acquire(&target).expect("reacquire after release");
    }

    #[test]
    fn drop_without_commit_removes_marker_and_keeps_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("secure.toml");
        fs::write(&target, "original").expect("seed target");

        {
            let mut lock = LockFile::acquire(&target).expect("acquire");
            lock.write(b"partial").expect("write");
            assert!(lock.lock_path().exists());
        }

        assert!(!lock_path_for(&target).exists());
        assert_eq!(fs::read_to_string(&target).expect("read"), "original");
    }

    #[test]
    fn commit_replaces_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("secure.toml");
        fs::write(&target, "old").expect("seed target");

        let mut lock = LockFile::acquire(&target).expect("acquire");
        lock.write(b"new").expect("write");
        lock.commit().expect("commit");

        assert_eq!(fs::read_to_string(&target).expect("read"), "new");
        assert!(!lock_path_for(&target).exists());
    }

    #[test]
    fn failed_commit_reports_target_and_releases() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory in the target's place makes the rename fail.
        let target = dir.path().join("occupied");
        fs::create_dir(&target).expect("mkdir");
        fs::write(target.join("keep"), "x").expect("populate");

        let mut lock = LockFile::acquire(&target).expect("acquire");
        lock.write(b"bytes").expect("write");
        let err = lock.commit().expect_err("rename over non-empty dir fails");
        assert!(matches!(err, LockError::Commit { .. }));
        assert!(!lock_path_for(&target).exists());
    }

    #[test]
    fn missing_directory_is_a_create_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nope").join("secure.toml");
        let err = LockFile::acquire(&target).expect_err("parent is missing");
        assert!(matches!(err, LockError::Create { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn marker_is_owner_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("secure.toml");
        let lock = LockFile::acquire(&target).expect("acquire");
        let mode = fs::metadata(lock.lock_path())
            .expect("metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn errors_convert_to_store_errors() {
        let err: SecureStoreError = LockError::AlreadyLocked {
            target: PathBuf::from("/s/secure.toml"),
            lock: PathBuf::from("/s/secure.toml.lock"),
        }
        .into();
        assert_eq!(
            err,
            SecureStoreError::Lock {
                path: PathBuf::from("/s/secure.toml")
            }
        );

        let err: SecureStoreError = LockError::Commit {
            target: PathBuf::from("/s/secure.toml"),
            source: io::Error::other("boom"),
        }
        .into();
        assert!(err.to_string().contains("cannot commit write"));
    }
}
