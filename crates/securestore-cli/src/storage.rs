use std::path::{Path, PathBuf};

use crate::config::{CipherKind, Config};
use color_eyre::Result;
use dirs::data_dir;
use securestore_core::{MaskCipher, ValueCipher};
use securestore_storage::{key_provider::KeyringProvider, AesGcmCipher, FileSecureStore};
use tracing::debug;

/// File name of the secure store inside the site directory.
pub const SECURE_FILE: &str = "secure.toml";

/// Environment override for the site directory.
pub const SITE_DIR_ENV: &str = "SECURESTORE_SITE_DIR";

/// Store with the transform picked at runtime from config.
pub type ConfiguredStore = FileSecureStore<Box<dyn ValueCipher>>;

/// Resolve the default site directory.
pub fn default_site_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("securestore"))
}

/// Resolve the backing file: env override, then config, then the default site dir.
pub fn secure_file_path(config: &Config) -> Result<PathBuf> {
    let site_dir = match std::env::var_os(SITE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => match &config.site_dir {
            Some(dir) => dir.clone(),
            None => default_site_dir()?,
        },
    };
    Ok(site_dir.join(SECURE_FILE))
}

/// Build the value transform named by config.
pub fn cipher_from_config(config: &Config) -> Result<Box<dyn ValueCipher>> {
    match config.cipher.unwrap_or_default() {
        CipherKind::AesGcm => {
            let keyring = config.keyring.clone().unwrap_or_default();
            let provider = KeyringProvider::new(keyring.service, keyring.account);
            let cipher = AesGcmCipher::from_provider(&provider)
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            Ok(Box::new(cipher))
        }
        CipherKind::Mask => Ok(Box::new(MaskCipher)),
    }
}

/// Open the secure store described by config.
pub fn store_from_config(config: &Config) -> Result<ConfiguredStore> {
    let path = secure_file_path(config)?;
    debug!(?path, "opening secure store");
    open(&path, cipher_from_config(config)?)
}

fn open(path: &Path, cipher: Box<dyn ValueCipher>) -> Result<ConfiguredStore> {
    FileSecureStore::open(path, cipher).map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

/// Helper for tests to construct a store rooted at a temp dir with the mask cipher.
#[cfg(test)]
pub fn test_store(root: impl AsRef<Path>) -> ConfiguredStore {
    open(&root.as_ref().join(SECURE_FILE), Box::new(MaskCipher)).expect("open test store")
}
