//! Concrete secure store backed by a local config file.
//! Values are encrypted with AES-GCM using keys sourced from the OS keyring
//! (or test doubles); writes go through a lock marker and an atomic rename.

pub mod aead_cipher;
pub mod config_file;
pub mod file_store;
pub mod key_provider;
pub mod lock_file;

pub use aead_cipher::AesGcmCipher;
pub use config_file::{ConfigError, ConfigFile};
pub use file_store::FileSecureStore;
pub use lock_file::{LockError, LockFile};
