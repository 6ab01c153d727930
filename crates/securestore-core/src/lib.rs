//! Core abstractions for securestore: entry keys, the secure store contract,
//! and the value transform strategy.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod cipher;
pub mod entry;
pub mod storage;

pub use cipher::{CipherError, MaskCipher, ValueCipher};
pub use entry::{EntryKey, InvalidKey, StoredValue};
pub use storage::{InMemorySecureStore, SecureStore, SecureStoreError};
