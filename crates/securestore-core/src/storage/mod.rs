mod secure_store;

pub use secure_store::{corrupt, InMemorySecureStore, SecureStore, SecureStoreError};
