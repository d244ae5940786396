//! Credential storage for the dashboard client.
//!
//! Session credentials live behind the [`SecureStorage`] key-value trait:
//! - [`MemoryStorage`] keeps them for the lifetime of the process
//! - [`FileStorage`] persists them as a JSON map with atomic replace-on-write
//!
//! [`CredentialStore`] sits on top of a backend, caches the current
//! [`Credential`] and reports session transitions to a listener.

mod credential;
mod file;
mod keys;
mod memory;
mod store;
mod traits;

pub use credential::{Credential, Profile};
pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use store::{CredentialStore, SessionEndReason, SessionEvent, SessionListener};
pub use traits::{SecureStorage, StorageWrite};

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
