//! Client-side storage for the console session.
//!
//! This crate provides:
//! - [`ClientStorage`], the durable key/value seam
//! - [`FileStorage`], a JSON map on disk committed with write-then-rename
//! - [`MemoryStorage`], an in-process backend for tests and ephemeral use
//! - [`TokenStore`], the access/refresh token pair and its expiry rules

mod file;
mod keys;
mod memory;
mod token_store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use token_store::{
    now_millis, TokenPair, TokenStore, EXPIRING_SOON_WINDOW_MS, VALIDITY_SKEW_MS,
};
pub use traits::ClientStorage;

use console_config_and_utils::Paths;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backing file could not be parsed or written in the expected shape
    #[error("Corrupt storage file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Open the default file-backed storage at `<base>/session.json`.
pub fn create_storage(paths: &Paths) -> StorageResult<Arc<dyn ClientStorage>> {
    let storage = FileStorage::open(paths.session_file())?;
    Ok(Arc::new(storage))
}

/// Create a TokenStore over the default file-backed storage.
pub fn create_token_store(paths: &Paths) -> StorageResult<TokenStore> {
    Ok(TokenStore::new(create_storage(paths)?))
}
