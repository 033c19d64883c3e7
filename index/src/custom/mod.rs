//! Persist auxiliary mappings (e.g. temporary or statistics indices) as compressed JSON.
//!
//! Each mapping is stored in its own blob as a `zstd`-compressed JSON document. Unlike an
//! [Index](crate::index::Index), a [Store] favors availability: a blob that cannot be decompressed
//! or parsed reads as an empty mapping instead of failing.

mod storage;

pub use storage::Store;
use thiserror::Error;

/// Errors that can occur when interacting with a [Store].
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] commonware_runtime::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression failed")]
    CompressionFailed,
    #[error("blob too large: {0}")]
    BlobTooLarge(u64),
}

/// Configuration for a [Store].
#[derive(Clone)]
pub struct Config {
    /// The [commonware_runtime::Storage] partition to store mappings in.
    pub partition: String,

    /// Compression level (using `zstd`) applied to documents before storing.
    pub compression: u8,
}
