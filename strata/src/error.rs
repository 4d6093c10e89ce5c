use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::buffer_pool::BufferPool;
use crate::PageId;

/// Result type alias for storage-engine operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error kinds surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O failure while reading or writing a backing file.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Every frame in a buffer-pool partition is pinned; the caller may retry.
    #[error("buffer pool partition {0} is full: all frames are pinned")]
    PoolFull(&'static str),

    /// The free-space map claimed a free slot the data page does not have.
    #[error("free-space map inconsistency: page {page_id} of table {table} has no free slot")]
    Inconsistent { table: String, page_id: PageId },

    /// A unique-key probe found an existing entry.
    #[error("duplicate key '{value}' for unique field {field}")]
    DuplicateKey { field: String, value: String },

    /// Catalog or table lookup failed.
    #[error("unknown table {0}")]
    TableNotFound(String),

    /// meta.txt could not be parsed.
    #[error("malformed metadata for table {table}: {detail}")]
    MetaParse { table: String, detail: String },

    /// API misuse: the operation made no sense for the given arguments.
    #[error("{0}")]
    Logic(String),
}

impl StorageError {
    pub fn logic(msg: impl Into<String>) -> Self {
        StorageError::Logic(msg.into())
    }
}

/// Invariant violation detected after a mutation was applied. Flushes what it
/// can and aborts the process; continuing would persist corrupt state.
pub fn fatal(pool: &Arc<BufferPool>, msg: &str) -> ! {
    eprintln!("fatal storage invariant violation: {msg}");
    if let Err(e) = pool.flush_all() {
        eprintln!("fatal: final flush failed: {e}");
    }
    std::process::abort();
}
