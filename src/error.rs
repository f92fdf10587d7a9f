//! Error kinds of the engine.
//!
//! Queries on a built graph are total and never fail; errors arise only
//! during construction, serialization and merging. Sequences with
//! unencodable characters are not an error: they silently contribute no
//! k-mers spanning the offending symbol.

/// Errors raised by construction, chunk I/O and merging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O failure: missing file, truncated stream, failed write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A chunk file violated its shape invariants on load.
    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    /// Chunks or graphs with mismatched k, alphabet, canonical flag or
    /// weight width were combined.
    #[error("incompatible chunks: {0}")]
    IncompatibleChunk(String),

    /// The k-mer container could not grow. Raised only on load paths;
    /// during collection an allocation failure aborts the process.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// A task was submitted after the worker pool was joined.
    #[error("task submitted after shutdown")]
    Shutdown,

    /// The requested k exceeds the widest supported k-mer.
    #[error("k = {0} is not supported (maximum {1})")]
    UnsupportedK(usize, usize),
}

pub type Result<T> = std::result::Result<T, Error>;
