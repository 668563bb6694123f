//! Centralized error handling for the resource cache.
//!
//! Every failure in this crate is represented as a [`CacheError`] value and
//! propagated through [`Result`]. Nothing here aborts the process: a caller that
//! hits [`CacheError::OutOfSpace`] is expected to clear the cache and retry once,
//! and a caller that cannot open its catalogs at startup treats that as a hard
//! initialization failure of its own.
//!
//! ## Error Categories
//!
//! - **Lookup** ([`CacheError::NotFound`]): an id is absent from a catalog, or a
//!   catalog path does not exist.
//! - **Capacity** ([`CacheError::OutOfSpace`], [`CacheError::TooManyOpenSets`]):
//!   a pool budget or the file-handle bound is exhausted.
//! - **Payload** ([`CacheError::ShortRead`], [`CacheError::DecodeFailed`]): the
//!   bytes backing a bitmap are truncated or do not decode to the expected size.
//! - **Format** ([`CacheError::InvalidFormat`]): magic/version mismatch or a
//!   corrupted descriptor chain.
//! - **I/O** ([`CacheError::Io`]) and **Internal** ([`CacheError::Internal`]).
//!
//! ## Example
//!
//! ```rust
//! use rescache::CacheError;
//!
//! fn describe(err: &CacheError) -> &'static str {
//!     match err {
//!         CacheError::OutOfSpace { .. } => "clear the cache and retry",
//!         CacheError::NotFound(_) => "check the resource id",
//!         _ => "give up",
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The master error enum covering all failure domains of the cache.
///
/// The type is `Clone` so a failure observed by the preload worker can be kept
/// in its statistics and reported later; I/O errors are wrapped in `Arc` for
/// that reason.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Low-level I/O failure other than a missing file.
    Io(Arc<io::Error>),

    /// A catalog id is absent, or a style/picture/text path does not exist.
    NotFound(String),

    /// A pool or compact arena could not satisfy an allocation.
    OutOfSpace {
        /// Name of the pool that refused the request.
        pool: &'static str,
        /// Aligned number of bytes requested.
        requested: usize,
        /// Bytes still available in that pool's budget.
        available: usize,
    },

    /// Every slot of the file-handle cache is referenced; nothing can be evicted.
    TooManyOpenSets(usize),

    /// A catalog file ended before the indexed payload did.
    ShortRead {
        /// Bytes the entry table promised.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// A decompressor failed or produced a payload of the wrong size.
    DecodeFailed(String),

    /// Catalog magic/version mismatch, or a corrupted table.
    InvalidFormat(String),

    /// Logic error: poisoned mutex, stale handle, stopped worker.
    Internal(String),
}

impl CacheError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{what} mutex poisoned"))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::NotFound(s) => write!(f, "Not Found: {s}"),
            Self::OutOfSpace {
                pool,
                requested,
                available,
            } => write!(
                f,
                "Out Of Space: {pool} pool cannot fit {requested} bytes ({available} available)"
            ),
            Self::TooManyOpenSets(n) => {
                write!(f, "Too Many Open Sets: all {n} slots are referenced")
            }
            Self::ShortRead { expected, actual } => {
                write!(f, "Short Read: expected {expected} bytes, got {actual}")
            }
            Self::DecodeFailed(s) => write!(f, "Decode Failed: {s}"),
            Self::InvalidFormat(s) => write!(f, "Invalid Format: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
