//! Domain error types for the code-execution worker.

use color_eyre::Report;
use thiserror::Error;

use crate::job::TransitionError;

/// Result alias for operations that may return a top-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Result alias for metadata-store fallible operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result alias for object-store fallible operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result alias for indexing fallible operations.
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Result alias for retrieval fallible operations.
pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

/// Result alias for configuration fallible operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level error exposed by the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Indicates configuration loading or validation failed.
    #[error("configuration failed")]
    Config(#[from] ConfigError),
    /// Indicates a metadata-store operation failed.
    #[error("metadata store operation failed")]
    Store(#[from] StoreError),
    /// Indicates an object-store operation failed.
    #[error("object store operation failed")]
    Storage(#[from] StorageError),
    /// Indicates a vector-index or indexing operation failed.
    #[error("indexing failed")]
    Index(#[from] IndexError),
    /// Indicates a retrieval operation failed.
    #[error("retrieval failed")]
    Retrieval(#[from] RetrievalError),
}

/// Captures metadata-store failures.
///
/// The handler maps [`StoreError::Unavailable`] to a 503 acknowledgment (the
/// queue redelivers once the backend returns) and every other kind to a 500.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached at all.
    #[error("metadata store unavailable")]
    Unavailable(#[source] Report),
    /// No document exists for the requested job.
    #[error("no job document found for '{job_id}'")]
    MissingJob {
        /// Identifier of the absent job.
        job_id: String,
    },
    /// The requested status change is not permitted from the current status.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// The backend rejected or lost the write.
    #[error("metadata store write failed")]
    Backend(#[source] Report),
}

impl StoreError {
    /// Returns `true` when the failure means the backend is unreachable
    /// rather than the write being rejected.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Captures object-store failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store client could not be constructed for the requested bucket.
    #[error("object store configuration invalid for bucket '{bucket}'")]
    Configuration {
        /// Bucket the operator was being built for.
        bucket: String,
        /// Underlying construction failure.
        #[source]
        source: Report,
    },
    /// A download failed.
    #[error("failed to fetch object '{key}' from bucket '{bucket}'")]
    Fetch {
        /// Bucket the object lives in.
        bucket: String,
        /// Key of the object that could not be fetched.
        key: String,
        /// Underlying transport failure.
        #[source]
        source: Report,
    },
}

/// Captures vector-index and indexing failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct IndexError(#[from] Report);

/// Captures retrieval failures (embedding, generation, reranking).
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RetrievalError(#[from] Report);

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);
