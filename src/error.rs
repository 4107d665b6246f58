//! Crate-wide error type.
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("vector has {actual} coordinates, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("could not generate a nonzero hyperplane normal from the supplied statistics")]
    DegenerateStats,

    #[error("a build is already in progress")]
    BuildInProgress,

    #[error("no record found for id {0}")]
    IdUnknown(String),

    #[error("bucket store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("hasher serialization failed")]
    SerializationFailure(#[from] std::boxed::Box<bincode::ErrorKind>),

    #[cfg(feature = "sqlite")]
    #[error("sqlite store error")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
