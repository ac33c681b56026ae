use thiserror::Error;

/// Errors raised by the storage engine core.
///
/// The engine does not retry or swallow any of these; callers that compose
/// multiple operations (see [`crate::facade::Facade`]) are responsible for
/// compensating actions such as rolling back a record insert after an index
/// reports [`DbError::Duplicate`].
#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("buffer pool exhausted: every cached block is pinned")]
    AllPinned,

    #[error("file not found: {0}")]
    FileMissing(String),

    #[error("file already exists: {0}")]
    Exists(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("duplicate key")]
    Duplicate,

    #[error("key not found")]
    NotFound,

    #[error("structure broken: {0}")]
    StructureBroken(String),

    #[error("schema error: {0}")]
    SchemaError(String),
}

impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Io(e) => DbError::StructureBroken(format!("io error: {e}")),
            DbError::Serialization(e) => DbError::SchemaError(format!("serialization: {e}")),
            DbError::AllPinned => DbError::AllPinned,
            DbError::FileMissing(s) => DbError::FileMissing(s.clone()),
            DbError::Exists(s) => DbError::Exists(s.clone()),
            DbError::InvalidRecord(s) => DbError::InvalidRecord(s.clone()),
            DbError::Duplicate => DbError::Duplicate,
            DbError::NotFound => DbError::NotFound,
            DbError::StructureBroken(s) => DbError::StructureBroken(s.clone()),
            DbError::SchemaError(s) => DbError::SchemaError(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
