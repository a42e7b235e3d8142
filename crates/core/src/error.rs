use thiserror::Error;

/// Errors surfaced by the persistence collaborator and shared plumbing.
#[derive(Error, Debug)]
pub enum CohortError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Backend unreachable or refusing work. Fatal to the whole operation.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Scroll cursor expired or unknown: {0}")]
    ScrollExpired(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CohortError {
    fn from(e: serde_json::Error) -> Self {
        CohortError::Serialize(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CohortError>;
