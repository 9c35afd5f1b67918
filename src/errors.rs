//! Failure taxonomy for the route engine.
//!
//! Every fallible operation in the core surfaces one of these
//! categories. `Unreachable` is special: the route builder recovers
//! it locally into a geodesic fallback segment and it never crosses a
//! module boundary unless every recovery path is exhausted.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unreachable: no path between nodes {source_node} and {target_node}")]
    Unreachable { source_node: i64, target_node: i64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout: operation exceeded {0} seconds")]
    Timeout(u64),

    #[error("external provider: {0}")]
    ExternalProvider(String),

    #[error("database: {0}")]
    Database(String),
}

impl EngineError {
    /// Short category tag, printed by the CLI wrappers in front of
    /// the human message.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "InvalidInput",
            EngineError::InvalidGeometry(_) => "InvalidGeometry",
            EngineError::Unreachable { .. } => "Unreachable",
            EngineError::NotFound(_) => "NotFound",
            EngineError::Conflict(_) => "Conflict",
            EngineError::Timeout(_) => "Timeout",
            EngineError::ExternalProvider(_) => "ExternalProvider",
            EngineError::Database(_) => "DatabaseError",
        }
    }

    /// Exit code for CLI wrappers: 2 for caller mistakes, 1 for
    /// everything else that failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidInput(_) | EngineError::InvalidGeometry(_) => 2,
            _ => 1,
        }
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => EngineError::NotFound("row not found".to_string()),
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => EngineError::Conflict(info.message().to_string()),
            other => EngineError::Database(other.to_string()),
        }
    }
}

impl From<diesel::ConnectionError> for EngineError {
    fn from(e: diesel::ConnectionError) -> Self {
        EngineError::Database(e.to_string())
    }
}

impl<E: std::fmt::Debug> From<bb8::RunError<E>> for EngineError {
    fn from(e: bb8::RunError<E>) -> Self {
        EngineError::Database(format!("pool error: {:?}", e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
