use std::path::Path;

use thiserror::Error;

pub type StatsResult<T> = std::result::Result<T, StatsError>;

/// Failures surfaced by storage, sheet reading and the statistics routines.
///
/// The dispatcher turns every variant into a structured payload; `kind()` is
/// the stable tag that ends up on the wire.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    BadInput { message: String },
    #[error("{message}")]
    ParseFailure { message: String },
    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl StatsError {
    pub fn kind(&self) -> &'static str {
        match self {
            StatsError::NotFound { .. } => "not_found",
            StatsError::BadInput { .. } => "bad_input",
            StatsError::ParseFailure { .. } => "parse_failure",
            StatsError::Io { .. } => "io_failure",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StatsError::NotFound { .. })
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        StatsError::NotFound { message: message.into() }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        StatsError::BadInput { message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        StatsError::ParseFailure { message: message.into() }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StatsError::Io {
            message: path.display().to_string(),
            source,
        }
    }
}
