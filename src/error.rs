use thiserror::Error;

/// Errors raised by the resampling procedures.
///
/// Every variant is produced before any resampling trial runs, except
/// `ThreadPool`, which can only fail while the engine sets up its workers.
#[derive(Debug, Error)]
pub enum ResampleError {
    /// Wrong sample arity, mismatched lengths, malformed prior or an out of
    /// range setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was called before the session reached the required state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A distribution rejected its parameters (zero scale, non-positive df, ...).
    #[error("distribution error: {0}")]
    Distribution(String),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ResampleError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ResampleError::Configuration(msg.into())
    }

    pub(crate) fn distribution(err: impl std::fmt::Display) -> Self {
        ResampleError::Distribution(err.to_string())
    }
}

pub type Result<T, E = ResampleError> = std::result::Result<T, E>;
