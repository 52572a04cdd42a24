use thiserror::Error;

/// All errors generated in `funding-radar`.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum EngineError {
    #[error("observation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("contract registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Errors produced by a [`CacheBackend`](crate::cache::CacheBackend).
///
/// A backend error is never fatal: the [`ResultCache`](crate::cache::ResultCache)
/// falls back to its in-process map and flags degraded mode.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),
}
