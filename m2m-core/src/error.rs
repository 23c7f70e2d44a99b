//! Error types for M2M inventory operations

use thiserror::Error;

/// Errors raised while talking to the remote inventory service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Non-2xx status, or no response at all (status 0).
    #[error("Request to {endpoint} failed with status {status}: {message}")]
    Transport {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    #[error("{endpoint} reported error {code}: {message}")]
    Service {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("User context request failed: {reason}")]
    Context { reason: String },
}

/// Identifier or URL resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// Some requested identifiers could not be resolved.
    ///
    /// `ids` is sorted so the message is stable.
    #[error("{operation} failed for {ids:?}")]
    Unresolved { operation: String, ids: Vec<String> },

    #[error("{operation} for dataset {dataset} returned {found}, expected {expected}")]
    UnexpectedShape {
        operation: String,
        dataset: String,
        expected: String,
        found: String,
    },
}

impl ResolutionError {
    /// Build an `Unresolved` error, sorting and deduplicating the ids.
    pub fn unresolved<I, S>(operation: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        ids.sort();
        ids.dedup();
        Self::Unresolved {
            operation: operation.into(),
            ids,
        }
    }
}

/// Shared cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache write for {resource} did not apply to all {keys} keys")]
    WriteFailed { resource: String, keys: usize },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization error: {reason}")]
    Serialization { reason: String },
}

/// Scene identifier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Unrecognized identifier {id}: {reason}")]
    Unrecognized { id: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all M2M errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum M2mError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl M2mError {
    /// Identifiers named by an `Unresolved` resolution error, if this is one.
    pub fn unresolved_ids(&self) -> Option<&[String]> {
        match self {
            Self::Resolution(ResolutionError::Unresolved { ids, .. }) => Some(ids),
            _ => None,
        }
    }

    /// True when the remote service rejected the credentials or token.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Authentication { .. }))
    }
}

/// Result type alias for M2M operations.
pub type M2mResult<T> = Result<T, M2mError>;

// =============================================================================
// TESTS
// =============================================================================
