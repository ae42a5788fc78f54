//! Common error types used throughout gifforge.
//!
//! Every failure of the token and conversion path is one of the variants
//! below. Collaborator failures keep their underlying error as `source()`, and
//! the whole enum is `Clone` so a single conversion result can be handed to
//! every caller waiting on it.

use std::sync::Arc;

/// Shared, clonable cause attached to collaborator failures.
pub type BoxedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Common error type for gifforge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The request was malformed or inconsistent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The source URL points at a host that is not whitelisted.
    #[error("Resource hostname is not whitelisted: {host}")]
    HostnameNotAllowed { host: String },

    /// The token is unknown or has expired.
    #[error("Invalid token")]
    InvalidToken,

    /// The caller is not allowed to issue tokens.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Every generated token collided with an existing one.
    #[error("Unable to generate a unique token after {attempts} attempts")]
    TokenGenerationExhausted { attempts: u32 },

    /// A token that was just inserted could not be read back.
    #[error("Newly issued token is not present in the token store")]
    TokenStoreInconsistent,

    /// A scratch file could not be created or prepared.
    #[error("Failed to {action} temporary file")]
    TempFile {
        action: &'static str,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Downloading the source resource failed.
    #[error("Failed to fetch remote resource: {message}")]
    FetchFailed {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Converting the downloaded resource failed.
    #[error("Failed to convert resource: {message}")]
    TranscodeFailed {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The cached artifact vanished again right after it was recomputed.
    #[error("Cached artifact for {key} is missing after refresh")]
    CacheCorrupt { key: String },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new HostnameNotAllowed error.
    pub fn hostname_not_allowed<S: Into<String>>(host: S) -> Self {
        Self::HostnameNotAllowed { host: host.into() }
    }

    /// Create a new TempFile error.
    pub fn temp_file(action: &'static str, source: std::io::Error) -> Self {
        Self::TempFile {
            action,
            source: Arc::new(source),
        }
    }

    /// Create a FetchFailed error without an underlying cause.
    pub fn fetch<S: Into<String>>(msg: S) -> Self {
        Self::FetchFailed {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a FetchFailed error wrapping its cause.
    pub fn fetch_with<S, E>(msg: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::FetchFailed {
            message: msg.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a TranscodeFailed error wrapping its cause.
    pub fn transcode_with<S, E>(msg: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TranscodeFailed {
            message: msg.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a new CacheCorrupt error.
    pub fn cache_corrupt<S: Into<String>>(key: S) -> Self {
        Self::CacheCorrupt { key: key.into() }
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code a handler should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::HostnameNotAllowed { .. } => 400,
            Self::Unauthorized(_) => 401,
            Self::InvalidToken => 404,
            Self::FetchFailed { .. } => 502,
            Self::TokenGenerationExhausted { .. }
            | Self::TokenStoreInconsistent
            | Self::TempFile { .. }
            | Self::TranscodeFailed { .. }
            | Self::CacheCorrupt { .. }
            | Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::HostnameNotAllowed { .. } => "hostname_not_allowed",
            Self::InvalidToken => "invalid_token",
            Self::Unauthorized(_) => "unauthorized",
            Self::TokenGenerationExhausted { .. } => "token_generation_exhausted",
            Self::TokenStoreInconsistent => "token_store_inconsistent",
            Self::TempFile { .. } => "temp_file_error",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::TranscodeFailed { .. } => "transcode_failed",
            Self::CacheCorrupt { .. } => "cache_corrupt",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the failure was caused by the client rather than the server.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
