//! Error taxonomy for translation.
//!
//! Field-level errors (`PathNotFound`, `TypeMismatch`, `ListLengthMismatch`)
//! are absorbed by the engines and only logged. Pipeline-level errors abort the
//! translation call and are returned to the caller.

use thiserror::Error;

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A path segment did not exist in the tree
    PathNotFound,
    /// A selector was applied to an incompatible node type
    TypeMismatch,
    /// The external generator failed after exhausting its retries
    GenerationFailed,
    /// The backing cache could not be reached
    CacheUnavailable,
    /// Source or template could not be parsed
    MalformedInput,
    /// The caller's cancellation token fired
    Cancelled,
    /// A standard or sample store failed
    StoreError,
    /// `schemaless.toml` or env misconfigured
    ConfigError,
    /// Unexpected logic bugs
    InternalError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathNotFound => "PATH_NOT_FOUND",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::CacheUnavailable => "CACHE_UNAVAILABLE",
            Self::MalformedInput => "MALFORMED_INPUT",
            Self::Cancelled => "CANCELLED",
            Self::StoreError => "STORE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the error only affects a single output field
    pub fn is_field_level(&self) -> bool {
        matches!(self, Self::PathNotFound | Self::TypeMismatch)
    }

    /// Whether the translation can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound | Self::TypeMismatch | Self::CacheUnavailable
        )
    }

    /// Whether the translation call must abort
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

/// Translation error with category and context
#[derive(Debug, Error)]
pub enum SchemalessError {
    #[error("path not found: '{path}' (missing segment '{segment}')")]
    PathNotFound { path: String, segment: String },

    #[error("type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("lists under '{anchor}' differ in length ({expected} vs {found})")]
    ListLengthMismatch {
        anchor: String,
        expected: usize,
        found: usize,
    },

    #[error("template generation failed: {message}")]
    GenerationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("cache unavailable: {message}")]
    CacheUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("malformed input: {message}")]
    MalformedInput {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("translation cancelled")]
    Cancelled,

    #[error("store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SchemalessError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PathNotFound { .. } => ErrorCategory::PathNotFound,
            Self::TypeMismatch { .. } | Self::ListLengthMismatch { .. } => {
                ErrorCategory::TypeMismatch
            }
            Self::GenerationFailed { .. } => ErrorCategory::GenerationFailed,
            Self::CacheUnavailable { .. } => ErrorCategory::CacheUnavailable,
            Self::MalformedInput { .. } => ErrorCategory::MalformedInput,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Store { .. } => ErrorCategory::StoreError,
            Self::Config { .. } => ErrorCategory::ConfigError,
            Self::Internal { .. } => ErrorCategory::InternalError,
        }
    }

    /// Whether another generator attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed { .. } | Self::Store { .. } | Self::CacheUnavailable { .. }
        )
    }

    pub fn path_not_found(path: impl Into<String>, segment: impl Into<String>) -> Self {
        Self::PathNotFound {
            path: path.into(),
            segment: segment.into(),
        }
    }

    pub fn type_mismatch(path: impl Into<String>, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            expected,
            found,
        }
    }

    /// Create a generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a generation error with source
    pub fn generation_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::GenerationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a malformed input error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
            source: None,
        }
    }

    /// Create a malformed input error with source
    pub fn malformed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MalformedInput {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error with source
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<schemaless_async_utils::Cancelled> for SchemalessError {
    fn from(_: schemaless_async_utils::Cancelled) -> Self {
        Self::Cancelled
    }
}

impl Clone for SchemalessError {
    fn clone(&self) -> Self {
        match self {
            Self::PathNotFound { path, segment } => Self::PathNotFound {
                path: path.clone(),
                segment: segment.clone(),
            },
            Self::TypeMismatch {
                path,
                expected,
                found,
            } => Self::TypeMismatch {
                path: path.clone(),
                expected,
                found,
            },
            Self::ListLengthMismatch {
                anchor,
                expected,
                found,
            } => Self::ListLengthMismatch {
                anchor: anchor.clone(),
                expected: *expected,
                found: *found,
            },
            Self::GenerationFailed { message, .. } => Self::generation(message.clone()),
            Self::CacheUnavailable { message, .. } => Self::cache(message.clone()),
            Self::MalformedInput { message, .. } => Self::malformed(message.clone()),
            Self::Cancelled => Self::Cancelled,
            Self::Store { message, .. } => Self::store(message.clone()),
            Self::Config { message, .. } => Self::config(message.clone()),
            Self::Internal { message } => Self::internal(message.clone()),
        }
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, SchemalessError>;
