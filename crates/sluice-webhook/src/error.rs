//! Error types for the webhook server.
//!
//! Errors are split by when they can happen:
//!
//! - [`ConfigError`]: raised while building a [`WebhookConfig`](crate::WebhookConfig),
//!   never at request time
//! - [`SignatureError`] and [`PayloadError`]: per-request failures, turned into
//!   4xx responses by the request handler
//! - [`WebhookError`]: lifecycle failures returned from `start`/`stop`

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for lifecycle operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error returned by a downstream record handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration errors, caught when the server configuration is built.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No endpoint path was configured.
    #[error("webhook endpoint is required")]
    MissingEndpoint,

    /// Signature validation was configured without an algorithm.
    #[error("signature type is required")]
    MissingSignatureType,

    /// The configured signature algorithm is not supported.
    #[error("unsupported signature type: {0}")]
    UnsupportedSignature(String),

    /// Signature validation was configured without a secret.
    #[error("signature validation requires secret")]
    MissingSignatureSecret,

    /// A setting holds an unusable value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The offending setting.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    Read {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The configuration file has an extension we do not parse.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Signature check failures.
///
/// Neither variant carries the expected digest or the secret.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// The configured signature header was absent or empty.
    #[error("missing required signature header")]
    Missing,

    /// The supplied signature did not match the body.
    #[error("invalid webhook signature")]
    Invalid,
}

/// Failures while turning a request body into records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// The body is not a JSON array or object.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    /// A record array contained something other than an object.
    #[error("invalid JSON payload: array contains non-object")]
    NonObjectElement,

    /// The configured data field is missing from the object.
    #[error("field '{0}' not found in payload")]
    FieldNotFound(String),

    /// The configured data field does not hold an array.
    #[error("field '{field}' must hold an array, got {found}")]
    NotAnArray {
        /// The configured field.
        field: String,
        /// JSON type that was found instead.
        found: &'static str,
    },
}

/// Lifecycle errors returned by the server.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start` was called while the instance was already starting or running.
    #[error("webhook server already running")]
    AlreadyRunning,

    /// The listener could not be bound.
    #[error("starting webhook listener on {addr}: {source}")]
    Bind {
        /// Configured listen address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The accept loop failed after the server was running.
    #[error("webhook server error: {0}")]
    Serve(#[source] io::Error),

    /// In-flight connections outlived the shutdown timeout and were dropped.
    #[error("shutting down webhook server: {active} connection(s) still open after {timeout:?}")]
    ShutdownTimeout {
        /// The configured shutdown timeout.
        timeout: Duration,
        /// Connections still open when the timeout expired.
        active: usize,
    },
}

impl WebhookError {
    /// Create a bind error.
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}
