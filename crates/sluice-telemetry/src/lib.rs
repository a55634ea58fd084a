//! Logging setup for Sluice services.
//!
//! Binaries call [`init_logging`] once at startup. Library crates only emit
//! `tracing` events and never install a subscriber themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(endpoint = "/webhook/orders", "webhook server started");
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
