//! # Sluice Webhook
//!
//! Push-based webhook ingestion for Sluice connector pipelines.
//!
//! The server accepts untrusted HTTP deliveries on one endpoint, protects
//! itself with a token-bucket rate limiter and an optional HMAC-SHA256
//! signature check, normalizes JSON bodies into records and hands them to a
//! single downstream callback, either inline or through a bounded queue.
//!
//! ```text
//!  POST /webhook ─▶ method/path ─▶ rate limit ─▶ body ─▶ signature ─▶ decode
//!                                                                      │
//!                       ┌──────────────────────────────────────────────┘
//!                       ▼
//!          queue capacity == 0: handler(records)      → 200 / 500
//!          queue capacity  > 0: enqueue → workers      → 202 / 429
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sluice_webhook::{handler_fn, Record, ShutdownSignal, WebhookConfig, WebhookServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WebhookConfig::builder()
//!         .endpoint("/webhook/orders")
//!         .listen_addr(":8080")
//!         .queue_capacity(100)
//!         .workers(4)
//!         .build()?;
//!
//!     let handler = handler_fn(|records: Vec<Record>| async move {
//!         tracing::info!(record_count = records.len(), "batch received");
//!         Ok(())
//!     });
//!
//!     // Returns after SIGINT/SIGTERM once the shutdown sequence completes.
//!     WebhookServer::new(config)
//!         .start(ShutdownSignal::new(), Some(handler))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/sluice-webhook/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod payload;
pub mod queue;
pub mod rate_limit;
pub mod server;
pub mod shutdown;
pub mod signature;

pub use config::{
    RateLimitConfig, SignatureConfig, WebhookConfig, WebhookConfigBuilder, WebhookSettings,
};
pub use error::{
    ConfigError, HandlerError, PayloadError, SignatureError, WebhookError, WebhookResult,
};
pub use handler::{handler_fn, Dispatch, RecordHandler, Rejection, WebhookService};
pub use queue::WorkerPool;
pub use rate_limit::RateLimiter;
pub use server::{ServerPhase, WebhookServer};
pub use shutdown::{ShutdownLatch, ShutdownSignal};
pub use signature::SignatureVerifier;

/// One delivered record: a JSON object with its field order preserved.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
