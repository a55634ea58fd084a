//! Webhook server configuration.
//!
//! [`WebhookConfig`] is immutable once built. All validation happens in
//! [`WebhookConfigBuilder::build`], so a running server never discovers a bad
//! setting at request time.
//!
//! # Example
//!
//! ```rust
//! use sluice_webhook::{SignatureConfig, WebhookConfig};
//! use std::time::Duration;
//!
//! let config = WebhookConfig::builder()
//!     .endpoint("/webhook/orders")
//!     .listen_addr("127.0.0.1:0")
//!     .signature(SignatureConfig::hmac_sha256("s3cret"))
//!     .rate_limit(10, 20)
//!     .queue_capacity(100)
//!     .request_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.endpoint(), "/webhook/orders");
//! assert_eq!(config.workers(), 1);
//! ```
//!
//! The same settings can be loaded from a module configuration map, which
//! uses the camelCase keys of the connector runtime:
//!
//! ```rust
//! use sluice_webhook::WebhookConfig;
//!
//! let config = WebhookConfig::from_value(serde_json::json!({
//!     "endpoint": "/webhook/orders",
//!     "listenAddress": "127.0.0.1:0",
//!     "queueSize": 10,
//!     "maxConcurrent": 4
//! }))
//! .unwrap();
//!
//! assert_eq!(config.workers(), 4);
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default header carrying the request signature.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Default maximum request body size (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// The only supported signature algorithm.
pub const HMAC_SHA256: &str = "hmac-sha256";

/// Webhook server configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    endpoint: String,
    listen_addr: String,
    data_field: Option<String>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    signature: Option<SignatureConfig>,
    rate_limit: Option<RateLimitConfig>,
    queue_capacity: usize,
    workers: usize,
    max_body_bytes: Option<usize>,
    handle_os_signals: bool,
}

impl WebhookConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> WebhookConfigBuilder {
        WebhookConfigBuilder::default()
    }

    /// Builds a configuration from a module configuration value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let settings: WebhookSettings = serde_json::from_value(value)?;
        settings.into_config()
    }

    /// Loads settings from a TOML or JSON file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let settings: WebhookSettings = match extension {
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        settings.into_config()
    }

    /// Registered request path.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Configured listen address, as written in the configuration.
    #[must_use]
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Address passed to the listener. A leading `:` means every interface.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        }
    }

    /// Object field holding the record array, if configured.
    #[must_use]
    pub fn data_field(&self) -> Option<&str> {
        self.data_field.as_deref()
    }

    /// Per-request timeout for reading headers and the body.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// How long shutdown waits for in-flight requests.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Signature validation settings.
    #[must_use]
    pub fn signature(&self) -> Option<&SignatureConfig> {
        self.signature.as_ref()
    }

    /// Rate limiting settings.
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitConfig> {
        self.rate_limit.as_ref()
    }

    /// Queue capacity. Zero selects synchronous mode.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Number of queue workers.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether deliveries are acknowledged once queued.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.queue_capacity > 0
    }

    /// Largest accepted request body, or `None` for no cap.
    #[must_use]
    pub fn max_body_bytes(&self) -> Option<usize> {
        self.max_body_bytes
    }

    /// Whether SIGINT/SIGTERM trigger shutdown.
    #[must_use]
    pub fn handle_os_signals(&self) -> bool {
        self.handle_os_signals
    }
}

/// Builder for [`WebhookConfig`].
#[derive(Debug, Clone)]
pub struct WebhookConfigBuilder {
    endpoint: String,
    listen_addr: String,
    data_field: Option<String>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    signature: Option<SignatureConfig>,
    rate_limit: Option<RateLimitConfig>,
    queue_capacity: usize,
    workers: usize,
    max_body_bytes: Option<usize>,
    handle_os_signals: bool,
}

impl Default for WebhookConfigBuilder {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            data_field: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            signature: None,
            rate_limit: None,
            queue_capacity: 0,
            workers: 0,
            max_body_bytes: Some(DEFAULT_MAX_BODY_BYTES),
            handle_os_signals: true,
        }
    }
}

impl WebhookConfigBuilder {
    /// Creates a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request path (e.g. "/webhook/orders"). Required.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the listen address. Use port 0 for an ephemeral port.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Sets the object field that holds the record array.
    #[must_use]
    pub fn data_field(mut self, field: impl Into<String>) -> Self {
        self.data_field = Some(field.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enables signature validation.
    #[must_use]
    pub fn signature(mut self, signature: SignatureConfig) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Enables rate limiting with a sustained rate and a burst size.
    #[must_use]
    pub fn rate_limit(mut self, requests_per_second: i64, burst: i64) -> Self {
        self.rate_limit = Some(RateLimitConfig::new(requests_per_second, burst));
        self
    }

    /// Sets the queue capacity. Zero keeps synchronous mode.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the number of queue workers.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Caps the request body size. `None` removes the cap.
    #[must_use]
    pub fn max_body_bytes(mut self, max: Option<usize>) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Enables or disables SIGINT/SIGTERM handling in `start`.
    #[must_use]
    pub fn handle_os_signals(mut self, enabled: bool) -> Self {
        self.handle_os_signals = enabled;
        self
    }

    /// Validates the settings and builds the configuration.
    pub fn build(self) -> Result<WebhookConfig, ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.listen_addr.is_empty() {
            return Err(ConfigError::invalid_value(
                "listenAddress",
                "must not be empty",
            ));
        }
        if self.max_body_bytes == Some(0) {
            return Err(ConfigError::invalid_value(
                "maxBodyBytes",
                "must be greater than 0",
            ));
        }

        let signature = match self.signature {
            Some(signature) => Some(signature.validated()?),
            None => None,
        };

        let workers = if self.queue_capacity > 0 && self.workers == 0 {
            1
        } else {
            self.workers
        };

        let data_field = self.data_field.filter(|field| !field.is_empty());

        let config = WebhookConfig {
            endpoint: self.endpoint,
            listen_addr: self.listen_addr,
            data_field,
            request_timeout: self.request_timeout,
            shutdown_timeout: self.shutdown_timeout,
            signature,
            rate_limit: self.rate_limit,
            queue_capacity: self.queue_capacity,
            workers,
            max_body_bytes: self.max_body_bytes,
            handle_os_signals: self.handle_os_signals,
        };

        tracing::debug!(
            endpoint = %config.endpoint,
            listen_addr = %config.listen_addr,
            has_signature = config.signature.is_some(),
            queue_capacity = config.queue_capacity,
            workers = config.workers,
            rate_limit = config.rate_limit.is_some(),
            "webhook module created"
        );

        Ok(config)
    }
}

/// Signature validation settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureConfig {
    algorithm: String,
    header: String,
    secret: String,
}

impl SignatureConfig {
    /// Creates signature settings with the default header.
    pub fn new(algorithm: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            header: DEFAULT_SIGNATURE_HEADER.to_string(),
            secret: secret.into(),
        }
    }

    /// HMAC-SHA256 settings with the default header.
    pub fn hmac_sha256(secret: impl Into<String>) -> Self {
        Self::new(HMAC_SHA256, secret)
    }

    /// Overrides the header carrying the signature.
    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    /// Algorithm identifier.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Header carrying the signature.
    #[must_use]
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Shared secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        if self.algorithm.is_empty() {
            return Err(ConfigError::MissingSignatureType);
        }
        if self.algorithm != HMAC_SHA256 {
            return Err(ConfigError::UnsupportedSignature(self.algorithm));
        }
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSignatureSecret);
        }
        if self.header.is_empty() {
            self.header = DEFAULT_SIGNATURE_HEADER.to_string();
        }
        if http::HeaderName::from_bytes(self.header.as_bytes()).is_err() {
            return Err(ConfigError::invalid_value(
                "signature.header",
                format!("'{}' is not a valid header name", self.header),
            ));
        }
        Ok(self)
    }
}

impl fmt::Debug for SignatureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureConfig")
            .field("algorithm", &self.algorithm)
            .field("header", &self.header)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Token bucket settings.
///
/// A non-positive rate disables limiting. A non-positive burst falls back
/// to the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Sustained rate in tokens per second.
    #[serde(default, deserialize_with = "truncated_number")]
    pub requests_per_second: i64,
    /// Bucket capacity.
    #[serde(default, deserialize_with = "truncated_number")]
    pub burst: i64,
}

impl RateLimitConfig {
    /// Creates rate limit settings.
    pub fn new(requests_per_second: i64, burst: i64) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    /// Effective `(rate, burst)`, or `None` when limiting is disabled.
    #[must_use]
    pub fn effective(&self) -> Option<(u32, usize)> {
        if self.requests_per_second <= 0 {
            return None;
        }
        let rate = u32::try_from(self.requests_per_second).unwrap_or(u32::MAX);
        let burst = if self.burst > 0 {
            self.burst
        } else {
            self.requests_per_second
        };
        Some((rate, usize::try_from(burst).unwrap_or(usize::MAX)))
    }
}

/// Module configuration map for a webhook input.
///
/// Mirrors the keys accepted by the connector runtime. Convert with
/// [`WebhookSettings::into_config`] to run validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookSettings {
    /// Request path.
    pub endpoint: String,
    /// Listen address.
    pub listen_address: Option<String>,
    /// Field holding the record array.
    pub data_field: Option<String>,
    /// Request timeout in seconds. Values <= 0 keep the default.
    pub timeout: Option<f64>,
    /// Signature validation.
    pub signature: Option<SignatureSettings>,
    /// Rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
    /// Queue capacity.
    #[serde(deserialize_with = "truncated_number")]
    pub queue_size: i64,
    /// Worker count.
    #[serde(deserialize_with = "truncated_number")]
    pub max_concurrent: i64,
    /// Body size cap in bytes.
    pub max_body_bytes: Option<u64>,
}

/// Reads any number and drops the fractional part, so `10.0` and `2.5`
/// are accepted as counts.
fn truncated_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    #[allow(clippy::cast_possible_truncation)]
    Ok(value.trunc() as i64)
}

/// Signature block of [`WebhookSettings`].
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureSettings {
    /// Algorithm identifier.
    #[serde(rename = "type")]
    pub kind: String,
    /// Header name.
    pub header: Option<String>,
    /// Shared secret.
    pub secret: String,
}

impl fmt::Debug for SignatureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureSettings")
            .field("kind", &self.kind)
            .field("header", &self.header)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl WebhookSettings {
    /// Validates the settings and builds a [`WebhookConfig`].
    pub fn into_config(self) -> Result<WebhookConfig, ConfigError> {
        if self.queue_size < 0 {
            return Err(ConfigError::invalid_value("queueSize", "must be >= 0"));
        }
        if self.max_concurrent < 0 {
            return Err(ConfigError::invalid_value("maxConcurrent", "must be >= 0"));
        }

        let mut builder = WebhookConfig::builder()
            .endpoint(self.endpoint)
            .queue_capacity(usize::try_from(self.queue_size).unwrap_or(usize::MAX))
            .workers(usize::try_from(self.max_concurrent).unwrap_or(usize::MAX));

        if let Some(addr) = self.listen_address.filter(|addr| !addr.is_empty()) {
            builder = builder.listen_addr(addr);
        }
        if let Some(field) = self.data_field {
            builder = builder.data_field(field);
        }
        if let Some(secs) = self.timeout.filter(|secs| *secs > 0.0) {
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| ConfigError::invalid_value("timeout", e.to_string()))?;
            builder = builder.request_timeout(timeout);
        }
        if let Some(signature) = self.signature {
            let mut config = SignatureConfig::new(signature.kind, signature.secret);
            if let Some(header) = signature.header.filter(|h| !h.is_empty()) {
                config = config.with_header(header);
            }
            builder = builder.signature(config);
        }
        if let Some(rate_limit) = self.rate_limit {
            builder = builder.rate_limit(rate_limit.requests_per_second, rate_limit.burst);
        }
        if let Some(max) = self.max_body_bytes {
            let max = usize::try_from(max)
                .map_err(|e| ConfigError::invalid_value("maxBodyBytes", e.to_string()))?;
            builder = builder.max_body_bytes(Some(max));
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn base() -> WebhookConfigBuilder {
        WebhookConfig::builder().endpoint("/webhook")
    }

    #[test]
    fn test_defaults() {
        let config = base().build().unwrap();

        assert_eq!(config.endpoint(), "/webhook");
        assert_eq!(config.listen_addr(), DEFAULT_LISTEN_ADDR);
        assert_eq!(
            config.request_timeout(),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(
            config.shutdown_timeout(),
            Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS)
        );
        assert_eq!(config.queue_capacity(), 0);
        assert_eq!(config.workers(), 0);
        assert!(!config.is_async());
        assert_eq!(config.max_body_bytes(), Some(DEFAULT_MAX_BODY_BYTES));
        assert!(config.handle_os_signals());
        assert!(config.signature().is_none());
        assert!(config.rate_limit().is_none());
        assert!(config.data_field().is_none());
    }

    #[test]
    fn test_missing_endpoint() {
        let err = WebhookConfig::builder().build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEndpoint));
    }

    #[test]
    fn test_workers_default_to_one_with_queue() {
        let config = base().queue_capacity(8).build().unwrap();
        assert_eq!(config.workers(), 1);
        assert!(config.is_async());

        let config = base().queue_capacity(8).workers(3).build().unwrap();
        assert_eq!(config.workers(), 3);
    }

    #[test]
    fn test_bind_addr_wildcard_host() {
        let config = base().listen_addr(":0").build().unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:0");

        let config = base().listen_addr("127.0.0.1:9000").build().unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_empty_data_field_is_ignored() {
        let config = base().data_field("").build().unwrap();
        assert!(config.data_field().is_none());
    }

    #[test]
    fn test_signature_validation() {
        let err = base()
            .signature(SignatureConfig::new("", "secret"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSignatureType));

        let err = base()
            .signature(SignatureConfig::new("hmac-sha1", "secret"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedSignature(ref t) if t == "hmac-sha1"));

        let err = base()
            .signature(SignatureConfig::hmac_sha256(""))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSignatureSecret));

        let err = base()
            .signature(SignatureConfig::hmac_sha256("secret").with_header("bad header"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_signature_empty_header_uses_default() {
        let config = base()
            .signature(SignatureConfig::hmac_sha256("secret").with_header(""))
            .build()
            .unwrap();
        assert_eq!(
            config.signature().unwrap().header(),
            DEFAULT_SIGNATURE_HEADER
        );
    }

    #[test]
    fn test_signature_debug_redacts_secret() {
        let debug = format!("{:?}", SignatureConfig::hmac_sha256("hunter2"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_zero_body_cap_rejected() {
        let err = base().max_body_bytes(Some(0)).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(base().max_body_bytes(None).build().is_ok());
    }

    #[test]
    fn test_rate_limit_effective() {
        assert_eq!(RateLimitConfig::new(0, 10).effective(), None);
        assert_eq!(RateLimitConfig::new(-1, 10).effective(), None);
        assert_eq!(RateLimitConfig::new(5, 0).effective(), Some((5, 5)));
        assert_eq!(RateLimitConfig::new(5, -3).effective(), Some((5, 5)));
        assert_eq!(RateLimitConfig::new(2, 8).effective(), Some((2, 8)));
    }

    #[test]
    fn test_from_value_full() {
        let config = WebhookConfig::from_value(json!({
            "endpoint": "/webhook/orders",
            "listenAddress": "127.0.0.1:0",
            "dataField": "events",
            "timeout": 2.5,
            "signature": {
                "type": "hmac-sha256",
                "header": "X-Hub-Signature",
                "secret": "s3cret"
            },
            "rateLimit": { "requestsPerSecond": 4 },
            "queueSize": 16,
            "maxConcurrent": 2,
            "maxBodyBytes": 4096
        }))
        .unwrap();

        assert_eq!(config.endpoint(), "/webhook/orders");
        assert_eq!(config.listen_addr(), "127.0.0.1:0");
        assert_eq!(config.data_field(), Some("events"));
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        let signature = config.signature().unwrap();
        assert_eq!(signature.header(), "X-Hub-Signature");
        assert_eq!(signature.secret(), "s3cret");
        assert_eq!(config.rate_limit().unwrap().effective(), Some((4, 4)));
        assert_eq!(config.queue_capacity(), 16);
        assert_eq!(config.workers(), 2);
        assert_eq!(config.max_body_bytes(), Some(4096));
    }

    #[test]
    fn test_from_value_defaults() {
        let config = WebhookConfig::from_value(json!({ "endpoint": "/hook", "timeout": 0 }))
            .unwrap();
        assert_eq!(config.listen_addr(), DEFAULT_LISTEN_ADDR);
        assert_eq!(
            config.request_timeout(),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_from_value_signature_default_header() {
        let config = WebhookConfig::from_value(json!({
            "endpoint": "/hook",
            "signature": { "type": "hmac-sha256", "secret": "abc" }
        }))
        .unwrap();
        assert_eq!(
            config.signature().unwrap().header(),
            DEFAULT_SIGNATURE_HEADER
        );
    }

    #[test]
    fn test_from_value_rejects_negative_queue_settings() {
        let err = WebhookConfig::from_value(json!({ "endpoint": "/hook", "queueSize": -1 }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "queueSize"));

        let err =
            WebhookConfig::from_value(json!({ "endpoint": "/hook", "maxConcurrent": -2 }))
                .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "maxConcurrent")
        );
    }

    #[test]
    fn test_from_value_truncates_fractional_counts() {
        let config = WebhookConfig::from_value(json!({
            "endpoint": "/hook",
            "queueSize": 10.0,
            "maxConcurrent": 2.5,
            "rateLimit": { "requestsPerSecond": 3.9, "burst": 6.0 }
        }))
        .unwrap();

        assert_eq!(config.queue_capacity(), 10);
        assert_eq!(config.workers(), 2);
        assert_eq!(config.rate_limit().unwrap().effective(), Some((3, 6)));
    }

    #[test]
    fn test_from_value_rejects_non_numeric_counts() {
        let err = WebhookConfig::from_value(json!({ "endpoint": "/hook", "queueSize": "ten" }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_from_value_missing_endpoint() {
        let err = WebhookConfig::from_value(json!({ "listenAddress": ":9000" })).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEndpoint));
    }

    #[test]
    fn test_from_file_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("webhook.toml");
        std::fs::write(
            &path,
            r#"
endpoint = "/webhook/toml"
listenAddress = "127.0.0.1:0"
queueSize = 4

[rateLimit]
requestsPerSecond = 2
burst = 2
"#,
        )
        .unwrap();

        let config = WebhookConfig::from_file(&path).unwrap();

        assert_eq!(config.endpoint(), "/webhook/toml");
        assert_eq!(config.queue_capacity(), 4);
        assert_eq!(config.workers(), 1);
        assert_eq!(config.rate_limit().unwrap().effective(), Some((2, 2)));
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("webhook.yaml");
        std::fs::write(&path, "endpoint: /hook").unwrap();

        let err = WebhookConfig::from_file(&path).unwrap_err();

        assert!(matches!(err, ConfigError::UnsupportedFormat(ref ext) if ext == "yaml"));
    }

    #[test]
    fn test_from_file_missing() {
        let err = WebhookConfig::from_file("/nonexistent/sluice.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
