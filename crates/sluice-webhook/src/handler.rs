//! Per-request webhook handling.
//!
//! [`WebhookService::handle`] runs every delivery through the same checks,
//! stopping at the first failure:
//!
//! | Step | Failure |
//! |------|---------|
//! | method is `POST` | 405 |
//! | path equals the endpoint | 404 |
//! | rate limiter admits | 429 |
//! | body is read in time and within the size cap | 400 / 413 |
//! | body is not empty | 400 |
//! | signature matches | 401 |
//! | body decodes to records | 400 |
//! | dispatch | 429 (queue full) / 500 (handler error) |
//!
//! A successful delivery answers `{"status":"ok"}` with 200 when handled
//! inline or 202 when queued.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderValue, ALLOW, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use thiserror::Error;

use crate::config::WebhookConfig;
use crate::error::{HandlerError, PayloadError, SignatureError};
use crate::payload;
use crate::queue::WorkerPool;
use crate::rate_limit::{self, RateLimiter};
use crate::signature::SignatureVerifier;
use crate::Record;

/// Acknowledgement body for accepted deliveries.
pub const ACK_BODY: &str = r#"{"status":"ok"}"#;

/// Response type produced by the service.
pub type WebhookResponse = Response<Full<Bytes>>;

/// Future returned by a [`RecordHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Downstream callback receiving the records of one delivery.
pub type RecordHandler = Arc<dyn Fn(Vec<Record>) -> HandlerFuture + Send + Sync>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Wraps an async closure as a [`RecordHandler`].
///
/// ```rust
/// use sluice_webhook::{handler_fn, Record};
///
/// let handler = handler_fn(|records: Vec<Record>| async move {
///     println!("received {} records", records.len());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> RecordHandler
where
    F: Fn(Vec<Record>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |records: Vec<Record>| -> HandlerFuture { Box::pin(f(records)) })
}

/// Where decoded records go.
#[derive(Clone)]
pub enum Dispatch {
    /// No handler registered: deliveries are acknowledged and dropped.
    Discard,
    /// Synchronous mode: the handler runs before the response is sent.
    Inline(RecordHandler),
    /// Asynchronous mode: batches are queued for the worker pool.
    Queued(Arc<WorkerPool>),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discard => f.write_str("Discard"),
            Self::Inline(_) => f.write_str("Inline"),
            Self::Queued(pool) => f.debug_tuple("Queued").field(pool).finish(),
        }
    }
}

/// Why a delivery was refused.
///
/// The display text is the plain-text response body.
#[derive(Debug, Error)]
pub enum Rejection {
    /// Anything but `POST`.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Path other than the configured endpoint.
    #[error("Not found")]
    NotFound,

    /// The rate limiter had no token left.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The body could not be read before the request timeout.
    #[error("Failed to read request body")]
    BodyRead,

    /// The body exceeded the configured size cap.
    #[error("Request body too large")]
    PayloadTooLarge,

    /// The body was empty.
    #[error("Request body is empty")]
    EmptyBody,

    /// The signature was missing or wrong.
    #[error("Invalid signature")]
    Signature(#[source] SignatureError),

    /// The body did not decode to records.
    #[error("Invalid JSON payload")]
    Payload(#[source] PayloadError),

    /// Every queue slot was taken.
    #[error("Queue full")]
    QueueFull,

    /// The synchronous handler failed.
    #[error("Internal server error")]
    Handler,
}

impl Rejection {
    /// HTTP status for this rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited | Self::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            Self::BodyRead | Self::EmptyBody | Self::Payload(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Signature(_) => StatusCode::UNAUTHORIZED,
            Self::Handler => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text response carrying the rejection message.
    #[must_use]
    pub fn into_response(self) -> WebhookResponse {
        let mut builder = Response::builder()
            .status(self.status())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(X_CONTENT_TYPE_OPTIONS, "nosniff");
        if matches!(self, Self::MethodNotAllowed) {
            builder = builder.header(ALLOW, HeaderValue::from_static("POST"));
        }

        builder
            .body(Full::new(Bytes::from(format!("{self}\n"))))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
    }
}

/// Request handler shared by every connection of one server run.
#[derive(Clone)]
pub struct WebhookService {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    data_field: Option<String>,
    request_timeout: Duration,
    max_body_bytes: Option<usize>,
    limiter: Option<Arc<RateLimiter>>,
    verifier: Option<SignatureVerifier>,
    dispatch: Dispatch,
}

impl fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookService")
            .field("endpoint", &self.inner.endpoint)
            .field("rate_limited", &self.inner.limiter.is_some())
            .field("verifier", &self.inner.verifier)
            .field("dispatch", &self.inner.dispatch)
            .finish_non_exhaustive()
    }
}

impl WebhookService {
    /// Builds the handler for one server run.
    pub fn new(
        config: &WebhookConfig,
        verifier: Option<SignatureVerifier>,
        limiter: Option<Arc<RateLimiter>>,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: config.endpoint().to_string(),
                data_field: config.data_field().map(str::to_string),
                request_timeout: config.request_timeout(),
                max_body_bytes: config.max_body_bytes(),
                limiter,
                verifier,
                dispatch,
            }),
        }
    }

    /// Registered request path.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Handles one delivery and produces its response.
    pub async fn handle<B>(&self, request: Request<B>) -> WebhookResponse
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let started = Instant::now();

        match self.process(request).await {
            Ok((status, record_count)) => {
                tracing::debug!(
                    endpoint = %self.inner.endpoint,
                    record_count,
                    duration = ?started.elapsed(),
                    "webhook request processed"
                );
                ack_response(status)
            }
            Err(rejection) => rejection.into_response(),
        }
    }

    async fn process<B>(&self, request: Request<B>) -> Result<(StatusCode, usize), Rejection>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let inner = &self.inner;

        if request.method() != Method::POST {
            tracing::warn!(
                method = %request.method(),
                endpoint = %inner.endpoint,
                "webhook received non-POST request"
            );
            return Err(Rejection::MethodNotAllowed);
        }

        if request.uri().path() != inner.endpoint {
            tracing::warn!(
                expected = %inner.endpoint,
                received = %request.uri().path(),
                "webhook received request on wrong endpoint"
            );
            return Err(Rejection::NotFound);
        }

        if !rate_limit::allow(inner.limiter.as_deref()) {
            tracing::warn!(endpoint = %inner.endpoint, "webhook rate limit exceeded");
            return Err(Rejection::RateLimited);
        }

        let (parts, body) = request.into_parts();
        let body = self.read_body(body).await?;

        if body.is_empty() {
            tracing::warn!(endpoint = %inner.endpoint, "webhook received empty body");
            return Err(Rejection::EmptyBody);
        }

        if let Some(verifier) = &inner.verifier {
            verifier.verify(&parts.headers, &body).map_err(|e| {
                tracing::warn!(
                    endpoint = %inner.endpoint,
                    error = %e,
                    "webhook signature validation failed"
                );
                Rejection::Signature(e)
            })?;
        }

        let records = payload::decode(&body, inner.data_field.as_deref()).map_err(|e| {
            tracing::error!(
                endpoint = %inner.endpoint,
                error = %e,
                body_size = body.len(),
                "failed to parse webhook payload"
            );
            Rejection::Payload(e)
        })?;
        let record_count = records.len();

        match &inner.dispatch {
            Dispatch::Discard => Ok((StatusCode::OK, record_count)),
            Dispatch::Inline(handler) => match handler(records).await {
                Ok(()) => Ok((StatusCode::OK, record_count)),
                Err(e) => {
                    tracing::error!(
                        endpoint = %inner.endpoint,
                        error = %e,
                        record_count,
                        "webhook handler returned error"
                    );
                    Err(Rejection::Handler)
                }
            },
            Dispatch::Queued(pool) => {
                if pool.enqueue(records) {
                    Ok((StatusCode::ACCEPTED, record_count))
                } else {
                    tracing::warn!(
                        endpoint = %inner.endpoint,
                        queue_size = pool.capacity(),
                        "webhook queue full"
                    );
                    Err(Rejection::QueueFull)
                }
            }
        }
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, Rejection>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let inner = &self.inner;
        let collect = async {
            match inner.max_body_bytes {
                Some(limit) => Limited::new(body, limit)
                    .collect()
                    .await
                    .map(|collected| collected.to_bytes()),
                None => body
                    .collect()
                    .await
                    .map(|collected| collected.to_bytes())
                    .map_err(Into::into),
            }
        };

        match tokio::time::timeout(inner.request_timeout, collect).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) if e.is::<LengthLimitError>() => {
                tracing::warn!(
                    endpoint = %inner.endpoint,
                    max_body_bytes = inner.max_body_bytes,
                    "webhook request body too large"
                );
                Err(Rejection::PayloadTooLarge)
            }
            Ok(Err(e)) => {
                tracing::error!(
                    endpoint = %inner.endpoint,
                    error = %e,
                    "failed to read webhook request body"
                );
                Err(Rejection::BodyRead)
            }
            Err(_) => {
                tracing::error!(
                    endpoint = %inner.endpoint,
                    timeout = ?inner.request_timeout,
                    "timed out reading webhook request body"
                );
                Err(Rejection::BodyRead)
            }
        }
    }
}

fn ack_response(status: StatusCode) -> WebhookResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(ACK_BODY.as_bytes())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
