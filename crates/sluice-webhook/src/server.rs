//! Webhook server lifecycle.
//!
//! A [`WebhookServer`] moves through [`ServerPhase`]s:
//!
//! ```text
//! Created ─start─▶ Starting ─bind ok─▶ Running ─trigger─▶ ShuttingDown ─▶ Stopped
//!                      └──────────bind failed───────────────────────────▶ Stopped
//! ```
//!
//! [`WebhookServer::start`] blocks until the cancellation signal fires, a
//! process signal arrives, [`WebhookServer::stop`] is called or the accept
//! loop fails. Every trigger funnels into one shutdown sequence guarded by a
//! [`ShutdownLatch`], so concurrent triggers run it exactly once.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sluice_webhook::{handler_fn, Record, ShutdownSignal, WebhookConfig, WebhookServer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WebhookConfig::builder()
//!     .endpoint("/webhook/orders")
//!     .listen_addr("127.0.0.1:0")
//!     .build()?;
//!
//! let server = Arc::new(WebhookServer::new(config));
//! let handler = handler_fn(|records: Vec<Record>| async move {
//!     println!("{} records", records.len());
//!     Ok(())
//! });
//!
//! let cancel = ShutdownSignal::new();
//! let running = Arc::clone(&server);
//! let task = tokio::spawn({
//!     let cancel = cancel.clone();
//!     async move { running.start(cancel, Some(handler)).await }
//! });
//!
//! // ... later
//! cancel.trigger();
//! task.await??;
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::WebhookConfig;
use crate::error::{WebhookError, WebhookResult};
use crate::handler::{Dispatch, RecordHandler, WebhookService};
use crate::queue::WorkerPool;
use crate::rate_limit::RateLimiter;
use crate::shutdown::{wait_for_os_signal, ConnectionTracker, ShutdownLatch, ShutdownSignal};
use crate::signature::SignatureVerifier;

/// Consecutive non-transient accept failures tolerated before the accept
/// loop gives up.
const MAX_ACCEPT_FAILURES: u32 = 8;

/// Pause after a non-transient accept failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle phase of a [`WebhookServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerPhase {
    /// Constructed, never started.
    Created,
    /// `start` is binding the listener.
    Starting,
    /// Accepting deliveries.
    Running,
    /// The shutdown sequence is running.
    ShuttingDown,
    /// Stopped; may be started again.
    Stopped,
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Webhook ingestion server.
///
/// One instance serves one endpoint. Share it behind an [`Arc`] to call
/// [`stop`](Self::stop) or the accessors from other tasks while
/// [`start`](Self::start) is running.
pub struct WebhookServer {
    config: WebhookConfig,
    state: Mutex<ServerState>,
}

struct ServerState {
    phase: ServerPhase,
    local_addr: Option<SocketAddr>,
    run: Option<Arc<RunControl>>,
    starting: Option<Arc<StartAttempt>>,
}

/// Shared by `start` and `stop` while the server is `Starting`.
struct StartAttempt {
    /// Becomes the run's stop signal once the server is running.
    stop: ShutdownSignal,
    /// Fired when `start` returns or is dropped.
    settled: ShutdownSignal,
}

/// Handles owned by one run, from a successful bind until `Stopped`.
struct RunControl {
    latch: ShutdownLatch,
    /// Fired by [`WebhookServer::stop`].
    stop: ShutdownSignal,
    /// Stop accepting and ask open connections to finish.
    drain: ShutdownSignal,
    /// Drop connections still open after the shutdown timeout.
    force: ShutdownSignal,
    /// Fired once the accept loop has released the listener.
    listener_closed: ShutdownSignal,
    tracker: ConnectionTracker,
    limiter: Option<Arc<RateLimiter>>,
    pool: Option<Arc<WorkerPool>>,
}

impl RunControl {
    fn new(
        stop: ShutdownSignal,
        limiter: Option<Arc<RateLimiter>>,
        pool: Option<Arc<WorkerPool>>,
    ) -> Self {
        Self {
            latch: ShutdownLatch::new(),
            stop,
            drain: ShutdownSignal::new(),
            force: ShutdownSignal::new(),
            listener_closed: ShutdownSignal::new(),
            tracker: ConnectionTracker::new(),
            limiter,
            pool,
        }
    }

    fn stop_limiter(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.stop();
        }
    }
}

/// Where the accept loop takes connections from.
trait Listener: Send + Sync + 'static {
    fn bound_addr(&self) -> io::Result<SocketAddr>;

    fn next_connection(
        &self,
    ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send + '_;
}

impl Listener for TcpListener {
    fn bound_addr(&self) -> io::Result<SocketAddr> {
        self.local_addr()
    }

    fn next_connection(
        &self,
    ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send + '_ {
        self.accept()
    }
}

impl fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WebhookServer")
            .field("endpoint", &self.config.endpoint())
            .field("phase", &state.phase)
            .field("local_addr", &state.local_addr)
            .finish_non_exhaustive()
    }
}

impl WebhookServer {
    /// Creates a server for a validated configuration.
    #[must_use]
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ServerState {
                phase: ServerPhase::Created,
                local_addr: None,
                run: None,
                starting: None,
            }),
        }
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ServerPhase {
        self.state.lock().phase
    }

    /// Returns `true` while deliveries are being accepted.
    ///
    /// This turns `false` as soon as the shutdown sequence begins, while
    /// open connections and queued batches may still be finishing. Use
    /// [`phase`](Self::phase) to tell [`ServerPhase::ShuttingDown`] apart
    /// from [`ServerPhase::Stopped`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase() == ServerPhase::Running
    }

    /// The bound address while running, with the real port when the
    /// configured port was 0.
    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        self.state.lock().local_addr
    }

    /// Binds the listener and serves deliveries until a shutdown trigger.
    ///
    /// Triggers are `cancel`, SIGINT/SIGTERM (unless disabled in the
    /// configuration), [`stop`](Self::stop) and a fatal accept failure.
    /// Returns the shutdown result.
    ///
    /// With a handler and a positive queue capacity, deliveries are queued
    /// for the worker pool. With a handler and no queue, the handler runs
    /// inline. Without a handler, deliveries are acknowledged and dropped.
    pub async fn start(
        &self,
        cancel: ShutdownSignal,
        handler: Option<RecordHandler>,
    ) -> WebhookResult<()> {
        self.start_with(cancel, handler, self.bind()).await
    }

    async fn start_with<L: Listener>(
        &self,
        cancel: ShutdownSignal,
        handler: Option<RecordHandler>,
        bind: impl Future<Output = WebhookResult<L>>,
    ) -> WebhookResult<()> {
        let attempt = {
            let mut state = self.state.lock();
            if matches!(
                state.phase,
                ServerPhase::Starting | ServerPhase::Running | ServerPhase::ShuttingDown
            ) {
                return Err(WebhookError::AlreadyRunning);
            }
            let attempt = Arc::new(StartAttempt {
                stop: ShutdownSignal::new(),
                settled: ShutdownSignal::new(),
            });
            state.phase = ServerPhase::Starting;
            state.starting = Some(Arc::clone(&attempt));
            attempt
        };
        let _settled = TriggerOnDrop(attempt.settled.clone());

        let verifier = match self.config.signature().map(SignatureVerifier::new).transpose() {
            Ok(verifier) => verifier,
            Err(e) => {
                self.abort_start(None);
                return Err(e.into());
            }
        };

        let limiter = self
            .config
            .rate_limit()
            .and_then(RateLimiter::new)
            .map(Arc::new);

        let listener = match bind.await {
            Ok(listener) => listener,
            Err(e) => {
                self.abort_start(limiter.as_deref());
                tracing::error!(
                    address = %self.config.listen_addr(),
                    error = %e,
                    "failed to start webhook listener"
                );
                return Err(e);
            }
        };
        let local_addr = match listener.bound_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.abort_start(limiter.as_deref());
                return Err(WebhookError::bind(self.config.listen_addr(), e));
            }
        };

        let pool = match (&handler, self.config.is_async()) {
            (Some(handler), true) => Some(Arc::new(WorkerPool::start(
                self.config.queue_capacity(),
                self.config.workers(),
                Arc::clone(handler),
            ))),
            _ => None,
        };
        let dispatch = match (handler, &pool) {
            (_, Some(pool)) => Dispatch::Queued(Arc::clone(pool)),
            (Some(handler), None) => Dispatch::Inline(handler),
            (None, None) => Dispatch::Discard,
        };
        let service = WebhookService::new(&self.config, verifier, limiter.clone(), dispatch);
        let run = Arc::new(RunControl::new(attempt.stop.clone(), limiter, pool));

        if !self.enter_running(&attempt, &run, local_addr) {
            drop(listener);
            run.stop_limiter();
            if let Some(pool) = &run.pool {
                pool.close();
                pool.join().await;
            }
            self.abort_start(None);
            tracing::info!(
                endpoint = %self.config.endpoint(),
                "webhook server stopped before it started"
            );
            return Ok(());
        }

        let mut serve = spawn_accept_loop(
            listener,
            service,
            Arc::clone(&run),
            self.config.request_timeout(),
        );

        tracing::info!(
            endpoint = %self.config.endpoint(),
            address = %local_addr,
            queue_size = self.config.queue_capacity(),
            workers = run.pool.as_ref().map_or(0, |_| self.config.workers()),
            "webhook server started"
        );

        let handle_os_signals = self.config.handle_os_signals();
        let os_signal = async move {
            if handle_os_signals {
                match wait_for_os_signal().await {
                    Ok(name) => {
                        tracing::info!(signal = name, "received shutdown signal");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to register shutdown signal handlers");
                    }
                }
            }
            std::future::pending::<()>().await;
        };

        tokio::select! {
            () = cancel.recv() => {
                tracing::info!(endpoint = %self.config.endpoint(), "webhook server canceled");
                self.shutdown(&run).await
            }
            () = os_signal => self.shutdown(&run).await,
            () = run.stop.recv() => self.shutdown(&run).await,
            result = &mut serve => match result {
                // The loop only exits cleanly once a shutdown has begun.
                Ok(Ok(())) => self.shutdown(&run).await,
                Ok(Err(e)) => Err(self.fail(&run, e).await),
                Err(e) => Err(self.fail(&run, io::Error::other(e.to_string())).await),
            },
        }
    }

    /// Runs the shutdown sequence for the current run.
    ///
    /// Does nothing if the server is not running. Concurrent calls wait for
    /// the one sequence to complete.
    ///
    /// While the listener is still binding, the pending start is told to
    /// give up and this call waits until it has.
    pub async fn stop(&self) -> WebhookResult<()> {
        let (run, attempt) = {
            let state = self.state.lock();
            if let Some(attempt) = &state.starting {
                attempt.stop.trigger();
            }
            (state.run.clone(), state.starting.clone())
        };

        if let Some(run) = run {
            run.stop.trigger();
            return self.shutdown(&run).await;
        }
        if let Some(attempt) = attempt {
            attempt.settled.recv().await;
        }
        Ok(())
    }

    /// Publishes the run unless `stop` was called during startup.
    fn enter_running(
        &self,
        attempt: &StartAttempt,
        run: &Arc<RunControl>,
        local_addr: SocketAddr,
    ) -> bool {
        let mut state = self.state.lock();
        if attempt.stop.is_shutdown() {
            return false;
        }
        state.starting = None;
        state.phase = ServerPhase::Running;
        state.local_addr = Some(local_addr);
        state.run = Some(Arc::clone(run));
        true
    }

    fn abort_start(&self, limiter: Option<&RateLimiter>) {
        if let Some(limiter) = limiter {
            limiter.stop();
        }
        let mut state = self.state.lock();
        state.starting = None;
        state.phase = ServerPhase::Stopped;
    }

    async fn bind(&self) -> WebhookResult<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(addr.as_str())
            .await
            .map_err(|e| WebhookError::bind(self.config.listen_addr(), e))
    }

    async fn shutdown(&self, run: &Arc<RunControl>) -> WebhookResult<()> {
        if !run.latch.claim() {
            run.latch.completed().await;
            return Ok(());
        }

        self.state.lock().phase = ServerPhase::ShuttingDown;
        tracing::info!(endpoint = %self.config.endpoint(), "webhook server shutting down");

        run.stop_limiter();

        run.drain.trigger();
        run.listener_closed.recv().await;

        let timeout = self.config.shutdown_timeout();
        let result = match tokio::time::timeout(timeout, run.tracker.wait_for_shutdown()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let active = run.tracker.active_connections();
                tracing::warn!(
                    active,
                    timeout = ?timeout,
                    "shutdown timeout reached, dropping open connections"
                );
                run.force.trigger();
                Err(WebhookError::ShutdownTimeout { timeout, active })
            }
        };

        if let Some(pool) = &run.pool {
            pool.close();
            pool.join().await;
        }

        self.finish(run);
        tracing::info!(endpoint = %self.config.endpoint(), "webhook server stopped");
        result
    }

    async fn fail(&self, run: &Arc<RunControl>, error: io::Error) -> WebhookError {
        if run.latch.claim() {
            tracing::error!(
                endpoint = %self.config.endpoint(),
                error = %error,
                "webhook server error"
            );
            run.stop_limiter();
            run.drain.trigger();
            run.force.trigger();
            if let Some(pool) = &run.pool {
                pool.close();
            }
            self.finish(run);
        } else {
            run.latch.completed().await;
        }
        WebhookError::Serve(error)
    }

    fn finish(&self, run: &Arc<RunControl>) {
        {
            let mut state = self.state.lock();
            if state.run.as_ref().is_some_and(|current| Arc::ptr_eq(current, run)) {
                state.run = None;
                state.local_addr = None;
                state.phase = ServerPhase::Stopped;
            }
        }
        run.latch.complete();
    }
}

/// Fires a signal when dropped, including on panic.
struct TriggerOnDrop(ShutdownSignal);

impl Drop for TriggerOnDrop {
    fn drop(&mut self) {
        self.0.trigger();
    }
}

fn spawn_accept_loop<L: Listener>(
    listener: L,
    service: WebhookService,
    run: Arc<RunControl>,
    header_timeout: Duration,
) -> JoinHandle<io::Result<()>> {
    tokio::spawn(async move {
        let _closed = TriggerOnDrop(run.listener_closed.clone());
        accept_loop(listener, service, &run, header_timeout).await
    })
}

async fn accept_loop<L: Listener>(
    listener: L,
    service: WebhookService,
    run: &Arc<RunControl>,
    header_timeout: Duration,
) -> io::Result<()> {
    let drained = run.drain.recv();
    tokio::pin!(drained);
    let mut failures = 0;

    loop {
        tokio::select! {
            biased;
            () = &mut drained => return Ok(()),
            accepted = listener.next_connection() => match accepted {
                Ok((stream, remote_addr)) => {
                    failures = 0;
                    spawn_connection(stream, remote_addr, service.clone(), run, header_timeout);
                }
                Err(e) if is_transient(&e) => {
                    tracing::debug!(error = %e, "transient accept error");
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_ACCEPT_FAILURES {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, failures, "failed to accept connection");
                    tokio::select! {
                        () = &mut drained => return Ok(()),
                        () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            },
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

fn spawn_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    service: WebhookService,
    run: &Arc<RunControl>,
    header_timeout: Duration,
) {
    let token = run.tracker.acquire();
    let drained = run.drain.recv();
    let forced = run.force.recv();

    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let svc = service_fn(move |request: Request<Incoming>| {
            let service = service.clone();
            async move { Ok::<_, Infallible>(service.handle(request).await) }
        });

        let conn = http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(header_timeout)
            .serve_connection(io, svc);
        tokio::pin!(conn, drained, forced);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = &mut drained => {
                conn.as_mut().graceful_shutdown();
                tokio::select! {
                    result = conn.as_mut() => result,
                    () = &mut forced => {
                        tracing::debug!(%remote_addr, "connection dropped after shutdown timeout");
                        Ok(())
                    }
                }
            }
        };

        if let Err(e) = result {
            tracing::debug!(%remote_addr, error = %e, "webhook connection error");
        }
        drop(token);
    });
}
