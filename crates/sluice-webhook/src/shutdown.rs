//! Shutdown coordination primitives.
//!
//! - [`ShutdownSignal`]: a clonable, idempotent trigger that any number of
//!   tasks can await
//! - [`ShutdownLatch`]: a one-shot guard so the shutdown sequence runs once
//!   no matter how many triggers race
//! - [`ConnectionTracker`]: counts open connections so shutdown can wait for
//!   them to drain
//!
//! # Example
//!
//! ```rust
//! use sluice_webhook::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let observer = shutdown.clone();
//!
//! assert!(shutdown.trigger());
//! assert!(!shutdown.trigger());
//! assert!(observer.is_shutdown());
//! ```

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

/// A signal that can be triggered once and awaited by many tasks.
///
/// Clones share the same state. Awaiting [`recv`](Self::recv) after the
/// signal fired completes immediately.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Fires the signal.
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn trigger(&self) -> bool {
        self.sender.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    /// Returns `true` if the signal has fired.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Returns a future that completes once the signal has fired.
    ///
    /// The future owns its handle, so it can be moved into spawned tasks.
    pub fn recv(&self) -> impl Future<Output = ()> + Send + 'static {
        let sender = Arc::clone(&self.sender);
        async move {
            let mut receiver = sender.subscribe();
            // The sender lives in this future, so the channel cannot close.
            let _ = receiver.wait_for(|triggered| *triggered).await;
        }
    }

    /// Creates a signal that fires on SIGTERM or SIGINT.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let fired = signal.clone();

        tokio::spawn(async move {
            match wait_for_os_signal().await {
                Ok(name) => {
                    tracing::info!(signal = name, "received shutdown signal");
                    fired.trigger();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register shutdown signal handlers");
                }
            }
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for SIGTERM or SIGINT and returns the name of the one received.
///
/// On non-Unix platforms only Ctrl+C is observed.
pub async fn wait_for_os_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sigint.recv() => Ok("SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// One-shot guard for a shutdown sequence.
///
/// The first caller of [`claim`](Self::claim) runs the sequence and calls
/// [`complete`](Self::complete). Everyone else awaits
/// [`completed`](Self::completed).
#[derive(Debug, Default)]
pub struct ShutdownLatch {
    claimed: AtomicBool,
    done: ShutdownSignal,
}

impl ShutdownLatch {
    /// Creates an unclaimed latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the latch. Returns `true` exactly once.
    pub fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` once someone has claimed the latch.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Marks the claimed sequence as finished.
    pub fn complete(&self) {
        self.done.trigger();
    }

    /// Completes once the claimant has called [`complete`](Self::complete).
    pub fn completed(&self) -> impl Future<Output = ()> + Send + 'static {
        self.done.recv()
    }
}

/// Tracks open connections during shutdown.
///
/// Each connection holds a [`ConnectionToken`]; dropping the last one wakes
/// [`wait_for_shutdown`](Self::wait_for_shutdown).
///
/// ```rust
/// use sluice_webhook::shutdown::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for as long as the token lives.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every token has been dropped.
    pub async fn wait_for_shutdown(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the count so a drop in between is not missed.
            notified.as_mut().enable();

            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// An open connection registered with a [`ConnectionTracker`].
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}
