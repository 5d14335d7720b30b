//! Connection supervisor: one socket, one backoff schedule, one owner.
//!
//! The supervisor owns the realtime socket's whole lifecycle. Every socket
//! it creates is stamped with a monotonically increasing *generation*;
//! every async callback compares its generation against the current one
//! before mutating anything, which makes callbacks from superseded sockets
//! inert. That comparison is the only synchronization the lifecycle needs.
//!
//! Reconnection: an unclean close schedules a retry after
//! `min(base * 2^attempt, max)` ms. The attempt counter resets on a
//! successful open and on an explicit [`ConnectionSupervisor::reconnect`].
//! Once `max_attempts` consecutive retries have failed the supervisor
//! parks in `Error` and waits for a manual reconnect.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::connection::{
    BASE_DELAY_MS, CONNECT_TIMEOUT_MS, MAX_ATTEMPTS, MAX_DELAY_MS, backoff_delay_ms,
};
use pulse_core::ConnectionStatus;

use crate::transport::{SocketEvent, SocketHandle, Transport, endpoint_url};

/// Credentials required to open the realtime socket.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Session token.
    pub token: String,
    /// Business identifier.
    pub business_id: String,
}

impl Credentials {
    /// Whether both fields are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.business_id.is_empty()
    }
}

/// Supervisor tuning knobs.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Realtime endpoint (credentials are appended as query parameters).
    pub ws_url: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Base reconnect delay in milliseconds.
    pub base_delay_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive failed retries before parking in `Error`.
    pub max_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://push.pulseinbox.app/notifications".to_string(),
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// What the frame sink wants the supervisor to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Keep reading.
    Handled,
    /// The server rejected the session; terminal, never retried.
    AuthFailure {
        /// Server error code (401 or 403).
        code: u16,
    },
}

/// Consumer of inbound frames (the event dispatcher in production).
pub trait FrameSink: Send + Sync + 'static {
    /// Handle one raw text frame.
    fn on_frame(&self, raw: &str) -> FrameDisposition;
}

/// Invalidates the user session on a terminal auth failure.
pub trait SessionGate: Send + Sync + 'static {
    /// The server rejected our credentials.
    fn invalidate(&self, code: u16);
}

/// Gate that only logs. Useful for tests and headless runs.
#[derive(Debug, Default)]
pub struct LoggingSessionGate;

impl SessionGate for LoggingSessionGate {
    fn invalidate(&self, code: u16) {
        warn!(code, "session invalidated by server");
    }
}

/// Owns the realtime socket lifecycle. One per process.
pub struct ConnectionSupervisor {
    /// Self-reference for spawning socket and timer tasks.
    weak: Weak<Self>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn FrameSink>,
    gate: Arc<dyn SessionGate>,
    config: SupervisorConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Current socket generation. Callbacks holding an older value are inert.
    generation: AtomicU64,
    /// Consecutive failed retries since the last successful open.
    attempt: AtomicU32,
    credentials: Mutex<Option<Credentials>>,
    active_closer: Mutex<Option<crate::transport::SocketCloser>>,
    timer_cancel: Mutex<CancellationToken>,
}

impl ConnectionSupervisor {
    /// Build a supervisor. Nothing connects until [`Self::connect`].
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn FrameSink>,
        gate: Arc<dyn SessionGate>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let (status_tx, _status_rx) = watch::channel(ConnectionStatus::Disconnected);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            transport,
            sink,
            gate,
            config,
            status_tx,
            generation: AtomicU64::new(0),
            attempt: AtomicU32::new(0),
            credentials: Mutex::new(None),
            active_closer: Mutex::new(None),
            timer_cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status transitions (for the UI indicator).
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Open the socket with the given credentials.
    ///
    /// Incomplete credentials transition straight to `Error` with no
    /// network I/O. An already-active socket is superseded.
    pub fn connect(&self, credentials: Credentials) {
        if !credentials.is_complete() {
            warn!("connect refused: missing token or business id");
            let _ = self.status_tx.send_replace(ConnectionStatus::Error);
            return;
        }
        *self.credentials.lock() = Some(credentials);
        self.attempt.store(0, Ordering::SeqCst);
        self.cancel_pending_timer();
        self.spawn_attempt();
    }

    /// Manually resume connecting after `Error`.
    ///
    /// Resets the attempt counter and reuses the stored credentials.
    pub fn reconnect(&self) {
        if self.credentials.lock().is_none() {
            warn!("reconnect refused: never connected");
            let _ = self.status_tx.send_replace(ConnectionStatus::Error);
            return;
        }
        self.attempt.store(0, Ordering::SeqCst);
        self.cancel_pending_timer();
        self.spawn_attempt();
    }

    /// Shut down: close the socket cleanly and cancel any pending retry.
    pub fn teardown(&self) {
        self.cancel_pending_timer();
        // Bump the generation so every in-flight callback goes inert.
        let _ = self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(closer) = self.active_closer.lock().take() {
            closer.close(1000, "shutting down");
        }
        let _ = self.status_tx.send_replace(ConnectionStatus::Disconnected);
        info!("supervisor torn down");
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn cancel_pending_timer(&self) {
        let mut guard = self.timer_cancel.lock();
        guard.cancel();
        *guard = CancellationToken::new();
    }

    /// Mint the next generation and start a connect attempt for it.
    fn spawn_attempt(&self) {
        if let Some(closer) = self.active_closer.lock().take() {
            closer.close(1000, "superseded");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.status_tx.send_replace(ConnectionStatus::Connecting);
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        drop(tokio::spawn(async move {
            this.run_socket(generation).await;
        }));
    }

    async fn run_socket(self: Arc<Self>, generation: u64) {
        let url = {
            let credentials = self.credentials.lock();
            let Some(credentials) = credentials.as_ref() else {
                return;
            };
            endpoint_url(&self.config.ws_url, &credentials.token, &credentials.business_id)
        };
        let url = match url {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build endpoint url");
                if self.is_current(generation) {
                    let _ = self.status_tx.send_replace(ConnectionStatus::Error);
                }
                return;
            }
        };

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let transport = Arc::clone(&self.transport);
        let mut dial = Box::pin(async move { transport.connect(&url).await });
        let handle = tokio::select! {
            result = &mut dial => match result {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(generation, error = %e, "connect failed");
                    self.handle_unclean_close(generation);
                    return;
                }
            },
            () = tokio::time::sleep(timeout) => {
                warn!(generation, timeout_ms = self.config.connect_timeout_ms, "connect timed out");
                // A dial that completes after the deadline is never adopted.
                drop(tokio::spawn(async move {
                    if let Ok(late) = dial.await {
                        late.closer().close(1000, "timeout");
                    }
                }));
                self.handle_unclean_close(generation);
                return;
            }
        };

        if !self.is_current(generation) {
            handle.closer().close(1000, "superseded");
            return;
        }
        *self.active_closer.lock() = Some(handle.closer());
        self.attempt.store(0, Ordering::SeqCst);
        let _ = self.status_tx.send_replace(ConnectionStatus::Connected);
        info!(generation, "realtime socket open");

        self.read_loop(generation, handle).await;
    }

    async fn read_loop(&self, generation: u64, mut handle: SocketHandle) {
        loop {
            let Some(event) = handle.recv().await else {
                if self.is_current(generation) {
                    debug!(generation, "socket pump vanished");
                    let _ = self.active_closer.lock().take();
                    self.handle_unclean_close(generation);
                }
                return;
            };
            if !self.is_current(generation) {
                // Superseded socket: its callbacks never mutate state.
                return;
            }
            match event {
                SocketEvent::Frame(text) => {
                    if let FrameDisposition::AuthFailure { code } = self.sink.on_frame(&text) {
                        warn!(code, "authentication rejected by server");
                        if let Some(closer) = self.active_closer.lock().take() {
                            closer.close(1000, "auth failure");
                        }
                        let _ = self.status_tx.send_replace(ConnectionStatus::Error);
                        self.gate.invalidate(code);
                        return;
                    }
                }
                SocketEvent::Closed { code, was_clean } => {
                    let _ = self.active_closer.lock().take();
                    if code.is_clean(was_clean) {
                        info!(generation, "socket closed cleanly");
                        let _ = self.status_tx.send_replace(ConnectionStatus::Disconnected);
                    } else {
                        warn!(generation, code = code.as_u16(), was_clean, "unclean close");
                        self.handle_unclean_close(generation);
                    }
                    return;
                }
            }
        }
    }

    fn handle_unclean_close(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let attempt = self.attempt.load(Ordering::SeqCst);
        if attempt >= self.config.max_attempts {
            warn!(attempt, "reconnect attempts exhausted");
            let _ = self.status_tx.send_replace(ConnectionStatus::Error);
            return;
        }
        let delay = backoff_delay_ms(attempt, self.config.base_delay_ms, self.config.max_delay_ms);
        self.attempt.store(attempt + 1, Ordering::SeqCst);
        let _ = self.status_tx.send_replace(ConnectionStatus::Connecting);
        debug!(attempt = attempt + 1, delay_ms = delay, "scheduling reconnect");

        let cancel = self.timer_cancel.lock().child_token();
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        drop(tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(delay)) => {}
                () = cancel.cancelled() => return,
            }
            // The timer belongs to the generation that observed the close;
            // a connect() or teardown() in the meantime supersedes it.
            if this.is_current(generation) {
                this.spawn_attempt();
            }
        }));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
