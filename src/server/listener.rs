//! Connection acceptor
//!
//! Binds the ingest listener and spawns one [`IngestSession`] task per
//! accepted connection. `stop` closes the listener, signals every session
//! and waits for all of them to finish.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};
use crate::registry::StreamRegistry;
use crate::segmenter::SegmenterFactory;
use crate::server::config::ServerConfig;
use crate::session::{IngestSession, OutputBridge, SessionContext};
use crate::stats::ResourceMonitor;
use crate::transport::TransportFactory;

enum RunState {
    Idle,
    Starting,
    Running {
        addr: SocketAddr,
        accept_task: JoinHandle<()>,
    },
    Stopped,
}

/// Ingest server
///
/// An acceptor runs once: after [`Acceptor::stop`] it cannot be restarted.
pub struct Acceptor<F: TransportFactory> {
    config: Arc<ServerConfig>,
    factory: Arc<F>,
    ctx: SessionContext,
    tracker: TaskTracker,
    next_session_id: Arc<AtomicU64>,
    state: Mutex<RunState>,
}

impl<F: TransportFactory> Acceptor<F> {
    pub fn new(
        config: ServerConfig,
        factory: F,
        segmenters: Arc<dyn SegmenterFactory>,
        registry: Arc<StreamRegistry>,
        monitor: Arc<ResourceMonitor>,
    ) -> Self {
        let config = Arc::new(config);
        let bridge = Arc::new(OutputBridge::new(segmenters, config.segmenter_settings()));
        let ctx = SessionContext::new(Arc::clone(&config), registry, bridge, monitor);

        Self {
            config,
            factory: Arc::new(factory),
            ctx,
            tracker: TaskTracker::new(),
            next_session_id: Arc::new(AtomicU64::new(1)),
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.ctx.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listener and start accepting in the background
    ///
    /// Returns the bound address, which differs from the configured one
    /// when binding to port 0.
    pub async fn start(&self) -> Result<SocketAddr> {
        {
            let mut state = self.lock_state();
            match *state {
                RunState::Idle => *state = RunState::Starting,
                RunState::Stopped => return Err(Error::Stopped),
                _ => return Err(Error::AlreadyRunning),
            }
        }

        let listener = match TcpListener::bind(self.config.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.abandon_start();
                return Err(e.into());
            }
        };
        self.launch(listener)
    }

    /// Spawn the accept loop on a bound listener
    ///
    /// `stop` may have run while the bind was pending; the listener is then
    /// dropped and the acceptor stays stopped.
    fn launch(&self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.abandon_start();
                return Err(e.into());
            }
        };

        let mut state = self.lock_state();
        if !matches!(*state, RunState::Starting) {
            tracing::debug!(addr = %addr, "Stopped while binding, closing listener");
            return Err(Error::Stopped);
        }

        let semaphore = (self.config.max_connections > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_connections)));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.factory),
            self.ctx.clone(),
            self.tracker.clone(),
            semaphore,
            Arc::clone(&self.next_session_id),
        ));

        *state = RunState::Running { addr, accept_task };
        tracing::info!(addr = %addr, "RTMP server listening");
        Ok(addr)
    }

    fn abandon_start(&self) {
        let mut state = self.lock_state();
        if matches!(*state, RunState::Starting) {
            *state = RunState::Idle;
        }
    }

    /// Close the listener and wait for every session to finish
    ///
    /// Streaming sessions are interrupted immediately. A session still in
    /// its handshake is bounded by the handshake timeout.
    pub async fn stop(&self) {
        let accept_task = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, RunState::Stopped) {
                RunState::Running { accept_task, .. } => Some(accept_task),
                _ => None,
            }
        };

        self.ctx.shutdown.cancel();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Accept loop ended abnormally");
            }
        }

        self.tracker.close();
        tracing::info!(sessions = self.tracker.len(), "Waiting for sessions to drain");
        self.tracker.wait().await;
        tracing::info!("RTMP server stopped");
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), RunState::Running { .. })
    }

    /// Bound address while running
    pub fn addr(&self) -> Option<SocketAddr> {
        match *self.lock_state() {
            RunState::Running { addr, .. } => Some(addr),
            _ => None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn accept_loop<F: TransportFactory>(
    listener: TcpListener,
    factory: Arc<F>,
    ctx: SessionContext,
    tracker: TaskTracker,
    semaphore: Option<Arc<Semaphore>>,
    next_session_id: Arc<AtomicU64>,
) {
    let shutdown = ctx.shutdown.clone();

    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    tracing::error!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let permit = match &semaphore {
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer, "Connection rejected: limit reached");
                    continue;
                }
            },
            None => None,
        };

        configure_socket(&socket, ctx.config.tcp_nodelay);

        let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id, peer = %peer, "New connection");

        let transport = factory.create(socket, peer);
        let session = IngestSession::new(session_id, transport, ctx.clone()).with_peer(peer);

        let monitor = Arc::clone(&ctx.monitor);
        monitor.connection_opened();

        let handle = tracker.spawn(async move {
            let _permit = permit;
            session.run().await
        });
        tracker.spawn(async move {
            match handle.await {
                Ok(report) => tracing::debug!(
                    session_id,
                    stream = ?report.stream_key,
                    units = report.units_relayed,
                    "Connection closed"
                ),
                Err(e) if e.is_panic() => {
                    tracing::error!(session_id, "Session task panicked")
                }
                Err(e) => tracing::debug!(session_id, error = %e, "Session task cancelled"),
            }
            monitor.connection_closed();
        });
    }

    drop(listener);
    tracing::debug!("Accept loop stopped");
}

fn configure_socket(socket: &TcpStream, nodelay: bool) {
    if nodelay {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
    }
}
