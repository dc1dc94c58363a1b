//! Services shared by every ingest session
//!
//! Built once by the acceptor and cloned into each connection task.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::registry::StreamRegistry;
use crate::server::config::ServerConfig;
use crate::session::output::OutputBridge;
use crate::stats::ResourceMonitor;

#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<StreamRegistry>,
    pub bridge: Arc<OutputBridge>,
    pub monitor: Arc<ResourceMonitor>,
    /// Cancelled when the acceptor stops
    pub shutdown: CancellationToken,
}

impl SessionContext {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<StreamRegistry>,
        bridge: Arc<OutputBridge>,
        monitor: Arc<ResourceMonitor>,
    ) -> Self {
        Self {
            config,
            registry,
            bridge,
            monitor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the shutdown token, e.g. with a child of the acceptor's
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
