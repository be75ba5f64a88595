//! TCP listener for hot-reload packages.
//!
//! Connections are served strictly one after another; the next accept only
//! happens once the previous session has replied. Between accepts the loop
//! checks the shutdown token, and each accept waits at most
//! `server.accept_poll_ms`, which bounds shutdown latency.

use crate::config::Config;
use crate::session::UpdateSession;
use crate::supervisor::AppSupervisor;
use crate::utils::errors::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct ReloadServer {
    listener: TcpListener,
    config: Config,
    supervisor: AppSupervisor,
}

impl ReloadServer {
    /// Bind the listening socket on all interfaces.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await?;
        let supervisor = AppSupervisor::new(config.server.work_dir.clone(), config.app.clone());

        Ok(Self {
            listener,
            config,
            supervisor,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` is cancelled, then stop the app and close the socket.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!("🚀 Reload server listening on {}", self.local_addr()?);
        info!("📁 Working directory: {}", self.config.server.work_dir.display());

        let poll = self.config.server.accept_poll();

        while !shutdown.is_cancelled() {
            let (stream, peer) = match tokio::time::timeout(poll, self.listener.accept()).await {
                Err(_) => continue,
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let session = UpdateSession::new(stream, peer);
            if let Err(e) = session.run(&self.config.server, &mut self.supervisor).await {
                error!("Error handling client {}: {}", peer, e);
            }
        }

        info!("Received shutdown signal, closing server...");
        self.supervisor
            .stop(self.config.server.shutdown_timeout())
            .await;

        drop(self.listener);
        info!("Server closed");
        Ok(())
    }
}
