//! One client connection: receive a package, apply it, answer.
//!
//! The client writes a whole archive and half-closes. There is no framing:
//! the session reads until EOF or until the peer goes quiet for the read
//! timeout, then works with whatever arrived. The reply is a single status
//! word, after which the connection is closed.

use crate::config::ServerConfig;
use crate::package::UpdatePackage;
use crate::supervisor::AppSupervisor;
use crate::sync::apply_package;
use crate::utils::errors::Result;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Status sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Error,
    NoData,
}

impl Reply {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Reply::Ok => b"OK",
            Reply::Error => b"ERROR",
            Reply::NoData => b"ERROR: No data",
        }
    }
}

/// State of a single client interaction.
pub struct UpdateSession<S> {
    stream: S,
    peer: SocketAddr,
    received: BytesMut,
    timed_out: bool,
}

impl<S> UpdateSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            received: BytesMut::new(),
            timed_out: false,
        }
    }

    /// Drive the session to completion and return the reply that was sent.
    pub async fn run(
        mut self,
        config: &ServerConfig,
        supervisor: &mut AppSupervisor,
    ) -> Result<Reply> {
        info!("📥 Connection from {}", self.peer);

        self.receive(config.read_chunk_size, config.read_timeout())
            .await?;
        debug!(
            "Read {} bytes from {} ({})",
            self.received.len(),
            self.peer,
            if self.timed_out { "timed out" } else { "eof" }
        );

        let reply = if self.received.is_empty() {
            warn!("⚠️  No data received");
            Reply::NoData
        } else {
            let bytes = self.received.split().to_vec();
            process_update(bytes, &config.work_dir, supervisor).await
        };

        self.respond(reply).await?;
        Ok(reply)
    }

    async fn receive(&mut self, chunk_size: usize, timeout: Duration) -> Result<()> {
        let mut chunk = vec![0u8; chunk_size];

        loop {
            match tokio::time::timeout(timeout, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => self.received.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!("⚠️  Receive timeout, processing what we have...");
                    self.timed_out = true;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn respond(&mut self, reply: Reply) -> Result<()> {
        self.stream.write_all(reply.as_bytes()).await?;
        self.stream.shutdown().await?;

        match reply {
            Reply::Ok => info!("📤 Sent ACK to client"),
            Reply::Error | Reply::NoData => info!("📤 Sent ERROR to client"),
        }
        Ok(())
    }
}

/// Decode and apply `bytes`, restarting the app for full deployments.
pub async fn process_update(
    bytes: Vec<u8>,
    work_dir: &Path,
    supervisor: &mut AppSupervisor,
) -> Reply {
    let dir: PathBuf = work_dir.to_path_buf();
    let applied = tokio::task::spawn_blocking(move || {
        let mut package = UpdatePackage::decode(bytes)?;
        apply_package(&dir, &mut package)
    })
    .await;

    let report = match applied {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!("❌ Error processing update: {}", e);
            return Reply::Error;
        }
        Err(e) => {
            error!("❌ Update task failed: {}", e);
            return Reply::Error;
        }
    };

    if report.restart_requested() {
        info!("Full deployment detected, starting app...");
        supervisor.redeploy().await;
    }

    info!("✅ Hot reload completed successfully");
    Reply::Ok
}
