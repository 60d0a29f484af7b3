use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::connection::ConnectionHandle;
use crate::engine::QueryEngine;

/// TCP server implementing the PostgreSQL wire protocol.
pub struct Server {
    listener: TcpListener,
    next_pid: Arc<AtomicI32>,
    engine: Arc<dyn QueryEngine>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
}

impl Server {
    /// Creates a new server with a given listener and query engine. When a
    /// TLS configuration is supplied, SSL requests are accepted; otherwise
    /// they are answered with a reject byte and the session stays plaintext.
    pub fn new(
        listener: TcpListener,
        engine: Arc<dyn QueryEngine>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
    ) -> Self {
        Self {
            listener,
            next_pid: Arc::new(AtomicI32::new(1)),
            engine,
            tls_config,
        }
    }

    /// Starts accepting connections and serving clients.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        loop {
            let (socket, peer_addr) = self.listener.accept().await?;
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

            // interactive protocol; don't batch small responses
            if let Err(e) = socket.set_nodelay(true) {
                warn!(pid, error = %e, "failed to set TCP_NODELAY");
            }

            info!(pid, peer = %peer_addr, "accepted connection");

            let handle = ConnectionHandle::new(
                socket,
                pid,
                Arc::clone(&self.engine),
                self.tls_config.clone(),
            );
            tokio::spawn(handle.run());
        }
    }
}
