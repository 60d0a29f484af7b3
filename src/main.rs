use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portico::config::{self, ServerOptions};
use portico::engine::NullQueryEngine;
use portico::server::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = ServerOptions::from_env();

    let tls_config = match &options.tls {
        Some(tls) => {
            info!(cert = %tls.cert_path.display(), "TLS enabled");
            Some(config::load_tls(tls)?)
        }
        None => None,
    };

    // NOTE: NullQueryEngine answers every statement as unsupported; swap in
    // a real executor behind the QueryEngine trait to serve queries.
    let engine = Arc::new(NullQueryEngine);

    let listener = TcpListener::bind(&options.addr).await?;
    info!(addr = %options.addr, "listening");

    let server = Server::new(listener, engine, tls_config);
    server.serve().await?;

    Ok(())
}
