//! Legadilo Extension Host - Main Entry Point
//!
//! Native messaging host for the Legadilo browser extension. The browser
//! starts it on demand and exchanges framed JSON messages over stdio.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use legadilo_host::{
    logging, native, storage::SecureStorage, ApiClient, HostCapabilities, Relay,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    logging::init();
    info!("Legadilo host starting...");

    let storage = SecureStorage::new();
    info!("Options stored in: {:?}", storage.path());

    let api = ApiClient::new(Arc::new(storage)).context("failed to create HTTP client")?;
    let relay = Relay::new(api);

    let capabilities = HostCapabilities::detect(std::env::args().skip(1));
    let mut port = native::stdio();

    let result = if capabilities.persistent_ports {
        relay.serve(&mut port).await
    } else {
        relay.serve_once(&mut port).await
    };

    if let Err(e) = &result {
        error!("Native messaging failed: {}", e);
    }
    result.context("native messaging channel failed")?;

    info!("Legadilo host stopped");
    Ok(())
}
