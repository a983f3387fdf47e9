use anyhow::Result;
use log::error;
use std::time::Duration;
use tokio::sync::broadcast;

use cryocon_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    // Create a channel for shutdown signaling
    let (shutdown_tx, _) = broadcast::channel(1);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        if let Err(e) = shutdown_tx_clone.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    // Optional runtime limit, mostly for soak testing against a real unit
    if let Some(secs) = options.runtime {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = shutdown_tx_clone.send(());
        });
    }

    // Run the application
    let app_handle = tokio::spawn(cryocon_bridge::app(shutdown_tx.subscribe(), options));

    // Wait for the application to complete
    if let Err(e) = app_handle.await? {
        error!("Application error: {}", e);
        return Err(e);
    }

    Ok(())
}
