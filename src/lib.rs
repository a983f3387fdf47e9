// Module declarations for the application's core components
pub mod channels;      // Inter-component communication channels
pub mod config;        // Configuration management
pub mod coordinator;   // Polling, writes and device state
pub mod cryocon;       // Attributes, command codec and transport
pub mod error;         // Error handling and types
pub mod options;       // Command line options parsing
pub mod prelude;       // Common imports and types
pub mod scheduler;     // Periodic poll loop
pub mod value_cache;   // Attribute value caching

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const RECONNECT_DELAY_SECS: u64 = 5; // Delay before reconnection attempts

use crate::prelude::*;
use crate::cryocon::transport::TcpTransport;
use crate::scheduler::Scheduler;
use std::io::Write;
use std::time::Duration;

/// Manages all application components and their lifecycle
pub struct Components {
    pub coordinator: Coordinator,
    pub scheduler: Scheduler,
    pub scheduler_handle: tokio::task::JoinHandle<()>,
    pub channels: Channels,
}

impl Components {
    /// Waits for the scheduler to leave its loop before closing the
    /// instrument connection, so no cycle runs against a closed transport.
    pub async fn stop(self) {
        info!("Stopping all components...");
        self.scheduler.stop();
        if let Err(e) = self.scheduler_handle.await {
            error!("Error waiting for scheduler task: {}", e);
        }
        self.coordinator.stop().await;
        info!("Shutdown complete");
    }
}

fn init_logging() {
    // filter everything here and narrow it with set_max_level once the
    // config is loaded, unless RUST_LOG asks for something specific
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    if std::env::var("RUST_LOG").is_err() {
        log::set_max_level(log::LevelFilter::Info);
    }
}

/// Connects, retrying every few seconds until the instrument answers or a
/// shutdown arrives.
async fn connect(
    config: &Config,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<Option<TcpTransport>> {
    let address = config.address()?;

    loop {
        match TcpTransport::connect(address.clone(), config.connection_timeout()).await {
            Ok(transport) => return Ok(Some(transport)),
            Err(e) => {
                error!("{}: {}", address, e);
                info!("{}: reconnecting in {}s", address, RECONNECT_DELAY_SECS);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
            _ = shutdown_rx.recv() => return Ok(None),
        }
    }
}

/// Main application entry point
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, options: Options) -> Result<()> {
    init_logging();

    info!(
        "cryocon-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );

    let config = Config::new(options.config_file.clone())?;

    if std::env::var("RUST_LOG").is_err() {
        match config.loglevel().parse::<log::LevelFilter>() {
            Ok(level) => log::set_max_level(level),
            Err(e) => error!("Invalid loglevel {:?}: {}", config.loglevel(), e),
        }
    }

    let transport = match connect(&config, &mut shutdown_rx).await? {
        Some(transport) => transport,
        None => {
            info!("Shutdown requested before connecting");
            return Ok(());
        }
    };

    info!("Initializing components...");
    let channels = Channels::new();
    let coordinator = Coordinator::from_config(&config, Box::new(transport));
    if let Err(e) = coordinator.init().await {
        warn!("Instrument set-up failed: {}", e);
    }

    match coordinator.run("*IDN?").await {
        Ok(idn) => info!("Connected to {}", idn),
        Err(e) => warn!("Failed to read identification: {}", e),
    }

    let scheduler = Scheduler::new(config.clone(), coordinator.clone(), channels.clone());
    let scheduler_clone = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start().await {
            error!("Scheduler task failed: {}", e);
        }
    });

    // log every cycle as one JSON line
    let mut poll_rx = channels.from_scheduler.subscribe();
    let publisher_handle = tokio::spawn(async move {
        while let Ok(data) = poll_rx.recv().await {
            match data {
                scheduler::ChannelData::Poll(cycle) => match serde_json::to_string(&cycle) {
                    Ok(json) => info!("{}", json),
                    Err(e) => error!("Failed to serialize poll cycle: {}", e),
                },
                scheduler::ChannelData::Shutdown => break,
            }
        }
    });

    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    info!("Shutdown signal received, stopping components...");
    let components = Components {
        coordinator,
        scheduler,
        scheduler_handle,
        channels: channels.clone(),
    };
    components.stop().await;

    let _ = channels
        .from_scheduler
        .send(scheduler::ChannelData::Shutdown);
    if let Err(e) = publisher_handle.await {
        error!("Error waiting for publisher task: {}", e);
    }

    info!("Application shutdown complete");
    Ok(())
}
