//! mqttkit - Main Entry Point
//!
//! Runs one MQTT 5 client from a configuration file until interrupted,
//! logging its lifecycle events and inbound messages.

use clap::{Parser, Subcommand};
use mqttkit::config::KitConfig;
use mqttkit::mqtt::{ClientOptions, DisconnectPacket, LifecycleEvent, Mqtt5Client};
use mqttkit::observability::init_default_logging;
use mqttkit::runtime;
use std::path::PathBuf;
use std::process;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle-safe MQTT 5 client
#[derive(Parser)]
#[command(name = "mqttkit")]
#[command(about = "Run an MQTT 5 client with observable lifecycle events")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTTKIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stay connected until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

enum ShutdownReason {
    Signal,
    ClientStopped,
}

fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqttkit v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config),
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<KitConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(KitConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = ["mqttkit.toml", "config/mqttkit.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(KitConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create mqttkit.toml".into())
        }
    }
}

/// Bring the subsystems up, run the client, and always clean up afterwards
fn run_client(config: KitConfig) -> Result<(), Box<dyn std::error::Error>> {
    runtime::initialize_with(&config.runtime);
    let outcome = run_until_shutdown(&config);
    runtime::clean_up();
    outcome
}

fn run_until_shutdown(config: &KitConfig) -> Result<(), Box<dyn std::error::Error>> {
    let event_loop = runtime::global().event_loop()?;
    let (stopped_tx, mut stopped_rx) = watch::channel(false);

    let options = ClientOptions::from_config(config)?
        .on_lifecycle_event_attempting_connect(|_| info!("Connecting to broker..."))
        .on_lifecycle_event_connection_success(|event| {
            if let LifecycleEvent::ConnectionSuccess {
                connack: Some(connack),
            } = event
            {
                info!(
                    session_present = connack.session_present,
                    assigned_client_identifier = ?connack.assigned_client_identifier,
                    "Connected to broker"
                );
            }
        })
        .on_lifecycle_event_connection_failure(|event| warn!("Connection attempt failed: {}", event))
        .on_lifecycle_event_disconnection(|event| warn!("Disconnected: {}", event))
        .on_lifecycle_event_stopped(move |_| {
            stopped_tx.send_replace(true);
        })
        .on_publish_received(|publish| {
            info!(
                topic = %publish.topic,
                qos = ?publish.qos,
                retain = publish.retain,
                payload = publish.payload_str().unwrap_or("<binary>"),
                "Message received"
            )
        })
        .on_shutdown_complete(|| debug!("Client shutdown complete"));

    let mut client = Mqtt5Client::new(options)?;
    client.start()?;
    info!(client_id = client.client_id(), "Client running; waiting for messages");

    let reason = event_loop.block_on(wait_for_shutdown(&mut stopped_rx))?;

    if let ShutdownReason::Signal = reason {
        client.stop(Some(&DisconnectPacket::default()))?;
    }

    let shutdown = client.shutdown_handle();
    client.close();

    let timeout = config.runtime.shutdown_timeout();
    if !event_loop.block_on(shutdown.wait_timeout(timeout)) {
        warn!(
            "Client did not finish shutting down within {}ms",
            timeout.as_millis()
        );
    }

    match reason {
        ShutdownReason::Signal => Ok(()),
        ShutdownReason::ClientStopped => Err("client stopped permanently".into()),
    }
}

async fn wait_for_shutdown(
    stopped_rx: &mut watch::Receiver<bool>,
) -> std::io::Result<ShutdownReason> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            Ok(ShutdownReason::Signal)
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            Ok(ShutdownReason::Signal)
        }
        _ = stopped_rx.wait_for(|stopped| *stopped) => {
            error!("Client stopped and will not reconnect, shutting down...");
            Ok(ShutdownReason::ClientStopped)
        }
    }
}

fn handle_config_command(config: KitConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
