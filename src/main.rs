//! Game network core server.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │               LifecycleCoordinator               │
//!                     │                                                  │
//!   TCP clients ──────┼─▶ acceptor group ─▶ worker group ─▶ task pool    │
//!   (port + aux)      │   (accept, limit)   (decode/write)  (handlers)   │
//!                     │                                        │         │
//!   UDP clients ──────┼─▶ message listener ─▶ thread per connection      │
//!   (reliable msgs)   │                                        │         │
//!                     │                                        ▼         │
//!                     │                              ConnectionRegistry  │
//!                     │                                                  │
//!                     │   stop() ─▶ tracked channels close ─▶ clear(ctx) │
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use game_netcore::config::validation::validate_config;
use game_netcore::config::ConfigFile;
use game_netcore::lifecycle::signals::spawn_stop_on_signal;
use game_netcore::observability::{logging, metrics};
use game_netcore::LifecycleCoordinator;

#[derive(Parser, Debug)]
#[command(name = "game-netcore")]
#[command(about = "Connection lifecycle core for a game server", long_about = None)]
struct Cli {
    /// Configuration file; written with defaults when absent.
    #[arg(short, long, default_value = "netcore.toml")]
    config: PathBuf,

    /// Primary stream port.
    #[arg(long)]
    port: Option<u16>,

    /// First auxiliary stream port.
    #[arg(long)]
    aux_start: Option<u16>,

    /// Last auxiliary stream port.
    #[arg(long)]
    aux_end: Option<u16>,

    /// Message transport port.
    #[arg(long)]
    udp_port: Option<u16>,

    /// Do not start the message transport.
    #[arg(long)]
    no_udp: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_file = Arc::new(ConfigFile::new(&cli.config));
    let mut config = config_file.load_or_create()?;
    if let Some(port) = cli.port {
        config.stream.port = port;
    }
    if let Some(start) = cli.aux_start {
        config.stream.aux_start_port = start;
    }
    if let Some(end) = cli.aux_end {
        config.stream.aux_end_port = end;
    }
    if let Some(port) = cli.udp_port {
        config.message.port = port;
    }
    if cli.no_udp {
        config.message.enabled = false;
    }
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {}", error);
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init(&config.observability);
    tracing::info!(config = ?cli.config, "game-netcore v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let coordinator = LifecycleCoordinator::new(config.clone())?.with_run_pid_store(config_file);
    spawn_stop_on_signal(coordinator.clone())?;

    let message_listener = if config.message.enabled {
        let coordinator = coordinator.clone();
        let port = config.message.port;
        Some(
            std::thread::Builder::new()
                .name("message-listener".to_string())
                .spawn(move || coordinator.start_udp(port))?,
        )
    } else {
        None
    };

    let stream = &config.stream;
    if stream.aux_start_port > stream.aux_end_port {
        coordinator.open_port(stream.port);
    } else {
        coordinator.open_port_range(stream.port, stream.aux_start_port, stream.aux_end_port);
    }

    // The primary listener is gone; take the message transport down with it.
    coordinator.stop();
    if let Some(handle) = message_listener {
        let _ = handle.join();
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
