//! Command-line client for the Ectocontrol Modbus adapter.
//!
//! Polls the adapter until interrupted, or performs a single read,
//! write or diagnostics dump.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use ectocontrol_modbus::mock::MemoryDevice;
use ectocontrol_modbus::{
    AdapterConfig, Diagnostics, Field, FieldValue, PollOutcome, PollingCoordinator,
    RegisterGateway, TransportClient,
};

/// Client for the Ectocontrol Modbus RTU boiler adapter.
#[derive(Parser, Debug)]
#[command(name = "ectocontrol-modbus")]
#[command(about = "Polls and controls an Ectocontrol boiler adapter over Modbus RTU")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "ectocontrol.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Talk to a simulated adapter instead of the serial port.
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Poll until Ctrl+C (default).
    Run,
    /// Refresh once and print decoded fields as JSON.
    Read,
    /// Write a field, e.g. `set chSetpoint 45.5` or `set dhwCircuitEnabled on`.
    Set { field: Field, value: String },
    /// Reboot the adapter.
    Reboot,
    /// Reset boiler errors.
    ResetErrors,
    /// Refresh once and print diagnostics as JSON.
    Diagnostics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.simulate && !args.config.exists() {
        AdapterConfig::simulated()
    } else {
        AdapterConfig::load(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    };

    let log_config = config.logging.with_level_override(args.log_level.as_deref());
    ectocontrol_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    let device = &config.device;
    let transport = if args.simulate {
        info!("Using simulated adapter");
        TransportClient::new(MemoryDevice::boiler(device.slave_id))
    } else {
        TransportClient::serial(&device.port)
    };
    let transport = Arc::new(transport.with_timeout(device.read_timeout()));
    let gateway = Arc::new(RegisterGateway::new(transport.clone(), device.slave_id));
    let coordinator = Arc::new(PollingCoordinator::new(
        gateway.clone(),
        device.poll_settings(),
    ));

    let result = match args.command.clone().unwrap_or(Command::Run) {
        Command::Run => run(coordinator.clone()).await,
        Command::Read => {
            refresh(&coordinator).await?;
            print_json(&gateway.read_all())
        }
        Command::Set { field, value } => {
            let value = parse_value(&value)?;
            transport.connect().await.context("Failed to open Modbus link")?;
            gateway
                .set_scaled(field, value)
                .await
                .with_context(|| format!("Failed to write {}", field))?;
            info!("Wrote {} = {}", field, value);
            refresh(&coordinator).await?;
            print_json(&gateway.read_field(field).ok().flatten())
        }
        Command::Reboot => {
            transport.connect().await.context("Failed to open Modbus link")?;
            gateway.reboot_adapter().await.context("Reboot failed")?;
            info!("Reboot command sent");
            Ok(())
        }
        Command::ResetErrors => {
            transport.connect().await.context("Failed to open Modbus link")?;
            gateway
                .reset_boiler_errors()
                .await
                .context("Error reset failed")?;
            info!("Error reset command sent");
            Ok(())
        }
        Command::Diagnostics => {
            let outcome = coordinator.refresh().await;
            if let PollOutcome::Failed(failure) = &outcome {
                warn!("Refresh failed, exporting stale state: {}", failure);
            }
            let diagnostics = Diagnostics::collect(&coordinator);
            println!("{}", diagnostics.to_json()?);
            Ok(())
        }
    };

    transport.disconnect().await;
    result
}

/// Poll until Ctrl+C, logging status changes.
async fn run(coordinator: Arc<PollingCoordinator>) -> Result<()> {
    let poller = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };

    let mut status = coordinator.subscribe();
    let name = coordinator.name().to_string();
    let watcher = tokio::spawn(async move {
        let mut last = status.borrow_and_update().device_status;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if current.device_status != last {
                info!(
                    "Device '{}' is now {} (available: {}, failures: {})",
                    name,
                    current.device_status,
                    current.available,
                    current.consecutive_failures
                );
                last = current.device_status;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    coordinator.shutdown();
    poller.await.context("Poller task failed")?;
    watcher.abort();

    Ok(())
}

async fn refresh(coordinator: &PollingCoordinator) -> Result<()> {
    match coordinator.refresh().await {
        PollOutcome::Failed(failure) => bail!("Refresh failed: {}", failure),
        PollOutcome::Partial { failed, .. } => {
            warn!("{} registers could not be read", failed.len());
            Ok(())
        }
        PollOutcome::Complete { .. } => Ok(()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a CLI value: booleans, then integers, then decimals.
fn parse_value(s: &str) -> Result<FieldValue> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "on" => return Ok(FieldValue::Bool(true)),
        "false" | "off" => return Ok(FieldValue::Bool(false)),
        _ => {}
    }
    if let Ok(v) = s.parse::<i64>() {
        return Ok(FieldValue::Int(v));
    }
    s.parse::<f64>()
        .map(FieldValue::Float)
        .with_context(|| format!("Invalid value '{}'", s))
}
