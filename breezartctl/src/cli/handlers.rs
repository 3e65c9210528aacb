//! Command execution handlers

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use breezart_client::{ControllerSimulator, DeviceClient, LineCodec, SessionState};
use breezart_core::Lifecycle;
use clap::CommandFactory;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::CliConfig;
use crate::format::{
    format_ack, format_config, format_properties, format_status, format_success, format_warning,
};

use super::commands::*;

/// Create the device client for the configured transport
///
/// In mock mode the client talks to an in-process simulator that accepts
/// the configured password and reports the configured speed range.
pub fn build_client(config: &CliConfig, mock: bool) -> Result<DeviceClient> {
    let device = config.device.clone();

    if mock {
        info!("Using simulated controller");
        let sim = ControllerSimulator::new(
            device.password.clone(),
            device.fan_min_speed,
            device.fan_max_speed,
        );
        return DeviceClient::with_connector(device, Arc::new(sim.connector()), Arc::new(LineCodec))
            .context("Failed to create client");
    }

    DeviceClient::new(device).context("Failed to create client")
}

/// Start a long-lived session and wait for the first connect outcome
///
/// Per-operation clients need no preparation.
pub async fn prepare_client(client: &DeviceClient) {
    if client.config().lifecycle != Lifecycle::LongLived {
        return;
    }

    client.start().await;

    let mut states = client.session().subscribe();
    let settled = async {
        states
            .wait_for(|state| matches!(state, SessionState::Ready | SessionState::Failed))
            .await
            .map(|_| ())
    };
    // Connect and authenticate are each bounded by the timeout
    let deadline = client.config().timeout() * 2;

    match timeout(deadline, settled).await {
        Ok(_) => debug!("Session is {}", client.session().state()),
        Err(_) => warn!("Session not ready after {:?}", deadline),
    }
}

/// Handle status command
pub async fn handle_status(client: &DeviceClient, format: &OutputFormat) -> Result<()> {
    let status = client
        .get_status()
        .await
        .context("Failed to read status")?;

    println!(
        "{}",
        format_status(&client.config().name, &status, &format.into())?
    );
    Ok(())
}

/// Handle power command
pub async fn handle_power(
    client: &DeviceClient,
    state: PowerArg,
    format: &OutputFormat,
) -> Result<()> {
    let ack = client
        .set_power(state.is_on())
        .await
        .context("Failed to set power")?;

    let action = if state.is_on() { "Power on" } else { "Power off" };
    println!("{}", format_ack(action, ack, &format.into())?);
    Ok(())
}

/// Handle speed command
pub async fn handle_speed(client: &DeviceClient, percent: u32, format: &OutputFormat) -> Result<()> {
    let ack = client
        .set_rotation_speed(percent)
        .await
        .context("Failed to set rotation speed")?;

    let action = format!("Rotation speed {}%", percent);
    println!("{}", format_ack(&action, ack, &format.into())?);
    Ok(())
}

/// Handle properties command
pub async fn handle_properties(client: &DeviceClient, format: &OutputFormat) -> Result<()> {
    let properties = client
        .get_properties()
        .await
        .context("Failed to read controller properties")?;

    let range = client.speed_range();
    println!(
        "{}",
        format_properties(&properties, (range.min(), range.max()), &format.into())?
    );
    Ok(())
}

/// Handle watch command
///
/// Polls until Ctrl-C or until `count` polls are done. Read errors are
/// printed and polling continues.
pub async fn handle_watch(
    client: &DeviceClient,
    interval: u64,
    count: Option<u32>,
    format: &OutputFormat,
) -> Result<()> {
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    watch_status(client, interval, count, format, interrupted).await
}

/// Poll status until `shutdown` resolves or `count` polls are done
///
/// `shutdown` is observed while waiting for the next tick and while a
/// status read is in flight.
pub async fn watch_status(
    client: &DeviceClient,
    interval: u64,
    count: Option<u32>,
    format: &OutputFormat,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut polls = 0u32;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }

        let result = tokio::select! {
            result = client.get_status() => result,
            _ = &mut shutdown => {
                info!("Interrupted during status read");
                break;
            }
        };

        match result {
            Ok(status) => println!(
                "{}",
                format_status(&client.config().name, &status, &format.into())?
            ),
            Err(e) => eprintln!("{}", format_warning(&format!("Status read failed: {}", e))),
        }

        polls += 1;
        if count.is_some_and(|count| polls >= count) {
            break;
        }
    }

    client.disconnect().await;
    Ok(())
}

/// Handle config commands
pub async fn handle_config(
    command: ConfigCommands,
    config: Option<&CliConfig>,
    config_path: &Path,
    format: &OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = config.context("No usable configuration")?;
            if let Some(source) = &config.source {
                debug!("Configuration loaded from {}", source.display());
            }
            println!("{}", format_config(&config.device, &format.into())?);
        }
        ConfigCommands::Path => {
            let exists = config_path.exists();
            match format {
                OutputFormat::Json => {
                    let response = serde_json::json!({
                        "path": config_path.display().to_string(),
                        "exists": exists,
                    });
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Table => {
                    let suffix = if exists { "" } else { " (not found)" };
                    println!("{}{}", config_path.display(), suffix);
                }
            }
        }
    }

    Ok(())
}

/// Handle simulate command
///
/// Serves a simulated controller until Ctrl-C.
pub async fn handle_simulate(
    listen: &str,
    password: &str,
    min_speed: u32,
    max_speed: u32,
) -> Result<()> {
    if max_speed <= min_speed {
        anyhow::bail!(
            "max speed ({}) must be greater than min speed ({})",
            max_speed,
            min_speed
        );
    }

    let sim = ControllerSimulator::new(password, min_speed, max_speed);
    let (addr, server) = sim
        .bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;

    println!(
        "{}",
        format_success(&format!(
            "Simulated controller on {} (steps {}..={}); Ctrl-C to stop",
            addr, min_speed, max_speed
        ))
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    server.abort();
    info!(
        "Simulator stopped after {} connections",
        sim.connections_opened()
    );
    Ok(())
}

/// Generate shell completion script
pub fn generate_completion(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
