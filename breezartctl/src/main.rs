//! Breezart CLI
//!
//! Command-line interface for Breezart ventilation controllers.

use anyhow::Result;
use breezartctl::cli::{
    build_client, generate_completion, handle_config, handle_power, handle_properties,
    handle_simulate, handle_speed, handle_status, handle_watch, prepare_client, Cli, Commands,
    OutputFormat,
};
use breezartctl::config::{CliConfig, ConfigBuilder};
use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    // Commands that need no configuration
    match &cli.command {
        Commands::Completion { shell } => {
            generate_completion(*shell);
            return Ok(());
        }
        Commands::Simulate {
            listen,
            sim_password,
            min_speed,
            max_speed,
        } => {
            return exit_on_error(
                handle_simulate(listen, sim_password, *min_speed, *max_speed).await,
                cli.verbose,
            );
        }
        _ => {}
    }

    let (config_path, required) = ConfigBuilder::resolve_config_path(cli.config.as_deref());
    let config = build_config(&cli, &config_path, required);

    let output_format = match (&cli.format, &config) {
        (Some(format), _) => format.clone(),
        (None, Ok(config)) => OutputFormat::from_config(&config.output_format),
        (None, Err(_)) => OutputFormat::Table,
    };

    if let Commands::Config { command } = cli.command {
        let config = match config {
            Ok(config) => Some(config),
            Err(e) if matches!(command, breezartctl::cli::ConfigCommands::Path) => {
                debug!("Configuration incomplete: {:#}", e);
                None
            }
            Err(e) => return exit_on_error(Err(e), cli.verbose),
        };
        return exit_on_error(
            handle_config(command, config.as_ref(), &config_path, &output_format).await,
            cli.verbose,
        );
    }

    // Build final configuration with validation
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Some(source) = &config.source {
        debug!("Loaded configuration from {}", source.display());
    }
    debug!("Device configuration: {:?}", config.device);

    let client = match build_client(&config, cli.mock) {
        Ok(client) => client,
        Err(e) => return exit_on_error(Err(e), cli.verbose),
    };

    if cli.command.needs_device() {
        prepare_client(&client).await;
    }

    // Execute commands
    let result = match cli.command {
        Commands::Status => handle_status(&client, &output_format).await,
        Commands::Power { state } => handle_power(&client, state, &output_format).await,
        Commands::Speed { percent } => handle_speed(&client, percent, &output_format).await,
        Commands::Properties => handle_properties(&client, &output_format).await,
        Commands::Watch { interval, count } => {
            handle_watch(&client, interval, count, &output_format).await
        }
        Commands::Config { .. } | Commands::Simulate { .. } | Commands::Completion { .. } => {
            Ok(())
        }
    };

    client.disconnect().await;
    exit_on_error(result, cli.verbose)
}

/// Build configuration using priority chain: defaults → file → env → CLI args
fn build_config(
    cli: &Cli,
    config_path: &std::path::Path,
    required: bool,
) -> Result<CliConfig> {
    let mut builder = CliConfig::builder();

    // Load config file (unless --no-config is specified)
    if !cli.no_config {
        builder = builder.with_config_file(config_path, required)?;
    }

    // Apply environment variable overrides
    builder = builder.with_env_overrides();

    // Apply CLI argument overrides (highest priority)
    if let Some(host) = &cli.host {
        builder = builder.with_host(host);
    }
    if let Some(port) = cli.port {
        builder = builder.with_port(port);
    }
    if let Some(password) = &cli.password {
        builder = builder.with_password(password);
    }
    if let Some(serial) = &cli.serial {
        builder = builder.with_serial_device(serial);
    }
    if let Some(lifecycle) = cli.lifecycle {
        builder = builder.with_lifecycle(lifecycle.into());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        builder = builder.with_timeout_ms(timeout_ms)?;
    }
    if let Some(format) = &cli.format {
        builder = builder.with_output_format(format.as_str())?;
    }
    if cli.verbose {
        builder = builder.with_verbose(true);
    }
    if cli.debug_wire {
        builder = builder.with_debug_wire(true);
    }
    if cli.mock {
        builder = builder.with_mock_defaults();
    }

    builder.build()
}

/// Print the error and exit non-zero
fn exit_on_error(result: Result<()>, verbose: bool) -> Result<()> {
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        if verbose {
            eprintln!("Error details: {:?}", e);
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
