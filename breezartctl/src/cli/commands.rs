//! CLI command and subcommand definitions

use std::path::PathBuf;

use breezart_core::Lifecycle;
use clap::{Parser, Subcommand};

/// Breezart ventilation controller CLI
#[derive(Parser, Debug)]
#[command(name = "breezartctl")]
#[command(version, about = "Breezart ventilation controller CLI", long_about = None)]
pub struct Cli {
    /// Controller host (overrides config file and BREEZART_HOST)
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// Controller TCP port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Controller password (overrides config file and BREEZART_PASSWORD)
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Serial device to use instead of TCP
    #[arg(long, global = true)]
    pub serial: Option<String>,

    /// Session lifecycle
    #[arg(long, value_enum, global = true)]
    pub lifecycle: Option<LifecycleArg>,

    /// Timeout for each network operation in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Output format (overrides config file)
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<OutputFormat>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log every line sent to and received from the controller
    #[arg(long, global = true)]
    pub debug_wire: bool,

    /// Talk to an in-process simulated controller
    #[arg(long, global = true)]
    pub mock: bool,

    /// Don't load config file
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Config file path (default: <config dir>/breezart/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty table output
    Table,
    /// JSON output
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
        }
    }

    /// Parse the config-file spelling; anything but "json" is a table
    pub fn from_config(value: &str) -> Self {
        match value {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

impl From<&OutputFormat> for crate::format::OutputFormat {
    fn from(format: &OutputFormat) -> Self {
        match format {
            OutputFormat::Table => crate::format::OutputFormat::Table,
            OutputFormat::Json => crate::format::OutputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LifecycleArg {
    /// Hold one session open
    LongLived,
    /// Connect for each operation
    PerOperation,
}

impl From<LifecycleArg> for Lifecycle {
    fn from(arg: LifecycleArg) -> Self {
        match arg {
            LifecycleArg::LongLived => Lifecycle::LongLived,
            LifecycleArg::PerOperation => Lifecycle::PerOperation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PowerArg {
    On,
    Off,
}

impl PowerArg {
    pub fn is_on(self) -> bool {
        self == PowerArg::On
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show power and rotation speed
    Status,

    /// Switch the unit on or off
    Power {
        #[arg(value_enum)]
        state: PowerArg,
    },

    /// Set rotation speed in percent
    Speed {
        /// Rotation speed, 0-100
        #[arg(value_parser = clap::value_parser!(u32).range(0..=100))]
        percent: u32,
    },

    /// Show the controller's reported capabilities
    Properties,

    /// Poll status until interrupted
    Watch {
        /// Seconds between polls
        #[arg(short, long, default_value_t = 5)]
        interval: u64,

        /// Stop after this many polls
        #[arg(short = 'n', long)]
        count: Option<u32>,
    },

    /// Show CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run a simulated controller on a TCP port
    Simulate {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:1560")]
        listen: String,

        /// Password the simulator accepts
        #[arg(long, default_value = "mock")]
        sim_password: String,

        /// Lowest speed step
        #[arg(long, default_value_t = 1)]
        min_speed: u32,

        /// Highest speed step
        #[arg(long, default_value_t = 10)]
        max_speed: u32,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Whether the command talks to a controller
    pub fn needs_device(&self) -> bool {
        matches!(
            self,
            Commands::Status
                | Commands::Power { .. }
                | Commands::Speed { .. }
                | Commands::Properties
                | Commands::Watch { .. }
        )
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}
