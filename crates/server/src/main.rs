//! hsm-connector
//!
//! Local daemon that makes a USB-attached HSM reachable over HTTP.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::setup_logging;
use device::{DeviceIdentity, DeviceSession, Proxy, RusbBackend};
use server::config::{ConnectorConfig, Overrides};
use server::http::{self, AppState, HostAllowlist};
use server::service;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "hsm-connector")]
#[command(author, version, about = "HSM Connector - USB HSM over local HTTP")]
#[command(long_about = "
Bridges HTTP requests from local applications to a USB-attached HSM.
Request bodies are forwarded to the device unchanged; the device's answer
is returned as the response body.

EXAMPLES:
    # Run with default config
    hsm-connector

    # Only talk to the device with serial 0001234567
    hsm-connector --serial 1234567

    # Listen on another port with debug logging
    hsm-connector --listen 127.0.0.1:12346 --debug

    # Print a configuration file with all defaults
    hsm-connector config generate

CONFIGURATION:
    The connector looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/hsm-connector/connector.toml
    3. /etc/hsm-connector/connector.toml
    4. /usr/local/etc/hsm-connector/connector.toml
    5. Built-in defaults

    Every option can also be set through an HSM_CONNECTOR_* environment
    variable, e.g. HSM_CONNECTOR_SERIAL.
")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", env = "HSM_CONNECTOR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", env = "HSM_CONNECTOR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(short, long, env = "HSM_CONNECTOR_DEBUG")]
    debug: bool,

    /// Listen address (host:port)
    #[arg(long, value_name = "ADDR", env = "HSM_CONNECTOR_LISTEN")]
    listen: Option<String>,

    /// Serial number of the device to use (any device if unset)
    #[arg(short, long, env = "HSM_CONNECTOR_SERIAL")]
    serial: Option<String>,

    /// Reject requests whose Host header is not allow-listed
    #[arg(long, env = "HSM_CONNECTOR_ENABLE_HOST_HEADER_ALLOWLIST")]
    enable_host_header_allowlist: bool,

    /// Allowed Host header values, comma separated
    #[arg(
        long,
        value_name = "HOSTS",
        value_delimiter = ',',
        env = "HSM_CONNECTOR_HOST_HEADER_ALLOWLIST"
    )]
    host_header_allowlist: Option<Vec<String>>,

    /// Run as systemd service (sd-notify lifecycle notifications)
    #[arg(long, env = "HSM_CONNECTOR_SERVICE")]
    service: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configuration file helpers
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Print version information and exit
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration file and exit
    Check,
    /// Print the default configuration as TOML
    Generate,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            listen: self.listen.clone(),
            log_level: self.log_level.clone(),
            debug: self.debug,
            serial: self.serial.clone(),
            enable_host_header_allowlist: self.enable_host_header_allowlist,
            host_header_allowlist: self.host_header_allowlist.clone(),
            service_mode: self.service,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.command {
        Some(Command::Version) => {
            println!("hsm-connector {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Command::Config {
            action: ConfigCommand::Generate,
        }) => {
            print!("{}", ConnectorConfig::default().to_toml()?);
            return Ok(());
        }
        Some(Command::Config {
            action: ConfigCommand::Check,
        }) => {
            let (mut config, path) = ConnectorConfig::resolve(args.config.as_deref())
                .context("Failed to load configuration")?;
            config.apply(args.overrides());
            config.validate().context("Configuration is invalid")?;
            match path {
                Some(p) => println!("Configuration OK: {}", p.display()),
                None => println!("No configuration file found, defaults are valid"),
            }
            return Ok(());
        }
        None => {}
    }

    let (mut config, path) =
        ConnectorConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply(args.overrides());
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level, config.server.log_format)
        .context("Failed to setup logging")?;

    info!("hsm-connector v{}", env!("CARGO_PKG_VERSION"));
    match path {
        Some(p) => info!("Loaded configuration from: {}", p.display()),
        None => info!("No configuration file found, using defaults"),
    }

    run(config).await
}

async fn run(config: ConnectorConfig) -> Result<()> {
    let serial = config.serial()?;
    let service_mode = config.server.service_mode;
    info!(
        serial = %serial.display_or_wildcard(),
        listen = %config.server.listen,
        host_allowlist = config.security.host_header_allowlist_enabled,
        "starting hsm-connector"
    );

    let session = DeviceSession::new(RusbBackend::new(), DeviceIdentity::new(serial.clone()));
    let proxy = Arc::new(Proxy::new(session, config.proxy_options()));

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", config.server.listen))?;

    let state = AppState {
        proxy,
        serial,
        listen: config.server.listen.as_str().into(),
        allowlist: HostAllowlist::new(config.host_allowlist()),
    };

    let watchdog = if service_mode {
        if service::is_systemd() {
            info!("Running under systemd");
        }
        let watchdog = service::spawn_watchdog_task();
        service::notify_ready().context("Failed to notify systemd ready")?;
        service::notify_status("Running - waiting for requests")
            .context("Failed to send status to systemd")?;
        watchdog
    } else {
        None
    };

    let shutdown = async move {
        http::shutdown_signal().await;
        if service_mode {
            if let Err(e) = service::notify_stopping() {
                warn!("Failed to notify systemd stopping: {:#}", e);
            }
        }
    };

    let result = http::run(listener, state, shutdown).await;

    if let Some(handle) = watchdog {
        handle.abort();
    }

    info!("hsm-connector shutdown complete");
    result
}
