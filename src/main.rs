//! CLI entry point for the magnet node.
//!
//! This binary discovers peers on the local subnet, answers their probes,
//! sends one-off requests and manages the configuration file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};
use magnet::{
    network::{ContentStore, NetInfo, Responder, Subnet},
    session::HostEntry,
    transport::HeaderFields,
    utils::{MagnetConfig, DEFAULT_CONFIG_FILE},
    App,
};
use std::path::PathBuf;
use tokio::signal;

/// Magnet - LAN peer discovery
#[derive(Parser)]
#[command(name = "magnet")]
#[command(about = "Discover magnet peers on the local network and talk to them")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the address and prefix length of an interface
    Interface {
        /// Interface name (defaults to the configured one)
        name: Option<String>,
    },
    /// Run one discovery pass and print the peers found
    Discover {
        /// Interface to scan
        #[arg(short, long)]
        interface: Option<String>,
        /// Scan this subnet instead of the interface's, e.g. 10.0.0.0/24
        #[arg(short, long)]
        subnet: Option<Subnet>,
        /// Port to probe
        #[arg(short, long)]
        port: Option<u16>,
        /// Size of the first probe batch
        #[arg(short, long)]
        batch_limit: Option<usize>,
    },
    /// Send a single request to a host
    Request {
        /// Target address
        host: String,
        /// Target port
        #[arg(short, long)]
        port: Option<u16>,
        /// Method (HEAD, GET, CONNECT)
        #[arg(short, long, default_value = "CONNECT")]
        method: String,
        /// Route to request
        #[arg(short, long, default_value = "/")]
        route: String,
    },
    /// Answer probes from other peers
    Serve {
        /// Hostname to advertise
        #[arg(short = 'n', long)]
        hostname: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Serve `ROUTE=TEXT` pairs as text/plain content
        #[arg(long = "content", value_name = "ROUTE=TEXT")]
        content: Vec<String>,
    },
    /// Answer probes and rediscover peers periodically
    Run {
        /// Hostname to advertise
        #[arg(short = 'n', long)]
        hostname: Option<String>,
    },
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MagnetConfig::load(cli.config.as_deref())?;
    setup_logging(cli.verbose, cli.quiet, &config.logging.level)?;

    match cli.command {
        Commands::Interface { name } => handle_interface_command(name, &config),
        Commands::Discover {
            interface,
            subnet,
            port,
            batch_limit,
        } => handle_discover_command(interface, subnet, port, batch_limit, config).await,
        Commands::Request {
            host,
            port,
            method,
            route,
        } => handle_request_command(host, port, method, route, config).await,
        Commands::Serve {
            hostname,
            port,
            content,
        } => handle_serve_command(hostname, port, content, config).await,
        Commands::Run { hostname } => handle_run_command(hostname, config).await,
        Commands::Config { action } => handle_config_commands(action, &config),
    }
}

fn setup_logging(verbose: u8, quiet: bool, configured: &str) -> Result<()> {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    Ok(())
}

fn handle_interface_command(name: Option<String>, config: &MagnetConfig) -> Result<()> {
    let name = name.unwrap_or_else(|| config.network.interface.clone());
    let info = NetInfo::new(name.clone()).resolve(&name);

    match (info.address, info.prefix_len) {
        (Some(address), Some(prefix_len)) => {
            println!("{}: {}/{}", info.interface, address, prefix_len);
            if let Some(subnet) = info.subnet() {
                println!("  subnet: {} ({} hosts)", subnet, subnet.hosts().len());
            }
        }
        _ => println!("{}: no IPv4 address", info.interface),
    }
    Ok(())
}

async fn handle_discover_command(
    interface: Option<String>,
    subnet: Option<Subnet>,
    port: Option<u16>,
    batch_limit: Option<usize>,
    mut config: MagnetConfig,
) -> Result<()> {
    if let Some(interface) = interface {
        config.network.interface = interface;
    }
    if let Some(port) = port {
        config.network.port = port;
    }
    if let Some(batch_limit) = batch_limit {
        config.discovery.batch_limit = batch_limit;
    }
    config.validate()?;

    let app = App::new(config.clone());
    let report = match subnet {
        Some(subnet) => {
            info!("Scanning {}", subnet);
            app.scheduler()
                .probe_all(Some(subnet.hosts().collect()), 0, config.discovery.batch_limit)
                .await
        }
        None => app.discover().await,
    };

    if !report.ok {
        println!("Interface {} has no IPv4 address", config.network.interface);
        return Ok(());
    }

    println!("Peers");
    println!("=====");
    if report.hosts.is_empty() {
        println!("(none)");
    }
    for host in &report.hosts {
        print_host(host);
    }
    Ok(())
}

fn print_host(host: &HostEntry) {
    println!(
        "{:<20} {:<21} since {}",
        host.hostname.as_deref().unwrap_or("<unnamed>"),
        host.socket_address(),
        host.handshake_at.format("%H:%M:%S")
    );
}

async fn handle_request_command(
    host: String,
    port: Option<u16>,
    method: String,
    route: String,
    config: MagnetConfig,
) -> Result<()> {
    let port = port.unwrap_or(config.network.port);
    let app = App::new(config);
    let fields = HeaderFields {
        route: Some(route.clone()),
        ..HeaderFields::default()
    };

    // Requests other than CONNECT ride on a stream opened by a handshake.
    let status = if method == "CONNECT" || method == "HEAD" {
        app.engine()
            .dispatch(None, &host, port, &method, fields)
            .await
            .0
    } else {
        match app.engine().open(&host, port).await {
            (_, Some(transport)) => {
                let (status, content) = app
                    .engine()
                    .dispatch(Some(transport), &host, port, &method, fields)
                    .await;
                if let Some(content) = content {
                    println!("{}", content.body.unwrap_or_default());
                }
                status
            }
            (status, None) => {
                error!("Handshake with {}:{} failed: {}", host, port, status);
                status
            }
        }
    };

    println!("{} {}{} -> {}", method, host, route, status);
    for host in &app.snapshot().await.hosts {
        print_host(host);
    }
    Ok(())
}

async fn handle_serve_command(
    hostname: Option<String>,
    port: Option<u16>,
    content: Vec<String>,
    mut config: MagnetConfig,
) -> Result<()> {
    if hostname.is_some() {
        config.network.hostname = hostname;
    }
    if let Some(port) = port {
        config.network.port = port;
    }

    let mut store = ContentStore::new();
    for pair in content {
        let (route, text) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected ROUTE=TEXT, got {}", pair))?;
        store.insert(route, "text/plain", text);
    }

    let responder = Responder::from_config(&config).await?.with_content(store);
    info!("Listening on {}", responder.local_addr()?);

    tokio::select! {
        result = responder.run() => {
            if let Err(e) = result {
                error!("Responder error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down gracefully...");
        }
    }
    Ok(())
}

async fn handle_run_command(hostname: Option<String>, mut config: MagnetConfig) -> Result<()> {
    if hostname.is_some() {
        config.network.hostname = hostname;
    }

    info!("Starting magnet node...");
    info!("Interface: {}", config.network.interface);
    info!("Port: {}", config.network.port);

    let app = App::new(config);

    tokio::select! {
        result = app.run() => {
            if let Err(e) = result {
                error!("Application error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down gracefully...");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn handle_config_commands(action: ConfigCommands, config: &MagnetConfig) -> Result<()> {
    match action {
        ConfigCommands::Generate { output } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            MagnetConfig::default().save(&output_path)?;
            println!("✓ Configuration generated: {}", output_path.display());
        }
        ConfigCommands::Validate { file } => {
            let config_to_validate = match file {
                Some(path) => MagnetConfig::from_file(path)?,
                None => config.clone(),
            };
            config_to_validate.validate()?;
            println!("✓ Configuration is valid");
        }
        ConfigCommands::Show => {
            println!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
