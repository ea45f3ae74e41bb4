//! v6relay: local IPv4 listener that relays to an IPv6-only database.
//!
//! Remote hostnames are resolved through pinned public DNS servers (AAAA
//! only), so IPv4-only clients can reach the service by pointing at
//! `127.0.0.1` instead of the remote host.

mod config;

use clap::Parser;
use config::CliOverrides;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use v6relay_core::{DnsResolver, Listener, RelayConfig};

/// v6relay: IPv4-to-IPv6 TCP relay
#[derive(Parser, Debug)]
#[command(name = "v6relay", version, about = "IPv4-to-IPv6 TCP relay with pinned DNS")]
struct Cli {
    /// Local IPv4 address to listen on
    #[arg(long)]
    listen_host: Option<String>,

    /// Local port to listen on
    #[arg(short = 'p', long)]
    listen_port: Option<u16>,

    /// Remote hostname (resolved to IPv6)
    #[arg(short = 'r', long)]
    remote_host: Option<String>,

    /// Remote TCP port
    #[arg(long)]
    remote_port: Option<u16>,

    /// DNS server to query (repeatable; replaces the defaults)
    #[arg(long = "dns", value_name = "IP")]
    dns: Vec<String>,

    /// Remote connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Config file path
    #[arg(long, default_value = "~/.v6relay/config.toml")]
    config: String,

    /// Resolve the remote host once, print the address, and exit
    #[arg(long)]
    check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let overrides = CliOverrides {
        listen_host: cli.listen_host.clone(),
        listen_port: cli.listen_port,
        remote_host: cli.remote_host.clone(),
        remote_port: cli.remote_port,
        dns_servers: cli.dns.clone(),
        connect_timeout: cli.connect_timeout,
    };

    let config_path = PathBuf::from(&cli.config);
    let relay_config = match config::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load config");
            std::process::exit(1);
        }
    };

    let resolver = match DnsResolver::new(&relay_config) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to create DNS resolver");
            std::process::exit(1);
        }
    };

    if cli.check {
        match resolver.resolve_ipv6(&relay_config.remote_host).await {
            Ok(ip) => {
                println!("{} -> {}", relay_config.remote_host, ip);
                return;
            }
            Err(e) => {
                error!(error = %e, "resolution check failed");
                std::process::exit(1);
            }
        }
    }

    let relay_config = Arc::new(relay_config);
    let listener = match Listener::bind(relay_config.clone(), Arc::new(resolver)).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %relay_config.listen, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    log_banner(&relay_config);

    if let Err(e) = listener.serve(shutdown_signal()).await {
        error!(error = %e, "relay error");
        std::process::exit(1);
    }

    info!("v6relay stopped");
}

fn log_banner(config: &RelayConfig) {
    let dns: Vec<String> = config.nameservers.iter().map(|ip| ip.to_string()).collect();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        remote = %format!("{}:{}", config.remote_host, config.remote_port),
        dns = %dns.join(", "),
        "starting v6relay"
    );
    info!(
        "point database clients at {}:{} (e.g. postgresql://USER:PASSWORD@{}:{}/postgres?sslmode=require)",
        config.listen.ip(),
        config.listen.port(),
        config.listen.ip(),
        config.listen.port()
    );
    info!("press Ctrl+C to stop the relay");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("received shutdown signal");
}
