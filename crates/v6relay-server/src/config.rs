//! Relay configuration: TOML file + CLI overrides.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use v6relay_core::config::{DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_REMOTE_PORT};
use v6relay_core::{RelayConfig, DEFAULT_NAMESERVERS};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub dns: DnsSection,
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Hostname of the IPv6-only service. Empty = must come from the CLI.
    #[serde(default)]
    pub remote_host: String,
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    /// Seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            remote_host: String::new(),
            remote_port: default_remote_port(),
            connect_timeout: default_connect_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            buffer_size: default_buffer_size(),
            backlog: default_backlog(),
        }
    }
}

/// `[dns]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsSection {
    #[serde(default = "default_dns_servers")]
    pub servers: Vec<String>,
    #[serde(default = "default_dns_port")]
    pub port: u16,
    /// Seconds per query.
    #[serde(default = "default_dns_timeout")]
    pub timeout: u64,
    #[serde(default = "default_dns_attempts")]
    pub attempts: usize,
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            servers: default_dns_servers(),
            port: default_dns_port(),
            timeout: default_dns_timeout(),
            attempts: default_dns_attempts(),
        }
    }
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}
fn default_listen_port() -> u16 {
    5433
}
fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}
fn default_dns_servers() -> Vec<String> {
    DEFAULT_NAMESERVERS.iter().map(|ip| ip.to_string()).collect()
}
fn default_dns_port() -> u16 {
    53
}
fn default_dns_timeout() -> u64 {
    5
}
fn default_dns_attempts() -> usize {
    2
}

/// Values given on the command line; `None` / empty means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
    pub dns_servers: Vec<String>,
    pub connect_timeout: Option<u64>,
}

impl ConfigFile {
    /// Read a config file, returning defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let expanded = expand_tilde(path);
        if !expanded.exists() {
            debug!(path = %expanded.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        info!(path = %expanded.display(), "loading config file");
        let content = std::fs::read_to_string(&expanded)
            .with_context(|| format!("cannot read config {}", expanded.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("config parse error in {}", expanded.display()))
    }

    /// Merge CLI overrides on top of the file values and validate.
    pub fn resolve(self, cli: &CliOverrides) -> Result<RelayConfig> {
        let relay = self.relay;
        let dns = self.dns;

        let listen_host = cli.listen_host.clone().unwrap_or(relay.listen_host);
        let listen_ip: Ipv4Addr = listen_host
            .parse()
            .with_context(|| format!("listen host must be an IPv4 address, got {listen_host:?}"))?;
        let listen_port = cli.listen_port.unwrap_or(relay.listen_port);

        let remote_host = cli.remote_host.clone().unwrap_or(relay.remote_host);
        if remote_host.trim().is_empty() {
            bail!("no remote host configured (use --remote-host or [relay].remote_host)");
        }

        let server_strs = if cli.dns_servers.is_empty() {
            dns.servers
        } else {
            cli.dns_servers.clone()
        };
        let nameservers = parse_nameservers(&server_strs)?;

        let mut config = RelayConfig::new(remote_host.trim());
        config.listen = SocketAddrV4::new(listen_ip, listen_port);
        config.remote_port = cli.remote_port.unwrap_or(relay.remote_port);
        config.nameservers = nameservers;
        config.dns_port = dns.port;
        config.dns_timeout = Duration::from_secs(dns.timeout);
        config.dns_attempts = dns.attempts;
        config.connect_timeout =
            Duration::from_secs(cli.connect_timeout.unwrap_or(relay.connect_timeout));
        config.poll_interval = Duration::from_millis(relay.poll_interval_ms);
        config.buffer_size = relay.buffer_size;
        config.backlog = relay.backlog;

        config.validate()?;
        Ok(config)
    }
}

/// Load the config file (if any) and apply CLI overrides.
pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> Result<RelayConfig> {
    let file = match config_path {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    file.resolve(cli)
}

fn parse_nameservers(servers: &[String]) -> Result<Vec<IpAddr>> {
    if servers.is_empty() {
        bail!("at least one DNS server is required");
    }
    servers
        .iter()
        .map(|s| {
            s.trim()
                .parse::<IpAddr>()
                .with_context(|| format!("invalid DNS server address {s:?}"))
        })
        .collect()
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
