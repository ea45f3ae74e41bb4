//! Runtime relay configuration.
//!
//! Loading from files and CLI flags happens in the binary; this type only
//! carries resolved values and checks them.

use crate::error::{RelayError, RelayResult};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Public resolvers used when no nameservers are configured explicitly.
pub const DEFAULT_NAMESERVERS: [IpAddr; 2] = [
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
    IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
];

pub const DEFAULT_LISTEN: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5433);
pub const DEFAULT_REMOTE_PORT: u16 = 6543;
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_BACKLOG: i32 = 5;

/// Fully resolved relay settings shared (read-only) by every session.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Local IPv4 address the listener binds.
    pub listen: SocketAddrV4,
    /// Hostname of the IPv6-only remote service.
    pub remote_host: String,
    pub remote_port: u16,
    /// DNS servers queried for AAAA records. Never the system resolver.
    pub nameservers: Vec<IpAddr>,
    /// Port the nameservers listen on (53 outside of tests).
    pub dns_port: u16,
    /// Per-query DNS timeout.
    pub dns_timeout: Duration,
    /// Query attempts per nameserver before giving up.
    pub dns_attempts: usize,
    /// Upper bound on the outbound connect.
    pub connect_timeout: Duration,
    /// Bounded readability wait in the forwarding loop.
    pub poll_interval: Duration,
    /// Bytes read per forwarding iteration.
    pub buffer_size: usize,
    /// Listen backlog.
    pub backlog: i32,
}

impl RelayConfig {
    /// Config targeting `remote_host` with every other value at its default.
    pub fn new(remote_host: impl Into<String>) -> Self {
        Self {
            listen: DEFAULT_LISTEN,
            remote_host: remote_host.into(),
            remote_port: DEFAULT_REMOTE_PORT,
            nameservers: DEFAULT_NAMESERVERS.to_vec(),
            dns_port: 53,
            dns_timeout: Duration::from_secs(5),
            dns_attempts: 2,
            connect_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            buffer_size: DEFAULT_BUFFER_SIZE,
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> RelayResult<()> {
        if self.remote_host.trim().is_empty() {
            return Err(RelayError::Config("remote host is not set".to_string()));
        }
        if self.remote_port == 0 {
            return Err(RelayError::Config("remote port must be non-zero".to_string()));
        }
        if self.nameservers.is_empty() {
            return Err(RelayError::Config(
                "at least one DNS server is required".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(RelayError::Config("buffer size must be non-zero".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(RelayError::Config("poll interval must be non-zero".to_string()));
        }
        if self.backlog <= 0 {
            return Err(RelayError::Config("backlog must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_relay_contract() {
        let cfg = RelayConfig::new("db.example.com");
        assert_eq!(cfg.listen, "127.0.0.1:5433".parse().unwrap());
        assert_eq!(cfg.remote_port, 6543);
        assert_eq!(cfg.buffer_size, 4096);
        assert_eq!(cfg.backlog, 5);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(30));
        assert_eq!(
            cfg.nameservers,
            vec!["8.8.8.8".parse::<IpAddr>().unwrap(), "8.8.4.4".parse().unwrap()]
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_remote_host_rejected() {
        let cfg = RelayConfig::new("  ");
        assert!(matches!(cfg.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn empty_nameservers_rejected() {
        let mut cfg = RelayConfig::new("db.example.com");
        cfg.nameservers.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_buffer_rejected() {
        let mut cfg = RelayConfig::new("db.example.com");
        cfg.buffer_size = 0;
        assert!(cfg.validate().is_err());
    }
}
