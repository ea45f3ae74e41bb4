//! AAAA resolution against a pinned set of DNS servers.
//!
//! The host's default resolver may not return usable AAAA records, so the
//! relay never consults it. [`DnsResolver`] builds a `hickory-resolver`
//! instance that only knows the configured nameservers, ignores the hosts
//! file, has caching turned off (every session re-resolves), and only ever
//! asks for AAAA records.

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use hickory_resolver::config::{NameServerConfigGroup, ResolveHosts, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::future::Future;
use std::net::{IpAddr, Ipv6Addr};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Hostname-to-address lookup used by sessions.
///
/// Kept as a trait so sessions can be driven by fixed or failing resolvers.
pub trait Resolve: Send + Sync {
    /// Resolve `host` to exactly one address, or fail with
    /// [`RelayError::Resolution`].
    fn resolve<'a>(
        &'a self,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = RelayResult<IpAddr>> + Send + 'a>>;
}

/// Resolver that queries only the configured nameservers for AAAA records.
pub struct DnsResolver {
    /// hickory resolver bound to the pinned nameservers.
    inner: TokioResolver,
}

impl DnsResolver {
    /// Build a resolver from the relay configuration.
    ///
    /// Uses `nameservers`, `dns_port`, `dns_timeout` and `dns_attempts`.
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        Self::with_nameservers(
            &config.nameservers,
            config.dns_port,
            config.dns_timeout,
            config.dns_attempts,
        )
    }

    /// Build a resolver for an explicit nameserver list.
    ///
    /// # Arguments
    ///
    /// * `nameservers` - DNS servers to query, in order of preference.
    /// * `port` - Port the nameservers listen on (UDP, with TCP fallback).
    /// * `timeout` - Per-query timeout.
    /// * `attempts` - Query attempts before a nameserver is given up on.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `nameservers` is empty.
    pub fn with_nameservers(
        nameservers: &[IpAddr],
        port: u16,
        timeout: Duration,
        attempts: usize,
    ) -> RelayResult<Self> {
        if nameservers.is_empty() {
            return Err(RelayError::Config(
                "at least one DNS server is required".to_string(),
            ));
        }

        let group = NameServerConfigGroup::from_ips_clear(nameservers, port, true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let inner = TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(pinned_opts(timeout, attempts))
            .build();

        Ok(Self { inner })
    }

    /// Look up the AAAA records for `host` and return the first one in
    /// response order.
    ///
    /// An IPv6 literal is returned without a query. An IPv4 literal is
    /// rejected since the relay has no IPv4 path.
    pub async fn resolve_ipv6(&self, host: &str) -> RelayResult<Ipv6Addr> {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => return Ok(ip),
            Ok(IpAddr::V4(ip)) => {
                return Err(RelayError::resolution(
                    host,
                    format!("{ip} is an IPv4 address, an IPv6 target is required"),
                ));
            }
            Err(_) => {}
        }

        let lookup = self.inner.ipv6_lookup(host).await.map_err(|e| {
            warn!(host = %host, error = %e, "AAAA lookup failed");
            RelayError::resolution(host, e)
        })?;

        let first = lookup.iter().next().map(|aaaa| aaaa.0);
        match first {
            Some(ip) => {
                debug!(host = %host, ip = %ip, "AAAA lookup succeeded");
                Ok(ip)
            }
            None => Err(RelayError::resolution(host, "no AAAA records in response")),
        }
    }
}

/// Options that keep every answer coming from the nameservers: no hosts
/// file, no cache.
fn pinned_opts(timeout: Duration, attempts: usize) -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = attempts;
    opts.cache_size = 0;
    opts.use_hosts_file = ResolveHosts::Never;
    opts
}

impl Resolve for DnsResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = RelayResult<IpAddr>> + Send + 'a>> {
        Box::pin(async move { self.resolve_ipv6(host).await.map(IpAddr::V6) })
    }
}
