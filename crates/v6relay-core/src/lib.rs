//! v6relay-core: byte-transparent TCP relay from a local IPv4 listener to an
//! IPv6-only remote endpoint.
//!
//! Hostnames are resolved through an explicit set of DNS servers (AAAA only)
//! instead of the host's default resolver. Each accepted client gets its own
//! [`Session`], which connects out and runs two [`forwarder`] loops until
//! either side goes away.

pub mod config;
pub mod error;
pub mod forwarder;
pub mod listener;
pub mod resolver;
pub mod session;

// Re-export commonly used items at crate root.
pub use config::{RelayConfig, DEFAULT_NAMESERVERS};
pub use error::{RelayError, RelayResult};
pub use forwarder::{Direction, ForwardOutcome, ForwardReport};
pub use listener::Listener;
pub use resolver::{DnsResolver, Resolve};
pub use session::{Session, SessionState, SessionSummary};
