//! One client connection bridged to one remote connection.

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::forwarder::{self, Direction, ForwardReport, ForwardSettings, Teardown};
use crate::resolver::Resolve;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info, warn};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Connecting,
    Forwarding,
    Closed,
}

/// What a finished session did, for logging and tests.
#[derive(Debug)]
pub struct SessionSummary {
    /// Listener-assigned id, matching the `session` field in log lines.
    pub id: u64,
    pub client_addr: SocketAddr,
    /// Resolved remote endpoint the session connected to.
    pub remote_addr: SocketAddr,
    /// State when `run` returned; always [`SessionState::Closed`].
    pub state: SessionState,
    /// Client to remote.
    pub upstream: ForwardReport,
    /// Remote to client.
    pub downstream: ForwardReport,
}

/// Owns the accepted client socket and, once connected, the remote socket.
///
/// Both sockets are dropped exactly once, when [`Session::run`] returns.
pub struct Session {
    id: u64,
    client: TcpStream,
    client_addr: SocketAddr,
    state: SessionState,
}

impl Session {
    /// Wrap an accepted client connection. The session starts in
    /// [`SessionState::Resolving`]; nothing happens until [`Session::run`].
    pub fn new(id: u64, client: TcpStream, client_addr: SocketAddr) -> Self {
        Self {
            id,
            client,
            client_addr,
            state: SessionState::Resolving,
        }
    }

    /// Resolve, connect, and relay until both directions are done.
    ///
    /// # Arguments
    ///
    /// * `resolver` - Looks up `config.remote_host` once for this session.
    /// * `config` - Remote port, connect timeout and forwarding settings.
    ///
    /// # Errors
    ///
    /// Resolution and connect failures close the client and are returned
    /// as [`RelayError::Resolution`] / [`RelayError::Connect`]; nothing is
    /// retried. Once forwarding starts the session always returns `Ok`,
    /// with per-direction failures recorded in the summary.
    pub async fn run(
        mut self,
        resolver: &dyn Resolve,
        config: &RelayConfig,
    ) -> RelayResult<SessionSummary> {
        let id = self.id;
        let host = config.remote_host.as_str();

        let ip = match resolver.resolve(host).await {
            Ok(ip) => {
                info!(session = id, host = %host, ip = %ip, "resolved remote host");
                ip
            }
            Err(e) => {
                warn!(session = id, host = %host, error = %e, "resolution failed, closing client");
                self.abort();
                return Err(e);
            }
        };

        self.state = SessionState::Connecting;
        let remote_addr = SocketAddr::new(ip, config.remote_port);
        info!(session = id, remote = %remote_addr, "connecting to remote");

        let remote = match time::timeout(config.connect_timeout, TcpStream::connect(remote_addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(session = id, remote = %remote_addr, error = %e, "remote connect failed, closing client");
                self.abort();
                return Err(RelayError::Connect {
                    addr: remote_addr.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    session = id,
                    remote = %remote_addr,
                    timeout_secs = config.connect_timeout.as_secs_f64(),
                    "remote connect timed out, closing client"
                );
                self.abort();
                return Err(RelayError::Connect {
                    addr: remote_addr.to_string(),
                    reason: "timed out".to_string(),
                });
            }
        };
        info!(session = id, remote = %remote_addr, "connected to remote");

        self.state = SessionState::Forwarding;
        let settings = ForwardSettings {
            buffer_size: config.buffer_size,
            poll_interval: config.poll_interval,
        };
        let teardown = Teardown::new();
        let (upstream, downstream) = tokio::join!(
            forwarder::forward(&self.client, &remote, Direction::ClientToRemote, &teardown, settings),
            forwarder::forward(&remote, &self.client, Direction::RemoteToClient, &teardown, settings),
        );

        // Forwarders already shut both sockets down; repeat in case either
        // exited before reaching its own cleanup.
        for socket in [&self.client, &remote] {
            if let Err(e) = forwarder::close_socket(socket) {
                debug!(session = id, error = %e, "ignoring close error");
            }
        }
        drop(remote);
        self.state = SessionState::Closed;

        if upstream.outcome.is_error() || downstream.outcome.is_error() {
            warn!(
                session = id,
                client = %self.client_addr,
                bytes_up = upstream.bytes,
                bytes_down = downstream.bytes,
                "session closed after forwarding error"
            );
        } else {
            info!(
                session = id,
                client = %self.client_addr,
                bytes_up = upstream.bytes,
                bytes_down = downstream.bytes,
                "session closed"
            );
        }

        Ok(SessionSummary {
            id,
            client_addr: self.client_addr,
            remote_addr,
            state: self.state,
            upstream,
            downstream,
        })
    }

    /// Close the client without ever having forwarded anything.
    fn abort(&mut self) {
        let stage = self.state;
        if let Err(e) = forwarder::close_socket(&self.client) {
            debug!(session = self.id, error = %e, "ignoring close error");
        }
        self.state = SessionState::Closed;
        info!(session = self.id, client = %self.client_addr, stage = ?stage, "session closed");
    }
}
