//! Local IPv4 accept loop.
//!
//! Binds with `SO_REUSEADDR` and a small backlog, then hands every accepted
//! connection to a freshly spawned [`Session`] without waiting for it. The
//! loop runs until the shutdown future completes; in-flight sessions are left
//! to finish on their own.

use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::resolver::Resolve;
use crate::session::Session;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, info, warn};

/// Pause after a failed accept. Errors such as EMFILE persist until some
/// session releases a descriptor.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound relay listener.
pub struct Listener {
    inner: TcpListener,
    config: Arc<RelayConfig>,
    resolver: Arc<dyn Resolve>,
}

impl Listener {
    /// Bind `config.listen` with address reuse enabled.
    ///
    /// # Arguments
    ///
    /// * `config` - Listen address and backlog; shared with every session.
    /// * `resolver` - Shared by every session spawned from this listener.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`](crate::RelayError::Io) if the socket
    /// cannot be created, bound or put into listening state.
    pub async fn bind(config: Arc<RelayConfig>, resolver: Arc<dyn Resolve>) -> RelayResult<Self> {
        let addr = SocketAddr::V4(config.listen);

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog)?;

        let inner = TcpListener::from_std(socket.into())?;
        debug!(addr = %addr, backlog = config.backlog, "listener bound");

        Ok(Self {
            inner,
            config,
            resolver,
        })
    }

    /// The address actually bound (differs from the config when port 0 was
    /// requested).
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves, then drop the socket.
    ///
    /// A failed accept is logged and followed by [`ACCEPT_BACKOFF`] before
    /// the next attempt; `shutdown` still interrupts the pause.
    pub async fn serve<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut next_session_id: u64 = 1;

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down listener");
                    break;
                }
                result = self.inner.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.dispatch(next_session_id, stream, peer);
                    next_session_id += 1;
                }
                Err(e) => {
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("shutting down listener");
                            break;
                        }
                        _ = accept_backoff(&e) => {}
                    }
                }
            }
        }

        drop(self.inner);
        info!("listener stopped");
        Ok(())
    }

    fn dispatch(&self, id: u64, stream: TcpStream, peer: SocketAddr) {
        info!(session = id, peer = %peer, "new connection accepted");

        let session = Session::new(id, stream, peer);
        let config = self.config.clone();
        let resolver = self.resolver.clone();
        tokio::spawn(async move {
            // Failures are already logged by the session.
            let _ = session.run(resolver.as_ref(), &config).await;
        });
    }
}

async fn accept_backoff(error: &io::Error) {
    warn!(error = %error, backoff_ms = ACCEPT_BACKOFF.as_millis() as u64, "accept failed");
    time::sleep(ACCEPT_BACKOFF).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
    use std::pin::Pin;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::sync::oneshot;

    struct NeverResolves;

    impl Resolve for NeverResolves {
        fn resolve<'a>(
            &'a self,
            host: &'a str,
        ) -> Pin<Box<dyn Future<Output = RelayResult<IpAddr>> + Send + 'a>> {
            Box::pin(async move { Err(RelayError::resolution(host, "no answer")) })
        }
    }

    fn ephemeral_config() -> Arc<RelayConfig> {
        let mut cfg = RelayConfig::new("db.example.test");
        cfg.listen = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        Arc::new(cfg)
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let listener = Listener::bind(ephemeral_config(), Arc::new(NeverResolves))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.is_ipv4());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_rebind_after_shutdown() {
        let listener = Listener::bind(ephemeral_config(), Arc::new(NeverResolves))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        listener.serve(async {}).await.unwrap();

        let SocketAddr::V4(v4) = addr else {
            panic!("listener must be IPv4");
        };
        let mut cfg = RelayConfig::new("db.example.test");
        cfg.listen = v4;
        let again = Listener::bind(Arc::new(cfg), Arc::new(NeverResolves)).await;
        assert!(again.is_ok(), "rebind failed: {:?}", again.err());
    }

    #[tokio::test]
    async fn test_accept_failure_backs_off() {
        let err = io::Error::from_raw_os_error(24); // EMFILE
        let started = std::time::Instant::now();
        accept_backoff(&err).await;
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_keeps_accepting_and_stops_on_shutdown() {
        let listener = Listener::bind(ephemeral_config(), Arc::new(NeverResolves))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listener.serve(async {
            let _ = stop_rx.await;
        }));

        // Every session fails resolution and closes its client.
        for _ in 0..3 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let mut buf = [0u8; 1];
            let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap_or(0);
            assert_eq!(n, 0);
        }

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
