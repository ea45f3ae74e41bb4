//! Unidirectional copy loop between two sockets owned by a session.
//!
//! Each session runs two of these concurrently, one per direction. The loop
//! borrows the sockets and never owns them. Whichever direction finishes
//! first raises the session's [`Teardown`] flag and shuts both sockets down,
//! which wakes the sibling: its pending read sees EOF or its next write
//! fails, and it exits too.
//!
//! ```text
//! WAITING_READABLE ──ready──▶ READING ──n>0──▶ WRITING ──▶ WAITING_READABLE
//!        │ (wait elapsed: check teardown)  │ n=0            │ error
//!        ▼                                  ▼                ▼
//!   CLOSED_ERROR / CLOSED_CLEAN  ──▶  shut down both sockets
//! ```

use crate::error::{RelayError, RelayResult};
use socket2::SockRef;
use std::fmt;
use std::io;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

/// Which half of the session a forwarding loop serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::ClientToRemote => "client->remote",
            Direction::RemoteToClient => "remote->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-session flag raised by the first forwarding loop to exit.
#[derive(Debug, Default)]
pub struct Teardown(AtomicBool);

impl Teardown {
    /// A fresh, unraised flag. One per session, shared by both directions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent; the flag is never lowered again.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether either direction has started tearing the session down.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Loop tuning shared by both directions of a session.
#[derive(Debug, Clone, Copy)]
pub struct ForwardSettings {
    /// Bytes read per iteration.
    pub buffer_size: usize,
    /// Upper bound on a single readability wait before liveness is rechecked.
    pub poll_interval: Duration,
}

/// How a forwarding loop ended.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// The source closed its write side (zero-length read).
    Eof,
    /// The sibling direction tore the session down first.
    Cancelled,
    /// A read or write failed.
    Failed(RelayError),
}

impl ForwardOutcome {
    /// True only for [`ForwardOutcome::Failed`]; EOF and cancellation are
    /// normal ends.
    pub fn is_error(&self) -> bool {
        matches!(self, ForwardOutcome::Failed(_))
    }
}

/// Result of one forwarding loop.
#[derive(Debug)]
pub struct ForwardReport {
    pub direction: Direction,
    /// Bytes fully written to the destination. A chunk whose write failed
    /// part-way is not counted.
    pub bytes: u64,
    pub outcome: ForwardOutcome,
}

/// Copy bytes from `src` to `dst` until EOF, error, or session teardown.
///
/// # Arguments
///
/// * `src` - Socket to read from.
/// * `dst` - Socket every chunk is written to in full, in read order.
/// * `direction` - Used for log fields and error context only.
/// * `teardown` - Shared with the sibling loop; raised on exit and checked
///   whenever a readability wait of `settings.poll_interval` elapses.
/// * `settings` - Read buffer size and readability wait bound.
///
/// Both sockets are shut down before returning, whatever the outcome.
/// Errors never escape; they are logged and carried in the report.
pub async fn forward(
    src: &TcpStream,
    dst: &TcpStream,
    direction: Direction,
    teardown: &Teardown,
    settings: ForwardSettings,
) -> ForwardReport {
    let mut buf = vec![0u8; settings.buffer_size];
    let mut bytes: u64 = 0;

    let outcome = loop {
        match time::timeout(settings.poll_interval, src.readable()).await {
            Err(_elapsed) => {
                if teardown.is_triggered() {
                    break ForwardOutcome::Cancelled;
                }
                continue;
            }
            Ok(Err(e)) => break stream_failure(direction, e),
            Ok(Ok(())) => {}
        }

        let n = match src.try_read(&mut buf) {
            Ok(0) if teardown.is_triggered() => break ForwardOutcome::Cancelled,
            Ok(0) => break ForwardOutcome::Eof,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => break stream_failure(direction, e),
        };

        if let Err(e) = write_chunk(dst, &buf[..n]).await {
            if teardown.is_triggered() {
                break ForwardOutcome::Cancelled;
            }
            break stream_failure(direction, e);
        }
        bytes += n as u64;
        debug!(direction = %direction, n, "forwarded chunk");
    };

    teardown.trigger();
    for socket in [src, dst] {
        if let Err(e) = close_socket(socket) {
            debug!(direction = %direction, error = %e, "ignoring close error");
        }
    }

    ForwardReport {
        direction,
        bytes,
        outcome,
    }
}

/// Write `chunk` to `dst` in full.
async fn write_chunk(dst: &TcpStream, mut chunk: &[u8]) -> io::Result<()> {
    while !chunk.is_empty() {
        dst.writable().await?;
        match dst.try_write(chunk) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "destination accepted no bytes",
                ));
            }
            Ok(n) => chunk = &chunk[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn stream_failure(direction: Direction, source: io::Error) -> ForwardOutcome {
    warn!(direction = %direction, error = %source, "forwarding error");
    ForwardOutcome::Failed(RelayError::Stream {
        direction: direction.label(),
        source,
    })
}

/// Shut down both halves of `socket`.
///
/// Repeating this on a socket that is already shut down, or whose peer has
/// gone away, yields [`RelayError::Close`], which callers discard. The file
/// descriptor itself is released when the owning session drops the stream.
pub fn close_socket(socket: &TcpStream) -> RelayResult<()> {
    SockRef::from(socket)
        .shutdown(Shutdown::Both)
        .map_err(RelayError::Close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings() -> ForwardSettings {
        ForwardSettings {
            buffer_size: 4096,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Connected (local, peer) pair over loopback.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (connected.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_copies_until_eof() {
        // writer -> src ==forward==> dst -> reader
        let (mut writer, src) = socket_pair().await;
        let (dst, mut reader) = socket_pair().await;
        let teardown = Teardown::new();

        let copy = forward(&src, &dst, Direction::ClientToRemote, &teardown, settings());
        let drive = async {
            writer.write_all(b"hello ").await.unwrap();
            writer.write_all(b"world").await.unwrap();
            writer.shutdown().await.unwrap();
            let mut received = Vec::new();
            reader.read_to_end(&mut received).await.unwrap();
            received
        };

        let (report, received) = tokio::join!(copy, drive);
        assert_eq!(received, b"hello world");
        assert_eq!(report.bytes, 11);
        assert!(matches!(report.outcome, ForwardOutcome::Eof));
        assert!(teardown.is_triggered());
    }

    #[tokio::test]
    async fn test_large_payload_kept_in_order() {
        let (mut writer, src) = socket_pair().await;
        let (dst, mut reader) = socket_pair().await;
        let teardown = Teardown::new();
        let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();

        let copy = forward(&src, &dst, Direction::RemoteToClient, &teardown, settings());
        let drive = async {
            writer.write_all(&payload).await.unwrap();
            writer.shutdown().await.unwrap();
            let mut received = Vec::new();
            reader.read_to_end(&mut received).await.unwrap();
            received
        };

        let (report, received) = tokio::join!(copy, drive);
        assert_eq!(received, payload);
        assert_eq!(report.bytes, payload.len() as u64);
    }

    #[tokio::test]
    async fn test_teardown_stops_idle_loop() {
        let (_writer, src) = socket_pair().await;
        let (dst, _reader) = socket_pair().await;
        let teardown = Teardown::new();
        teardown.trigger();

        let report = time::timeout(
            Duration::from_secs(2),
            forward(&src, &dst, Direction::ClientToRemote, &teardown, settings()),
        )
        .await
        .expect("idle loop must notice teardown within the poll interval");
        assert!(matches!(report.outcome, ForwardOutcome::Cancelled));
        assert_eq!(report.bytes, 0);
    }

    #[tokio::test]
    async fn test_exit_shuts_down_both_sockets() {
        let (mut writer, src) = socket_pair().await;
        let (dst, mut reader) = socket_pair().await;
        let teardown = Teardown::new();

        writer.shutdown().await.unwrap();
        let report = forward(&src, &dst, Direction::ClientToRemote, &teardown, settings()).await;
        assert!(matches!(report.outcome, ForwardOutcome::Eof));

        // The far side of dst sees EOF once dst is shut down.
        let mut buf = [0u8; 8];
        let n = time::timeout(Duration::from_secs(2), reader.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_close_socket_is_idempotent() {
        let (a, mut b) = socket_pair().await;
        assert!(close_socket(&a).is_ok());

        // A repeat may be accepted or rejected with ENOTCONN depending on the
        // platform, but only ever as a Close error.
        match close_socket(&a) {
            Ok(()) | Err(RelayError::Close(_)) => {}
            Err(other) => panic!("unexpected error on repeated close: {other:?}"),
        }

        let mut buf = [0u8; 4];
        let n = time::timeout(Duration::from_secs(2), b.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::ClientToRemote.to_string(), "client->remote");
        assert_eq!(Direction::RemoteToClient.label(), "remote->client");
    }
}
