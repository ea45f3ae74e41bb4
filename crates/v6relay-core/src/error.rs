use thiserror::Error;

/// Errors produced by the relay.
///
/// Resolution and connect failures abort a single session; stream failures
/// end one forwarding direction. None of them are retried.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("resolution failed for {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("stream error ({direction}): {source}")]
    Stream {
        direction: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("close error: {0}")]
    Close(std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub(crate) fn resolution(host: &str, reason: impl std::fmt::Display) -> Self {
        RelayError::Resolution {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
