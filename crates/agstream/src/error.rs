//! Error types for the streaming bridge.

use std::time::Duration;

use agstream_protocol::RunErrorCode;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced to the caller of a run or of the bridge setup.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The event consumer went away; the run cannot deliver anything else.
    #[error("event consumer closed; dropped {kind} for run {run_id}")]
    PublisherClosed { run_id: String, kind: &'static str },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    /// The spawned run task panicked or was aborted.
    #[error("run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures raised by the upstream fragment source.
///
/// These never escape a run as errors: the middleware turns them into a
/// single `run-error` event.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The model provider reported a failure.
    #[error("model provider failed: {0}")]
    Provider(String),

    /// The model pipeline stopped producing fragments in time.
    #[error("model pipeline timed out after {0:?}")]
    Timeout(Duration),

    /// A fragment could not be decoded.
    #[error("invalid fragment: {0}")]
    Decode(#[from] serde_json::Error),

    /// Reading the fragment source failed.
    #[error("fragment source read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream pipeline cancelled itself.
    #[error("upstream cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UpstreamError {
    /// Protocol error code reported to the client for this failure.
    pub fn code(&self) -> RunErrorCode {
        match self {
            Self::Timeout(_) => RunErrorCode::Timeout,
            Self::Decode(_) => RunErrorCode::DecodeError,
            Self::Cancelled => RunErrorCode::Cancelled,
            Self::Provider(_) | Self::Io(_) | Self::Other(_) => RunErrorCode::UpstreamError,
        }
    }
}
