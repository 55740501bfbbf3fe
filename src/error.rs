use std::time::Duration;

/// Steps of a configuration transaction, used to say where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStep {
    Prepare,
    Load,
    Commit,
    Abandon,
}

impl std::fmt::Display for TxnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxnStep::Prepare => "prepare",
            TxnStep::Load => "load",
            TxnStep::Commit => "commit",
            TxnStep::Abandon => "abandon",
        };
        f.write_str(s)
    }
}

/// Errors raised while driving a device CLI
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport could not be spawned or never became live
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// The device rejected a command outright; later commands in the batch were not sent
    #[error("command {command:?} failed: {reason}\n{output}")]
    TransportCommandFailure {
        command: String,
        output: String,
        reason: String,
    },

    #[error("cert infra isn't ready: {output}")]
    InfrastructureNotReady { output: String },

    /// A load or commit step was rejected; the previously active configuration is kept
    #[error("config {step} failed: {output}")]
    CommitFailure { step: TxnStep, output: String },

    #[error("cert bootstrap timed out after {elapsed:?}")]
    TimeoutExceeded { elapsed: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("waiting for instance readiness failed: {0}")]
    Readiness(String),

    #[error("no node implementation registered for vendor {0}")]
    UnknownVendor(String),

    #[error("{node} does not support {capability}")]
    Unsupported { node: String, capability: &'static str },

    #[error("invalid node spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for conditions the cert poll loop retries instead of surfacing
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::InfrastructureNotReady { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
