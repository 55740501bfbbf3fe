use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::DeviceIdentity;

mod kubectl;

#[cfg(test)]
pub mod fake;
#[cfg(test)]
pub mod scripted;

pub use kubectl::KubectlExecTransport;

/// Output the Junos CLI prints when it refuses to run a command at all.
/// Matching one of these marks the response as failed at the channel level.
pub const JUNOS_FAILED_WHEN_CONTAINS: &[&str] = &[
    "is ambiguous",
    "No valid completion",
    "unknown command",
    "syntax error",
];

/// Raw reply to one input written to the channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelResponse {
    pub output: String,
    pub failed: Option<String>,
}

impl ChannelResponse {
    /// Build a response, flagging it as failed if the output carries a Junos rejection
    pub fn from_output(output: String) -> Self {
        let failed = failed_reason(&output);
        Self { output, failed }
    }
}

/// Return the first Junos rejection pattern found in `output`
pub fn failed_reason(output: &str) -> Option<String> {
    JUNOS_FAILED_WHEN_CONTAINS
        .iter()
        .find(|p| output.contains(*p))
        .map(|p| p.to_string())
}

/// A live interactive CLI channel to one device
#[async_trait]
pub trait Channel: Send {
    /// Whether the underlying process/connection is still usable
    fn is_alive(&mut self) -> bool;

    /// Write `input` and collect output up to the next CLI prompt
    async fn send(&mut self, input: &str, timeout: Duration) -> Result<ChannelResponse>;

    /// Release the channel. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Spawns interactive CLI channels to devices
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn spawn(&self, target: &DeviceIdentity) -> Result<Box<dyn Channel>>;
}
