use std::time::Duration;

use crate::classify::{CommandResult, MultiResponse};
use crate::error::{Error, Result};
use crate::models::DeviceIdentity;
use crate::transport::{Channel, CommandTransport};

/// Disable paging so every response ends at a prompt
const ON_OPEN_COMMANDS: &[&str] = &["set cli screen-length 0", "set cli screen-width 511"];

const ENTER_CONFIG: &str = "configure";
const EXIT_CONFIG: &str = "exit configuration-mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliMode {
    Operational,
    Configuration,
}

/// CliSession is one interactive CLI session, owned by a single operation
pub struct CliSession {
    target: DeviceIdentity,
    channel: Box<dyn Channel>,
    state: SessionState,
    mode: CliMode,
    op_timeout: Duration,
}

impl CliSession {
    /// Spawn a channel to `target` and make sure it is live and unpaged
    pub async fn open(
        transport: &dyn CommandTransport,
        target: &DeviceIdentity,
        op_timeout: Duration,
    ) -> Result<Self> {
        let channel = transport.spawn(target).await?;
        let mut session = Self {
            target: target.clone(),
            channel,
            state: SessionState::Open,
            mode: CliMode::Operational,
            op_timeout,
        };

        if !session.channel.is_alive() {
            session.close().await;
            return Err(Error::Connect {
                target: target.to_string(),
                reason: "CLI channel not open".to_string(),
            });
        }

        let on_open: Vec<String> = ON_OPEN_COMMANDS.iter().map(|c| c.to_string()).collect();
        if let Err(e) = session.send_commands(&on_open).await {
            session.close().await;
            return Err(Error::Connect {
                target: target.to_string(),
                reason: format!("session setup failed: {}", e),
            });
        }

        tracing::debug!("{} - CLI session open", target.name());
        Ok(session)
    }

    pub fn target(&self) -> &DeviceIdentity {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> CliMode {
        self.mode
    }

    pub fn is_alive(&mut self) -> bool {
        self.state == SessionState::Open && self.channel.is_alive()
    }

    /// Send one command and wrap its reply
    pub async fn send_command(&mut self, command: &str) -> Result<CommandResult> {
        if self.state == SessionState::Closed {
            return Err(Error::TransportCommandFailure {
                command: command.to_string(),
                output: String::new(),
                reason: "session closed".to_string(),
            });
        }
        let resp = self.channel.send(command, self.op_timeout).await?;
        Ok(CommandResult {
            command: command.to_string(),
            result: resp.output,
            failed: resp.failed,
        })
    }

    /// Send commands in order. The first channel-level failure stops the batch;
    /// nothing after it is written to the device.
    pub async fn send_commands(&mut self, commands: &[String]) -> Result<MultiResponse> {
        let mut multi = MultiResponse::default();
        for command in commands {
            let result = self.send_command(command).await?;
            if let Some(reason) = &result.failed {
                tracing::debug!("{} - command {:?} failed: {}", self.target.name(), command, reason);
                return Err(Error::TransportCommandFailure {
                    command: command.clone(),
                    output: result.result.clone(),
                    reason: reason.clone(),
                });
            }
            multi.responses.push(result);
        }
        Ok(multi)
    }

    /// Send configuration statements from configuration mode, then drop back
    /// to operational mode once the whole batch went through
    pub async fn send_configs(&mut self, configs: &[String]) -> Result<MultiResponse> {
        self.enter_config().await?;
        let multi = self.send_commands(configs).await?;
        self.exit_config().await?;
        Ok(multi)
    }

    pub async fn enter_config(&mut self) -> Result<()> {
        if self.mode == CliMode::Configuration {
            return Ok(());
        }
        self.send_commands(&[ENTER_CONFIG.to_string()]).await?;
        self.mode = CliMode::Configuration;
        Ok(())
    }

    pub async fn exit_config(&mut self) -> Result<()> {
        if self.mode == CliMode::Operational {
            return Ok(());
        }
        self.send_commands(&[EXIT_CONFIG.to_string()]).await?;
        self.mode = CliMode::Operational;
        Ok(())
    }

    /// Release the channel. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        if let Err(e) = self.channel.close().await {
            tracing::warn!("{} - failed to close CLI session: {}", self.target.name(), e);
        }
    }
}
