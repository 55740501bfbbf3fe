use chrono::Utc;
use std::sync::Arc;

use crate::classify::{CommandResult, MultiResponse};
use crate::config::Timeouts;
use crate::error::{Error, Result, TxnStep};
use crate::junos;
use crate::models::DeviceIdentity;
use crate::session::CliSession;
use crate::transport::CommandTransport;

/// Discards everything staged in the candidate since the last commit
const ROLLBACK: &str = "rollback 0";

/// End-of-input marker for `load ... terminal`
const END_OF_INPUT: char = '\u{4}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Layer the new statements onto the active configuration
    Merge,
    /// Replace the active configuration wholesale
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `set ...` / `delete ...` statements
    Set,
    /// Curly-brace hierarchy text
    Text,
}

const SET_VERBS: &[&str] = &["set ", "delete ", "activate ", "deactivate ", "insert ", "rename ", "annotate "];

/// Set-style when every meaningful line starts with a configuration verb
pub fn detect_format(config: &str) -> ConfigFormat {
    let mut lines = config
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .peekable();
    if lines.peek().is_none() {
        return ConfigFormat::Text;
    }
    if lines.all(|l| SET_VERBS.iter().any(|v| l.starts_with(v))) {
        ConfigFormat::Set
    } else {
        ConfigFormat::Text
    }
}

fn load_command(mode: LoadMode, format: ConfigFormat) -> &'static str {
    match (mode, format) {
        (LoadMode::Merge, ConfigFormat::Set) => "load set terminal",
        (LoadMode::Merge, ConfigFormat::Text) => "load merge terminal",
        (LoadMode::Override, _) => "load override terminal",
    }
}

fn step_for(command: &str) -> TxnStep {
    if command.starts_with("commit") {
        TxnStep::Commit
    } else if command == ROLLBACK {
        TxnStep::Prepare
    } else {
        TxnStep::Load
    }
}

/// Best effort: drop staged changes and return to operational mode
async fn abandon(session: &mut CliSession) {
    let name = session.target().name().to_string();
    if let Err(e) = session.enter_config().await {
        tracing::warn!("{} - could not enter config mode to discard candidate: {}", name, e);
        return;
    }
    match session.send_commands(&[ROLLBACK.to_string()]).await {
        Ok(multi) if multi.any_error() => {
            tracing::warn!("{} - discarding candidate reported: {}", name, multi.joined_result())
        }
        Ok(_) => tracing::info!("{} - candidate discarded", name),
        Err(e) => tracing::warn!("{} - failed to discard candidate: {}", name, e),
    }
    if let Err(e) = session.exit_config().await {
        tracing::warn!("{} - failed to leave config mode: {}", name, e);
    }
}

/// Send configuration statements one at a time and stop at the first one the
/// device rejects, either at the channel level or with `error:` in its output.
/// On failure the candidate is discarded before returning.
pub(crate) async fn apply_config_batch(session: &mut CliSession, batch: &[String]) -> Result<MultiResponse> {
    session.enter_config().await?;

    let mut multi = MultiResponse::default();
    for command in batch {
        let result = match session.send_command(command).await {
            Ok(result) => result,
            Err(e) => {
                abandon(session).await;
                return Err(e);
            }
        };
        if let Some(reason) = result.failed.clone() {
            abandon(session).await;
            return Err(Error::TransportCommandFailure {
                command: command.clone(),
                output: result.result,
                reason,
            });
        }
        let rejected = result.has_error();
        multi.responses.push(result);
        if rejected {
            abandon(session).await;
            return Err(Error::CommitFailure {
                step: step_for(command),
                output: multi.joined_result(),
            });
        }
    }

    session.exit_config().await?;
    Ok(multi)
}

/// A named candidate configuration: prepare, load, then commit or abandon
pub struct ConfigTransaction<'a> {
    session: &'a mut CliSession,
    name: String,
}

impl<'a> ConfigTransaction<'a> {
    /// Enter configuration mode and reset the candidate to the active configuration
    pub async fn prepare(session: &'a mut CliSession, name: impl Into<String>) -> Result<ConfigTransaction<'a>> {
        let name = name.into();
        tracing::debug!("{} - preparing candidate {}", session.target().name(), name);

        session.enter_config().await?;
        let multi = session.send_commands(&[ROLLBACK.to_string()]).await?;
        if multi.any_error() {
            abandon(session).await;
            return Err(Error::CommitFailure {
                step: TxnStep::Prepare,
                output: multi.joined_result(),
            });
        }
        Ok(Self { session, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage `config` in the candidate. Any rejection discards the candidate.
    pub async fn load(&mut self, config: &str, mode: LoadMode) -> Result<CommandResult> {
        let command = load_command(mode, detect_format(config));
        let payload = format!("{}\n{}\n{}", command, config.trim_end(), END_OF_INPUT);
        self.step(TxnStep::Load, &payload).await
    }

    /// Activate the candidate. A failure is reported, never retried.
    ///
    /// Once the commit is accepted the new configuration is active, so a
    /// failure to leave configuration mode afterwards is only logged.
    pub async fn commit(mut self) -> Result<CommandResult> {
        let command = format!("commit comment \"{}\"", self.name);
        let result = self.step(TxnStep::Commit, &command).await?;
        if let Err(e) = self.session.exit_config().await {
            tracing::warn!(
                "{} - committed {} but failed to leave config mode: {}",
                self.session.target().name(),
                self.name,
                e
            );
        }
        Ok(result)
    }

    /// Drop whatever was staged and leave configuration mode
    pub async fn abandon(self) {
        abandon(self.session).await;
    }

    async fn step(&mut self, step: TxnStep, input: &str) -> Result<CommandResult> {
        let result = match self.session.send_command(input).await {
            Ok(result) => result,
            Err(e) => {
                abandon(self.session).await;
                return Err(e);
            }
        };
        if let Some(reason) = &result.failed {
            abandon(self.session).await;
            return Err(Error::CommitFailure {
                step,
                output: format!("{}: {}", reason, result.result),
            });
        }
        if result.has_error() {
            abandon(self.session).await;
            return Err(Error::CommitFailure {
                step,
                output: result.result,
            });
        }
        Ok(result)
    }
}

/// Pushes and resets configuration, one fresh CLI session per call
pub struct ConfigTransactionManager {
    transport: Arc<dyn CommandTransport>,
    timeouts: Timeouts,
    candidate_name: Option<String>,
}

impl ConfigTransactionManager {
    pub fn new(transport: Arc<dyn CommandTransport>, timeouts: Timeouts, candidate_name: Option<String>) -> Self {
        Self {
            transport,
            timeouts,
            candidate_name,
        }
    }

    fn candidate_name(&self) -> String {
        self.candidate_name
            .clone()
            .unwrap_or_else(|| format!("cptx_cfg_{}", Utc::now().format("%Y%m%d_%H%M%S")))
    }

    /// Merge `config` into the active configuration atomically
    pub async fn push(&self, target: &DeviceIdentity, config: &str) -> Result<()> {
        tracing::info!("{} - pushing config", target.name());

        if config.trim().is_empty() {
            tracing::info!("{} - empty config! not pushing", target.name());
            return Ok(());
        }
        tracing::debug!("{}", config);

        let mut session = CliSession::open(self.transport.as_ref(), target, self.timeouts.operation).await?;
        let result = self.push_on(&mut session, config).await;
        session.close().await;
        result?;

        tracing::info!("{} - finished config push", target.name());
        Ok(())
    }

    async fn push_on(&self, session: &mut CliSession, config: &str) -> Result<()> {
        let mut txn = ConfigTransaction::prepare(session, self.candidate_name()).await?;
        txn.load(config, LoadMode::Merge).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Override the configuration with the factory file, then restore the gRPC service
    pub async fn reset(&self, target: &DeviceIdentity) -> Result<()> {
        tracing::info!("{} - resetting config", target.name());

        let mut session = CliSession::open(self.transport.as_ref(), target, self.timeouts.operation).await?;
        let result = reset_on(&mut session).await;
        session.close().await;
        result?;

        tracing::info!("{} - finished resetting config", target.name());
        Ok(())
    }
}

async fn reset_on(session: &mut CliSession) -> Result<()> {
    let name = session.target().name().to_string();
    let multi = apply_config_batch(session, &junos::factory_reset_config()).await?;
    tracing::debug!("{} - factory config loaded: {}", name, multi.joined_result());

    // The factory config has no gRPC service block
    let multi = apply_config_batch(session, &junos::grpc_config()).await?;
    tracing::debug!("{} - gRPC config applied: {}", name, multi.joined_result());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeDevice;
    use crate::transport::{scripted, KubectlExecTransport};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const PUSHED: &str = "set interfaces ge-0/0/0 unit 0 family inet address 1.1.1.1/30";

    fn target() -> DeviceIdentity {
        DeviceIdentity::new("r1", "lab")
    }

    fn manager(device: &FakeDevice) -> ConfigTransactionManager {
        let timeouts = Timeouts {
            operation: Duration::from_secs(1),
            ..Default::default()
        };
        ConfigTransactionManager::new(Arc::new(device.clone()), timeouts, Some("cptx_cfg_testing".to_string()))
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(PUSHED), ConfigFormat::Set);
        assert_eq!(detect_format("# comment\nset system host-name r1\ndelete interfaces ge-0/0/1\n"), ConfigFormat::Set);
        assert_eq!(detect_format("system {\n    host-name r1;\n}\n"), ConfigFormat::Text);
        assert_eq!(detect_format(""), ConfigFormat::Text);
    }

    #[test]
    fn test_load_command() {
        assert_eq!(load_command(LoadMode::Merge, ConfigFormat::Set), "load set terminal");
        assert_eq!(load_command(LoadMode::Merge, ConfigFormat::Text), "load merge terminal");
        assert_eq!(load_command(LoadMode::Override, ConfigFormat::Set), "load override terminal");
    }

    #[tokio::test]
    async fn test_push_empty_config_opens_no_session() {
        let device = FakeDevice::new();
        assert_ok!(manager(&device).push(&target(), "").await);
        assert_ok!(manager(&device).push(&target(), "  \n").await);
        assert_eq!(device.state().opens, 0);
    }

    #[tokio::test]
    async fn test_push_prepare_load_commit_in_order() {
        let device = FakeDevice::new().with_active(&["set system host-name r1"]);
        assert_ok!(manager(&device).push(&target(), PUSHED).await);

        let state = device.state();
        assert_eq!(state.opens, 1);
        assert_eq!(state.closes, 1);
        assert_eq!(state.active, vec!["set system host-name r1".to_string(), PUSHED.to_string()]);
        drop(state);

        let commands = device.commands();
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[0], "configure");
        assert_eq!(commands[1], "rollback 0");
        assert_eq!(commands[2], format!("load set terminal\n{}\n\u{4}", PUSHED));
        assert_eq!(commands[3], "commit comment \"cptx_cfg_testing\"");
        assert_eq!(commands[4], "exit configuration-mode");
    }

    #[tokio::test]
    async fn test_push_text_config_uses_load_merge() {
        let device = FakeDevice::new();
        assert_ok!(manager(&device).push(&target(), "system {\n    host-name r9;\n}\n").await);
        assert!(device.commands()[2].starts_with("load merge terminal\n"));
    }

    #[tokio::test]
    async fn test_push_load_rejected_never_commits() {
        let device = FakeDevice::new()
            .with_active(&["set system host-name old"])
            .fail_on("load set terminal", "syntax error");

        let err = assert_err!(manager(&device).push(&target(), PUSHED).await);
        assert!(matches!(err, Error::CommitFailure { step: TxnStep::Load, .. }));

        let commands = device.commands();
        assert!(!commands.iter().any(|c| c.starts_with("commit")));
        assert_eq!(&commands[3..], &["rollback 0".to_string(), "exit configuration-mode".to_string()]);
        let state = device.state();
        assert_eq!(state.active, vec!["set system host-name old".to_string()]);
        assert_eq!(state.closes, 1);
    }

    #[tokio::test]
    async fn test_push_commit_failure_preserves_active_config() {
        let device = FakeDevice::new()
            .with_active(&["set system host-name old"])
            .reply_on("commit", "error: configuration check-out failed");

        let err = assert_err!(manager(&device).push(&target(), PUSHED).await);
        assert!(matches!(err, Error::CommitFailure { step: TxnStep::Commit, .. }));

        let state = device.state();
        assert_eq!(state.active, vec!["set system host-name old".to_string()]);
        // candidate was rolled back to the active configuration
        assert_eq!(state.candidate, Some(vec!["set system host-name old".to_string()]));
        assert_eq!(state.sent.iter().filter(|c| c.starts_with("commit")).count(), 1);
        assert_eq!(state.closes, 1);
    }

    #[tokio::test]
    async fn test_push_commit_rejected_by_channel() {
        let device = FakeDevice::new()
            .with_active(&["set system host-name old"])
            .fail_on("commit", "syntax error");

        let err = assert_err!(manager(&device).push(&target(), PUSHED).await);
        assert!(matches!(err, Error::CommitFailure { step: TxnStep::Commit, .. }));

        let state = device.state();
        assert_eq!(state.active, vec!["set system host-name old".to_string()]);
        assert_eq!(state.candidate, Some(vec!["set system host-name old".to_string()]));
        assert_eq!(state.closes, 1);
    }

    #[tokio::test]
    async fn test_push_exit_failure_after_commit_is_ok() {
        let device = FakeDevice::new()
            .with_active(&["set system host-name r1"])
            .fail_on("exit configuration-mode", "unknown command");

        assert_ok!(manager(&device).push(&target(), PUSHED).await);
        let state = device.state();
        assert_eq!(state.active, vec!["set system host-name r1".to_string(), PUSHED.to_string()]);
        assert_eq!(state.closes, 1);
    }

    #[tokio::test]
    async fn test_push_through_kubectl_reports_rejected_commit() {
        let kubectl = scripted::junos_cli("error: configuration check-out failed");
        let m = ConfigTransactionManager::new(
            Arc::new(KubectlExecTransport::new(kubectl.to_string_lossy(), "cli -c", Duration::from_secs(10))),
            Timeouts {
                operation: Duration::from_secs(5),
                ..Default::default()
            },
            Some("cptx_cfg_testing".to_string()),
        );

        let err = assert_err!(m.push(&target(), "set system host-name r2").await);
        match err {
            Error::CommitFailure { step, output } => {
                assert_eq!(step, TxnStep::Commit);
                assert!(output.contains("configuration check-out failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_push_through_kubectl_with_error_looking_config() {
        let kubectl = scripted::junos_cli("commit complete");
        let m = ConfigTransactionManager::new(
            Arc::new(KubectlExecTransport::new(kubectl.to_string_lossy(), "cli -c", Duration::from_secs(10))),
            Timeouts {
                operation: Duration::from_secs(5),
                ..Default::default()
            },
            Some("cptx_cfg_testing".to_string()),
        );

        let config = "set system login message \"syntax error: contact noc\"\nset interfaces et-0/0/0 description \"error: see ticket\"";
        assert_ok!(m.push(&target(), config).await);
    }

    #[tokio::test]
    async fn test_abandoned_transaction_leaves_active_config() {
        let device = FakeDevice::new().with_active(&["set system host-name old"]);
        let mut session = CliSession::open(&device, &target(), Duration::from_secs(1)).await.unwrap();

        let mut txn = ConfigTransaction::prepare(&mut session, "scratch").await.unwrap();
        assert_eq!(txn.name(), "scratch");
        assert_ok!(txn.load("set system host-name new", LoadMode::Merge).await);
        txn.abandon().await;
        session.close().await;

        let state = device.state();
        assert_eq!(state.active, vec!["set system host-name old".to_string()]);
        assert_eq!(state.candidate, Some(vec!["set system host-name old".to_string()]));
    }

    #[tokio::test]
    async fn test_push_connect_error() {
        let device = FakeDevice::new();
        device.state().spawn_error = true;
        let err = assert_err!(manager(&device).push(&target(), PUSHED).await);
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[tokio::test]
    async fn test_reset_applies_factory_then_grpc() {
        let device = FakeDevice::new().with_active(&["set system host-name custom"]);
        assert_ok!(manager(&device).reset(&target()).await);

        let commands = device.commands();
        assert_eq!(commands[0], "configure");
        assert_eq!(commands[1], "load override /var/vmguest/config/juniper.conf");
        assert_eq!(commands[2], "commit");
        assert_eq!(commands[3], "exit configuration-mode");
        assert_eq!(commands[4], "configure");
        assert_eq!(&commands[5..14], junos::grpc_config().as_slice());
        assert_eq!(commands[14], "exit configuration-mode");

        let state = device.state();
        assert_eq!(state.active[0], "system host-name factory");
        assert_eq!(state.active.len(), 9);
        assert_eq!((state.opens, state.closes), (1, 1));
    }

    #[tokio::test]
    async fn test_reset_twice_is_idempotent() {
        let device = FakeDevice::new().with_active(&["set system host-name custom"]);
        assert_ok!(manager(&device).reset(&target()).await);
        let once = device.state().active.clone();
        assert_ok!(manager(&device).reset(&target()).await);
        assert_eq!(device.state().active, once);
    }

    #[tokio::test]
    async fn test_reset_error_text_is_terminal() {
        let device = FakeDevice::new()
            .with_active(&["set system host-name custom"])
            .reply_on("load override", "error: could not open configuration file");

        let err = assert_err!(manager(&device).reset(&target()).await);
        assert!(matches!(err, Error::CommitFailure { step: TxnStep::Load, .. }));

        let commands = device.commands();
        assert!(!commands.contains(&"commit".to_string()));
        assert!(!commands.iter().any(|c| c.contains("grpc")));
        assert_eq!(device.state().active, vec!["set system host-name custom".to_string()]);
        assert_eq!(device.state().closes, 1);
    }

    #[tokio::test]
    async fn test_reset_grpc_failure_is_terminal() {
        let device = FakeDevice::new().fail_on(
            "set system services extension-service request-response grpc ssl use-pki",
            "syntax error",
        );

        let err = assert_err!(manager(&device).reset(&target()).await);
        match err {
            Error::TransportCommandFailure { command, .. } => assert!(command.ends_with("use-pki")),
            other => panic!("unexpected error: {other}"),
        }
        // nothing after the rejected statement was sent besides the rollback
        let commands = device.commands();
        let rejected = commands.iter().position(|c| c.ends_with("use-pki")).unwrap();
        assert_eq!(&commands[rejected + 1..], &["rollback 0".to_string(), "exit configuration-mode".to_string()]);
    }
}
