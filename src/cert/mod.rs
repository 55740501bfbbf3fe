use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::classify::MultiResponse;
use crate::config::Timeouts;
use crate::error::{Error, Result};
use crate::junos;
use crate::models::{CertSpec, DeviceIdentity};
use crate::readiness::InstanceReadinessWatcher;
use crate::session::CliSession;
use crate::transport::CommandTransport;
use crate::txn::apply_config_batch;

/// `Ok` once the PKI reported success; otherwise the infra is not ready yet
fn poll_verdict(multi: &MultiResponse) -> Result<()> {
    if multi.any_success() {
        Ok(())
    } else {
        Err(Error::InfrastructureNotReady {
            output: multi.joined_result(),
        })
    }
}

/// Generates a self-signed certificate on the node and enables gRPC with it
pub struct CertBootstrapper {
    transport: Arc<dyn CommandTransport>,
    watcher: Arc<dyn InstanceReadinessWatcher>,
    timeouts: Timeouts,
}

impl CertBootstrapper {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        watcher: Arc<dyn InstanceReadinessWatcher>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            transport,
            watcher,
            timeouts,
        }
    }

    pub async fn bootstrap(
        &self,
        target: &DeviceIdentity,
        cert: Option<&CertSpec>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(cert) = cert else {
            tracing::info!("{} - no cert config", target.name());
            return Ok(());
        };
        tracing::info!("{} - generating self signed certs", target.name());

        tracing::info!("{} - waiting for pod to be running", target.name());
        self.watcher.wait_running(target, cancel).await?;
        tracing::info!("{} - pod running.", target.name());

        let mut session = CliSession::open(self.transport.as_ref(), target, self.timeouts.operation).await?;
        let result = self.bootstrap_on(&mut session, cert, cancel).await;
        session.close().await;
        result?;

        tracing::info!("{} - finished cert generation", target.name());
        Ok(())
    }

    async fn bootstrap_on(&self, session: &mut CliSession, cert: &CertSpec, cancel: &CancellationToken) -> Result<()> {
        self.wait_cert_infra_ready(session, cert, cancel).await?;
        apply_config_batch(session, &junos::grpc_config()).await?;
        Ok(())
    }

    /// Poll the PKI until it generates the certificate, the deadline passes, or
    /// the caller cancels. Channel-level failures end the loop immediately.
    async fn wait_cert_infra_ready(
        &self,
        session: &mut CliSession,
        cert: &CertSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let commands = junos::cert_commands(&cert.certificate_id);
        let name = session.target().name().to_string();
        let poll = self.timeouts.cert_poll_interval;

        tracing::info!(
            "{} - waiting for certificates to be pushed (timeout: {:?})",
            name,
            self.timeouts.cert_deadline
        );
        let start = Instant::now();
        let deadline = start + self.timeouts.cert_deadline;

        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let multi = session.send_commands(&commands).await?;
            match poll_verdict(&multi) {
                Ok(()) => {
                    tracing::info!("{} - cert infra ready, configured certs. Response {}", name, multi.joined_result());
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    tracing::info!(
                        "{} - cert infra isn't ready. Retrying in {:?}. Response {}",
                        name,
                        poll,
                        multi.joined_result()
                    );
                }
                Err(e) => return Err(e),
            }

            let wait = poll.min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Err(Error::TimeoutExceeded {
            elapsed: start.elapsed(),
        })
    }
}
