use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::DeviceIdentity;

/// Phase reported by the pod once the node's containers are running
pub const RUNNING_PHASE: &str = "Running";

/// Blocks until a node's workload is running
#[async_trait]
pub trait InstanceReadinessWatcher: Send + Sync {
    /// Return once `target` is running, or `Error::Cancelled` once `cancel` fires
    async fn wait_running(&self, target: &DeviceIdentity, cancel: &CancellationToken) -> Result<()>;
}

/// Polls the pod phase with `kubectl get pod`
pub struct KubectlPodWatcher {
    kubectl: String,
    poll_interval: Duration,
}

impl KubectlPodWatcher {
    pub fn new(kubectl: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            kubectl: kubectl.into(),
            poll_interval,
        }
    }

    async fn pod_phase(&self, target: &DeviceIdentity) -> Result<Option<String>> {
        let output = Command::new(&self.kubectl)
            .args([
                "get",
                "pod",
                "-n",
                target.namespace(),
                target.name(),
                "-o",
                "jsonpath={.status.phase}",
            ])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Pod not created yet: keep waiting
            if stderr.contains("NotFound") {
                return Ok(None);
            }
            return Err(Error::Readiness(stderr.trim().to_string()));
        }
        Ok(parse_phase(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_phase(stdout: &str) -> Option<String> {
    let phase = stdout.trim().trim_matches('\'');
    if phase.is_empty() {
        None
    } else {
        Some(phase.to_string())
    }
}

#[async_trait]
impl InstanceReadinessWatcher for KubectlPodWatcher {
    async fn wait_running(&self, target: &DeviceIdentity, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.pod_phase(target).await? {
                Some(phase) if phase == RUNNING_PHASE => return Ok(()),
                Some(phase) => tracing::debug!("{} - pod phase {}", target.name(), phase),
                None => tracing::debug!("{} - pod not found yet", target.name()),
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
