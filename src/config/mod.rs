use std::env;
use std::time::Duration;

/// Timeouts and poll intervals used by the CLI automation.
///
/// Passed by value into every component so tests can shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Per-command timeout; large because committing a big config is slow
    pub operation: Duration,
    /// Delay between PKI readiness polls
    pub cert_poll_interval: Duration,
    /// Hard deadline for the PKI readiness loop
    pub cert_deadline: Duration,
    /// Delay between pod phase checks
    pub readiness_poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operation: Duration::from_secs(300),
            cert_poll_interval: Duration::from_secs(30),
            cert_deadline: Duration::from_secs(600),
            readiness_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub kubectl_path: String,
    pub namespace: String,
    pub cli_command: String,
    pub candidate_name: Option<String>,
    pub timeouts: Timeouts,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        let defaults = Timeouts::default();
        Self {
            kubectl_path: get_env("KUBECTL_PATH", "kubectl"),
            namespace: get_env("KNE_NAMESPACE", "default"),
            cli_command: get_env("CPTX_CLI_COMMAND", "cli -c"),
            candidate_name: env::var("CANDIDATE_NAME").ok().filter(|s| !s.is_empty()),
            timeouts: Timeouts {
                operation: get_secs("OPERATION_TIMEOUT_SECS", defaults.operation),
                cert_poll_interval: get_secs("CERT_POLL_INTERVAL_SECS", defaults.cert_poll_interval),
                cert_deadline: get_secs("CERT_TIMEOUT_SECS", defaults.cert_deadline),
                readiness_poll_interval: get_secs("READINESS_POLL_SECS", defaults.readiness_poll_interval),
            },
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
