//! In-memory Junos device used by the unit tests.
//!
//! It tracks a shared candidate and an active configuration so tests can
//! assert on what was committed, and records every input it was sent.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Channel, ChannelResponse, CommandTransport};
use crate::error::{Error, Result};
use crate::models::DeviceIdentity;

#[derive(Debug, Default)]
pub struct DeviceState {
    pub opens: usize,
    pub closes: usize,
    pub sent: Vec<String>,
    pub active: Vec<String>,
    pub candidate: Option<Vec<String>>,
    pub factory: Vec<String>,
    /// Remaining PKI polls that answer with `error:`
    pub pki_not_ready: usize,
    pub pki_attempts: usize,
    pub spawn_error: bool,
    pub dead_on_spawn: bool,
    /// Inputs starting with the prefix are rejected at the channel level
    pub fail_on: Vec<(String, String)>,
    /// Inputs starting with the prefix answer with the given text
    pub reply_on: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let device = Self::default();
        device.state().factory = vec!["system host-name factory".to_string()];
        device
    }

    pub fn with_active(self, lines: &[&str]) -> Self {
        self.state().active = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn fail_on(self, prefix: &str, reason: &str) -> Self {
        self.state().fail_on.push((prefix.to_string(), reason.to_string()));
        self
    }

    pub fn reply_on(self, prefix: &str, text: &str) -> Self {
        self.state().reply_on.push((prefix.to_string(), text.to_string()));
        self
    }

    pub fn pki_ready_after(self, polls: usize) -> Self {
        self.state().pki_not_ready = polls;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    /// Inputs sent after session setup, with paging commands filtered out
    pub fn commands(&self) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .filter(|c| !c.starts_with("set cli "))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandTransport for FakeDevice {
    async fn spawn(&self, target: &DeviceIdentity) -> Result<Box<dyn Channel>> {
        let mut state = self.state();
        if state.spawn_error {
            return Err(Error::Connect {
                target: target.to_string(),
                reason: "pod not found".to_string(),
            });
        }
        state.opens += 1;
        Ok(Box::new(FakeChannel {
            device: self.clone(),
            alive: !state.dead_on_spawn,
            in_config: false,
            closed: false,
        }))
    }
}

struct FakeChannel {
    device: FakeDevice,
    alive: bool,
    in_config: bool,
    closed: bool,
}

fn config_only(input: &str) -> bool {
    ["set ", "load ", "commit", "rollback", "exit configuration-mode"]
        .iter()
        .any(|p| input.starts_with(p))
}

impl FakeChannel {
    fn respond(&mut self, state: &mut DeviceState, input: &str) -> ChannelResponse {
        if let Some((_, reason)) = state.fail_on.iter().find(|(p, _)| input.starts_with(p.as_str())) {
            return ChannelResponse {
                output: format!("{}.", reason),
                failed: Some(reason.clone()),
            };
        }
        if let Some((_, text)) = state.reply_on.iter().find(|(p, _)| input.starts_with(p.as_str())) {
            return ChannelResponse::from_output(text.clone());
        }
        if input.starts_with("set cli ") {
            return ChannelResponse::from_output("Screen length set to 0".to_string());
        }
        if !self.in_config && config_only(input) {
            return ChannelResponse::from_output("unknown command.".to_string());
        }

        let active = state.active.clone();
        let output = if input == "configure" {
            self.in_config = true;
            state.candidate.get_or_insert(active);
            "Entering configuration mode".to_string()
        } else if input == "rollback 0" {
            state.candidate = Some(active);
            "load complete".to_string()
        } else if input.starts_with("load merge terminal") || input.starts_with("load set terminal") {
            let body: Vec<String> = input
                .lines()
                .skip(1)
                .filter(|l| !l.trim().is_empty() && *l != "\u{4}")
                .map(str::to_string)
                .collect();
            state.candidate.get_or_insert(active).extend(body);
            "load complete".to_string()
        } else if input.starts_with("load override ") {
            state.candidate = Some(state.factory.clone());
            "load complete".to_string()
        } else if input.starts_with("set ") {
            state.candidate.get_or_insert(active).push(input.to_string());
            String::new()
        } else if input.starts_with("commit") {
            if let Some(candidate) = state.candidate.clone() {
                state.active = candidate;
            }
            "commit complete".to_string()
        } else if input == "exit configuration-mode" {
            self.in_config = false;
            "Exiting configuration mode".to_string()
        } else if input.starts_with("request security pki generate-key-pair") {
            if state.pki_not_ready > 0 {
                "error: PKI daemon is not running".to_string()
            } else {
                "Generated key pair grpc-server-cert, key size 2048 bits".to_string()
            }
        } else if input.starts_with("request security pki local-certificate generate-self-signed") {
            state.pki_attempts += 1;
            if state.pki_not_ready > 0 {
                state.pki_not_ready -= 1;
                "error: Failed to generate self-signed certificate".to_string()
            } else {
                "Self-signed certificate generated and loaded successfully".to_string()
            }
        } else {
            String::new()
        };
        ChannelResponse::from_output(output)
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn is_alive(&mut self) -> bool {
        self.alive && !self.closed
    }

    async fn send(&mut self, input: &str, _timeout: Duration) -> Result<ChannelResponse> {
        let device = self.device.clone();
        let mut state = device.state();
        state.sent.push(input.to_string());
        Ok(self.respond(&mut state, input))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.device.state().closes += 1;
        }
        Ok(())
    }
}
