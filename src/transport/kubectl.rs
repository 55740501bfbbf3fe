use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, Winsize};
use regex_lite::Regex;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::process::Stdio;
use tokio::io::unix::AsyncFd;
use tokio::process::{Child, Command};
use tokio::time::{timeout_at, Duration, Instant};

use super::{Channel, ChannelResponse, CommandTransport};
use crate::error::{Error, Result};
use crate::models::DeviceIdentity;

/// Junos operational (`>`) and configuration (`#`) prompts, e.g. `root@r1> `
const PROMPT_PATTERN: &str = r"^(\{\w+(:\w+)?\}\s*)?[\w\-@()/:.]{1,63}[>#%]\s?$";

/// How long to wait for the login banner's prompt before nudging the CLI with a newline
const NUDGE_AFTER: Duration = Duration::from_secs(2);

/// Output must stay quiet this long before the startup chatter counts as drained
const SETTLE_QUIET: Duration = Duration::from_millis(200);

/// Matches `set cli screen-width 511` so long statements never wrap
const PTY_SIZE: Winsize = Winsize {
    ws_row: 24,
    ws_col: 511,
    ws_xpixel: 0,
    ws_ypixel: 0,
};

/// Opens CLI channels with `kubectl exec -it` into the node's pod.
///
/// kubectl only allocates a remote TTY when its own stdin is a terminal, so
/// the child is attached to a local pseudo-terminal.
pub struct KubectlExecTransport {
    kubectl: String,
    cli_command: String,
    connect_timeout: Duration,
}

impl KubectlExecTransport {
    pub fn new(kubectl: impl Into<String>, cli_command: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            kubectl: kubectl.into(),
            cli_command: cli_command.into(),
            connect_timeout,
        }
    }

    fn exec_args(&self, target: &DeviceIdentity) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-i".to_string(),
            "-t".to_string(),
            "-n".to_string(),
            target.namespace().to_string(),
            target.name().to_string(),
            "--".to_string(),
        ];
        args.extend(self.cli_command.split_whitespace().map(str::to_string));
        args
    }
}

/// Open a pty pair; the controller side is non-blocking for use with `AsyncFd`
fn open_pty() -> io::Result<(File, File)> {
    let pty = openpty(&PTY_SIZE, None)?;
    let flags = fcntl(pty.master.as_raw_fd(), FcntlArg::F_GETFL)?;
    fcntl(
        pty.master.as_raw_fd(),
        FcntlArg::F_SETFL(OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK),
    )?;
    Ok((File::from(pty.master), File::from(pty.slave)))
}

#[async_trait]
impl CommandTransport for KubectlExecTransport {
    async fn spawn(&self, target: &DeviceIdentity) -> Result<Box<dyn Channel>> {
        let connect_err = |reason: String| Error::Connect {
            target: target.to_string(),
            reason,
        };

        let args = self.exec_args(target);
        tracing::debug!("{} - spawning {} {}", target.name(), self.kubectl, args.join(" "));

        let (master, slave) = open_pty().map_err(|e| connect_err(format!("failed to open pty: {}", e)))?;
        let slave_in = slave
            .try_clone()
            .map_err(|e| connect_err(format!("failed to open pty: {}", e)))?;

        // The Command (and with it the parent's copies of the pty's terminal
        // side) is dropped at the end of this statement
        let child = Command::new(&self.kubectl)
            .args(&args)
            .stdin(Stdio::from(slave_in))
            .stdout(Stdio::from(slave))
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| connect_err(format!("failed to spawn {}: {}", self.kubectl, e)))?;

        let pty = AsyncFd::new(master).map_err(|e| connect_err(format!("failed to register pty: {}", e)))?;
        let prompt = Regex::new(PROMPT_PATTERN).map_err(|e| connect_err(format!("bad prompt pattern: {}", e)))?;

        let mut channel = KubectlChannel {
            child,
            pty,
            prompt,
            buf: Vec::new(),
            closed: false,
        };

        if let Err(e) = channel.settle(self.connect_timeout).await {
            channel.close().await.ok();
            return Err(connect_err(format!("no CLI prompt: {}", e)));
        }

        Ok(Box::new(channel))
    }
}

struct KubectlChannel {
    child: Child,
    pty: AsyncFd<File>,
    prompt: Regex,
    buf: Vec<u8>,
    closed: bool,
}

fn timed_out(timeout: Duration) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("timed out after {:?} waiting for prompt", timeout),
    ))
}

fn closed_output() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "CLI process closed its output",
    ))
}

impl KubectlChannel {
    async fn read_some(&self, chunk: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.pty.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(chunk)) {
                // Linux reports EIO once the terminal side has no process left
                Ok(Err(e)) if e.raw_os_error() == Some(Errno::EIO as i32) => return Ok(0),
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.pty.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(data)) {
                Ok(Ok(n)) => data = &data[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Wait for the login banner's prompt, nudging once if it is slow, then
    /// discard everything the CLI prints until it goes quiet. Any prompt left
    /// unread here would shift every later reply by one command.
    async fn settle(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let nudge_at = Instant::now() + NUDGE_AFTER.min(timeout);

        match self.read_until_prompt(nudge_at, timeout).await {
            Ok(_) => {}
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::TimedOut => {
                tracing::debug!("no prompt after {:?}, nudging CLI", NUDGE_AFTER);
                self.write_all(b"\n").await?;
                self.read_until_prompt(deadline, timeout).await?;
            }
            Err(e) => return Err(e),
        }

        let mut chunk = [0u8; 4096];
        loop {
            let quiet_until = (Instant::now() + SETTLE_QUIET).min(deadline);
            match timeout_at(quiet_until, self.read_some(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) => return Err(closed_output()),
                Ok(Ok(n)) => tracing::trace!("discarding startup output: {:?}", String::from_utf8_lossy(&chunk[..n])),
                Ok(Err(e)) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(timed_out(timeout));
            }
        }
        self.buf.clear();
        Ok(())
    }

    /// Read until the last line of the buffer is a prompt; returns everything before it
    async fn read_until_prompt(&mut self, deadline: Instant, timeout: Duration) -> Result<String> {
        let mut chunk = [0u8; 4096];

        loop {
            if let Some(idx) = self.prompt_start() {
                // Decode only complete output so multi-byte characters split across reads survive
                let output = String::from_utf8_lossy(&self.buf[..idx]).replace('\r', "");
                self.buf.clear();
                return Ok(output);
            }

            let n = match timeout_at(deadline, self.read_some(&mut chunk)).await {
                Ok(read) => read?,
                Err(_) => return Err(timed_out(timeout)),
            };
            if n == 0 {
                return Err(closed_output());
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn prompt_start(&self) -> Option<usize> {
        let start = self.buf.iter().rposition(|&b| b == b'\n').map(|i| i + 1).unwrap_or(0);
        let last = String::from_utf8_lossy(&self.buf[start..]);
        let last = last.trim_start_matches('\r');
        if !last.is_empty() && self.prompt.is_match(last) {
            Some(start)
        } else {
            None
        }
    }
}

/// Drop every echoed input line. Echoes are matched in input order, so the
/// body of a `load ... terminal` payload is removed along with the command.
fn strip_echo(output: &str, input: &str) -> String {
    let mut pending = input
        .lines()
        .map(|l| l.trim_matches(|c: char| c == '\u{4}' || c.is_whitespace()))
        .filter(|l| !l.is_empty())
        .peekable();

    let kept: Vec<&str> = output
        .lines()
        .filter(|line| match pending.peek() {
            Some(echo) if line.trim().ends_with(echo) => {
                pending.next();
                false
            }
            _ => true,
        })
        .collect();
    kept.join("\n").trim().to_string()
}

#[async_trait]
impl Channel for KubectlChannel {
    fn is_alive(&mut self) -> bool {
        !self.closed && matches!(self.child.try_wait(), Ok(None))
    }

    async fn send(&mut self, input: &str, timeout: Duration) -> Result<ChannelResponse> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::with_capacity(input.len() + 1);
        line.extend_from_slice(input.as_bytes());
        line.push(b'\n');
        self.write_all(&line).await?;

        let raw = self.read_until_prompt(deadline, timeout).await?;
        Ok(ChannelResponse::from_output(strip_echo(&raw, input)))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.child.start_kill() {
            tracing::debug!("CLI process already gone: {}", e);
        }
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("CLI process exited: {}", status),
            Ok(Err(e)) => tracing::warn!("Failed to reap CLI process: {}", e),
            Err(_) => tracing::warn!("CLI process did not exit after kill"),
        }
        Ok(())
    }
}
