//! External command execution with an enforced timeout.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A program invocation. Environment values are never logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program and arguments joined for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs a command and returns its stdout.
pub trait CommandRunner {
    fn run(&mut self, cmd: &CommandSpec, timeout: Duration) -> Result<String>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for Box<T> {
    fn run(&mut self, cmd: &CommandSpec, timeout: Duration) -> Result<String> {
        (**self).run(cmd, timeout)
    }
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_string(&mut buf);
        }
        buf
    })
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, cmd: &CommandSpec, timeout: Duration) -> Result<String> {
        tracing::trace!(command = %cmd.display(), "spawn");
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HwError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        // Read both pipes concurrently so a chatty child cannot fill one and block.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_with_timeout(&mut child, timeout, POLL_INTERVAL).map_err(|e| match e {
            HwError::Timeout { timeout_ms, .. } => HwError::Timeout {
                program: cmd.program.clone(),
                timeout_ms,
            },
            other => other,
        })?;

        let out = stdout.join().unwrap_or_default();
        let err = stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(HwError::CommandFailed {
                program: cmd.program.clone(),
                status: status.to_string(),
                stderr: err.trim().to_owned(),
            });
        }
        Ok(out)
    }
}

/// Poll `child` until it exits or `timeout` passes. On expiry the child is
/// killed and reaped, and `HwError::Timeout` is returned.
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HwError::Timeout {
                program: String::new(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }
        thread::sleep(poll_interval);
    }
}
