//! Command intake.
//!
//! Commands arrive one per line:
//!
//! ```text
//! start <path> <interval>
//! stop <path>
//! ```
//!
//! Every malformed command is answered with exactly one EINVAL event.

use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::event::{Errno, Event};
use crate::monitor::{MAX_CHECK_INTERVAL, MIN_CHECK_INTERVAL, Registry};
use crate::probes::ProbeFactory;

/// Commands are split into at most this many fields; the last one keeps any
/// remaining text.
pub const MAX_COMMAND_ARGS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { path: String, interval: u64 },
    Stop { path: String },
}

/// A command that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub name: String,
    pub path: String,
    pub reason: &'static str,
}

impl Rejection {
    fn new(name: &str, path: &str, reason: &'static str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            reason,
        }
    }
}

impl From<Rejection> for Event {
    fn from(r: Rejection) -> Self {
        Event::new(r.name, r.path, Errno::EINVAL, r.reason)
    }
}

pub fn parse_command(line: &str) -> Result<Command, Rejection> {
    let args: Vec<&str> = line.splitn(MAX_COMMAND_ARGS, ' ').collect();
    let cmd = args[0];

    match cmd {
        "" => Err(Rejection::new("-", "-", "empty command")),
        "start" => {
            let path = *args
                .get(1)
                .ok_or_else(|| Rejection::new(cmd, "-", "path is required"))?;
            let interval = args
                .get(2)
                .ok_or_else(|| Rejection::new(cmd, path, "interval is required"))?;
            let interval: i64 = interval
                .parse()
                .map_err(|_| Rejection::new(cmd, path, "invalid interval"))?;
            if !(MIN_CHECK_INTERVAL as i64..=MAX_CHECK_INTERVAL as i64).contains(&interval) {
                return Err(Rejection::new(cmd, path, "interval out of range"));
            }
            Ok(Command::Start {
                path: path.to_string(),
                interval: interval as u64,
            })
        }
        "stop" => {
            let path = args
                .get(1)
                .ok_or_else(|| Rejection::new(cmd, "-", "path is required"))?;
            Ok(Command::Stop {
                path: path.to_string(),
            })
        }
        _ => Err(Rejection::new(cmd, "-", "unknown command")),
    }
}

pub struct Dispatcher {
    registry: Registry,
    probes: ProbeFactory,
}

impl Dispatcher {
    pub fn new(registry: Registry, probes: ProbeFactory) -> Self {
        Self { registry, probes }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatch commands until EOF.
    ///
    /// Monitors keep running after this returns.
    pub async fn run<R>(&self, mut reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .context("cannot read commands")?;
            if n == 0 {
                break;
            }
            let line = trim_line_end(&buf);
            self.dispatch(&line).await;
        }

        info!("end of commands");
        Ok(())
    }

    pub async fn dispatch(&self, line: &str) {
        debug!("received command {:?}", line);

        match parse_command(line) {
            Ok(Command::Start { path, interval }) => {
                let probe = (self.probes)();
                self.registry
                    .start(&path, Duration::from_secs(interval), probe)
                    .await;
            }
            Ok(Command::Stop { path }) => self.registry.stop(&path).await,
            Err(rejection) => {
                warn!("rejected command {:?}: {}", line, rejection.reason);
                self.registry.sink().send(rejection.into()).await;
            }
        }
    }
}

/// Strip the LF terminator and an optional CR before it.
fn trim_line_end(buf: &[u8]) -> Cow<'_, str> {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && buf[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&buf[..end])
}
