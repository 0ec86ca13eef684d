//! Event protocol and the single writer that owns stdout.
//!
//! Every parent-visible outcome is exactly one line:
//!
//! ```text
//! <name> <path> <errno> <data>
//! ```
//!
//! Lines are queued in a bounded FIFO and written by one task. A parent that
//! stops reading fills the queue, and `send` terminates the process once the
//! queue has been full for the configured timeout.

use std::fmt;
use std::io;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::oneshot;

/// Event queue capacity
pub const DEFAULT_QUEUE_SIZE: usize = 128;

/// How long `send` waits for room in a full queue
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// POSIX error number carried in the third field of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const SUCCESS: Errno = Errno(0);
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    pub const EIO: Errno = Errno(libc::EIO);
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    pub const EINPROGRESS: Errno = Errno(libc::EINPROGRESS);

    /// Extract the OS error number, falling back to EIO when the error
    /// does not carry one.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) if code > 0 => Errno(code),
            _ => Errno::EIO,
        }
    }

    /// OS description of the error, e.g. "No such file or directory".
    pub fn description(self) -> String {
        let text = io::Error::from_raw_os_error(self.0).to_string();
        match text.find(" (os error") {
            Some(idx) => text[..idx].to_string(),
            None => text,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub path: String,
    pub errno: Errno,
    pub data: String,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        errno: Errno,
        data: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            errno,
            data: data.into(),
        }
    }

    pub fn success(name: impl Into<String>, path: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(name, path, Errno::SUCCESS, data)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // One event, one line
        let data = self.data.replace(['\n', '\r'], " ");
        write!(f, "{} {} {} {}", self.name, self.path, self.errno, data)
    }
}

enum Message {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the event queue.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Message>,
    send_timeout: Duration,
}

impl EventSink {
    /// Start the writer task and return a handle to its queue.
    ///
    /// A write error terminates the process; events have no value once the
    /// parent can no longer read them.
    pub fn spawn<W>(writer: W, queue_size: usize, send_timeout: Duration) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_size.max(1));

        tokio::spawn(async move {
            if let Err(e) = write_events(writer, rx).await {
                error!("{:#}, terminating", e);
                std::process::exit(1);
            }
        });

        Self { tx, send_timeout }
    }

    /// Queue an event, terminating the process if the queue stays full.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.submit(event).await {
            error!("{:#}, terminating", e);
            std::process::exit(1);
        }
    }

    /// Queue an event, returning an error instead of terminating.
    pub async fn submit(&self, event: Event) -> Result<()> {
        let line = event.to_string();
        debug!("sending event {:?}", line);

        match self
            .tx
            .send_timeout(Message::Line(line), self.send_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => bail!("timeout sending event"),
            Err(SendTimeoutError::Closed(_)) => bail!("event writer is gone"),
        }
    }

    /// Wait until every event queued before this call has been written.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send_timeout(Message::Flush(done_tx), self.send_timeout)
            .await
            .map_err(|_| anyhow!("timeout flushing events"))?;
        done_rx.await.context("event writer is gone")
    }
}

async fn write_events<W>(mut writer: W, mut rx: mpsc::Receiver<Message>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        match message {
            Message::Line(line) => {
                debug!("writing event {:?}", line);
                let mut buf = line.into_bytes();
                buf.push(b'\n');
                // May block without limit if the parent is not reading;
                // `send` bounds that with its timeout.
                writer
                    .write_all(&buf)
                    .await
                    .context("cannot write to stdout")?;
                writer.flush().await.context("cannot flush stdout")?;
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn test_event_display() {
        let event = Event::new("start", "/dev/null", Errno::EEXIST, "already monitoring path");
        assert_eq!(
            event.to_string(),
            format!("start /dev/null {} already monitoring path", libc::EEXIST)
        );
    }

    #[test]
    fn test_event_display_strips_newlines() {
        let event = Event::success("check", "/p", "line one\nline two");
        assert_eq!(event.to_string(), "check /p 0 line one line two");
    }

    #[test]
    fn test_errno_from_io_error() {
        let err = io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(Errno::from_io_error(&err), Errno::ENOENT);

        // No OS error number to recover
        let err = io::Error::new(io::ErrorKind::Other, "short read");
        assert_eq!(Errno::from_io_error(&err), Errno::EIO);
    }

    #[test]
    fn test_errno_description() {
        let text = Errno::ENOENT.description();
        assert!(!text.is_empty());
        assert!(!text.contains("os error"));
        assert!(!text.contains('\n'));
    }

    #[tokio::test]
    async fn test_sink_preserves_order() {
        let (writer, reader) = tokio::io::duplex(4096);
        let sink = EventSink::spawn(writer, DEFAULT_QUEUE_SIZE, DEFAULT_SEND_TIMEOUT);

        for i in 0..10 {
            sink.send(Event::success("check", format!("/p{}", i), "0.000100"))
                .await;
        }
        sink.flush().await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        for i in 0..10 {
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(line, format!("check /p{} 0 0.000100", i));
        }
    }

    #[tokio::test]
    async fn test_submit_times_out_when_reader_stalls() {
        // Nobody reads the pipe: the writer blocks, then the queue fills.
        let (writer, _reader) = tokio::io::duplex(8);
        let sink = EventSink::spawn(writer, 1, Duration::from_millis(50));

        let mut timed_out = false;
        for _ in 0..10 {
            if sink
                .submit(Event::success("check", "/stalled", "0.000100"))
                .await
                .is_err()
            {
                timed_out = true;
                break;
            }
        }
        assert!(timed_out);
    }
}
