pub mod dispatcher;
pub mod event;
pub mod logging;
pub mod monitor;
pub mod probes;
pub mod settings;

use anyhow::{Context, Result};
use log::info;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::dispatcher::Dispatcher;
use crate::event::EventSink;
use crate::monitor::Registry;
use crate::probes::ProbeFactory;
use crate::settings::Settings;

/// Wires commands to monitors and monitors to the event stream.
///
/// Must be created inside a tokio runtime; the event writer task is spawned
/// immediately.
pub struct IoCheckEngine {
    sink: EventSink,
    dispatcher: Dispatcher,
}

impl IoCheckEngine {
    pub fn new<W>(settings: &Settings, events: W, probes: ProbeFactory) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let sink = EventSink::spawn(
            events,
            settings.event_queue_size,
            settings.event_send_timeout(),
        );
        let registry = Registry::new(sink.clone());
        let dispatcher = Dispatcher::new(registry, probes);

        Self {
            sink,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Registry {
        self.dispatcher.registry()
    }

    /// Serve commands until EOF, then flush the events queued so far.
    ///
    /// Running monitors are not stopped; the caller decides whether to
    /// exit or keep them alive.
    pub async fn run<R>(&self, commands: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.dispatcher.run(commands).await?;

        info!(
            "commands closed with {} active monitors",
            self.registry().len()
        );
        self.sink
            .flush()
            .await
            .context("Failed to flush pending events")?;
        Ok(())
    }
}
