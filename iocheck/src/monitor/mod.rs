//! Path monitors and the registry that owns them.
//!
//! The registry maps each path to the handle of its running monitor. All
//! reads and writes of the map happen under one lock, and the lock is never
//! held across I/O: events are queued only after it is released.

mod runner;
pub mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::event::{Errno, Event, EventSink};
use crate::probes::Probe;
use runner::Monitor;

pub use state::{Action, Input, State};

/// Shortest accepted check interval, in seconds
pub const MIN_CHECK_INTERVAL: u64 = 1;

/// Longest accepted check interval, in seconds
pub const MAX_CHECK_INTERVAL: u64 = 3600;

struct MonitorHandle {
    id: u64,
    stop_tx: mpsc::UnboundedSender<()>,
}

struct RegistryInner {
    monitors: Mutex<HashMap<String, MonitorHandle>>,
    next_id: AtomicU64,
    sink: EventSink,
}

/// Shared path → monitor map.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(sink: EventSink) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                monitors: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sink,
            }),
        }
    }

    pub fn sink(&self) -> &EventSink {
        &self.inner.sink
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MonitorHandle>> {
        self.inner.monitors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start monitoring `path`, or reply EEXIST if it is already monitored.
    ///
    /// Returns once the monitor has queued its `started` event.
    pub async fn start(&self, path: &str, interval: Duration, probe: Box<dyn Probe>) {
        let started = {
            let mut monitors = self.lock();
            if monitors.contains_key(path) {
                None
            } else {
                info!(
                    "start monitoring path {:?} (interval={})",
                    path,
                    interval.as_secs()
                );
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let (stop_tx, stop_rx) = mpsc::unbounded_channel();
                let (started_tx, started_rx) = oneshot::channel();
                let monitor = Monitor::new(
                    id,
                    path.to_string(),
                    interval,
                    probe,
                    stop_rx,
                    started_tx,
                    self.clone(),
                );
                monitors.insert(path.to_string(), MonitorHandle { id, stop_tx });
                tokio::spawn(monitor.run());
                Some(started_rx)
            }
        };

        match started {
            Some(started_rx) => {
                let _ = started_rx.await;
            }
            None => {
                warn!("already monitoring path {:?}", path);
                self.sink()
                    .send(Event::new(
                        "start",
                        path,
                        Errno::EEXIST,
                        "already monitoring path",
                    ))
                    .await;
            }
        }
    }

    /// Ask the monitor of `path` to stop, or reply ENOENT if there is none.
    ///
    /// The monitor removes itself once its in-flight read, if any, completes.
    pub async fn stop(&self, path: &str) {
        let delivered = {
            let mut monitors = self.lock();
            match monitors.get(path) {
                Some(handle) if handle.stop_tx.send(()).is_ok() => {
                    info!("stop monitoring path {:?}", path);
                    true
                }
                Some(_) => {
                    // The monitor task died without cleaning up
                    warn!("dropping stale monitor for {:?}", path);
                    monitors.remove(path);
                    false
                }
                None => false,
            }
        };

        if !delivered {
            warn!("not monitoring path {:?}", path);
            self.sink()
                .send(Event::new("stop", path, Errno::ENOENT, "not monitoring path"))
                .await;
        }
    }

    /// Remove the entry for `path` if it still belongs to monitor `id`.
    pub(crate) fn remove(&self, path: &str, id: u64) -> bool {
        let mut monitors = self.lock();
        match monitors.get(path) {
            Some(handle) if handle.id == id => {
                monitors.remove(path);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
