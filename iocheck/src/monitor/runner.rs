use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tokio::time::{self, MissedTickBehavior};

use super::Registry;
use super::state::{Action, Input, State};
use crate::event::{Errno, Event, EventSink};
use crate::probes::{Probe, format_delay};

/// Per-path scheduler.
///
/// Runs as its own task and waits on three sources: the ticker, completion
/// of the in-flight read, and stop requests. Reads run on the blocking pool,
/// so a hung read never delays ticks or stop handling.
pub(crate) struct Monitor {
    id: u64,
    path: String,
    interval: Duration,
    state: State,
    probe: Arc<Mutex<Box<dyn Probe>>>,
    probe_started: Instant,
    stop_rx: mpsc::UnboundedReceiver<()>,
    stop_closed: bool,
    started_tx: Option<oneshot::Sender<()>>,
    complete_tx: mpsc::Sender<()>,
    complete_rx: mpsc::Receiver<()>,
    registry: Registry,
    sink: EventSink,
}

impl Monitor {
    pub(crate) fn new(
        id: u64,
        path: String,
        interval: Duration,
        probe: Box<dyn Probe>,
        stop_rx: mpsc::UnboundedReceiver<()>,
        started_tx: oneshot::Sender<()>,
        registry: Registry,
    ) -> Self {
        let (complete_tx, complete_rx) = mpsc::channel(1);
        let sink = registry.sink().clone();

        Self {
            id,
            path,
            // tokio intervals must be non-zero
            interval: interval.max(Duration::from_secs(1)),
            state: State::Waiting,
            probe: Arc::new(Mutex::new(probe)),
            probe_started: Instant::now(),
            stop_rx,
            stop_closed: false,
            started_tx: Some(started_tx),
            complete_tx,
            complete_rx,
            registry,
            sink,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("monitor {:?} started", self.path);
        self.sink
            .send(Event::success("start", &self.path, "started"))
            .await;
        // Registry::start returns only now, so no reply to a later command
        // for this path can overtake "started"
        if let Some(tx) = self.started_tx.take() {
            let _ = tx.send(());
        }

        // Initial check, then one per interval
        let mut flow = self.handle(Input::Tick).await;

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while flow.is_continue() {
            let input = tokio::select! {
                _ = ticker.tick() => Input::Tick,
                Some(()) = self.complete_rx.recv() => Input::Complete,
                req = self.stop_rx.recv(), if !self.stop_closed => {
                    if req.is_none() {
                        // Nobody can stop us any more; treat as a final request
                        self.stop_closed = true;
                    }
                    Input::StopRequest
                }
            };
            flow = self.handle(input).await;
        }

        drop(ticker);
        self.exit().await;
    }

    async fn handle(&mut self, input: Input) -> ControlFlow<()> {
        let (next, action) = self.state.on(input);
        let previous = std::mem::replace(&mut self.state, next);

        match action {
            Action::BeginProbe => self.begin_probe(),
            Action::WarnBlocked => {
                warn!(
                    "monitor {:?} is blocked for {:.6} seconds",
                    self.path,
                    self.probe_started.elapsed().as_secs_f64()
                );
            }
            Action::ReportStopping => {
                if previous == State::Checking {
                    debug!("monitor {:?} is checking, waiting until io completes", self.path);
                } else {
                    debug!("monitor {:?} stopping in progress", self.path);
                }
                self.sink
                    .send(Event::new(
                        "stop",
                        &self.path,
                        Errno::EINPROGRESS,
                        "stopping in progress",
                    ))
                    .await;
            }
            Action::Exit => return ControlFlow::Break(()),
            Action::None => {}
            Action::Unexpected => {
                error!(
                    "monitor {:?} received {:?} while {:?}, ignoring",
                    self.path, input, previous
                );
            }
        }

        ControlFlow::Continue(())
    }

    fn begin_probe(&mut self) {
        debug!("checking {:?}...", self.path);
        self.probe_started = Instant::now();

        let path = self.path.clone();
        let probe = Arc::clone(&self.probe);
        let sink = self.sink.clone();
        let complete = self.complete_tx.clone();

        tokio::spawn(async move {
            let event = check(path, probe).await;
            sink.send(event).await;
            // Exactly one completion per read, raised after its result is queued
            let _ = complete.send(()).await;
        });
    }

    async fn exit(mut self) {
        self.registry.remove(&self.path, self.id);

        // Stop requests that raced with the exit still get their reply
        while self.stop_rx.try_recv().is_ok() {
            self.sink
                .send(Event::new(
                    "stop",
                    &self.path,
                    Errno::EINPROGRESS,
                    "stopping in progress",
                ))
                .await;
        }

        self.sink
            .send(Event::success("stop", &self.path, "stopped"))
            .await;
        info!("monitor {:?} stopped", self.path);
    }
}

async fn check(path: String, probe: Arc<Mutex<Box<dyn Probe>>>) -> Event {
    let target = path.clone();
    let result = task::spawn_blocking(move || {
        let mut probe = probe.lock().unwrap_or_else(|e| e.into_inner());
        probe.read_delay(Path::new(&target))
    })
    .await;

    match result {
        Ok(Ok(delay)) => {
            debug!(
                "check {:?} completed in {:.6} seconds",
                path,
                delay.as_secs_f64()
            );
            Event::success("check", path, format_delay(delay))
        }
        Ok(Err(errno)) => {
            let reason = errno.description();
            error!("check {:?} failed: {}", path, reason);
            Event::new("check", path, errno, reason)
        }
        Err(e) => {
            error!("check {:?} failed: {}", path, e);
            Event::new("check", path, Errno::EIO, "probe panicked")
        }
    }
}
