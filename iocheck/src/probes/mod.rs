use std::{path::Path, sync::Arc, time::Duration};

use crate::event::Errno;

pub mod direct_io;

pub use direct_io::DirectIoProbe;

/// Size of the block read by each check
pub const CHECK_SIZE: usize = 4096;

/// Buffer alignment required for unbuffered reads
pub const BUFFER_ALIGN: usize = 512;

/// A single latency measurement against a path.
///
/// A probe owns its read buffer, so each monitor gets its own instance and
/// never issues two reads on it at the same time.
pub trait Probe: Send {
    fn read_delay(&mut self, path: &Path) -> Result<Duration, Errno>;
}

/// Creates one probe per monitor.
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn Probe> + Send + Sync>;

pub fn direct_io_factory() -> ProbeFactory {
    Arc::new(|| Box::new(DirectIoProbe::new(CHECK_SIZE)) as Box<dyn Probe>)
}

/// Formats a successful check the way the parent expects: seconds with six
/// decimal places, e.g. `0.000487`.
pub fn format_delay(delay: Duration) -> String {
    format!("{:.6}", delay.as_secs_f64())
}
