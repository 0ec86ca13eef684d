//! Diagnostics on stderr.
//!
//! Lines look like `WARN monitor "/dev/sdb" is blocked for 3.000121 seconds`.
//! Stdout belongs to the event protocol, so nothing is ever logged there.

use std::fmt;
use std::io::{self, Write};

use env_logger::{Builder, Env, Target};
use log::{Level, LevelFilter};

/// Threshold used when `RUST_LOG` is not set.
pub fn default_filter(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn write_record(out: &mut dyn Write, level: Level, args: &fmt::Arguments<'_>) -> io::Result<()> {
    writeln!(out, "{} {}", level, args)
}

pub fn builder(debug: bool) -> Builder {
    let default = default_filter(debug).to_string().to_lowercase();
    let mut builder = Builder::from_env(Env::default().default_filter_or(default));
    if debug {
        // -debug wins over RUST_LOG
        builder.filter_level(LevelFilter::Debug);
    }
    builder
        .target(Target::Stderr)
        .format(|buf, record| write_record(buf, record.level(), record.args()));
    builder
}

/// Install the global logger. Must run before any monitor exists.
pub fn init(debug: bool) {
    // Best effort: a second init (e.g. in tests) keeps the first logger
    let _ = builder(debug).try_init();
}
