use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::io::{self, BufReader};

use iocheck::{IoCheckEngine, logging, probes, settings::Settings};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Opt {
    /// Enable debug mode
    #[arg(long)]
    debug: bool,
}

/// Accept the single-dash long form `-debug` used by existing callers.
fn normalize_arg(arg: String) -> String {
    match arg.as_str() {
        "-debug" => "--debug".to_string(),
        _ => arg,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse_from(std::env::args().map(normalize_arg));

    let mut settings = Settings::new().context("Failed to load settings")?;
    settings.debug |= opt.debug;

    // Threshold is fixed before any monitor exists
    logging::init(settings.debug);

    info!("iocheck started (pid={})", std::process::id());

    let engine = IoCheckEngine::new(&settings, io::stdout(), probes::direct_io_factory());
    engine.run(BufReader::new(io::stdin())).await?;

    info!("Exiting...");
    // Reads stuck in the kernel would block runtime shutdown
    std::process::exit(0);
}
