use std::process::ExitCode;

use clap::Parser;
use hlsvod::config::{Args, RunConfig};

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "hlsvod=info",
        1 => "hlsvod=debug",
        _ => "hlsvod=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    match RunConfig::from_args(args).and_then(|config| hlsvod::run(&config)) {
        Ok(records) => {
            tracing::debug!(count = records.len(), "segmentation complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("hlsvod: {e}");
            ExitCode::FAILURE
        }
    }
}
