pub mod annotate;
pub mod cli;
pub mod config;
pub mod detection;
pub mod disambiguation;
pub mod engine;
pub mod evaluation;
pub mod lexicon;
pub mod resolution;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub use engine::{ExpansionEngine, ExpansionReport, ModelFailurePolicy};
pub use lexicon::LexiconStore;
pub use resolution::{Resolution, ResolutionSource};

/// Binary entry point: parse arguments, set up logging, run the command.
pub fn run() -> ExitCode {
    let args = cli::Args::parse();

    // Initialize tracing; stdout is reserved for results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match cli::execute(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "medexpand failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
