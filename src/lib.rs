// tunematch - MIDI similarity search
// Main library entry point

pub mod catalog;
pub mod commands;
pub mod config;
pub mod engine;
pub mod similarity;

use clap::Parser;

pub use engine::{SearchEngine, SearchHit};

/// Parse the command line, set up logging and run the requested command
pub fn run() -> anyhow::Result<()> {
    let cli = commands::Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    commands::execute(cli)
}
