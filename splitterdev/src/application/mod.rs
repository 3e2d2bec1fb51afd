pub mod handlers;
pub mod sample;

use clap::Parser;
use splitter_core::error::Result;
use tracing_subscriber::EnvFilter;

use crate::presentation::cli::{Cli, Commands, SampleCommands, SplitterCommands};

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sample(sample_cmd) => match sample_cmd {
            SampleCommands::File { path, size } => handlers::handle_sample_file(path, size),
            SampleCommands::Demo { path, size } => handlers::handle_sample_demo(path, size),
        },
        Commands::Splitter(splitter_cmd) => match splitter_cmd {
            SplitterCommands::Snapshot {
                path,
                tag,
                passphrase,
                chunk_mib,
            } => handlers::handle_snapshot(path, tag, passphrase, chunk_mib),
            SplitterCommands::Restore {
                path,
                tag,
                restore_root,
                passphrase,
                chunk_mib,
            } => handlers::handle_restore(path, tag, restore_root, passphrase, chunk_mib),
        },
    }
}
