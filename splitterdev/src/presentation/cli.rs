use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "directory snapshot splitter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(subcommand)]
    /// Generate sample files to split and merge
    Sample(SampleCommands),

    #[command(subcommand)]
    /// Snapshot a directory into chunks, or restore one from them
    Splitter(SplitterCommands),
}

#[derive(Subcommand)]
pub enum SampleCommands {
    /// Generate one random sample file under PATH (default ./tmp)
    File {
        path: Option<PathBuf>,

        /// file size in MB
        #[arg(long, default_value_t = 500)]
        size: u64,
    },

    /// Generate a small preset set of sample files under PATH
    Demo {
        path: Option<PathBuf>,

        /// file size in MB
        #[arg(long, default_value_t = 500)]
        size: u64,
    },
}

#[derive(Subcommand)]
pub enum SplitterCommands {
    /// Take a snapshot of the files under PATH and split them into chunks
    Snapshot {
        path: Option<PathBuf>,

        /// tag identifying this snapshot; a fresh UUID when omitted
        #[arg(long)]
        tag: Option<String>,

        /// passphrase sealing chunks and manifest
        #[arg(long, default_value = "encryption-key")]
        passphrase: String,

        /// chunk size in MiB
        #[arg(long = "chunk-mib", default_value_t = 4)]
        chunk_mib: u64,
    },

    /// Restore a snapshot from its chunks
    Restore {
        path: Option<PathBuf>,

        /// tag identifying the snapshot to restore; nothing happens without one
        #[arg(long)]
        tag: Option<String>,

        /// directory under the root receiving restored snapshots
        #[arg(long = "restore-root", default_value = "restore-root-dir")]
        restore_root: String,

        /// passphrase the snapshot was sealed with
        #[arg(long, default_value = "encryption-key")]
        passphrase: String,

        /// chunk size in MiB
        #[arg(long = "chunk-mib", default_value_t = 4)]
        chunk_mib: u64,
    },
}
