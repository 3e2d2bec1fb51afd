use std::path::PathBuf;

use splitter_core::prelude::*;
use uuid::Uuid;

use crate::application::sample;

const DEMO_FILES: &[&str] = &["file-1", "dir-1/file-2", "dir-1/subdir-1/file-3"];

fn resolve_root(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| PathBuf::from("tmp"))
}

fn splitter_from_args(root: PathBuf, passphrase: String, chunk_mib: u64) -> Result<Splitter> {
    Splitter::new(
        SplitterOptions::default()
            .with_root(root)
            .with_chunk_size_mib(chunk_mib)
            .with_passphrase(passphrase)
            .with_log_ops(true),
    )
}

pub fn handle_sample_file(path: Option<PathBuf>, size_mb: u64) -> Result<()> {
    let root = resolve_root(path);
    sample::create_random_files(&root, &["file-1"], size_mb * (1 << 20))
}

pub fn handle_sample_demo(path: Option<PathBuf>, size_mb: u64) -> Result<()> {
    let root = resolve_root(path);
    sample::create_random_files(&root, DEMO_FILES, size_mb * (1 << 20))
}

pub fn handle_snapshot(
    path: Option<PathBuf>,
    tag: Option<String>,
    passphrase: String,
    chunk_mib: u64,
) -> Result<()> {
    let splitter = splitter_from_args(resolve_root(path), passphrase, chunk_mib)?;
    let tag = tag.unwrap_or_else(|| Uuid::new_v4().to_string());
    splitter.snapshot(&CancelToken::new(), &tag)
}

pub fn handle_restore(
    path: Option<PathBuf>,
    tag: Option<String>,
    restore_root: String,
    passphrase: String,
    chunk_mib: u64,
) -> Result<()> {
    // Without a tag there is nothing to restore.
    let Some(tag) = tag else {
        return Ok(());
    };
    let splitter = splitter_from_args(resolve_root(path), passphrase, chunk_mib)?;
    splitter.restore(&CancelToken::new(), &restore_root, &tag)
}
