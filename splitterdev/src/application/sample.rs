use std::fs::{DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;

use rand::Rng;
use splitter_core::error::Result;
use tracing::info;

const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Proin \
facilisis mi sapien, vitae accumsan libero malesuada in. Suspendisse sodales finibus \
sagittis. Proin et augue vitae dui scelerisque imperdiet. Suspendisse et pulvinar \
libero. Vestibulum id porttitor augue. Vivamus lobortis lacus et libero ultricies \
accumsan. Donec non feugiat enim, nec tempus nunc. Mauris rutrum, diam euismod \
elementum ultricies, purus tellus faucibus augue, sit amet tristique diam purus eu \
arcu. Integer elementum urna non justo fringilla fermentum. Pellentesque habitant \
morbi tristique senectus et netus et malesuada fames ac turpis egestas.";

/// Writes each relative path under `root` as a filler file of a randomized
/// size between `max_size / 2` and `max_size` bytes.
pub fn create_random_files(root: &Path, files: &[&str], max_size: u64) -> Result<()> {
    for rel in files {
        let full = root.join(rel);
        if let Some(parent) = full.parent() {
            DirBuilder::new().recursive(true).mode(0o700).create(parent)?;
        }
        create_random_file(&full, max_size)?;
    }
    Ok(())
}

pub fn create_random_file(path: &Path, max_size: u64) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;

    let half = (max_size / 2).max(1);
    let size = half + rand::rng().random_range(0..half);
    let line = format!("{}---{}\n", path.display(), LOREM);
    let repetitions = (size / line.len() as u64).max(1);
    for _ in 0..repetitions {
        file.write_all(line.as_bytes())?;
    }
    info!(path = %path.display(), bytes = repetitions * line.len() as u64, "sample file written");
    Ok(())
}
