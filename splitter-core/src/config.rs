use std::path::PathBuf;

/// 8 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * (1 << 20);

pub const DEFAULT_META_DIR: &str = ".metadata";
pub const DEFAULT_CHUNKS_DIR: &str = ".chunks";

/// Construction-time configuration for a [`crate::Splitter`].
#[derive(Clone, Debug)]
pub struct SplitterOptions {
    /// Base directory for the walk and for storage output.
    pub root: PathBuf,
    /// Leaf name under the root holding snapshot manifests.
    pub meta_dir: String,
    /// Leaf name under the root holding chunk trees.
    pub chunks_dir: String,
    /// Bytes per section.
    pub chunk_size: u64,
    /// Enables the framed AEAD codec on every storage value.
    pub passphrase: Option<String>,
    /// Emits per-operation debug events and durations.
    pub log_ops: bool,
    /// Capacity of the engine permit pool gating section tasks.
    pub permits: usize,
}

impl Default for SplitterOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tmp"),
            meta_dir: DEFAULT_META_DIR.to_string(),
            chunks_dir: DEFAULT_CHUNKS_DIR.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            passphrase: None,
            log_ops: false,
            permits: 1,
        }
    }
}

impl SplitterOptions {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_chunk_size_mib(mut self, mib: u64) -> Self {
        self.chunk_size = mib * (1 << 20);
        self
    }

    pub fn with_chunk_size_kib(mut self, kib: u64) -> Self {
        self.chunk_size = kib * (1 << 10);
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_log_ops(mut self, log_ops: bool) -> Self {
        self.log_ops = log_ops;
        self
    }

    pub fn with_permits(mut self, permits: usize) -> Self {
        self.permits = permits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_layout_conventions() {
        let opts = SplitterOptions::default();
        assert_eq!(opts.meta_dir, ".metadata");
        assert_eq!(opts.chunks_dir, ".chunks");
        assert_eq!(opts.chunk_size, 8 * 1024 * 1024);
        assert_eq!(opts.permits, 1);
        assert!(opts.passphrase.is_none());
    }

    #[test]
    fn chunk_size_constructors_scale() {
        assert_eq!(
            SplitterOptions::default().with_chunk_size_mib(4).chunk_size,
            4 * 1024 * 1024
        );
        assert_eq!(
            SplitterOptions::default().with_chunk_size_kib(4).chunk_size,
            4096
        );
    }
}
