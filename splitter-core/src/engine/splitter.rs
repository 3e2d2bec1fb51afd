use std::io;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::config::{DEFAULT_CHUNK_SIZE, SplitterOptions};
use crate::entity::{self, FileMeta, MODE_DIR};
use crate::error::{Result, SplitterError};
use crate::manifest::SnapshotManifest;
use crate::storage::Storage;
use crate::sync::permit::PermitPool;

/// Directory snapshot engine.
///
/// Walks a root, splits regular files into fixed-size sections, stores each
/// section through the configured [`Storage`] (encrypting when a passphrase
/// is set), and reassembles trees from a recorded manifest. Snapshot and
/// restore share one permit pool bounding their section tasks.
pub struct Splitter {
    pub(crate) root: PathBuf,
    pub(crate) meta_dir: String,
    pub(crate) chunks_dir: String,
    pub(crate) chunk_size: u64,
    pub(crate) log_ops: bool,
    pub(crate) storage: Storage,
    pub(crate) pool: PermitPool,
}

impl Splitter {
    pub fn new(options: SplitterOptions) -> Result<Self> {
        let root = std::path::absolute(&options.root)?;
        let mut storage = Storage::new(&root).with_log_ops(options.log_ops);
        if let Some(passphrase) = &options.passphrase {
            storage = storage.with_passphrase(passphrase)?;
        }
        let chunk_size = if options.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            options.chunk_size
        };
        Ok(Self {
            root,
            meta_dir: options.meta_dir,
            chunks_dir: options.chunks_dir,
            chunk_size,
            log_ops: options.log_ops,
            storage,
            pool: PermitPool::new(options.permits),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub(crate) fn manifest_key(&self, tag: &str) -> String {
        format!("{}/{}", self.meta_dir, tag)
    }

    pub(crate) fn chunk_dir_key(&self, tag: &str, path: &str, number: u32) -> String {
        format!("{}/{}/{}/{}", self.chunks_dir, tag, path, number)
    }

    /// Walks the root in directory order and records an entity for every
    /// directory and regular file. The engine's own output directories are
    /// skipped at any depth; symlinks and special files are not recorded.
    pub(crate) fn survey(&self, tag: &str) -> Result<SnapshotManifest> {
        let started = OffsetDateTime::now_utc().unix_timestamp();
        let mut manifest = SnapshotManifest::new(tag, started);
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_own_output(e));
        for entry in walker {
            let entry = entry.map_err(io::Error::other)?;
            if entry.depth() == 0 {
                continue;
            }
            let file_type = entry.file_type();
            let md = entry.metadata().map_err(io::Error::other)?;
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| SplitterError::Format(format!("walked path escapes root: {e}")))?
                .to_string_lossy()
                .into_owned();
            let perms = {
                use std::os::unix::fs::PermissionsExt;
                (md.permissions().mode() & 0o7777) as i64
            };
            let time = entity::mtime_from(&md);
            if file_type.is_dir() {
                manifest
                    .entities
                    .push(FileMeta::new(None, rel, 0, time, MODE_DIR | perms));
            } else if file_type.is_file() {
                manifest.number_of_files += 1;
                manifest
                    .entities
                    .push(FileMeta::new(None, rel, md.len(), time, perms));
            }
        }
        if self.log_ops {
            debug!(
                tag,
                entities = manifest.entities.len(),
                files = manifest.number_of_files,
                "survey complete"
            );
        }
        Ok(manifest)
    }

    fn is_own_output(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry
                .file_name()
                .to_str()
                .map(|name| name == self.meta_dir || name == self.chunks_dir)
                .unwrap_or(false)
    }
}
