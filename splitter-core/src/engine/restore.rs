use std::fs::{self, DirBuilder, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::time::Instant;

use crossbeam::channel;
use tracing::{debug, info};

use crate::engine::splitter::Splitter;
use crate::entity::{self, FileMeta};
use crate::error::{Result, SplitterError};
use crate::manifest::SnapshotManifest;
use crate::section::{Section, SectionMeta};
use crate::sync::cancel::CancelToken;

/// A destination file being reassembled. Section tasks write into the shared
/// handle with positional I/O, so completion order does not matter.
struct RestoreTarget<'m> {
    meta: &'m FileMeta,
    sections: &'m [SectionMeta],
    handle: File,
    full: PathBuf,
}

impl Splitter {
    /// Restores the snapshot recorded under `tag` into
    /// `<root>/<restore_root>/<tag>/`.
    pub fn restore(&self, cancel: &CancelToken, restore_root: &str, tag: &str) -> Result<()> {
        let started = Instant::now();
        info!(tag, restore_root, "restore: starting");
        let entry = self
            .storage
            .get(cancel, &self.manifest_key(tag))?
            .ok_or_else(|| SplitterError::Format(format!("no snapshot manifest for tag {tag}")))?;
        let manifest = SnapshotManifest::from_json(&entry.value)?;

        let mut targets: Vec<RestoreTarget<'_>> = Vec::new();
        for meta in &manifest.entities {
            if !meta.is_file() || meta.size == 0 {
                continue;
            }
            let sections = manifest.chunk_map.get(&meta.hash).ok_or_else(|| {
                SplitterError::Format(format!("manifest has no chunk map for {}", meta.path))
            })?;
            let full = self.root.join(restore_root).join(tag).join(&meta.path);
            if let Some(parent) = full.parent() {
                DirBuilder::new().recursive(true).mode(0o700).create(parent)?;
            }
            let handle = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&full)?;
            targets.push(RestoreTarget {
                meta,
                sections,
                handle,
                full,
            });
        }

        let (tx, rx) = channel::unbounded();
        rayon::scope(|scope| {
            for target in &targets {
                for sec in target.sections {
                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let _permit = self.pool.acquire();
                        let _ = tx.send(self.fetch_section(cancel, tag, target, sec));
                    });
                }
            }
        });
        drop(tx);

        let mut first_error: Option<SplitterError> = None;
        for outcome in rx {
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        for target in &targets {
            target.meta.restore_metadata(&target.full)?;
            let md = fs::metadata(&target.full)?;
            let mode = (md.permissions().mode() & 0o7777) as i64;
            let restored_hash =
                entity::fingerprint(&target.meta.path, md.len(), entity::mtime_from(&md), mode);
            info!(
                path = %target.meta.path,
                original_hash = target.meta.hash,
                restored_hash,
                original_size = target.meta.size,
                restored_size = md.len(),
                "restore: merged file"
            );
        }
        info!(tag, files = targets.len(), "restore: complete");
        if self.log_ops {
            debug!(tag, elapsed = ?started.elapsed(), "restore: duration");
        }
        Ok(())
    }

    fn fetch_section(
        &self,
        cancel: &CancelToken,
        tag: &str,
        target: &RestoreTarget<'_>,
        sec: &SectionMeta,
    ) -> Result<()> {
        cancel.check()?;
        let key = format!(
            "{}/{}",
            self.chunk_dir_key(tag, &target.meta.path, sec.number),
            sec.hash
        );
        let chunk = self
            .storage
            .get(cancel, &key)?
            .ok_or_else(|| SplitterError::Format(format!("missing chunk {key}")))?;
        if chunk.value.len() as u64 != sec.size {
            return Err(SplitterError::Format(format!(
                "chunk {key} carries {} bytes, expected {}",
                chunk.value.len(),
                sec.size
            )));
        }
        let section = Section::new(sec.start, sec.size, sec.number, None, Some(&target.handle));
        section.merge(&chunk.value)?;
        Ok(())
    }
}
