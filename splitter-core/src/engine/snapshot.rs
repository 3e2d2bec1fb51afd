use std::fs::File;
use std::time::Instant;

use crossbeam::channel;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::engine::splitter::Splitter;
use crate::error::{Result, SplitterError};
use crate::section::{self, Section, SectionMeta};
use crate::storage::Entry;
use crate::sync::cancel::CancelToken;

/// A source file whose sections are being stored. The handle stays open
/// until every section of the file has been scheduled and written.
struct SourceFile {
    hash: u64,
    path: String,
    size: u64,
    handle: File,
}

impl Splitter {
    /// Takes a snapshot of the configured root under `tag`.
    ///
    /// Every non-empty regular file is partitioned into `chunk_size` windows
    /// by absolute offset. One task per section runs under the engine permit
    /// pool; each stores the chunk payload and its JSON sidecar, then reports
    /// the completed section over a channel to the collector assembling the
    /// chunk map. The manifest is serialized and stored only after every
    /// chunk write has been acknowledged.
    pub fn snapshot(&self, cancel: &CancelToken, tag: &str) -> Result<()> {
        let started = Instant::now();
        info!(tag, root = %self.root.display(), "snapshot: starting");
        let mut manifest = self.survey(tag)?;

        let mut sources: Vec<SourceFile> = Vec::new();
        for entity in manifest.entities.iter_mut() {
            if !entity.is_file() || entity.size == 0 {
                continue;
            }
            let full = self.root.join(&entity.path);
            match File::open(&full) {
                Ok(handle) => sources.push(SourceFile {
                    hash: entity.hash,
                    path: entity.path.clone(),
                    size: entity.size,
                    handle,
                }),
                Err(e) => {
                    // The walk raced a deletion or permission change; demote
                    // the entity instead of failing the whole snapshot.
                    warn!(path = %full.display(), error = %e, "snapshot: cannot open source, recording as empty");
                    entity.size = 0;
                }
            }
        }

        let (tx, rx) = channel::unbounded();
        rayon::scope(|scope| {
            for source in &sources {
                for (number, (start, size)) in section::spans(source.size, self.chunk_size)
                    .into_iter()
                    .enumerate()
                {
                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let _permit = self.pool.acquire();
                        let outcome =
                            self.store_section(cancel, tag, source, start, size, number as u32);
                        let _ = tx.send(outcome.map(|meta| (source.hash, meta)));
                    });
                }
            }
        });
        drop(tx);

        let mut first_error: Option<SplitterError> = None;
        for outcome in rx {
            match outcome {
                Ok((hash, meta)) => manifest.record_section(hash, meta),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        drop(sources);

        manifest.sort_sections();
        manifest.end_time = OffsetDateTime::now_utc().unix_timestamp();
        self.storage.put(
            cancel,
            &Entry {
                key: self.manifest_key(tag),
                value: manifest.to_json()?,
            },
        )?;
        info!(tag, files = manifest.number_of_files, "snapshot: complete");
        if self.log_ops {
            debug!(tag, elapsed = ?started.elapsed(), "snapshot: duration");
        }
        Ok(())
    }

    fn store_section(
        &self,
        cancel: &CancelToken,
        tag: &str,
        source: &SourceFile,
        start: u64,
        size: u64,
        number: u32,
    ) -> Result<SectionMeta> {
        cancel.check()?;
        let mut section = Section::new(start, size, number, Some(&source.handle), None);
        let value = section.data()?;
        let dir = self.chunk_dir_key(tag, &source.path, number);
        self.storage.put(
            cancel,
            &Entry {
                key: format!("{}/{}", dir, section.meta.hash),
                value,
            },
        )?;
        self.storage.put(
            cancel,
            &Entry {
                key: format!("{dir}/.metadata"),
                value: serde_json::to_vec_pretty(&section.meta)?,
            },
        )?;
        if self.log_ops {
            debug!(path = %source.path, number, hash = %section.meta.hash, "snapshot: stored section");
        }
        Ok(section.meta)
    }
}
