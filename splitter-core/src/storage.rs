use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::codec::{Decryptor, Encryptor, KEY_SIZE};
use crate::crypto::kdf;
use crate::error::{Result, SplitterError};
use crate::sync::cancel::CancelToken;
use crate::sync::permit::PermitPool;

/// One record held by the storage: a `/`-separated logical key and an opaque
/// byte value.
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Disk-backed key/value storage rooted at a directory.
///
/// Keys map to files under the root; intermediate directories are created
/// 0700 on demand, leaves 0600. When a passphrase is configured every value
/// passes through a fresh framed-AEAD encryptor on put and decryptor on get.
/// All operations serialize through a permit pool (capacity 1 by default)
/// and an rw-lock: writers exclusive, readers shared.
pub struct Storage {
    root: PathBuf,
    key: Option<Zeroizing<[u8; KEY_SIZE]>>,
    pool: PermitPool,
    state: RwLock<()>,
    log_ops: bool,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            key: None,
            pool: PermitPool::new(1),
            state: RwLock::new(()),
            log_ops: false,
        }
    }

    /// Enables the codec on the value path.
    pub fn with_passphrase(mut self, passphrase: &str) -> Result<Self> {
        self.key = Some(kdf::derive_key(passphrase)?);
        Ok(self)
    }

    pub fn with_permits(mut self, permits: usize) -> Self {
        self.pool = PermitPool::new(permits);
        self
    }

    pub fn with_log_ops(mut self, log_ops: bool) -> Self {
        self.log_ops = log_ops;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn encrypts(&self) -> bool {
        self.key.is_some()
    }

    pub fn put(&self, cancel: &CancelToken, entry: &Entry) -> Result<()> {
        let _permit = self.pool.acquire();
        let _guard = self.state.write();
        let started = Instant::now();
        cancel.check()?;
        validate_key(&entry.key)?;

        let full = self.root.join(&entry.key);
        let dir = full.parent().unwrap_or(&self.root);
        DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
        if self.log_ops {
            debug!(key = %entry.key, path = %full.display(), "storage: put");
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&full)?;
        let written = match &self.key {
            Some(key) => {
                let mut encryptor = Encryptor::new(&key[..], entry.value.as_slice())?;
                io::copy(&mut encryptor, &mut file).map_err(SplitterError::from_io)?
            }
            None => io::copy(&mut entry.value.as_slice(), &mut file)?,
        };
        file.sync_all()?;

        // A zero-length leaf is never a valid entry; drop it eagerly.
        if fs::metadata(&full)?.len() == 0 {
            let _ = fs::remove_file(&full);
        }
        if self.log_ops {
            debug!(key = %entry.key, bytes = written, elapsed = ?started.elapsed(), "storage: put done");
        }
        Ok(())
    }

    pub fn get(&self, cancel: &CancelToken, key: &str) -> Result<Option<Entry>> {
        let _permit = self.pool.acquire();
        let _guard = self.state.read();
        let started = Instant::now();
        cancel.check()?;
        validate_key(key)?;

        let full = self.root.join(key);
        match fs::metadata(&full) {
            Ok(meta) if meta.len() == 0 => {
                // Likely debris from an earlier FS error (out of space and
                // the like); no entry is ever zero length.
                warn!(key, path = %full.display(), "storage: removing zero-size leaf");
                let _ = fs::remove_file(&full);
                return Ok(None);
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut file = match File::open(&full) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let value = match &self.key {
            Some(k) => {
                let mut decryptor = Decryptor::new(&k[..], raw.as_slice())?;
                let mut out = Vec::new();
                decryptor
                    .read_to_end(&mut out)
                    .map_err(SplitterError::from_io)?;
                out
            }
            None => raw,
        };
        if self.log_ops {
            debug!(key, bytes = value.len(), elapsed = ?started.elapsed(), "storage: get done");
        }
        Ok(Some(Entry {
            key: key.to_string(),
            value,
        }))
    }

    pub fn delete(&self, cancel: &CancelToken, key: &str) -> Result<()> {
        let _permit = self.pool.acquire();
        let _guard = self.state.write();
        cancel.check()?;
        if key.is_empty() {
            warn!("storage: delete called with an empty key");
            return Ok(());
        }
        validate_key(key)?;

        let full = self.root.join(key);
        match fs::remove_file(&full) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if self.log_ops {
            debug!(key, "storage: delete");
        }
        self.prune_empty_ancestors(key)
    }

    pub fn list(&self, cancel: &CancelToken, prefix: &str) -> Result<Vec<String>> {
        let _permit = self.pool.acquire();
        let _guard = self.state.read();
        cancel.check()?;
        validate_key(prefix)?;

        let path = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        };
        let entries = match fs::read_dir(&path) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                name.push('/');
            } else if let Some(stripped) = name.strip_prefix('_') {
                // Leading underscore is the reserved escape for file names.
                name = stripped.to_string();
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Removes empty directories from the deepest ancestor of `key` upward,
    /// stopping at the first non-empty one or the storage root.
    fn prune_empty_ancestors(&self, key: &str) -> Result<()> {
        let nodes: Vec<&str> = key.split('/').collect();
        for depth in (1..nodes.len()).rev() {
            let dir = self.root.join(nodes[..depth].join("/"));
            match fs::read_dir(&dir) {
                Ok(mut entries) => {
                    if entries.next().is_some() {
                        break;
                    }
                    fs::remove_dir(&dir)?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.contains("..") {
        return Err(SplitterError::PathParentReference(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::codec::{HEADER_SIZE, MAX_PAYLOAD, TAG_SIZE};

    fn scratch() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn entry(key: &str, value: &[u8]) -> Entry {
        Entry {
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn put_get_round_trip_plain() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        storage.put(&cancel, &entry("a/b/c", b"hello")).unwrap();
        let got = storage.get(&cancel, "a/b/c").unwrap().unwrap();
        assert_eq!(got.value, b"hello");
    }

    #[test]
    fn put_get_round_trip_encrypted() {
        let dir = scratch();
        let storage = Storage::new(dir.path())
            .with_passphrase("encryption-key")
            .unwrap();
        let cancel = CancelToken::new();
        let payload: Vec<u8> = (0..MAX_PAYLOAD + 100).map(|i| (i % 200) as u8).collect();
        storage.put(&cancel, &entry("big/chunk", &payload)).unwrap();

        // On-disk bytes are framed ciphertext, strictly larger than the
        // plaintext and unequal to it.
        let raw = std::fs::read(dir.path().join("big/chunk")).unwrap();
        assert!(raw.len() > payload.len());
        assert_eq!(
            raw.len(),
            payload.len() + 2 * (HEADER_SIZE + TAG_SIZE),
            "two frames of overhead expected"
        );

        let got = storage.get(&cancel, "big/chunk").unwrap().unwrap();
        assert_eq!(got.value, payload);
    }

    #[test]
    fn parent_references_are_rejected() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        let err = storage.put(&cancel, &entry("a/../b", &[0])).unwrap_err();
        assert!(matches!(err, SplitterError::PathParentReference(_)));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
        assert!(matches!(
            storage.get(&cancel, "a/../b"),
            Err(SplitterError::PathParentReference(_))
        ));
    }

    #[test]
    fn zero_size_leaf_is_cleaned_up_on_get() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        let path = dir.path().join("stale");
        std::fs::write(&path, b"").unwrap();
        assert!(storage.get(&cancel, "stale").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn absent_key_is_not_an_error() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        assert!(storage.get(&cancel, "missing").unwrap().is_none());
        storage.delete(&cancel, "missing").unwrap();
    }

    #[test]
    fn delete_prunes_empty_ancestors() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        storage.put(&cancel, &entry("a/b/c/leaf", b"x")).unwrap();
        storage.put(&cancel, &entry("a/other", b"y")).unwrap();
        storage.delete(&cancel, "a/b/c/leaf").unwrap();
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a/other").exists());
    }

    #[test]
    fn list_marks_dirs_and_strips_escapes() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        storage.put(&cancel, &entry("top/sub/leaf", b"x")).unwrap();
        storage.put(&cancel, &entry("top/_escaped", b"y")).unwrap();
        storage.put(&cancel, &entry("top/plain", b"z")).unwrap();
        let names = storage.list(&cancel, "top").unwrap();
        assert_eq!(names, vec!["escaped", "plain", "sub/"]);
    }

    #[test]
    fn list_of_missing_prefix_is_empty() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        assert!(storage.list(&cancel, "nowhere").unwrap().is_empty());
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let dir = scratch();
        let storage = Storage::new(dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            storage.put(&cancel, &entry("k", b"v")),
            Err(SplitterError::Cancelled)
        ));
        assert!(matches!(
            storage.get(&cancel, "k"),
            Err(SplitterError::Cancelled)
        ));
    }
}
