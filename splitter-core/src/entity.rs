use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bit 31 of `mode` marks a directory entry; the low bits carry the Unix
/// permission set.
pub const MODE_DIR: i64 = 1 << 31;

const PERM_MASK: i64 = 0o7777;

/// Per-file metadata recorded in the snapshot manifest.
///
/// Directory paths carry a trailing `/`. `hash` keys the manifest's chunk
/// map and is a deterministic fingerprint of the recorded metadata; it is
/// not a content digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub path: String,
    pub size: u64,
    pub time: i64,
    pub mode: i64,
    pub hash: u64,
}

impl FileMeta {
    pub fn new(root: Option<String>, path: String, size: u64, time: i64, mode: i64) -> Self {
        let mut path = path;
        if mode & MODE_DIR != 0 && !path.ends_with('/') {
            path.push('/');
        }
        let hash = if mode & MODE_DIR == 0 {
            fingerprint(&path, size, time, mode)
        } else {
            0
        };
        Self {
            root,
            path,
            size,
            time,
            mode,
            hash,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    pub fn permissions(&self) -> u32 {
        (self.mode & PERM_MASK) as u32
    }

    /// Re-applies the recorded mtime and permission bits to a restored file.
    /// The mtime needs a writable handle, so it goes first: the recorded
    /// mode may drop write access.
    pub fn restore_metadata(&self, path: &Path) -> Result<()> {
        if self.time >= 0 {
            let mtime = UNIX_EPOCH + Duration::from_secs(self.time as u64);
            let file = File::options().write(true).open(path)?;
            file.set_modified(mtime)?;
        }
        fs::set_permissions(path, fs::Permissions::from_mode(self.permissions()))?;
        Ok(())
    }
}

/// Deterministic metadata fingerprint used as the chunk-map key.
pub fn fingerprint(path: &str, size: u64, time: i64, mode: i64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&size.to_le_bytes());
    hasher.update(&time.to_le_bytes());
    hasher.update(&mode.to_le_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap())
}

/// Modification time as seconds since the epoch, 0 when unavailable.
pub fn mtime_from(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_gain_a_trailing_slash() {
        let meta = FileMeta::new(None, "dir-1".to_string(), 0, 0, MODE_DIR | 0o755);
        assert_eq!(meta.path, "dir-1/");
        assert!(meta.is_dir());
        assert_eq!(meta.hash, 0);
    }

    #[test]
    fn files_get_a_metadata_fingerprint() {
        let a = FileMeta::new(None, "file-1".to_string(), 10, 100, 0o644);
        let b = FileMeta::new(None, "file-2".to_string(), 10, 100, 0o644);
        assert!(a.is_file());
        assert_ne!(a.hash, 0);
        assert_ne!(a.hash, b.hash, "path must distinguish identical files");
        let again = FileMeta::new(None, "file-1".to_string(), 10, 100, 0o644);
        assert_eq!(a.hash, again.hash);
    }

    #[test]
    fn permissions_mask_strips_the_type_bits() {
        let meta = FileMeta::new(None, "d".to_string(), 0, 0, MODE_DIR | 0o700);
        assert_eq!(meta.permissions(), 0o700);
    }

    #[test]
    fn root_is_omitted_from_json_when_absent() {
        let meta = FileMeta::new(None, "file-1".to_string(), 1, 2, 0o644);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("root"));
        let with_root = FileMeta::new(Some("/top".to_string()), "file-1".to_string(), 1, 2, 0o644);
        let json = serde_json::to_string(&with_root).unwrap();
        assert!(json.contains("\"root\":\"/top\""));
    }

    #[test]
    fn restore_metadata_applies_mode_and_mtime() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let meta = FileMeta::new(None, "f".to_string(), 0, 1_600_000_000, 0o640);
        meta.restore_metadata(tmp.path()).unwrap();
        let md = fs::metadata(tmp.path()).unwrap();
        assert_eq!(md.permissions().mode() & 0o7777, 0o640);
        assert_eq!(mtime_from(&md), 1_600_000_000);
    }
}
