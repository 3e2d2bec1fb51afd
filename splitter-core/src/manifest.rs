use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::FileMeta;
use crate::error::Result;
use crate::section::SectionMeta;

/// Snapshot manifest, serialized as indented JSON under
/// `<meta_dir>/<tag>`.
///
/// `chunk_map` maps a file entity's fingerprint to that file's sections,
/// ordered by section number. JSON map keys are the fingerprint's decimal
/// digits.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub tag: String,
    pub start_time: i64,
    pub end_time: i64,
    pub number_of_files: usize,
    pub entities: Vec<FileMeta>,
    #[serde(rename = "chunk-map")]
    pub chunk_map: BTreeMap<u64, Vec<SectionMeta>>,
}

impl SnapshotManifest {
    pub fn new(tag: &str, start_time: i64) -> Self {
        Self {
            tag: tag.to_string(),
            start_time,
            ..Self::default()
        }
    }

    pub fn record_section(&mut self, file_hash: u64, section: SectionMeta) {
        self.chunk_map.entry(file_hash).or_default().push(section);
    }

    /// Orders every file's sections by number; call once all concurrent
    /// completions have been collected.
    pub fn sort_sections(&mut self) {
        for sections in self.chunk_map.values_mut() {
            sections.sort_by_key(|s| s.number);
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
