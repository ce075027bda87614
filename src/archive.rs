//! Archive of finished transcriptions
//!
//! Each finished job leaves a directory `<outputs_dir>/<file_id>/` holding
//! the transcript files and a `metadata.json`. Workers reserve the
//! directory up front; everything else only reads.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::job::{Device, Precision};

pub const METADATA_FILE: &str = "metadata.json";

/// Description of one transcription, stored next to its outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionMetadata {
    pub file_id: String,
    pub file_name: String,
    pub model: String,
    pub language: String,
    pub device: Device,
    pub precision: Precision,
    pub speaker_detection: bool,
    #[serde(default)]
    pub speaker_count: Option<u32>,
    /// Local start time, `%Y-%m-%d %H-%M-%S`
    pub timestamp: String,
    #[serde(default)]
    pub audio_duration_secs: f64,
    #[serde(default)]
    pub segments: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub dir: PathBuf,
    pub metadata: TranscriptionMetadata,
}

/// View over the outputs directory
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a job with `file_id` writes into
    pub fn job_dir(&self, file_id: &str) -> PathBuf {
        self.root.join(file_id)
    }

    /// Create the output directory for a new job, falling back to
    /// `fallback` when another job already holds `preferred`.
    /// Returns the file id that was claimed.
    pub fn reserve(&self, preferred: &str, fallback: &str) -> std::io::Result<String> {
        std::fs::create_dir_all(&self.root)?;

        for file_id in [preferred, fallback] {
            match std::fs::create_dir(self.job_dir(file_id)) {
                Ok(()) => return Ok(file_id.to_string()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Output directory {:?} is taken", file_id);
                }
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("output directories {:?} and {:?} are both taken", preferred, fallback),
        ))
    }

    /// Every readable entry, newest first
    pub fn list(&self) -> std::io::Result<Vec<ArchiveEntry>> {
        let dirs = match std::fs::read_dir(&self.root) {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries: Vec<ArchiveEntry> = dirs
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .filter_map(|dir| match read_metadata(&dir) {
                Ok(metadata) => Some(ArchiveEntry { dir, metadata }),
                Err(e) => {
                    debug!("Skipping archive entry {}: {}", dir.display(), e);
                    None
                }
            })
            .collect();

        entries.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        Ok(entries)
    }
}

fn read_metadata(dir: &Path) -> anyhow::Result<TranscriptionMetadata> {
    let content = std::fs::read_to_string(dir.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(file_id: &str, timestamp: &str) -> TranscriptionMetadata {
        TranscriptionMetadata {
            file_id: file_id.to_string(),
            file_name: "talk.wav".to_string(),
            model: "base".to_string(),
            language: "en".to_string(),
            device: Device::Cpu,
            precision: Precision::Int8,
            speaker_detection: false,
            speaker_count: None,
            timestamp: timestamp.to_string(),
            audio_duration_secs: 12.5,
            segments: 3,
        }
    }

    fn store(archive: &Archive, metadata: &TranscriptionMetadata) {
        let dir = archive.job_dir(&metadata.file_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string_pretty(metadata).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn lists_newest_first_and_skips_broken_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = Archive::new(tmp.path());
        store(&archive, &metadata("old", "2024-01-01 09-00-00"));
        store(&archive, &metadata("new", "2024-03-01 09-00-00"));
        std::fs::create_dir_all(archive.job_dir("half-written")).unwrap();

        let entries = archive.list().unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.metadata.file_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn missing_outputs_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = Archive::new(tmp.path().join("nothing-yet"));
        assert!(archive.list().unwrap().is_empty());
    }

    #[test]
    fn same_second_jobs_get_separate_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = Archive::new(tmp.path().join("out"));
        let id = "2026-10-19 09-00-00 talk";

        let first = archive.reserve(id, "2026-10-19 09-00-00 talk aaaa1111").unwrap();
        let second = archive.reserve(id, "2026-10-19 09-00-00 talk bbbb2222").unwrap();

        assert_eq!(first, id);
        assert_eq!(second, "2026-10-19 09-00-00 talk bbbb2222");
        assert!(archive.job_dir(&first).is_dir());
        assert!(archive.job_dir(&second).is_dir());
        assert!(archive.reserve(id, &second).is_err());
    }
}
