//! Content-hashed artifact persistence.
//!
//! Each store owns one directory (normally a run directory). Identifiers are
//! `<sequence>_<label>`, drawn from an atomic counter, so concurrent scenarios
//! sharing a store never collide. Files are created with `create_new` and are
//! never overwritten; a number already taken on disk (a reused output
//! directory) is skipped.

use chrono::{SubsecRound, Utc};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::hash::content_hash;
use super::types::{Artifact, ArtifactId, ContentHash, StoreError, StoreResult};

/// File listing every artifact of the store
pub const MANIFEST_FILE: &str = "artifacts.json";

/// Where an artifact comes from
#[derive(Debug, Clone, Copy, Default)]
pub struct Provenance<'a> {
    pub scenario: Option<&'a str>,
    pub diagnostic: bool,
}

#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    next_seq: AtomicU64,
    artifacts: Mutex<Vec<Artifact>>,
    write_sidecars: bool,
}

impl ArtifactStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self {
            dir,
            next_seq: AtomicU64::new(1),
            artifacts: Mutex::new(Vec::new()),
            write_sidecars: true,
        })
    }

    /// Whether to write a `<id>.json` metadata file next to each image
    pub fn with_sidecars(mut self, enabled: bool) -> Self {
        self.write_sidecars = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `bytes` under a fresh identifier and return the artifact
    pub fn save(&self, bytes: &[u8], label: &str) -> StoreResult<Artifact> {
        self.save_with(bytes, label, Provenance::default())
    }

    pub fn save_with(
        &self,
        bytes: &[u8],
        label: &str,
        provenance: Provenance<'_>,
    ) -> StoreResult<Artifact> {
        let label_part = sanitize_label(label);
        let (id, path, mut file) = loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let id = ArtifactId::new(format!("{:04}_{}", seq, label_part));
            let path = self.dir.join(format!("{}.png", id));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (id, path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "identifier taken on disk, skipping");
                }
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        };
        file.write_all(bytes).map_err(|e| StoreError::io(&path, e))?;

        let artifact = Artifact {
            id,
            label: label.to_string(),
            scenario: provenance.scenario.map(str::to_string),
            path,
            content_hash: content_hash(bytes),
            size_bytes: bytes.len() as u64,
            diagnostic: provenance.diagnostic,
            // sidecars keep milliseconds only
            captured_at: Utc::now().trunc_subsecs(3),
        };

        if self.write_sidecars {
            let sidecar = artifact.path.with_extension("json");
            let json = serde_json::to_string_pretty(&artifact)?;
            fs::write(&sidecar, json).map_err(|e| StoreError::io(&sidecar, e))?;
        }

        debug!(id = %artifact.id, hash = artifact.content_hash.short(), bytes = artifact.size_bytes, "artifact saved");
        self.artifacts.lock().push(artifact.clone());
        Ok(artifact)
    }

    /// Hash recorded for a saved artifact; no I/O
    pub fn hash_of(&self, id: &ArtifactId) -> Option<ContentHash> {
        self.artifacts
            .lock()
            .iter()
            .find(|a| &a.id == id)
            .map(|a| a.content_hash.clone())
    }

    /// Read back the bytes of a saved artifact
    pub fn read(&self, id: &ArtifactId) -> StoreResult<Vec<u8>> {
        let path = self
            .artifacts
            .lock()
            .iter()
            .find(|a| &a.id == id)
            .map(|a| a.path.clone())
            .ok_or_else(|| StoreError::UnknownArtifact(id.clone()))?;
        fs::read(&path).map_err(|e| StoreError::io(&path, e))
    }

    /// All artifacts in save order
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the list of artifacts to [`MANIFEST_FILE`]
    pub fn write_manifest(&self) -> StoreResult<PathBuf> {
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&self.artifacts())?;
        fs::write(&path, json).map_err(|e| StoreError::io(&path, e))?;
        Ok(path)
    }
}

/// Sanitize a label for use in filenames
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "capture".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let artifact = store.save(b"png-bytes", "batch grade").unwrap();
        assert_eq!(artifact.id.as_str(), "0001_batch_grade");
        assert_eq!(artifact.label, "batch grade");
        assert!(artifact.path.exists());
        assert!(artifact.path.with_extension("json").exists());
        assert_eq!(store.read(&artifact.id).unwrap(), b"png-bytes");
        assert_eq!(store.hash_of(&artifact.id), Some(content_hash(b"png-bytes")));
    }

    #[test]
    fn test_repeated_labels_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let a = store.save(b"one", "same").unwrap();
        let b = store.save(b"two", "same").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.read(&a.id).unwrap(), b"one");
        assert_eq!(store.read(&b.id).unwrap(), b"two");
    }

    #[test]
    fn test_identical_bytes_share_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap().with_sidecars(false);

        let a = store.save(b"same", "first").unwrap();
        let b = store.save(b"same", "second").unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert!(!a.path.with_extension("json").exists());
    }

    #[test]
    fn test_concurrent_saves_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| store.save(format!("{}-{}", t, i).as_bytes(), "shot").unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<ArtifactId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(store.len(), 200);
    }

    #[test]
    fn test_unknown_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let err = store.read(&ArtifactId::new("9999_missing")).unwrap_err();
        assert!(matches!(err, StoreError::UnknownArtifact(_)));
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("hello world"), "hello_world");
        assert_eq!(sanitize_label("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_label("채점"), "__");
        assert_eq!(sanitize_label(""), "capture");
    }

    #[test]
    fn test_manifest_lists_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        store.save(b"x", "one").unwrap();
        let path = store.write_manifest().unwrap();
        let listed: Vec<Artifact> =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(listed, store.artifacts());
    }

    #[test]
    fn test_sidecar_round_trips_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let artifact = store.save(b"x", "one").unwrap();

        let sidecar = fs::read_to_string(artifact.path.with_extension("json")).unwrap();
        let read_back: Artifact = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(read_back.captured_at, artifact.captured_at);
        assert_eq!(read_back, artifact);
    }

    #[test]
    fn test_reused_directory_skips_taken_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0001_home.png"), b"earlier run").unwrap();
        fs::write(dir.path().join("0002_home.png"), b"earlier run").unwrap();

        let store = ArtifactStore::open(dir.path()).unwrap();
        let artifact = store.save(b"this run", "home").unwrap();

        assert_eq!(artifact.id.as_str(), "0003_home");
        assert_eq!(fs::read(dir.path().join("0001_home.png")).unwrap(), b"earlier run");
        assert_eq!(store.read(&artifact.id).unwrap(), b"this run");
        assert_eq!(store.len(), 1);
    }
}
