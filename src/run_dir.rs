//! Run directory management.
//!
//! Every harness run gets its own directory under the artifact base:
//! - Unique `run_<timestamp>_<short-uuid>` ids, so runs never share files
//! - `.run.json` metadata written at init
//! - Listing and age-based cleanup of old runs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Metadata file written into each run directory
pub const RUN_METADATA_FILE: &str = ".run.json";

/// Final report file written into each run directory
pub const REPORT_FILE: &str = "report.json";

/// A single harness run's output directory
#[derive(Debug, Clone)]
pub struct RunDir {
    /// Unique run ID
    pub id: String,
    /// Root directory for this run
    pub dir: PathBuf,
}

/// Contents of `.run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub id: String,
    pub created: String,
    pub base_url: String,
    pub backend: String,
    pub scenarios: Vec<String>,
}

impl RunDir {
    /// Allocate a new run under `base`
    pub fn new(base: impl AsRef<Path>) -> Self {
        let id = generate_run_id();
        let dir = base.as_ref().join(&id);
        Self { id, dir }
    }

    /// Use an explicit directory (e.g. `--output`)
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_run_id);
        Self { id, dir }
    }

    /// Create the directory and write run metadata
    pub fn init(&self, base_url: &str, backend: &str, scenarios: &[String]) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = RunMetadata {
            id: self.id.clone(),
            created: chrono::Utc::now().to_rfc3339(),
            base_url: base_url.to_string(),
            backend: backend.to_string(),
            scenarios: scenarios.to_vec(),
        };
        fs::write(
            self.dir.join(RUN_METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(REPORT_FILE)
    }

    /// List all PNG files in the run
    pub fn list_captures(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "png") {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }
}

fn generate_run_id() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", timestamp, &suffix[..8])
}

/// Summary line for `runs list`
#[derive(Debug, Clone)]
pub struct RunEntry {
    pub dir: PathBuf,
    pub metadata: Option<RunMetadata>,
    pub has_report: bool,
}

/// List all runs under `base`, oldest first
pub fn list_runs(base: &Path) -> std::io::Result<Vec<RunEntry>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let metadata = fs::read_to_string(path.join(RUN_METADATA_FILE))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok());
        let has_report = path.join(REPORT_FILE).exists();
        runs.push(RunEntry {
            dir: path,
            metadata,
            has_report,
        });
    }
    runs.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(runs)
}

/// Remove run directories older than `max_age`
pub fn cleanup_old_runs(base: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !path.join(RUN_METADATA_FILE).exists() {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_dir_all(&path).is_ok() {
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        let base = tempfile::tempdir().unwrap();
        let a = RunDir::new(base.path());
        let b = RunDir::new(base.path());
        assert!(a.id.starts_with("run_"));
        assert_ne!(a.id, b.id);
        assert!(a.dir.starts_with(base.path()));
    }

    #[test]
    fn test_init_writes_metadata() {
        let base = tempfile::tempdir().unwrap();
        let run = RunDir::new(base.path());
        run.init("http://localhost:3001", "mock", &["home_navigation".to_string()])
            .unwrap();

        let raw = fs::read_to_string(run.dir.join(RUN_METADATA_FILE)).unwrap();
        let metadata: RunMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(metadata.id, run.id);
        assert_eq!(metadata.backend, "mock");
        assert_eq!(metadata.scenarios, vec!["home_navigation"]);
    }

    #[test]
    fn test_list_runs() {
        let base = tempfile::tempdir().unwrap();
        assert!(list_runs(&base.path().join("absent")).unwrap().is_empty());

        let run = RunDir::new(base.path());
        run.init("http://x", "mock", &[]).unwrap();
        fs::write(run.report_path(), "{}").unwrap();

        let runs = list_runs(base.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].has_report);
        assert_eq!(runs[0].metadata.as_ref().map(|m| m.id.as_str()), Some(run.id.as_str()));
    }

    #[test]
    fn test_cleanup_keeps_recent_runs() {
        let base = tempfile::tempdir().unwrap();
        let run = RunDir::new(base.path());
        run.init("http://x", "mock", &[]).unwrap();

        assert_eq!(cleanup_old_runs(base.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert!(run.dir.exists());
    }

    #[test]
    fn test_run_at_explicit_dir() {
        let base = tempfile::tempdir().unwrap();
        let run = RunDir::at(base.path().join("nightly"));
        assert_eq!(run.id, "nightly");
    }
}
