//! Checkpoint persistence: the accumulated results and rendered dialogue,
//! rewritten in full after every window.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::domain::error::{ConvolabError, Result};
use crate::domain::result::UnitResult;
use crate::summary::{render_results_csv, BatchSummary};

pub const RESULTS_FILE: &str = "results.json";
pub const DIALOGUE_FILE: &str = "dialogue.txt";
pub const RESULTS_CSV_FILE: &str = "results.csv";
pub const SCHEMA_VERSION: &str = "1.0";

/// Destination for checkpoints. Each call replaces the previous checkpoint.
pub trait CheckpointSink: Send + Sync {
    fn write(&self, results: &[UnitResult], dialogue: &str) -> Result<()>;

    /// Where checkpoints land, for log lines.
    fn location(&self) -> String {
        "-".to_string()
    }
}

/// Persisted form of `results.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchArtifact {
    pub schema_version: String,
    pub batch_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub design_digest: String,
    pub summary: BatchSummary,
    pub results: Vec<UnitResult>,
}

/// Writes checkpoints into a directory.
#[derive(Debug, Clone)]
pub struct FsCheckpoint {
    dir: PathBuf,
    batch_id: Uuid,
    design_digest: String,
}

impl FsCheckpoint {
    /// Create the output directory if needed.
    pub fn create(dir: impl Into<PathBuf>, design_digest: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| ConvolabError::Checkpoint(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            batch_id: Uuid::new_v4(),
            design_digest: design_digest.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn dialogue_path(&self) -> PathBuf {
        self.dir.join(DIALOGUE_FILE)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(RESULTS_CSV_FILE)
    }

    fn artifact(&self, results: &[UnitResult]) -> BatchArtifact {
        BatchArtifact {
            schema_version: SCHEMA_VERSION.to_string(),
            batch_id: self.batch_id,
            generated_at: Utc::now(),
            design_digest: self.design_digest.clone(),
            summary: BatchSummary::from_results(results),
            results: results.to_vec(),
        }
    }
}

impl CheckpointSink for FsCheckpoint {
    fn write(&self, results: &[UnitResult], dialogue: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.artifact(results))?;
        write_atomic(&self.results_path(), json.as_bytes())?;
        write_atomic(&self.csv_path(), render_results_csv(results).as_bytes())?;
        write_atomic(&self.dialogue_path(), dialogue.as_bytes())?;
        Ok(())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Write to a temp file in the target's directory, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let fail = |e: std::io::Error| ConvolabError::Checkpoint(format!("write {}: {e}", path.display()));

    let mut tmp = NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

/// Read a `results.json` checkpoint back.
pub fn load_results(path: &Path) -> Result<BatchArtifact> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConvolabError::Config {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| ConvolabError::Config {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::{CompletionOutcome, PartialHandle, UnitHandle};
    use crate::domain::spec::UnitKey;

    fn key(size: u32) -> UnitKey {
        UnitKey {
            behavior: "silent".into(),
            group_size: size,
            scenario_id: None,
        }
    }

    fn ok(size: u32) -> UnitResult {
        let handle = UnitHandle {
            experiment_id: format!("exp-{size}"),
            cohort_id: "c".into(),
        };
        UnitResult::success(key(size), &handle, CompletionOutcome::NotAwaited, vec![], None)
    }

    #[test]
    fn test_checkpoint_overwrites_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsCheckpoint::create(dir.path().join("out"), "digest").unwrap();

        sink.write(&[ok(1)], "first\n").unwrap();
        sink.write(
            &[ok(1), UnitResult::failed(key(2), "500 boom".into(), PartialHandle::default())],
            "second\n",
        )
        .unwrap();

        let artifact = load_results(&sink.results_path()).unwrap();
        assert_eq!(artifact.results.len(), 2);
        assert_eq!(artifact.summary.failed, 1);
        assert_eq!(artifact.design_digest, "digest");
        assert_eq!(artifact.batch_id, sink.batch_id());
        assert_eq!(artifact.schema_version, SCHEMA_VERSION);
        assert_eq!(std::fs::read_to_string(sink.dialogue_path()).unwrap(), "second\n");
        let csv = std::fs::read_to_string(sink.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.lines().nth(2).unwrap().starts_with("silent,2,,error,"));
    }

    #[test]
    fn test_checkpoint_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsCheckpoint::create(dir.path(), "d").unwrap();
        sink.write(&[ok(1)], "").unwrap();
        sink.write(&[ok(1)], "").unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                DIALOGUE_FILE.to_string(),
                RESULTS_CSV_FILE.to_string(),
                RESULTS_FILE.to_string()
            ]
        );
    }

    #[test]
    fn test_write_into_removed_directory_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("gone");
        let sink = FsCheckpoint::create(&out, "d").unwrap();
        std::fs::remove_dir_all(&out).unwrap();

        let err = sink.write(&[ok(1)], "").unwrap_err();
        assert!(matches!(err, ConvolabError::Checkpoint(_)));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_results(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConvolabError::Config { .. }));
    }
}
