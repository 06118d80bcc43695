//! One JSON document per task in a directory
//!
//! Documents live at `<dir>/<sha256(task_id)>.json` so arbitrary task ids map
//! to safe file names. Saves go to a uniquely named temp file in the same
//! directory, are fsynced, then renamed over the target: a crash leaves the
//! old or the new document, never a torn one, and concurrent writers never
//! share a temp file.
//!
//! Each task also has a `<sha256(task_id)>.lock` file. Holding an exclusive
//! `flock` on it serializes load, mutate and save across every process that
//! opens the same directory.

use super::backend::{LedgerBackend, TaskLock};
use crate::error::StorageError;
use crate::integrity::verify_chain;
use crate::types::{Ledger, TaskId, FORMAT_VERSION};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// Directory-backed ledger storage
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a ledger directory
    ///
    /// # Errors
    /// `StorageError::Io` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "opened ledger directory");
        Ok(Self { dir })
    }

    /// Ledger directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `task_id`
    #[must_use]
    pub fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", stem(task_id)))
    }

    /// Path of the lock file for `task_id`
    #[must_use]
    pub fn lock_path_for(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.{LOCK_EXTENSION}", stem(task_id)))
    }

    async fn read_document(path: &Path) -> Result<Option<Ledger>, StorageError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let ledger: Ledger =
            serde_json::from_slice(&raw).map_err(|e| StorageError::Corrupted {
                task_id: path.display().to_string(),
                reason: format!("undecodable document: {e}"),
            })?;

        check_document(&ledger)?;
        Ok(Some(ledger))
    }
}

fn stem(task_id: &TaskId) -> String {
    hex::encode(Sha256::digest(task_id.as_str().as_bytes()))
}

fn check_document(ledger: &Ledger) -> Result<(), StorageError> {
    if ledger.format_version > FORMAT_VERSION {
        return Err(StorageError::Corrupted {
            task_id: ledger.task_id.to_string(),
            reason: format!(
                "format version {} is newer than supported {FORMAT_VERSION}",
                ledger.format_version
            ),
        });
    }

    verify_chain(&ledger.contributions).map_err(|b| StorageError::Corrupted {
        task_id: ledger.task_id.to_string(),
        reason: format!("contribution {}: {}", b.index, b.reason),
    })
}

#[async_trait::async_trait]
impl LedgerBackend for FileBackend {
    async fn load(&self, task_id: &TaskId) -> Result<Option<Ledger>, StorageError> {
        let path = self.path_for(task_id);
        let ledger = Self::read_document(&path).await?;

        if let Some(ledger) = &ledger {
            if &ledger.task_id != task_id {
                return Err(StorageError::Corrupted {
                    task_id: task_id.to_string(),
                    reason: format!("document belongs to {}", ledger.task_id),
                });
            }
        }
        Ok(ledger)
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), StorageError> {
        let path = self.path_for(&ledger.task_id);
        let dir = self.dir.clone();
        let payload = serde_json::to_vec_pretty(ledger)?;

        // the temp file is removed on drop if persist never happens
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&payload)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    async fn lock(&self, task_id: &TaskId) -> Result<TaskLock, StorageError> {
        let path = self.lock_path_for(task_id);

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(TaskLock::held(file))
    }

    async fn list(&self) -> Result<Vec<TaskId>, StorageError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match Self::read_document(&path).await {
                Ok(Some(ledger)) => ids.push(ledger.task_id),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable ledger"
                    );
                }
            }
        }
        Ok(ids)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::seal;
    use crate::types::{ContributionStatus, NewContribution};
    use chrono::Utc;

    #[tokio::test]
    async fn round_trip_preserves_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();

        let id = TaskId::parse("T1").unwrap();
        let mut ledger = Ledger::new(id.clone());
        let c = seal(
            &ledger.contributions,
            NewContribution::new("analyst", ContributionStatus::Complete).with_findings("ok"),
            Utc::now(),
        );
        ledger.contributions.push(c);
        ledger.next_steps = vec!["review".into()];

        backend.save(&ledger).await.unwrap();
        let loaded = backend.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, ledger);
        assert_eq!(backend.list().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        let id = TaskId::parse("nope").unwrap();
        assert!(backend.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tampered_document_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();

        let id = TaskId::parse("T1").unwrap();
        let mut ledger = Ledger::new(id.clone());
        let c = seal(
            &ledger.contributions,
            NewContribution::new("analyst", ContributionStatus::Complete).with_findings("ok"),
            Utc::now(),
        );
        ledger.contributions.push(c);
        backend.save(&ledger).await.unwrap();

        let path = backend.path_for(&id);
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("\"ok\"", "\"edited\"")).unwrap();

        assert!(matches!(
            backend.load(&id).await,
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn garbage_document_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        let id = TaskId::parse("T1").unwrap();
        std::fs::write(backend.path_for(&id), b"{ not json").unwrap();

        assert!(matches!(
            backend.load(&id).await,
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_task_id_in_document_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        let id = TaskId::parse("T1").unwrap();
        backend.save(&Ledger::new(id.clone())).await.unwrap();

        let path = backend.path_for(&id);
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("\"task_id\": \"T1\"", "\"task_id\": \"\"")).unwrap();

        assert!(matches!(
            backend.load(&id).await,
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn task_lock_excludes_other_openers() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        let id = TaskId::parse("T1").unwrap();

        let held = backend.lock(&id).await.unwrap();
        assert!(held.is_held());

        let other = std::fs::File::open(backend.lock_path_for(&id)).unwrap();
        assert!(FileExt::try_lock_exclusive(&other).is_err());

        drop(held);
        FileExt::try_lock_exclusive(&other).unwrap();
    }

    #[tokio::test]
    async fn saves_leave_only_documents_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        let id = TaskId::parse("T1").unwrap();

        let _lock = backend.lock(&id).await.unwrap();
        for _ in 0..3 {
            backend.save(&Ledger::new(id.clone())).await.unwrap();
        }

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let stem = stem(&id);
        assert_eq!(names, vec![format!("{stem}.json"), format!("{stem}.lock")]);
        assert_eq!(backend.list().await.unwrap(), vec![id]);
    }
}
