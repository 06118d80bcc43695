//! Persistence seam for the ledger store

use crate::error::StorageError;
use crate::types::{Ledger, TaskId};
use fs2::FileExt;
use std::fs::File;

/// Durable storage for ledger documents
///
/// Within one process the store serializes calls per task. Backends whose
/// storage can be shared by several processes also implement [`lock`]
/// so that load, mutate and save stay serialized across all of them.
///
/// [`lock`]: LedgerBackend::lock
#[async_trait::async_trait]
pub trait LedgerBackend: Send + Sync + std::fmt::Debug {
    /// Load a ledger, `None` if the task was never saved
    async fn load(&self, task_id: &TaskId) -> Result<Option<Ledger>, StorageError>;

    /// Replace the stored ledger atomically
    async fn save(&self, ledger: &Ledger) -> Result<(), StorageError>;

    /// Every task with a stored ledger
    async fn list(&self) -> Result<Vec<TaskId>, StorageError>;

    /// Exclusive hold on `task_id` against other users of the same storage
    ///
    /// Storage private to this process needs none.
    async fn lock(&self, _task_id: &TaskId) -> Result<TaskLock, StorageError> {
        Ok(TaskLock::unheld())
    }

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Cross-process hold on one task, released on drop
#[derive(Debug, Default)]
pub struct TaskLock {
    file: Option<File>,
}

impl TaskLock {
    /// Lock that guards nothing
    #[inline]
    #[must_use]
    pub fn unheld() -> Self {
        Self::default()
    }

    /// Wrap a file already locked with `lock_exclusive`
    #[inline]
    #[must_use]
    pub fn held(file: File) -> Self {
        Self { file: Some(file) }
    }

    /// Whether an OS lock is held
    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            // closing the descriptor releases it too
            let _ = FileExt::unlock(file);
        }
    }
}
