//! Non-durable backend for tests and embedding

use super::backend::LedgerBackend;
use crate::error::StorageError;
use crate::types::{Ledger, TaskId};
use dashmap::DashMap;

/// Keeps ledgers in a concurrent map
#[derive(Debug, Default)]
pub struct MemoryBackend {
    ledgers: DashMap<TaskId, Ledger>,
}

impl MemoryBackend {
    /// Create empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ledgers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    /// Whether nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }
}

#[async_trait::async_trait]
impl LedgerBackend for MemoryBackend {
    async fn load(&self, task_id: &TaskId) -> Result<Option<Ledger>, StorageError> {
        Ok(self.ledgers.get(task_id).map(|l| l.clone()))
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), StorageError> {
        self.ledgers.insert(ledger.task_id.clone(), ledger.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TaskId>, StorageError> {
        Ok(self.ledgers.iter().map(|e| e.key().clone()).collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
