//! Ledger store
//!
//! Owns one ledger per task and serializes every mutation per task:
//! - each task id maps to its own async mutex, so different tasks never
//!   contend with each other
//! - the backend's task lock extends that exclusion to other processes
//!   sharing the same storage
//! - every mutation reloads the ledger under both locks, applies the change
//!   to that copy and persists it; a failed save changes nothing
//! - reads wait a bounded time for an in-flight mutation in this process
//!
//! Nothing is cached between calls. A task's mutex exists only while some
//! call holds or awaits it.

mod backend;
mod file;
mod memory;

pub use backend::{LedgerBackend, TaskLock};
pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::config::StoreConfig;
use crate::error::{LedgerError, StorageError};
use crate::integrity::seal;
use crate::state_machine::validate_transition;
use crate::types::{
    Contribution, ContributionStatus, Criterion, Ledger, LedgerState, NewContribution, TaskId,
    WorkItem,
};
use crate::verifier::CriterionOutcome;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default bounded wait for `read`
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type Slot = Arc<Mutex<()>>;

/// Exclusion over one task; the slot is dropped from the map on release
/// unless another call still holds it
struct TaskGuard<'a> {
    store: &'a LedgerStore,
    task_id: &'a TaskId,
    held: Option<(OwnedMutexGuard<()>, TaskLock)>,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.store.forget(self.task_id);
    }
}

/// Keyed ledger store with per-task mutual exclusion
#[derive(Debug)]
pub struct LedgerStore {
    backend: Arc<dyn LedgerBackend>,
    slots: DashMap<TaskId, Slot>,
    lock_timeout: Duration,
}

impl LedgerStore {
    /// Create store over a backend
    #[must_use]
    pub fn new(backend: impl LedgerBackend + 'static) -> Self {
        Self::with_backend(Arc::new(backend))
    }

    /// Create store over a shared backend
    #[must_use]
    pub fn with_backend(backend: Arc<dyn LedgerBackend>) -> Self {
        Self {
            backend,
            slots: DashMap::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Non-durable store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Directory-backed store as described by `config`
    ///
    /// # Errors
    /// `StorageError::Io` if the data directory cannot be created.
    pub async fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        let backend = FileBackend::open(&config.data_dir).await?;
        Ok(Self::new(backend).with_lock_timeout(config.lock_timeout()))
    }

    /// With bounded read wait
    #[inline]
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Backend in use
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &dyn LedgerBackend {
        self.backend.as_ref()
    }

    /// Existing ledger, or a fresh one in `Planning`
    ///
    /// # Errors
    /// `Storage` if the backend fails.
    pub async fn get_or_create(&self, task_id: &TaskId) -> Result<Ledger, LedgerError> {
        let _guard = self.lock_task(task_id, true).await?;
        if let Some(ledger) = self.backend.load(task_id).await? {
            return Ok(ledger);
        }

        let ledger = Ledger::new(task_id.clone());
        self.backend.save(&ledger).await?;
        tracing::info!(task_id = %task_id, backend = self.backend.name(), "created ledger");
        Ok(ledger)
    }

    /// Consistent snapshot of a ledger
    ///
    /// # Errors
    /// - `UnknownTask` if the task has no ledger
    /// - `LockTimeout` if a mutation holds the task longer than the bounded wait
    pub async fn read(&self, task_id: &TaskId) -> Result<Ledger, LedgerError> {
        // documents are replaced atomically, so the process-local lock suffices
        let _guard = tokio::time::timeout(self.lock_timeout, self.lock_task(task_id, false))
            .await
            .map_err(|_| LedgerError::LockTimeout {
                task_id: task_id.clone(),
                waited_ms: u64::try_from(self.lock_timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        tracing::debug!(task_id = %task_id, "read ledger");
        self.backend
            .load(task_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownTask {
                task_id: task_id.clone(),
            })
    }

    /// Append a contribution and return it as committed
    ///
    /// # Errors
    /// `UnknownTask`, `TerminalState`, or `Storage`.
    pub async fn append_contribution(
        &self,
        task_id: &TaskId,
        contribution: NewContribution,
    ) -> Result<Contribution, LedgerError> {
        let committed = self
            .mutate(task_id, |ledger| {
                let sealed = seal(&ledger.contributions, contribution, Utc::now());
                ledger.contributions.push(sealed.clone());
                Ok(sealed)
            })
            .await?;

        tracing::info!(
            task_id = %task_id,
            worker = %committed.worker_name,
            sequence = committed.sequence,
            status = %committed.declared_status,
            "appended contribution"
        );
        Ok(committed)
    }

    /// Move the ledger to `to` if the status protocol allows it
    ///
    /// # Errors
    /// `UnknownTask`, `Storage`, or any error of
    /// [`validate_transition`](crate::state_machine::validate_transition).
    pub async fn update_state(
        &self,
        task_id: &TaskId,
        to: LedgerState,
    ) -> Result<Ledger, LedgerError> {
        self.mutate(task_id, |ledger| {
            validate_transition(ledger, to)?;
            tracing::info!(task_id = %task_id, from = %ledger.state, to = %to, "state transition");
            ledger.state = to;
            Ok(ledger.clone())
        })
        .await
    }

    /// Append a blocked declaration and move to `Blocked` in one step
    ///
    /// # Errors
    /// `MissingBlockingContribution` if `contribution` is not declared
    /// blocked, plus the errors of `update_state`.
    pub async fn block(
        &self,
        task_id: &TaskId,
        contribution: NewContribution,
    ) -> Result<Contribution, LedgerError> {
        if contribution.declared_status != ContributionStatus::Blocked {
            return Err(LedgerError::MissingBlockingContribution {
                task_id: task_id.clone(),
            });
        }

        self.mutate(task_id, |ledger| {
            let sealed = seal(&ledger.contributions, contribution, Utc::now());
            ledger.contributions.push(sealed.clone());
            validate_transition(ledger, LedgerState::Blocked)?;
            tracing::info!(
                task_id = %task_id,
                from = %ledger.state,
                worker = %sealed.worker_name,
                "blocked"
            );
            ledger.state = LedgerState::Blocked;
            Ok(sealed)
        })
        .await
    }

    /// Define a completion criterion; it always starts `pending`
    ///
    /// # Errors
    /// `DuplicateCriterion`, `UnknownTask`, `TerminalState`, or `Storage`.
    pub async fn add_criterion(
        &self,
        task_id: &TaskId,
        mut criterion: Criterion,
    ) -> Result<(), LedgerError> {
        criterion.reset_verification();
        self.mutate(task_id, |ledger| {
            if ledger.completion_criteria.contains_key(&criterion.key) {
                return Err(LedgerError::DuplicateCriterion { key: criterion.key });
            }
            tracing::info!(task_id = %task_id, key = %criterion.key, "added criterion");
            ledger
                .completion_criteria
                .insert(criterion.key.clone(), criterion);
            Ok(())
        })
        .await
    }

    /// Declare a work item for the handoff queue
    ///
    /// # Errors
    /// `InvalidWorkItem` for an empty id or a self-dependency,
    /// `DuplicateWorkItem`, `UnknownTask`, `TerminalState`, or `Storage`.
    pub async fn declare_item(&self, task_id: &TaskId, item: WorkItem) -> Result<(), LedgerError> {
        if item.item_id.is_empty() {
            return Err(LedgerError::InvalidWorkItem {
                item_id: item.item_id,
                reason: "empty id".to_string(),
            });
        }
        if item.depends_on.contains(&item.item_id) {
            return Err(LedgerError::InvalidWorkItem {
                item_id: item.item_id,
                reason: "depends on itself".to_string(),
            });
        }

        self.mutate(task_id, |ledger| {
            if ledger.work_item(&item.item_id).is_some() {
                return Err(LedgerError::DuplicateWorkItem {
                    item_id: item.item_id,
                });
            }
            tracing::debug!(
                task_id = %task_id,
                item = %item.item_id,
                deps = item.depends_on.len(),
                "declared work item"
            );
            ledger.work_items.push(item);
            Ok(())
        })
        .await
    }

    /// Replace the next steps
    ///
    /// # Errors
    /// `UnknownTask`, `TerminalState`, or `Storage`.
    pub async fn set_next_steps(
        &self,
        task_id: &TaskId,
        steps: Vec<String>,
    ) -> Result<(), LedgerError> {
        self.mutate(task_id, |ledger| {
            ledger.next_steps = steps;
            Ok(())
        })
        .await
    }

    /// Record an open question; `false` if it was already open
    ///
    /// # Errors
    /// `UnknownTask`, `TerminalState`, or `Storage`.
    pub async fn add_open_question(
        &self,
        task_id: &TaskId,
        question: impl Into<String>,
    ) -> Result<bool, LedgerError> {
        let question = question.into();
        self.mutate(task_id, |ledger| {
            if ledger.open_questions.contains(&question) {
                return Ok(false);
            }
            ledger.open_questions.push(question);
            Ok(true)
        })
        .await
    }

    /// Remove an open question
    ///
    /// # Errors
    /// `UnknownQuestion` if it is not open, `UnknownTask`, `TerminalState`,
    /// or `Storage`.
    pub async fn resolve_open_question(
        &self,
        task_id: &TaskId,
        question: &str,
    ) -> Result<(), LedgerError> {
        self.mutate(task_id, |ledger| {
            let idx = ledger
                .open_questions
                .iter()
                .position(|q| q == question)
                .ok_or_else(|| LedgerError::UnknownQuestion {
                    question: question.to_string(),
                })?;
            ledger.open_questions.remove(idx);
            Ok(())
        })
        .await
    }

    /// Every known task, sorted
    ///
    /// # Errors
    /// `Storage` if the backend cannot enumerate.
    pub async fn list(&self) -> Result<Vec<TaskId>, LedgerError> {
        let mut ids = self.backend.list().await?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Commit a verifier batch in one serialized step
    pub(crate) async fn record_verification(
        &self,
        task_id: &TaskId,
        outcomes: &[CriterionOutcome],
    ) -> Result<Ledger, LedgerError> {
        self.mutate(task_id, |ledger| {
            let checked_at = Utc::now();
            for outcome in outcomes {
                if let Some(criterion) = ledger.completion_criteria.get_mut(&outcome.key) {
                    criterion.status = outcome.status;
                    criterion.observed_value = outcome.observed_value;
                    criterion.last_error = outcome.error.clone();
                    criterion.last_checked = Some(checked_at);
                }
            }
            Ok(ledger.clone())
        })
        .await
    }

    fn slot(&self, task_id: &TaskId) -> Slot {
        self.slots.entry(task_id.clone()).or_default().clone()
    }

    /// Drop the slot if nothing but the map refers to it
    fn forget(&self, task_id: &TaskId) {
        self.slots.remove_if(task_id, |_, slot| Arc::strong_count(slot) == 1);
    }

    /// Take the task's mutex and, when `cross_process`, the backend's task lock
    async fn lock_task<'a>(
        &'a self,
        task_id: &'a TaskId,
        cross_process: bool,
    ) -> Result<TaskGuard<'a>, LedgerError> {
        let mut guard = TaskGuard {
            store: self,
            task_id,
            held: None,
        };
        let local = self.slot(task_id).lock_owned().await;
        let lock = if cross_process {
            self.backend.lock(task_id).await?
        } else {
            TaskLock::unheld()
        };
        guard.held = Some((local, lock));
        Ok(guard)
    }

    /// Reload the ledger, apply `f` to it and persist the result
    async fn mutate<F, R>(&self, task_id: &TaskId, f: F) -> Result<R, LedgerError>
    where
        F: FnOnce(&mut Ledger) -> Result<R, LedgerError>,
    {
        let _guard = self.lock_task(task_id, true).await?;
        let mut draft = self
            .backend
            .load(task_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownTask {
                task_id: task_id.clone(),
            })?;

        if draft.is_closed() {
            return Err(LedgerError::TerminalState {
                task_id: task_id.clone(),
            });
        }

        let result = f(&mut draft)?;
        draft.updated_at = Utc::now();

        self.backend.save(&draft).await?;
        Ok(result)
    }
}
