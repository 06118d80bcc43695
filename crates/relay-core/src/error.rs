//! Error types for the ledger core
//!
//! Provides:
//! - `LedgerError` for every store and protocol failure
//! - `StorageError` for backend I/O and corruption
//! - `ConfigError` for configuration loading

use crate::types::{LedgerState, TaskId, UnmetCriterion};
use std::path::PathBuf;

/// Main ledger error type
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Task has no ledger
    #[error("unknown task: {task_id}")]
    UnknownTask { task_id: TaskId },

    /// Transition not in the status table
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: LedgerState, to: LedgerState },

    /// Mutation attempted after completion
    #[error("task {task_id} is complete and accepts no further changes")]
    TerminalState { task_id: TaskId },

    /// Completion requested with unmet criteria
    #[error("task {task_id} has unmet criteria: {}", format_unmet(.unmet))]
    CriteriaNotMet {
        task_id: TaskId,
        unmet: Vec<UnmetCriterion>,
    },

    /// Activation requested before any criterion was defined
    #[error("task {task_id} has no completion criteria defined")]
    NoCriteria { task_id: TaskId },

    /// Block requested without a preceding blocked contribution
    #[error("task {task_id} cannot block: latest contribution is not a blocked declaration")]
    MissingBlockingContribution { task_id: TaskId },

    /// Criterion key already defined
    #[error("criterion already defined: {key}")]
    DuplicateCriterion { key: String },

    /// Work item id already declared
    #[error("work item already declared: {item_id}")]
    DuplicateWorkItem { item_id: String },

    /// Work item rejected at declaration
    #[error("invalid work item {item_id}: {reason}")]
    InvalidWorkItem { item_id: String, reason: String },

    /// Open question not present
    #[error("no such open question: {question}")]
    UnknownQuestion { question: String },

    /// Task id rejected
    #[error("invalid task id {raw:?}: {reason}")]
    InvalidTaskId { raw: String, reason: String },

    /// Bounded wait for the task lock expired
    #[error("timed out after {waited_ms}ms waiting for task {task_id}")]
    LockTimeout { task_id: TaskId, waited_ms: u64 },

    /// Backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Check if the caller may reasonably retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::Storage(StorageError::Io(_))
        )
    }

    /// Check if the error is a protocol rejection rather than a failure
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::TerminalState { .. }
                | Self::CriteriaNotMet { .. }
                | Self::NoCriteria { .. }
                | Self::MissingBlockingContribution { .. }
        )
    }
}

fn format_unmet(unmet: &[UnmetCriterion]) -> String {
    unmet
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Backend storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("I/O failure")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded or decoded
    #[error("serialization failure")]
    Serialization(#[from] serde_json::Error),

    /// Document decoded but failed integrity checks
    #[error("ledger for {task_id} is corrupted: {reason}")]
    Corrupted { task_id: String, reason: String },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file not valid TOML for the schema
    #[error("cannot parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
