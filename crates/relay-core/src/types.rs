//! Core types for the task ledger
//!
//! Defines the persisted document and everything inside it:
//! - Task identifiers
//! - Ledger state and the ledger document itself
//! - Contributions (append-only worker records)
//! - Completion criteria and their verification status
//! - Work items for the handoff queue
//!
//! Field names here are the on-disk layout. Renaming one is a format change.

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Current on-disk document version
pub const FORMAT_VERSION: u32 = 1;

/// Maximum task id length in bytes
pub const MAX_TASK_ID_LEN: usize = 256;

/// Opaque task identifier
///
/// Deserializing goes through [`TaskId::parse`], so a stored document
/// cannot smuggle in an id the constructor would reject.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Validate and wrap a task id
    ///
    /// # Errors
    /// `LedgerError::InvalidTaskId` if the id is empty, longer than
    /// [`MAX_TASK_ID_LEN`] bytes, or contains control characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, LedgerError> {
        let raw = raw.into();
        let reason = if raw.is_empty() {
            Some("task id is empty")
        } else if raw.len() > MAX_TASK_ID_LEN {
            Some("task id is too long")
        } else if raw.chars().any(char::is_control) {
            Some("task id contains control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(LedgerError::InvalidTaskId {
                raw,
                reason: reason.to_string(),
            }),
            None => Ok(Self(raw)),
        }
    }

    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = LedgerError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Lifecycle state of a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    /// Criteria and work items are being defined
    Planning,
    /// Workers are contributing
    Active,
    /// Waiting on an external unblock event
    Blocked,
    /// Terminal: every criterion met
    Complete,
}

impl LedgerState {
    /// All states, in lifecycle order
    pub const ALL: [LedgerState; 4] = [
        LedgerState::Planning,
        LedgerState::Active,
        LedgerState::Blocked,
        LedgerState::Complete,
    ];

    /// Whether no further transitions are accepted
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, LedgerState::Complete)
    }

    /// Lowercase name, as persisted
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerState::Planning => "planning",
            LedgerState::Active => "active",
            LedgerState::Blocked => "blocked",
            LedgerState::Complete => "complete",
        }
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "planning" => Ok(LedgerState::Planning),
            "active" => Ok(LedgerState::Active),
            "blocked" => Ok(LedgerState::Blocked),
            "complete" => Ok(LedgerState::Complete),
            other => Err(format!("unknown ledger state: {other}")),
        }
    }
}

/// Status a worker declares when it finishes a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    /// Work finished
    Complete,
    /// Worker cannot continue
    Blocked,
    /// Worker needs an answer before continuing
    NeedsInput,
}

impl ContributionStatus {
    /// Lowercase name, as persisted
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContributionStatus::Complete => "complete",
            ContributionStatus::Blocked => "blocked",
            ContributionStatus::NeedsInput => "needs_input",
        }
    }
}

impl fmt::Display for ContributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContributionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "complete" => Ok(ContributionStatus::Complete),
            "blocked" => Ok(ContributionStatus::Blocked),
            "needs_input" => Ok(ContributionStatus::NeedsInput),
            other => Err(format!("unknown contribution status: {other}")),
        }
    }
}

/// A worker's contribution before the store commits it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContribution {
    /// Name of the worker that produced it
    pub worker_name: String,
    /// Work item this contribution satisfies, if any
    pub item_id: Option<String>,
    /// Declared outcome
    pub declared_status: ContributionStatus,
    /// What the worker found
    pub findings: String,
    /// Notes for whoever picks the task up next
    pub handoff_notes: String,
}

impl NewContribution {
    /// Create new contribution
    #[inline]
    #[must_use]
    pub fn new(worker_name: impl Into<String>, declared_status: ContributionStatus) -> Self {
        Self {
            worker_name: worker_name.into(),
            item_id: None,
            declared_status,
            findings: String::new(),
            handoff_notes: String::new(),
        }
    }

    /// For a specific work item
    #[inline]
    #[must_use]
    pub fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// With findings
    #[inline]
    #[must_use]
    pub fn with_findings(mut self, findings: impl Into<String>) -> Self {
        self.findings = findings.into();
        self
    }

    /// With handoff notes
    #[inline]
    #[must_use]
    pub fn with_handoff_notes(mut self, notes: impl Into<String>) -> Self {
        self.handoff_notes = notes.into();
        self
    }
}

/// A committed contribution. Never edited after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// Position in the log, starting at 0
    pub sequence: u64,
    /// Name of the worker that produced it
    pub worker_name: String,
    /// Work item this contribution satisfies, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Commit time
    pub timestamp: DateTime<Utc>,
    /// Declared outcome
    pub declared_status: ContributionStatus,
    /// What the worker found
    pub findings: String,
    /// Notes for the next worker
    pub handoff_notes: String,
    /// Hash of the previous contribution (zeros for the first)
    pub prev_hash: String,
    /// Hash of this contribution
    pub hash: String,
}

impl Contribution {
    /// Work item this contribution counts towards
    ///
    /// Falls back to the worker name when no item is named.
    #[inline]
    #[must_use]
    pub fn satisfies(&self) -> &str {
        self.item_id.as_deref().unwrap_or(&self.worker_name)
    }
}

/// Comparison applied between an observed value and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `observed >= threshold`
    #[default]
    AtLeast,
    /// `observed <= threshold`
    AtMost,
    /// `observed == threshold`
    Exactly,
}

impl Direction {
    /// Whether `observed` satisfies `threshold` in this direction
    #[must_use]
    pub fn holds(self, observed: f64, threshold: f64) -> bool {
        match self {
            Direction::AtLeast => observed >= threshold,
            Direction::AtMost => observed <= threshold,
            Direction::Exactly => {
                (observed - threshold).abs() <= f64::EPSILON * threshold.abs().max(1.0)
            }
        }
    }

    /// Operator symbol
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Direction::AtLeast => ">=",
            Direction::AtMost => "<=",
            Direction::Exactly => "==",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">=" | "at_least" | "at-least" => Ok(Direction::AtLeast),
            "<=" | "at_most" | "at-most" => Ok(Direction::AtMost),
            "==" | "=" | "exactly" => Ok(Direction::Exactly),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Verification status of a criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    /// Not checked yet
    #[default]
    Pending,
    /// Check ran and the condition holds
    Met,
    /// Check ran and the condition does not hold
    Failed,
    /// Check could not be evaluated
    Error,
}

impl CriterionStatus {
    /// Lowercase name, as persisted
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CriterionStatus::Pending => "pending",
            CriterionStatus::Met => "met",
            CriterionStatus::Failed => "failed",
            CriterionStatus::Error => "error",
        }
    }
}

impl fmt::Display for CriterionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine-checkable completion condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Unique key within the ledger
    pub key: String,
    /// Human-readable description
    pub description: String,
    /// Opaque pointer to the external check, e.g. a shell command
    pub verification_reference: String,
    /// Threshold for numeric criteria; `None` means boolean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Comparison against `threshold`
    #[serde(default)]
    pub direction: Direction,
    /// Last verified status
    #[serde(default)]
    pub status: CriterionStatus,
    /// Last observed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<f64>,
    /// When the verifier last ran this criterion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    /// Message from the last `error` result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Criterion {
    /// Create new boolean criterion
    #[inline]
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        verification_reference: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            verification_reference: verification_reference.into(),
            threshold: None,
            direction: Direction::AtLeast,
            status: CriterionStatus::Pending,
            observed_value: None,
            last_checked: None,
            last_error: None,
        }
    }

    /// Make this a threshold criterion
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64, direction: Direction) -> Self {
        self.threshold = Some(threshold);
        self.direction = direction;
        self
    }

    /// Whether the verifier still needs to look at this criterion
    #[inline]
    #[must_use]
    pub fn needs_check(&self) -> bool {
        self.status != CriterionStatus::Met
    }

    /// Drop any verification results, back to `pending`
    pub(crate) fn reset_verification(&mut self) {
        self.status = CriterionStatus::Pending;
        self.observed_value = None;
        self.last_checked = None;
        self.last_error = None;
    }
}

/// A criterion blocking completion, as reported by `CriteriaNotMet`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmetCriterion {
    /// Criterion key
    pub key: String,
    /// Its current status
    pub status: CriterionStatus,
    /// Last observed value, if any
    pub observed_value: Option<f64>,
}

impl fmt::Display for UnmetCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.observed_value {
            Some(v) => write!(f, "{} ({}, observed {v})", self.key, self.status),
            None => write!(f, "{} ({})", self.key, self.status),
        }
    }
}

/// A unit of work for the handoff queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique item id within the ledger
    pub item_id: String,
    /// What the item is
    #[serde(default)]
    pub description: String,
    /// Items that must be done first, in declaration order
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkItem {
    /// Create new work item
    #[inline]
    #[must_use]
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            description: String::new(),
            depends_on: Vec::new(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, item_id: impl Into<String>) -> Self {
        let item_id = item_id.into();
        if !self.depends_on.contains(&item_id) {
            self.depends_on.push(item_id);
        }
        self
    }
}

/// The document attached to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    /// Document format version
    pub format_version: u32,
    /// Owning task
    pub task_id: TaskId,
    /// Lifecycle state
    pub state: LedgerState,
    /// Append-only contribution log
    #[serde(default)]
    pub contributions: Vec<Contribution>,
    /// Completion criteria keyed by `key`, in definition order
    #[serde(default)]
    pub completion_criteria: IndexMap<String, Criterion>,
    /// Declared work items, in declaration order
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
    /// Unresolved questions
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// Next steps; each write replaces the whole list
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last commit time
    pub updated_at: DateTime<Utc>,
}

impl Ledger {
    /// Fresh ledger in `Planning` with empty collections
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            format_version: FORMAT_VERSION,
            task_id,
            state: LedgerState::Planning,
            contributions: Vec::new(),
            completion_criteria: IndexMap::new(),
            work_items: Vec::new(),
            open_questions: Vec::new(),
            next_steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a criterion
    #[inline]
    #[must_use]
    pub fn criterion(&self, key: &str) -> Option<&Criterion> {
        self.completion_criteria.get(key)
    }

    /// Criteria that are not `met`, in definition order
    #[must_use]
    pub fn unmet_criteria(&self) -> Vec<UnmetCriterion> {
        self.completion_criteria
            .values()
            .filter(|c| c.status != CriterionStatus::Met)
            .map(|c| UnmetCriterion {
                key: c.key.clone(),
                status: c.status,
                observed_value: c.observed_value,
            })
            .collect()
    }

    /// Most recent contribution
    #[inline]
    #[must_use]
    pub fn last_contribution(&self) -> Option<&Contribution> {
        self.contributions.last()
    }

    /// Look up a work item
    #[must_use]
    pub fn work_item(&self, item_id: &str) -> Option<&WorkItem> {
        self.work_items.iter().find(|i| i.item_id == item_id)
    }

    /// Ids satisfied by at least one `complete` contribution
    #[must_use]
    pub fn completed_items(&self) -> HashSet<&str> {
        self.contributions
            .iter()
            .filter(|c| c.declared_status == ContributionStatus::Complete)
            .map(Contribution::satisfies)
            .collect()
    }

    /// Whether the ledger no longer accepts contributions
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }
}
