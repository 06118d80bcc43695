//! Completion verifier
//!
//! Decides whether each criterion is `met`, `failed`, or `error` by running a
//! caller-supplied [`CriterionCheck`] and records the results in one commit.
//!
//! # Guarantees
//!
//! - Checks run with no task lock held, each bounded by a timeout.
//! - A timeout, a check error, or a panic inside a check is `error`, never
//!   `met`. The rest of the batch is still evaluated.
//! - A batch commits all of its outcomes or none of them; dropping the
//!   `verify` future before the commit leaves the ledger untouched.
//! - Criteria already `met` are not re-run, so repeated runs against
//!   deterministic checks give the same statuses.

mod command;

pub use command::CommandCheck;

use crate::config::VerifierConfig;
use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::types::{Criterion, CriterionStatus, Ledger, TaskId, UnmetCriterion};
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Default per-check timeout
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// What a check decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Condition holds
    Met,
    /// Condition does not hold
    Failed,
    /// Check ran but could not reach a verdict
    Error(String),
}

/// Result returned by a check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    /// Verdict for boolean criteria
    pub outcome: CheckOutcome,
    /// Measured value for threshold criteria
    pub observed_value: Option<f64>,
}

impl CheckReport {
    /// Condition holds
    #[inline]
    #[must_use]
    pub fn met() -> Self {
        Self {
            outcome: CheckOutcome::Met,
            observed_value: None,
        }
    }

    /// Condition does not hold
    #[inline]
    #[must_use]
    pub fn failed() -> Self {
        Self {
            outcome: CheckOutcome::Failed,
            observed_value: None,
        }
    }

    /// No verdict
    #[inline]
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            outcome: CheckOutcome::Error(message.into()),
            observed_value: None,
        }
    }

    /// A measurement for a threshold criterion
    #[inline]
    #[must_use]
    pub fn observed(value: f64) -> Self {
        Self::met().with_observed(value)
    }

    /// With measured value
    #[inline]
    #[must_use]
    pub fn with_observed(mut self, value: f64) -> Self {
        self.observed_value = Some(value);
        self
    }
}

/// Why a check produced no report
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// External process could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Check did not finish in time
    #[error("check timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    /// Check panicked
    #[error("check panicked: {0}")]
    Panicked(String),

    /// Anything else the embedding application reports
    #[error("{0}")]
    Custom(String),
}

/// Verification callback supplied by the embedding application
#[async_trait::async_trait]
pub trait CriterionCheck: Send + Sync {
    /// Evaluate one criterion
    async fn check(&self, criterion: &Criterion) -> Result<CheckReport, CheckError>;
}

/// Verdict for one criterion in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionOutcome {
    /// Criterion key
    pub key: String,
    /// New status
    pub status: CriterionStatus,
    /// Measured value, if the check reported one
    pub observed_value: Option<f64>,
    /// Reason for an `error` status
    pub error: Option<String>,
}

impl CriterionOutcome {
    fn error(key: &str, message: impl Into<String>, observed_value: Option<f64>) -> Self {
        Self {
            key: key.to_string(),
            status: CriterionStatus::Error,
            observed_value,
            error: Some(message.into()),
        }
    }
}

/// Result of a committed verification run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    /// Verified task
    pub task_id: TaskId,
    /// Outcomes of the criteria that were checked, in definition order
    pub outcomes: Vec<CriterionOutcome>,
    /// Criteria still blocking completion after the commit
    pub unmet: Vec<UnmetCriterion>,
}

impl VerificationReport {
    /// Every criterion is met
    #[inline]
    #[must_use]
    pub fn all_met(&self) -> bool {
        self.unmet.is_empty()
    }

    /// Some check could not be evaluated
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.status == CriterionStatus::Error)
    }
}

/// Apply the outcome rules to a check result
///
/// Threshold criteria are decided by comparing the observed value with the
/// declared direction; the check's own met/failed verdict only matters for
/// boolean criteria.
#[must_use]
pub fn judge(criterion: &Criterion, result: Result<CheckReport, CheckError>) -> CriterionOutcome {
    let key = criterion.key.as_str();
    let report = match result {
        Ok(report) => report,
        Err(e) => return CriterionOutcome::error(key, e.to_string(), None),
    };

    if let CheckOutcome::Error(message) = &report.outcome {
        return CriterionOutcome::error(key, message.clone(), report.observed_value);
    }

    let status = match (criterion.threshold, report.observed_value) {
        (Some(_), None) => {
            return CriterionOutcome::error(key, "threshold criterion reported no value", None);
        }
        (Some(_), Some(v)) if !v.is_finite() => {
            return CriterionOutcome::error(key, format!("observed value {v} is not finite"), None);
        }
        (Some(threshold), Some(v)) => {
            if criterion.direction.holds(v, threshold) {
                CriterionStatus::Met
            } else {
                CriterionStatus::Failed
            }
        }
        (None, _) => match report.outcome {
            CheckOutcome::Met => CriterionStatus::Met,
            _ => CriterionStatus::Failed,
        },
    };

    CriterionOutcome {
        key: key.to_string(),
        status,
        observed_value: report.observed_value,
        error: None,
    }
}

/// Runs checks and commits their outcomes
#[derive(Clone)]
pub struct Verifier {
    check: Arc<dyn CriterionCheck>,
    timeout: Duration,
    max_concurrency: usize,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("timeout", &self.timeout)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Create verifier over a check
    #[must_use]
    pub fn new(check: impl CriterionCheck + 'static) -> Self {
        Self::with_check(Arc::new(check))
    }

    /// Create verifier over a shared check
    #[must_use]
    pub fn with_check(check: Arc<dyn CriterionCheck>) -> Self {
        Self {
            check,
            timeout: DEFAULT_CHECK_TIMEOUT,
            max_concurrency: 1,
        }
    }

    /// Create verifier with timeout and concurrency from `config`
    #[must_use]
    pub fn from_config(check: Arc<dyn CriterionCheck>, config: &VerifierConfig) -> Self {
        Self::with_check(check)
            .with_timeout(config.check_timeout())
            .with_max_concurrency(config.max_concurrency)
    }

    /// With per-check timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// With checks in flight at once (at least one)
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Evaluate every criterion that is not yet `met`
    ///
    /// Touches nothing but the checks; the ledger is only read.
    pub async fn evaluate(&self, ledger: &Ledger) -> Vec<CriterionOutcome> {
        // owned so the future stays `Send` without a borrowed-closure bound
        let due: Vec<Criterion> = ledger
            .completion_criteria
            .values()
            .filter(|c| c.needs_check())
            .cloned()
            .collect();

        stream::iter(due)
            .map(|criterion| async move { self.run_one(&criterion).await })
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Evaluate a task's criteria and commit the outcomes in one step
    ///
    /// # Errors
    /// - `UnknownTask` if the task has no ledger
    /// - `TerminalState` if the task is, or becomes, complete
    /// - `Storage` if the commit cannot be persisted
    pub async fn verify(
        &self,
        store: &LedgerStore,
        task_id: &TaskId,
    ) -> Result<VerificationReport, LedgerError> {
        let snapshot = store.read(task_id).await?;
        if snapshot.is_closed() {
            return Err(LedgerError::TerminalState {
                task_id: task_id.clone(),
            });
        }

        let outcomes = self.evaluate(&snapshot).await;
        let ledger = if outcomes.is_empty() {
            snapshot
        } else {
            store.record_verification(task_id, &outcomes).await?
        };

        let report = VerificationReport {
            task_id: task_id.clone(),
            unmet: ledger.unmet_criteria(),
            outcomes,
        };
        tracing::info!(
            task_id = %task_id,
            checked = report.outcomes.len(),
            unmet = report.unmet.len(),
            degraded = report.is_degraded(),
            "verification committed"
        );
        Ok(report)
    }

    async fn run_one(&self, criterion: &Criterion) -> CriterionOutcome {
        let guarded = AssertUnwindSafe(self.check.check(criterion)).catch_unwind();

        let result = match tokio::time::timeout(self.timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(CheckError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(CheckError::TimedOut {
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        let outcome = judge(criterion, result);
        match &outcome.error {
            Some(reason) => {
                tracing::warn!(key = %criterion.key, %reason, "criterion check errored");
            }
            None => {
                tracing::debug!(
                    key = %criterion.key,
                    status = %outcome.status,
                    observed = ?outcome.observed_value,
                    "criterion checked"
                );
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
