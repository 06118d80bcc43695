//! Testing utilities for the Relay workspace
//!
//! Shared fixtures and a scripted check double.

#![allow(missing_docs)]

use parking_lot::Mutex;
use relay_core::{
    CheckError, CheckReport, ContributionStatus, Criterion, CriterionCheck, LedgerState,
    LedgerStore, NewContribution, TaskId,
};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One scripted response
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this report
    Report(CheckReport),
    /// Return `CheckError::Custom`
    Fail(String),
    /// Never finish within any sane timeout
    Hang,
    /// Panic inside the check
    Panic(String),
}

/// Check whose answers are scripted per criterion key
///
/// Each key has a queue of steps. The last step in a queue repeats forever,
/// so a single `respond` acts as a fixed answer. Unscripted keys fail.
#[derive(Debug, Default)]
pub struct ScriptedCheck {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `step` for `key`
    pub fn respond(&self, key: &str, step: Step) -> &Self {
        self.scripts
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(step);
        self
    }

    /// Replace everything queued for `key` with `step`
    pub fn set(&self, key: &str, step: Step) -> &Self {
        self.scripts
            .lock()
            .insert(key.to_string(), VecDeque::from([step]));
        self
    }

    /// Times `key` was checked
    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().get(key).copied().unwrap_or(0)
    }

    fn next_step(&self, key: &str) -> Option<Step> {
        let mut scripts = self.scripts.lock();
        let queue = scripts.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait::async_trait]
impl CriterionCheck for ScriptedCheck {
    async fn check(&self, criterion: &Criterion) -> Result<CheckReport, CheckError> {
        *self.calls.lock().entry(criterion.key.clone()).or_default() += 1;

        match self.next_step(&criterion.key) {
            Some(Step::Report(report)) => Ok(report),
            Some(Step::Fail(msg)) => Err(CheckError::Custom(msg)),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CheckError::Custom("hang finished".to_string()))
            }
            Some(Step::Panic(msg)) => panic!("{msg}"),
            None => Err(CheckError::Custom(format!(
                "no script for criterion {}",
                criterion.key
            ))),
        }
    }
}

/// Parse a task id that is known to be valid
pub fn task(raw: &str) -> TaskId {
    TaskId::parse(raw).expect("fixture task id")
}

/// Completed contribution from `worker`
pub fn done(worker: &str) -> NewContribution {
    NewContribution::new(worker, ContributionStatus::Complete)
        .with_findings(format!("{worker} finished"))
}

/// Completed contribution for a work item
pub fn done_item(worker: &str, item_id: &str) -> NewContribution {
    done(worker).for_item(item_id)
}

/// Blocked declaration from `worker`
pub fn blocked(worker: &str, reason: &str) -> NewContribution {
    NewContribution::new(worker, ContributionStatus::Blocked).with_findings(reason)
}

/// Create a task, define `criteria`, and move it to `Active`
pub async fn active_task(store: &LedgerStore, raw: &str, criteria: Vec<Criterion>) -> TaskId {
    let id = task(raw);
    store.get_or_create(&id).await.expect("create task");
    for criterion in criteria {
        store.add_criterion(&id, criterion).await.expect("add criterion");
    }
    store
        .update_state(&id, LedgerState::Active)
        .await
        .expect("activate task");
    id
}

/// Boolean criterion with a placeholder command
pub fn criterion(key: &str) -> Criterion {
    Criterion::new(key, format!("{key} holds"), format!("check-{key}"))
}
