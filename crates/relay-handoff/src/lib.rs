//! Relay Handoff - who can pick up work next
//!
//! Answers "which declared work items can start now" from a ledger snapshot.
//! An item is eligible once every item it depends on has a `complete`
//! contribution. Pending items that can never become eligible are reported
//! as a stall with the blocking chain, never silently skipped.
//!
//! Everything here is a pure function of the snapshot: no locks are taken
//! and no checks are run.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod graph;

pub use error::{HandoffError, StallCause};
pub use graph::DependencyGraph;

use relay_core::Ledger;

/// Pending items whose dependencies are all done, in declaration order
///
/// # Errors
/// `Stalled` if items are pending but none is eligible.
pub fn next_eligible(ledger: &Ledger) -> Result<Vec<String>, HandoffError> {
    let graph = DependencyGraph::new(ledger);
    if graph.pending_count() == 0 {
        return Ok(Vec::new());
    }

    let ready = graph.ready();
    if ready.is_empty() {
        let done = ledger.completed_items();
        let start = ledger
            .work_items
            .iter()
            .map(|item| item.item_id.as_str())
            .find(|id| !done.contains(id))
            .unwrap_or_default();
        let err = graph.diagnose(start, &done);
        tracing::warn!(task_id = %ledger.task_id, %err, "handoff queue stalled");
        return Err(err);
    }

    tracing::debug!(
        task_id = %ledger.task_id,
        eligible = ready.len(),
        pending = graph.pending_count(),
        "computed eligible items"
    );
    Ok(ready.into_iter().map(str::to_string).collect())
}

/// Remaining items grouped into waves that can run in parallel
///
/// Wave `n + 1` only contains items whose dependencies finish in waves
/// `0..=n`. Each wave keeps declaration order.
///
/// # Errors
/// `Stalled` if any pending item can never be scheduled.
pub fn plan_waves(ledger: &Ledger) -> Result<Vec<Vec<String>>, HandoffError> {
    let waves = DependencyGraph::new(ledger).waves().inspect_err(|err| {
        tracing::warn!(task_id = %ledger.task_id, %err, "wave plan stalled");
    })?;

    Ok(waves
        .into_iter()
        .map(|wave| wave.into_iter().map(str::to_string).collect())
        .collect())
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::integrity::seal;
    use relay_core::{ContributionStatus, NewContribution, TaskId, WorkItem};

    fn ledger(items: Vec<WorkItem>) -> Ledger {
        let mut ledger = Ledger::new(TaskId::parse("T1").unwrap());
        ledger.work_items = items;
        ledger
    }

    fn contribute(ledger: &mut Ledger, new: NewContribution) {
        let sealed = seal(&ledger.contributions, new, chrono::Utc::now());
        ledger.contributions.push(sealed);
    }

    #[test]
    fn empty_queue_is_not_a_stall() {
        assert_eq!(next_eligible(&ledger(vec![])).unwrap(), Vec::<String>::new());
        assert!(plan_waves(&ledger(vec![])).unwrap().is_empty());
    }

    #[test]
    fn worker_name_satisfies_item_without_id() {
        let mut l = ledger(vec![
            WorkItem::new("parser"),
            WorkItem::new("emitter").depends_on("parser"),
        ]);
        contribute(&mut l, NewContribution::new("parser", ContributionStatus::Complete));
        assert_eq!(next_eligible(&l).unwrap(), vec!["emitter".to_string()]);
    }

    #[test]
    fn blocked_contribution_does_not_finish_item() {
        let mut l = ledger(vec![WorkItem::new("a"), WorkItem::new("b").depends_on("a")]);
        contribute(
            &mut l,
            NewContribution::new("w", ContributionStatus::Blocked).for_item("a"),
        );
        assert_eq!(next_eligible(&l).unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn stall_starts_at_first_pending_item() {
        let l = ledger(vec![
            WorkItem::new("x").depends_on("y"),
            WorkItem::new("y").depends_on("z"),
            WorkItem::new("z").depends_on("y"),
        ]);
        let err = next_eligible(&l).unwrap_err();
        assert_eq!(err.cause(), StallCause::Cycle);
        assert_eq!(err.chain(), ["x", "y", "z", "y"]);
    }
}
