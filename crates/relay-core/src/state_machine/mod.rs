//! Status protocol
//!
//! `Planning -> Active -> {Blocked, Complete}`, with `Blocked -> Active` on an
//! unblock event and `Complete` terminal. Structural edges live in
//! [`allowed_transitions`]; [`validate_transition`] adds the guards that
//! depend on ledger contents.

use crate::error::LedgerError;
use crate::types::{ContributionStatus, Ledger, LedgerState};

/// Structural transition table
#[must_use]
pub fn allowed_transitions(from: LedgerState) -> Vec<LedgerState> {
    use LedgerState::*;
    match from {
        Planning => vec![Active, Blocked],
        Active => vec![Blocked, Complete],
        Blocked => vec![Active],
        Complete => vec![],
    }
}

/// Whether `from -> to` is an edge of the table
#[inline]
#[must_use]
pub fn is_allowed(from: LedgerState, to: LedgerState) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Validates a transition against the table and the ledger's contents.
///
/// # Errors
/// - `TerminalState` if the ledger is already complete
/// - `InvalidTransition` for any pair outside the table
/// - `NoCriteria` when entering `Active` with no criteria defined
/// - `MissingBlockingContribution` when entering `Blocked` without a
///   blocked declaration as the latest contribution
/// - `CriteriaNotMet` when entering `Complete` with any criterion not met
pub fn validate_transition(ledger: &Ledger, to: LedgerState) -> Result<(), LedgerError> {
    let from = ledger.state;

    if from.is_terminal() {
        return Err(LedgerError::TerminalState {
            task_id: ledger.task_id.clone(),
        });
    }

    if !is_allowed(from, to) {
        return Err(LedgerError::InvalidTransition { from, to });
    }

    match to {
        LedgerState::Active if ledger.completion_criteria.is_empty() => {
            Err(LedgerError::NoCriteria {
                task_id: ledger.task_id.clone(),
            })
        }
        LedgerState::Blocked => {
            let declared_blocked = ledger
                .last_contribution()
                .is_some_and(|c| c.declared_status == ContributionStatus::Blocked);
            if declared_blocked {
                Ok(())
            } else {
                Err(LedgerError::MissingBlockingContribution {
                    task_id: ledger.task_id.clone(),
                })
            }
        }
        LedgerState::Complete => {
            let unmet = ledger.unmet_criteria();
            if unmet.is_empty() {
                Ok(())
            } else {
                Err(LedgerError::CriteriaNotMet {
                    task_id: ledger.task_id.clone(),
                    unmet,
                })
            }
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Contribution, Criterion, CriterionStatus, TaskId};
    use chrono::Utc;

    fn ledger(state: LedgerState) -> Ledger {
        let mut l = Ledger::new(TaskId::parse("T1").unwrap());
        l.state = state;
        l
    }

    fn with_criterion(mut l: Ledger, status: CriterionStatus) -> Ledger {
        let mut c = Criterion::new("c", "c", "true");
        c.status = status;
        l.completion_criteria.insert("c".into(), c);
        l
    }

    fn with_contribution(mut l: Ledger, status: ContributionStatus) -> Ledger {
        l.contributions.push(Contribution {
            sequence: l.contributions.len() as u64,
            worker_name: "w".into(),
            item_id: None,
            timestamp: Utc::now(),
            declared_status: status,
            findings: String::new(),
            handoff_notes: String::new(),
            prev_hash: String::new(),
            hash: String::new(),
        });
        l
    }

    #[test]
    fn planning_to_active_needs_criteria() {
        let l = ledger(LedgerState::Planning);
        assert!(matches!(
            validate_transition(&l, LedgerState::Active),
            Err(LedgerError::NoCriteria { .. })
        ));

        let l = with_criterion(l, CriterionStatus::Pending);
        assert!(validate_transition(&l, LedgerState::Active).is_ok());
    }

    #[test]
    fn blocked_needs_blocked_declaration() {
        let l = with_criterion(ledger(LedgerState::Active), CriterionStatus::Pending);
        assert!(matches!(
            validate_transition(&l, LedgerState::Blocked),
            Err(LedgerError::MissingBlockingContribution { .. })
        ));

        let l = with_contribution(l, ContributionStatus::Complete);
        assert!(validate_transition(&l, LedgerState::Blocked).is_err());

        let l = with_contribution(l, ContributionStatus::Blocked);
        assert!(validate_transition(&l, LedgerState::Blocked).is_ok());
    }

    #[test]
    fn planning_may_block() {
        let l = with_contribution(ledger(LedgerState::Planning), ContributionStatus::Blocked);
        assert!(validate_transition(&l, LedgerState::Blocked).is_ok());
    }

    #[test]
    fn complete_needs_every_criterion_met() {
        let l = with_criterion(ledger(LedgerState::Active), CriterionStatus::Failed);
        match validate_transition(&l, LedgerState::Complete) {
            Err(LedgerError::CriteriaNotMet { unmet, .. }) => {
                assert_eq!(unmet.len(), 1);
                assert_eq!(unmet[0].key, "c");
            }
            other => panic!("expected CriteriaNotMet, got {other:?}"),
        }

        let l = with_criterion(ledger(LedgerState::Active), CriterionStatus::Met);
        assert!(validate_transition(&l, LedgerState::Complete).is_ok());
    }

    #[test]
    fn blocked_cannot_complete_directly() {
        let l = with_criterion(ledger(LedgerState::Blocked), CriterionStatus::Met);
        assert!(matches!(
            validate_transition(&l, LedgerState::Complete),
            Err(LedgerError::InvalidTransition {
                from: LedgerState::Blocked,
                to: LedgerState::Complete
            })
        ));
    }

    #[test]
    fn complete_is_terminal() {
        let l = with_criterion(ledger(LedgerState::Complete), CriterionStatus::Met);
        for to in LedgerState::ALL {
            assert!(matches!(
                validate_transition(&l, to),
                Err(LedgerError::TerminalState { .. })
            ));
        }
        assert!(allowed_transitions(LedgerState::Complete).is_empty());
    }

    #[test]
    fn self_transitions_are_invalid() {
        let l = with_criterion(ledger(LedgerState::Active), CriterionStatus::Met);
        assert!(matches!(
            validate_transition(&l, LedgerState::Active),
            Err(LedgerError::InvalidTransition { .. })
        ));
        let l = with_contribution(ledger(LedgerState::Blocked), ContributionStatus::Blocked);
        assert!(matches!(
            validate_transition(&l, LedgerState::Blocked),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }
}
