//! Hash chain over the contribution log
//!
//! Each committed contribution carries the hash of its predecessor and its
//! own SHA-256 over every field. An edit, removal, or reorder anywhere in the
//! log breaks the chain from that point on.

use crate::types::{Contribution, ContributionStatus, NewContribution};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// `prev_hash` of the first contribution
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Where a chain check failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    /// Index of the first bad contribution
    pub index: usize,
    /// What was wrong with it
    pub reason: String,
}

/// Seal a new contribution onto the end of `log`
#[must_use]
pub fn seal(log: &[Contribution], new: NewContribution, timestamp: DateTime<Utc>) -> Contribution {
    let prev_hash = log
        .last()
        .map_or_else(|| GENESIS_HASH.to_string(), |c| c.hash.clone());

    let mut contribution = Contribution {
        sequence: log.len() as u64,
        worker_name: new.worker_name,
        item_id: new.item_id,
        timestamp,
        declared_status: new.declared_status,
        findings: new.findings,
        handoff_notes: new.handoff_notes,
        prev_hash,
        hash: String::new(),
    };
    contribution.hash = compute_hash(&contribution);
    contribution
}

/// Verify sequence numbers and the hash chain of a whole log
///
/// # Errors
/// The first [`ChainBreak`] found.
pub fn verify_chain(log: &[Contribution]) -> Result<(), ChainBreak> {
    let mut prev = GENESIS_HASH;
    for (index, c) in log.iter().enumerate() {
        if c.sequence != index as u64 {
            return Err(ChainBreak {
                index,
                reason: format!("sequence {} at position {index}", c.sequence),
            });
        }
        if c.prev_hash != prev {
            return Err(ChainBreak {
                index,
                reason: "prev_hash does not match predecessor".to_string(),
            });
        }
        if c.hash != compute_hash(c) {
            return Err(ChainBreak {
                index,
                reason: "content hash mismatch".to_string(),
            });
        }
        prev = &c.hash;
    }
    Ok(())
}

fn compute_hash(c: &Contribution) -> String {
    let mut hasher = Sha256::new();
    hasher.update(c.sequence.to_le_bytes());
    hasher.update(c.worker_name.as_bytes());
    hasher.update([0]);
    match &c.item_id {
        Some(item) => {
            hasher.update([1]);
            hasher.update(item.as_bytes());
        }
        None => hasher.update([0]),
    }
    hasher.update([0]);
    hasher.update(c.timestamp.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update([status_tag(c.declared_status)]);
    hasher.update(c.findings.as_bytes());
    hasher.update([0]);
    hasher.update(c.handoff_notes.as_bytes());
    hasher.update([0]);
    hasher.update(c.prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

fn status_tag(status: ContributionStatus) -> u8 {
    match status {
        ContributionStatus::Complete => 0,
        ContributionStatus::Blocked => 1,
        ContributionStatus::NeedsInput => 2,
    }
}
