//! Relay Core - durable task ledger
//!
//! Coordinates handoffs between independent workers that share no memory:
//! - One ledger per task, stored durably and mutated under a per-task lock
//! - An append-only, hash-chained contribution log
//! - A closed status protocol (`Planning -> Active -> {Blocked, Complete}`)
//! - A completion verifier that runs external checks under timeouts
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_core::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LedgerStore::in_memory();
//! let task = TaskId::parse("T1")?;
//!
//! store.get_or_create(&task).await?;
//! store
//!     .add_criterion(&task, Criterion::new("tests", "tests pass", "cargo test"))
//!     .await?;
//! store.update_state(&task, LedgerState::Active).await?;
//!
//! let verifier = Verifier::new(CommandCheck::new());
//! let report = verifier.verify(&store, &task).await?;
//! if report.all_met() {
//!     store.update_state(&task, LedgerState::Complete).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod integrity;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod verifier;

pub use config::{LoggingConfig, RelayConfig, StoreConfig, VerifierConfig};
pub use error::{ConfigError, LedgerError, StorageError};
pub use store::{FileBackend, LedgerBackend, LedgerStore, MemoryBackend, TaskLock};
pub use types::{
    Contribution, ContributionStatus, Criterion, CriterionStatus, Direction, Ledger, LedgerState,
    NewContribution, TaskId, UnmetCriterion, WorkItem,
};
pub use verifier::{
    CheckError, CheckOutcome, CheckReport, CommandCheck, CriterionCheck, CriterionOutcome,
    VerificationReport, Verifier,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the ledger
    pub use crate::{
        CommandCheck, ContributionStatus, Criterion, CriterionCheck, Direction, Ledger,
        LedgerError, LedgerState, LedgerStore, NewContribution, TaskId, Verifier, WorkItem,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
