use std::fmt;

/// Why a queue cannot make progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StallCause {
    /// The dependency chain re-enters itself
    Cycle,
    /// The chain ends at an item that was never declared
    UnresolvedDependency,
}

impl StallCause {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StallCause::Cycle => "cycle",
            StallCause::UnresolvedDependency => "unresolved_dependency",
        }
    }
}

impl fmt::Display for StallCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handoff queue errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// Items are pending but none can be picked up
    #[error("handoff stalled on {cause}: {}", chain.join(" -> "))]
    Stalled {
        /// Blocking chain, starting at the first pending item
        chain: Vec<String>,
        cause: StallCause,
    },
}

impl HandoffError {
    /// Blocking chain of a stall
    #[must_use]
    pub fn chain(&self) -> &[String] {
        match self {
            HandoffError::Stalled { chain, .. } => chain,
        }
    }

    #[must_use]
    pub fn cause(&self) -> StallCause {
        match self {
            HandoffError::Stalled { cause, .. } => *cause,
        }
    }
}
