//! Error types for pool operations.

use thiserror::Error;

use crate::core::table::ResourceId;

/// Errors produced by the pool, its admission gate, and its resource table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The resource was already free when a release was attempted.
    #[error("double release of resource {id}")]
    DoubleRelease {
        /// Resource that was already free.
        id: ResourceId,
    },
    /// The id does not name any resource in this pool.
    #[error("unknown resource {id}")]
    UnknownResource {
        /// Offending id.
        id: ResourceId,
    },
    /// The handle was issued by a different pool.
    #[error("handle belongs to a different pool")]
    ForeignHandle,
    /// More permits were returned to the gate than it was created with.
    #[error("permit overflow: gate capacity is {capacity}")]
    PermitOverflow {
        /// Gate capacity.
        capacity: usize,
    },
    /// Admission and table state disagree. Never retried.
    #[error("internal invariant violated: {0}")]
    InvariantViolated(String),
    /// The wait was withdrawn because the caller's cancel token fired.
    #[error("acquire cancelled")]
    Cancelled,
    /// The pool has been shut down.
    #[error("pool has been shut down")]
    Shutdown,
    /// Bounded wait elapsed without admission.
    #[error("acquire timed out")]
    Timeout,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Failure outside pool bookkeeping (thread spawn, worker panic).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Programmer errors: the caller broke the acquire/release protocol.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::DoubleRelease { .. }
                | Self::UnknownResource { .. }
                | Self::ForeignHandle
                | Self::PermitOverflow { .. }
        )
    }

    /// Errors after which pool state can no longer be trusted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.is_protocol_violation() || matches!(self, Self::InvariantViolated(_))
    }

    /// Expected outcomes of a withdrawn wait.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Shutdown)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
