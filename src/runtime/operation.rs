//! Simulated resource payload: a "gaze" of randomized duration.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::core::{CancelToken, ResourceId};

/// How a simulated operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Ran for its full sampled duration.
    Completed {
        /// Time spent.
        elapsed: Duration,
    },
    /// Hit the lease limit before finishing.
    Expired {
        /// Time spent.
        elapsed: Duration,
    },
    /// The lease token fired before the operation finished.
    Interrupted {
        /// Time spent.
        elapsed: Duration,
    },
}

/// Immutable per-resource payload. Each use sleeps for a duration drawn
/// uniformly from `min..=max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedOperation {
    id: ResourceId,
    min: Duration,
    max: Duration,
}

impl SimulatedOperation {
    /// Create an operation for resource `id`. Bounds are swapped if given in
    /// the wrong order.
    #[must_use]
    pub fn new(id: ResourceId, min: Duration, max: Duration) -> Self {
        Self {
            id,
            min: min.min(max),
            max: max.max(min),
        }
    }

    /// Resource id this payload belongs to.
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Duration bounds.
    #[must_use]
    pub const fn range(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    /// Draw a duration for one use.
    #[must_use]
    pub fn sample_duration(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rand::rng().random_range(self.min..=self.max)
    }

    /// Run once, returning early if `token` fires or `limit` elapses first.
    pub fn perform(&self, token: &CancelToken, limit: Option<Duration>) -> OperationOutcome {
        let wanted = self.sample_duration();
        let (budget, capped) = match limit {
            Some(limit) if limit < wanted => (limit, true),
            _ => (wanted, false),
        };

        let start = Instant::now();
        let interrupted = token.wait_timeout(budget);
        let elapsed = start.elapsed();
        match (interrupted, capped) {
            (true, _) => OperationOutcome::Interrupted { elapsed },
            (false, true) => OperationOutcome::Expired { elapsed },
            (false, false) => OperationOutcome::Completed { elapsed },
        }
    }
}
