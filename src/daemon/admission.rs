//! Admission control and live worker accounting
//!
//! The count is owned by the supervisor and only mutated from its own event
//! loop: incremented by the admission decision before a worker is started,
//! decremented when the worker's exit is reaped.

use crate::common::{Error, Result};

/// Outcome of an admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was reserved; the caller must start exactly one worker
    Admitted,
    /// Every slot is taken; nothing was changed
    AtCapacity,
}

/// Number of live workers against a fixed ceiling
///
/// Invariant: `0 <= live <= limit`.
#[derive(Debug)]
pub struct WorkerCount {
    live: usize,
    limit: usize,
}

impl WorkerCount {
    /// Create an empty count with ceiling `limit`
    pub fn new(limit: usize) -> Self {
        Self { live: 0, limit }
    }

    /// Number of workers admitted and not yet reaped
    pub fn live(&self) -> usize {
        self.live
    }

    /// The admission ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether no worker is live
    pub fn is_idle(&self) -> bool {
        self.live == 0
    }

    /// Reserve a slot for a new worker if one is free
    pub fn try_admit(&mut self) -> Admission {
        if self.live >= self.limit {
            return Admission::AtCapacity;
        }
        self.live += 1;
        Admission::Admitted
    }

    /// Return a slot after a worker has exited
    ///
    /// Releasing at zero means an increment was lost somewhere.
    pub fn release(&mut self) -> Result<()> {
        if self.live == 0 {
            return Err(Error::invariant(
                "worker count == 0 immediately before decrement",
            ));
        }
        self.live -= 1;
        if self.live == 0 {
            tracing::trace!("Worker count now 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_limit() {
        let mut count = WorkerCount::new(2);
        assert_eq!(count.try_admit(), Admission::Admitted);
        assert_eq!(count.try_admit(), Admission::Admitted);
        assert_eq!(count.live(), 2);

        // Third attempt is refused and leaves the count alone
        assert_eq!(count.try_admit(), Admission::AtCapacity);
        assert_eq!(count.live(), 2);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let mut count = WorkerCount::new(1);
        assert_eq!(count.try_admit(), Admission::Admitted);
        assert_eq!(count.try_admit(), Admission::AtCapacity);

        count.release().unwrap();
        assert!(count.is_idle());
        assert_eq!(count.try_admit(), Admission::Admitted);
    }

    #[test]
    fn test_underflow_is_invariant_violation() {
        let mut count = WorkerCount::new(3);
        let err = count.release().unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert_eq!(count.live(), 0);
    }

    #[test]
    fn test_count_conservation() {
        let mut count = WorkerCount::new(5);
        let mut admitted = 0;
        for _ in 0..20 {
            if count.try_admit() == Admission::Admitted {
                admitted += 1;
            }
            assert!(count.live() <= count.limit());
        }
        assert_eq!(admitted, 5);

        for _ in 0..admitted {
            count.release().unwrap();
        }
        assert!(count.is_idle());
        assert!(count.release().is_err());
    }
}
