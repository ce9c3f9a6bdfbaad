//! Probe hysteresis.
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failed probes >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive good probes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - A good probe resets the failure run and vice versa

use std::collections::HashMap;

use crate::pool::ServerId;

/// What the monitor should do with one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Threshold of good probes reached; mark healthy.
    Recover,
    /// Good probe below the threshold.
    Pending,
    /// Failed probe below the threshold; count the failure only.
    Failed,
    /// Threshold of failed probes reached; mark unhealthy.
    Trip,
}

#[derive(Debug, Default, Clone, Copy)]
struct Run {
    successes: u32,
    failures: u32,
}

/// Consecutive probe outcomes per server.
#[derive(Debug)]
pub struct ProbeTracker {
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    runs: HashMap<ServerId, Run>,
}

impl ProbeTracker {
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
            runs: HashMap::new(),
        }
    }

    pub fn observe(&mut self, id: &ServerId, ok: bool) -> Verdict {
        let run = self.runs.entry(id.clone()).or_default();
        if ok {
            run.failures = 0;
            run.successes = run.successes.saturating_add(1);
            if run.successes >= self.healthy_threshold {
                Verdict::Recover
            } else {
                Verdict::Pending
            }
        } else {
            run.successes = 0;
            run.failures = run.failures.saturating_add(1);
            if run.failures >= self.unhealthy_threshold {
                Verdict::Trip
            } else {
                Verdict::Failed
            }
        }
    }

    /// Drop runs for servers that left the pool.
    pub fn retain(&mut self, members: &[ServerId]) {
        self.runs.retain(|id, _| members.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_after_threshold() {
        let id = ServerId::new("10.0.0.1", 80);
        let mut tracker = ProbeTracker::new(2, 3);

        assert_eq!(tracker.observe(&id, false), Verdict::Failed);
        assert_eq!(tracker.observe(&id, false), Verdict::Failed);
        assert_eq!(tracker.observe(&id, false), Verdict::Trip);
        assert_eq!(tracker.observe(&id, false), Verdict::Trip);

        assert_eq!(tracker.observe(&id, true), Verdict::Pending);
        assert_eq!(tracker.observe(&id, true), Verdict::Recover);
    }

    #[test]
    fn test_good_probe_resets_failure_run() {
        let id = ServerId::new("10.0.0.1", 80);
        let mut tracker = ProbeTracker::new(1, 2);

        assert_eq!(tracker.observe(&id, false), Verdict::Failed);
        assert_eq!(tracker.observe(&id, true), Verdict::Recover);
        assert_eq!(tracker.observe(&id, false), Verdict::Failed);
    }
}
