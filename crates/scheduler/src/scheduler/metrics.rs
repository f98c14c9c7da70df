use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Chains taken from the queue and dispatched.
    pub chains_dispatched: u64,
    /// Chains ending with `Kill`.
    pub chains_aborted: u64,
    /// Queue entries discarded after their deadline.
    pub deadline_misses: u64,
    /// Entries discarded because their manifestation was withdrawn.
    pub discarded_inactive: u64,
    pub emergencies: u64,
    /// Duty-cycle ticks performed.
    pub duty_cycles: u64,
    /// Workers that terminated, regular or by failure.
    pub worker_exits: u64,
    pub worker_failures: u64,
    /// Wall-clock time of the last dispatch.
    pub last_dispatch: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_dispatch(&mut self, at: DateTime<Utc>) {
        self.chains_dispatched += 1;
        self.last_dispatch = Some(at);
    }

    pub fn record_worker_exit(&mut self, is_failure: bool) {
        self.worker_exits += 1;
        if is_failure {
            self.worker_failures += 1;
        }
    }

    /// Fraction of dispatched chains that were aborted.
    pub fn abort_ratio(&self) -> f64 {
        if self.chains_dispatched == 0 {
            0.0
        } else {
            self.chains_aborted as f64 / self.chains_dispatched as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_dispatch_tracks_last_time() {
        let mut m = SchedulerMetrics::default();
        assert!(m.last_dispatch.is_none());
        let t = Utc::now();
        m.record_dispatch(t);
        m.record_dispatch(t);
        assert_eq!(m.chains_dispatched, 2);
        assert_eq!(m.last_dispatch, Some(t));
    }

    #[test]
    fn abort_ratio() {
        let mut m = SchedulerMetrics::default();
        assert_eq!(m.abort_ratio(), 0.0);
        m.chains_dispatched = 4;
        m.chains_aborted = 1;
        assert!((m.abort_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn worker_exits_count_failures() {
        let mut m = SchedulerMetrics::default();
        m.record_worker_exit(false);
        m.record_worker_exit(true);
        assert_eq!(m.worker_exits, 2);
        assert_eq!(m.worker_failures, 1);
    }
}
