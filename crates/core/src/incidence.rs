//! Thread-aware incidence recorder for performance instrumentation.
//!
//! Code under observation calls [`IncidenceCount::mark_enter`] and
//! [`IncidenceCount::mark_leave`] around the measured section, optionally
//! tagged with a case ID. [`IncidenceCount::evaluate`] integrates the
//! recorded timeline afterwards into a [`Statistic`] with cumulated times,
//! per-thread activity and the average degree of concurrency.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

static NEXT_THREAD_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_KEY: Cell<u64> = const { Cell::new(0) };
}

/// Process-wide key of the calling thread, allocated on first use; never 0.
pub fn this_thread_key() -> u64 {
    THREAD_KEY.with(|key| {
        if key.get() == 0 {
            key.set(NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed));
        }
        key.get()
    })
}

#[derive(Debug, Clone, Copy)]
struct Inc {
    when: Instant,
    thread: usize,
    case: usize,
    is_leave: bool,
}

#[derive(Debug, Default)]
struct Recording {
    /// Thread keys in order of first appearance; index = dense slot.
    threads: Vec<u64>,
    expected_threads: usize,
    events: Vec<Inc>,
}

impl Recording {
    fn slot_of(&mut self, key: u64) -> usize {
        match self.threads.iter().position(|k| *k == key) {
            Some(slot) => slot,
            None => {
                self.threads.push(key);
                self.threads.len() - 1
            }
        }
    }
}

/// Integrated evaluation of an [`IncidenceCount`] timeline.
///
/// All times are given in microseconds.
#[derive(Debug, Clone, Default)]
pub struct Statistic {
    pub event_cnt: usize,
    pub activation_cnt: usize,
    /// Aggregated time over all cases.
    pub cumulated_time: f64,
    /// Compounded time of thread activity.
    pub active_time: f64,
    /// Overall timespan of observation.
    pub covered_time: f64,
    /// Amortised concurrency in the observed timespan.
    pub avg_concurrency: f64,
    pub case_cntr: Vec<usize>,
    pub thrd_cntr: Vec<usize>,
    pub case_time: Vec<f64>,
    pub thrd_time: Vec<f64>,
    /// Time spent at each degree of concurrency (index 0 = idle).
    pub conc_time: Vec<f64>,
}

impl Statistic {
    pub fn cnt_case(&self, id: usize) -> usize {
        self.case_cntr.get(id).copied().unwrap_or_default()
    }

    pub fn cnt_thread(&self, id: usize) -> usize {
        self.thrd_cntr.get(id).copied().unwrap_or_default()
    }

    pub fn time_case(&self, id: usize) -> f64 {
        self.case_time.get(id).copied().unwrap_or_default()
    }

    pub fn time_thread(&self, id: usize) -> f64 {
        self.thrd_time.get(id).copied().unwrap_or_default()
    }

    pub fn time_at_conc(&self, id: usize) -> f64 {
        self.conc_time.get(id).copied().unwrap_or_default()
    }
}

/// Recorder for enter/leave incidents from multiple threads.
#[derive(Debug, Default)]
pub struct IncidenceCount {
    rec: Mutex<Recording>,
}

impl IncidenceCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for the given number of threads (counted even when idle).
    pub fn expect_threads(self, cnt: usize) -> Self {
        self.with_recording(|rec| rec.expected_threads = cnt);
        self
    }

    /// Reserve space for the expected number of activations.
    pub fn expect_incidents(self, cnt: usize) -> Self {
        self.with_recording(|rec| rec.events.reserve(2 * cnt));
        self
    }

    pub fn mark_enter(&self, case: usize) {
        self.add_entry(case, false);
    }

    pub fn mark_leave(&self, case: usize) {
        self.add_entry(case, true);
    }

    fn add_entry(&self, case: usize, is_leave: bool) {
        let when = Instant::now();
        let key = this_thread_key();
        self.with_recording(|rec| {
            let thread = rec.slot_of(key);
            rec.events.push(Inc { when, thread, case, is_leave });
        });
    }

    fn with_recording<R>(&self, op: impl FnOnce(&mut Recording) -> R) -> R {
        let mut guard = match self.rec.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        op(&mut guard)
    }

    /// Integrate the recorded timeline.
    pub fn evaluate(&self) -> Statistic {
        let (mut timeline, num_threads) = self.with_recording(|rec| {
            let threads = rec.threads.len().max(rec.expected_threads);
            (rec.events.clone(), threads)
        });
        let mut stat = Statistic::default();
        if num_threads == 0 || timeline.is_empty() {
            return stat;
        }
        timeline.sort_by_key(|inc| inc.when);

        let mut active: i64 = 0;
        let mut active_case: Vec<i64> = Vec::new();
        let mut active_thrd: Vec<i64> = vec![0; num_threads];
        stat.thrd_cntr = vec![0; num_threads];
        stat.thrd_time = vec![0.0; num_threads];
        stat.conc_time = vec![0.0; num_threads + 1];

        let start = timeline[0].when;
        let mut prev = start;
        for event in &timeline {
            if event.case >= stat.case_cntr.len() {
                active_case.resize(event.case + 1, 0);
                stat.case_cntr.resize(event.case + 1, 0);
                stat.case_time.resize(event.case + 1, 0.0);
            }
            let slice = event.when.duration_since(prev).as_secs_f64() * 1e6;
            stat.cumulated_time += active as f64 * slice;
            for (time, cnt) in stat.case_time.iter_mut().zip(&active_case) {
                *time += *cnt as f64 * slice;
            }
            for (time, cnt) in stat.thrd_time.iter_mut().zip(&active_thrd) {
                if *cnt > 0 {
                    *time += slice;
                }
            }
            let concurrent = active_thrd.iter().filter(|a| **a > 0).count();
            stat.avg_concurrency += concurrent as f64 * slice;
            stat.conc_time[concurrent] += slice;

            if event.is_leave {
                active -= 1;
                active_case[event.case] -= 1;
                active_thrd[event.thread] -= 1;
            } else {
                active += 1;
                active_case[event.case] += 1;
                active_thrd[event.thread] += 1;
                stat.case_cntr[event.case] += 1;
                stat.thrd_cntr[event.thread] += 1;
                stat.activation_cnt += 1;
            }
            prev = event.when;
        }
        stat.covered_time = prev.duration_since(start).as_secs_f64() * 1e6;
        stat.event_cnt = timeline.len();
        if stat.covered_time > 0.0 {
            stat.avg_concurrency /= stat.covered_time;
        }
        stat.active_time = stat.thrd_time.iter().sum();
        stat
    }

    pub fn calc_cumulated_time(&self) -> f64 {
        self.evaluate().cumulated_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pause(ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    #[test]
    fn empty_recording_yields_empty_statistic() {
        let stat = IncidenceCount::new().evaluate();
        assert_eq!(stat.activation_cnt, 0);
        assert_eq!(stat.cumulated_time, 0.0);
        assert_eq!(stat.cnt_case(3), 0);
    }

    #[test]
    fn single_thread_sequential_cases() {
        let watch = IncidenceCount::new();
        watch.mark_enter(1);
        pause(5);
        watch.mark_leave(1);
        watch.mark_enter(2);
        pause(5);
        watch.mark_leave(2);

        let stat = watch.evaluate();
        assert_eq!(stat.event_cnt, 4);
        assert_eq!(stat.activation_cnt, 2);
        assert_eq!(stat.cnt_case(0), 0);
        assert_eq!(stat.cnt_case(1), 1);
        assert_eq!(stat.cnt_case(2), 1);
        assert_eq!(stat.cnt_thread(0), 2);
        assert!(stat.time_case(1) >= 5_000.0);
        assert!(stat.time_case(2) >= 5_000.0);
        // a single thread never overlaps itself
        assert!((stat.avg_concurrency - 1.0).abs() < 0.05);
        assert!(stat.cumulated_time <= stat.covered_time + 1.0);
    }

    #[test]
    fn nested_cases_accumulate_overlap() {
        let watch = IncidenceCount::new();
        watch.mark_enter(0);
        pause(4);
        watch.mark_enter(1);
        pause(4);
        watch.mark_leave(1);
        watch.mark_leave(0);

        let stat = watch.evaluate();
        assert_eq!(stat.activation_cnt, 2);
        // cumulated time counts both cases, thread time only once
        assert!(stat.cumulated_time > stat.active_time);
        assert!(stat.time_case(0) > stat.time_case(1));
    }

    #[test]
    fn parallel_threads_raise_concurrency() {
        let watch = Arc::new(IncidenceCount::new().expect_threads(2).expect_incidents(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let watch = Arc::clone(&watch);
                thread::spawn(move || {
                    watch.mark_enter(0);
                    pause(30);
                    watch.mark_leave(0);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stat = watch.evaluate();
        assert_eq!(stat.activation_cnt, 2);
        assert_eq!(stat.cnt_thread(0), 1);
        assert_eq!(stat.cnt_thread(1), 1);
        assert!(stat.avg_concurrency > 1.5, "concurrency {}", stat.avg_concurrency);
        assert!(stat.time_at_conc(2) > 0.0);
        assert!((stat.active_time - stat.cumulated_time).abs() < 1.0);
    }
}
