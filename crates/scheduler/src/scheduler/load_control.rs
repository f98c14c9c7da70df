//! Load regulation: observe the schedule lag and direct free capacity.
//!
//! Whenever a worker calls in for more work, the [`LoadController`] samples
//! the distance between the current time and the head of the queue and
//! classifies the time horizon. Free capacity is then either sent to
//! dispatch, kept spinning, parked until the next known Activity, or put
//! to sleep with a randomised delay, spreading wake-ups over the horizon.

use std::sync::atomic::{AtomicI64, Ordering};

use gear_core::{hash_combine, Time};
use tracing::trace;

pub const SLEEP_HORIZON: Time = Time::from_millis(20);
pub const WORK_HORIZON: Time = Time::from_millis(5);
pub const NEAR_HORIZON: Time = Time::from_micros(50);

/// Smoothing factor for the exponential moving average of the lag.
const LAG_SAMPLE_DAMPING: f64 = 2.0;

/// Lag considered as balanced schedule pressure, in µs.
const BALANCED_LAG: f64 = 200.0;

/// Decision where to direct a worker's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capacity {
    /// Sent to work.
    Dispatch,
    /// Reserved for the next task.
    TendNext,
    /// Awaiting imminent Activities.
    SpinTime,
    /// Capacity for active processing required.
    NearTime,
    /// Typical stable work rhythm expected.
    WorkTime,
    /// Time to go to sleep.
    IdleWait,
}

/// Connections to the worker pool.
pub struct Wiring {
    pub max_capacity: usize,
    pub curr_work_force_size: Box<dyn Fn() -> usize + Send + Sync>,
    pub step_up_work_force: Box<dyn Fn(usize) + Send + Sync>,
}

impl Default for Wiring {
    fn default() -> Self {
        Self {
            max_capacity: 1,
            curr_work_force_size: Box::new(|| 0),
            step_up_work_force: Box::new(|_| {}),
        }
    }
}

pub struct LoadController {
    wiring: Wiring,
    tended_head: AtomicI64,
    sampled_lag: AtomicI64,
}

impl Default for LoadController {
    fn default() -> Self {
        Self::new(Wiring::default())
    }
}

impl LoadController {
    pub fn new(wiring: Wiring) -> Self {
        Self {
            wiring,
            tended_head: AtomicI64::new(Time::ANYTIME.micros()),
            sampled_lag: AtomicI64::new(0),
        }
    }

    fn mark_lag_sample(&self, head: Time, now: Time) {
        // negative when free capacity
        let head = if head.is_regular() { head } else { now };
        let lag = (now - head).clamp(Time::ZERO - SLEEP_HORIZON, WORK_HORIZON).micros() as f64;
        let alpha = LAG_SAMPLE_DAMPING / (1 + self.wiring.max_capacity) as f64;
        let _ = self
            .sampled_lag
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |average| {
                Some((lag * alpha + (1.0 - alpha) * average as f64).floor() as i64)
            });
    }

    /// Exponential moving average of the lag in µs.
    pub fn average_lag(&self) -> i64 {
        self.sampled_lag.load(Ordering::Relaxed)
    }

    /// Overwrite the sampled lag, returning the previous value.
    pub fn set_current_average_lag(&self, lag: i64) -> i64 {
        self.sampled_lag.swap(lag, Ordering::Relaxed)
    }

    /// Load indicator: 1.0 means full concurrency at balanced schedule pressure.
    pub fn effective_load(&self) -> f64 {
        let lag = self.sampled_lag.load(Ordering::Relaxed) as f64;
        let lag = (lag - BALANCED_LAG) / WORK_HORIZON.micros() as f64 * 10.0;
        let lag_factor = if lag < 0.0 { 1.0 / (1.0 - lag) } else { 1.0 + lag };
        let load_factor = (self.wiring.curr_work_force_size)() as f64 / self.wiring.max_capacity as f64;
        load_factor * lag_factor
    }

    /// Periodic maintenance from the scheduler duty cycle.
    pub fn update_state(&self, now: Time) {
        trace!(
            "Load state at {}: lag {}µs, effective load {:.2}",
            now,
            self.average_lag(),
            self.effective_load()
        );
    }

    pub fn mark_worker_exit(&self) {
        trace!("Worker exit, work force now {}", (self.wiring.curr_work_force_size)());
    }

    /// Step up the work force when work is about to start and capacity is missing.
    pub fn ensure_capacity(&self, start_horizon: Time, now: Time) {
        if Self::classify_time_horizon(start_horizon - now) > Capacity::NearTime {
            return;
        }
        if (self.wiring.curr_work_force_size)() < self.wiring.max_capacity {
            (self.wiring.step_up_work_force)(1);
        }
    }

    pub fn tended_next(&self, next_head: Time) -> bool {
        // empty queue reports Time::NEVER
        !next_head.is_regular() || next_head.micros() == self.tended_head.load(Ordering::Relaxed)
    }

    pub fn tend_next(&self, next_head: Time) {
        self.tended_head.store(next_head.micros(), Ordering::Relaxed);
    }

    pub fn classify_time_horizon(off: Time) -> Capacity {
        if off > SLEEP_HORIZON {
            Capacity::IdleWait
        } else if off > WORK_HORIZON {
            Capacity::WorkTime
        } else if off > NEAR_HORIZON {
            Capacity::NearTime
        } else if off > Time::ZERO {
            Capacity::SpinTime
        } else {
            Capacity::Dispatch
        }
    }

    /// Capacity leaving a dispatch cycle.
    pub fn mark_outgoing_capacity(&self, head: Time, now: Time) -> Capacity {
        let horizon = Self::classify_time_horizon(head - now);
        if horizon > Capacity::SpinTime && !self.tended_next(head) {
            Capacity::TendNext
        } else if horizon == Capacity::IdleWait {
            // re-randomise sleeper cycles
            Capacity::WorkTime
        } else {
            horizon
        }
    }

    /// Capacity calling in for work; sleepers rather stay asleep.
    pub fn mark_incoming_capacity(&self, head: Time, now: Time) -> Capacity {
        self.mark_lag_sample(head, now);
        if Self::classify_time_horizon(head - now) > Capacity::NearTime {
            Capacity::IdleWait
        } else {
            self.mark_outgoing_capacity(head, now)
        }
    }

    /// Delay to redistribute capacity, anchored at the tended head.
    pub fn scattered_delay_time(&self, now: Time, capacity: Capacity) -> Time {
        let scatter = |horizon: Time| {
            let mut hash = 0u64;
            hash_combine(&mut hash, now.micros() as u64);
            Time::from_micros((hash % horizon.micros() as u64) as i64)
        };
        let tended = Time::from_micros(self.tended_head.load(Ordering::Relaxed));
        let head_distance = (tended - now).max(Time::ZERO);
        match capacity {
            Capacity::Dispatch | Capacity::SpinTime => Time::ZERO,
            Capacity::TendNext => head_distance,
            Capacity::NearTime => head_distance + scatter(WORK_HORIZON),
            Capacity::WorkTime | Capacity::IdleWait => head_distance + scatter(SLEEP_HORIZON),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gear_core::RealClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn classify_horizon() {
        let next = Time::new(0, 10);
        let ut = Time::new(1, 0);
        let t1 = Time::new(0, 9);
        let t2 = next - SLEEP_HORIZON;
        let t21 = t2 + ut;
        let t3 = next - WORK_HORIZON;
        let t31 = t3 + ut;
        let t4 = next - NEAR_HORIZON;

        let classify = LoadController::classify_time_horizon;
        assert_eq!(classify(next - ut), Capacity::IdleWait);
        assert_eq!(classify(next - t1), Capacity::IdleWait);
        assert_eq!(classify(next - t2), Capacity::WorkTime);
        assert_eq!(classify(next - t21), Capacity::WorkTime);
        assert_eq!(classify(next - t3), Capacity::NearTime);
        assert_eq!(classify(next - t31), Capacity::NearTime);
        assert_eq!(classify(next - t4), Capacity::SpinTime);
        assert_eq!(classify(Time::ZERO), Capacity::Dispatch);
        assert_eq!(classify(t4 - next), Capacity::Dispatch);
    }

    #[test]
    fn tend_next_is_no_history() {
        let ctrl = LoadController::default();
        let (t1, t2, t3) = (Time::new(1, 0), Time::new(2, 0), Time::new(3, 0));
        assert!(!ctrl.tended_next(t2));
        ctrl.tend_next(t2);
        assert!(ctrl.tended_next(t2));
        assert!(!ctrl.tended_next(t3));
        ctrl.tend_next(t3);
        assert!(!ctrl.tended_next(t1));
        assert!(!ctrl.tended_next(t2));
        assert!(ctrl.tended_next(t3));
        assert!(ctrl.tended_next(Time::NEVER));
    }

    #[test]
    fn classify_capacity() {
        let ctrl = LoadController::default();
        let next = Time::new(0, 10);
        let nil = Time::NEVER;
        let mt = Time::new(1, 0);
        let t1 = Time::new(0, 9);
        let t2 = next - SLEEP_HORIZON;
        let t3 = next - WORK_HORIZON;
        let t4 = next - NEAR_HORIZON;
        let t5 = next + mt;

        // next has not been tended yet
        assert_eq!(ctrl.mark_outgoing_capacity(next, mt), Capacity::TendNext);
        ctrl.tend_next(next);
        assert_eq!(ctrl.mark_outgoing_capacity(next, mt), Capacity::WorkTime);
        assert_eq!(ctrl.mark_outgoing_capacity(nil, mt), Capacity::WorkTime);
        assert_eq!(ctrl.mark_outgoing_capacity(next, t2), Capacity::WorkTime);
        assert_eq!(ctrl.mark_outgoing_capacity(next, t3), Capacity::NearTime);
        assert_eq!(ctrl.mark_outgoing_capacity(next, t4), Capacity::SpinTime);
        assert_eq!(ctrl.mark_outgoing_capacity(next, next), Capacity::Dispatch);
        assert_eq!(ctrl.mark_outgoing_capacity(next, t5), Capacity::Dispatch);

        assert_eq!(ctrl.mark_incoming_capacity(nil, mt), Capacity::IdleWait);
        assert_eq!(ctrl.mark_incoming_capacity(next, t1), Capacity::IdleWait);
        assert_eq!(ctrl.mark_incoming_capacity(next, t2), Capacity::IdleWait);
        assert_eq!(ctrl.mark_incoming_capacity(next, t3), Capacity::NearTime);
        assert_eq!(ctrl.mark_incoming_capacity(next, t4), Capacity::SpinTime);
        assert_eq!(ctrl.mark_incoming_capacity(next, next), Capacity::Dispatch);

        ctrl.tend_next(Time::NEVER);
        assert_eq!(ctrl.mark_incoming_capacity(next, t2), Capacity::IdleWait);
        assert_eq!(ctrl.mark_incoming_capacity(next, t3), Capacity::TendNext);
        assert_eq!(ctrl.mark_incoming_capacity(next, t4), Capacity::SpinTime);
        assert_eq!(ctrl.mark_outgoing_capacity(next, t1), Capacity::TendNext);
        assert_eq!(ctrl.mark_outgoing_capacity(nil, mt), Capacity::WorkTime);
    }

    #[test]
    fn scattered_re_check() {
        let ctrl = LoadController::default();
        let now = RealClock::now();
        let ten = Time::new(0, 10);
        ctrl.tend_next(now + ten);

        let between = |lo: Time, hi: Time, val: Time| lo <= val && val < hi;
        assert_eq!(ctrl.scattered_delay_time(now, Capacity::Dispatch), Time::ZERO);
        assert_eq!(ctrl.scattered_delay_time(now, Capacity::SpinTime), Time::ZERO);
        assert_eq!(ctrl.scattered_delay_time(now, Capacity::TendNext), ten);
        assert!(between(ten, ten + WORK_HORIZON, ctrl.scattered_delay_time(now, Capacity::NearTime)));
        assert!(between(ten, ten + SLEEP_HORIZON, ctrl.scattered_delay_time(now, Capacity::WorkTime)));
        assert!(between(ten, ten + SLEEP_HORIZON, ctrl.scattered_delay_time(now, Capacity::IdleWait)));

        ctrl.tend_next(Time::ANYTIME);
        const REPETITIONS: i64 = 100_000;
        let sum: i64 = (0..REPETITIONS)
            .map(|i| ctrl.scattered_delay_time(Time::from_micros(i * 7), Capacity::IdleWait).micros())
            .sum();
        let avg = sum as f64 / REPETITIONS as f64;
        let expect = SLEEP_HORIZON.micros() as f64 / 2.0;
        assert!((avg / expect - 1.0).abs() < 0.05, "avg scatter {avg}");
    }

    #[test]
    fn indicate_average_load() {
        let curr_threads = Arc::new(AtomicUsize::new(0));
        let size = Arc::clone(&curr_threads);
        let ctrl = LoadController::new(Wiring {
            max_capacity: 10,
            curr_work_force_size: Box::new(move || size.load(Ordering::Relaxed)),
            ..Wiring::default()
        });
        assert_eq!(ctrl.average_lag(), 0);
        assert_eq!(ctrl.effective_load(), 0.0);

        // 200µs behind nominal start is balanced pressure
        ctrl.set_current_average_lag(200);
        curr_threads.store(5, Ordering::Relaxed);
        assert_eq!(ctrl.effective_load(), 0.5);
        curr_threads.store(10, Ordering::Relaxed);
        assert_eq!(ctrl.effective_load(), 1.0);
        ctrl.set_current_average_lag(200 + 500);
        assert_eq!(ctrl.effective_load(), 2.0);
        ctrl.set_current_average_lag(200 + 500 + 500);
        assert_eq!(ctrl.effective_load(), 3.0);
        ctrl.set_current_average_lag(200 - 500);
        assert_eq!(ctrl.effective_load(), 0.5);
        ctrl.set_current_average_lag(200 - 500 - 500 - 500);
        assert_eq!(ctrl.effective_load(), 0.25);
        assert_eq!(ctrl.average_lag(), -1300);
        curr_threads.store(2, Ordering::Relaxed);
        assert_eq!(ctrl.effective_load(), 0.05);

        // lag is sampled whenever workers call in
        let head = Time::ZERO;
        ctrl.mark_incoming_capacity(head, Time::new(1, 0));
        assert_eq!(ctrl.average_lag(), -882);
        ctrl.mark_incoming_capacity(head, Time::new(1, 0));
        assert_eq!(ctrl.average_lag(), -540);
        ctrl.mark_incoming_capacity(head, Time::new(0, 1));
        ctrl.mark_incoming_capacity(head, Time::new(0, 1));
        assert_eq!(ctrl.average_lag(), 1291);
        ctrl.mark_incoming_capacity(head, head - Time::new(0, 2));
        assert_eq!(ctrl.average_lag(), -2581);
    }

    #[test]
    fn ensure_capacity_steps_up_for_near_work() {
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&steps);
        let ctrl = LoadController::new(Wiring {
            max_capacity: 4,
            curr_work_force_size: Box::new(|| 1),
            step_up_work_force: Box::new(move |n| {
                counter.fetch_add(n, Ordering::Relaxed);
            }),
        });
        let now = Time::new(0, 1);
        ctrl.ensure_capacity(now + Time::new(0, 1), now);
        assert_eq!(steps.load(Ordering::Relaxed), 0);
        ctrl.ensure_capacity(now, now);
        ctrl.ensure_capacity(now + Time::from_millis(1), now);
        assert_eq!(steps.load(Ordering::Relaxed), 2);
    }
}
