#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use gear_core::{RealClock, Time};

    use crate::activity::{Activity, ExecutionContext, Proc};
    use crate::block_flow::{ActivityRef, BlockFlow};
    use crate::error::SchedulerError;
    use crate::job::{InvocationInstanceId, Job, JobError, JobFunctor, JobParameter, ManifestationId};
    use crate::scheduler::invocation::ActivationEvent;
    use crate::scheduler::load_control::WORK_HORIZON;
    use crate::scheduler::runner::execution::ExecutionCtx;
    use crate::scheduler::{EngineEvent, RecordingObserver, Scheduler, SchedulerConfig};

    // ── Mock job ─────────────────────────────────────────────────

    struct MockJob {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl JobFunctor for MockJob {
        fn invoke_job_operation(&self, _param: JobParameter) -> Result<(), JobError> {
            self.log.lock().unwrap().push(self.name);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(JobError::Failed("mock failure".into()))
            } else {
                Ok(())
            }
        }

        fn diagnostic(&self) -> String {
            format!("MockJob({})", self.name)
        }
    }

    struct Harness {
        scheduler: Arc<Scheduler>,
        observer: Arc<RecordingObserver>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            let observer = Arc::new(RecordingObserver::new());
            let scheduler = Scheduler::new(
                BlockFlow::with_defaults(),
                observer.clone(),
                SchedulerConfig::with_capacity(capacity),
            )
            .unwrap();
            Self {
                scheduler,
                observer,
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn job(&self, name: &'static str, fail: bool) -> (Job, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let functor = Arc::new(MockJob {
                name,
                calls: Arc::clone(&calls),
                log: Arc::clone(&self.log),
                fail,
            });
            (Job::new(functor, InvocationInstanceId::from_frame(1), Time::ZERO), calls)
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.scheduler.terminate_processing();
        }
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(3) {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn probe() -> ActivityRef {
        ActivityRef::new(Activity::tick())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    #[test]
    fn fresh_scheduler_is_idle() {
        let h = Harness::new(2);
        assert!(h.scheduler.empty());
        assert_eq!(h.scheduler.work_force_size(), 0);
        assert_eq!(h.scheduler.load_indicator(), 0.0);
        assert_eq!(h.scheduler.metrics().chains_dispatched, 0);
    }

    #[test]
    fn ignite_and_terminate() {
        let h = Harness::new(2);
        h.scheduler.ignite();
        assert!(!h.scheduler.empty());
        assert_eq!(h.scheduler.work_force_size(), 2);

        h.scheduler.terminate_processing();
        assert_eq!(h.scheduler.work_force_size(), 0);
        assert!(h.scheduler.empty());
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = SchedulerConfig::with_capacity(1);
        config.dismiss_cycles = 0;
        let res = Scheduler::new(BlockFlow::with_defaults(), Arc::new(RecordingObserver::new()), config);
        assert!(matches!(res, Err(SchedulerError::Config(_))));
    }

    #[test]
    fn reported_deadline_miss_reaches_observer() {
        let h = Harness::new(1);
        h.scheduler
            .report_deadline_miss("ChainCalc #7", Time::new(0, 1), Time::new(30, 1));

        assert_eq!(h.observer.deadline_misses(), 1);
        assert_eq!(h.observer.emergencies(), 0);
        assert_eq!(h.scheduler.metrics().deadline_misses, 1);
        let events = h.observer.events();
        assert!(matches!(
            &events[0],
            EngineEvent::DeadlineMissed { activity, compulsory: false, .. } if activity == "ChainCalc #7"
        ));
    }

    #[test]
    fn metrics_survive_poisoned_lock() {
        let h = Harness::new(1);
        let metrics = Arc::clone(&h.scheduler.metrics);
        let _ = thread::spawn(move || {
            let _guard = metrics.write().unwrap();
            panic!("poison the metrics lock");
        })
        .join();
        assert!(h.scheduler.metrics.is_poisoned());

        h.scheduler.update_metrics(|m| m.duty_cycles += 1);
        h.scheduler.update_metrics(|m| m.emergencies += 1);
        let snapshot = h.scheduler.metrics();
        assert_eq!(snapshot.duty_cycles, 1);
        assert_eq!(snapshot.emergencies, 1);
    }

    // ── Dispatch ─────────────────────────────────────────────────

    #[test]
    fn posted_job_is_dispatched() {
        let h = Harness::new(2);
        let (job, calls) = h.job("calc", false);
        h.scheduler
            .define_schedule(job)
            .start_offset(Time::from_millis(2))
            .life_window(Time::from_millis(500))
            .post()
            .unwrap();
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1));
        assert!(wait_until(|| h
            .observer
            .count(|e| matches!(e, EngineEvent::WorkStop { .. }))
            == 1));
        assert_eq!(h.observer.count(|e| matches!(e, EngineEvent::WorkStart { .. })), 1);
        assert!(h.scheduler.metrics().chains_dispatched >= 1);
        assert!(h.scheduler.metrics().last_dispatch.is_some());
        assert_eq!(h.observer.aborted(), 0);
    }

    #[test]
    fn undefined_or_distant_windows_are_rejected() {
        let h = Harness::new(1);
        let (job, _) = h.job("calc", false);

        let res = h.scheduler.define_schedule(job.clone()).post();
        assert!(matches!(res, Err(SchedulerError::InvalidSchedule(_))));

        let res = h
            .scheduler
            .define_schedule(job.clone())
            .start_offset(Time::from_millis(1))
            .post();
        assert!(matches!(res, Err(SchedulerError::InvalidSchedule(_))));

        let res = h
            .scheduler
            .define_schedule(job)
            .start_offset(Time::from_millis(1))
            .life_window(Time::new(0, 30))
            .post();
        assert!(matches!(res, Err(SchedulerError::PlanningLimit { .. })));

        assert!(h.scheduler.empty());
        assert_eq!(h.scheduler.work_force_size(), 0);
    }

    #[test]
    fn failing_job_is_reported_once_and_processing_continues() {
        let h = Harness::new(2);
        let (bad, bad_calls) = h.job("bad", true);
        let (good, good_calls) = h.job("good", false);
        h.scheduler
            .define_schedule(bad)
            .start_offset(Time::from_millis(1))
            .life_window(Time::from_millis(500))
            .post()
            .unwrap();
        h.scheduler
            .define_schedule(good)
            .start_offset(Time::from_millis(10))
            .life_window(Time::from_millis(500))
            .post()
            .unwrap();

        assert!(wait_until(|| good_calls.load(Ordering::SeqCst) == 1));
        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.observer.aborted(), 1);
        assert_eq!(h.scheduler.metrics().chains_aborted, 1);
    }

    #[test]
    fn dependent_job_waits_for_predecessor() {
        let h = Harness::new(2);
        let (first, _) = h.job("pred", false);
        let (second, succ_calls) = h.job("succ", false);
        let mut pred = h
            .scheduler
            .define_schedule(first)
            .start_offset(Time::from_millis(20))
            .life_window(Time::from_millis(500));
        let mut succ = h
            .scheduler
            .define_schedule(second)
            .start_offset(Time::from_millis(2))
            .life_window(Time::from_millis(500));
        succ.link_to_predecessor(&mut pred, false).unwrap();
        let _succ = succ.post().unwrap();
        let _pred = pred.post().unwrap();

        assert!(wait_until(|| succ_calls.load(Ordering::SeqCst) == 1));
        assert_eq!(*h.log.lock().unwrap(), vec!["pred", "succ"]);
    }

    #[test]
    fn planning_job_seeds_calc_stream() {
        let h = Harness::new(2);
        let (planner, calls) = h.job("planner", false);
        let stream = ManifestationId(3);
        h.scheduler.seed_calc_stream(planner, stream, 25.0).unwrap();
        assert!(h.scheduler.layer1.is_activated(stream));
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1));
    }

    // ── Execution context ────────────────────────────────────────

    #[test]
    fn follow_up_inherits_root_window() {
        let h = Harness::new(1);
        let now = RealClock::now();
        let root = ActivationEvent::new(probe(), now, now + Time::from_millis(100)).compulsory(true);
        let mut ctx = ExecutionCtx {
            scheduler: &h.scheduler,
            root_event: root,
        };
        let chain = probe();
        assert_eq!(ctx.post(Time::ANYTIME, Time::NEVER, &chain), Proc::Pass);
        let queued = h.scheduler.layer1.peek_head().unwrap();
        assert!(queued.activity.ptr_eq(&chain));
        assert_eq!(queued.starting, now);
        assert_eq!(queued.deadline, now + Time::from_millis(100));
        assert!(queued.compulsory);
    }

    #[test]
    fn follow_up_without_deadline_kills_chain() {
        let h = Harness::new(1);
        let root = ActivationEvent::new(probe(), RealClock::now(), Time::NEVER);
        let mut ctx = ExecutionCtx {
            scheduler: &h.scheduler,
            root_event: root,
        };
        assert_eq!(ctx.post(Time::ANYTIME, Time::NEVER, &probe()), Proc::Kill);
        assert!(h.scheduler.empty());
    }

    // ── Duty cycle ───────────────────────────────────────────────

    #[test]
    fn duty_cycle_purges_outdated_entries() {
        let h = Harness::new(1);
        let now = RealClock::now() + Time::new(0, 1);
        let past = now - Time::from_millis(10);
        h.scheduler
            .layer1
            .instruct(ActivationEvent::new(probe(), past, past + Time::from_millis(5)).compulsory(true));
        h.scheduler
            .layer1
            .instruct(ActivationEvent::new(probe(), past, past + Time::from_millis(6)));

        h.scheduler.handle_duty_cycle(now, false);
        assert_eq!(h.observer.deadline_misses(), 2);
        assert_eq!(h.observer.emergencies(), 1);
        assert_eq!(h.scheduler.metrics().deadline_misses, 2);
        assert_eq!(h.scheduler.metrics().duty_cycles, 1);
        // nothing left to tend, so no further tick
        assert!(h.scheduler.empty());
    }

    #[test]
    fn withdrawn_manifestation_is_discarded_silently() {
        let h = Harness::new(1);
        let stream = ManifestationId(7);
        let now = RealClock::now();
        h.scheduler.layer1.activate(stream);
        h.scheduler.layer1.instruct(
            ActivationEvent::new(probe(), now, now + Time::new(0, 1)).with_manifestation(stream),
        );
        h.scheduler.withdraw_manifestation(stream);

        h.scheduler.handle_duty_cycle(now, false);
        assert!(h.scheduler.empty());
        assert_eq!(h.observer.deadline_misses(), 0);
        assert_eq!(h.scheduler.metrics().discarded_inactive, 1);
    }

    #[test]
    fn forced_duty_cycle_posts_compulsory_tick() {
        let h = Harness::new(1);
        let now = RealClock::now();
        h.scheduler.handle_duty_cycle(now, true);
        assert_eq!(h.scheduler.layer1.len(), 1);
        let tick = h.scheduler.layer1.peek_head().unwrap();
        assert_eq!(tick.starting, now + WORK_HORIZON);
        assert_eq!(
            tick.deadline,
            now + WORK_HORIZON + h.scheduler.config().duty_cycle_tolerance()
        );
        assert!(tick.compulsory);
        assert!(!h.scheduler.layer2.holds_grooming_token_here());
    }

    #[test]
    fn worker_failure_triggers_emergency() {
        let h = Harness::new(1);
        h.scheduler.handle_worker_termination(true);
        h.scheduler.handle_worker_termination(false);
        assert_eq!(h.observer.emergencies(), 1);
        let metrics = h.scheduler.metrics();
        assert_eq!(metrics.worker_exits, 2);
        assert_eq!(metrics.worker_failures, 1);
    }
}
