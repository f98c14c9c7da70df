#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use gear_core::Time;

    use crate::activity::{Activity, ExecutionContext, Proc, Verb};
    use crate::activity_lang::{find_verb, ActivityLang};
    use crate::block_flow::{ActivityRef, BlockFlow};
    use crate::job::{InvocationInstanceId, Job, JobError, JobFunctor, JobParameter};

    #[derive(Default)]
    struct CountingFunctor {
        calls: AtomicUsize,
    }

    impl JobFunctor for CountingFunctor {
        fn invoke_job_operation(&self, _param: JobParameter) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn diagnostic(&self) -> String {
            "Counting".into()
        }
    }

    struct TraceCtx {
        now: Time,
        trace: Vec<String>,
    }

    impl TraceCtx {
        fn at(now: Time) -> Self {
            Self { now, trace: Vec::new() }
        }
    }

    impl ExecutionContext for TraceCtx {
        fn post(&mut self, when: Time, dead: Time, chain: &ActivityRef) -> Proc {
            self.trace.push(format!("post {} {when}..{dead}", chain.verb()));
            Proc::Pass
        }
        fn work(&mut self, _now: Time, _qualifier: usize) {
            self.trace.push("work".into());
        }
        fn done(&mut self, _now: Time, _qualifier: usize) {
            self.trace.push("done".into());
        }
        fn tick(&mut self, now: Time) -> Proc {
            self.trace.push(format!("tick {now}"));
            Proc::Pass
        }
        fn sched_time(&mut self) -> Time {
            self.now
        }
    }

    fn chain_verbs(head: &ActivityRef) -> Vec<Verb> {
        let mut verbs = Vec::new();
        let mut current = Some(head.clone());
        while let Some(act) = current {
            verbs.push(act.verb());
            current = act.next();
        }
        verbs
    }

    fn setup() -> (Arc<BlockFlow>, ActivityLang, Arc<CountingFunctor>) {
        let flow = BlockFlow::with_defaults();
        let lang = ActivityLang::new(Arc::clone(&flow));
        (flow, lang, Arc::new(CountingFunctor::default()))
    }

    fn job(functor: &Arc<CountingFunctor>, nominal: Time) -> Job {
        Job::new(functor.clone(), InvocationInstanceId::new(1, 0), nominal)
    }

    #[test]
    fn calculation_job_term() {
        let (flow, lang, functor) = setup();
        let start = Time::new(0, 1);
        let dead = Time::new(0, 10);
        let post = {
            let term = lang.build_calculation_job(job(&functor, Time::ZERO), start, dead).unwrap();
            term.post().clone()
        };
        // generated chain remains valid after the term is gone
        assert_eq!(flow.cnt_elm(), 5);
        assert_eq!(flow.cnt_epochs(), 1);
        assert!(flow.find(&post) > dead);
        assert!(flow.find(&post) < dead + Time::from_millis(500));

        assert_eq!(post.time_window().unwrap().life, start);
        assert_eq!(post.time_window().unwrap().dead, dead);
        assert_eq!(
            chain_verbs(&post),
            vec![Verb::Post, Verb::Gate, Verb::WorkStart, Verb::Invoke, Verb::WorkStop]
        );
        let gate = find_verb(&post, Verb::Gate).unwrap();
        assert_eq!(gate.condition().unwrap().rest(), 0);
        assert_eq!(gate.condition().unwrap().deadline(), dead);

        let invoke = find_verb(&post, Verb::Invoke).unwrap();
        assert_ne!(flow.find(&invoke), Time::NEVER);
        let mut ctx = TraceCtx::at(Time::new(55, 5));
        assert_eq!(invoke.activate(Time::new(55, 5), &mut ctx), Proc::Pass);
        assert_eq!(functor.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn dispatch_calculation_job_runs_work_bracket() {
        let (_flow, lang, functor) = setup();
        let term = lang
            .build_calculation_job(job(&functor, Time::ZERO), Time::new(0, 1), Time::new(0, 10))
            .unwrap();
        let mut ctx = TraceCtx::at(Time::new(0, 2));
        assert_eq!(ActivityLang::dispatch_chain(term.post(), &mut ctx), Proc::Pass);
        assert_eq!(ctx.trace, vec!["work", "done"]);
        assert_eq!(functor.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn async_load_job_is_severed() {
        let (flow, lang, functor) = setup();
        let term = lang
            .build_async_load_job(job(&functor, Time::ZERO), Time::new(0, 1), Time::new(0, 10))
            .unwrap();
        assert_eq!(flow.cnt_elm(), 4);
        assert_eq!(chain_verbs(term.post()), vec![Verb::Post, Verb::WorkStart, Verb::Invoke]);
        let callback = term.callback().unwrap();
        assert_eq!(chain_verbs(callback), vec![Verb::WorkStop]);

        let mut ctx = TraceCtx::at(Time::new(0, 2));
        ActivityLang::dispatch_chain(term.post(), &mut ctx);
        assert_eq!(ctx.trace, vec!["work"]);
        ActivityLang::dispatch_chain(callback, &mut ctx);
        assert_eq!(ctx.trace, vec!["work", "done"]);
    }

    #[test]
    fn meta_job_is_minimal() {
        let (flow, lang, functor) = setup();
        let term = lang
            .build_meta_job(job(&functor, Time::ZERO), Time::new(0, 1), Time::new(0, 2))
            .unwrap();
        assert_eq!(flow.cnt_elm(), 2);
        assert_eq!(chain_verbs(term.post()), vec![Verb::Post, Verb::Invoke]);
        assert!(term.callback().is_err());
        assert!(term.gate().is_none());
    }

    #[test]
    fn append_notification_links_terms() {
        let (_flow, lang, functor) = setup();
        let mut pred = lang
            .build_calculation_job(job(&functor, Time::ZERO), Time::new(0, 1), Time::new(0, 2))
            .unwrap();
        let mut succ = lang
            .build_calculation_job(job(&functor, Time::ZERO), Time::new(0, 3), Time::new(0, 4))
            .unwrap();
        pred.append_notification_to(&mut succ, false).unwrap();

        assert_eq!(
            chain_verbs(pred.post()),
            vec![Verb::Post, Verb::Gate, Verb::WorkStart, Verb::Invoke, Verb::WorkStop, Verb::Notify]
        );
        let gate = succ.gate().unwrap();
        assert_eq!(gate.condition().unwrap().rest(), 1);

        let notify = find_verb(pred.post(), Verb::Notify).unwrap();
        let notification = notify.notification().unwrap();
        assert!(notification.target.get().unwrap().ptr_eq(gate));
        assert_eq!(notification.timing(), Time::new(0, 3));

        // predecessor completion posts the notification towards the gate
        let mut ctx = TraceCtx::at(Time::new(500, 1));
        ActivityLang::dispatch_chain(pred.post(), &mut ctx);
        assert_eq!(ctx.trace, vec!["work", "done", "post GATE 3.000..4.000"]);
    }

    #[test]
    fn unlimited_notification_has_no_start_hint() {
        let (_flow, lang, functor) = setup();
        let mut pred = lang
            .build_calculation_job(job(&functor, Time::ZERO), Time::new(0, 1), Time::new(0, 2))
            .unwrap();
        let mut succ = lang
            .build_calculation_job(job(&functor, Time::ZERO), Time::new(0, 3), Time::new(0, 4))
            .unwrap();
        pred.append_notification_to(&mut succ, true).unwrap();
        let notify = find_verb(pred.post(), Verb::Notify).unwrap();
        assert_eq!(notify.notification().unwrap().timing(), Time::ANYTIME);
    }

    #[test]
    fn require_direct_activation_inserts_trigger() {
        let (_flow, lang, functor) = setup();
        let mut term = lang
            .build_meta_job(job(&functor, Time::ZERO), Time::new(0, 1), Time::new(0, 2))
            .unwrap();
        term.require_direct_activation().unwrap();
        assert_eq!(
            chain_verbs(term.post()),
            vec![Verb::Post, Verb::Notify, Verb::Gate, Verb::Invoke]
        );
        assert_eq!(term.gate().unwrap().condition().unwrap().rest(), 1);
    }

    #[test]
    fn expect_notification_rejects_other_verbs() {
        let (_flow, lang, functor) = setup();
        let mut term = lang
            .build_calculation_job(job(&functor, Time::ZERO), Time::new(0, 1), Time::new(0, 2))
            .unwrap();
        let tick = ActivityRef::new(Activity::tick());
        assert!(term.expect_notification(&tick, false).is_err());
    }

    #[test]
    fn dispatch_chain_through_gate() {
        let now = Time::new(11, 1);
        let tick = ActivityRef::new(Activity::tick());
        let gate = ActivityRef::new(Activity::gate(0, Time::new(22, 2)).followed_by(&tick));
        let post = ActivityRef::new(Activity::post(now, Time::new(22, 2)).followed_by(&gate));

        let mut ctx = TraceCtx::at(now);
        assert_eq!(ActivityLang::dispatch_chain(&post, &mut ctx), Proc::Pass);
        assert_eq!(ctx.trace, vec!["tick 1.011"]);

        // blocked gate ends the chain regularly
        gate.condition().unwrap().inc_dependencies();
        assert_eq!(ActivityLang::dispatch_chain(&post, &mut ctx), Proc::Pass);
        assert_eq!(ctx.trace.len(), 1);

        // a notification dispatched towards the gate opens it and continues
        assert_eq!(ActivityLang::dispatch_chain(&gate, &mut ctx), Proc::Pass);
        assert_eq!(gate.condition().unwrap().rest(), 0);
        assert_eq!(ctx.trace, vec!["tick 1.011", "tick 1.011"]);
    }

    #[test]
    fn tick_is_allocated_by_deadline() {
        let (flow, lang, _functor) = setup();
        let tick = lang.create_tick(Time::new(0, 1)).unwrap();
        assert!(tick.is(Verb::Tick));
        assert!(flow.find(&tick) >= Time::new(0, 1));
        lang.discard_before(Time::new(0, 5));
        assert_eq!(flow.cnt_epochs(), 0);
    }
}
