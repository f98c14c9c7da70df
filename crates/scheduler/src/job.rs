//! Job payload invoked by `INVOKE` Activities.
//!
//! A [`JobFunctor`] is the actual unit of computation, registered and owned
//! by whoever builds the render graph. A [`Job`] binds a functor to the
//! parameters of one invocation (nominal time and invocation key).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use gear_core::{hash_combine, Time};
use serde::{Deserialize, Serialize};

/// Error type for job execution.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job failed: {0}")]
    Failed(String),
    #[error("Job timed out")]
    Timeout,
    #[error("Prerequisite not available: {0}")]
    PrerequisiteNotAvailable(String),
}

/// Classification of job workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Calculating frame data, CPU bound.
    Calc,
    /// Accessing prerequisites, IO bound.
    Load,
    /// Scheduler self-organisation (planning).
    Meta,
    /// Instrumentation and test jobs.
    Test,
}

/// Opaque ID attached to each individual job invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationInstanceId {
    pub w1: u64,
    pub w2: u64,
}

impl InvocationInstanceId {
    pub const fn new(w1: u64, w2: u64) -> Self {
        Self { w1, w2 }
    }

    pub const fn from_frame(frame: i64) -> Self {
        Self { w1: frame as u64, w2: 0 }
    }

    pub const fn frame_number(&self) -> i64 {
        self.w1 as i64
    }
}

impl fmt::Display for InvocationInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.w1, self.w2)
    }
}

/// Parameters of a single job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobParameter {
    pub nominal_time: Time,
    pub invo_key: InvocationInstanceId,
}

/// A unit of computation the scheduler can invoke.
pub trait JobFunctor: Send + Sync {
    /// Perform the actual job operation.
    fn invoke_job_operation(&self, param: JobParameter) -> Result<(), JobError>;

    /// Human-readable label for logging and diagnostics.
    fn diagnostic(&self) -> String;

    fn job_kind(&self) -> JobKind {
        JobKind::Calc
    }

    fn build_instance_id(&self, seed: u64) -> InvocationInstanceId {
        InvocationInstanceId::new(seed, 0)
    }

    fn hash_of_instance(&self, id: InvocationInstanceId) -> u64 {
        let mut hash = id.w1;
        hash_combine(&mut hash, id.w2);
        hash
    }
}

/// Inert job functor, doing nothing.
#[derive(Debug, Default)]
pub struct NopJobFunctor;

impl JobFunctor for NopJobFunctor {
    fn invoke_job_operation(&self, _param: JobParameter) -> Result<(), JobError> {
        Ok(())
    }

    fn diagnostic(&self) -> String {
        "NopJobFunctor".to_string()
    }

    fn job_kind(&self) -> JobKind {
        JobKind::Test
    }
}

/// Complete definition of an individual job.
#[derive(Clone)]
pub struct Job {
    pub functor: Arc<dyn JobFunctor>,
    pub parameter: JobParameter,
}

impl Job {
    pub fn new(functor: Arc<dyn JobFunctor>, invo_key: InvocationInstanceId, nominal_time: Time) -> Self {
        Self {
            functor,
            parameter: JobParameter { nominal_time, invo_key },
        }
    }

    /// Invoke the job operation synchronously.
    pub fn trigger_job(&self) -> Result<(), JobError> {
        self.functor.invoke_job_operation(self.parameter)
    }

    pub fn nominal_time(&self) -> Time {
        self.parameter.nominal_time
    }

    pub fn invocation_instance_id(&self) -> InvocationInstanceId {
        self.parameter.invo_key
    }

    pub fn kind(&self) -> JobKind {
        self.functor.job_kind()
    }

    pub fn uses_functor(&self, functor: &Arc<dyn JobFunctor>) -> bool {
        Arc::ptr_eq(&self.functor, functor)
    }

    /// Hash based job identity.
    pub fn hash_value(&self) -> u64 {
        let mut hash = self.functor.hash_of_instance(self.parameter.invo_key);
        hash_combine(&mut hash, self.parameter.nominal_time.micros() as u64);
        hash
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.hash_value() == other.hash_value()
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("functor", &self.functor.diagnostic())
            .field("nominal_time", &self.parameter.nominal_time)
            .field("invo_key", &self.parameter.invo_key)
            .finish()
    }
}

/// Identifies a render stream; scheduled work is only dispatched while its
/// manifestation is active. ID 0 is always active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestationId(pub u32);

impl ManifestationId {
    pub const DEFAULT: ManifestationId = ManifestationId(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFunctor {
        calls: AtomicUsize,
    }

    impl JobFunctor for CountingFunctor {
        fn invoke_job_operation(&self, param: JobParameter) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if param.invo_key.w1 == 13 {
                return Err(JobError::Failed("unlucky".into()));
            }
            Ok(())
        }

        fn diagnostic(&self) -> String {
            "CountingFunctor".into()
        }
    }

    #[test]
    fn trigger_job_invokes_functor() {
        let functor = Arc::new(CountingFunctor { calls: AtomicUsize::new(0) });
        let job = Job::new(functor.clone(), InvocationInstanceId::new(1, 2), Time::new(0, 5));
        assert!(job.trigger_job().is_ok());
        assert_eq!(functor.calls.load(Ordering::Relaxed), 1);
        assert_eq!(job.kind(), JobKind::Calc);
        assert_eq!(job.nominal_time(), Time::new(0, 5));

        let failing = Job::new(functor.clone(), InvocationInstanceId::new(13, 0), Time::ZERO);
        assert!(matches!(failing.trigger_job(), Err(JobError::Failed(_))));
        assert_eq!(functor.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn job_identity_is_hash_based() {
        let functor: Arc<dyn JobFunctor> = Arc::new(NopJobFunctor);
        let a = Job::new(functor.clone(), InvocationInstanceId::new(1, 2), Time::new(0, 5));
        let b = Job::new(functor.clone(), InvocationInstanceId::new(1, 2), Time::new(0, 5));
        let c = Job::new(functor.clone(), InvocationInstanceId::new(1, 3), Time::new(0, 5));
        let d = Job::new(functor.clone(), InvocationInstanceId::new(1, 2), Time::new(0, 6));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.uses_functor(&functor));
        assert_eq!(a.kind(), JobKind::Test);
    }

    #[test]
    fn frame_number_round_trip() {
        let id = InvocationInstanceId::from_frame(42);
        assert_eq!(id.frame_number(), 42);
        assert_eq!(id.to_string(), "2a:0");
    }
}
