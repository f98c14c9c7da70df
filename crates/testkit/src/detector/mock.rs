use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gear_scheduler::{JobError, JobFunctor, JobKind, JobParameter};

use super::log::EventLog;

/// Mock function logging each call with its arguments and the current
/// sequence number, returning a rigged response.
pub struct DiagnosticFun<R> {
    id: String,
    log: EventLog,
    seq: Arc<AtomicU32>,
    response: Mutex<R>,
}

impl<R: Clone> DiagnosticFun<R> {
    pub(super) fn new(id: &str, log: EventLog, seq: Arc<AtomicU32>, response: R) -> Self {
        Self {
            id: id.to_string(),
            log,
            seq,
            response: Mutex::new(response),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rig the value returned from subsequent calls.
    pub fn returning(&self, response: R) -> &Self {
        *self.response.lock().unwrap_or_else(PoisonError::into_inner) = response;
        self
    }

    pub fn call(&self, args: &[&dyn fmt::Display]) -> R {
        let args = args.iter().map(|arg| arg.to_string()).collect();
        self.log.call(&self.id, args, self.seq.load(Ordering::SeqCst));
        self.response.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Job functor recording its invocations as `id(nominal_time, key)`.
pub struct MockJobFunctor {
    id: String,
    log: EventLog,
    seq: Arc<AtomicU32>,
}

impl MockJobFunctor {
    pub(super) fn new(id: &str, log: EventLog, seq: Arc<AtomicU32>) -> Self {
        Self {
            id: id.to_string(),
            log,
            seq,
        }
    }
}

impl JobFunctor for MockJobFunctor {
    fn invoke_job_operation(&self, param: JobParameter) -> Result<(), JobError> {
        self.log.call(
            &self.id,
            vec![param.nominal_time.to_string(), param.invo_key.w1.to_string()],
            self.seq.load(Ordering::SeqCst),
        );
        Ok(())
    }

    fn diagnostic(&self) -> String {
        format!("MockJob({})", self.id)
    }

    fn job_kind(&self) -> JobKind {
        JobKind::Test
    }
}
