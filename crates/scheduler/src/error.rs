use gear_core::{CoreError, Time};
use thiserror::Error;

/// Errors raised while planning or operating the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("allocation exhausted for deadline {deadline}: {epochs} epochs in use")]
    AllocationExhausted { deadline: Time, epochs: usize },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("deadline {deadline} lies {ahead} beyond the planning limit")]
    PlanningLimit { deadline: Time, ahead: Time },

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("config error: {0}")]
    Config(#[from] CoreError),
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
