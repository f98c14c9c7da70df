//! Time-bound, dependency-aware scheduler for render Activities.
//!
//! Work is expressed as chains of [`Activity`] records allocated from the
//! [`BlockFlow`] arena and wired by the [`ActivityLang`]. The [`Scheduler`]
//! queues chains by start time, dispatches them onto a bounded worker pool
//! and reports timing and failures to an [`EngineObserver`].

pub mod activity;
pub mod activity_lang;
pub mod block_flow;
pub mod error;
pub mod job;
pub mod scheduler;

pub use activity::{Activity, ExecutionContext, Hook, Proc, Verb};
pub use activity_lang::{ActivityLang, Term};
pub use block_flow::{ActivityRef, BlockFlow, BlockFlowConfig};
pub use error::{Result, SchedulerError};
pub use job::{InvocationInstanceId, Job, JobError, JobFunctor, JobKind, JobParameter, ManifestationId};
pub use scheduler::{
    EngineEvent, EngineObserver, RecordingObserver, ScheduleSpec, Scheduler, SchedulerConfig, SchedulerMetrics,
    TracingObserver,
};
