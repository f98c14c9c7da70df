use std::sync::{Mutex, PoisonError};

use gear_core::Time;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

/// Notable occurrences within the engine, reported to an [`EngineObserver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Computational work starts on a worker.
    WorkStart { time: Time },
    /// Computational work completed.
    WorkStop { time: Time },
    /// An Activity chain was aborted with `Kill`.
    ChainAborted { activity: String, time: Time },
    /// A queued chain was discarded after passing its deadline.
    DeadlineMissed {
        activity: String,
        start: Time,
        deadline: Time,
        now: Time,
        compulsory: bool,
    },
    /// Scheduler integrity compromised; a compulsory chain could not be honoured.
    Emergency { reason: String, time: Time },
}

impl EngineEvent {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ChainAborted { .. } | Self::DeadlineMissed { .. } | Self::Emergency { .. }
        )
    }
}

/// Telemetry collaborator receiving engine events.
///
/// Invoked synchronously from worker threads; implementations must be cheap.
pub trait EngineObserver: Send + Sync {
    fn dispatch_event(&self, qualifier: usize, event: &EngineEvent);
}

/// Forwards engine events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn dispatch_event(&self, qualifier: usize, event: &EngineEvent) {
        match event {
            EngineEvent::WorkStart { time } => trace!("work start @{} (quality {})", time, qualifier),
            EngineEvent::WorkStop { time } => trace!("work stop @{} (quality {})", time, qualifier),
            EngineEvent::ChainAborted { activity, time } => {
                warn!("Chain aborted at {}: {}", time, activity)
            }
            EngineEvent::DeadlineMissed {
                activity,
                deadline,
                now,
                ..
            } => debug!("Deadline {} missed at {}: {}", deadline, now, activity),
            EngineEvent::Emergency { reason, time } => error!("Scheduler emergency at {}: {}", time, reason),
        }
    }
}

/// Collects all events, for inspection in tests and instrumentation.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(usize, EngineEvent)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.lock().iter().filter(|(_, event)| predicate(event)).count()
    }

    pub fn aborted(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::ChainAborted { .. }))
    }

    pub fn deadline_misses(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::DeadlineMissed { .. }))
    }

    pub fn emergencies(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::Emergency { .. }))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(usize, EngineEvent)>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineObserver for RecordingObserver {
    fn dispatch_event(&self, qualifier: usize, event: &EngineEvent) {
        self.lock().push((qualifier, event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_observer_counts_by_kind() {
        let obs = RecordingObserver::new();
        let t = Time::new(5, 0);
        obs.dispatch_event(0, &EngineEvent::WorkStart { time: t });
        obs.dispatch_event(0, &EngineEvent::ChainAborted { activity: "Act(TICK".into(), time: t });
        obs.dispatch_event(
            1,
            &EngineEvent::DeadlineMissed {
                activity: "Act(POST".into(),
                start: Time::ZERO,
                deadline: t,
                now: t + t,
                compulsory: false,
            },
        );
        assert_eq!(obs.events().len(), 3);
        assert_eq!(obs.aborted(), 1);
        assert_eq!(obs.deadline_misses(), 1);
        assert_eq!(obs.emergencies(), 0);
        assert_eq!(obs.count(EngineEvent::is_failure), 2);

        obs.clear();
        assert!(obs.events().is_empty());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EngineEvent::Emergency {
            reason: "lost tick".into(),
            time: Time::new(0, 1),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "emergency");
        assert_eq!(json["reason"], "lost tick");
    }
}
