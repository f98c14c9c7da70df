use gear_core::Time;

use super::context::ExecutionContext;
use super::types::Proc;
use crate::block_flow::ActivityRef;

/// Extension attached to a `HOOK` Activity.
///
/// Diagnostic taps and other decorators implement this to observe or
/// redirect the calls passing through the hook.
pub trait Hook: Send + Sync {
    /// Regular activation of the hook Activity as part of a chain.
    fn activation(&self, this_hook: &ActivityRef, now: Time, ctx: &mut dyn ExecutionContext) -> Proc;

    /// The hook Activity was dispatched as head of a chain (notification).
    fn notify(&self, this_hook: &ActivityRef, now: Time, ctx: &mut dyn ExecutionContext) -> Proc;

    /// Deadline used when notifications are posted towards this hook.
    fn deadline(&self) -> Time {
        Time::NEVER
    }

    fn diagnostic(&self) -> String {
        "Activity::Hook".to_string()
    }
}
