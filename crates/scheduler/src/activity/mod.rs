//! Activity verbs and their state-transition semantics.
//!
//! - `core`: the `Activity` record and activation / dispatch
//! - `types`: verb discriminator, payloads and the `Proc` result
//! - `context`: the `ExecutionContext` capability interface
//! - `hook`: extension trait behind the `HOOK` verb

mod context;
mod core;
mod hook;
mod types;

pub use self::context::ExecutionContext;
pub use self::core::Activity;
pub use self::hook::Hook;
pub use self::types::{Callback, Condition, Invocation, Notification, Payload, Proc, TimeWindow, Timing, Verb};
