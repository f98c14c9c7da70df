use serde::{Deserialize, Serialize};

/// Tuning parameters of the [`BlockFlow`](super::BlockFlow) allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockFlowConfig {
    /// Activity slots per epoch.
    #[serde(default = "default_epoch_size")]
    pub epoch_size: usize,
    /// Initial spacing of epoch deadlines in milliseconds.
    #[serde(default = "default_initial_epoch_step_ms")]
    pub initial_epoch_step_ms: u64,
    /// Factor applied to the epoch step whenever an epoch overflows.
    #[serde(default = "default_overflow_boost_factor")]
    pub overflow_boost_factor: f64,
    /// Desired fill ratio of an epoch when it is discarded.
    #[serde(default = "default_target_fill")]
    pub target_fill: f64,
    /// Expected Activities per frame, used to translate announced load.
    #[serde(default = "default_activities_per_frame")]
    pub activities_per_frame: usize,
    /// Hard limit on epochs alive at the same time.
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
}

fn default_epoch_size() -> usize { 100 }
fn default_initial_epoch_step_ms() -> u64 { 200 }
fn default_overflow_boost_factor() -> f64 { 0.9 }
fn default_target_fill() -> f64 { 0.9 }
fn default_activities_per_frame() -> usize { 10 }
fn default_max_epochs() -> usize { 5000 }

impl Default for BlockFlowConfig {
    fn default() -> Self {
        Self {
            epoch_size: default_epoch_size(),
            initial_epoch_step_ms: default_initial_epoch_step_ms(),
            overflow_boost_factor: default_overflow_boost_factor(),
            target_fill: default_target_fill(),
            activities_per_frame: default_activities_per_frame(),
            max_epochs: default_max_epochs(),
        }
    }
}
