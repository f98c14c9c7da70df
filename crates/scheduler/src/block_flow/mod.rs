//! Epoch-based bulk allocation of Activities.
//!
//! Split into focused submodules:
//! - `allocator`: the `BlockFlow` epoch list and allocation handles
//! - `epoch`: fixed-capacity blocks with lock-free slot claiming
//! - `handle`: strong `ActivityRef` handles and validated weak links
//! - `config`: allocator tuning parameters

mod allocator;
mod config;
mod epoch;
mod handle;

pub use allocator::{AllocatorHandle, BlockFlow};
pub use config::BlockFlowConfig;
pub use handle::{ActivityLink, ActivityRef, LinkCell};
