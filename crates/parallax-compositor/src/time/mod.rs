//! Time subsystem.
//!
//! Frame timing and per-outcome counters for the compositor loop.
//! Intended usage:
//! - one `FrameStats` per compositor
//! - call `begin_frame()` once per engine frame and `record()` with its outcome

mod frame_stats;

pub use frame_stats::{FrameStats, FrameTime};
