//! Cross-device synchronization.
//!
//! The session backend renders on the engine's device but hands images to the
//! display system through a second device. [`FenceBridge`] orders the two:
//! the engine side signals a [`TimelineFence`] once per frame, and the second
//! device's command stream waits for exactly that value before it reads any
//! shared texture.

mod bridge;
mod fence;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use bridge::{FenceBridge, InteropDevice, Transfer};
pub use fence::TimelineFence;

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
