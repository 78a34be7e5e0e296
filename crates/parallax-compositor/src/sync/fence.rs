use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::lock;
use crate::error::SyncError;

/// Monotonic counter fence shared between devices.
///
/// Cloning yields another handle to the same fence.
#[derive(Clone, Debug)]
pub struct TimelineFence {
    inner: Arc<FenceInner>,
}

#[derive(Debug)]
struct FenceInner {
    label: String,
    value: Mutex<u64>,
    reached: Condvar,
}

impl TimelineFence {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                label: label.into(),
                value: Mutex::new(0),
                reached: Condvar::new(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Last value signalled.
    pub fn completed(&self) -> u64 {
        *lock(&self.inner.value)
    }

    /// Raises the fence to `value`, which must be above the current value.
    pub fn signal(&self, value: u64) -> Result<(), SyncError> {
        let mut current = lock(&self.inner.value);
        if value <= *current {
            return Err(SyncError::NonMonotonic { value, current: *current });
        }
        *current = value;
        drop(current);
        self.inner.reached.notify_all();
        Ok(())
    }

    /// Blocks until the fence reaches `value`, bounded by `timeout`.
    pub fn wait(&self, value: u64, timeout: Duration) -> Result<(), SyncError> {
        let deadline = Instant::now() + timeout;
        let mut current = lock(&self.inner.value);
        while *current < value {
            let now = Instant::now();
            if now >= deadline {
                return Err(SyncError::Timeout { value, completed: *current, timeout });
            }
            current = match self.inner.reached.wait_timeout(current, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(())
    }

    pub fn is_reached(&self, value: u64) -> bool {
        self.completed() >= value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rejects_non_monotonic_signal() {
        let fence = TimelineFence::new("test");
        fence.signal(2).unwrap();
        assert!(matches!(fence.signal(2), Err(SyncError::NonMonotonic { value: 2, current: 2 })));
        assert!(matches!(fence.signal(1), Err(SyncError::NonMonotonic { .. })));
        assert_eq!(fence.completed(), 2);
    }

    #[test]
    fn wait_times_out_below_value() {
        let fence = TimelineFence::new("test");
        fence.signal(1).unwrap();
        let err = fence.wait(2, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, SyncError::Timeout { value: 2, completed: 1, .. }));
    }

    #[test]
    fn wait_wakes_on_signal_from_other_thread() {
        let fence = TimelineFence::new("test");
        let signaller = fence.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            signaller.signal(3).unwrap();
        });
        fence.wait(3, Duration::from_secs(5)).unwrap();
        t.join().unwrap();
        assert!(fence.is_reached(3));
    }
}
