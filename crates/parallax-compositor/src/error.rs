//! Error taxonomy.
//!
//! - [`InitError`]: the display system cannot be brought up. Fatal to VR; the
//!   compositor drops to passthrough.
//! - [`FrameError`]: one frame's VR work failed. Skip the frame, keep going.
//! - [`ResourceBuildError`]: a render context could not be built. Fatal for
//!   that profile only.
//! - [`SyncError`]: a cross-device fence wait/signal failed. Frame dropped.
//! - [`BackendError`]: what backend operations return; [`BackendError::action`]
//!   classifies it for the frame pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::context::RenderTarget;
use crate::device::{SharedHandle, TextureFormat, TextureId};

/// Graphics-device failure.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("texture {0:?} does not exist")]
    UnknownTexture(TextureId),

    #[error("failed to allocate texture `{label}` ({width}x{height}): {reason}")]
    Allocation {
        label: String,
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("shared handle {0:?} is not known to this device")]
    UnknownSharedHandle(SharedHandle),

    #[error("incompatible textures: {0}")]
    Incompatible(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("timed out after {0:?} waiting for the GPU")]
    Timeout(Duration),

    #[error("device lost: {0}")]
    Lost(String),
}

/// Display-system (runtime) failure.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("display system not present")]
    NotPresent,

    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient runtime failure: {0}")]
    Transient(String),

    #[error("runtime does not support {0}")]
    Unsupported(String),

    #[error("display system lost: {0}")]
    Lost(String),
}

impl RuntimeError {
    /// The runtime object is gone; nothing but a backend teardown helps.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::NotPresent | RuntimeError::Lost(_))
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("no display system is available")]
    DisplaySystemAbsent,

    #[error("failed to create the {what}: {source}")]
    Runtime {
        what: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("no compatible swapchain format (runtime offers {offered:?})")]
    NoCompatibleFormat { offered: Vec<TextureFormat> },

    #[error(transparent)]
    Resources(#[from] ResourceBuildError),

    #[error("no default render context could be selected")]
    NoDefaultContext,

    #[error("interop worker could not be started: {0}")]
    Interop(#[source] std::io::Error),
}

impl InitError {
    pub(crate) fn runtime(what: &'static str, source: RuntimeError) -> Self {
        if matches!(source, RuntimeError::NotPresent) {
            InitError::DisplaySystemAbsent
        } else {
            InitError::Runtime { what, source }
        }
    }
}

/// A render context could not be (fully) built.
#[derive(Debug, Error)]
#[error("failed to build render context `{profile}` ({target:?}): {source}")]
pub struct ResourceBuildError {
    pub profile: String,
    /// `None` when the failure is not tied to one target (e.g. swapchains).
    pub target: Option<RenderTarget>,
    #[source]
    pub source: DeviceError,
}

/// Transient per-frame failure.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("runtime failure during {stage}: {source}")]
    Runtime {
        stage: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("no runtime frame is in flight")]
    NoFrameInFlight,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fence wait for {value} timed out after {timeout:?} (completed {completed})")]
    Timeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    #[error("fence value {value} is not above the current value {current}")]
    NonMonotonic { value: u64, current: u64 },

    #[error("interop worker is not running")]
    WorkerGone,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// What the frame pipeline does with a failed backend operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameErrorAction {
    /// Drop VR work for this frame only.
    SkipFrame,
    /// The backend is unusable; tear it down and fall back to passthrough.
    Teardown,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("display system lost: {0}")]
    Lost(#[source] RuntimeError),

    #[error("backend is not initialised")]
    NotInitialized,
}

impl BackendError {
    /// Routes runtime failures: fatal ones become [`BackendError::Lost`],
    /// everything else is a transient [`FrameError`].
    pub(crate) fn runtime(stage: &'static str, source: RuntimeError) -> Self {
        if source.is_fatal() {
            BackendError::Lost(source)
        } else {
            BackendError::Frame(FrameError::Runtime { stage, source })
        }
    }

    pub fn action(&self) -> FrameErrorAction {
        match self {
            BackendError::Sync(SyncError::Device(DeviceError::Lost(_)) | SyncError::WorkerGone) => {
                FrameErrorAction::Teardown
            }
            BackendError::Frame(_) | BackendError::Sync(_) => FrameErrorAction::SkipFrame,
            BackendError::Device(DeviceError::Lost(_)) => FrameErrorAction::Teardown,
            BackendError::Device(_) => FrameErrorAction::SkipFrame,
            BackendError::Lost(_) | BackendError::NotInitialized => FrameErrorAction::Teardown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_split_by_severity() {
        let transient = BackendError::runtime("submit", RuntimeError::Transient("busy".into()));
        assert_eq!(transient.action(), FrameErrorAction::SkipFrame);

        let lost = BackendError::runtime("submit", RuntimeError::Lost("unplugged".into()));
        assert_eq!(lost.action(), FrameErrorAction::Teardown);
    }

    #[test]
    fn sync_timeouts_skip_but_a_lost_peer_tears_down() {
        let e = BackendError::from(SyncError::Timeout {
            value: 4,
            completed: 3,
            timeout: Duration::from_millis(10),
        });
        assert_eq!(e.action(), FrameErrorAction::SkipFrame);

        let lost = BackendError::from(SyncError::Device(DeviceError::Lost("peer".into())));
        assert_eq!(lost.action(), FrameErrorAction::Teardown);
        assert_eq!(BackendError::from(SyncError::WorkerGone).action(), FrameErrorAction::Teardown);
    }

    #[test]
    fn absent_runtime_maps_to_absent_display() {
        assert!(matches!(
            InitError::runtime("session", RuntimeError::NotPresent),
            InitError::DisplaySystemAbsent
        ));
    }
}
