//! Per-frame driver.
//!
//! [`Compositor::run_frame`] walks one [`FrameCtx`] through
//! `Idle → PosesAcquired → EyesRendered → OverlayComposited →
//! PreparedForDisplay → Submitted`. Only pose acquisition may end a frame
//! early without an error; every other failure is classified by
//! [`BackendError::action`](crate::error::BackendError::action).

mod compositor;
mod frame;
mod redirect;

pub use compositor::Compositor;
pub use frame::{FrameCtx, FrameState};
pub use redirect::TargetRedirect;

/// What one call to [`Compositor::run_frame`] produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The display system took the frame.
    Presented,
    /// VR work was dropped for this frame; the companion view still rendered.
    Skipped,
    /// No backend is installed; the engine rendered directly.
    Passthrough,
}
