use glam::Mat4;

use crate::context::RenderTarget;
use crate::device::{TargetBinding, TextureId};
use crate::shim::EngineSnapshot;
use crate::time::FrameTime;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    PosesAcquired,
    EyesRendered,
    OverlayComposited,
    PreparedForDisplay,
    Submitted,
}

impl FrameState {
    /// The only state this one may move to.
    pub fn next(self) -> FrameState {
        match self {
            FrameState::Idle => FrameState::PosesAcquired,
            FrameState::PosesAcquired => FrameState::EyesRendered,
            FrameState::EyesRendered => FrameState::OverlayComposited,
            FrameState::OverlayComposited => FrameState::PreparedForDisplay,
            FrameState::PreparedForDisplay => FrameState::Submitted,
            FrameState::Submitted => FrameState::Idle,
        }
    }
}

/// Everything one frame needs, owned for that frame only.
#[derive(Debug)]
pub struct FrameCtx {
    state: FrameState,
    pub time: FrameTime,
    pub snapshot: EngineSnapshot,
    /// The application's binding when the frame started; restored after every
    /// redirect and used as the companion target.
    pub original_target: TargetBinding,
    pub horizon_lock: Mat4,
    /// 2D plane composited this frame.
    pub plane: Option<RenderTarget>,
    /// Presentable texture the companion view samples.
    pub companion_source: Option<TextureId>,
}

impl FrameCtx {
    pub fn new(time: FrameTime, snapshot: EngineSnapshot, original_target: TargetBinding) -> Self {
        Self {
            state: FrameState::Idle,
            time,
            snapshot,
            original_target,
            horizon_lock: Mat4::IDENTITY,
            plane: snapshot.plane(),
            companion_source: None,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn advance(&mut self, to: FrameState) {
        debug_assert_eq!(self.state.next(), to, "illegal frame transition");
        log::trace!("frame {}: {:?} -> {to:?}", self.time.frame_index, self.state);
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FrameStats;

    #[test]
    fn states_form_a_cycle() {
        let mut s = FrameState::Idle;
        for _ in 0..6 {
            s = s.next();
        }
        assert_eq!(s, FrameState::Idle);
        assert_eq!(FrameState::PreparedForDisplay.next(), FrameState::Submitted);
    }

    #[test]
    fn frame_starts_idle_with_its_plane() {
        let snapshot = EngineSnapshot::default();
        let mut frame = FrameCtx::new(FrameStats::new().begin_frame(), snapshot, TargetBinding::BACK_BUFFER);
        assert_eq!(frame.state(), FrameState::Idle);
        assert_eq!(frame.plane, Some(RenderTarget::Menu));
        frame.advance(FrameState::PosesAcquired);
        assert_eq!(frame.state(), FrameState::PosesAcquired);
    }
}
