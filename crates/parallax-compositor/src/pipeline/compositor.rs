use glam::Mat4;
use parallax_math::{horizon_lock, plane_model, ProjectionKind, Z_FLIP};

use super::{FrameCtx, FrameOutcome, FrameState, TargetRedirect};
use crate::backend::{BackendSettings, SubmitOutcome, VrBackend};
use crate::config::{CompanionMode, CompositorConfig, RenderProfile};
use crate::context::{RenderTarget, TargetResources};
use crate::device::{GraphicsDevice, QuadDraw, TargetBinding, TextureId};
use crate::error::{BackendError, FrameErrorAction, InitError};
use crate::logging::{Notice, NoticeKind, NoticeSink};
use crate::shim::{EngineAdapter, TransformShim, ViewMatrices};
use crate::time::FrameStats;

/// How far a VR frame got.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum VrStep {
    Presented,
    /// Submitted, but the display system did not take it.
    Dropped,
    NoPoses,
}

/// Drives one VR backend frame by frame on behalf of the host engine.
///
/// Without a backend (never installed, failed to initialise, or torn down
/// after a fatal error) every frame is a passthrough: the engine renders
/// straight into the application's target with the transform hook inactive.
pub struct Compositor {
    config: CompositorConfig,
    backend: Option<Box<dyn VrBackend>>,
    shim: TransformShim,
    notice: Notice,
    stats: FrameStats,
    active_profile: String,
    stage: Option<u32>,
    recenter_requested: bool,
    /// Companion source whose content is a complete frame. Cleared while
    /// the eyes are being redrawn.
    last_presentable: Option<TextureId>,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self {
            config: config.validated(),
            backend: None,
            shim: TransformShim::new(),
            notice: Notice::new(),
            stats: FrameStats::new(),
            active_profile: RenderProfile::DEFAULT_NAME.to_string(),
            stage: None,
            recenter_requested: false,
            last_presentable: None,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Settings to construct a backend with.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings::from(&self.config)
    }

    pub fn set_notice_sink(&mut self, sink: NoticeSink) {
        self.notice.set_sink(sink);
    }

    pub fn notice(&self) -> &Notice {
        &self.notice
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn backend(&self) -> Option<&dyn VrBackend> {
        self.backend.as_deref()
    }

    pub fn is_vr_active(&self) -> bool {
        self.backend.is_some()
    }

    pub fn active_profile(&self) -> &str {
        &self.active_profile
    }

    pub fn shim(&self) -> &TransformShim {
        &self.shim
    }

    /// Initialises `backend` against `device` and makes it the active one.
    ///
    /// On failure the user is told once and the compositor stays (or drops
    /// to) passthrough.
    pub fn install_backend(
        &mut self,
        device: &mut dyn GraphicsDevice,
        mut backend: Box<dyn VrBackend>,
    ) -> Result<(), InitError> {
        if let Some(mut previous) = self.backend.take() {
            previous.shutdown(device);
        }
        self.reset_frame_state();

        let companion_size = device.back_buffer_size();
        if let Err(e) = backend.initialize(device, companion_size) {
            self.notice
                .notify(NoticeKind::VrUnavailable, format!("VR unavailable, running without it: {e}"));
            return Err(e);
        }

        log::info!(
            "{:?} backend ready ({} render context(s), quad view {})",
            backend.kind(),
            backend.contexts().len(),
            if backend.quad_view_active() { "on" } else { "off" }
        );
        self.notice.reset(NoticeKind::VrUnavailable);
        self.notice.reset(NoticeKind::BackendLost);
        self.report_capabilities(backend.as_ref());
        self.backend = Some(backend);
        Ok(())
    }

    /// Recentres the seated reference at the start of the next VR frame.
    pub fn request_recenter(&mut self) {
        self.recenter_requested = true;
    }

    /// Restarts the backend with quad views toggled. A failed restart leaves
    /// the compositor in passthrough.
    pub fn set_quad_view(&mut self, device: &mut dyn GraphicsDevice, enabled: bool) -> Result<(), InitError> {
        self.config.quad_view = enabled;
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };

        self.last_presentable = None;
        if let Err(e) = backend.restart(device, enabled) {
            self.notice
                .notify(NoticeKind::VrUnavailable, format!("VR restart failed, running without it: {e}"));
            return Err(e);
        }
        if let Some(name) = backend.contexts().current_name() {
            self.active_profile = name.to_string();
        }
        self.notice.reset(NoticeKind::QuadViewUnsupported);
        self.report_capabilities(backend.as_ref());
        self.backend = Some(backend);
        Ok(())
    }

    /// Tears the backend down; later frames are passthrough.
    pub fn shutdown(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(mut backend) = self.backend.take() {
            backend.shutdown(device);
            log::info!(
                "compositor stopped ({} presented, {} skipped, {} passthrough)",
                self.stats.presented(),
                self.stats.skipped(),
                self.stats.passthrough()
            );
        }
        self.reset_frame_state();
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Renders one engine frame: VR views, planes, submission and the
    /// companion view, or a passthrough render when VR is off.
    pub fn run_frame(&mut self, device: &mut dyn GraphicsDevice, engine: &mut dyn EngineAdapter) -> FrameOutcome {
        let time = self.stats.begin_frame();
        let snapshot = engine.snapshot();
        let mut frame = FrameCtx::new(time, snapshot, device.render_target());

        let (outcome, skip_reason) = match self.backend.take() {
            None => {
                self.passthrough(device, engine);
                (FrameOutcome::Passthrough, None)
            }
            Some(mut backend) => {
                let step = self.vr_frame(backend.as_mut(), device, engine, &mut frame);
                match step {
                    Ok(VrStep::Presented) => {
                        self.backend = Some(backend);
                        (FrameOutcome::Presented, None)
                    }
                    Ok(VrStep::Dropped) => {
                        self.backend = Some(backend);
                        (FrameOutcome::Skipped, Some("display system dropped the frame".to_string()))
                    }
                    Ok(VrStep::NoPoses) => {
                        self.backend = Some(backend);
                        self.skipped_companion(device, engine, &frame);
                        (FrameOutcome::Skipped, Some("poses unavailable".to_string()))
                    }
                    Err(e) if e.action() == FrameErrorAction::SkipFrame => {
                        self.backend = Some(backend);
                        self.skipped_companion(device, engine, &frame);
                        (FrameOutcome::Skipped, Some(e.to_string()))
                    }
                    Err(e) => {
                        self.teardown(backend, device, &e);
                        self.passthrough(device, engine);
                        (FrameOutcome::Passthrough, None)
                    }
                }
            }
        };

        if device.render_target() != frame.original_target {
            if let Err(e) = device.set_render_target(frame.original_target) {
                log::error!("failed to restore the application's render target: {e}");
            }
        }
        self.record(outcome, skip_reason, &frame);
        outcome
    }

    fn vr_frame(
        &mut self,
        backend: &mut dyn VrBackend,
        device: &mut dyn GraphicsDevice,
        engine: &mut dyn EngineAdapter,
        frame: &mut FrameCtx,
    ) -> Result<VrStep, BackendError> {
        self.select_profile(backend, frame.snapshot.stage_id)?;

        if std::mem::take(&mut self.recenter_requested) {
            match backend.reset_view() {
                Ok(()) => log::info!("view recentred"),
                Err(e) if e.action() == FrameErrorAction::Teardown => return Err(e),
                Err(e) => log::warn!("recentre failed: {e}"),
            }
        }

        if !backend.acquire_poses()? {
            return Ok(VrStep::NoPoses);
        }
        frame.advance(FrameState::PosesAcquired);

        match self.present(backend, device, engine, frame) {
            Ok(step) => Ok(step),
            Err(e) => {
                if frame.state() != FrameState::Submitted {
                    if let Err(abandon) = backend.abandon_frame() {
                        log::debug!("closing the abandoned frame failed: {abandon}");
                    }
                }
                Err(e)
            }
        }
    }

    fn present(
        &mut self,
        backend: &mut dyn VrBackend,
        device: &mut dyn GraphicsDevice,
        engine: &mut dyn EngineAdapter,
        frame: &mut FrameCtx,
    ) -> Result<VrStep, BackendError> {
        frame.horizon_lock = if frame.snapshot.horizon_lock_applies() {
            horizon_lock(frame.snapshot.vehicle_orientation, &self.config.horizon_lock)
        } else {
            Mat4::IDENTITY
        };

        let (eyes, plane) = {
            let ctx = backend.current_context().ok_or(BackendError::NotInitialized)?;
            frame.companion_source = match self.config.companion.mode {
                CompanionMode::LeftEye => ctx.presentable(RenderTarget::LeftEye),
                CompanionMode::RightEye => ctx.presentable(RenderTarget::RightEye),
                CompanionMode::Off | CompanionMode::SeparatePass => None,
            };
            let eyes: Vec<(RenderTarget, TargetResources)> = backend
                .views()
                .iter()
                .filter_map(|&t| ctx.target(t).map(|res| (t, *res)))
                .collect();
            let plane = frame.plane.and_then(|p| ctx.target(p).map(|res| (p, *res)));
            (eyes, plane)
        };
        frame.plane = plane.map(|(p, _)| p);

        self.last_presentable = None;
        for (target, res) in &eyes {
            self.render_view(backend, device, engine, frame, *target, res)?;
        }
        frame.advance(FrameState::EyesRendered);

        if let Some((plane, res)) = plane {
            self.composite_plane(backend, device, engine, frame, &eyes, plane, &res)?;
        }
        frame.advance(FrameState::OverlayComposited);
        self.last_presentable = frame.companion_source;

        backend.prepare_for_display(device)?;
        frame.advance(FrameState::PreparedForDisplay);

        let submitted = backend.submit(device)?;
        frame.advance(FrameState::Submitted);

        self.render_companion(device, engine, frame);
        Ok(match submitted {
            SubmitOutcome::Presented => VrStep::Presented,
            SubmitOutcome::Dropped => VrStep::Dropped,
        })
    }

    fn render_view(
        &mut self,
        backend: &dyn VrBackend,
        device: &mut dyn GraphicsDevice,
        engine: &mut dyn EngineAdapter,
        frame: &FrameCtx,
        target: RenderTarget,
        res: &TargetResources,
    ) -> Result<(), BackendError> {
        let matrices = ViewMatrices::from_backend(backend, target, frame.horizon_lock);
        self.shim.activate(target, matrices, &frame.snapshot);

        let mut redirect = TargetRedirect::bind(device, TargetBinding::new(res.color, res.depth))?;
        let drawn = engine.render_scene(redirect.device(), &mut self.shim);
        self.shim.deactivate();
        redirect.restore()?;
        drawn?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn composite_plane(
        &mut self,
        backend: &dyn VrBackend,
        device: &mut dyn GraphicsDevice,
        engine: &mut dyn EngineAdapter,
        frame: &FrameCtx,
        eyes: &[(RenderTarget, TargetResources)],
        plane: RenderTarget,
        res: &TargetResources,
    ) -> Result<(), BackendError> {
        {
            let mut redirect = TargetRedirect::bind(device, TargetBinding::new(res.color, None))?;
            let drawn = engine.render_2d(redirect.device(), plane);
            redirect.restore()?;
            drawn?;
        }

        let (settings, kind, orientation) = match plane {
            RenderTarget::Menu => (self.config.menu_plane, ProjectionKind::MainMenu, Mat4::IDENTITY),
            _ => (
                self.config.overlay_plane,
                ProjectionKind::Stage,
                Z_FLIP * frame.horizon_lock * Z_FLIP,
            ),
        };
        let model = orientation * plane_model(settings.size, settings.translation);

        for (target, eye) in eyes {
            let transform = backend.projection(*target, kind)
                * backend.eye_offset(*target)
                * backend.pose(*target)
                * model;
            let mut redirect = TargetRedirect::bind(device, TargetBinding::new(eye.color, None))?;
            let drawn = redirect.device().draw_quad(&QuadDraw::new(res.presentable(), transform));
            redirect.restore()?;
            drawn?;
        }
        Ok(())
    }

    // ── companion ─────────────────────────────────────────────────────────

    fn render_companion(&mut self, device: &mut dyn GraphicsDevice, engine: &mut dyn EngineAdapter, frame: &FrameCtx) {
        let result = match (self.config.companion.mode, frame.companion_source) {
            (CompanionMode::Off, _) => Ok(()),
            (CompanionMode::SeparatePass, _) => engine.render_scene(device, &mut self.shim),
            (_, Some(source)) => self.blit_companion(device, frame, source),
            (_, None) => Ok(()),
        };
        if let Err(e) = result {
            log::debug!("companion view not drawn: {e}");
        }
    }

    fn blit_companion(
        &self,
        device: &mut dyn GraphicsDevice,
        frame: &FrameCtx,
        source: TextureId,
    ) -> Result<(), crate::error::DeviceError> {
        let Some(color) = frame.original_target.color else {
            return Ok(());
        };
        let mut redirect = TargetRedirect::bind(device, TargetBinding::new(color, None))?;
        let uv = self.config.companion.crop.uv();
        let drawn = redirect.device().draw_quad(&QuadDraw::fullscreen(source).with_uv(uv));
        redirect.restore()?;
        drawn
    }

    /// A skipped frame never shows a half-rendered eye: either the last
    /// fully composited one or the engine's own render.
    fn skipped_companion(&mut self, device: &mut dyn GraphicsDevice, engine: &mut dyn EngineAdapter, frame: &FrameCtx) {
        let eye_source = matches!(self.config.companion.mode, CompanionMode::LeftEye | CompanionMode::RightEye);
        match self.last_presentable {
            Some(source) if eye_source => {
                if let Err(e) = self.blit_companion(device, frame, source) {
                    log::debug!("companion view not drawn: {e}");
                }
            }
            _ => self.passthrough(device, engine),
        }
    }

    fn passthrough(&mut self, device: &mut dyn GraphicsDevice, engine: &mut dyn EngineAdapter) {
        self.shim.deactivate();
        if let Err(e) = engine.render_scene(device, &mut self.shim) {
            log::debug!("passthrough render failed: {e}");
        }
    }

    // ── bookkeeping ───────────────────────────────────────────────────────

    /// Switches render contexts when the loaded stage changes.
    fn select_profile(&mut self, backend: &mut dyn VrBackend, stage: Option<u32>) -> Result<(), BackendError> {
        if stage == self.stage {
            return Ok(());
        }

        let wanted = stage
            .and_then(|id| self.config.profile_for_stage(id))
            .map_or(RenderProfile::DEFAULT_NAME, |p| p.name.as_str());
        let name = if backend.contexts().contains(wanted) {
            wanted
        } else {
            self.notice.notify(
                NoticeKind::ProfileFallback,
                format!("render profile `{wanted}` is unavailable; using `default`"),
            );
            RenderProfile::DEFAULT_NAME
        };

        if name != self.active_profile {
            backend.set_active_context(name)?;
            log::info!("stage {stage:?}: render profile `{name}`");
            self.active_profile = name.to_string();
            self.last_presentable = None;
        }
        self.stage = stage;
        Ok(())
    }

    fn report_capabilities(&mut self, backend: &dyn VrBackend) {
        if self.config.quad_view && !backend.quad_view_active() {
            self.notice.notify(
                NoticeKind::QuadViewUnsupported,
                "quad-view rendering is not available with this display system; rendering stereo",
            );
        }
        for name in backend.failed_profiles() {
            self.notice.notify(
                NoticeKind::ProfileFallback,
                format!("render profile `{name}` could not be built; its stages use `default`"),
            );
        }
    }

    fn teardown(&mut self, mut backend: Box<dyn VrBackend>, device: &mut dyn GraphicsDevice, error: &BackendError) {
        backend.shutdown(device);
        self.reset_frame_state();
        self.notice
            .notify(NoticeKind::BackendLost, format!("VR stopped, continuing without it: {error}"));
    }

    fn reset_frame_state(&mut self) {
        self.shim.deactivate();
        self.active_profile = RenderProfile::DEFAULT_NAME.to_string();
        self.stage = None;
        self.last_presentable = None;
        self.stats.reset_clock();
    }

    fn record(&mut self, outcome: FrameOutcome, skip_reason: Option<String>, frame: &FrameCtx) {
        if let Some(streak) = self.stats.record(outcome) {
            log::info!("VR frames resumed after {streak} skipped");
        }
        if let Some(reason) = skip_reason {
            if self.stats.is_streak_start() {
                log::warn!("frame {} skipped: {reason}", frame.time.frame_index);
            } else {
                log::debug!("frame {} skipped: {reason}", frame.time.frame_index);
            }
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::backend::{sealed, CompositorBackend};
    use crate::config::BackendKind;
    use crate::context::RenderContextStore;
    use crate::device::HeadlessDevice;
    use crate::error::DeviceError;
    use crate::runtime::mock::MockCompositorRuntime;
    use crate::shim::SyntheticEngine;

    /// Compositor backend whose next context switches fail.
    struct FailingSwitch {
        inner: CompositorBackend,
        failures: u32,
    }

    impl sealed::Sealed for FailingSwitch {}

    impl VrBackend for FailingSwitch {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }
        fn initialize(&mut self, device: &mut dyn GraphicsDevice, size: (u32, u32)) -> Result<(), InitError> {
            self.inner.initialize(device, size)
        }
        fn acquire_poses(&mut self) -> Result<bool, BackendError> {
            self.inner.acquire_poses()
        }
        fn projection(&self, target: RenderTarget, kind: ProjectionKind) -> Mat4 {
            self.inner.projection(target, kind)
        }
        fn eye_offset(&self, target: RenderTarget) -> Mat4 {
            self.inner.eye_offset(target)
        }
        fn pose(&self, target: RenderTarget) -> Mat4 {
            self.inner.pose(target)
        }
        fn prepare_for_display(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), BackendError> {
            self.inner.prepare_for_display(device)
        }
        fn submit(&mut self, device: &mut dyn GraphicsDevice) -> Result<SubmitOutcome, BackendError> {
            self.inner.submit(device)
        }
        fn set_active_context(&mut self, name: &str) -> Result<(), BackendError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(DeviceError::Unsupported("context switch").into());
            }
            self.inner.set_active_context(name)
        }
        fn reset_view(&mut self) -> Result<(), BackendError> {
            self.inner.reset_view()
        }
        fn abandon_frame(&mut self) -> Result<(), BackendError> {
            self.inner.abandon_frame()
        }
        fn contexts(&self) -> &RenderContextStore {
            self.inner.contexts()
        }
        fn quad_view_active(&self) -> bool {
            self.inner.quad_view_active()
        }
        fn failed_profiles(&self) -> &[String] {
            self.inner.failed_profiles()
        }
        fn restart(&mut self, device: &mut dyn GraphicsDevice, quad_view: bool) -> Result<(), InitError> {
            self.inner.restart(device, quad_view)
        }
        fn shutdown(&mut self, device: &mut dyn GraphicsDevice) {
            self.inner.shutdown(device)
        }
    }

    #[test]
    fn failed_profile_switch_is_retried_next_frame() {
        let config = CompositorConfig {
            profiles: vec![RenderProfile::default(), RenderProfile::new("gravel").with_stages([9])],
            ..Default::default()
        };
        let mut compositor = Compositor::new(config);
        let mut device = HeadlessDevice::new("engine", (1280, 720));
        let inner = CompositorBackend::new(Box::new(MockCompositorRuntime::new()), compositor.backend_settings());
        compositor
            .install_backend(&mut device, Box::new(FailingSwitch { inner, failures: 1 }))
            .unwrap();

        let mut engine = SyntheticEngine::new();
        engine.set_mode(crate::shim::GameMode::Driving);
        engine.set_stage(Some(9));

        assert_eq!(compositor.run_frame(&mut device, &mut engine), FrameOutcome::Skipped);
        assert_eq!(compositor.active_profile(), RenderProfile::DEFAULT_NAME);

        assert_eq!(compositor.run_frame(&mut device, &mut engine), FrameOutcome::Presented);
        assert_eq!(compositor.active_profile(), "gravel");
    }
}
