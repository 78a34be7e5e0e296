use std::time::Duration;

use glam::Mat4;
use parallax_math::{recenter, scale_eye_pair, Fov, Pose, ProjectionKind};

use super::{
    build_profiles, negotiate_format, sealed, BackendSettings, PoseSet, SubmitOutcome, VrBackend,
};
use crate::config::{BackendKind, RenderProfile};
use crate::context::{ContextLayout, RenderContext, RenderContextStore, RenderTarget};
use crate::device::{GraphicsDevice, QuadDraw, TextureFormat, TextureId};
use crate::error::{BackendError, DeviceError, FrameError, InitError, ResourceBuildError, RuntimeError, SyncError};
use crate::runtime::{
    LayerView, LocatedView, ProjectionLayer, SessionInfo, SessionRequest, SessionRuntime, SpaceId,
    SwapchainDesc, SwapchainId,
};
use crate::sync::{FenceBridge, InteropDevice};

/// Color format the engine renders in. Swapchains in another format are
/// filled by a blit on the second device.
pub const ENGINE_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

/// Share of the wide field of view an emulated focus view covers.
pub const FOCUS_FOV_FRACTION: f32 = 0.5;

/// How focus views are produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuadMode {
    Off,
    /// The runtime locates four views and takes them in one layer.
    Native,
    /// Focus views are narrowed stereo views, submitted as a second layer.
    Emulated,
}

/// One view's path from the engine to the display system.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct ViewSwapchain {
    target: RenderTarget,
    /// The context's presentable texture, opened on the second device.
    source: TextureId,
    swapchain: SwapchainId,
    size: (u32, u32),
}

/// Per-context payload.
#[derive(Debug, Default)]
struct SessionTargets {
    views: Vec<ViewSwapchain>,
}

/// Runtime frame bracket. `begin` and `end` must alternate strictly.
#[derive(Debug, Copy, Clone, PartialEq)]
enum Bracket {
    Idle,
    Open { display_time: Duration },
}

/// Backend for session/swapchain runtimes.
///
/// The engine renders into textures exported from its own device; a second
/// device, owned here, copies them into runtime swapchain images once the
/// per-frame fence says the engine's work is done.
pub struct SessionBackend {
    runtime: Box<dyn SessionRuntime>,
    /// `None` when the command thread could not be started.
    interop: Option<InteropDevice>,
    spawn_error: Option<std::io::Error>,
    bridge: FenceBridge,
    settings: BackendSettings,
    store: RenderContextStore,
    poses: PoseSet,

    session: Option<SessionInfo>,
    swapchain_format: TextureFormat,
    quad: QuadMode,
    space: Option<SpaceId>,
    /// Origin of the seated space in the runtime's local space.
    anchor: Pose,

    bracket: Bracket,
    last_display_time: Duration,
    prepared: bool,
    descriptors: Vec<ViewSwapchain>,

    companion_size: (u32, u32),
    failed_profiles: Vec<String>,
}

impl sealed::Sealed for SessionBackend {}

impl SessionBackend {
    /// `device` becomes the second device; it must be able to open textures
    /// exported by the engine's device.
    pub fn new(
        runtime: Box<dyn SessionRuntime>,
        device: Box<dyn GraphicsDevice>,
        settings: BackendSettings,
    ) -> Self {
        let interop = InteropDevice::spawn(device, settings.sync_timeout);
        Self::with_interop(runtime, interop, settings)
    }

    fn with_interop(
        runtime: Box<dyn SessionRuntime>,
        interop: std::io::Result<InteropDevice>,
        settings: BackendSettings,
    ) -> Self {
        let (interop, spawn_error) = match interop {
            Ok(interop) => (Some(interop), None),
            Err(e) => {
                log::error!("interop worker did not start: {e}");
                (None, Some(e))
            }
        };
        Self {
            runtime,
            interop,
            spawn_error,
            bridge: FenceBridge::new("engine-frame"),
            settings,
            store: RenderContextStore::new(),
            poses: PoseSet::new(),
            session: None,
            swapchain_format: ENGINE_COLOR_FORMAT,
            quad: QuadMode::Off,
            space: None,
            anchor: Pose::IDENTITY,
            bracket: Bracket::Idle,
            last_display_time: Duration::ZERO,
            prepared: false,
            descriptors: Vec::new(),
            companion_size: (1, 1),
            failed_profiles: Vec::new(),
        }
    }

    pub fn quad_mode(&self) -> QuadMode {
        self.quad
    }

    pub fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    /// Swapchains are filled by a format-converting blit rather than a copy.
    pub fn needs_blit(&self) -> bool {
        self.swapchain_format != ENGINE_COLOR_FORMAT
    }

    pub fn anchor(&self) -> Pose {
        self.anchor
    }

    pub fn fence_value(&self) -> u64 {
        self.bridge.value()
    }

    fn init_session(
        &mut self,
        device: &mut dyn GraphicsDevice,
        companion_size: (u32, u32),
    ) -> Result<(), InitError> {
        if self.interop.is_none() {
            let e = self
                .spawn_error
                .take()
                .unwrap_or_else(|| std::io::Error::other("interop worker unavailable"));
            return Err(InitError::Interop(e));
        }
        let request = SessionRequest {
            quad_views: self.settings.quad_view,
            motion_compensation: self.settings.motion_compensation,
        };
        let info = self
            .runtime
            .create_session(request)
            .map_err(|e| InitError::runtime("session", e))?;
        self.session = Some(info.clone());
        let eye_size = info.eye_size().ok_or_else(|| {
            InitError::runtime("session", RuntimeError::Unsupported("stereo view configuration".into()))
        })?;

        match (self.settings.motion_compensation, info.motion_compensation) {
            (true, true) => log::info!("motion compensation enabled"),
            (true, false) => log::warn!("runtime offers no motion compensation"),
            _ => {}
        }

        self.swapchain_format = negotiate_format(&info.formats)?;
        if self.needs_blit() {
            log::info!(
                "swapchain format {:?} differs from {ENGINE_COLOR_FORMAT:?}; blitting",
                self.swapchain_format
            );
        }

        self.quad = match (self.settings.quad_view, info.quad_views_native) {
            (false, _) => QuadMode::Off,
            (true, true) => QuadMode::Native,
            (true, false) => QuadMode::Emulated,
        };
        let focus_size = match self.quad {
            QuadMode::Off => None,
            QuadMode::Native => info.focus_size().or(Some(eye_size)),
            QuadMode::Emulated => Some(eye_size),
        };
        if self.quad != QuadMode::Off {
            log::info!("quad views: {:?}", self.quad);
        }

        let space = self
            .runtime
            .create_reference_space(self.anchor)
            .map_err(|e| InitError::runtime("reference space", e))?;
        self.space = Some(space);

        let mut layout = ContextLayout::stereo(eye_size, companion_size, ENGINE_COLOR_FORMAT).shared();
        if let Some(focus) = focus_size {
            layout = layout.with_focus(focus);
        }

        let format = self.swapchain_format;
        let Self { runtime, interop, store, settings, .. } = self;
        let interop = interop
            .as_ref()
            .ok_or_else(|| InitError::Interop(std::io::Error::other("interop worker unavailable")))?;
        let failed = build_profiles(store, device, &settings.profiles, &layout, |ctx| {
            attach_swapchains(runtime.as_mut(), interop, format, ctx)
        })?;
        self.failed_profiles = failed;

        self.set_active_context(RenderProfile::DEFAULT_NAME)
            .map_err(|_| InitError::NoDefaultContext)
    }

    /// Ends an open runtime frame with no layers.
    fn end_empty(&mut self) -> Result<(), BackendError> {
        let Bracket::Open { display_time } = self.bracket else {
            return Ok(());
        };
        self.bracket = Bracket::Idle;
        self.prepared = false;
        match self.runtime.end_frame(display_time, &[]) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(BackendError::Lost(e)),
            Err(e) => {
                log::warn!("closing frame failed: {e}");
                Ok(())
            }
        }
    }

    fn pose_failure(&mut self, stage: &'static str, e: RuntimeError) -> Result<bool, BackendError> {
        self.end_empty()?;
        if e.is_fatal() {
            return Err(BackendError::Lost(e));
        }
        log::debug!("{stage} failed: {e}");
        Ok(false)
    }

    fn update_poses(&mut self, views: &[LocatedView]) {
        let (l, r) = (views[0], views[1]);
        let head = Pose::new(l.pose.orientation, (l.pose.position + r.pose.position) * 0.5);
        let to_head = head.inverse();
        let scale = self.settings.world_scale;
        let depth = self.settings.depth;

        let (left, right) = scale_eye_pair(to_head.compose(l.pose), to_head.compose(r.pose), scale);
        self.poses.update(RenderTarget::LeftEye, head, left, l.fov, depth);
        self.poses.update(RenderTarget::RightEye, head, right, r.fov, depth);

        match (self.quad, views.get(2..4)) {
            (QuadMode::Off, _) => {}
            (QuadMode::Native, Some([fl, fr])) => {
                let (fl_eye, fr_eye) =
                    scale_eye_pair(to_head.compose(fl.pose), to_head.compose(fr.pose), scale);
                self.poses.update(RenderTarget::FocusLeft, head, fl_eye, fl.fov, depth);
                self.poses.update(RenderTarget::FocusRight, head, fr_eye, fr.fov, depth);
            }
            _ => {
                self.poses.update(RenderTarget::FocusLeft, head, left, l.fov.narrowed(FOCUS_FOV_FRACTION), depth);
                self.poses.update(RenderTarget::FocusRight, head, right, r.fov.narrowed(FOCUS_FOV_FRACTION), depth);
            }
        }
    }

    /// Acquires one image per view, copies or blits after the fence, then
    /// releases every acquired image whatever happened.
    fn transfer_views(&mut self) -> Result<(), BackendError> {
        let timeout = self.settings.sync_timeout;
        let mut acquired: Vec<(ViewSwapchain, TextureId)> = Vec::with_capacity(self.descriptors.len());

        let mut result: Result<(), BackendError> = Ok(());
        for view in self.descriptors.clone() {
            let image = self.runtime.acquire_image(view.swapchain).and_then(|index| {
                let dst = self.runtime.swapchain_images(view.swapchain).get(index).copied();
                // An acquired image is released below even when the wait fails.
                acquired.push((view, dst.unwrap_or(view.source)));
                self.runtime.wait_image(view.swapchain, timeout)?;
                dst.ok_or_else(|| RuntimeError::Transient(format!("image {index} out of range")))
            });
            if let Err(e) = image {
                result = Err(BackendError::runtime("acquire swapchain image", e));
                break;
            }
        }

        if result.is_ok() {
            let blit = self.needs_blit();
            result = match self.interop.as_mut() {
                Some(interop) => copy_after_fence(&self.bridge, interop, &acquired, blit).map_err(Into::into),
                None => Err(SyncError::WorkerGone.into()),
            };
        }

        for (view, _) in &acquired {
            if let Err(e) = self.runtime.release_image(view.swapchain) {
                if result.is_ok() || e.is_fatal() {
                    result = Err(BackendError::runtime("release swapchain image", e));
                }
            }
        }
        result
    }

    fn layers(&self, space: SpaceId) -> Vec<ProjectionLayer> {
        let view = |v: &ViewSwapchain| LayerView {
            pose: self.poses.view_pose(v.target),
            fov: self.poses.fov(v.target).unwrap_or(Fov::symmetric(1.0, 1.0)),
            swapchain: v.swapchain,
            size: v.size,
        };
        let pick = |targets: &[RenderTarget]| -> Vec<LayerView> {
            targets
                .iter()
                .filter_map(|t| self.descriptors.iter().find(|v| v.target == *t))
                .map(&view)
                .collect()
        };

        match self.quad {
            QuadMode::Off => vec![ProjectionLayer { space, views: pick(&RenderTarget::STEREO) }],
            QuadMode::Native => vec![ProjectionLayer { space, views: pick(&RenderTarget::QUAD) }],
            QuadMode::Emulated => vec![
                ProjectionLayer { space, views: pick(&RenderTarget::STEREO) },
                ProjectionLayer {
                    space,
                    views: pick(&[RenderTarget::FocusLeft, RenderTarget::FocusRight]),
                },
            ],
        }
    }

    /// Waits for all GPU work on both devices, then releases every context,
    /// swapchain and the reference space.
    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        let timeout = self.settings.sync_timeout;
        if let Err(e) = self.bridge.wait_for_cpu(timeout) {
            log::warn!("engine work still in flight at release: {e}");
        }
        if let Err(e) = device.wait_idle(timeout) {
            log::warn!("engine device did not go idle: {e}");
        }
        if let Some(interop) = &self.interop {
            if let Err(e) = interop.with_device(|d| d.wait_idle(timeout)) {
                log::warn!("interop device did not go idle: {e}");
            }
        }

        let Self { runtime, interop, store, .. } = self;
        for ctx in store.all_mut() {
            if let (Some(targets), Some(interop)) = (ctx.take_ext::<SessionTargets>(), interop.as_ref()) {
                release_swapchains(runtime.as_mut(), interop, targets.views);
            }
        }
        self.store.destroy_all(device);
        self.descriptors.clear();

        if let Some(space) = self.space.take() {
            self.runtime.destroy_space(space);
        }
        if self.session.take().is_some() {
            self.runtime.destroy_session();
        }
    }
}

/// Opens every exported view texture on the second device and gives it a
/// swapchain of its own.
fn attach_swapchains(
    runtime: &mut dyn SessionRuntime,
    interop: &InteropDevice,
    format: TextureFormat,
    ctx: &mut RenderContext,
) -> Result<(), ResourceBuildError> {
    let profile = ctx.name.clone();
    let views: Vec<_> = ctx
        .iter()
        .filter(|(t, _)| t.is_view())
        .map(|(t, res)| (t, *res))
        .collect();

    let mut attached: Vec<ViewSwapchain> = Vec::with_capacity(views.len());
    let result = interop.with_device(|dev| {
        for (target, res) in views {
            let fail = |source| ResourceBuildError { profile: profile.clone(), target: Some(target), source };
            let handle = res.shared.ok_or_else(|| fail(DeviceError::Unsupported("view texture is not exported")))?;
            let source = dev.open_shared(handle).map_err(fail)?;

            let desc = SwapchainDesc {
                label: format!("{profile}/{}", target.label()),
                width: res.width,
                height: res.height,
                format,
            };
            match runtime.create_swapchain(dev, &desc) {
                Ok(swapchain) => attached.push(ViewSwapchain { target, source, swapchain, size: res.size() }),
                Err(e) => {
                    dev.destroy_texture(source);
                    return Err(fail(DeviceError::Allocation {
                        label: desc.label,
                        width: desc.width,
                        height: desc.height,
                        reason: e.to_string(),
                    }));
                }
            }
        }
        Ok(())
    });

    match result {
        Ok(()) => {
            ctx.set_ext(SessionTargets { views: attached });
            Ok(())
        }
        Err(e) => {
            release_swapchains(runtime, interop, attached);
            Err(e)
        }
    }
}

fn release_swapchains(runtime: &mut dyn SessionRuntime, interop: &InteropDevice, views: Vec<ViewSwapchain>) {
    interop.with_device(|dev| {
        for view in views {
            runtime.destroy_swapchain(dev, view.swapchain);
            dev.destroy_texture(view.source);
        }
    });
}

/// The only path by which the second device reads engine textures: the
/// transfer is created by the fence wait.
fn copy_after_fence(
    bridge: &FenceBridge,
    interop: &mut InteropDevice,
    jobs: &[(ViewSwapchain, TextureId)],
    blit: bool,
) -> Result<(), SyncError> {
    let mut transfer = bridge.wait_before_copy(interop)?;
    for (view, dst) in jobs {
        if blit {
            transfer.blit(view.source, *dst, QuadDraw::FULL_UV)?;
        } else {
            transfer.copy(view.source, *dst)?;
        }
    }
    transfer.finish()
}

impl VrBackend for SessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    fn initialize(
        &mut self,
        device: &mut dyn GraphicsDevice,
        companion_size: (u32, u32),
    ) -> Result<(), InitError> {
        self.companion_size = companion_size;
        let result = self.init_session(device, companion_size);
        if result.is_err() {
            self.release(device);
        }
        result
    }

    fn acquire_poses(&mut self) -> Result<bool, BackendError> {
        if self.bracket != Bracket::Idle {
            log::debug!("closing a stale runtime frame");
            self.end_empty()?;
        }

        let timing = match self.runtime.wait_frame(self.settings.pose_timeout) {
            Ok(timing) => timing,
            Err(e) => return self.pose_failure("wait_frame", e),
        };
        if let Err(e) = self.runtime.begin_frame() {
            return self.pose_failure("begin_frame", e);
        }
        self.bracket = Bracket::Open { display_time: timing.display_time };
        self.last_display_time = timing.display_time;
        self.prepared = false;

        if !timing.should_render {
            self.end_empty()?;
            return Ok(false);
        }

        let space = self.space.ok_or(BackendError::NotInitialized)?;
        let views = match self.runtime.locate_views(timing.display_time, space) {
            Ok(views) if views.len() >= 2 => views,
            Ok(_) => {
                log::warn!("runtime located fewer than two views");
                self.end_empty()?;
                return Ok(false);
            }
            Err(e) => return self.pose_failure("locate_views", e),
        };
        self.update_poses(&views);
        Ok(true)
    }

    fn projection(&self, target: RenderTarget, kind: ProjectionKind) -> Mat4 {
        self.poses.projection(target, kind)
    }

    fn eye_offset(&self, target: RenderTarget) -> Mat4 {
        self.poses.eye_offset(target)
    }

    fn pose(&self, target: RenderTarget) -> Mat4 {
        self.poses.pose(target)
    }

    fn prepare_for_display(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), BackendError> {
        if self.bracket == Bracket::Idle {
            return Err(FrameError::NoFrameInFlight.into());
        }
        let ctx = self.store.current().ok_or(BackendError::NotInitialized)?;
        for target in RenderTarget::views(self.quad != QuadMode::Off) {
            if let Some(res) = ctx.target(*target) {
                if let Some(resolve) = res.resolve {
                    device.resolve(res.color, resolve)?;
                }
            }
        }

        self.bridge.signal_after_engine_work(device)?;
        self.transfer_views()?;
        self.prepared = true;
        Ok(())
    }

    fn submit(&mut self, _device: &mut dyn GraphicsDevice) -> Result<SubmitOutcome, BackendError> {
        let Bracket::Open { display_time } = self.bracket else {
            return Err(FrameError::NoFrameInFlight.into());
        };
        if !self.prepared {
            self.end_empty()?;
            return Ok(SubmitOutcome::Dropped);
        }
        let space = self.space.ok_or(BackendError::NotInitialized)?;
        let layers = self.layers(space);

        self.bracket = Bracket::Idle;
        self.prepared = false;
        match self.runtime.end_frame(display_time, &layers) {
            Ok(()) => Ok(SubmitOutcome::Presented),
            Err(e) if e.is_fatal() => Err(BackendError::Lost(e)),
            Err(e) => {
                log::warn!("end_frame rejected layers, dropping frame: {e}");
                Ok(SubmitOutcome::Dropped)
            }
        }
    }

    fn set_active_context(&mut self, name: &str) -> Result<(), BackendError> {
        let ctx = self.store.select(name).ok_or(BackendError::NotInitialized)?;
        self.descriptors = ctx
            .ext::<SessionTargets>()
            .map(|t| t.views.clone())
            .ok_or(BackendError::NotInitialized)?;
        Ok(())
    }

    fn reset_view(&mut self) -> Result<(), BackendError> {
        let space = self.space.ok_or(BackendError::NotInitialized)?;
        let view = self
            .runtime
            .locate_view_space(space, self.last_display_time)
            .map_err(|e| BackendError::runtime("locate view space", e))?;

        let anchor = recenter(self.anchor, view);
        let replacement = self
            .runtime
            .create_reference_space(anchor)
            .map_err(|e| BackendError::runtime("create reference space", e))?;
        self.runtime.destroy_space(space);
        self.space = Some(replacement);
        self.anchor = anchor;
        log::debug!("recentred: anchor {:?}", anchor.position);
        Ok(())
    }

    fn abandon_frame(&mut self) -> Result<(), BackendError> {
        self.end_empty()
    }

    fn contexts(&self) -> &RenderContextStore {
        &self.store
    }

    fn quad_view_active(&self) -> bool {
        self.quad != QuadMode::Off
    }

    fn failed_profiles(&self) -> &[String] {
        &self.failed_profiles
    }

    fn restart(&mut self, device: &mut dyn GraphicsDevice, quad_view: bool) -> Result<(), InitError> {
        let previous = self.store.current_name().map(str::to_owned);
        if let Err(e) = self.end_empty() {
            log::warn!("could not close the frame before restart: {e}");
        }
        self.release(device);

        self.settings.quad_view = quad_view;
        self.initialize(device, self.companion_size)?;
        if let Some(name) = previous {
            if self.set_active_context(&name).is_err() {
                log::warn!("could not reselect `{name}` after restart");
            }
        }
        Ok(())
    }

    fn shutdown(&mut self, device: &mut dyn GraphicsDevice) {
        if let Err(e) = self.end_empty() {
            log::warn!("could not close the frame at shutdown: {e}");
        }
        self.release(device);
        log::info!("session backend shut down");
    }
}
