use std::sync::{Arc, Mutex};

use glam::Mat4;
use parallax_math::{scale_eye_pair, Fov, Pose, ProjectionKind};

use super::{
    build_profiles, negotiate_format, sealed, BackendSettings, PoseSet, SubmitOutcome, VrBackend,
};
use crate::config::{BackendKind, RenderProfile};
use crate::context::{ContextLayout, RenderContextStore, RenderTarget};
use crate::device::{GraphicsDevice, QuadDraw, TextureId};
use crate::error::{BackendError, InitError};
use crate::runtime::{CompositorRuntime, Eye};
use crate::sync::lock;

/// Textures submitted for the current context, one per eye.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct SubmitDescriptors {
    eyes: [TextureId; 2],
}

/// Backend for compositor runtimes that share the engine's graphics device.
///
/// Pose waits and submissions are serialised on [`submission_lock`](Self::submission_lock),
/// which other components submitting to the same runtime must take too.
pub struct CompositorBackend {
    runtime: Box<dyn CompositorRuntime>,
    settings: BackendSettings,
    store: RenderContextStore,
    poses: PoseSet,
    eyes: [Pose; 2],
    fov: [Fov; 2],
    companion_size: (u32, u32),
    submission: Arc<Mutex<()>>,
    descriptors: Option<SubmitDescriptors>,
    failed_profiles: Vec<String>,
    connected: bool,
}

impl sealed::Sealed for CompositorBackend {}

impl CompositorBackend {
    pub fn new(runtime: Box<dyn CompositorRuntime>, settings: BackendSettings) -> Self {
        Self {
            runtime,
            settings,
            store: RenderContextStore::new(),
            poses: PoseSet::new(),
            eyes: [Pose::IDENTITY; 2],
            fov: [Fov::symmetric(1.0, 1.0); 2],
            companion_size: (1, 1),
            submission: Arc::new(Mutex::new(())),
            descriptors: None,
            failed_profiles: Vec::new(),
            connected: false,
        }
    }

    pub fn submission_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.submission)
    }

    fn update_poses(&mut self, head: Pose) {
        let (left, right) = scale_eye_pair(self.eyes[0], self.eyes[1], self.settings.world_scale);
        for (target, eye, fov) in [
            (RenderTarget::LeftEye, left, self.fov[0]),
            (RenderTarget::RightEye, right, self.fov[1]),
        ] {
            self.poses.update(target, head, eye, fov, self.settings.depth);
        }
    }

    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Err(e) = device.wait_idle(self.settings.sync_timeout) {
            log::warn!("GPU did not go idle before releasing render contexts: {e}");
        }
        self.descriptors = None;
        self.store.destroy_all(device);
        if self.connected {
            self.runtime.disconnect();
            self.connected = false;
        }
    }
}

impl VrBackend for CompositorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Compositor
    }

    fn initialize(
        &mut self,
        device: &mut dyn GraphicsDevice,
        companion_size: (u32, u32),
    ) -> Result<(), InitError> {
        self.companion_size = companion_size;
        let info = self
            .runtime
            .connect()
            .map_err(|e| InitError::runtime("compositor connection", e))?;
        self.connected = true;

        let result: Result<(), InitError> = (|| {
            let format = negotiate_format(&info.formats)?;
            if self.settings.quad_view {
                log::warn!("compositor runtimes have no quad-view support; rendering stereo");
            }

            for (i, eye) in Eye::BOTH.into_iter().enumerate() {
                self.eyes[i] = self.runtime.eye_to_head(eye);
                self.fov[i] = self.runtime.eye_fov(eye);
            }
            self.update_poses(Pose::IDENTITY);

            let layout = ContextLayout::stereo(info.recommended_size, companion_size, format);
            self.failed_profiles = build_profiles(
                &mut self.store,
                device,
                &self.settings.profiles,
                &layout,
                |_| Ok(()),
            )?;
            self.set_active_context(RenderProfile::DEFAULT_NAME)
                .map_err(|_| InitError::NoDefaultContext)
        })();

        if result.is_err() {
            self.release(device);
        }
        result
    }

    fn acquire_poses(&mut self) -> Result<bool, BackendError> {
        let head = {
            let _queue = lock(&self.submission);
            self.runtime.wait_get_poses(self.settings.pose_timeout)
        };
        match head {
            Ok(head) => {
                self.update_poses(head);
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(BackendError::Lost(e)),
            Err(e) => {
                log::debug!("pose wait failed: {e}");
                Ok(false)
            }
        }
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
        let ctx = self.store.current().ok_or(BackendError::NotInitialized)?;
        for target in RenderTarget::STEREO {
            if let Some(res) = ctx.target(target) {
                if let Some(resolve) = res.resolve {
                    device.resolve(res.color, resolve)?;
                }
            }
        }
        device.flush()?;
        Ok(())
    }

    fn submit(&mut self, _device: &mut dyn GraphicsDevice) -> Result<SubmitOutcome, BackendError> {
        let descriptors = self.descriptors.ok_or(BackendError::NotInitialized)?;
        let _queue = lock(&self.submission);

        let mut outcome = SubmitOutcome::Presented;
        for (eye, texture) in Eye::BOTH.into_iter().zip(descriptors.eyes) {
            match self.runtime.submit(eye, texture, QuadDraw::FULL_UV) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(BackendError::runtime("submit", e)),
                Err(e) => {
                    log::warn!("{eye:?} eye submit failed, dropping frame: {e}");
                    outcome = SubmitOutcome::Dropped;
                    break;
                }
            }
        }
        self.runtime.post_present_handoff();
        Ok(outcome)
    }

    fn set_active_context(&mut self, name: &str) -> Result<(), BackendError> {
        let ctx = self.store.select(name).ok_or(BackendError::NotInitialized)?;
        let eyes = [
            ctx.presentable(RenderTarget::LeftEye),
            ctx.presentable(RenderTarget::RightEye),
        ];
        self.descriptors = match eyes {
            [Some(left), Some(right)] => Some(SubmitDescriptors { eyes: [left, right] }),
            _ => None,
        };
        self.descriptors.map(|_| ()).ok_or(BackendError::NotInitialized)
    }

    fn reset_view(&mut self) -> Result<(), BackendError> {
        let _queue = lock(&self.submission);
        self.runtime.reset_seated_zero_pose();
        Ok(())
    }

    fn abandon_frame(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn contexts(&self) -> &RenderContextStore {
        &self.store
    }

    fn quad_view_active(&self) -> bool {
        false
    }

    fn failed_profiles(&self) -> &[String] {
        &self.failed_profiles
    }

    fn restart(&mut self, device: &mut dyn GraphicsDevice, quad_view: bool) -> Result<(), InitError> {
        let previous = self.store.current_name().map(str::to_owned);
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
        self.release(device);
        log::info!("compositor backend shut down");
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::config::CompositorConfig;
    use crate::device::{HeadlessDevice, TextureFormat};
    use crate::runtime::mock::MockCompositorRuntime;

    fn backend() -> (CompositorBackend, crate::runtime::mock::MockHandle, HeadlessDevice) {
        let runtime = MockCompositorRuntime::new();
        let handle = runtime.handle();
        let settings = BackendSettings::from(&CompositorConfig::default());
        (CompositorBackend::new(Box::new(runtime), settings), handle, HeadlessDevice::new("engine", (640, 360)))
    }

    #[test]
    fn initialises_and_submits_both_eyes() {
        let (mut backend, handle, mut dev) = backend();
        backend.initialize(&mut dev, (640, 360)).unwrap();
        assert!(backend.acquire_poses().unwrap());
        backend.prepare_for_display(&mut dev).unwrap();
        assert_eq!(backend.submit(&mut dev).unwrap(), SubmitOutcome::Presented);

        let ctx = backend.current_context().unwrap();
        let submitted = handle.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0].textures,
            vec![
                ctx.presentable(RenderTarget::LeftEye).unwrap(),
                ctx.presentable(RenderTarget::RightEye).unwrap()
            ]
        );
    }

    #[test]
    fn pose_timeout_skips_and_loss_tears_down() {
        let (mut backend, handle, mut dev) = backend();
        backend.initialize(&mut dev, (640, 360)).unwrap();

        handle.fail_next_poses(1);
        assert!(!backend.acquire_poses().unwrap());
        assert!(backend.acquire_poses().unwrap());

        handle.lose("unplugged");
        assert!(matches!(backend.acquire_poses(), Err(BackendError::Lost(_))));
    }

    #[test]
    fn transient_submit_failure_drops_one_frame() {
        let (mut backend, handle, mut dev) = backend();
        backend.initialize(&mut dev, (640, 360)).unwrap();
        handle.fail_next_submits(1);

        backend.acquire_poses().unwrap();
        assert_eq!(backend.submit(&mut dev).unwrap(), SubmitOutcome::Dropped);
        backend.acquire_poses().unwrap();
        assert_eq!(backend.submit(&mut dev).unwrap(), SubmitOutcome::Presented);
        assert_eq!(handle.submitted().len(), 1);
    }

    #[test]
    fn unsupported_formats_fail_initialisation_cleanly() {
        let (mut backend, handle, mut dev) = backend();
        handle.set_formats(vec![TextureFormat::Depth32Float]);
        let err = backend.initialize(&mut dev, (640, 360)).unwrap_err();
        assert!(matches!(err, InitError::NoCompatibleFormat { .. }));
        assert!(backend.contexts().is_empty());
    }

    #[test]
    fn world_scale_moves_eyes_about_their_midpoint() {
        let (mut backend, _handle, mut dev) = backend();
        backend.settings.world_scale = 500;
        backend.initialize(&mut dev, (640, 360)).unwrap();
        backend.acquire_poses().unwrap();

        let left = backend.eye_offset(RenderTarget::LeftEye).inverse().w_axis.truncate();
        let right = backend.eye_offset(RenderTarget::RightEye).inverse().w_axis.truncate();
        assert!(((right - left).length() - 0.128).abs() < 1e-5);
        assert!(((left + right) * 0.5).abs_diff_eq(glam::Vec3::ZERO, 1e-6));
    }
}
