//! Scriptable display systems.
//!
//! Both mocks simulate a seated headset with the optics of a common consumer
//! HMD. Tests and the studio steer them through a [`MockHandle`], which stays
//! usable after the runtime itself has been moved into a backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parallax_math::{recenter, Fov, Pose, Quat, Vec3};

use super::{
    CompositorInfo, CompositorRuntime, Eye, FrameTiming, LocatedView, ProjectionLayer,
    SessionInfo, SessionRequest, SessionRuntime, SpaceId, SwapchainDesc, SwapchainId, ViewConfig,
};
use crate::device::{GraphicsDevice, TextureDesc, TextureFormat, TextureId, TextureUsage};
use crate::error::RuntimeError;
use crate::sync::lock;

const FRAME_PERIOD: Duration = Duration::from_micros(11_111);
const SWAPCHAIN_LENGTH: usize = 3;
const FOCUS_FRACTION: f32 = 0.4;

/// One frame as the display system received it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedFrame {
    pub frame: u64,
    /// Submitted eye textures (compositor) or the released swapchain images
    /// (session), in view order.
    pub textures: Vec<TextureId>,
    pub layers: usize,
}

#[derive(Debug)]
struct MockSwapchain {
    images: Vec<TextureId>,
    next: usize,
    acquired: Option<usize>,
}

#[derive(Debug)]
struct MockState {
    present: bool,
    lost: Option<String>,

    head: Pose,
    seated_zero: Pose,
    eyes: [Pose; 2],
    fov: [Fov; 2],
    recommended: (u32, u32),
    formats: Vec<TextureFormat>,
    native_quad_views: bool,
    motion_compensation: bool,
    should_render: bool,

    pose_failures: u32,
    submit_failures: u32,

    frame: u64,
    in_frame: bool,
    frames_begun: u64,
    frames_ended: u64,
    empty_frames: u64,
    pending: Vec<TextureId>,
    submitted: Vec<SubmittedFrame>,
    recenters: u32,

    session: Option<SessionRequest>,
    session_requests: Vec<SessionRequest>,
    spaces: HashMap<SpaceId, Pose>,
    swapchains: HashMap<SwapchainId, MockSwapchain>,
    next_id: u32,
}

impl Default for MockState {
    fn default() -> Self {
        let deg = f32::to_radians;
        Self {
            present: true,
            lost: None,
            head: Pose::IDENTITY,
            seated_zero: Pose::IDENTITY,
            eyes: [
                Pose::from_position(Vec3::new(-0.032, 0.0, 0.0)),
                Pose::from_position(Vec3::new(0.032, 0.0, 0.0)),
            ],
            fov: [
                Fov::from_angles(deg(-54.42), deg(51.27), deg(55.82), deg(-55.71)),
                Fov::from_angles(deg(-51.30), deg(54.37), deg(55.90), deg(-55.61)),
            ],
            recommended: (1512, 1680),
            formats: vec![TextureFormat::Rgba8UnormSrgb, TextureFormat::Bgra8UnormSrgb],
            native_quad_views: true,
            motion_compensation: true,
            should_render: true,
            pose_failures: 0,
            submit_failures: 0,
            frame: 0,
            in_frame: false,
            frames_begun: 0,
            frames_ended: 0,
            empty_frames: 0,
            pending: Vec::new(),
            submitted: Vec::new(),
            recenters: 0,
            session: None,
            session_requests: Vec::new(),
            spaces: HashMap::new(),
            swapchains: HashMap::new(),
            next_id: 1,
        }
    }
}

impl MockState {
    fn check(&self) -> Result<(), RuntimeError> {
        match &self.lost {
            Some(reason) => Err(RuntimeError::Lost(reason.clone())),
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn display_time(&self) -> Duration {
        FRAME_PERIOD * (self.frame as u32)
    }

    fn eye_index(eye: Eye) -> usize {
        match eye {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// Steering handle shared by a mock runtime and its test.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn set_present(&self, present: bool) {
        lock(&self.state).present = present;
    }

    /// Every further call fails as if the display system disappeared.
    pub fn lose(&self, reason: &str) {
        lock(&self.state).lost = Some(reason.to_string());
    }

    pub fn set_head_pose(&self, head: Pose) {
        lock(&self.state).head = head;
    }

    pub fn set_head_orientation(&self, orientation: Quat) {
        lock(&self.state).head.orientation = orientation;
    }

    pub fn set_recommended_size(&self, size: (u32, u32)) {
        lock(&self.state).recommended = size;
    }

    pub fn set_formats(&self, formats: Vec<TextureFormat>) {
        lock(&self.state).formats = formats;
    }

    pub fn set_native_quad_views(&self, available: bool) {
        lock(&self.state).native_quad_views = available;
    }

    pub fn set_motion_compensation(&self, available: bool) {
        lock(&self.state).motion_compensation = available;
    }

    pub fn set_should_render(&self, should_render: bool) {
        lock(&self.state).should_render = should_render;
    }

    /// The next `n` pose waits time out.
    pub fn fail_next_poses(&self, n: u32) {
        lock(&self.state).pose_failures = n;
    }

    /// The next `n` submissions fail transiently.
    pub fn fail_next_submits(&self, n: u32) {
        lock(&self.state).submit_failures = n;
    }

    pub fn submitted(&self) -> Vec<SubmittedFrame> {
        lock(&self.state).submitted.clone()
    }

    pub fn take_submitted(&self) -> Vec<SubmittedFrame> {
        std::mem::take(&mut lock(&self.state).submitted)
    }

    pub fn frames_begun(&self) -> u64 {
        lock(&self.state).frames_begun
    }

    pub fn frames_ended(&self) -> u64 {
        lock(&self.state).frames_ended
    }

    /// Frames ended without any layer.
    pub fn empty_frames(&self) -> u64 {
        lock(&self.state).empty_frames
    }

    pub fn in_frame(&self) -> bool {
        lock(&self.state).in_frame
    }

    pub fn recenters(&self) -> u32 {
        lock(&self.state).recenters
    }

    pub fn session_requests(&self) -> Vec<SessionRequest> {
        lock(&self.state).session_requests.clone()
    }

    pub fn has_session(&self) -> bool {
        lock(&self.state).session.is_some()
    }

    /// Origins of the live reference spaces, in local space.
    pub fn reference_spaces(&self) -> Vec<Pose> {
        lock(&self.state).spaces.values().copied().collect()
    }

    pub fn live_swapchains(&self) -> usize {
        lock(&self.state).swapchains.len()
    }
}

// ── compositor runtime ────────────────────────────────────────────────────

/// Compositor-style runtime sharing the engine's device.
#[derive(Debug, Default)]
pub struct MockCompositorRuntime {
    handle: MockHandle,
}

impl MockCompositorRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl CompositorRuntime for MockCompositorRuntime {
    fn connect(&mut self) -> Result<CompositorInfo, RuntimeError> {
        let state = lock(&self.handle.state);
        if !state.present {
            return Err(RuntimeError::NotPresent);
        }
        state.check()?;
        Ok(CompositorInfo {
            recommended_size: state.recommended,
            formats: state.formats.clone(),
        })
    }

    fn eye_to_head(&self, eye: Eye) -> Pose {
        lock(&self.handle.state).eyes[MockState::eye_index(eye)]
    }

    fn eye_fov(&self, eye: Eye) -> Fov {
        lock(&self.handle.state).fov[MockState::eye_index(eye)]
    }

    fn wait_get_poses(&mut self, timeout: Duration) -> Result<Pose, RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        if state.pose_failures > 0 {
            state.pose_failures -= 1;
            return Err(RuntimeError::Timeout(timeout));
        }
        state.frame += 1;
        state.pending.clear();
        Ok(state.seated_zero.inverse().compose(state.head))
    }

    fn submit(&mut self, _eye: Eye, texture: TextureId, _bounds: [f32; 4]) -> Result<(), RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(RuntimeError::Transient("compositor busy".into()));
        }
        state.pending.push(texture);
        Ok(())
    }

    fn post_present_handoff(&mut self) {
        let mut state = lock(&self.handle.state);
        let textures = std::mem::take(&mut state.pending);
        if !textures.is_empty() {
            let frame = state.frame;
            state.submitted.push(SubmittedFrame { frame, textures, layers: 1 });
        }
    }

    fn reset_seated_zero_pose(&mut self) {
        let mut state = lock(&self.handle.state);
        state.seated_zero = recenter(Pose::IDENTITY, state.head);
        state.recenters += 1;
    }

    fn disconnect(&mut self) {
        log::debug!("mock compositor disconnected");
    }
}

// ── session runtime ───────────────────────────────────────────────────────

/// Session/swapchain runtime bound to its own device.
#[derive(Debug, Default)]
pub struct MockSessionRuntime {
    handle: MockHandle,
}

impl MockSessionRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl SessionRuntime for MockSessionRuntime {
    fn create_session(&mut self, request: SessionRequest) -> Result<SessionInfo, RuntimeError> {
        let mut state = lock(&self.handle.state);
        if !state.present {
            return Err(RuntimeError::NotPresent);
        }
        state.check()?;

        state.session_requests.push(request);
        state.session = Some(request);

        let quad = request.quad_views && state.native_quad_views;
        let eye = ViewConfig { recommended_size: state.recommended };
        let (w, h) = state.recommended;
        let focus = ViewConfig {
            recommended_size: ((w as f32 * 0.75) as u32, (h as f32 * 0.75) as u32),
        };
        let views = if quad { vec![eye, eye, focus, focus] } else { vec![eye, eye] };

        Ok(SessionInfo {
            views,
            formats: state.formats.clone(),
            quad_views_native: quad,
            motion_compensation: request.motion_compensation && state.motion_compensation,
        })
    }

    fn destroy_session(&mut self) {
        let mut state = lock(&self.handle.state);
        state.session = None;
        state.in_frame = false;
    }

    fn create_swapchain(
        &mut self,
        device: &mut dyn GraphicsDevice,
        desc: &SwapchainDesc,
    ) -> Result<SwapchainId, RuntimeError> {
        lock(&self.handle.state).check()?;

        let mut images = Vec::with_capacity(SWAPCHAIN_LENGTH);
        for i in 0..SWAPCHAIN_LENGTH {
            let image = TextureDesc::color(format!("{}#{i}", desc.label), desc.width, desc.height, desc.format)
                .with_usage(TextureUsage::Swapchain);
            match device.create_texture(&image) {
                Ok(id) => images.push(id),
                Err(e) => {
                    images.into_iter().for_each(|id| device.destroy_texture(id));
                    return Err(RuntimeError::Transient(e.to_string()));
                }
            }
        }

        let mut state = lock(&self.handle.state);
        let id = SwapchainId(state.next_id());
        state.swapchains.insert(id, MockSwapchain { images, next: 0, acquired: None });
        Ok(id)
    }

    fn destroy_swapchain(&mut self, device: &mut dyn GraphicsDevice, swapchain: SwapchainId) {
        let removed = lock(&self.handle.state).swapchains.remove(&swapchain);
        if let Some(chain) = removed {
            chain.images.into_iter().for_each(|id| device.destroy_texture(id));
        }
    }

    fn swapchain_images(&self, swapchain: SwapchainId) -> Vec<TextureId> {
        lock(&self.handle.state)
            .swapchains
            .get(&swapchain)
            .map(|c| c.images.clone())
            .unwrap_or_default()
    }

    fn acquire_image(&mut self, swapchain: SwapchainId) -> Result<usize, RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| RuntimeError::Transient(format!("unknown swapchain {swapchain:?}")))?;
        if chain.acquired.is_some() {
            return Err(RuntimeError::Transient("image already acquired".into()));
        }
        let index = chain.next;
        chain.next = (chain.next + 1) % chain.images.len();
        chain.acquired = Some(index);
        Ok(index)
    }

    fn wait_image(&mut self, _swapchain: SwapchainId, _timeout: Duration) -> Result<(), RuntimeError> {
        lock(&self.handle.state).check()
    }

    fn release_image(&mut self, swapchain: SwapchainId) -> Result<(), RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        let image = {
            let chain = state
                .swapchains
                .get_mut(&swapchain)
                .ok_or_else(|| RuntimeError::Transient(format!("unknown swapchain {swapchain:?}")))?;
            let index = chain
                .acquired
                .take()
                .ok_or_else(|| RuntimeError::Transient("no image acquired".into()))?;
            chain.images[index]
        };
        state.pending.push(image);
        Ok(())
    }

    fn wait_frame(&mut self, timeout: Duration) -> Result<FrameTiming, RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        if state.session.is_none() {
            return Err(RuntimeError::Transient("no session".into()));
        }
        if state.pose_failures > 0 {
            state.pose_failures -= 1;
            return Err(RuntimeError::Timeout(timeout));
        }
        state.frame += 1;
        Ok(FrameTiming {
            display_time: state.display_time(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> Result<(), RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        if state.in_frame {
            return Err(RuntimeError::Transient("frame already begun".into()));
        }
        state.in_frame = true;
        state.frames_begun += 1;
        state.pending.clear();
        Ok(())
    }

    fn locate_views(
        &mut self,
        _display_time: Duration,
        space: SpaceId,
    ) -> Result<Vec<LocatedView>, RuntimeError> {
        let state = lock(&self.handle.state);
        state.check()?;
        let origin = *state
            .spaces
            .get(&space)
            .ok_or_else(|| RuntimeError::Transient(format!("unknown space {space:?}")))?;

        let head = origin.inverse().compose(state.head);
        let mut views: Vec<LocatedView> = (0..2)
            .map(|i| LocatedView { pose: head.compose(state.eyes[i]), fov: state.fov[i] })
            .collect();

        let quad = state.session.is_some_and(|s| s.quad_views) && state.native_quad_views;
        if quad {
            for i in 0..2 {
                views.push(LocatedView { pose: views[i].pose, fov: state.fov[i].narrowed(FOCUS_FRACTION) });
            }
        }
        Ok(views)
    }

    fn end_frame(&mut self, _display_time: Duration, layers: &[ProjectionLayer]) -> Result<(), RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        if !state.in_frame {
            return Err(RuntimeError::Transient("end_frame without begin_frame".into()));
        }
        state.in_frame = false;
        state.frames_ended += 1;

        if layers.is_empty() {
            state.empty_frames += 1;
            state.pending.clear();
            return Ok(());
        }
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            state.pending.clear();
            return Err(RuntimeError::Transient("layer submission rejected".into()));
        }

        let frame = state.frame;
        let textures = std::mem::take(&mut state.pending);
        state.submitted.push(SubmittedFrame { frame, textures, layers: layers.len() });
        Ok(())
    }

    fn create_reference_space(&mut self, pose: Pose) -> Result<SpaceId, RuntimeError> {
        let mut state = lock(&self.handle.state);
        state.check()?;
        let id = SpaceId(state.next_id());
        state.spaces.insert(id, pose);
        Ok(id)
    }

    fn destroy_space(&mut self, space: SpaceId) {
        lock(&self.handle.state).spaces.remove(&space);
    }

    fn locate_view_space(&mut self, space: SpaceId, _display_time: Duration) -> Result<Pose, RuntimeError> {
        let state = lock(&self.handle.state);
        state.check()?;
        let origin = state
            .spaces
            .get(&space)
            .ok_or_else(|| RuntimeError::Transient(format!("unknown space {space:?}")))?;
        Ok(origin.inverse().compose(state.head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn absent_display_refuses_connection() {
        let mut rt = MockCompositorRuntime::new();
        rt.handle().set_present(false);
        assert!(matches!(rt.connect(), Err(RuntimeError::NotPresent)));
    }

    #[test]
    fn seated_reset_keeps_only_heading() {
        let mut rt = MockCompositorRuntime::new();
        let handle = rt.handle();
        let turned = Quat::from_rotation_y(0.8) * Quat::from_rotation_x(0.3);
        handle.set_head_pose(Pose::new(turned, Vec3::new(0.1, 1.2, 0.4)));
        rt.reset_seated_zero_pose();

        let seated = rt.wait_get_poses(Duration::from_millis(5)).unwrap();
        assert!(seated.position.abs_diff_eq(Vec3::ZERO, 1e-5));
        // The pitch is still there; only yaw was cancelled.
        let (yaw, pitch, _) = seated.orientation.to_euler(parallax_math::EulerRot::YXZ);
        assert!(yaw.abs() < 1e-4);
        assert!((pitch - 0.3).abs() < 1e-4);
    }

    #[test]
    fn session_frames_must_be_bracketed() {
        let mut rt = MockSessionRuntime::new();
        let handle = rt.handle();
        rt.create_session(SessionRequest::default()).unwrap();

        let timing = rt.wait_frame(Duration::from_millis(5)).unwrap();
        assert!(rt.end_frame(timing.display_time, &[]).is_err());
        rt.begin_frame().unwrap();
        assert!(rt.begin_frame().is_err());
        rt.end_frame(timing.display_time, &[]).unwrap();
        assert_eq!((handle.frames_begun(), handle.frames_ended(), handle.empty_frames()), (1, 1, 1));
    }

    #[test]
    fn swapchain_images_cycle() {
        let mut rt = MockSessionRuntime::new();
        let mut dev = HeadlessDevice::new("runtime", (8, 8));
        let desc = SwapchainDesc {
            label: "eye".into(),
            width: 16,
            height: 16,
            format: TextureFormat::Rgba8UnormSrgb,
        };
        let chain = rt.create_swapchain(&mut dev, &desc).unwrap();
        assert_eq!(rt.swapchain_images(chain).len(), SWAPCHAIN_LENGTH);

        let indices: Vec<usize> = (0..4)
            .map(|_| {
                let i = rt.acquire_image(chain).unwrap();
                rt.release_image(chain).unwrap();
                i
            })
            .collect();
        assert_eq!(indices, [0, 1, 2, 0]);

        rt.destroy_swapchain(&mut dev, chain);
        assert_eq!(rt.handle().live_swapchains(), 0);
        assert_eq!(dev.probe().live_textures(), 0);
    }

    #[test]
    fn quad_views_only_when_granted() {
        let mut rt = MockSessionRuntime::new();
        let handle = rt.handle();
        handle.set_native_quad_views(false);
        let info = rt.create_session(SessionRequest { quad_views: true, motion_compensation: false }).unwrap();
        assert!(!info.quad_views_native);
        assert_eq!(info.views.len(), 2);
        assert_eq!(info.focus_size(), None);
    }
}
