//! Display-system contracts.
//!
//! The two runtime families the compositor drives:
//! - [`CompositorRuntime`]: a compositor that shares the engine's graphics
//!   device. Poses come from a blocking wait; each eye texture is submitted
//!   directly.
//! - [`SessionRuntime`]: a session/swapchain runtime bound to its own device.
//!   Frames are bracketed by `wait_frame → begin_frame → end_frame` and images
//!   live in runtime-owned swapchains.
//!
//! Scriptable implementations of both live in [`mock`] (feature `mock`).

#[cfg(feature = "mock")]
pub mod mock;

use std::time::Duration;

use parallax_math::{Fov, Pose};

use crate::device::{GraphicsDevice, TextureFormat, TextureId};
use crate::error::RuntimeError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];
}

// ── compositor runtime ────────────────────────────────────────────────────

/// What a compositor runtime reports on connection.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositorInfo {
    /// Recommended per-eye render size.
    pub recommended_size: (u32, u32),
    /// Texture formats accepted by `submit`, in the runtime's preference order.
    pub formats: Vec<TextureFormat>,
}

pub trait CompositorRuntime: Send {
    fn connect(&mut self) -> Result<CompositorInfo, RuntimeError>;

    /// Eye pose relative to the head.
    fn eye_to_head(&self, eye: Eye) -> Pose;

    fn eye_fov(&self, eye: Eye) -> Fov;

    /// Blocks until the runtime hands out this frame's head pose in the seated
    /// space, at most `timeout`.
    fn wait_get_poses(&mut self, timeout: Duration) -> Result<Pose, RuntimeError>;

    /// Hands one eye's image to the compositor. `bounds` is `[u0, v0, u1, v1]`.
    fn submit(&mut self, eye: Eye, texture: TextureId, bounds: [f32; 4]) -> Result<(), RuntimeError>;

    /// Tells the compositor the frame is complete and it may start its work.
    fn post_present_handoff(&mut self);

    /// Makes the current head position and heading the seated origin.
    fn reset_seated_zero_pose(&mut self);

    fn disconnect(&mut self);
}

// ── session runtime ───────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SessionRequest {
    pub quad_views: bool,
    pub motion_compensation: bool,
}

/// Recommended render size of one view.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    pub recommended_size: (u32, u32),
}

/// Negotiated session capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Two views, or four when native quad views were granted.
    pub views: Vec<ViewConfig>,
    pub formats: Vec<TextureFormat>,
    pub quad_views_native: bool,
    pub motion_compensation: bool,
}

impl SessionInfo {
    pub fn eye_size(&self) -> Option<(u32, u32)> {
        self.views.first().map(|v| v.recommended_size)
    }

    pub fn focus_size(&self) -> Option<(u32, u32)> {
        match self.quad_views_native {
            true => self.views.get(2).map(|v| v.recommended_size),
            false => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SwapchainId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SpaceId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Result of `wait_frame`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameTiming {
    /// Predicted display time, runtime clock.
    pub display_time: Duration,
    pub should_render: bool,
}

/// One view located in a reference space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LocatedView {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LayerView {
    pub pose: Pose,
    pub fov: Fov,
    pub swapchain: SwapchainId,
    pub size: (u32, u32),
}

/// A projection layer: one image per view, all in `space`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionLayer {
    pub space: SpaceId,
    pub views: Vec<LayerView>,
}

pub trait SessionRuntime: Send {
    fn create_session(&mut self, request: SessionRequest) -> Result<SessionInfo, RuntimeError>;

    fn destroy_session(&mut self);

    /// Allocates a swapchain whose images live on `device`, the session's
    /// own graphics device.
    fn create_swapchain(
        &mut self,
        device: &mut dyn GraphicsDevice,
        desc: &SwapchainDesc,
    ) -> Result<SwapchainId, RuntimeError>;

    fn destroy_swapchain(&mut self, device: &mut dyn GraphicsDevice, swapchain: SwapchainId);

    /// Image textures of a swapchain, indexed by `acquire_image`'s result.
    fn swapchain_images(&self, swapchain: SwapchainId) -> Vec<TextureId>;

    fn acquire_image(&mut self, swapchain: SwapchainId) -> Result<usize, RuntimeError>;

    fn wait_image(&mut self, swapchain: SwapchainId, timeout: Duration) -> Result<(), RuntimeError>;

    fn release_image(&mut self, swapchain: SwapchainId) -> Result<(), RuntimeError>;

    /// Throttles to the display and predicts when this frame will show.
    fn wait_frame(&mut self, timeout: Duration) -> Result<FrameTiming, RuntimeError>;

    fn begin_frame(&mut self) -> Result<(), RuntimeError>;

    /// Views at `display_time`, in `space`.
    fn locate_views(
        &mut self,
        display_time: Duration,
        space: SpaceId,
    ) -> Result<Vec<LocatedView>, RuntimeError>;

    fn end_frame(&mut self, display_time: Duration, layers: &[ProjectionLayer]) -> Result<(), RuntimeError>;

    /// Creates a seated reference space whose origin sits at `pose` in the
    /// runtime's local space.
    fn create_reference_space(&mut self, pose: Pose) -> Result<SpaceId, RuntimeError>;

    fn destroy_space(&mut self, space: SpaceId);

    /// The headset's view space located in `space`.
    fn locate_view_space(&mut self, space: SpaceId, display_time: Duration) -> Result<Pose, RuntimeError>;
}
