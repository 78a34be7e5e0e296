//! VR backends.
//!
//! [`VrBackend`] is sealed: the set of display-system variants is closed.
//! - [`CompositorBackend`] drives a [`CompositorRuntime`](crate::runtime::CompositorRuntime)
//!   on the engine's own device.
//! - [`SessionBackend`] drives a [`SessionRuntime`](crate::runtime::SessionRuntime)
//!   through a second device, bridged by a [`FenceBridge`](crate::sync::FenceBridge).
//!
//! Backend-specific data bound to a context's textures (submit descriptors,
//! swapchains) lives in the context's opaque payload, never in shared state.

mod compositor;
mod poses;
mod session;

use std::time::Duration;

use glam::Mat4;
use parallax_math::{DepthConvention, ProjectionKind};

pub use compositor::CompositorBackend;
pub use poses::PoseSet;
pub use session::{QuadMode, SessionBackend, ENGINE_COLOR_FORMAT, FOCUS_FOV_FRACTION};

use crate::config::{BackendKind, CompositorConfig, RenderProfile};
use crate::context::{ContextLayout, RenderContext, RenderContextStore, RenderTarget};
use crate::device::{GraphicsDevice, TextureFormat};
use crate::error::{BackendError, InitError, ResourceBuildError};

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Display-system formats the compositor can render or blit into, best first.
pub const PREFERRED_FORMATS: [TextureFormat; 5] = [
    TextureFormat::Rgba8UnormSrgb,
    TextureFormat::Bgra8UnormSrgb,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Bgra8Unorm,
];

/// Whether the display system took this frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Presented,
    /// A transient failure dropped the frame; already logged.
    Dropped,
}

/// The slice of [`CompositorConfig`] a backend works from.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub profiles: Vec<RenderProfile>,
    pub quad_view: bool,
    pub motion_compensation: bool,
    pub world_scale: u32,
    pub depth: DepthConvention,
    pub pose_timeout: Duration,
    pub sync_timeout: Duration,
}

impl From<&CompositorConfig> for BackendSettings {
    fn from(config: &CompositorConfig) -> Self {
        Self {
            profiles: config.profiles.clone(),
            quad_view: config.quad_view,
            motion_compensation: config.motion_compensation,
            world_scale: config.world_scale,
            depth: config.depth,
            pose_timeout: config.pose_timeout,
            sync_timeout: config.sync_timeout,
        }
    }
}

/// Display-system capability the frame pipeline drives.
///
/// Call order per frame: [`acquire_poses`](Self::acquire_poses), then the
/// accessors while rendering, then [`prepare_for_display`](Self::prepare_for_display)
/// and [`submit`](Self::submit). A frame that fails after poses were acquired
/// is closed with [`abandon_frame`](Self::abandon_frame).
pub trait VrBackend: sealed::Sealed + Send {
    fn kind(&self) -> BackendKind;

    /// Connects to the display system and builds a render context per
    /// configured profile. A failing non-default profile is skipped; a failing
    /// default profile fails initialisation.
    fn initialize(
        &mut self,
        device: &mut dyn GraphicsDevice,
        companion_size: (u32, u32),
    ) -> Result<(), InitError>;

    /// Refreshes poses for a new frame.
    ///
    /// `Ok(false)` means the frame must be skipped (timeout or transient
    /// runtime failure); any runtime frame already begun has been closed.
    /// `Err` is reserved for failures that need a teardown.
    fn acquire_poses(&mut self) -> Result<bool, BackendError>;

    fn projection(&self, target: RenderTarget, kind: ProjectionKind) -> Mat4;

    /// View-direction eye transform relative to the head.
    fn eye_offset(&self, target: RenderTarget) -> Mat4;

    /// View-direction head transform.
    fn pose(&self, target: RenderTarget) -> Mat4;

    /// Resolves, synchronises and copies the current context's views into
    /// what the display system consumes.
    fn prepare_for_display(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), BackendError>;

    /// Hands the prepared images over. Transient failures yield
    /// [`SubmitOutcome::Dropped`]; only unrecoverable ones are errors.
    fn submit(&mut self, device: &mut dyn GraphicsDevice) -> Result<SubmitOutcome, BackendError>;

    /// Makes `name` (or the default profile) current and re-derives the
    /// backend data bound to its textures.
    fn set_active_context(&mut self, name: &str) -> Result<(), BackendError>;

    /// Recentres the seated reference under the viewer's head.
    fn reset_view(&mut self) -> Result<(), BackendError>;

    /// Closes a frame whose poses were acquired but that will not be submitted.
    fn abandon_frame(&mut self) -> Result<(), BackendError>;

    fn contexts(&self) -> &RenderContextStore;

    fn current_context(&self) -> Option<&RenderContext> {
        self.contexts().current()
    }

    fn quad_view_active(&self) -> bool;

    /// Views rendered each frame.
    fn views(&self) -> &'static [RenderTarget] {
        RenderTarget::views(self.quad_view_active())
    }

    /// Profiles whose contexts failed to build during the last initialisation.
    fn failed_profiles(&self) -> &[String];

    /// Full teardown and re-initialisation, e.g. to toggle quad views. The
    /// previously current profile is reselected.
    fn restart(&mut self, device: &mut dyn GraphicsDevice, quad_view: bool) -> Result<(), InitError>;

    /// Waits for the GPU, then releases every resource and the runtime connection.
    fn shutdown(&mut self, device: &mut dyn GraphicsDevice);
}

/// First preferred format the display system offers.
pub(crate) fn negotiate_format(offered: &[TextureFormat]) -> Result<TextureFormat, InitError> {
    PREFERRED_FORMATS
        .into_iter()
        .find(|f| offered.contains(f))
        .ok_or_else(|| InitError::NoCompatibleFormat { offered: offered.to_vec() })
}

/// Builds every profile, default first. `attach` adds backend payloads; it
/// cleans up after itself when it fails.
///
/// Returns the names of non-default profiles that were skipped.
pub(crate) fn build_profiles(
    store: &mut RenderContextStore,
    device: &mut dyn GraphicsDevice,
    profiles: &[RenderProfile],
    layout: &ContextLayout,
    mut attach: impl FnMut(&mut RenderContext) -> Result<(), ResourceBuildError>,
) -> Result<Vec<String>, InitError> {
    let default = RenderProfile::default();
    let default = profiles
        .iter()
        .find(|p| p.name == RenderProfile::DEFAULT_NAME)
        .unwrap_or(&default);
    let ordered = std::iter::once(default).chain(profiles.iter().filter(|p| p.name != default.name));

    let mut failed = Vec::new();
    for profile in ordered {
        let result = store
            .build(device, profile, layout)
            .and_then(|ctx| attach(ctx));

        if let Err(e) = result {
            store.destroy(device, &profile.name);
            if profile.name == RenderProfile::DEFAULT_NAME {
                return Err(InitError::Resources(e));
            }
            log::warn!("skipping render profile `{}`: {e}", profile.name);
            failed.push(profile.name.clone());
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_follows_preference_not_offer_order() {
        let offered = [TextureFormat::Rgba16Float, TextureFormat::Bgra8UnormSrgb];
        assert_eq!(negotiate_format(&offered).unwrap(), TextureFormat::Bgra8UnormSrgb);
    }

    #[test]
    fn negotiation_fails_without_a_match() {
        let err = negotiate_format(&[TextureFormat::Depth32Float]).unwrap_err();
        assert!(matches!(err, InitError::NoCompatibleFormat { ref offered } if offered.len() == 1));
    }
}
