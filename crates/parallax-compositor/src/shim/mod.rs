//! Engine interception seam.
//!
//! The host engine is reached only through [`EngineAdapter`]: how its render
//! entry point and transform setters are intercepted is the adapter's
//! business. While a VR view is being rendered the compositor hands the
//! engine a [`TransformShim`], which swaps projection and view matrices per
//! draw call and passes everything through otherwise.

#[cfg(feature = "mock")]
mod synthetic;
mod transform;

use glam::{Mat4, Quat};

#[cfg(feature = "mock")]
pub use synthetic::{EngineCall, SyntheticEngine};
pub use transform::{TransformShim, ViewMatrices};

use crate::context::RenderTarget;
use crate::device::GraphicsDevice;
use crate::error::DeviceError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum GameMode {
    #[default]
    MainMenu,
    Loading,
    Driving,
    Replay,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CameraKind {
    #[default]
    Cockpit,
    Bonnet,
    Chase,
    Trackside,
}

impl CameraKind {
    /// Cameras mounted inside the vehicle.
    #[inline]
    pub fn is_cockpit(self) -> bool {
        matches!(self, CameraKind::Cockpit | CameraKind::Bonnet)
    }
}

/// Engine state sampled once at the start of a frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EngineSnapshot {
    /// Currently loaded stage, if any.
    pub stage_id: Option<u32>,
    pub mode: GameMode,
    pub camera: CameraKind,
    /// Vehicle orientation in the engine's world space.
    pub vehicle_orientation: Quat,
    /// The in-game overlay has content this frame.
    pub show_overlay: bool,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            stage_id: None,
            mode: GameMode::default(),
            camera: CameraKind::default(),
            vehicle_orientation: Quat::IDENTITY,
            show_overlay: false,
        }
    }
}

impl EngineSnapshot {
    /// Horizon locking only applies from inside the vehicle while it moves.
    pub fn horizon_lock_applies(&self) -> bool {
        self.camera.is_cockpit() && matches!(self.mode, GameMode::Driving | GameMode::Replay)
    }

    /// The 2D plane shown this frame.
    pub fn plane(&self) -> Option<RenderTarget> {
        match self.mode {
            GameMode::MainMenu | GameMode::Loading => Some(RenderTarget::Menu),
            GameMode::Driving | GameMode::Replay => self.show_overlay.then_some(RenderTarget::Overlay),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransformKind {
    Projection,
    View,
    World,
}

/// What a draw call renders.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Geometry {
    World,
    /// The player's vehicle body and cockpit.
    Vehicle,
    Interface,
}

/// Receives every fixed-function transform or shader matrix the engine sets.
pub trait TransformHook {
    /// Returns the matrix the engine should use instead of `matrix`.
    fn on_transform(&mut self, kind: TransformKind, geometry: Geometry, matrix: Mat4) -> Mat4;
}

/// The host engine as the compositor sees it.
///
/// Both render calls draw into whatever target is bound on `device` and must
/// leave the binding as they found it.
pub trait EngineAdapter {
    fn snapshot(&mut self) -> EngineSnapshot;

    /// Renders the 3D scene once, reporting every transform through `hook`.
    fn render_scene(
        &mut self,
        device: &mut dyn GraphicsDevice,
        hook: &mut dyn TransformHook,
    ) -> Result<(), DeviceError>;

    /// Renders the 2D content of `plane`.
    fn render_2d(&mut self, device: &mut dyn GraphicsDevice, plane: RenderTarget) -> Result<(), DeviceError>;
}
