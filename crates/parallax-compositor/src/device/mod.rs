//! Graphics device seam.
//!
//! The compositor talks to the GPU through [`GraphicsDevice`], a small
//! handle-based contract covering exactly what frame composition needs:
//! - texture allocation, optionally exported for a peer device
//! - render-target binding, clears and textured-quad draws
//! - MSAA resolve and texture copies
//! - submission and GPU-timeline fence signalling
//!
//! Implementations:
//! - [`HeadlessDevice`]: deterministic in-memory device for tests and headless runs
//! - [`WgpuDevice`]: the same contract over `wgpu`

mod gpu;
mod headless;
mod init;
mod quad;
pub mod surface;
mod types;

use std::time::Duration;

pub use gpu::WgpuDevice;
pub use headless::{CopyRecord, DeviceCommand, HeadlessDevice, HeadlessProbe};
pub use init::{CompanionInit, GpuInit};
pub use surface::{CompanionSurface, SurfaceErrorAction};
pub use types::{
    QuadDraw, SharedHandle, TargetBinding, TextureDesc, TextureFormat, TextureId, TextureUsage,
};

use crate::error::DeviceError;
use crate::sync::TimelineFence;

/// GPU operations the compositor issues.
///
/// Commands are recorded in call order and become visible to other devices
/// only after [`flush`](GraphicsDevice::flush) (or a fence signal, which
/// flushes first).
pub trait GraphicsDevice: Send {
    fn label(&self) -> &str;

    // ── resources ─────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError>;

    /// Releases a texture. Unknown ids are ignored.
    fn destroy_texture(&mut self, id: TextureId);

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc>;

    /// Export handle of a texture created with `shared: true`.
    fn shared_handle(&self, id: TextureId) -> Option<SharedHandle>;

    /// Opens a texture exported by a peer device.
    fn open_shared(&mut self, handle: SharedHandle) -> Result<TextureId, DeviceError>;

    /// Size of the application back buffer in pixels.
    fn back_buffer_size(&self) -> (u32, u32);

    // ── targets ───────────────────────────────────────────────────────────

    fn render_target(&self) -> TargetBinding;

    fn set_render_target(&mut self, binding: TargetBinding) -> Result<(), DeviceError>;

    // ── commands ──────────────────────────────────────────────────────────

    /// Clears the bound color target, and the bound depth target when `depth` is set.
    fn clear(&mut self, color: [f32; 4], depth: Option<f32>) -> Result<(), DeviceError>;

    /// Draws a textured quad into the bound color target.
    fn draw_quad(&mut self, quad: &QuadDraw) -> Result<(), DeviceError>;

    /// Resolves a multisampled texture into a single-sampled one of the same
    /// size and format. A single-sampled `src` is copied.
    fn resolve(&mut self, src: TextureId, dst: TextureId) -> Result<(), DeviceError>;

    /// Copies `src` into `dst`; sizes and formats must match.
    fn copy_texture(&mut self, src: TextureId, dst: TextureId) -> Result<(), DeviceError>;

    // ── submission ────────────────────────────────────────────────────────

    /// Submits everything recorded so far.
    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Flushes, then signals `fence` to `value` once the submitted work completes.
    fn signal_fence(&mut self, fence: &TimelineFence, value: u64) -> Result<(), DeviceError>;

    /// Blocks until all submitted work has completed, or `timeout` passes.
    fn wait_idle(&mut self, timeout: Duration) -> Result<(), DeviceError>;
}
