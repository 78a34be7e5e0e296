//! Companion window swapchain.

use anyhow::{Context, Result};
use winit::dpi::PhysicalSize;

use super::init::CompanionInit;
use super::{TextureFormat, WgpuDevice};

/// What the caller does after a failed acquire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Swapchain rebuilt; the next frame may render.
    Reconfigured,
    /// Drop this frame only.
    SkipFrame,
    /// Close the companion window.
    Fatal,
}

/// The surface a [`WgpuDevice`] presents its back buffer into.
pub struct CompanionSurface<'w> {
    surface: wgpu::Surface<'w>,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
}

impl<'w> CompanionSurface<'w> {
    pub fn configure(
        surface: wgpu::Surface<'w>,
        adapter: &wgpu::Adapter,
        device: &mut WgpuDevice,
        init: &CompanionInit,
        size: PhysicalSize<u32>,
    ) -> Result<Self> {
        anyhow::ensure!(size.width > 0 && size.height > 0, "companion window has zero size");

        let caps = surface.get_capabilities(adapter);
        let format = choose_format(&caps.formats, init.prefer_srgb).context("surface reports no formats")?;
        let present_mode = if caps.present_modes.contains(&init.present_mode) {
            init.present_mode
        } else {
            log::debug!("{:?} unsupported by the companion surface; using Fifo", init.present_mode);
            wgpu::PresentMode::Fifo
        };
        let alpha_mode = init
            .alpha_mode
            .filter(|m| caps.alpha_modes.contains(m))
            .or_else(|| caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: init.max_frame_latency,
        };
        surface.configure(device.device(), &config);
        device.set_back_buffer_size((size.width, size.height));
        log::info!("companion surface {}x{} {format:?} {present_mode:?}", size.width, size.height);

        Ok(Self { surface, config, size })
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Records the new size. A minimised (zero-sized) window keeps the old
    /// swapchain until it is restored.
    pub fn resize(&mut self, device: &mut WgpuDevice, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(device.device(), &self.config);
        device.set_back_buffer_size((new_size.width, new_size.height));
    }

    /// Next swapchain image, or what to do instead. `Ok(None)` while minimised.
    pub fn acquire(&self, device: &WgpuDevice) -> Result<Option<wgpu::SurfaceTexture>, SurfaceErrorAction> {
        if self.size.width == 0 || self.size.height == 0 {
            return Ok(None);
        }
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                log::debug!("companion surface unavailable: {e}");
                let action = error_action(&e);
                if action == SurfaceErrorAction::Reconfigured {
                    self.surface.configure(device.device(), &self.config);
                }
                Err(action)
            }
        }
    }
}

fn error_action(err: &wgpu::SurfaceError) -> SurfaceErrorAction {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfaceErrorAction::Reconfigured,
        wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::Fatal,
        wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other => SurfaceErrorAction::SkipFrame,
    }
}

/// Picks a swapchain format the quad pipeline can target: sRGB first when
/// asked for, then any format the compositor represents, then whatever the
/// surface lists first.
pub fn choose_format(formats: &[wgpu::TextureFormat], prefer_srgb: bool) -> Option<wgpu::TextureFormat> {
    let representable = || formats.iter().copied().filter(|f| compositor_format(*f).is_some());
    if prefer_srgb {
        if let Some(f) = representable().find(|f| f.is_srgb()) {
            return Some(f);
        }
    }
    representable().next().or_else(|| formats.first().copied())
}

/// Maps a surface format onto the compositor's format set, if representable.
pub fn compositor_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    match format {
        wgpu::TextureFormat::Rgba8UnormSrgb => Some(TextureFormat::Rgba8UnormSrgb),
        wgpu::TextureFormat::Bgra8UnormSrgb => Some(TextureFormat::Bgra8UnormSrgb),
        wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
        wgpu::TextureFormat::Bgra8Unorm => Some(TextureFormat::Bgra8Unorm),
        wgpu::TextureFormat::Rgba16Float => Some(TextureFormat::Rgba16Float),
        _ => None,
    }
}
