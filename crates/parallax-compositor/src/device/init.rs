/// Adapter and device selection for [`WgpuDevice`](super::WgpuDevice).
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Headsets need the discrete adapter when there is one.
    pub power_preference: wgpu::PowerPreference,

    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,
    pub memory_hints: wgpu::MemoryHints,

    /// Swapchain settings for the desktop companion window.
    pub companion: CompanionInit,
}

/// Companion window swapchain settings.
///
/// The companion mirrors what the headset shows; it never paces the loop.
#[derive(Debug, Clone)]
pub struct CompanionInit {
    pub prefer_srgb: bool,

    /// Falls back to `Fifo` when the surface does not offer it.
    pub present_mode: wgpu::PresentMode,

    /// Ignored when the surface does not support it.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    pub max_frame_latency: u32,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            companion: CompanionInit::default(),
        }
    }
}

impl Default for CompanionInit {
    fn default() -> Self {
        Self {
            prefer_srgb: true,
            present_mode: wgpu::PresentMode::AutoNoVsync,
            alpha_mode: None,
            max_frame_latency: 1,
        }
    }
}
