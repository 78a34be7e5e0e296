use glam::Mat4;

/// Handle to a texture owned by one [`GraphicsDevice`](super::GraphicsDevice).
///
/// Ids are never reused within a device. [`TextureId::BACK_BUFFER`] always
/// names the application's own back buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

impl TextureId {
    pub const BACK_BUFFER: TextureId = TextureId(0);

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Cross-device handle to a texture created with `shared: true`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SharedHandle(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8UnormSrgb,
    Bgra8UnormSrgb,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Depth24PlusStencil8,
    Depth32Float,
}

impl TextureFormat {
    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8 | TextureFormat::Depth32Float)
    }

    #[inline]
    pub fn is_srgb(self) -> bool {
        matches!(self, TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Color attachment that is also sampled / copied from.
    RenderTarget,
    DepthStencil,
    /// Image owned by a display-system swapchain.
    Swapchain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub samples: u32,
    pub usage: TextureUsage,
    /// Export a [`SharedHandle`] so a peer device can open it.
    pub shared: bool,
}

impl TextureDesc {
    pub fn color(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            samples: 1,
            usage: TextureUsage::RenderTarget,
            shared: false,
        }
    }

    pub fn depth(label: impl Into<String>, width: u32, height: u32, samples: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format: TextureFormat::Depth24PlusStencil8,
            samples,
            usage: TextureUsage::DepthStencil,
            shared: false,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Currently bound color/depth attachments.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TargetBinding {
    pub color: Option<TextureId>,
    pub depth: Option<TextureId>,
}

impl TargetBinding {
    pub const BACK_BUFFER: TargetBinding = TargetBinding {
        color: Some(TextureId::BACK_BUFFER),
        depth: None,
    };

    pub const fn new(color: TextureId, depth: Option<TextureId>) -> Self {
        Self { color: Some(color), depth }
    }
}

/// One textured quad. The unit quad `[-0.5, 0.5]²` is mapped to clip space
/// by `transform`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuadDraw {
    pub texture: TextureId,
    pub transform: Mat4,
    /// `[u0, v0, u1, v1]`.
    pub uv: [f32; 4],
    pub opacity: f32,
}

impl QuadDraw {
    pub const FULL_UV: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    pub fn new(texture: TextureId, transform: Mat4) -> Self {
        Self {
            texture,
            transform,
            uv: Self::FULL_UV,
            opacity: 1.0,
        }
    }

    /// Covers the whole target: the unit quad scaled to `[-1, 1]²`.
    pub fn fullscreen(texture: TextureId) -> Self {
        Self::new(texture, Mat4::from_scale(glam::Vec3::new(2.0, 2.0, 1.0)))
    }

    pub fn with_uv(mut self, uv: [f32; 4]) -> Self {
        self.uv = uv;
        self
    }
}
