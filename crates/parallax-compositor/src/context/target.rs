/// Logical render destination.
///
/// The set is fixed: four 3D views (two of them only with quad-view
/// rendering) and two 2D planes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderTarget {
    LeftEye,
    RightEye,
    /// Narrow high-resolution view, quad-view rendering only.
    FocusLeft,
    FocusRight,
    /// 2D main-menu plane.
    Menu,
    /// 2D in-game overlay plane.
    Overlay,
}

impl RenderTarget {
    pub const COUNT: usize = 6;

    pub const ALL: [RenderTarget; Self::COUNT] = [
        RenderTarget::LeftEye,
        RenderTarget::RightEye,
        RenderTarget::FocusLeft,
        RenderTarget::FocusRight,
        RenderTarget::Menu,
        RenderTarget::Overlay,
    ];

    pub const STEREO: [RenderTarget; 2] = [RenderTarget::LeftEye, RenderTarget::RightEye];

    pub const QUAD: [RenderTarget; 4] = [
        RenderTarget::LeftEye,
        RenderTarget::RightEye,
        RenderTarget::FocusLeft,
        RenderTarget::FocusRight,
    ];

    pub const PLANES: [RenderTarget; 2] = [RenderTarget::Menu, RenderTarget::Overlay];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// A 3D view rendered from the engine's scene.
    #[inline]
    pub const fn is_view(self) -> bool {
        !self.is_plane()
    }

    #[inline]
    pub const fn is_focus(self) -> bool {
        matches!(self, RenderTarget::FocusLeft | RenderTarget::FocusRight)
    }

    #[inline]
    pub const fn is_plane(self) -> bool {
        matches!(self, RenderTarget::Menu | RenderTarget::Overlay)
    }

    /// The wide eye a focus view sits inside; eyes map to themselves.
    pub const fn parent_eye(self) -> RenderTarget {
        match self {
            RenderTarget::FocusLeft => RenderTarget::LeftEye,
            RenderTarget::FocusRight => RenderTarget::RightEye,
            other => other,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RenderTarget::LeftEye => "left-eye",
            RenderTarget::RightEye => "right-eye",
            RenderTarget::FocusLeft => "focus-left",
            RenderTarget::FocusRight => "focus-right",
            RenderTarget::Menu => "menu",
            RenderTarget::Overlay => "overlay",
        }
    }

    /// Views rendered per frame for the given mode.
    pub const fn views(quad_view: bool) -> &'static [RenderTarget] {
        if quad_view { &Self::QUAD } else { &Self::STEREO }
    }
}
