use glam::{Mat4, Vec4};

/// Far clip distance shared by every projection kind, in engine units.
pub const FAR_PLANE: f32 = 10_000.0;

/// Asymmetric field of view as tangents of the half-angles.
///
/// `left` and `down` are negative for a view that straddles the optical axis,
/// which is how display systems report per-eye frusta.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Fov {
    pub left: f32,
    pub right: f32,
    pub up: f32,
    pub down: f32,
}

impl Fov {
    /// From half-angles in radians (left/down negative).
    pub fn from_angles(left: f32, right: f32, up: f32, down: f32) -> Self {
        Self {
            left: left.tan(),
            right: right.tan(),
            up: up.tan(),
            down: down.tan(),
        }
    }

    /// Symmetric frustum from full horizontal/vertical angles in radians.
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        let h = (horizontal * 0.5).tan();
        let v = (vertical * 0.5).tan();
        Self { left: -h, right: h, up: v, down: -v }
    }

    /// Frustum shrunk around its own centre by `fraction` (0..=1].
    ///
    /// Used to derive focus views when the runtime cannot supply them.
    pub fn narrowed(self, fraction: f32) -> Self {
        let fraction = fraction.clamp(f32::EPSILON, 1.0);
        let cx = (self.left + self.right) * 0.5;
        let cy = (self.up + self.down) * 0.5;
        let hw = (self.right - self.left) * 0.5 * fraction;
        let hh = (self.up - self.down) * 0.5 * fraction;
        Self {
            left: cx - hw,
            right: cx + hw,
            up: cy + hh,
            down: cy - hh,
        }
    }

    #[inline]
    pub fn width(self) -> f32 {
        self.right - self.left
    }

    #[inline]
    pub fn height(self) -> f32 {
        self.up - self.down
    }

    pub fn is_valid(self) -> bool {
        self.width() > 0.0 && self.height() > 0.0 && self.width().is_finite() && self.height().is_finite()
    }
}

/// Depth mapping of clip-space z.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DepthConvention {
    /// near → 0, far → 1.
    #[default]
    Standard,
    /// near → 1, far → 0.
    Reversed,
}

/// Which near plane a draw uses.
///
/// Vehicle-body geometry seen from a cockpit camera sits a few centimetres from
/// the eye and needs a tighter near plane than world geometry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProjectionKind {
    Stage,
    Cockpit,
    MainMenu,
}

impl ProjectionKind {
    pub const ALL: [ProjectionKind; 3] = [ProjectionKind::Stage, ProjectionKind::Cockpit, ProjectionKind::MainMenu];

    pub const fn near(self) -> f32 {
        match self {
            ProjectionKind::Stage => 0.1,
            ProjectionKind::Cockpit => 0.01,
            ProjectionKind::MainMenu => 0.1,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            ProjectionKind::Stage => 0,
            ProjectionKind::Cockpit => 1,
            ProjectionKind::MainMenu => 2,
        }
    }
}

/// Right-handed off-axis perspective projection with a `[0, 1]` depth range.
pub fn perspective(fov: Fov, near: f32, far: f32, depth: DepthConvention) -> Mat4 {
    let (l, r, t, b) = (fov.left, fov.right, fov.up, fov.down);
    let (a, bz) = match depth {
        DepthConvention::Standard => (far / (near - far), near * far / (near - far)),
        DepthConvention::Reversed => (near / (far - near), near * far / (far - near)),
    };
    Mat4::from_cols(
        Vec4::new(2.0 / (r - l), 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 / (t - b), 0.0, 0.0),
        Vec4::new((r + l) / (r - l), (t + b) / (t - b), a, -1.0),
        Vec4::new(0.0, 0.0, bz, 0.0),
    )
}

#[inline]
pub fn projection_for(fov: Fov, kind: ProjectionKind, depth: DepthConvention) -> Mat4 {
    perspective(fov, kind.near(), FAR_PLANE, depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn ndc_depth(m: Mat4, z: f32) -> f32 {
        m.project_point3(Vec3::new(0.0, 0.0, z)).z
    }

    #[test]
    fn standard_depth_maps_near_to_zero() {
        let m = perspective(Fov::symmetric(1.6, 1.6), 0.1, 100.0, DepthConvention::Standard);
        assert!((ndc_depth(m, -0.1) - 0.0).abs() < 1e-5);
        assert!((ndc_depth(m, -100.0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn reversed_depth_maps_near_to_one() {
        let m = perspective(Fov::symmetric(1.6, 1.6), 0.1, 100.0, DepthConvention::Reversed);
        assert!((ndc_depth(m, -0.1) - 1.0).abs() < 1e-5);
        assert!((ndc_depth(m, -100.0) - 0.0).abs() < 1e-4);
    }

    #[test]
    fn asymmetric_edges_land_on_ndc_bounds() {
        let fov = Fov { left: -1.2, right: 0.8, up: 1.0, down: -0.9 };
        let m = perspective(fov, 0.1, 100.0, DepthConvention::Standard);
        let left = m.project_point3(Vec3::new(fov.left, 0.0, -1.0));
        let up = m.project_point3(Vec3::new(0.0, fov.up, -1.0));
        assert!((left.x + 1.0).abs() < 1e-5);
        assert!((up.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cockpit_has_tighter_near_plane() {
        assert!(ProjectionKind::Cockpit.near() < ProjectionKind::Stage.near());
        let fov = Fov::symmetric(1.6, 1.6);
        let stage = projection_for(fov, ProjectionKind::Stage, DepthConvention::Standard);
        let cockpit = projection_for(fov, ProjectionKind::Cockpit, DepthConvention::Standard);
        // 5 cm in front of the eye: clipped by the stage frustum, kept by the cockpit one.
        assert!(ndc_depth(stage, -0.05) < 0.0);
        assert!(ndc_depth(cockpit, -0.05) >= 0.0);
    }

    #[test]
    fn narrowed_keeps_centre() {
        let fov = Fov { left: -1.2, right: 0.8, up: 1.0, down: -0.6 };
        let n = fov.narrowed(0.5);
        assert!(((n.left + n.right) - (fov.left + fov.right)).abs() < 1e-6);
        assert!(((n.up + n.down) - (fov.up + fov.down)).abs() < 1e-6);
        assert!((n.width() - fov.width() * 0.5).abs() < 1e-6);
    }
}
