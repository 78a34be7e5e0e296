use core::ops::Mul;

use glam::{Mat4, Quat, Vec3};

/// Rigid transform: rotation followed by translation.
///
/// Poses coming from a display system describe where something *is*
/// (object-to-parent). Use [`Pose::view_matrix`] for the parent-to-object
/// direction a renderer needs.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pose {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    #[inline]
    pub const fn new(orientation: Quat, position: Vec3) -> Self {
        Self { orientation, position }
    }

    #[inline]
    pub fn from_position(position: Vec3) -> Self {
        Self { orientation: Quat::IDENTITY, position }
    }

    /// Extracts rotation and translation; scale is discarded.
    pub fn from_matrix(m: Mat4) -> Self {
        let (_, orientation, position) = m.to_scale_rotation_translation();
        Self { orientation: orientation.normalize(), position }
    }

    #[inline]
    pub fn to_matrix(self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }

    pub fn inverse(self) -> Self {
        let inv = self.orientation.inverse();
        Self {
            orientation: inv,
            position: inv * -self.position,
        }
    }

    /// Matrix transforming parent-space points into this pose's local space.
    #[inline]
    pub fn view_matrix(self) -> Mat4 {
        self.inverse().to_matrix()
    }

    /// `self ∘ child`: `child` expressed in `self`'s space, lifted to the parent.
    pub fn compose(self, child: Pose) -> Self {
        Self {
            orientation: (self.orientation * child.orientation).normalize(),
            position: self.position + self.orientation * child.position,
        }
    }

    #[inline]
    pub fn transform_point(self, p: Vec3) -> Vec3 {
        self.position + self.orientation * p
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.orientation.is_finite() && self.position.is_finite()
    }

    /// Approximate equality. `q` and `-q` are the same rotation and compare equal.
    pub fn abs_diff_eq(self, other: Pose, max_abs_diff: f32) -> bool {
        let same_rotation = self.orientation.abs_diff_eq(other.orientation, max_abs_diff)
            || self.orientation.abs_diff_eq(-other.orientation, max_abs_diff);
        same_rotation && self.position.abs_diff_eq(other.position, max_abs_diff)
    }
}

impl Mul for Pose {
    type Output = Pose;
    #[inline]
    fn mul(self, rhs: Pose) -> Pose {
        self.compose(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn sample() -> Pose {
        Pose::new(
            Quat::from_euler(glam::EulerRot::YXZ, 0.4, -0.2, 0.1),
            Vec3::new(0.3, 1.2, -0.5),
        )
    }

    #[test]
    fn inverse_composes_to_identity() {
        let p = sample();
        assert!((p * p.inverse()).abs_diff_eq(Pose::IDENTITY, EPS));
        assert!((p.inverse() * p).abs_diff_eq(Pose::IDENTITY, EPS));
    }

    #[test]
    fn matrix_agrees_with_transform_point() {
        let p = sample();
        let v = Vec3::new(1.0, -2.0, 0.5);
        assert!(p.to_matrix().transform_point3(v).abs_diff_eq(p.transform_point(v), EPS));
    }

    #[test]
    fn view_matrix_maps_position_to_origin() {
        let p = sample();
        assert!(p.view_matrix().transform_point3(p.position).abs_diff_eq(Vec3::ZERO, EPS));
    }

    #[test]
    fn from_matrix_round_trips() {
        let p = sample();
        assert!(Pose::from_matrix(p.to_matrix()).abs_diff_eq(p, EPS));
    }

    #[test]
    fn negated_quaternion_compares_equal() {
        let p = sample();
        let q = Pose::new(-p.orientation, p.position);
        assert!(p.abs_diff_eq(q, EPS));
    }
}
