use glam::Vec3;

use crate::pose::Pose;

/// World scale at which the eyes keep the separation the runtime reports.
pub const WORLD_SCALE_NEUTRAL: u32 = 1000;
pub const WORLD_SCALE_MIN: u32 = 500;
pub const WORLD_SCALE_MAX: u32 = 1500;

/// World scale is expressed in tenths of a percent.
#[inline]
pub fn clamp_world_scale(scale: u32) -> u32 {
    scale.clamp(WORLD_SCALE_MIN, WORLD_SCALE_MAX)
}

/// Rescales the distance between two eye positions around their midpoint.
///
/// A larger world scale makes the world appear bigger, which is a smaller
/// separation: the half-distance is multiplied by `1000 / scale`.
pub fn scale_eye_separation(left: Vec3, right: Vec3, scale: u32) -> (Vec3, Vec3) {
    let scale = clamp_world_scale(scale);
    if scale == WORLD_SCALE_NEUTRAL {
        return (left, right);
    }
    let mid = (left + right) * 0.5;
    let half = (right - left) * 0.5 * (WORLD_SCALE_NEUTRAL as f32 / scale as f32);
    (mid - half, mid + half)
}

/// [`scale_eye_separation`] applied to full poses; orientations are untouched.
pub fn scale_eye_pair(left: Pose, right: Pose, scale: u32) -> (Pose, Pose) {
    let (l, r) = scale_eye_separation(left.position, right.position, scale);
    (
        Pose { position: l, ..left },
        Pose { position: r, ..right },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midpoint(a: Vec3, b: Vec3) -> Vec3 {
        (a + b) * 0.5
    }

    #[test]
    fn midpoint_is_preserved_across_scale_range() {
        let left = Vec3::new(-0.031, 0.012, 0.004);
        let right = Vec3::new(0.033, 0.010, -0.002);
        for scale in (WORLD_SCALE_MIN..=WORLD_SCALE_MAX).step_by(50) {
            let (l, r) = scale_eye_separation(left, right, scale);
            assert!(
                midpoint(l, r).abs_diff_eq(midpoint(left, right), 1e-6),
                "scale {scale}"
            );
        }
    }

    #[test]
    fn neutral_scale_is_unchanged() {
        let left = Vec3::new(-0.03, 0.0, 0.0);
        let right = Vec3::new(0.03, 0.0, 0.0);
        assert_eq!(scale_eye_separation(left, right, WORLD_SCALE_NEUTRAL), (left, right));
    }

    #[test]
    fn double_scale_halves_separation() {
        let left = Vec3::new(-0.032, 0.0, 0.0);
        let right = Vec3::new(0.032, 0.0, 0.0);
        // 1500 is the ceiling; 2000 clamps to it.
        let (l, r) = scale_eye_separation(left, right, 2000);
        let expected = 0.064 * 1000.0 / 1500.0;
        assert!(((r - l).length() - expected).abs() < 1e-6);
    }

    #[test]
    fn pair_keeps_orientation() {
        let q = glam::Quat::from_rotation_y(0.2);
        let left = Pose::new(q, Vec3::new(-0.03, 0.0, 0.0));
        let right = Pose::new(q, Vec3::new(0.03, 0.0, 0.0));
        let (l, r) = scale_eye_pair(left, right, 500);
        assert_eq!(l.orientation, q);
        assert_eq!(r.orientation, q);
        assert!((r.position.x - 0.06).abs() < 1e-6);
    }
}
