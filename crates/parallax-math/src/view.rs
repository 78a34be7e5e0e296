use glam::{Mat4, Vec2, Vec3, Vec4};

/// Converts between the engine's left-handed space and the display system's
/// right-handed space. Its own inverse.
pub const Z_FLIP: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, -1.0, 0.0),
    Vec4::new(0.0, 0.0, 0.0, 1.0),
);

/// Per-eye view matrix.
///
/// `eye_offset × hmd_pose × Z_FLIP × horizon_lock × engine_view`, applied right
/// to left: the engine's world-to-camera transform, the horizon stabiliser, the
/// handedness flip, then head and eye transforms from the display system.
///
/// `eye_offset` and `hmd_pose` are already view-direction matrices
/// (parent-to-local), i.e. inverses of the poses the runtime reports.
#[inline]
pub fn eye_view(eye_offset: Mat4, hmd_pose: Mat4, horizon_lock: Mat4, engine_view: Mat4) -> Mat4 {
    eye_offset * hmd_pose * Z_FLIP * horizon_lock * engine_view
}

/// Model matrix for a unit quad (`[-0.5, 0.5]²` in XY) placed in head space.
///
/// `size` is in metres; `translation` positions the plane's centre relative to
/// the seated origin (negative z is in front of the viewer).
#[inline]
pub fn plane_model(size: Vec2, translation: Vec3) -> Mat4 {
    Mat4::from_translation(translation) * Mat4::from_scale(size.extend(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn z_flip_is_involution() {
        assert!((Z_FLIP * Z_FLIP).abs_diff_eq(Mat4::IDENTITY, 0.0));
        assert_eq!(Z_FLIP.transform_point3(Vec3::new(1.0, 2.0, 3.0)), Vec3::new(1.0, 2.0, -3.0));
    }

    #[test]
    fn identity_chain_only_flips_z() {
        let v = eye_view(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY);
        assert!(v.abs_diff_eq(Z_FLIP, 1e-6));
    }

    #[test]
    fn engine_forward_becomes_display_forward() {
        // Engine: +Z forward. Display: -Z forward.
        let v = eye_view(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY);
        let p = v.transform_point3(Vec3::new(0.0, 0.0, 5.0));
        assert!(p.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-6));
    }

    #[test]
    fn eye_offset_applies_last() {
        let offset = Mat4::from_translation(Vec3::new(-0.032, 0.0, 0.0));
        let head = Mat4::from_quat(Quat::from_rotation_y(0.3));
        let v = eye_view(offset, head, Mat4::IDENTITY, Mat4::IDENTITY);
        let p = Vec3::new(0.0, 0.0, 2.0);
        let expected = offset.transform_point3(head.transform_point3(Z_FLIP.transform_point3(p)));
        assert!(v.transform_point3(p).abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn plane_model_scales_then_translates() {
        let m = plane_model(Vec2::new(2.0, 1.0), Vec3::new(0.0, 0.0, -1.5));
        let corner = m.transform_point3(Vec3::new(0.5, 0.5, 0.0));
        assert!(corner.abs_diff_eq(Vec3::new(1.0, 0.5, -1.5), 1e-6));
    }
}
