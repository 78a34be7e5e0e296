//! Seated-reference recentring.
//!
//! The anchor is the pose of the seated reference space inside the runtime's
//! local space. Recentring moves it under the viewer's head while keeping it
//! level: only the yaw part of either orientation survives.

use glam::{EulerRot, Quat};

use crate::pose::Pose;

/// Rotation about the vertical axis only (the yaw of a yaw-pitch-roll
/// decomposition).
pub fn yaw_only(q: Quat) -> Quat {
    if !q.is_finite() || q.length_squared() < f32::EPSILON {
        return Quat::IDENTITY;
    }
    let (yaw, _, _) = q.normalize().to_euler(EulerRot::YXZ);
    Quat::from_rotation_y(yaw)
}

/// New anchor for a view located at `view` relative to `anchor`.
///
/// Orientation and position are derived together from the same inputs;
/// updating one without the other tilts the horizon.
pub fn recenter(anchor: Pose, view: Pose) -> Pose {
    Pose {
        orientation: (yaw_only(anchor.orientation) * yaw_only(view.orientation)).normalize(),
        position: anchor.position + anchor.orientation * view.position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    const EPS: f32 = 1e-4;

    /// The view re-expressed in the space defined by `new_anchor`, with the
    /// head held still.
    fn relocate(old_anchor: Pose, view: Pose, new_anchor: Pose) -> Pose {
        new_anchor.inverse() * (old_anchor * view)
    }

    fn head() -> Pose {
        Pose::new(
            Quat::from_euler(EulerRot::YXZ, 0.8, 0.25, -0.15),
            Vec3::new(0.12, 1.1, -0.3),
        )
    }

    #[test]
    fn recenter_is_idempotent() {
        let anchor = Pose::new(Quat::from_rotation_y(-0.4), Vec3::new(1.0, 0.0, 2.0));
        let view = head();

        let once = recenter(anchor, view);
        let view_after = relocate(anchor, view, once);
        let twice = recenter(once, view_after);

        assert!(twice.abs_diff_eq(once, EPS), "{once:?} vs {twice:?}");
    }

    #[test]
    fn recentred_view_faces_forward_at_origin() {
        let anchor = Pose::IDENTITY;
        let view = head();
        let anchor = recenter(anchor, view);
        let located = relocate(Pose::IDENTITY, view, anchor);

        assert!(located.position.abs_diff_eq(Vec3::ZERO, EPS));
        let (yaw, pitch, roll) = located.orientation.to_euler(EulerRot::YXZ);
        assert!(yaw.abs() < EPS);
        // Pitch and roll of the head are left alone.
        assert!((pitch - 0.25).abs() < EPS);
        assert!((roll + 0.15).abs() < EPS);
    }

    #[test]
    fn anchor_stays_level() {
        let tilted = Pose::new(Quat::from_euler(EulerRot::YXZ, 0.3, 0.5, 0.2), Vec3::ZERO);
        let a = recenter(tilted, head());
        let up = a.orientation * Vec3::Y;
        assert!(up.abs_diff_eq(Vec3::Y, EPS));
    }

    #[test]
    fn yaw_only_of_degenerate_is_identity() {
        assert_eq!(yaw_only(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0)), Quat::IDENTITY);
        assert_eq!(yaw_only(Quat::from_xyzw(f32::NAN, 0.0, 0.0, 1.0)), Quat::IDENTITY);
    }
}
