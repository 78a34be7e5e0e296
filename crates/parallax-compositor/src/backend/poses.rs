use glam::Mat4;
use parallax_math::{projection_for, DepthConvention, Fov, Pose, ProjectionKind};

use crate::context::RenderTarget;

const VIEWS: usize = 4;

/// Per-view matrices for the current frame.
///
/// Only 3D views carry matrices; the 2D planes read back identity.
#[derive(Debug, Clone)]
pub struct PoseSet {
    eye_offset: [Mat4; VIEWS],
    head: [Mat4; VIEWS],
    projection: [[Mat4; 3]; VIEWS],
    view_pose: [Pose; VIEWS],
    fov: [Fov; VIEWS],
}

impl Default for PoseSet {
    fn default() -> Self {
        let fov = Fov::symmetric(90f32.to_radians(), 90f32.to_radians());
        let mut set = Self {
            eye_offset: [Mat4::IDENTITY; VIEWS],
            head: [Mat4::IDENTITY; VIEWS],
            projection: [[Mat4::IDENTITY; 3]; VIEWS],
            view_pose: [Pose::IDENTITY; VIEWS],
            fov: [fov; VIEWS],
        };
        for target in RenderTarget::QUAD {
            set.update(target, Pose::IDENTITY, Pose::IDENTITY, fov, DepthConvention::Standard);
        }
        set
    }
}

impl PoseSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one view: `head` in the tracking space, `eye` relative to the head.
    pub fn update(&mut self, target: RenderTarget, head: Pose, eye: Pose, fov: Fov, depth: DepthConvention) {
        let Some(i) = slot(target) else { return };
        self.eye_offset[i] = eye.view_matrix();
        self.head[i] = head.view_matrix();
        for kind in ProjectionKind::ALL {
            self.projection[i][kind.index()] = projection_for(fov, kind, depth);
        }
        self.view_pose[i] = head.compose(eye);
        self.fov[i] = fov;
    }

    pub fn eye_offset(&self, target: RenderTarget) -> Mat4 {
        slot(target).map_or(Mat4::IDENTITY, |i| self.eye_offset[i])
    }

    pub fn pose(&self, target: RenderTarget) -> Mat4 {
        slot(target).map_or(Mat4::IDENTITY, |i| self.head[i])
    }

    pub fn projection(&self, target: RenderTarget, kind: ProjectionKind) -> Mat4 {
        slot(target).map_or(Mat4::IDENTITY, |i| self.projection[i][kind.index()])
    }

    /// Where the view was rendered from, in the tracking space.
    pub fn view_pose(&self, target: RenderTarget) -> Pose {
        slot(target).map_or(Pose::IDENTITY, |i| self.view_pose[i])
    }

    pub fn fov(&self, target: RenderTarget) -> Option<Fov> {
        slot(target).map(|i| self.fov[i])
    }
}

fn slot(target: RenderTarget) -> Option<usize> {
    target.is_view().then(|| target.index())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn eye_and_head_compose_to_the_view_pose() {
        let mut set = PoseSet::new();
        let head = Pose::new(Quat::from_rotation_y(0.4), Vec3::new(0.0, 1.1, 0.2));
        let eye = Pose::from_position(Vec3::new(-0.031, 0.0, 0.0));
        let fov = Fov::symmetric(1.6, 1.7);
        set.update(RenderTarget::LeftEye, head, eye, fov, DepthConvention::Standard);

        let composed = set.eye_offset(RenderTarget::LeftEye) * set.pose(RenderTarget::LeftEye);
        assert!(composed.abs_diff_eq(set.view_pose(RenderTarget::LeftEye).view_matrix(), 1e-5));
        assert_ne!(
            set.projection(RenderTarget::LeftEye, ProjectionKind::Cockpit),
            set.projection(RenderTarget::LeftEye, ProjectionKind::Stage)
        );
    }

    #[test]
    fn planes_have_no_matrices() {
        let mut set = PoseSet::new();
        set.update(RenderTarget::Menu, Pose::from_position(Vec3::X), Pose::IDENTITY, Fov::symmetric(1.0, 1.0), DepthConvention::Standard);
        assert_eq!(set.pose(RenderTarget::Menu), Mat4::IDENTITY);
        assert_eq!(set.fov(RenderTarget::Overlay), None);
    }
}
