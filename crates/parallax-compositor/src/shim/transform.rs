use glam::Mat4;
use parallax_math::{eye_view, ProjectionKind};

use super::{EngineSnapshot, GameMode, Geometry, TransformHook, TransformKind};
use crate::backend::VrBackend;
use crate::context::RenderTarget;

/// Matrices substituted into the engine while one view renders.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewMatrices {
    pub eye_offset: Mat4,
    pub head: Mat4,
    pub horizon_lock: Mat4,
    /// Indexed by [`ProjectionKind::index`].
    pub projections: [Mat4; 3],
}

impl ViewMatrices {
    pub fn from_backend(backend: &dyn VrBackend, target: RenderTarget, horizon_lock: Mat4) -> Self {
        Self {
            eye_offset: backend.eye_offset(target),
            head: backend.pose(target),
            horizon_lock,
            projections: ProjectionKind::ALL.map(|kind| backend.projection(target, kind)),
        }
    }

    #[inline]
    pub fn projection(&self, kind: ProjectionKind) -> Mat4 {
        self.projections[kind.index()]
    }
}

#[derive(Debug, Copy, Clone)]
struct ActiveView {
    target: RenderTarget,
    matrices: ViewMatrices,
    cockpit_camera: bool,
    main_menu: bool,
}

/// [`TransformHook`] redirecting engine matrices into the active VR view.
#[derive(Debug, Default)]
pub struct TransformShim {
    active: Option<ActiveView>,
    redirected: u64,
}

impl TransformShim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, target: RenderTarget, matrices: ViewMatrices, snapshot: &EngineSnapshot) {
        self.active = Some(ActiveView {
            target,
            matrices,
            cockpit_camera: snapshot.camera.is_cockpit(),
            main_menu: snapshot.mode == GameMode::MainMenu,
        });
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_target(&self) -> Option<RenderTarget> {
        self.active.map(|a| a.target)
    }

    /// Matrices replaced since creation.
    pub fn redirected(&self) -> u64 {
        self.redirected
    }

    /// Projection for one draw call. A frame interleaves vehicle and world
    /// geometry, so this is decided per call.
    pub fn projection_kind(&self, geometry: Geometry) -> ProjectionKind {
        match self.active {
            Some(a) if a.main_menu => ProjectionKind::MainMenu,
            Some(a) if a.cockpit_camera && geometry == Geometry::Vehicle => ProjectionKind::Cockpit,
            _ => ProjectionKind::Stage,
        }
    }
}

impl TransformHook for TransformShim {
    fn on_transform(&mut self, kind: TransformKind, geometry: Geometry, matrix: Mat4) -> Mat4 {
        let Some(active) = self.active else {
            return matrix;
        };
        let m = &active.matrices;
        let replaced = match kind {
            TransformKind::Projection => m.projection(self.projection_kind(geometry)),
            TransformKind::View => eye_view(m.eye_offset, m.head, m.horizon_lock, matrix),
            TransformKind::World => return matrix,
        };
        self.redirected += 1;
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shim::CameraKind;
    use glam::Vec3;
    use parallax_math::Z_FLIP;

    fn matrices() -> ViewMatrices {
        ViewMatrices {
            eye_offset: Mat4::from_translation(Vec3::new(0.03, 0.0, 0.0)),
            head: Mat4::from_rotation_y(0.2),
            horizon_lock: Mat4::IDENTITY,
            projections: [
                Mat4::from_scale(Vec3::splat(1.0)),
                Mat4::from_scale(Vec3::splat(2.0)),
                Mat4::from_scale(Vec3::splat(3.0)),
            ],
        }
    }

    #[test]
    fn inactive_shim_passes_through() {
        let mut shim = TransformShim::new();
        let m = Mat4::from_translation(Vec3::ONE);
        assert_eq!(shim.on_transform(TransformKind::Projection, Geometry::World, m), m);
        assert_eq!(shim.on_transform(TransformKind::View, Geometry::Vehicle, m), m);
        assert_eq!(shim.redirected(), 0);
    }

    #[test]
    fn projection_is_chosen_per_draw() {
        let mut shim = TransformShim::new();
        let driving = EngineSnapshot { mode: GameMode::Driving, camera: CameraKind::Cockpit, ..Default::default() };
        shim.activate(RenderTarget::LeftEye, matrices(), &driving);

        let p = |shim: &mut TransformShim, g| shim.on_transform(TransformKind::Projection, g, Mat4::IDENTITY);
        assert_eq!(p(&mut shim, Geometry::World), matrices().projection(ProjectionKind::Stage));
        assert_eq!(p(&mut shim, Geometry::Vehicle), matrices().projection(ProjectionKind::Cockpit));

        let chase = EngineSnapshot { camera: CameraKind::Chase, ..driving };
        shim.activate(RenderTarget::LeftEye, matrices(), &chase);
        assert_eq!(p(&mut shim, Geometry::Vehicle), matrices().projection(ProjectionKind::Stage));

        let menu = EngineSnapshot { mode: GameMode::MainMenu, ..driving };
        shim.activate(RenderTarget::RightEye, matrices(), &menu);
        assert_eq!(p(&mut shim, Geometry::World), matrices().projection(ProjectionKind::MainMenu));
        assert_eq!(shim.redirected(), 4);
    }

    #[test]
    fn view_is_composed_with_the_engine_camera() {
        let mut shim = TransformShim::new();
        shim.activate(RenderTarget::LeftEye, matrices(), &EngineSnapshot::default());
        let engine_view = Mat4::from_translation(Vec3::new(0.0, -1.0, 5.0));
        let got = shim.on_transform(TransformKind::View, Geometry::World, engine_view);
        let m = matrices();
        assert!(got.abs_diff_eq(m.eye_offset * m.head * Z_FLIP * engine_view, 1e-6));

        shim.deactivate();
        assert_eq!(shim.on_transform(TransformKind::View, Geometry::World, engine_view), engine_view);
    }
}
