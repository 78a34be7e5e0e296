//! Stand-in host engine.
//!
//! Draws a ground plane and a dashboard quad through the same transform
//! setters a real engine would call, and records every render call so tests
//! can see which matrices and targets the compositor handed it.

use glam::{Mat4, Quat, Vec3};

use super::{CameraKind, EngineAdapter, EngineSnapshot, GameMode, Geometry, TransformHook, TransformKind};
use crate::context::RenderTarget;
use crate::device::{GraphicsDevice, QuadDraw, TargetBinding, TextureDesc, TextureFormat, TextureId};
use crate::error::DeviceError;

const GROUND_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Scene {
        /// Color target bound when the scene was drawn.
        target: Option<TextureId>,
        projections: Vec<(Geometry, Mat4)>,
        view: Mat4,
    },
    Plane {
        plane: RenderTarget,
        target: Option<TextureId>,
    },
}

#[derive(Debug)]
pub struct SyntheticEngine {
    snapshot: EngineSnapshot,
    camera: Mat4,
    projection: Mat4,
    ground: Option<TextureId>,
    calls: Vec<EngineCall>,
    scene_failures: u32,
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self {
            snapshot: EngineSnapshot::default(),
            // Driver's eye 1.1 m above the road, looking down +Z.
            camera: Mat4::from_translation(Vec3::new(0.0, -1.1, 0.0)),
            projection: Mat4::perspective_lh(60f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0),
            ground: None,
            calls: Vec::new(),
            scene_failures: 0,
        }
    }

    /// What the next [`snapshot`](EngineAdapter::snapshot) reports.
    pub fn state(&self) -> &EngineSnapshot {
        &self.snapshot
    }

    pub fn set_mode(&mut self, mode: GameMode) {
        self.snapshot.mode = mode;
    }

    pub fn set_camera(&mut self, camera: CameraKind) {
        self.snapshot.camera = camera;
    }

    pub fn set_stage(&mut self, stage_id: Option<u32>) {
        self.snapshot.stage_id = stage_id;
    }

    pub fn set_overlay(&mut self, show: bool) {
        self.snapshot.show_overlay = show;
    }

    pub fn set_vehicle_orientation(&mut self, orientation: Quat) {
        self.snapshot.vehicle_orientation = orientation;
    }

    /// Sways the car like a rough road would, `t` in seconds.
    pub fn drive(&mut self, t: f32) {
        let roll = 0.12 * (t * 1.7).sin();
        let pitch = 0.05 * (t * 2.3).sin();
        let yaw = 0.3 * (t * 0.2).sin();
        self.snapshot.vehicle_orientation = Quat::from_euler(glam::EulerRot::YXZ, yaw, pitch, roll);
    }

    /// The next `n` scene renders fail after drawing the world.
    pub fn fail_next_scenes(&mut self, n: u32) {
        self.scene_failures = n;
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<EngineCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn scene_calls(&self) -> impl Iterator<Item = &EngineCall> {
        self.calls.iter().filter(|c| matches!(c, EngineCall::Scene { .. }))
    }

    /// Releases the engine's own textures.
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(ground) = self.ground.take() {
            device.destroy_texture(ground);
        }
    }

    fn ground(&mut self, device: &mut dyn GraphicsDevice) -> Result<TextureId, DeviceError> {
        if let Some(ground) = self.ground {
            return Ok(ground);
        }
        let id = device.create_texture(&TextureDesc::color(
            "synthetic/ground",
            GROUND_SIZE,
            GROUND_SIZE,
            TextureFormat::Rgba8UnormSrgb,
        ))?;
        let previous = device.render_target();
        let filled = device
            .set_render_target(TargetBinding::new(id, None))
            .and_then(|()| device.clear([0.32, 0.3, 0.26, 1.0], None));
        device.set_render_target(previous)?;
        if let Err(e) = filled {
            device.destroy_texture(id);
            return Err(e);
        }
        self.ground = Some(id);
        Ok(id)
    }
}

impl EngineAdapter for SyntheticEngine {
    fn snapshot(&mut self) -> EngineSnapshot {
        self.snapshot
    }

    fn render_scene(
        &mut self,
        device: &mut dyn GraphicsDevice,
        hook: &mut dyn TransformHook,
    ) -> Result<(), DeviceError> {
        let ground = self.ground(device)?;
        let target = device.render_target().color;
        device.clear([0.45, 0.6, 0.8, 1.0], Some(1.0))?;

        let mut projections = Vec::with_capacity(2);
        let world = hook.on_transform(TransformKind::World, Geometry::World, Mat4::IDENTITY);
        let view = hook.on_transform(TransformKind::View, Geometry::World, self.camera);
        let proj = hook.on_transform(TransformKind::Projection, Geometry::World, self.projection);
        projections.push((Geometry::World, proj));

        let road = Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0))
            * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2)
            * Mat4::from_scale(Vec3::new(12.0, 80.0, 1.0));
        device.draw_quad(&QuadDraw::new(ground, proj * view * world * road))?;

        if self.scene_failures > 0 {
            self.scene_failures -= 1;
            self.calls.push(EngineCall::Scene { target, projections, view });
            return Err(DeviceError::Incompatible("scripted scene failure".into()));
        }

        let vehicle = Mat4::from_quat(self.snapshot.vehicle_orientation);
        let proj = hook.on_transform(TransformKind::Projection, Geometry::Vehicle, self.projection);
        projections.push((Geometry::Vehicle, proj));
        let dashboard = Mat4::from_translation(Vec3::new(0.0, 0.85, 0.6)) * Mat4::from_scale(Vec3::new(1.2, 0.3, 1.0));
        device.draw_quad(&QuadDraw::new(ground, proj * view * vehicle * dashboard))?;

        self.calls.push(EngineCall::Scene { target, projections, view });
        Ok(())
    }

    fn render_2d(&mut self, device: &mut dyn GraphicsDevice, plane: RenderTarget) -> Result<(), DeviceError> {
        let color = match plane {
            RenderTarget::Menu => [0.1, 0.1, 0.15, 0.9],
            _ => [0.0, 0.0, 0.0, 0.0],
        };
        device.clear(color, None)?;
        self.calls.push(EngineCall::Plane { plane, target: device.render_target().color });
        Ok(())
    }
}
