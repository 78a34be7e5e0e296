//! Horizon lock.
//!
//! With the camera rigidly attached to the vehicle, every bump and bank of the
//! car rolls the viewer's horizon. The lock matrix sits between the handedness
//! flip and the engine's view matrix (camera space) and removes a configurable
//! share of the vehicle's roll and/or pitch.
//!
//! Decomposition is yaw-pitch-roll (`EulerRot::YXZ`). For the camera-space
//! view `Rz(-roll)·Rx(-pitch)·…` the lock
//!
//! ```text
//! Rz(-roll_kept) · Rx(pitch - pitch_kept) · Rz(roll)
//! ```
//!
//! turns the car's roll/pitch into the kept amounts. It is recomputed every
//! frame from the current orientation and never accumulated.

use core::f32::consts::{FRAC_PI_2, PI};

use glam::{EulerRot, Mat4, Quat};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HorizonLockMode {
    #[default]
    None,
    Roll,
    Pitch,
    RollAndPitch,
}

impl HorizonLockMode {
    #[inline]
    pub fn locks_roll(self) -> bool {
        matches!(self, HorizonLockMode::Roll | HorizonLockMode::RollAndPitch)
    }

    #[inline]
    pub fn locks_pitch(self) -> bool {
        matches!(self, HorizonLockMode::Pitch | HorizonLockMode::RollAndPitch)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HorizonLockSettings {
    pub mode: HorizonLockMode,
    /// Share of the locked axes that is cancelled, `0.0..=1.0`.
    pub strength: f32,
    /// Turn the view half around when the car is upside down, so the viewer
    /// keeps looking along the car's heading instead of backwards.
    pub flip_yaw_when_inverted: bool,
}

impl Default for HorizonLockSettings {
    fn default() -> Self {
        Self {
            mode: HorizonLockMode::None,
            strength: 1.0,
            flip_yaw_when_inverted: false,
        }
    }
}

impl HorizonLockSettings {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.mode != HorizonLockMode::None && self.strength > 0.0
    }
}

/// Lock matrix for the given vehicle orientation.
///
/// Identity whenever the settings are inactive. The caller is responsible for
/// passing identity settings when the camera is not a cockpit camera.
pub fn horizon_lock(vehicle: Quat, settings: &HorizonLockSettings) -> Mat4 {
    if !settings.is_active() || !vehicle.is_finite() {
        return Mat4::IDENTITY;
    }

    let strength = settings.strength.clamp(0.0, 1.0);
    let (_yaw, pitch, roll) = vehicle.normalize().to_euler(EulerRot::YXZ);

    let roll_kept = if settings.mode.locks_roll() { roll * (1.0 - strength) } else { roll };
    let pitch_kept = if settings.mode.locks_pitch() { pitch * (1.0 - strength) } else { pitch };

    let lock = Mat4::from_rotation_z(-roll_kept)
        * Mat4::from_rotation_x(pitch - pitch_kept)
        * Mat4::from_rotation_z(roll);

    if settings.flip_yaw_when_inverted && roll.abs() > FRAC_PI_2 {
        Mat4::from_rotation_y(PI) * lock
    } else {
        lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn car(yaw: f32, pitch: f32, roll: f32) -> Quat {
        Quat::from_euler(EulerRot::YXZ, yaw, pitch, roll)
    }

    fn settings(mode: HorizonLockMode, strength: f32) -> HorizonLockSettings {
        HorizonLockSettings { mode, strength, flip_yaw_when_inverted: false }
    }

    /// Camera-space rotation of a camera glued to the car, ignoring translation.
    fn camera_view(q: Quat) -> Mat4 {
        Mat4::from_quat(q.inverse())
    }

    #[test]
    fn disabled_is_identity_for_any_orientation() {
        let s = settings(HorizonLockMode::None, 1.0);
        for &(y, p, r) in &[(0.0, 0.0, 0.0), (1.0, 0.3, -0.4), (-2.0, -1.2, 2.9), (3.0, 1.5, 3.1)] {
            assert_eq!(horizon_lock(car(y, p, r), &s), Mat4::IDENTITY);
        }
    }

    #[test]
    fn zero_strength_is_identity() {
        let s = settings(HorizonLockMode::RollAndPitch, 0.0);
        assert_eq!(horizon_lock(car(0.5, 0.2, 0.3), &s), Mat4::IDENTITY);
    }

    #[test]
    fn full_roll_lock_levels_the_horizon() {
        let q = car(0.7, 0.2, 0.4);
        let lock = horizon_lock(q, &settings(HorizonLockMode::Roll, 1.0));
        let view = lock * camera_view(q);
        // Remaining camera rotation has no roll: world up stays in the camera's YZ plane.
        let up = view.transform_vector3(Vec3::Y);
        assert!(up.x.abs() < 1e-5, "residual roll: {up:?}");
    }

    #[test]
    fn full_lock_leaves_only_yaw() {
        let q = car(0.7, 0.2, 0.4);
        let lock = horizon_lock(q, &settings(HorizonLockMode::RollAndPitch, 1.0));
        let view = lock * camera_view(q);
        let expected = Mat4::from_rotation_y(-0.7);
        assert!(view.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn half_strength_keeps_half_the_roll() {
        let q = car(0.0, 0.0, 0.6);
        let lock = horizon_lock(q, &settings(HorizonLockMode::Roll, 0.5));
        let view = lock * camera_view(q);
        assert!(view.abs_diff_eq(Mat4::from_rotation_z(-0.3), 1e-5));
    }

    #[test]
    fn inverted_car_flips_yaw_when_enabled() {
        let q = car(0.0, 0.0, 3.0);
        let mut s = settings(HorizonLockMode::Roll, 1.0);
        let plain = horizon_lock(q, &s);
        s.flip_yaw_when_inverted = true;
        let flipped = horizon_lock(q, &s);
        assert!(flipped.abs_diff_eq(Mat4::from_rotation_y(PI) * plain, 1e-6));
    }
}
