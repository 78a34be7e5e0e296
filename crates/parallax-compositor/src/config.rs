//! Compositor configuration.
//!
//! Supplied by the host; the compositor only consumes it. Call
//! [`CompositorConfig::validated`] before handing it to [`crate::pipeline::Compositor`].

use std::time::Duration;

use glam::{Vec2, Vec3};
use parallax_math::stereo::{WORLD_SCALE_MAX, WORLD_SCALE_MIN};
use parallax_math::{DepthConvention, HorizonLockSettings, WORLD_SCALE_NEUTRAL};

/// Which display-system variant to drive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Single-API compositor runtime sharing the engine's device.
    #[default]
    Compositor,
    /// Session/swapchain runtime with its own device and a fence bridge.
    Session,
}

/// A named render-resource configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProfile {
    pub name: String,
    /// Multiplier on the runtime's recommended per-eye resolution.
    pub supersampling: f32,
    /// MSAA sample count; 0 disables multisampling.
    pub antialiasing: u32,
    /// Stages that select this profile automatically.
    pub stage_ids: Vec<u32>,
}

impl RenderProfile {
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supersampling: 1.0,
            antialiasing: 0,
            stage_ids: Vec::new(),
        }
    }

    pub fn with_supersampling(mut self, supersampling: f32) -> Self {
        self.supersampling = supersampling;
        self
    }

    pub fn with_antialiasing(mut self, antialiasing: u32) -> Self {
        self.antialiasing = antialiasing;
        self
    }

    pub fn with_stages(mut self, stage_ids: impl IntoIterator<Item = u32>) -> Self {
        self.stage_ids = stage_ids.into_iter().collect();
        self
    }

    /// GPU sample count for this profile's eye targets.
    #[inline]
    pub fn samples(&self) -> u32 {
        self.antialiasing.max(1)
    }
}

impl Default for RenderProfile {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }
}

/// What the desktop companion window shows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CompanionMode {
    /// Nothing beyond what the engine renders itself.
    Off,
    #[default]
    LeftEye,
    RightEye,
    /// A separate non-VR camera pass straight into the back buffer.
    SeparatePass,
}

/// Region of the source texture shown in the companion window, in percent of
/// the render-target resolution.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CompanionCrop {
    pub offset_x: f32,
    pub offset_y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for CompanionCrop {
    fn default() -> Self {
        Self { offset_x: 0.0, offset_y: 0.0, width: 100.0, height: 100.0 }
    }
}

impl CompanionCrop {
    /// `[u0, v0, u1, v1]` clamped to the texture.
    pub fn uv(&self) -> [f32; 4] {
        let u0 = (self.offset_x / 100.0).clamp(0.0, 1.0);
        let v0 = (self.offset_y / 100.0).clamp(0.0, 1.0);
        let u1 = ((self.offset_x + self.width) / 100.0).clamp(u0, 1.0);
        let v1 = ((self.offset_y + self.height) / 100.0).clamp(v0, 1.0);
        [u0, v0, u1, v1]
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct CompanionSettings {
    pub mode: CompanionMode,
    pub crop: CompanionCrop,
}

/// Placement of a 2D plane in front of the seated viewer.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PlaneSettings {
    /// Width/height in metres.
    pub size: Vec2,
    /// Centre relative to the seated origin (negative z is forward).
    pub translation: Vec3,
}

impl PlaneSettings {
    pub const fn new(size: Vec2, translation: Vec3) -> Self {
        Self { size, translation }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositorConfig {
    pub backend: BackendKind,
    pub profiles: Vec<RenderProfile>,
    /// Four-view foveated rendering (native or emulated).
    pub quad_view: bool,
    /// Ask the runtime for motion compensation when it offers it.
    pub motion_compensation: bool,
    pub horizon_lock: HorizonLockSettings,
    /// Tenths of a percent; 1000 is neutral.
    pub world_scale: u32,
    pub companion: CompanionSettings,
    pub menu_plane: PlaneSettings,
    pub overlay_plane: PlaneSettings,
    pub depth: DepthConvention,
    /// Upper bound on a blocking pose wait.
    pub pose_timeout: Duration,
    /// Upper bound on a cross-device fence wait.
    pub sync_timeout: Duration,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            profiles: vec![RenderProfile::default()],
            quad_view: false,
            motion_compensation: false,
            horizon_lock: HorizonLockSettings::default(),
            world_scale: WORLD_SCALE_NEUTRAL,
            companion: CompanionSettings::default(),
            menu_plane: PlaneSettings::new(Vec2::new(2.4, 1.35), Vec3::new(0.0, 0.0, -2.0)),
            overlay_plane: PlaneSettings::new(Vec2::new(1.6, 0.9), Vec3::new(0.0, -0.15, -1.4)),
            depth: DepthConvention::Standard,
            pose_timeout: Duration::from_millis(50),
            sync_timeout: Duration::from_millis(100),
        }
    }
}

pub const SUPERSAMPLING_MIN: f32 = 0.5;
pub const SUPERSAMPLING_MAX: f32 = 3.0;

fn round_antialiasing(aa: u32) -> u32 {
    match aa {
        0 | 1 => 0,
        2 | 3 => 2,
        4..=7 => 4,
        _ => 8,
    }
}

impl CompositorConfig {
    /// Normalises out-of-range values, logging each adjustment.
    pub fn validated(mut self) -> Self {
        let scale = self.world_scale.clamp(WORLD_SCALE_MIN, WORLD_SCALE_MAX);
        if scale != self.world_scale {
            log::warn!("world scale {} out of range; using {scale}", self.world_scale);
            self.world_scale = scale;
        }

        let strength = self.horizon_lock.strength;
        if !(0.0..=1.0).contains(&strength) || strength.is_nan() {
            let clamped = if strength.is_nan() { 1.0 } else { strength.clamp(0.0, 1.0) };
            log::warn!("horizon lock strength {strength} out of range; using {clamped}");
            self.horizon_lock.strength = clamped;
        }

        for p in &mut self.profiles {
            let ss = if p.supersampling.is_finite() {
                p.supersampling.clamp(SUPERSAMPLING_MIN, SUPERSAMPLING_MAX)
            } else {
                1.0
            };
            if ss != p.supersampling {
                log::warn!("profile `{}`: supersampling {} adjusted to {ss}", p.name, p.supersampling);
                p.supersampling = ss;
            }

            let aa = round_antialiasing(p.antialiasing);
            if aa != p.antialiasing {
                log::warn!("profile `{}`: antialiasing {} adjusted to {aa}", p.name, p.antialiasing);
                p.antialiasing = aa;
            }
        }

        if self.profile(RenderProfile::DEFAULT_NAME).is_none() {
            log::warn!("no `default` render profile configured; adding one");
            self.profiles.insert(0, RenderProfile::default());
        }

        self
    }

    pub fn profile(&self, name: &str) -> Option<&RenderProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// First non-default profile bound to `stage_id`.
    pub fn profile_for_stage(&self, stage_id: u32) -> Option<&RenderProfile> {
        self.profiles
            .iter()
            .filter(|p| p.name != RenderProfile::DEFAULT_NAME)
            .find(|p| p.stage_ids.contains(&stage_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_adds_default_profile() {
        let cfg = CompositorConfig {
            profiles: vec![RenderProfile::new("rally").with_stages([7])],
            ..Default::default()
        }
        .validated();
        assert_eq!(cfg.profiles[0].name, RenderProfile::DEFAULT_NAME);
        assert_eq!(cfg.profile_for_stage(7).map(|p| p.name.as_str()), Some("rally"));
        assert!(cfg.profile_for_stage(8).is_none());
    }

    #[test]
    fn validated_clamps_ranges() {
        let cfg = CompositorConfig {
            world_scale: 4000,
            profiles: vec![RenderProfile::default().with_supersampling(9.0).with_antialiasing(6)],
            ..Default::default()
        }
        .validated();
        assert_eq!(cfg.world_scale, WORLD_SCALE_MAX);
        assert_eq!(cfg.profiles[0].supersampling, SUPERSAMPLING_MAX);
        assert_eq!(cfg.profiles[0].antialiasing, 4);
    }

    #[test]
    fn antialiasing_rounds_down() {
        assert_eq!(round_antialiasing(1), 0);
        assert_eq!(round_antialiasing(3), 2);
        assert_eq!(round_antialiasing(8), 8);
        assert_eq!(round_antialiasing(16), 8);
    }

    #[test]
    fn crop_uv_is_clamped() {
        let crop = CompanionCrop { offset_x: 25.0, offset_y: 10.0, width: 100.0, height: 50.0 };
        assert_eq!(crop.uv(), [0.25, 0.1, 1.0, 0.6]);
    }
}
