//! Pose and projection math for the **parallax** stereo compositor.
//!
//! Everything here is a pure function over `glam` types. No state is kept
//! between calls; the compositor recomputes every matrix each frame.
//!
//! # Conventions
//!
//! - Column vectors, column-major matrices (`glam` defaults). A product
//!   `a * b` applies `b` first.
//! - The display system is right-handed (-Z forward). The host engine is
//!   left-handed (+Z forward); [`Z_FLIP`] bridges the two.
//! - Projections map depth to `[0, 1]`, optionally reversed.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pose`] | `Pose` (orientation + position) |
//! | [`projection`] | `Fov`, `ProjectionKind`, `DepthConvention`, `perspective` |
//! | [`view`] | `Z_FLIP`, per-eye view composition, 2D plane placement |
//! | [`horizon`] | horizon-lock stabilisation |
//! | [`stereo`] | world-scale eye separation |
//! | [`recenter`] | yaw-only recentring of the seated reference |

pub mod horizon;
pub mod pose;
pub mod projection;
pub mod recenter;
pub mod stereo;
pub mod view;

pub use glam::{EulerRot, Mat4, Quat, Vec2, Vec3, Vec4};

pub use horizon::{horizon_lock, HorizonLockMode, HorizonLockSettings};
pub use pose::Pose;
pub use projection::{perspective, projection_for, DepthConvention, Fov, ProjectionKind, FAR_PLANE};
pub use recenter::{recenter, yaw_only};
pub use stereo::{clamp_world_scale, scale_eye_pair, scale_eye_separation, WORLD_SCALE_NEUTRAL};
pub use view::{eye_view, plane_model, Z_FLIP};
