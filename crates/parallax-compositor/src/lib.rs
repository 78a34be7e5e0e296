//! Stereo VR frame compositor.
//!
//! Sits between a monocular host engine and a VR display system: every frame
//! the engine's single draw stream is rendered once per eye (or per view, with
//! quad-view foveation), 2D planes are composited in front of the viewer, and
//! the result is handed to the display system. A desktop companion view is
//! drawn into the application's own back buffer.
//!
//! # Structure
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | per-frame driver ([`Compositor`]) and its state machine |
//! | [`backend`] | display-system variants behind [`VrBackend`] |
//! | [`context`] | named GPU resource bundles ([`RenderContextStore`]) |
//! | [`shim`] | engine adapter seam and matrix redirection |
//! | [`runtime`] | display-system contracts (+ mocks behind the `mock` feature) |
//! | [`sync`] | cross-device fence bridge |
//! | [`device`] | graphics-device seam: headless and `wgpu` |
//! | [`config`], [`error`], [`logging`], [`time`] | ambient pieces |

pub mod backend;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod runtime;
pub mod shim;
pub mod sync;
pub mod time;

pub use backend::{CompositorBackend, SessionBackend, VrBackend};
pub use config::{BackendKind, CompositorConfig, RenderProfile};
pub use context::{RenderContext, RenderContextStore, RenderTarget};
pub use pipeline::{Compositor, FrameOutcome};
pub use shim::{EngineAdapter, EngineSnapshot};
