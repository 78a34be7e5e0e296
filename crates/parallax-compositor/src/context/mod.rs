//! Render contexts.
//!
//! A [`RenderContext`] bundles every GPU resource one render profile needs:
//! per-view color, resolve and depth textures plus the two 2D planes. The
//! [`RenderContextStore`] owns all contexts of a backend and tracks which one
//! is current. Contexts are only ever built or destroyed whole.

mod store;
mod target;

pub use store::{ContextLayout, RenderContext, RenderContextStore, TargetResources};
pub use target::RenderTarget;
