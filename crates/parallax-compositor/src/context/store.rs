use std::any::Any;
use std::fmt;

use super::RenderTarget;
use crate::config::RenderProfile;
use crate::device::{GraphicsDevice, SharedHandle, TextureDesc, TextureFormat, TextureId};
use crate::error::{DeviceError, ResourceBuildError};

/// GPU resources behind one [`RenderTarget`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TargetResources {
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    /// Render texture; multisampled when `samples > 1`.
    pub color: TextureId,
    /// Single-sampled resolve surface, present when `color` is multisampled.
    pub resolve: Option<TextureId>,
    pub depth: Option<TextureId>,
    /// Export handle of the presentable texture.
    pub shared: Option<SharedHandle>,
}

impl TargetResources {
    /// The single-sampled texture holding the finished image.
    #[inline]
    pub fn presentable(&self) -> TextureId {
        self.resolve.unwrap_or(self.color)
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn textures(&self) -> impl Iterator<Item = TextureId> {
        [Some(self.color), self.resolve, self.depth].into_iter().flatten()
    }
}

/// Sizes and formats a backend asks the store to build.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ContextLayout {
    /// Recommended per-eye size before supersampling.
    pub eye_size: (u32, u32),
    /// Recommended focus-view size; `None` builds a stereo context.
    pub focus_size: Option<(u32, u32)>,
    /// Size of the 2D planes (the companion window's size).
    pub plane_size: (u32, u32),
    pub color_format: TextureFormat,
    /// Export presentable view textures for a second device.
    pub shared: bool,
}

impl ContextLayout {
    pub fn stereo(eye_size: (u32, u32), plane_size: (u32, u32), color_format: TextureFormat) -> Self {
        Self {
            eye_size,
            focus_size: None,
            plane_size,
            color_format,
            shared: false,
        }
    }

    pub fn with_focus(mut self, focus_size: (u32, u32)) -> Self {
        self.focus_size = Some(focus_size);
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Targets this layout populates, in build order.
    pub fn targets(&self) -> impl Iterator<Item = RenderTarget> {
        let quad = self.focus_size.is_some();
        RenderTarget::ALL
            .into_iter()
            .filter(move |t| quad || !t.is_focus())
    }
}

fn scaled((w, h): (u32, u32), factor: f32) -> (u32, u32) {
    let s = |v: u32| ((v as f32 * factor).round() as u32).max(1);
    (s(w), s(h))
}

/// One named bundle of GPU render resources.
pub struct RenderContext {
    pub name: String,
    pub stage_ids: Vec<u32>,
    pub supersampling: f32,
    pub antialiasing: u32,
    pub color_format: TextureFormat,
    targets: [Option<TargetResources>; RenderTarget::COUNT],
    ext: Option<Box<dyn Any + Send>>,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("name", &self.name)
            .field("supersampling", &self.supersampling)
            .field("antialiasing", &self.antialiasing)
            .field("targets", &self.targets)
            .field("ext", &self.ext.is_some())
            .finish()
    }
}

impl RenderContext {
    #[inline]
    pub fn target(&self, target: RenderTarget) -> Option<&TargetResources> {
        self.targets[target.index()].as_ref()
    }

    #[inline]
    pub fn has(&self, target: RenderTarget) -> bool {
        self.targets[target.index()].is_some()
    }

    pub fn presentable(&self, target: RenderTarget) -> Option<TextureId> {
        self.target(target).map(TargetResources::presentable)
    }

    pub fn has_focus_views(&self) -> bool {
        self.has(RenderTarget::FocusLeft) && self.has(RenderTarget::FocusRight)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RenderTarget, &TargetResources)> {
        RenderTarget::ALL
            .into_iter()
            .filter_map(|t| self.target(t).map(|r| (t, r)))
    }

    // ── backend payload ───────────────────────────────────────────────────

    pub fn set_ext<T: Any + Send>(&mut self, ext: T) {
        self.ext = Some(Box::new(ext));
    }

    pub fn ext<T: Any + Send>(&self) -> Option<&T> {
        self.ext.as_ref().and_then(|e| e.downcast_ref())
    }

    pub fn take_ext<T: Any + Send>(&mut self) -> Option<T> {
        match self.ext.take()?.downcast::<T>() {
            Ok(ext) => Some(*ext),
            Err(other) => {
                self.ext = Some(other);
                None
            }
        }
    }

    fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        for slot in &mut self.targets {
            if let Some(res) = slot.take() {
                res.textures().for_each(|id| device.destroy_texture(id));
            }
        }
    }
}

/// Every render context a backend owns, plus which one is current.
#[derive(Debug, Default)]
pub struct RenderContextStore {
    contexts: Vec<RenderContext>,
    current: Option<String>,
    /// Replaced contexts whose backend payload has not been released yet.
    retired: Vec<RenderContext>,
}

impl RenderContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every target of `layout` for `profile`.
    ///
    /// Resources are always rebuilt as a whole. An existing context of the
    /// same name is replaced only once the new one is complete; on failure it
    /// stays as it was and nothing of the new context survives. A replaced
    /// context carrying a backend payload is kept in
    /// [`all_mut`](Self::all_mut) until [`destroy_all`](Self::destroy_all).
    pub fn build(
        &mut self,
        device: &mut dyn GraphicsDevice,
        profile: &RenderProfile,
        layout: &ContextLayout,
    ) -> Result<&mut RenderContext, ResourceBuildError> {
        let mut ctx = RenderContext {
            name: profile.name.clone(),
            stage_ids: profile.stage_ids.clone(),
            supersampling: profile.supersampling,
            antialiasing: profile.antialiasing,
            color_format: layout.color_format,
            targets: Default::default(),
            ext: None,
        };

        for target in layout.targets() {
            let size = match target {
                RenderTarget::LeftEye | RenderTarget::RightEye => {
                    scaled(layout.eye_size, profile.supersampling)
                }
                RenderTarget::FocusLeft | RenderTarget::FocusRight => {
                    scaled(layout.focus_size.unwrap_or(layout.eye_size), profile.supersampling)
                }
                RenderTarget::Menu | RenderTarget::Overlay => layout.plane_size,
            };

            match build_target(device, &profile.name, target, size, profile.samples(), layout) {
                Ok(res) => ctx.targets[target.index()] = Some(res),
                Err(source) => {
                    ctx.destroy(device);
                    return Err(ResourceBuildError {
                        profile: profile.name.clone(),
                        target: Some(target),
                        source,
                    });
                }
            }
        }

        let (w, h) = ctx.target(RenderTarget::LeftEye).map_or((0, 0), |r| r.size());
        log::info!(
            "render context `{}` built: {w}x{h} per eye, {}x MSAA{}",
            profile.name,
            profile.samples(),
            if ctx.has_focus_views() { ", quad view" } else { "" }
        );

        let pos = match self.contexts.iter().position(|c| c.name == ctx.name) {
            Some(pos) => {
                let old = std::mem::replace(&mut self.contexts[pos], ctx);
                self.retire(device, old);
                pos
            }
            None => {
                self.contexts.push(ctx);
                self.contexts.len() - 1
            }
        };
        Ok(&mut self.contexts[pos])
    }

    fn retire(&mut self, device: &mut dyn GraphicsDevice, mut old: RenderContext) {
        if old.ext.is_some() {
            log::debug!("render context `{}` replaced; holding it until its payload is released", old.name);
            self.retired.push(old);
        } else {
            old.destroy(device);
        }
    }

    /// Makes `name` current, falling back to the default profile when no such
    /// context exists. `None` only when there is no default either.
    pub fn select(&mut self, name: &str) -> Option<&RenderContext> {
        let chosen = if self.contains(name) {
            name
        } else if self.contains(RenderProfile::DEFAULT_NAME) {
            log::debug!("render context `{name}` not built; using `{}`", RenderProfile::DEFAULT_NAME);
            RenderProfile::DEFAULT_NAME
        } else {
            log::warn!("render context `{name}` not built and no default available");
            return None;
        };

        if self.current.as_deref() != Some(chosen) {
            self.current = Some(chosen.to_string());
        }
        self.current()
    }

    pub fn current(&self) -> Option<&RenderContext> {
        self.current.as_deref().and_then(|name| self.get(name))
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&RenderContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RenderContext> {
        self.contexts.iter_mut().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contexts.iter().map(|c| c.name.as_str())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RenderContext> {
        self.contexts.iter_mut()
    }

    /// Live contexts, then replaced ones still holding a payload. Release
    /// every payload through this before [`destroy_all`](Self::destroy_all).
    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut RenderContext> {
        self.contexts.iter_mut().chain(self.retired.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Destroys one context. Backend payloads must have been released first.
    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice, name: &str) {
        let Some(pos) = self.contexts.iter().position(|c| c.name == name) else {
            return;
        };
        let mut ctx = self.contexts.remove(pos);
        ctx.destroy(device);
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
    }

    /// Destroys every context. The caller waits for the GPU to go idle first.
    pub fn destroy_all(&mut self, device: &mut dyn GraphicsDevice) {
        for mut ctx in self.contexts.drain(..).chain(self.retired.drain(..)) {
            ctx.destroy(device);
        }
        self.current = None;
    }
}

fn build_target(
    device: &mut dyn GraphicsDevice,
    profile: &str,
    target: RenderTarget,
    (width, height): (u32, u32),
    samples: u32,
    layout: &ContextLayout,
) -> Result<TargetResources, DeviceError> {
    let label = |part: &str| format!("{profile}/{}/{part}", target.label());
    let samples = if target.is_plane() { 1 } else { samples };
    let export = layout.shared && target.is_view();

    let mut created: Vec<TextureId> = Vec::with_capacity(3);
    let result: Result<TargetResources, DeviceError> = (|| {
        let mut color_desc =
            TextureDesc::color(label("color"), width, height, layout.color_format).with_samples(samples);
        if samples == 1 && export {
            color_desc = color_desc.shared();
        }
        let color = device.create_texture(&color_desc)?;
        created.push(color);

        let resolve = if samples > 1 {
            let mut desc = TextureDesc::color(label("resolve"), width, height, layout.color_format);
            if export {
                desc = desc.shared();
            }
            let id = device.create_texture(&desc)?;
            created.push(id);
            Some(id)
        } else {
            None
        };

        let depth = if target.is_view() {
            let id = device.create_texture(&TextureDesc::depth(label("depth"), width, height, samples))?;
            created.push(id);
            Some(id)
        } else {
            None
        };

        let shared = device.shared_handle(resolve.unwrap_or(color));
        Ok(TargetResources { width, height, samples, color, resolve, depth, shared })
    })();

    if result.is_err() {
        created.into_iter().for_each(|id| device.destroy_texture(id));
    }
    result
}
