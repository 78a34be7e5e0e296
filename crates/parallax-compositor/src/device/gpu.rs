use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::quad::{QuadRenderer, QuadTarget};
use super::{
    GpuInit, GraphicsDevice, QuadDraw, SharedHandle, TargetBinding, TextureDesc, TextureFormat,
    TextureId, TextureUsage,
};
use crate::error::DeviceError;
use crate::sync::{lock, TimelineFence};

impl From<TextureFormat> for wgpu::TextureFormat {
    fn from(format: TextureFormat) -> Self {
        match format {
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

fn texture_usages(desc: &TextureDesc) -> wgpu::TextureUsages {
    use wgpu::TextureUsages as U;
    match desc.usage {
        _ if desc.samples > 1 => U::RENDER_ATTACHMENT,
        TextureUsage::DepthStencil => U::RENDER_ATTACHMENT,
        TextureUsage::RenderTarget | TextureUsage::Swapchain => {
            U::RENDER_ATTACHMENT | U::TEXTURE_BINDING | U::COPY_SRC | U::COPY_DST
        }
    }
}

struct GpuTexture {
    desc: TextureDesc,
    texture: Arc<wgpu::Texture>,
    view: wgpu::TextureView,
    shared: Option<SharedHandle>,
    /// Created here and exported, as opposed to opened from a peer.
    exported: bool,
}

/// Textures exported for the interop peer. Both sides hold the same
/// `wgpu::Texture`; the registry only maps handles.
#[derive(Default)]
struct SharedRegistry {
    next: u64,
    entries: HashMap<SharedHandle, (TextureDesc, Arc<wgpu::Texture>)>,
}

struct BackBuffer {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

/// Drives the device's completion callbacks while fence signals are pending.
///
/// `on_submitted_work_done` callbacks only fire from `Device::poll`; the render
/// thread must not block, so polling happens here.
struct FencePoller {
    tx: Option<flume::Sender<(TimelineFence, u64)>>,
    worker: Option<JoinHandle<()>>,
}

impl FencePoller {
    const POLL_INTERVAL: Duration = Duration::from_micros(250);
    const GIVE_UP_AFTER: Duration = Duration::from_secs(2);

    fn spawn(device: Arc<wgpu::Device>) -> Self {
        let (tx, rx) = flume::unbounded::<(TimelineFence, u64)>();
        let worker = std::thread::Builder::new()
            .name("wgpu-fence-poller".into())
            .spawn(move || {
                for (fence, value) in rx.iter() {
                    let deadline = Instant::now() + Self::GIVE_UP_AFTER;
                    while !fence.is_reached(value) {
                        if let Err(e) = device.poll(wgpu::PollType::Poll) {
                            log::warn!("device poll failed: {e:?}");
                            break;
                        }
                        if Instant::now() >= deadline {
                            log::warn!("fence `{}` value {value} never completed", fence.label());
                            break;
                        }
                        std::thread::sleep(Self::POLL_INTERVAL);
                    }
                }
            });

        match worker {
            Ok(worker) => Self { tx: Some(tx), worker: Some(worker) },
            Err(e) => {
                log::error!("failed to spawn fence poller: {e}");
                Self { tx: None, worker: None }
            }
        }
    }

    fn watch(&self, fence: TimelineFence, value: u64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send((fence, value));
        }
    }
}

impl Drop for FencePoller {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// [`GraphicsDevice`] over `wgpu`.
///
/// Commands are recorded into one encoder and submitted on
/// [`flush`](GraphicsDevice::flush). The back buffer is whatever view the
/// caller installed with [`set_back_buffer`](Self::set_back_buffer) for the
/// current frame.
pub struct WgpuDevice {
    label: String,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    textures: HashMap<TextureId, GpuTexture>,
    next_id: u32,
    shared: Arc<Mutex<SharedRegistry>>,

    binding: TargetBinding,
    back_buffer: Option<BackBuffer>,
    back_buffer_size: (u32, u32),

    encoder: Option<wgpu::CommandEncoder>,
    quads: QuadRenderer,
    poller: Option<FencePoller>,
}

impl WgpuDevice {
    /// Requests an adapter and device. `compatible_surface` ties the adapter to
    /// the companion window when there is one.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn request(
        label: &str,
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
        init: &GpuInit,
    ) -> Result<(wgpu::Adapter, Self)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: init.memory_hints.clone(),
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        log::info!("{label}: using adapter {:?}", adapter.get_info().name);
        Ok((adapter, Self::from_parts(label, Arc::new(device), Arc::new(queue))))
    }

    pub fn from_parts(label: &str, device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let quads = QuadRenderer::new(&device);
        Self {
            label: label.to_string(),
            device,
            queue,
            textures: HashMap::new(),
            next_id: 1,
            shared: Arc::new(Mutex::new(SharedRegistry::default())),
            binding: TargetBinding::BACK_BUFFER,
            back_buffer: None,
            back_buffer_size: (1, 1),
            encoder: None,
            quads,
            poller: None,
        }
    }

    /// A second logical device on the same `wgpu` device and queue, sharing the
    /// export registry. Plays the display system's device for the session backend.
    pub fn interop_peer(&self, label: &str) -> WgpuDevice {
        let mut peer = Self::from_parts(label, Arc::clone(&self.device), Arc::clone(&self.queue));
        peer.shared = Arc::clone(&self.shared);
        peer
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Installs this frame's back-buffer view.
    pub fn set_back_buffer(&mut self, view: wgpu::TextureView, format: wgpu::TextureFormat, size: (u32, u32)) {
        self.back_buffer = Some(BackBuffer { view, format });
        self.back_buffer_size = size;
    }

    /// Records the window size before the first frame was acquired.
    pub fn set_back_buffer_size(&mut self, size: (u32, u32)) {
        self.back_buffer_size = size;
    }

    /// Drops the back-buffer view so the surface texture can be presented.
    pub fn release_back_buffer(&mut self) {
        self.back_buffer = None;
    }

    fn next_texture_id(&mut self) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert(
        &mut self,
        desc: TextureDesc,
        texture: Arc<wgpu::Texture>,
        shared: Option<SharedHandle>,
        exported: bool,
    ) -> TextureId {
        let id = self.next_texture_id();
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.label),
            ..Default::default()
        });
        self.textures.insert(id, GpuTexture { desc, texture, view, shared, exported });
        id
    }
}

fn encoder<'a>(
    slot: &'a mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("parallax frame encoder"),
        })
    })
}

/// Color attachment lookup: view, format and sample count.
fn color_target<'a>(
    textures: &'a HashMap<TextureId, GpuTexture>,
    back_buffer: &'a Option<BackBuffer>,
    id: TextureId,
) -> Result<QuadTarget<'a>, DeviceError> {
    if id == TextureId::BACK_BUFFER {
        let bb = back_buffer
            .as_ref()
            .ok_or(DeviceError::Unsupported("no back buffer installed this frame"))?;
        return Ok(QuadTarget { view: &bb.view, format: bb.format, samples: 1 });
    }
    let tex = textures.get(&id).ok_or(DeviceError::UnknownTexture(id))?;
    Ok(QuadTarget {
        view: &tex.view,
        format: tex.desc.format.into(),
        samples: tex.desc.samples,
    })
}

impl GraphicsDevice for WgpuDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(DeviceError::Allocation {
                label: desc.label.clone(),
                width: desc.width,
                height: desc.height,
                reason: format!("size outside 1..={max}"),
            });
        }

        let texture = Arc::new(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: desc.samples.max(1),
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.into(),
            usage: texture_usages(desc),
            view_formats: &[],
        }));

        let shared = if desc.shared {
            let mut registry = lock(&self.shared);
            registry.next += 1;
            let handle = SharedHandle(registry.next);
            registry.entries.insert(handle, (desc.clone(), Arc::clone(&texture)));
            Some(handle)
        } else {
            None
        };

        let exported = shared.is_some();
        Ok(self.insert(desc.clone(), texture, shared, exported))
    }

    fn destroy_texture(&mut self, id: TextureId) {
        let Some(tex) = self.textures.remove(&id) else { return };
        if let (Some(handle), true) = (tex.shared, tex.exported) {
            lock(&self.shared).entries.remove(&handle);
        }
        if self.binding.color == Some(id) || self.binding.depth == Some(id) {
            self.binding = TargetBinding::BACK_BUFFER;
        }
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id).map(|t| t.desc.clone())
    }

    fn shared_handle(&self, id: TextureId) -> Option<SharedHandle> {
        self.textures.get(&id).and_then(|t| t.shared)
    }

    fn open_shared(&mut self, handle: SharedHandle) -> Result<TextureId, DeviceError> {
        let (desc, texture) = lock(&self.shared)
            .entries
            .get(&handle)
            .map(|(d, t)| (d.clone(), Arc::clone(t)))
            .ok_or(DeviceError::UnknownSharedHandle(handle))?;
        Ok(self.insert(desc, texture, Some(handle), false))
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        self.back_buffer_size
    }

    fn render_target(&self) -> TargetBinding {
        self.binding
    }

    fn set_render_target(&mut self, binding: TargetBinding) -> Result<(), DeviceError> {
        for id in binding.color.into_iter().chain(binding.depth) {
            if id != TextureId::BACK_BUFFER && !self.textures.contains_key(&id) {
                return Err(DeviceError::UnknownTexture(id));
            }
        }
        self.binding = binding;
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4], depth: Option<f32>) -> Result<(), DeviceError> {
        let Self { device, textures, back_buffer, binding, encoder: slot, .. } = self;
        let color_id = binding.color.ok_or(DeviceError::Unsupported("no color target bound"))?;
        let target = color_target(textures, back_buffer, color_id)?;

        let depth_attachment = match (depth, binding.depth) {
            (Some(d), Some(depth_id)) => {
                let tex = textures.get(&depth_id).ok_or(DeviceError::UnknownTexture(depth_id))?;
                let stencil_ops = (tex.desc.format == TextureFormat::Depth24PlusStencil8).then_some(
                    wgpu::Operations { load: wgpu::LoadOp::Clear(0), store: wgpu::StoreOp::Store },
                );
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &tex.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(d),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops,
                })
            }
            _ => None,
        };

        let encoder = encoder(slot, device);
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("parallax clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: color[0] as f64,
                        g: color[1] as f64,
                        b: color[2] as f64,
                        a: color[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }

    fn draw_quad(&mut self, quad: &QuadDraw) -> Result<(), DeviceError> {
        let Self { device, textures, back_buffer, binding, encoder: slot, quads, .. } = self;
        let color_id = binding.color.ok_or(DeviceError::Unsupported("no color target bound"))?;
        let target = color_target(textures, back_buffer, color_id)?;

        let src = textures.get(&quad.texture).ok_or(DeviceError::UnknownTexture(quad.texture))?;
        if src.desc.samples > 1 {
            return Err(DeviceError::Incompatible(format!(
                "{:?} is multisampled and cannot be sampled",
                quad.texture
            )));
        }

        let encoder = encoder(slot, device);
        quads.draw(device, encoder, target, &src.view, quad);
        Ok(())
    }

    fn resolve(&mut self, src: TextureId, dst: TextureId) -> Result<(), DeviceError> {
        let single_sampled = self
            .textures
            .get(&src)
            .ok_or(DeviceError::UnknownTexture(src))?
            .desc
            .samples
            <= 1;
        if single_sampled {
            return self.copy_texture(src, dst);
        }

        let Self { device, textures, encoder: slot, .. } = self;
        let s = textures.get(&src).ok_or(DeviceError::UnknownTexture(src))?;
        let d = textures.get(&dst).ok_or(DeviceError::UnknownTexture(dst))?;
        if s.desc.size() != d.desc.size() || s.desc.format != d.desc.format || d.desc.samples != 1 {
            return Err(DeviceError::Incompatible(format!("cannot resolve {src:?} into {dst:?}")));
        }

        let encoder = encoder(slot, device);
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("parallax resolve"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &s.view,
                resolve_target: Some(&d.view),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureId, dst: TextureId) -> Result<(), DeviceError> {
        let Self { device, textures, encoder: slot, .. } = self;
        let s = textures.get(&src).ok_or(DeviceError::UnknownTexture(src))?;
        let d = textures.get(&dst).ok_or(DeviceError::UnknownTexture(dst))?;
        if s.desc.size() != d.desc.size() || s.desc.format != d.desc.format || s.desc.samples != d.desc.samples {
            return Err(DeviceError::Incompatible(format!("cannot copy {src:?} into {dst:?}")));
        }

        let encoder = encoder(slot, device);
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &s.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &d.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: s.desc.width,
                height: s.desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        Ok(())
    }

    fn signal_fence(&mut self, fence: &TimelineFence, value: u64) -> Result<(), DeviceError> {
        self.flush()?;

        let signalled = fence.clone();
        self.queue.on_submitted_work_done(move || {
            if let Err(e) = signalled.signal(value) {
                log::warn!("fence signal from GPU callback rejected: {e}");
            }
        });

        let device = Arc::clone(&self.device);
        self.poller
            .get_or_insert_with(|| FencePoller::spawn(device))
            .watch(fence.clone(), value);
        Ok(())
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<(), DeviceError> {
        self.flush()?;

        let idle = TimelineFence::new("wait-idle");
        let signalled = idle.clone();
        self.queue.on_submitted_work_done(move || {
            let _ = signalled.signal(1);
        });

        let deadline = Instant::now() + timeout;
        while !idle.is_reached(1) {
            self.device
                .poll(wgpu::PollType::Poll)
                .map_err(|e| DeviceError::Lost(format!("{e:?}")))?;
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout(timeout));
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        Ok(())
    }
}
