//! In-memory graphics device.
//!
//! Textures carry no pixels, only a content stamp: clears and draws write the
//! device's current stamp, copies and resolves propagate the source's stamp.
//! That is enough to tell which frame's content a read observed.
//!
//! Shared textures live in a pool visible to every peer created with
//! [`HeadlessDevice::peer`]. With [`HeadlessDevice::with_latency`] writes to
//! shared textures and fence signals only land after a delay, on an ordered
//! timeline thread, the way GPU work completes after submission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use glam::Mat4;

use super::{
    GraphicsDevice, QuadDraw, SharedHandle, TargetBinding, TextureDesc, TextureFormat, TextureId,
    TextureUsage,
};
use crate::error::DeviceError;
use crate::sync::{lock, TimelineFence};

/// Recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    CreateTexture { id: TextureId, label: String },
    DestroyTexture(TextureId),
    SetRenderTarget(TargetBinding),
    Clear { target: TargetBinding },
    DrawQuad { target: Option<TextureId>, texture: TextureId, transform: Mat4 },
    Resolve { src: TextureId, dst: TextureId },
    Copy { src: TextureId, dst: TextureId },
    Flush,
    SignalFence { value: u64 },
}

/// A read of one texture into another, with the content stamp it observed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub src: TextureId,
    pub dst: TextureId,
    pub stamp: u64,
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDesc,
    stamp: u64,
    shared: Option<SharedHandle>,
    /// Opened from a peer: reads go through the shared pool.
    opened: bool,
}

#[derive(Debug)]
struct HeadlessState {
    next_id: u32,
    back_buffer: (u32, u32),
    textures: HashMap<TextureId, HeadlessTexture>,
    binding: TargetBinding,
    stamp: u64,
    /// Shared-texture writes recorded since the last flush.
    pending: Vec<(SharedHandle, u64)>,
    commands: Vec<DeviceCommand>,
    copies: Vec<CopyRecord>,
    fail_label: Option<String>,
    lost: bool,
    /// Stall per copy, simulating a slow device queue.
    copy_delay: Duration,
}

impl HeadlessState {
    fn new(back_buffer: (u32, u32)) -> Self {
        let mut textures = HashMap::new();
        textures.insert(
            TextureId::BACK_BUFFER,
            HeadlessTexture {
                desc: TextureDesc {
                    label: "back buffer".into(),
                    width: back_buffer.0,
                    height: back_buffer.1,
                    format: TextureFormat::Bgra8UnormSrgb,
                    samples: 1,
                    usage: TextureUsage::RenderTarget,
                    shared: false,
                },
                stamp: 0,
                shared: None,
                opened: false,
            },
        );
        Self {
            next_id: 1,
            back_buffer,
            textures,
            binding: TargetBinding::BACK_BUFFER,
            stamp: 0,
            pending: Vec::new(),
            commands: Vec::new(),
            copies: Vec::new(),
            fail_label: None,
            lost: false,
            copy_delay: Duration::ZERO,
        }
    }

    fn texture(&self, id: TextureId) -> Result<&HeadlessTexture, DeviceError> {
        self.textures.get(&id).ok_or(DeviceError::UnknownTexture(id))
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        if self.lost {
            Err(DeviceError::Lost("headless device marked lost".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct SharedPool {
    next: u64,
    slots: HashMap<SharedHandle, SharedSlot>,
}

#[derive(Debug)]
struct SharedSlot {
    desc: TextureDesc,
    stamp: u64,
}

enum TimelineOp {
    Writes { ready_at: Instant, writes: Vec<(SharedHandle, u64)> },
    Signal { ready_at: Instant, fence: TimelineFence, value: u64 },
    Idle { done: flume::Sender<()> },
}

struct Timeline {
    tx: Option<flume::Sender<TimelineOp>>,
    worker: Option<JoinHandle<()>>,
    latency: Duration,
}

impl Timeline {
    fn spawn(label: &str, latency: Duration, pool: Arc<Mutex<SharedPool>>) -> Option<Self> {
        let (tx, rx) = flume::unbounded();
        let worker = std::thread::Builder::new()
            .name(format!("timeline-{label}"))
            .spawn(move || run_timeline(rx, pool));
        match worker {
            Ok(worker) => Some(Self { tx: Some(tx), worker: Some(worker), latency }),
            Err(e) => {
                log::warn!("headless `{label}`: no timeline thread ({e}); latency disabled");
                None
            }
        }
    }

    fn push(&self, op: TimelineOp) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(op);
        }
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_timeline(rx: flume::Receiver<TimelineOp>, pool: Arc<Mutex<SharedPool>>) {
    fn sleep_until(t: Instant) {
        let now = Instant::now();
        if t > now {
            std::thread::sleep(t - now);
        }
    }

    for op in rx.iter() {
        match op {
            TimelineOp::Writes { ready_at, writes } => {
                sleep_until(ready_at);
                let mut pool = lock(&pool);
                for (handle, stamp) in writes {
                    if let Some(slot) = pool.slots.get_mut(&handle) {
                        slot.stamp = stamp;
                    }
                }
            }
            TimelineOp::Signal { ready_at, fence, value } => {
                sleep_until(ready_at);
                if let Err(e) = fence.signal(value) {
                    log::warn!("headless timeline: {e}");
                }
            }
            TimelineOp::Idle { done } => {
                let _ = done.send(());
            }
        }
    }
}

/// Deterministic device without a GPU.
pub struct HeadlessDevice {
    label: String,
    state: Arc<Mutex<HeadlessState>>,
    pool: Arc<Mutex<SharedPool>>,
    timeline: Option<Timeline>,
}

impl HeadlessDevice {
    pub fn new(label: impl Into<String>, back_buffer: (u32, u32)) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(HeadlessState::new(back_buffer))),
            pool: Arc::new(Mutex::new(SharedPool::default())),
            timeline: None,
        }
    }

    /// Delays completion of submitted shared writes and fence signals.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.timeline = Timeline::spawn(&self.label, latency, Arc::clone(&self.pool));
        self
    }

    /// A second device sharing this one's shared-texture pool.
    pub fn peer(&self, label: impl Into<String>) -> HeadlessDevice {
        let back_buffer = lock(&self.state).back_buffer;
        HeadlessDevice {
            label: label.into(),
            state: Arc::new(Mutex::new(HeadlessState::new(back_buffer))),
            pool: Arc::clone(&self.pool),
            timeline: None,
        }
    }

    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe { state: Arc::clone(&self.state) }
    }

    fn read_stamp(&self, state: &HeadlessState, id: TextureId) -> Result<u64, DeviceError> {
        let tex = state.texture(id)?;
        match (tex.opened, tex.shared) {
            (true, Some(handle)) => Ok(lock(&self.pool).slots.get(&handle).map_or(0, |s| s.stamp)),
            _ => Ok(tex.stamp),
        }
    }

    fn write_stamp(&self, state: &mut HeadlessState, id: TextureId, stamp: u64) -> Result<(), DeviceError> {
        let tex = state.textures.get_mut(&id).ok_or(DeviceError::UnknownTexture(id))?;
        tex.stamp = stamp;
        if let Some(handle) = tex.shared {
            if self.timeline.is_some() {
                state.pending.push((handle, stamp));
            } else if let Some(slot) = lock(&self.pool).slots.get_mut(&handle) {
                slot.stamp = stamp;
            }
        }
        Ok(())
    }

    fn bound_color(state: &HeadlessState) -> Result<TextureId, DeviceError> {
        state.binding.color.ok_or(DeviceError::Unsupported("no color target bound"))
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let mut state = lock(&self.state);
        state.check_alive()?;

        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::Allocation {
                label: desc.label.clone(),
                width: desc.width,
                height: desc.height,
                reason: "zero-sized texture".into(),
            });
        }
        if let Some(pattern) = &state.fail_label {
            if desc.label.contains(pattern.as_str()) {
                return Err(DeviceError::Allocation {
                    label: desc.label.clone(),
                    width: desc.width,
                    height: desc.height,
                    reason: "injected allocation failure".into(),
                });
            }
        }

        let id = TextureId(state.next_id);
        state.next_id += 1;

        let shared = if desc.shared {
            let mut pool = lock(&self.pool);
            pool.next += 1;
            let handle = SharedHandle(pool.next);
            pool.slots.insert(handle, SharedSlot { desc: desc.clone(), stamp: 0 });
            Some(handle)
        } else {
            None
        };

        state.textures.insert(
            id,
            HeadlessTexture { desc: desc.clone(), stamp: 0, shared, opened: false },
        );
        state.commands.push(DeviceCommand::CreateTexture { id, label: desc.label.clone() });
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if id == TextureId::BACK_BUFFER {
            return;
        }
        let mut state = lock(&self.state);
        if let Some(tex) = state.textures.remove(&id) {
            if let (Some(handle), false) = (tex.shared, tex.opened) {
                lock(&self.pool).slots.remove(&handle);
            }
            if state.binding.color == Some(id) || state.binding.depth == Some(id) {
                state.binding = TargetBinding::BACK_BUFFER;
            }
            state.commands.push(DeviceCommand::DestroyTexture(id));
        }
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        lock(&self.state).textures.get(&id).map(|t| t.desc.clone())
    }

    fn shared_handle(&self, id: TextureId) -> Option<SharedHandle> {
        lock(&self.state).textures.get(&id).and_then(|t| t.shared)
    }

    fn open_shared(&mut self, handle: SharedHandle) -> Result<TextureId, DeviceError> {
        let desc = lock(&self.pool)
            .slots
            .get(&handle)
            .map(|slot| slot.desc.clone())
            .ok_or(DeviceError::UnknownSharedHandle(handle))?;

        let mut state = lock(&self.state);
        state.check_alive()?;
        let id = TextureId(state.next_id);
        state.next_id += 1;
        state.textures.insert(
            id,
            HeadlessTexture { desc: desc.clone(), stamp: 0, shared: Some(handle), opened: true },
        );
        state.commands.push(DeviceCommand::CreateTexture { id, label: desc.label });
        Ok(id)
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        lock(&self.state).back_buffer
    }

    fn render_target(&self) -> TargetBinding {
        lock(&self.state).binding
    }

    fn set_render_target(&mut self, binding: TargetBinding) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        if let Some(color) = binding.color {
            if state.texture(color)?.desc.format.is_depth() {
                return Err(DeviceError::Incompatible(format!("{color:?} is a depth texture")));
            }
        }
        if let Some(depth) = binding.depth {
            if !state.texture(depth)?.desc.format.is_depth() {
                return Err(DeviceError::Incompatible(format!("{depth:?} is not a depth texture")));
            }
        }
        state.binding = binding;
        state.commands.push(DeviceCommand::SetRenderTarget(binding));
        Ok(())
    }

    fn clear(&mut self, _color: [f32; 4], _depth: Option<f32>) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let target = Self::bound_color(&state)?;
        let stamp = state.stamp;
        self.write_stamp(&mut state, target, stamp)?;
        let binding = state.binding;
        state.commands.push(DeviceCommand::Clear { target: binding });
        Ok(())
    }

    fn draw_quad(&mut self, quad: &QuadDraw) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let target = Self::bound_color(&state)?;
        if state.texture(quad.texture)?.desc.samples > 1 {
            return Err(DeviceError::Incompatible(format!(
                "{:?} is multisampled and cannot be sampled",
                quad.texture
            )));
        }

        let observed = self.read_stamp(&state, quad.texture)?;
        state.copies.push(CopyRecord { src: quad.texture, dst: target, stamp: observed });

        let stamp = state.stamp;
        self.write_stamp(&mut state, target, stamp)?;
        state.commands.push(DeviceCommand::DrawQuad {
            target: Some(target),
            texture: quad.texture,
            transform: quad.transform,
        });
        Ok(())
    }

    fn resolve(&mut self, src: TextureId, dst: TextureId) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let (s, d) = (&state.texture(src)?.desc, &state.texture(dst)?.desc);
        if s.size() != d.size() || s.format != d.format || d.samples != 1 {
            return Err(DeviceError::Incompatible(format!(
                "resolve {src:?} ({}x{} {:?} x{}) -> {dst:?} ({}x{} {:?} x{})",
                s.width, s.height, s.format, s.samples, d.width, d.height, d.format, d.samples
            )));
        }
        let stamp = self.read_stamp(&state, src)?;
        self.write_stamp(&mut state, dst, stamp)?;
        state.commands.push(DeviceCommand::Resolve { src, dst });
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureId, dst: TextureId) -> Result<(), DeviceError> {
        let delay = lock(&self.state).copy_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = lock(&self.state);
        state.check_alive()?;
        let (s, d) = (&state.texture(src)?.desc, &state.texture(dst)?.desc);
        if s.size() != d.size() || s.format != d.format || s.samples != d.samples {
            return Err(DeviceError::Incompatible(format!(
                "copy {src:?} ({}x{} {:?}) -> {dst:?} ({}x{} {:?})",
                s.width, s.height, s.format, d.width, d.height, d.format
            )));
        }
        let stamp = self.read_stamp(&state, src)?;
        state.copies.push(CopyRecord { src, dst, stamp });
        self.write_stamp(&mut state, dst, stamp)?;
        state.commands.push(DeviceCommand::Copy { src, dst });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let writes = std::mem::take(&mut state.pending);
        if let Some(timeline) = &self.timeline {
            if !writes.is_empty() {
                timeline.push(TimelineOp::Writes {
                    ready_at: Instant::now() + timeline.latency,
                    writes,
                });
            }
        }
        state.commands.push(DeviceCommand::Flush);
        Ok(())
    }

    fn signal_fence(&mut self, fence: &TimelineFence, value: u64) -> Result<(), DeviceError> {
        self.flush()?;
        lock(&self.state).commands.push(DeviceCommand::SignalFence { value });
        match &self.timeline {
            Some(timeline) => {
                timeline.push(TimelineOp::Signal {
                    ready_at: Instant::now() + timeline.latency,
                    fence: fence.clone(),
                    value,
                });
                Ok(())
            }
            None => fence
                .signal(value)
                .map_err(|e| DeviceError::Incompatible(e.to_string())),
        }
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<(), DeviceError> {
        let Some(timeline) = &self.timeline else {
            return Ok(());
        };
        let (done, idle) = flume::bounded(1);
        timeline.push(TimelineOp::Idle { done });
        idle.recv_timeout(timeout).map_err(|_| DeviceError::Timeout(timeout))
    }
}

/// Outside view into a [`HeadlessDevice`], usable after the device itself has
/// been moved into a backend.
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessProbe {
    /// Stamp written by subsequent clears and draws.
    pub fn set_stamp(&self, stamp: u64) {
        lock(&self.state).stamp = stamp;
    }

    /// Local content stamp of a texture.
    pub fn stamp_of(&self, id: TextureId) -> Option<u64> {
        lock(&self.state).textures.get(&id).map(|t| t.stamp)
    }

    pub fn commands(&self) -> Vec<DeviceCommand> {
        lock(&self.state).commands.clone()
    }

    pub fn take_commands(&self) -> Vec<DeviceCommand> {
        std::mem::take(&mut lock(&self.state).commands)
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        lock(&self.state).copies.clone()
    }

    pub fn take_copies(&self) -> Vec<CopyRecord> {
        std::mem::take(&mut lock(&self.state).copies)
    }

    /// Live textures, not counting the back buffer.
    pub fn live_textures(&self) -> usize {
        lock(&self.state).textures.len().saturating_sub(1)
    }

    pub fn texture_labels(&self) -> Vec<String> {
        let state = lock(&self.state);
        let mut labels: Vec<String> = state
            .textures
            .iter()
            .filter(|(id, _)| **id != TextureId::BACK_BUFFER)
            .map(|(_, t)| t.desc.label.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn render_target(&self) -> TargetBinding {
        lock(&self.state).binding
    }

    /// Makes every allocation whose label contains `pattern` fail.
    pub fn fail_allocations_matching(&self, pattern: Option<&str>) {
        lock(&self.state).fail_label = pattern.map(str::to_owned);
    }

    pub fn set_lost(&self, lost: bool) {
        lock(&self.state).lost = lost;
    }

    pub fn set_copy_delay(&self, delay: Duration) {
        lock(&self.state).copy_delay = delay;
    }
}
