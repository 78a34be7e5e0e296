use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{lock, TimelineFence};
use crate::device::{GraphicsDevice, QuadDraw, TargetBinding, TextureId};
use crate::error::SyncError;

/// Engine-side half of the fence protocol.
///
/// The counter is raised exactly once per frame, after the engine's work for
/// that frame has been flushed. Consumers wait for the exact value returned by
/// [`signal_after_engine_work`](Self::signal_after_engine_work).
#[derive(Debug)]
pub struct FenceBridge {
    fence: TimelineFence,
    value: u64,
}

impl FenceBridge {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            fence: TimelineFence::new(label),
            value: 0,
        }
    }

    pub fn fence(&self) -> &TimelineFence {
        &self.fence
    }

    /// Value most recently handed to the GPU for signalling.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Flushes engine work, bumps the counter and signals it on the engine's
    /// GPU timeline.
    pub fn signal_after_engine_work(
        &mut self,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u64, SyncError> {
        device.flush()?;
        let next = self.value + 1;
        device.signal_fence(&self.fence, next)?;
        self.value = next;
        log::trace!("fence `{}` signal queued for {next}", self.fence.label());
        Ok(next)
    }

    /// Queues a wait for the current value on the second device and returns
    /// the only handle through which that device may read shared textures.
    pub fn wait_before_copy<'a>(
        &self,
        interop: &'a mut InteropDevice,
    ) -> Result<Transfer<'a>, SyncError> {
        interop.send(InteropCommand::Wait {
            fence: self.fence.clone(),
            value: self.value,
        })?;
        Ok(Transfer {
            interop,
            value: self.value,
            finished: false,
        })
    }

    /// Blocks the calling thread until the last signalled value completes.
    /// Shutdown only.
    pub fn wait_for_cpu(&self, timeout: Duration) -> Result<(), SyncError> {
        self.fence.wait(self.value, timeout)
    }
}

enum InteropCommand {
    Wait { fence: TimelineFence, value: u64 },
    Copy { src: TextureId, dst: TextureId },
    Blit { src: TextureId, dst: TextureId, uv: [f32; 4] },
    Flush { done: Option<flume::Sender<Result<(), SyncError>>> },
    Shutdown,
}

/// Second graphics device driven from its own command thread.
///
/// The thread plays the role of the device's queue: a fence wait stalls it,
/// not the render thread.
pub struct InteropDevice {
    device: Arc<Mutex<Box<dyn GraphicsDevice>>>,
    tx: flume::Sender<InteropCommand>,
    worker: Option<JoinHandle<()>>,
    sync_timeout: Duration,
}

impl InteropDevice {
    /// Starts the command thread. Fails only if the OS refuses the thread.
    pub fn spawn(device: Box<dyn GraphicsDevice>, sync_timeout: Duration) -> std::io::Result<Self> {
        let label = device.label().to_string();
        let device = Arc::new(Mutex::new(device));
        let (tx, rx) = flume::unbounded();

        let worker_device = Arc::clone(&device);
        let worker = std::thread::Builder::new()
            .name(format!("interop-{label}"))
            .spawn(move || run_worker(rx, worker_device, sync_timeout))?;

        Ok(Self { device, tx, worker: Some(worker), sync_timeout })
    }

    /// Direct access for setup work (opening shared handles, swapchain images).
    /// Not for per-frame reads of shared textures; use [`FenceBridge::wait_before_copy`].
    pub fn with_device<R>(&self, f: impl FnOnce(&mut dyn GraphicsDevice) -> R) -> R {
        let mut guard = lock(&self.device);
        f(guard.as_mut())
    }

    fn send(&self, cmd: InteropCommand) -> Result<(), SyncError> {
        self.tx.send(cmd).map_err(|_| SyncError::WorkerGone)
    }
}

impl Drop for InteropDevice {
    fn drop(&mut self) {
        let _ = self.tx.send(InteropCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("interop worker panicked");
            }
        }
    }
}

/// Copies on the second device for one frame, ordered after the fence wait.
pub struct Transfer<'a> {
    interop: &'a mut InteropDevice,
    value: u64,
    finished: bool,
}

impl Transfer<'_> {
    /// Fence value this transfer waits for.
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn copy(&mut self, src: TextureId, dst: TextureId) -> Result<(), SyncError> {
        self.interop.send(InteropCommand::Copy { src, dst })
    }

    /// Format-converting copy through a fullscreen textured quad.
    pub fn blit(&mut self, src: TextureId, dst: TextureId, uv: [f32; 4]) -> Result<(), SyncError> {
        self.interop.send(InteropCommand::Blit { src, dst, uv })
    }

    /// Submits the queued copies and waits for the second device to take them.
    ///
    /// Fails if the fence wait failed; in that case none of the copies ran.
    /// Never returns while this batch's copies are still queued: on a timeout
    /// it keeps waiting for the batch to drain, and reports the worker gone if
    /// it does not.
    pub fn finish(mut self) -> Result<(), SyncError> {
        self.finished = true;
        let (done_tx, done_rx) = flume::bounded(1);
        self.interop.send(InteropCommand::Flush { done: Some(done_tx) })?;

        // The worker's own fence wait is bounded by the same timeout; allow
        // for that wait plus the copies themselves.
        let budget = self.interop.sync_timeout * 2;
        match done_rx.recv_timeout(budget) {
            Ok(result) => result,
            Err(flume::RecvTimeoutError::Timeout) => {
                log::warn!("interop batch for fence {} overran {budget:?}; draining", self.value);
                match done_rx.recv_timeout(budget) {
                    Ok(_) => Err(SyncError::Timeout {
                        value: self.value,
                        completed: 0,
                        timeout: budget,
                    }),
                    Err(_) => Err(SyncError::WorkerGone),
                }
            }
            Err(flume::RecvTimeoutError::Disconnected) => Err(SyncError::WorkerGone),
        }
    }
}

impl Drop for Transfer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Close the batch so a failed wait does not leak into the next frame.
            let _ = self.interop.send(InteropCommand::Flush { done: None });
        }
    }
}

fn run_worker(
    rx: flume::Receiver<InteropCommand>,
    device: Arc<Mutex<Box<dyn GraphicsDevice>>>,
    sync_timeout: Duration,
) {
    // Set when the current batch's fence wait failed: its reads are dropped.
    let mut failed: Option<SyncError> = None;

    for cmd in rx.iter() {
        match cmd {
            InteropCommand::Wait { fence, value } => {
                if let Err(e) = fence.wait(value, sync_timeout) {
                    log::warn!("interop fence wait failed: {e}");
                    failed = Some(e);
                }
            }
            InteropCommand::Copy { src, dst } => {
                if failed.is_some() {
                    continue;
                }
                let mut dev = lock(&device);
                if let Err(e) = dev.copy_texture(src, dst) {
                    failed = Some(e.into());
                }
            }
            InteropCommand::Blit { src, dst, uv } => {
                if failed.is_some() {
                    continue;
                }
                let mut dev = lock(&device);
                if let Err(e) = blit(dev.as_mut(), src, dst, uv) {
                    failed = Some(e.into());
                }
            }
            InteropCommand::Flush { done } => {
                let mut result = match failed.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
                if result.is_ok() {
                    result = lock(&device).flush().map_err(SyncError::from);
                }
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            InteropCommand::Shutdown => break,
        }
    }
    log::debug!("interop worker stopped");
}

fn blit(
    dev: &mut dyn GraphicsDevice,
    src: TextureId,
    dst: TextureId,
    uv: [f32; 4],
) -> Result<(), crate::error::DeviceError> {
    let previous = dev.render_target();
    dev.set_render_target(TargetBinding::new(dst, None))?;
    let drawn = dev.draw_quad(&QuadDraw::fullscreen(src).with_uv(uv));
    dev.set_render_target(previous)?;
    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, HeadlessProbe, TextureDesc, TextureFormat};

    fn shared_pair() -> (HeadlessDevice, InteropDevice, HeadlessProbe, TextureId, TextureId) {
        let mut engine = HeadlessDevice::new("engine", (64, 64));
        let src = engine
            .create_texture(&TextureDesc::color("eye", 32, 32, TextureFormat::Rgba8UnormSrgb).shared())
            .unwrap();
        let handle = engine.shared_handle(src).unwrap();

        let mut peer = engine.peer("runtime");
        let opened = peer.open_shared(handle).unwrap();
        let dst = peer
            .create_texture(&TextureDesc::color("swap", 32, 32, TextureFormat::Rgba8UnormSrgb))
            .unwrap();

        let probe = peer.probe();
        let interop = InteropDevice::spawn(Box::new(peer), Duration::from_millis(50)).unwrap();
        (engine, interop, probe, opened, dst)
    }

    #[test]
    fn signal_increments_once_per_call() {
        let mut engine = HeadlessDevice::new("engine", (8, 8));
        let mut bridge = FenceBridge::new("frame");
        assert_eq!(bridge.signal_after_engine_work(&mut engine).unwrap(), 1);
        assert_eq!(bridge.signal_after_engine_work(&mut engine).unwrap(), 2);
        assert_eq!(bridge.fence().completed(), 2);
    }

    #[test]
    fn copies_run_after_signal() {
        let (mut engine, mut interop, probe, src, dst) = shared_pair();
        let mut bridge = FenceBridge::new("frame");
        bridge.signal_after_engine_work(&mut engine).unwrap();

        let mut transfer = bridge.wait_before_copy(&mut interop).unwrap();
        transfer.copy(src, dst).unwrap();
        transfer.finish().unwrap();

        let copies = probe.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!((copies[0].src, copies[0].dst), (src, dst));
    }

    #[test]
    fn unsignalled_wait_skips_copies_and_reports() {
        let (_engine, mut interop, probe, src, dst) = shared_pair();
        let mut bridge = FenceBridge::new("frame");
        // Pretend a frame was signalled without ever reaching the GPU.
        bridge.value = 1;

        let mut transfer = bridge.wait_before_copy(&mut interop).unwrap();
        transfer.copy(src, dst).unwrap();
        let err = transfer.finish().unwrap_err();
        assert!(matches!(err, SyncError::Timeout { value: 1, .. }));
        assert!(probe.copies().is_empty());
    }

    #[test]
    fn overrunning_batch_is_drained_before_finish_returns() {
        let (mut engine, mut interop, probe, src, dst) = shared_pair();
        let mut bridge = FenceBridge::new("frame");
        bridge.signal_after_engine_work(&mut engine).unwrap();
        // Past the 100 ms budget, inside the drain window.
        probe.set_copy_delay(Duration::from_millis(150));

        let mut transfer = bridge.wait_before_copy(&mut interop).unwrap();
        transfer.copy(src, dst).unwrap();
        let err = transfer.finish().unwrap_err();
        assert!(matches!(err, SyncError::Timeout { value: 1, .. }));
        // The copy landed before the caller could release its destination.
        assert_eq!(probe.copies().len(), 1);

        probe.set_copy_delay(Duration::ZERO);
        bridge.signal_after_engine_work(&mut engine).unwrap();
        let mut transfer = bridge.wait_before_copy(&mut interop).unwrap();
        transfer.copy(src, dst).unwrap();
        transfer.finish().unwrap();
        assert_eq!(probe.copies().len(), 2);
    }
}
