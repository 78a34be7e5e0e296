use std::time::Instant;

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use parallax_compositor::device::{CompanionSurface, GpuInit, GraphicsDevice, SurfaceErrorAction, WgpuDevice};
use parallax_compositor::runtime::mock::{MockCompositorRuntime, MockSessionRuntime};
use parallax_compositor::shim::{CameraKind, GameMode, SyntheticEngine};
use parallax_compositor::{
    BackendKind, Compositor, CompositorBackend, CompositorConfig, SessionBackend, VrBackend,
};

use crate::args::Args;

const CAMERAS: [CameraKind; 4] = [CameraKind::Cockpit, CameraKind::Bonnet, CameraKind::Chase, CameraKind::Trackside];
const STATS_EVERY: u64 = 600;

/// Companion window swapchain plus the engine's device.
struct Companion<'w> {
    surface: CompanionSurface<'w>,
    device: WgpuDevice,
}

impl<'w> Companion<'w> {
    async fn new(window: &'w Window, init: &GpuInit) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let (adapter, mut device) = WgpuDevice::request("engine", &instance, Some(&surface), init).await?;
        let surface = CompanionSurface::configure(surface, &adapter, &mut device, &init.companion, window.inner_size())?;

        Ok(Self { surface, device })
    }

    fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.surface.resize(&mut self.device, new_size);
    }

    /// One compositor frame into the window. `None` when the frame went out
    /// or the window is minimised.
    fn render(&mut self, compositor: &mut Compositor, engine: &mut SyntheticEngine) -> Option<SurfaceErrorAction> {
        let frame = match self.surface.acquire(&self.device) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(action) => return Some(action),
        };

        let size = self.surface.size();
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.device.set_back_buffer(view, self.surface.format(), (size.width, size.height));
        compositor.run_frame(&mut self.device, engine);
        if let Err(e) = self.device.flush() {
            log::warn!("companion flush failed: {e}");
        }
        self.device.release_back_buffer();
        frame.present();
        None
    }
}

#[self_referencing]
struct WindowEntry {
    window: Window,

    #[borrows(window)]
    #[covariant]
    companion: Companion<'this>,
}

pub struct Studio {
    args: Args,
    gpu_init: GpuInit,
    compositor: Compositor,
    engine: SyntheticEngine,
    camera: usize,
    started: Instant,
    window: Option<WindowEntry>,
}

impl Studio {
    pub fn new(args: Args) -> Self {
        let config = CompositorConfig {
            backend: args.backend_kind(),
            quad_view: args.quad_view,
            motion_compensation: true,
            ..Default::default()
        };

        let mut engine = SyntheticEngine::new();
        engine.set_mode(GameMode::Driving);
        engine.set_camera(CAMERAS[0]);
        engine.set_stage(Some(1));

        Self {
            args,
            gpu_init: GpuInit::default(),
            compositor: Compositor::new(config),
            engine,
            camera: 0,
            started: Instant::now(),
            window: None,
        }
    }

    fn open_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title("parallax studio")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = event_loop.create_window(attrs).context("failed to create window")?;

        let init = self.gpu_init.clone();
        let mut entry = WindowEntryTryBuilder {
            window,
            companion_builder: |w| pollster::block_on(Companion::new(w, &init)),
        }
        .try_build()?;

        let settings = self.compositor.backend_settings();
        let kind = self.args.backend_kind();
        let compositor = &mut self.compositor;
        entry.with_companion_mut(|c| {
            let backend: Box<dyn VrBackend> = match kind {
                BackendKind::Compositor => {
                    Box::new(CompositorBackend::new(Box::new(MockCompositorRuntime::new()), settings))
                }
                BackendKind::Session => Box::new(SessionBackend::new(
                    Box::new(MockSessionRuntime::new()),
                    Box::new(c.device.interop_peer("runtime")),
                    settings,
                )),
            };
            // Already reported through the notice channel; the studio keeps
            // running in passthrough.
            let _ = compositor.install_backend(&mut c.device, backend);
        });

        entry.with_window(|w| w.request_redraw());
        self.window = Some(entry);
        Ok(())
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut entry) = self.window.take() {
            let (compositor, engine) = (&mut self.compositor, &mut self.engine);
            entry.with_companion_mut(|c| {
                compositor.shutdown(&mut c.device);
                engine.release(&mut c.device);
            });
        }
        event_loop.exit();
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, code: KeyCode) {
        match code {
            KeyCode::Escape => self.close(event_loop),
            KeyCode::KeyR => self.compositor.request_recenter(),
            KeyCode::KeyQ => {
                let enabled = !self.compositor.config().quad_view;
                let compositor = &mut self.compositor;
                if let Some(entry) = self.window.as_mut() {
                    entry.with_companion_mut(|c| {
                        if compositor.set_quad_view(&mut c.device, enabled).is_ok() {
                            log::info!("quad view {}", if enabled { "requested" } else { "off" });
                        }
                    });
                }
            }
            KeyCode::KeyC => {
                self.camera = (self.camera + 1) % CAMERAS.len();
                self.engine.set_camera(CAMERAS[self.camera]);
                log::info!("camera: {:?}", CAMERAS[self.camera]);
            }
            KeyCode::KeyM => {
                let menu = self.engine.state().mode == GameMode::MainMenu;
                self.engine.set_mode(if menu { GameMode::Driving } else { GameMode::MainMenu });
            }
            KeyCode::KeyO => {
                let shown = self.engine.state().show_overlay;
                self.engine.set_overlay(!shown);
            }
            _ => {}
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        self.engine.drive(self.started.elapsed().as_secs_f32());

        let (compositor, engine) = (&mut self.compositor, &mut self.engine);
        let Some(entry) = self.window.as_mut() else {
            return;
        };
        let action = entry.with_companion_mut(|c| c.render(compositor, engine));
        if action == Some(SurfaceErrorAction::Fatal) {
            log::error!("companion surface failed fatally; exiting");
            self.close(event_loop);
            return;
        }

        let stats = self.compositor.stats();
        if stats.frame_index() % STATS_EVERY == 0 {
            log::info!(
                "frames: {} presented, {} skipped, {} passthrough",
                stats.presented(),
                stats.skipped(),
                stats.passthrough()
            );
        }
    }
}

impl ApplicationHandler for Studio {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.open_window(event_loop) {
            log::error!("failed to open the companion window: {e:#}");
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // The mock headset paces the loop; redraw continuously.
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(entry) = &self.window {
            entry.with_window(|w| w.request_redraw());
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.close(event_loop),
            WindowEvent::Resized(new_size) => {
                if let Some(entry) = self.window.as_mut() {
                    entry.with_companion_mut(|c| c.resize(new_size));
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.on_key(event_loop, code),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }
}
