//! End-to-end frames through `Compositor::run_frame` against headless devices,
//! mock display systems and the synthetic engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::{Mat4, Quat};
use parallax_compositor::config::{CompanionMode, CompositorConfig, RenderProfile};
use parallax_compositor::device::{DeviceCommand, GraphicsDevice, HeadlessDevice, HeadlessProbe, TargetBinding, TextureId};
use parallax_compositor::error::InitError;
use parallax_compositor::logging::NoticeKind;
use parallax_compositor::runtime::mock::{MockCompositorRuntime, MockHandle, MockSessionRuntime};
use parallax_compositor::shim::{CameraKind, EngineCall, GameMode, SyntheticEngine};
use parallax_compositor::{Compositor, CompositorBackend, FrameOutcome, RenderTarget, SessionBackend};
use parallax_math::{horizon_lock, HorizonLockMode, HorizonLockSettings, ProjectionKind, Z_FLIP};

struct Harness {
    compositor: Compositor,
    device: HeadlessDevice,
    probe: HeadlessProbe,
    engine: SyntheticEngine,
    handle: MockHandle,
    /// Second device of the session backend.
    runtime_probe: Option<HeadlessProbe>,
}

impl Harness {
    fn frame(&mut self) -> FrameOutcome {
        self.compositor.run_frame(&mut self.device, &mut self.engine)
    }

    fn scene_targets(&self) -> Vec<Option<TextureId>> {
        self.engine
            .calls()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Scene { target, .. } => Some(*target),
                EngineCall::Plane { .. } => None,
            })
            .collect()
    }

    fn presentable(&self, target: RenderTarget) -> TextureId {
        let backend = self.compositor.backend().unwrap();
        backend.current_context().unwrap().presentable(target).unwrap()
    }

    /// Quads drawn into the application's back buffer, by source texture.
    fn companion_draws(&self) -> Vec<TextureId> {
        self.probe
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::DrawQuad { target: Some(t), texture, .. } if *t == TextureId::BACK_BUFFER => {
                    Some(*texture)
                }
                _ => None,
            })
            .collect()
    }

    fn clear_logs(&mut self) {
        self.engine.take_calls();
        self.probe.take_commands();
    }
}

fn driving_engine() -> SyntheticEngine {
    let mut engine = SyntheticEngine::new();
    engine.set_mode(GameMode::Driving);
    engine.set_camera(CameraKind::Cockpit);
    engine.set_overlay(true);
    engine
}

fn compositor_rig(config: CompositorConfig, configure: impl FnOnce(&MockHandle, &HeadlessProbe)) -> Harness {
    let mut device = HeadlessDevice::new("engine", (1280, 720));
    let probe = device.probe();
    let runtime = MockCompositorRuntime::new();
    let handle = runtime.handle();
    configure(&handle, &probe);

    let mut compositor = Compositor::new(config);
    let backend = CompositorBackend::new(Box::new(runtime), compositor.backend_settings());
    compositor.install_backend(&mut device, Box::new(backend)).unwrap();

    Harness { compositor, device, probe, engine: driving_engine(), handle, runtime_probe: None }
}

fn session_rig(config: CompositorConfig, device: HeadlessDevice, configure: impl FnOnce(&MockHandle)) -> Harness {
    let mut device = device;
    let probe = device.probe();
    let peer = device.peer("runtime");
    let runtime_probe = peer.probe();
    let runtime = MockSessionRuntime::new();
    let handle = runtime.handle();
    configure(&handle);

    let mut compositor = Compositor::new(config);
    let backend = SessionBackend::new(Box::new(runtime), Box::new(peer), compositor.backend_settings());
    compositor.install_backend(&mut device, Box::new(backend)).unwrap();

    Harness { compositor, device, probe, engine: driving_engine(), handle, runtime_probe: Some(runtime_probe) }
}

// ── happy path ───────────────────────────────────────────────────────────────

#[test]
fn stereo_frame_renders_each_eye_and_submits() {
    let mut h = compositor_rig(CompositorConfig::default(), |_, _| {});
    assert_eq!(h.frame(), FrameOutcome::Presented);

    let left = h.presentable(RenderTarget::LeftEye);
    let right = h.presentable(RenderTarget::RightEye);
    assert_eq!(h.scene_targets(), vec![Some(left), Some(right)]);
    assert!(h.engine.calls().iter().any(|c| matches!(c, EngineCall::Plane { plane: RenderTarget::Overlay, .. })));

    let submitted = h.handle.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].textures, vec![left, right]);

    assert_eq!(h.companion_draws(), vec![left]);
    assert_eq!(h.device.render_target(), TargetBinding::BACK_BUFFER);
}

#[test]
fn contexts_follow_the_recommended_resolution() {
    let mut h = compositor_rig(CompositorConfig::default(), |handle, _| handle.set_recommended_size((1832, 1920)));
    assert_eq!(h.frame(), FrameOutcome::Presented);

    let backend = h.compositor.backend().unwrap();
    let ctx = backend.current_context().unwrap();
    assert_eq!(ctx.name, RenderProfile::DEFAULT_NAME);
    assert_eq!(ctx.target(RenderTarget::LeftEye).unwrap().size(), (1832, 1920));
    assert_eq!(ctx.target(RenderTarget::Menu).unwrap().size(), (1280, 720));
}

#[test]
fn separate_pass_companion_renders_the_engine_again() {
    let config = CompositorConfig {
        companion: parallax_compositor::config::CompanionSettings {
            mode: CompanionMode::SeparatePass,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut h = compositor_rig(config, |_, _| {});
    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.scene_targets().last(), Some(&Some(TextureId::BACK_BUFFER)));
    assert_eq!(h.scene_targets().len(), 3);

    let eyes = [h.presentable(RenderTarget::LeftEye), h.presentable(RenderTarget::RightEye)];
    let draws = h.companion_draws();
    assert!(!draws.is_empty(), "the engine's own pass draws into the back buffer");
    assert!(draws.iter().all(|t| !eyes.contains(t)), "no eye is blitted to the companion");
}

// ── skipped frames ───────────────────────────────────────────────────────────

#[test]
fn pose_failure_skips_every_vr_step_and_reuses_the_last_eye() {
    let mut h = compositor_rig(CompositorConfig::default(), |_, _| {});
    assert_eq!(h.frame(), FrameOutcome::Presented);
    let left = h.presentable(RenderTarget::LeftEye);
    h.clear_logs();

    h.handle.fail_next_poses(1);
    assert_eq!(h.frame(), FrameOutcome::Skipped);

    assert!(h.engine.calls().is_empty(), "no eye or overlay render on a skipped frame");
    assert_eq!(h.handle.submitted().len(), 1, "no submit on a skipped frame");
    assert_eq!(h.companion_draws(), vec![left]);
    assert!(!h.probe.commands().iter().any(|c| matches!(
        c,
        DeviceCommand::DrawQuad { target: Some(t), .. } if *t != TextureId::BACK_BUFFER
    )));

    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!((h.compositor.stats().presented(), h.compositor.stats().skipped()), (2, 1));
}

#[test]
fn pose_failure_on_the_first_frame_falls_back_to_a_direct_render() {
    let mut h = compositor_rig(CompositorConfig::default(), |handle, _| handle.fail_next_poses(1));
    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert_eq!(h.scene_targets(), vec![Some(TextureId::BACK_BUFFER)]);
    assert!(h.handle.submitted().is_empty());
    assert!(!h.compositor.shim().is_active());
}

#[test]
fn failed_scene_restores_the_target_and_closes_the_runtime_frame() {
    let mut h = session_rig(CompositorConfig::default(), HeadlessDevice::new("engine", (1280, 720)), |_| {});
    h.engine.fail_next_scenes(1);

    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert_eq!(h.device.render_target(), TargetBinding::BACK_BUFFER);
    assert!(!h.handle.in_frame());
    assert_eq!(h.handle.empty_frames(), 1);
    assert!(h.handle.submitted().is_empty());

    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert!(h.compositor.is_vr_active());
}

#[test]
fn partially_rendered_eye_never_reaches_the_companion() {
    let mut h = compositor_rig(CompositorConfig::default(), |_, _| {});
    h.probe.set_stamp(1);
    assert_eq!(h.frame(), FrameOutcome::Presented);
    let left = h.presentable(RenderTarget::LeftEye);
    h.clear_logs();

    // The left eye gets its road quad, then the scene fails.
    h.probe.set_stamp(2);
    h.engine.fail_next_scenes(1);
    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert_eq!(h.probe.stamp_of(left), Some(2));
    assert!(!h.companion_draws().contains(&left));
    assert_eq!(h.scene_targets().last(), Some(&Some(TextureId::BACK_BUFFER)));
    h.clear_logs();

    // Still torn on the next skipped frame.
    h.handle.fail_next_poses(1);
    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert!(!h.companion_draws().contains(&left));
    h.clear_logs();

    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.companion_draws(), vec![left]);
    h.clear_logs();
    h.handle.fail_next_poses(1);
    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert_eq!(h.companion_draws(), vec![left]);
}

#[test]
fn dropped_submit_still_shows_the_companion() {
    let mut h = compositor_rig(CompositorConfig::default(), |handle, _| handle.fail_next_submits(1));
    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert_eq!(h.companion_draws(), vec![h.presentable(RenderTarget::LeftEye)]);
    assert!(h.compositor.is_vr_active());
}

// ── cross-device ordering ────────────────────────────────────────────────────

#[test]
fn delayed_gpu_never_exposes_an_older_frame_to_the_runtime() {
    let device = HeadlessDevice::new("engine", (1280, 720)).with_latency(Duration::from_millis(15));
    let mut h = session_rig(CompositorConfig::default(), device, |_| {});
    let runtime_probe = h.runtime_probe.clone().unwrap();

    for stamp in 1..=4 {
        h.probe.set_stamp(stamp);
        assert_eq!(h.frame(), FrameOutcome::Presented);
        let copies = runtime_probe.take_copies();
        assert_eq!(copies.len(), 2);
        assert!(copies.iter().all(|c| c.stamp == stamp), "frame {stamp} copied {copies:?}");
    }
    assert_eq!(h.handle.submitted().len(), 4);
}

// ── profiles and modes ───────────────────────────────────────────────────────

#[test]
fn stage_profiles_switch_and_fall_back_to_default() {
    let config = CompositorConfig {
        profiles: vec![
            RenderProfile::default(),
            RenderProfile::new("rally").with_stages([7]),
            RenderProfile::new("gravel").with_supersampling(1.5).with_stages([9]),
        ],
        ..Default::default()
    };
    let mut h = compositor_rig(config, |_, probe| probe.fail_allocations_matching(Some("rally/")));
    assert!(h.compositor.notice().has_shown(NoticeKind::ProfileFallback));

    h.engine.set_stage(Some(9));
    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.compositor.active_profile(), "gravel");
    let gravel_left = h.presentable(RenderTarget::LeftEye);
    assert_eq!(h.scene_targets()[0], Some(gravel_left));

    h.engine.set_stage(Some(7));
    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.compositor.active_profile(), RenderProfile::DEFAULT_NAME);

    h.engine.set_stage(Some(42));
    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.compositor.active_profile(), RenderProfile::DEFAULT_NAME);
}

#[test]
fn quad_view_renders_four_views_and_can_be_toggled() {
    let config = CompositorConfig { quad_view: true, ..Default::default() };
    let mut h = session_rig(config, HeadlessDevice::new("engine", (1280, 720)), |_| {});
    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.scene_targets().len(), 4);

    h.compositor.set_quad_view(&mut h.device, false).unwrap();
    h.clear_logs();
    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.scene_targets().len(), 2);
}

#[test]
fn compositor_runtimes_report_missing_quad_view_once() {
    let config = CompositorConfig { quad_view: true, ..Default::default() };
    let mut h = compositor_rig(config, |_, _| {});
    assert!(h.compositor.notice().has_shown(NoticeKind::QuadViewUnsupported));
    assert_eq!(h.frame(), FrameOutcome::Presented);
    assert_eq!(h.scene_targets().len(), 2);
}

#[test]
fn main_menu_uses_the_menu_projection_and_plane() {
    let mut h = compositor_rig(CompositorConfig::default(), |_, _| {});
    h.engine.set_mode(GameMode::MainMenu);
    assert_eq!(h.frame(), FrameOutcome::Presented);

    let menu = h.compositor.backend().unwrap().projection(RenderTarget::LeftEye, ProjectionKind::MainMenu);
    match &h.engine.calls()[0] {
        EngineCall::Scene { projections, .. } => assert!(projections.iter().all(|(_, p)| *p == menu)),
        other => panic!("expected a scene render, got {other:?}"),
    }
    assert!(h.engine.calls().iter().any(|c| matches!(c, EngineCall::Plane { plane: RenderTarget::Menu, .. })));
}

#[test]
fn horizon_lock_applies_only_from_the_cockpit() {
    let settings = HorizonLockSettings { mode: HorizonLockMode::RollAndPitch, ..Default::default() };
    let config = CompositorConfig { horizon_lock: settings, ..Default::default() };
    let mut h = compositor_rig(config, |_, _| {});
    let vehicle = Quat::from_rotation_z(0.3) * Quat::from_rotation_x(0.1);
    h.engine.set_vehicle_orientation(vehicle);

    let left_view = |h: &Harness| match &h.engine.calls()[0] {
        EngineCall::Scene { view, .. } => *view,
        other => panic!("expected a scene render, got {other:?}"),
    };

    h.engine.set_camera(CameraKind::Chase);
    h.frame();
    let chase = left_view(&h);
    h.clear_logs();

    h.engine.set_camera(CameraKind::Cockpit);
    h.frame();
    let cockpit = left_view(&h);

    let backend = h.compositor.backend().unwrap();
    let base = backend.eye_offset(RenderTarget::LeftEye) * backend.pose(RenderTarget::LeftEye) * Z_FLIP;
    let observed: Mat4 = base.inverse() * cockpit * (base.inverse() * chase).inverse();
    assert!(observed.abs_diff_eq(horizon_lock(vehicle, &settings), 1e-4));
}

#[test]
fn recenter_requests_apply_on_the_next_frame() {
    let mut h = compositor_rig(CompositorConfig::default(), |_, _| {});
    h.compositor.request_recenter();
    assert_eq!(h.handle.recenters(), 0);
    h.frame();
    assert_eq!(h.handle.recenters(), 1);
    h.frame();
    assert_eq!(h.handle.recenters(), 1);
}

// ── failures ─────────────────────────────────────────────────────────────────

#[test]
fn absent_display_runs_passthrough_and_tells_the_user_once() {
    let mut device = HeadlessDevice::new("engine", (1280, 720));
    let runtime = MockCompositorRuntime::new();
    runtime.handle().set_present(false);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let mut compositor = Compositor::new(CompositorConfig::default());
    compositor.set_notice_sink(Box::new(move |kind, _| sink_seen.lock().unwrap().push(kind)));

    let backend = CompositorBackend::new(Box::new(runtime), compositor.backend_settings());
    let err = compositor.install_backend(&mut device, Box::new(backend)).unwrap_err();
    assert!(matches!(err, InitError::DisplaySystemAbsent));

    let retry = MockCompositorRuntime::new();
    retry.handle().set_present(false);
    let backend = CompositorBackend::new(Box::new(retry), compositor.backend_settings());
    assert!(compositor.install_backend(&mut device, Box::new(backend)).is_err());
    assert_eq!(*seen.lock().unwrap(), vec![NoticeKind::VrUnavailable]);

    let mut engine = driving_engine();
    assert_eq!(compositor.run_frame(&mut device, &mut engine), FrameOutcome::Passthrough);
    assert_eq!(compositor.stats().passthrough(), 1);
}

#[test]
fn lost_display_tears_the_backend_down() {
    let mut h = compositor_rig(CompositorConfig::default(), |_, _| {});
    assert_eq!(h.frame(), FrameOutcome::Presented);

    h.handle.lose("cable unplugged");
    assert_eq!(h.frame(), FrameOutcome::Passthrough);
    assert!(!h.compositor.is_vr_active());
    assert!(h.compositor.notice().has_shown(NoticeKind::BackendLost));
    // Only the engine's own texture survives.
    assert_eq!(h.probe.live_textures(), 1);
    assert_eq!(h.scene_targets().last(), Some(&Some(TextureId::BACK_BUFFER)));

    assert_eq!(h.frame(), FrameOutcome::Passthrough);
}

#[test]
fn lost_second_device_tears_the_session_down() {
    let mut h = session_rig(CompositorConfig::default(), HeadlessDevice::new("engine", (1280, 720)), |_| {});
    assert_eq!(h.frame(), FrameOutcome::Presented);

    h.runtime_probe.as_ref().unwrap().set_lost(true);
    assert_eq!(h.frame(), FrameOutcome::Passthrough);
    assert!(!h.compositor.is_vr_active());
    assert!(h.compositor.notice().has_shown(NoticeKind::BackendLost));
    assert!(!h.handle.in_frame());
    assert!(!h.handle.has_session());

    for _ in 0..3 {
        assert_eq!(h.frame(), FrameOutcome::Passthrough);
    }
}

#[test]
fn shutdown_releases_both_devices() {
    let mut h = session_rig(CompositorConfig::default(), HeadlessDevice::new("engine", (1280, 720)), |_| {});
    assert_eq!(h.frame(), FrameOutcome::Presented);

    h.compositor.shutdown(&mut h.device);
    h.engine.release(&mut h.device);
    assert_eq!(h.probe.live_textures(), 0);
    assert_eq!(h.runtime_probe.as_ref().unwrap().live_textures(), 0);
    assert!(!h.handle.has_session());
}
