//! Desktop harness for the parallax compositor.
//!
//! Opens a companion window, renders a synthetic driving scene through the
//! compositor and hands the frames to a mock display system.
//!
//! Keys: `R` recentre, `Q` toggle quad views, `C` cycle cameras, `M` toggle
//! the main menu, `O` toggle the overlay, `Esc` quit.

mod args;
mod studio;

use anyhow::{Context, Result};
use clap::Parser;
use winit::event_loop::EventLoop;

use parallax_compositor::logging::{init_logging, LoggingConfig};

use crate::args::Args;
use crate::studio::Studio;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LoggingConfig { frame_trace: args.frame_trace, ..Default::default() });
    log::info!("starting studio with the {:?} backend (quad view {})", args.backend_kind(), args.quad_view);

    let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
    let mut studio = Studio::new(args);
    event_loop
        .run_app(&mut studio)
        .context("winit event loop terminated with error")?;
    Ok(())
}
