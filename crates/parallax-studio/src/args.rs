use clap::{Parser, ValueEnum};

use parallax_compositor::BackendKind;

/// Drives the parallax compositor against a mock headset.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "parallax-studio", version, about)]
pub struct Args {
    /// Display-system variant to run against.
    #[arg(long, value_enum, default_value_t = Backend::Compositor)]
    pub backend: Backend,

    /// Request quad-view (focus) rendering.
    #[arg(long = "quad")]
    pub quad_view: bool,

    /// Log every frame state transition.
    #[arg(long = "trace")]
    pub frame_trace: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Shared-device compositor runtime.
    Compositor,
    /// Session runtime with its own device and swapchains.
    Session,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Compositor => BackendKind::Compositor,
            Backend::Session => BackendKind::Session,
        }
    }
}

impl Args {
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("parallax-studio").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_to_the_compositor_backend() {
        let args = parse(&[]).unwrap();
        assert_eq!(args, Args { backend: Backend::Compositor, quad_view: false, frame_trace: false });
        assert_eq!(args.backend_kind(), BackendKind::Compositor);
    }

    #[test]
    fn session_with_quad_views() {
        let args = parse(&["--backend", "session", "--quad", "--trace"]).unwrap();
        assert_eq!(args.backend_kind(), BackendKind::Session);
        assert!(args.quad_view);
        assert!(args.frame_trace);
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(parse(&["--fullscreen"]).is_err());
        assert!(parse(&["--backend", "cable"]).is_err());
        let help = parse(&["--help"]).unwrap_err();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
