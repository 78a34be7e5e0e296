use std::sync::Once;

/// Logger setup for hosts and the studio.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Baseline level when neither `filter` nor `RUST_LOG` is set.
    pub level: log::LevelFilter,
    /// Full `env_logger` filter, e.g. `"info,parallax_compositor::backend=debug"`.
    /// Overrides `RUST_LOG`.
    pub filter: Option<String>,
    /// Per-frame state transitions at trace level.
    pub frame_trace: bool,
    pub write_style: env_logger::WriteStyle,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: log::LevelFilter::Info,
            filter: None,
            frame_trace: false,
            write_style: env_logger::WriteStyle::Auto,
            timestamps: true,
        }
    }
}

const FRAME_MODULE: &str = "parallax_compositor::pipeline";

/// wgpu logs adapter bring-up and every pipeline at info.
const QUIET_MODULES: [&str; 2] = ["wgpu_core", "wgpu_hal"];

/// Resolved filter string: explicit filter, then `env`, then the baseline.
fn filter_spec(config: &LoggingConfig, env: Option<String>) -> String {
    let mut spec = match config.filter.clone().or(env) {
        Some(filter) => filter,
        None => {
            let mut parts = vec![config.level.to_string().to_lowercase()];
            parts.extend(QUIET_MODULES.iter().map(|m| format!("{m}=warn")));
            parts.join(",")
        }
    };
    if config.frame_trace {
        spec.push_str(&format!(",{FRAME_MODULE}=trace"));
    }
    spec
}

static INIT: Once = Once::new();

/// Installs the global logger. Later calls do nothing, as does a call after
/// the host installed its own logger.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let spec = filter_spec(&config, std::env::var("RUST_LOG").ok());

        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&spec).write_style(config.write_style);
        if config.timestamps {
            builder.format_timestamp_millis();
        } else {
            builder.format_timestamp(None);
        }

        match builder.try_init() {
            Ok(()) => log::debug!("logging initialized ({spec})"),
            Err(_) => log::debug!("host logger already installed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_quiets_wgpu() {
        let spec = filter_spec(&LoggingConfig::default(), None);
        assert_eq!(spec, "info,wgpu_core=warn,wgpu_hal=warn");
    }

    #[test]
    fn explicit_filter_beats_the_environment() {
        let config = LoggingConfig { filter: Some("debug".into()), ..Default::default() };
        assert_eq!(filter_spec(&config, Some("error".into())), "debug");
        assert_eq!(filter_spec(&LoggingConfig::default(), Some("error".into())), "error");
    }

    #[test]
    fn frame_trace_is_appended() {
        let config = LoggingConfig { frame_trace: true, level: log::LevelFilter::Warn, ..Default::default() };
        let spec = filter_spec(&config, None);
        assert!(spec.starts_with("warn,"));
        assert!(spec.ends_with(",parallax_compositor::pipeline=trace"));
    }
}
