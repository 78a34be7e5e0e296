use std::collections::HashSet;
use std::fmt;

/// Classes of user-facing notifications. Each is shown at most once until reset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    /// The display system could not be initialised; running without VR.
    VrUnavailable,
    /// A running backend failed unrecoverably and was torn down.
    BackendLost,
    /// Quad-view rendering was requested but is not available.
    QuadViewUnsupported,
    /// A per-stage render profile failed to build; "default" is used instead.
    ProfileFallback,
}

impl NoticeKind {
    fn level(self) -> log::Level {
        match self {
            NoticeKind::VrUnavailable | NoticeKind::BackendLost => log::Level::Error,
            NoticeKind::QuadViewUnsupported | NoticeKind::ProfileFallback => log::Level::Warn,
        }
    }
}

/// Receives notifications the host should surface to the user (overlay text,
/// message box, ...).
pub type NoticeSink = Box<dyn Fn(NoticeKind, &str) + Send>;

/// One-time notification gate.
///
/// The first occurrence of a kind is logged at its level and forwarded to the
/// sink; repeats only reach the `debug` log.
#[derive(Default)]
pub struct Notice {
    shown: HashSet<NoticeKind>,
    sink: Option<NoticeSink>,
}

impl fmt::Debug for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notice")
            .field("shown", &self.shown)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Notice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sink(&mut self, sink: NoticeSink) {
        self.sink = Some(sink);
    }

    /// Returns `true` if this call was the one that reached the user.
    pub fn notify(&mut self, kind: NoticeKind, message: impl fmt::Display) -> bool {
        if !self.shown.insert(kind) {
            log::debug!("{kind:?} (repeat): {message}");
            return false;
        }

        let text = message.to_string();
        log::log!(kind.level(), "{text}");
        if let Some(sink) = &self.sink {
            sink(kind, &text);
        }
        true
    }

    /// Re-arms a kind, e.g. after a backend was successfully reinstalled.
    pub fn reset(&mut self, kind: NoticeKind) {
        self.shown.remove(&kind);
    }

    pub fn has_shown(&self, kind: NoticeKind) -> bool {
        self.shown.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn forwards_each_kind_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);

        let mut notice = Notice::new();
        notice.set_sink(Box::new(move |kind, msg| {
            sink_seen.lock().unwrap().push((kind, msg.to_string()));
        }));

        assert!(notice.notify(NoticeKind::VrUnavailable, "no headset"));
        assert!(!notice.notify(NoticeKind::VrUnavailable, "no headset"));
        assert!(notice.notify(NoticeKind::BackendLost, "gone"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (NoticeKind::VrUnavailable, "no headset".to_string()));
    }

    #[test]
    fn reset_rearms() {
        let mut notice = Notice::new();
        assert!(notice.notify(NoticeKind::BackendLost, "x"));
        notice.reset(NoticeKind::BackendLost);
        assert!(!notice.has_shown(NoticeKind::BackendLost));
        assert!(notice.notify(NoticeKind::BackendLost, "x"));
    }
}
