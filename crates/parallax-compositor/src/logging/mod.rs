//! Logging utilities.
//!
//! Logger initialization plus the one-time user notification channel used for
//! failures the user has to know about (VR unavailable, backend torn down).

mod init;
mod notice;

pub use init::{init_logging, LoggingConfig};
pub use notice::{Notice, NoticeKind, NoticeSink};
