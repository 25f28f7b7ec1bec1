//! GB/GBC Link Cable orchestration: programs the core's own TCP link
//! through its option interface rather than owning a socket directly.

pub mod protocol;
pub mod session;

pub use session::{GbCoreOptions, LogPhrases, Phase, Role, Session, DISCOVERY_PORT, TCP_PORT};
