//! Session lifecycle orchestration (§4.6): a thin layer above the three
//! link transports that picks a connection mode, acquires an IP address
//! (WiFi or self-hosted hotspot) and tears a hotspot down asynchronously,
//! so none of it needs duplicating in each transport.

pub mod lifecycle;
pub mod radio;

pub use lifecycle::{AcquiredLink, ConnectionMode, SessionLifecycle, TeardownHandle, Transport};
pub use radio::{Radio, SimulatedRadio};
