//! Lockstep input synchronization between two emulator cores over TCP
//! (netplay).

pub mod frame;
pub mod protocol;
pub mod session;

pub use frame::{FrameBuffer, Player};
pub use protocol::{Command, Header};
pub use session::{NetplayCore, Phase, Role, Session, DISCOVERY_PORT, TCP_PORT};
