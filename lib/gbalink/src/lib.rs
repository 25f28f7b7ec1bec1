//! Framed packet bridge for GBA Link Cable / RFU emulation over TCP.

pub mod pending_queue;
pub mod protocol;
pub mod session;
pub mod stream_buffer;

pub use pending_queue::PendingQueue;
pub use protocol::{Command, Header};
pub use session::{
    GbaLinkCore, HandshakeOutcome, Phase, Role, Session, DISCOVERY_PORT, PROTOCOL_VERSION, QUERY_MAGIC, RESPONSE_MAGIC, TCP_PORT,
};
pub use stream_buffer::StreamBuffer;
