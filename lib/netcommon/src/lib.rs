//! Shared infrastructure used by all three link transports (Netplay, GBA
//! Link and GB Link): IP discovery, TCP socket configuration, the UDP
//! discovery protocol, rate-limited broadcast timing and hotspot SSID
//! generation.

pub const HOTSPOT_SSID_PREFIX: &str = "NextUI-";
pub const HOTSPOT_SUBNET: &str = "10.0.0.0/24";
pub const HOTSPOT_HOST_IP: &str = "10.0.0.1";

pub mod discovery;
pub mod error;
pub mod logging;
pub mod net;
pub mod ssid;
pub mod time;

pub use error::{ErrorType, ErrorUtils, NetworkError, NetworkResult};
