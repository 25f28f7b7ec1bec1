//! Stand-ins for "the core" (§6.3) used only by this demo binary so the
//! transport state machines can be exercised without a real emulator core
//! attached. None of this is part of the protocol -- it is the smallest
//! thing that satisfies each transport's core-facing trait.

use gbalink::session::GbaLinkCore;
use gblink::session::GbCoreOptions;
use netcommon::logging::{info, Logger};
use netplay::session::NetplayCore;

/// A fixed 64-byte "savestate" so the Netplay sync handshake (§4.3.6) has
/// something concrete to stream and compare sizes on.
pub struct DemoNetplayCore {
    log: Logger,
    state: Vec<u8>,
}

impl DemoNetplayCore {
    pub fn new(log: Logger) -> DemoNetplayCore {
        DemoNetplayCore {
            log,
            state: vec![0xAB; 64],
        }
    }
}

impl NetplayCore for DemoNetplayCore {
    fn serialize_state(&mut self) -> Vec<u8> {
        self.state.clone()
    }

    fn apply_state(&mut self, data: &[u8]) -> bool {
        if data.len() != self.state.len() {
            return false;
        }
        self.state.copy_from_slice(data);
        info!(self.log, "demo core applied savestate"; "bytes" => data.len());
        true
    }

    fn state_size(&self) -> u32 {
        self.state.len() as u32
    }
}

/// Logs every callback instead of feeding bytes to a real RFU core.
pub struct DemoGbaLinkCore {
    log: Logger,
    link_mode: String,
}

impl DemoGbaLinkCore {
    pub fn new(log: Logger, link_mode: String) -> DemoGbaLinkCore {
        DemoGbaLinkCore { log, link_mode }
    }
}

impl GbaLinkCore for DemoGbaLinkCore {
    fn link_mode(&self) -> String {
        self.link_mode.clone()
    }

    fn connected(&mut self, peer_id: u16) {
        info!(self.log, "demo core: peer connected"; "peer_id" => peer_id);
    }

    fn receive(&mut self, payload: &[u8], peer_id: u16) {
        info!(self.log, "demo core: payload received"; "peer_id" => peer_id, "bytes" => payload.len());
    }

    fn disconnected(&mut self, peer_id: u16) {
        info!(self.log, "demo core: peer disconnected"; "peer_id" => peer_id);
    }

    fn stop(&mut self) {
        info!(self.log, "demo core: stopped");
    }
}

/// Records option writes instead of driving a real GB/GBC core's
/// `check_variables` pass.
pub struct DemoGbCoreOptions {
    log: Logger,
    batch_depth: i32,
    options: Vec<(String, String)>,
}

impl DemoGbCoreOptions {
    pub fn new(log: Logger) -> DemoGbCoreOptions {
        DemoGbCoreOptions {
            log,
            batch_depth: 0,
            options: Vec::new(),
        }
    }
}

impl GbCoreOptions for DemoGbCoreOptions {
    fn begin_option_batch(&mut self) {
        self.batch_depth += 1;
    }

    fn set_option(&mut self, name: &str, value: &str) {
        self.options.push((name.to_string(), value.to_string()));
    }

    fn end_option_batch(&mut self) {
        self.batch_depth -= 1;
        assert_eq!(self.batch_depth, 0, "option batch must be balanced");
    }

    fn force_option_update(&mut self) {
        info!(self.log, "demo core: option update forced"; "options" => ?self.options);
        self.options.clear();
    }
}
