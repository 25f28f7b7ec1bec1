//! The radio interface consumed by the session lifecycle (§6.4). Hotspot
//! creation, WiFi association and DHCP state all live on the device driver
//! side; this crate only calls through the trait and never touches a NIC
//! directly.

use netcommon::NetworkResult;

/// WiFi/hotspot driver shim. A real implementation shells out to
/// `hostapd`/`udhcpd`/`wpa_supplicant` or an equivalent platform API; tests
/// and the demo CLI use an in-memory fake instead.
pub trait Radio: Send + Sync {
    fn start_hotspot(&self, ssid: &str, password: &str) -> NetworkResult<()>;
    fn stop_hotspot(&self);
    fn get_hotspot_ip(&self) -> String;
    fn get_hotspot_password(&self) -> String;
    fn save_current_connection(&self);
    fn restore_previous_connection(&self);
    fn scan_networks(&self) -> Vec<String>;
    fn connect_to_network(&self, ssid: &str, password: &str) -> NetworkResult<()>;
    fn disconnect(&self);
    fn forget(&self, ssid: &str);
    fn is_connected(&self) -> bool;
    fn get_ip(&self) -> String;
}

/// An in-memory [`Radio`] with no real WiFi behind it, used by the demo CLI
/// (`runner`) when no hotspot driver shim is wired up. Reports itself as
/// always associated with whatever network it was last told to join, and
/// "DHCP" instantly.
#[derive(Default)]
pub struct SimulatedRadio {
    state: std::sync::Mutex<SimulatedState>,
}

#[derive(Default)]
struct SimulatedState {
    hotspot_active: bool,
    connected_ssid: Option<String>,
    saved_ssid: Option<String>,
}

impl Radio for SimulatedRadio {
    fn start_hotspot(&self, _ssid: &str, _password: &str) -> NetworkResult<()> {
        self.state.lock().unwrap().hotspot_active = true;
        Ok(())
    }

    fn stop_hotspot(&self) {
        self.state.lock().unwrap().hotspot_active = false;
    }

    fn get_hotspot_ip(&self) -> String {
        if self.state.lock().unwrap().hotspot_active {
            netcommon::HOTSPOT_HOST_IP.to_string()
        } else {
            String::new()
        }
    }

    fn get_hotspot_password(&self) -> String {
        "nextui-link".to_string()
    }

    fn save_current_connection(&self) {
        let mut state = self.state.lock().unwrap();
        state.saved_ssid = state.connected_ssid.clone();
    }

    fn restore_previous_connection(&self) {
        let mut state = self.state.lock().unwrap();
        state.connected_ssid = state.saved_ssid.take();
    }

    fn scan_networks(&self) -> Vec<String> {
        Vec::new()
    }

    fn connect_to_network(&self, ssid: &str, _password: &str) -> NetworkResult<()> {
        self.state.lock().unwrap().connected_ssid = Some(ssid.to_string());
        Ok(())
    }

    fn disconnect(&self) {
        self.state.lock().unwrap().connected_ssid = None;
    }

    fn forget(&self, ssid: &str) {
        let mut state = self.state.lock().unwrap();
        if state.connected_ssid.as_deref() == Some(ssid) {
            state.connected_ssid = None;
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected_ssid.is_some()
    }

    fn get_ip(&self) -> String {
        if self.is_connected() {
            "10.0.0.20".to_string()
        } else {
            "0.0.0.0".to_string()
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::Radio;
    use netcommon::NetworkResult;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every call made on it; `hotspot_ip` is set once
    /// `start_hotspot` has been called and unset on `stop_hotspot`, so tests
    /// can model the DHCP-style delay before an IP shows up by wrapping a
    /// fake in a small delay before flipping this flag externally.
    #[derive(Default)]
    pub struct FakeRadio {
        pub calls: Mutex<Vec<String>>,
        pub hotspot_ready: AtomicBool,
        pub connected: AtomicBool,
    }

    impl FakeRadio {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    impl Radio for FakeRadio {
        fn start_hotspot(&self, ssid: &str, _password: &str) -> NetworkResult<()> {
            self.record(&format!("start_hotspot({})", ssid));
            Ok(())
        }

        fn stop_hotspot(&self) {
            self.record("stop_hotspot");
            self.hotspot_ready.store(false, Ordering::SeqCst);
        }

        fn get_hotspot_ip(&self) -> String {
            if self.hotspot_ready.load(Ordering::SeqCst) {
                "10.0.0.1".to_string()
            } else {
                String::new()
            }
        }

        fn get_hotspot_password(&self) -> String {
            "nextui".to_string()
        }

        fn save_current_connection(&self) {
            self.record("save_current_connection");
        }

        fn restore_previous_connection(&self) {
            self.record("restore_previous_connection");
        }

        fn scan_networks(&self) -> Vec<String> {
            Vec::new()
        }

        fn connect_to_network(&self, ssid: &str, _password: &str) -> NetworkResult<()> {
            self.record(&format!("connect_to_network({})", ssid));
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn disconnect(&self) {
            self.record("disconnect");
            self.connected.store(false, Ordering::SeqCst);
        }

        fn forget(&self, ssid: &str) {
            self.record(&format!("forget({})", ssid));
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn get_ip(&self) -> String {
            if self.connected.load(Ordering::SeqCst) {
                "10.0.0.20".to_string()
            } else {
                "0.0.0.0".to_string()
            }
        }
    }
}
