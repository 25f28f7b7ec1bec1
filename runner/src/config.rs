//! Layered TOML configuration for the demo CLI (§9a.3): a config file
//! supplies defaults, individual fields can be overridden from the command
//! line for quick manual/demo runs.

use netcommon::logging::LogConfig;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Netplay,
    GbaLink,
    GbLink,
}

impl TransportKind {
    pub fn parse(value: &str) -> Option<TransportKind> {
        match value {
            "netplay" => Some(TransportKind::Netplay),
            "gbalink" => Some(TransportKind::GbaLink),
            "gblink" => Some(TransportKind::GbLink),
            _ => None,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            TransportKind::Netplay => netplay::TCP_PORT,
            TransportKind::GbaLink => gbalink::session::TCP_PORT,
            TransportKind::GbLink => gblink::session::TCP_PORT,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Host,
    Client,
}

impl RoleKind {
    pub fn parse(value: &str) -> Option<RoleKind> {
        match value {
            "host" => Some(RoleKind::Host),
            "client" => Some(RoleKind::Client),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ssid_prefix")]
    pub ssid_prefix: String,
    #[serde(default)]
    pub ssid_seed: u64,
    #[serde(default = "default_password")]
    pub password: String,
}

impl Default for HotspotConfig {
    fn default() -> HotspotConfig {
        HotspotConfig {
            enabled: false,
            ssid_prefix: default_ssid_prefix(),
            ssid_seed: 0,
            password: default_password(),
        }
    }
}

fn default_ssid_prefix() -> String {
    netcommon::HOTSPOT_SSID_PREFIX.to_string()
}

fn default_password() -> String {
    "nextui-link".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transport: TransportKind,
    pub role: RoleKind,
    #[serde(default = "default_game_name")]
    pub game_name: String,
    #[serde(default)]
    pub game_crc: u32,
    pub port: Option<u16>,
    pub host_ip: Option<String>,
    #[serde(default)]
    pub hotspot: HotspotConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_game_name() -> String {
    "Demo Cartridge".to_string()
}

impl Default for Config {
    fn default() -> Config {
        Config {
            transport: TransportKind::Netplay,
            role: RoleKind::Host,
            game_name: default_game_name(),
            game_crc: 0,
            port: None,
            host_ip: None,
            hotspot: HotspotConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Config {
        serdeconv::from_toml_file(path).unwrap_or_else(|_| Config::default())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_matches_each_transport_tcp_port() {
        assert_eq!(TransportKind::Netplay.default_port(), netplay::TCP_PORT);
        assert_eq!(TransportKind::GbaLink.default_port(), gbalink::session::TCP_PORT);
        assert_eq!(TransportKind::GbLink.default_port(), gblink::session::TCP_PORT);
    }

    #[test]
    fn parse_rejects_unknown_transport_names() {
        assert_eq!(TransportKind::parse("bogus"), None);
        assert_eq!(TransportKind::parse("gbalink"), Some(TransportKind::GbaLink));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/path/gamerunner.link.toml");
        assert_eq!(config.transport, TransportKind::Netplay);
        assert_eq!(config.role, RoleKind::Host);
    }
}
