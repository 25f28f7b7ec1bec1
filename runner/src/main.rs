//! Demo/diagnostic CLI binary: wires the session lifecycle and one of the
//! three link transports together without a real emulator frontend, core
//! or radio driver behind it (§9a.5's "CLI demo harness").

mod config;
mod demo_cores;

use clap::{App, Arg};
use config::{Config, RoleKind, TransportKind};
use demo_cores::{DemoGbCoreOptions, DemoGbaLinkCore, DemoNetplayCore};
use linksession::{ConnectionMode, SessionLifecycle, SimulatedRadio};
use netcommon::logging::{self, info, o, warn};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn build_cli() -> App<'static, 'static> {
    App::new("NextUI Link Runner")
        .version("1.0")
        .author("NextUI Contributors")
        .about("Exercises the network link substrate without a real emulator core attached")
        .arg(Arg::with_name("CONFIG").long("config").short("c").takes_value(true).help("Path to a TOML config file"))
        .arg(Arg::with_name("TRANSPORT").long("transport").short("t").takes_value(true).help("netplay | gbalink | gblink"))
        .arg(Arg::with_name("ROLE").long("role").short("r").takes_value(true).help("host | client"))
        .arg(Arg::with_name("HOST").long("host").takes_value(true).help("Host IPv4 address (client role)"))
        .arg(Arg::with_name("HOTSPOT").long("hotspot").help("Use a self-hosted hotspot instead of shared WiFi"))
}

fn main() {
    let matches = build_cli().get_matches();

    let config_path = matches.value_of("CONFIG").unwrap_or("gamerunner.link.toml");
    let mut config = Config::load(config_path);

    if let Some(transport) = matches.value_of("TRANSPORT").and_then(TransportKind::parse) {
        config.transport = transport;
    }
    if let Some(role) = matches.value_of("ROLE").and_then(RoleKind::parse) {
        config.role = role;
    }
    if matches.is_present("HOTSPOT") {
        config.hotspot.enabled = true;
    }
    if let Some(host) = matches.value_of("HOST") {
        config.host_ip = Some(host.to_string());
    }

    let log = logging::build(&config.log);
    info!(log, "starting link runner"; "transport" => ?config.transport, "role" => ?config.role);

    let radio = Arc::new(SimulatedRadio::default());
    let lifecycle = SessionLifecycle::new(radio, log.clone());
    let mode = if config.hotspot.enabled { ConnectionMode::Hotspot } else { ConnectionMode::Wifi };

    let link = match config.role {
        RoleKind::Host => lifecycle.host_acquire(mode, &config.hotspot.ssid_prefix, config.hotspot.ssid_seed, &config.hotspot.password),
        RoleKind::Client => {
            // In hotspot mode a client needs the host's SSID; the demo
            // reuses the deterministic generator with the same seed so the
            // two sides agree without a real discovery round-trip.
            let ssid = netcommon::ssid::generate(&config.hotspot.ssid_prefix, config.hotspot.ssid_seed);
            lifecycle.client_acquire(mode, &ssid, &config.hotspot.password)
        }
    };

    let link = match link {
        Ok(link) => link,
        Err(err) => {
            warn!(log, "could not acquire a network"; "error" => ?err);
            std::process::exit(1);
        }
    };
    info!(log, "network acquired"; "ip" => %link.local_ip, "hotspot" => link.using_hotspot);

    match config.transport {
        TransportKind::Netplay => run_netplay(&config, &log),
        TransportKind::GbaLink => run_gbalink(&config, &log),
        TransportKind::GbLink => run_gblink(&config, &log),
    }

    let teardown = lifecycle.teardown(link.using_hotspot);
    teardown.wait(Duration::from_secs(10));
    info!(log, "session torn down");
}

fn run_netplay(config: &Config, log: &netcommon::logging::Logger) {
    let session = netplay::Session::new(log.new(o!("transport" => "netplay")));
    let mut core = DemoNetplayCore::new(log.new(o!("component" => "core")));

    match config.role {
        RoleKind::Host => {
            if let Err(err) = session.start_host(config.port(), &config.game_name, config.game_crc) {
                warn!(log, "netplay start_host failed"; "error" => ?err);
                return;
            }

            let deadline = std::time::Instant::now() + Duration::from_secs(30);
            while std::time::Instant::now() < deadline {
                match session.accept_pending() {
                    Ok(true) => break,
                    Ok(false) => thread::sleep(Duration::from_millis(100)),
                    Err(err) => {
                        warn!(log, "netplay accept failed"; "error" => ?err);
                        return;
                    }
                }
            }

            if let Err(err) = session.sync_as_host(&mut core) {
                warn!(log, "netplay state sync (host) failed"; "error" => ?err);
                return;
            }
        }
        RoleKind::Client => {
            let host_ip = match config.host_ip.as_deref().and_then(|s| Ipv4Addr::from_str(s).ok()) {
                Some(ip) => ip,
                None => {
                    warn!(log, "netplay client role requires --host");
                    return;
                }
            };

            if let Err(err) = session.connect(host_ip, config.port(), &config.game_name, config.game_crc) {
                warn!(log, "netplay connect failed"; "error" => ?err);
                return;
            }

            if let Err(err) = session.sync_as_client(&mut core) {
                warn!(log, "netplay state sync (client) failed"; "error" => ?err);
                return;
            }
        }
    }

    info!(log, "netplay playing"; "status" => %session.status());
    for frame in 0..120u16 {
        let input = if frame % 2 == 0 { 0x0001 } else { 0x0000 };
        if session.pre_frame(input) {
            session.post_frame();
        }
    }

    session.disconnect();
}

fn run_gbalink(config: &Config, log: &netcommon::logging::Logger) {
    let session = gbalink::Session::new(log.new(o!("transport" => "gbalink")));
    let mut core = DemoGbaLinkCore::new(log.new(o!("component" => "core")), "rfu".to_string());

    match config.role {
        RoleKind::Host => {
            if let Err(err) = session.start_host(config.port()) {
                warn!(log, "gbalink start_host failed"; "error" => ?err);
                return;
            }

            let deadline = std::time::Instant::now() + Duration::from_secs(30);
            while std::time::Instant::now() < deadline {
                match session.accept_pending(&core.link_mode()) {
                    Ok(true) => break,
                    Ok(false) => thread::sleep(Duration::from_millis(100)),
                    Err(err) => {
                        warn!(log, "gbalink accept failed"; "error" => ?err);
                        return;
                    }
                }
            }
        }
        RoleKind::Client => {
            let host_ip = match config.host_ip.as_deref().and_then(|s| Ipv4Addr::from_str(s).ok()) {
                Some(ip) => ip,
                None => {
                    warn!(log, "gbalink client role requires --host");
                    return;
                }
            };

            match session.connect(host_ip, config.port(), &core.link_mode()) {
                Ok(gbalink::session::HandshakeOutcome::NeedsReload) => {
                    warn!(log, "gbalink link mode mismatch, would need a game reload");
                    return;
                }
                Ok(gbalink::session::HandshakeOutcome::Ready) => {}
                Err(err) => {
                    warn!(log, "gbalink connect failed"; "error" => ?err);
                    return;
                }
            }
        }
    }

    for frame in 0..180u32 {
        session.pump(&mut core);
        if config.role == RoleKind::Client && frame == 10 {
            let _ = session.send(b"demo-sio-payload");
        }
        thread::sleep(Duration::from_millis(16));
    }

    info!(log, "gbalink overflow count"; "count" => session.overflow_count());
    session.disconnect();
}

fn run_gblink(config: &Config, log: &netcommon::logging::Logger) {
    let session = gblink::Session::new(log.new(o!("transport" => "gblink")));
    let mut core = DemoGbCoreOptions::new(log.new(o!("component" => "core")));

    match config.role {
        RoleKind::Host => {
            if let Err(err) = session.start_host(&mut core, &config.game_name) {
                warn!(log, "gblink start_host failed"; "error" => ?err);
                return;
            }
            session.observe_log_line("serial: connection established");
        }
        RoleKind::Client => {
            let host_ip = match config.host_ip.as_deref().and_then(|s| Ipv4Addr::from_str(s).ok()) {
                Some(ip) => ip,
                None => {
                    warn!(log, "gblink client role requires --host");
                    return;
                }
            };

            if let Err(err) = session.connect(&mut core, host_ip) {
                warn!(log, "gblink connect failed"; "error" => ?err);
                return;
            }
            session.observe_log_line("serial: connection established");
        }
    }

    info!(log, "gblink status"; "status" => %session.status());
    session.disconnect(&mut core);
}
