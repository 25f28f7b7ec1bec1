//! Stands in either a host or a scanning client on one transport's
//! discovery port, so the UDP discovery protocol (§4.2) can be poked at
//! from the command line without a real session running (§9a.5).

use clap::{App, Arg};
use netcommon::discovery::{query_host, Announcer, Scanner};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::{Duration, Instant};

struct Transport {
    discovery_port: u16,
    tcp_port: u16,
    response_magic: u32,
    protocol_version: u32,
}

fn transport(name: &str) -> Transport {
    match name {
        "netplay" => Transport {
            discovery_port: netplay::DISCOVERY_PORT,
            tcp_port: netplay::TCP_PORT,
            response_magic: netplay::session::RESPONSE_MAGIC,
            protocol_version: netplay::session::PROTOCOL_VERSION,
        },
        "gbalink" => Transport {
            discovery_port: gbalink::DISCOVERY_PORT,
            tcp_port: gbalink::TCP_PORT,
            response_magic: gbalink::session::RESPONSE_MAGIC,
            protocol_version: gbalink::PROTOCOL_VERSION,
        },
        "gblink" => Transport {
            discovery_port: gblink::DISCOVERY_PORT,
            tcp_port: gblink::TCP_PORT,
            response_magic: gblink::session::RESPONSE_MAGIC,
            protocol_version: gblink::session::PROTOCOL_VERSION,
        },
        other => panic!("unknown transport {}, expected netplay|gbalink|gblink", other),
    }
}

fn main() {
    let matches = App::new("Discovery Prober")
        .version("1.0")
        .author("NextUI Contributors")
        .about("Announces or scans a transport's UDP discovery port")
        .arg(Arg::with_name("TRANSPORT").long("transport").takes_value(true).required(true).help("netplay | gbalink | gblink"))
        .arg(Arg::with_name("ANNOUNCE").long("announce").help("Act as a host, broadcasting responses"))
        .arg(Arg::with_name("QUERY").long("query").takes_value(true).help("Unicast-query a known host IP instead of scanning"))
        .arg(Arg::with_name("GAME_NAME").long("game-name").takes_value(true).default_value("Probe"))
        .arg(Arg::with_name("GAME_CRC").long("game-crc").takes_value(true).default_value("0"))
        .get_matches();

    let transport = transport(matches.value_of("TRANSPORT").unwrap());
    let game_name = matches.value_of("GAME_NAME").unwrap();
    let game_crc: u32 = matches.value_of("GAME_CRC").unwrap().parse().expect("GAME_CRC must be a u32");

    if let Some(host_ip) = matches.value_of("QUERY") {
        let ip = Ipv4Addr::from_str(host_ip).expect("QUERY must be an IPv4 address");
        match query_host(ip, transport.discovery_port, transport.response_magic, transport.response_magic, transport.protocol_version) {
            Ok(host) => println!("{:?}", host),
            Err(err) => eprintln!("query failed: {:?}", err),
        }
        return;
    }

    if matches.is_present("ANNOUNCE") {
        let mut announcer = Announcer::new(transport.discovery_port, transport.response_magic, transport.protocol_version).expect("failed to bind announce socket");
        println!("announcing on udp port {}, tcp port {}", transport.discovery_port, transport.tcp_port);
        loop {
            let _ = announcer.tick(Instant::now(), game_crc, transport.tcp_port, game_name, "probe");
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    let scanner = Scanner::new(transport.discovery_port, transport.response_magic, 16).expect("failed to bind scan socket");
    println!("scanning udp port {} for 5s", transport.discovery_port);
    let mut hosts = Default::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        scanner.poll(&mut hosts);
        std::thread::sleep(Duration::from_millis(100));
    }

    for (ip, host) in &hosts {
        println!("{} -> {:?}", ip, host);
    }
}
