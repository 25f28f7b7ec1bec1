//! The UDP discovery protocol shared by all three transports (§4.2),
//! distinguished only by their magic values and ports (§6.1).

use crate::net;
use crate::time::BroadcastTimer;
use crate::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::HashSet;
use indexmap::IndexMap;
use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

const GAME_NAME_FIELD_LEN: usize = 64;
const LINK_MODE_FIELD_LEN: usize = 32;

pub const WIRE_SIZE: usize = 4 + 4 + 4 + 2 + GAME_NAME_FIELD_LEN + LINK_MODE_FIELD_LEN;

/// The fixed-layout discovery datagram (§3.2): magic, protocol version,
/// game CRC, advertised TCP port, NUL-padded game name and link mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub magic: u32,
    pub protocol_version: u32,
    pub game_crc: u32,
    pub tcp_port: u16,
    pub game_name: String,
    pub link_mode: String,
}

impl DiscoveryPacket {
    pub fn write(&self) -> [u8; WIRE_SIZE] {
        let mut buf = [0u8; WIRE_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u32::<BigEndian>(self.magic).unwrap();
        cursor.write_u32::<BigEndian>(self.protocol_version).unwrap();
        cursor.write_u32::<BigEndian>(self.game_crc).unwrap();
        cursor.write_u16::<BigEndian>(self.tcp_port).unwrap();
        write_padded(&mut cursor, &self.game_name, GAME_NAME_FIELD_LEN);
        write_padded(&mut cursor, &self.link_mode, LINK_MODE_FIELD_LEN);

        buf
    }

    pub fn read(buf: &[u8]) -> NetworkResult<DiscoveryPacket> {
        if buf.len() < WIRE_SIZE {
            return Err(NetworkError::Fatal(ErrorType::ProtocolError));
        }

        let mut cursor = Cursor::new(buf);
        let magic = cursor.read_u32::<BigEndian>()?;
        let protocol_version = cursor.read_u32::<BigEndian>()?;
        let game_crc = cursor.read_u32::<BigEndian>()?;
        let tcp_port = cursor.read_u16::<BigEndian>()?;
        let game_name = read_padded(&mut cursor, GAME_NAME_FIELD_LEN)?;
        let link_mode = read_padded(&mut cursor, LINK_MODE_FIELD_LEN)?;

        Ok(DiscoveryPacket {
            magic,
            protocol_version,
            game_crc,
            tcp_port,
            game_name,
            link_mode,
        })
    }
}

fn write_padded(cursor: &mut Cursor<&mut [u8]>, text: &str, field_len: usize) {
    let bytes = text.as_bytes();
    let copy_len = bytes.len().min(field_len);
    let pos = cursor.position() as usize;
    let out = cursor.get_mut();
    out[pos..pos + copy_len].copy_from_slice(&bytes[..copy_len]);
    // Remaining bytes are already zero-initialised (NUL padding).
    cursor.set_position((pos + field_len) as u64);
}

fn read_padded(cursor: &mut Cursor<&[u8]>, field_len: usize) -> NetworkResult<String> {
    let pos = cursor.position() as usize;
    let slice = &cursor.get_ref()[pos..pos + field_len];
    let nul = slice.iter().position(|&b| b == 0).unwrap_or(field_len);
    let text = String::from_utf8_lossy(&slice[..nul]).into_owned();
    cursor.set_position((pos + field_len) as u64);
    Ok(text)
}

/// A host discovered via broadcast or unicast query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub addr: Ipv4Addr,
    pub tcp_port: u16,
    pub game_crc: u32,
    pub game_name: String,
    pub link_mode: String,
}

/// Host-side periodic UDP broadcast of `DISCOVERY_RESP`, rate-limited to
/// once per [`BroadcastTimer::DEFAULT_INTERVAL`].
pub struct Announcer {
    socket: UdpSocket,
    timer: BroadcastTimer,
    discovery_port: u16,
    response_magic: u32,
    protocol_version: u32,
}

impl Announcer {
    pub fn new(discovery_port: u16, response_magic: u32, protocol_version: u32) -> NetworkResult<Announcer> {
        Ok(Announcer {
            socket: net::create_broadcast_socket()?,
            timer: BroadcastTimer::default(),
            discovery_port,
            response_magic,
            protocol_version,
        })
    }

    /// Sends a `DISCOVERY_RESP` datagram if the rate limit allows it at
    /// `now`. Returns whether a datagram was actually sent.
    pub fn tick(&mut self, now: Instant, game_crc: u32, tcp_port: u16, game_name: &str, link_mode: &str) -> NetworkResult<bool> {
        if !self.timer.should_broadcast(now) {
            return Ok(false);
        }

        let packet = DiscoveryPacket {
            magic: self.response_magic,
            protocol_version: self.protocol_version,
            game_crc,
            tcp_port,
            game_name: game_name.to_string(),
            link_mode: link_mode.to_string(),
        };

        let dest = SocketAddrV4::new(Ipv4Addr::BROADCAST, self.discovery_port);
        self.socket.send_to(&packet.write(), dest)?;
        Ok(true)
    }
}

/// A host-side responder to unicast `DISCOVERY_QUERY` datagrams, used by
/// GBA Link so hotspot clients (whose broadcasts may be filtered) can
/// still find the host (§4.2).
pub struct QueryResponder {
    socket: UdpSocket,
    query_magic: u32,
    response_magic: u32,
    protocol_version: u32,
}

impl QueryResponder {
    pub fn new(discovery_port: u16, query_magic: u32, response_magic: u32, protocol_version: u32) -> NetworkResult<QueryResponder> {
        Ok(QueryResponder {
            socket: net::create_discovery_listen_socket(discovery_port)?,
            query_magic,
            response_magic,
            protocol_version,
        })
    }

    /// Drains pending queries, replying to each with a unicast response.
    pub fn poll_and_respond(&self, game_crc: u32, tcp_port: u16, game_name: &str, link_mode: &str) -> NetworkResult<usize> {
        let mut answered = 0;
        let mut buf = [0u8; WIRE_SIZE];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((_, sender)) => {
                    if let Ok(query) = DiscoveryPacket::read(&buf) {
                        if query.magic != self.query_magic {
                            continue;
                        }

                        let response = DiscoveryPacket {
                            magic: self.response_magic,
                            protocol_version: self.protocol_version,
                            game_crc,
                            tcp_port,
                            game_name: game_name.to_string(),
                            link_mode: link_mode.to_string(),
                        };

                        self.socket.send_to(&response.write(), sender)?;
                        answered += 1;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(answered)
    }
}

/// Client-side scanner: binds the discovery port, drains broadcast
/// responses, deduplicates by sender IP, bounded by `max_hosts` (§4.1's
/// "receive discovery responses" operation).
pub struct Scanner {
    socket: UdpSocket,
    expected_magic: u32,
    max_hosts: usize,
}

impl Scanner {
    pub fn new(discovery_port: u16, expected_magic: u32, max_hosts: usize) -> NetworkResult<Scanner> {
        Ok(Scanner {
            socket: net::create_discovery_listen_socket(discovery_port)?,
            expected_magic,
            max_hosts,
        })
    }

    /// Drains the non-blocking socket, inserting newly-seen hosts (keyed by
    /// sender IP) into `hosts`. Returns the new length of `hosts`.
    pub fn poll(&self, hosts: &mut IndexMap<Ipv4Addr, DiscoveredHost>) -> usize {
        let mut buf = [0u8; WIRE_SIZE];
        let mut seen_this_poll: HashSet<Ipv4Addr> = HashSet::new();

        loop {
            if hosts.len() >= self.max_hosts {
                break;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((_, SocketAddr::V4(sender))) => {
                    let ip = *sender.ip();
                    if seen_this_poll.contains(&ip) {
                        continue;
                    }
                    seen_this_poll.insert(ip);

                    if let Ok(packet) = DiscoveryPacket::read(&buf) {
                        if packet.magic != self.expected_magic {
                            continue;
                        }

                        hosts.entry(ip).or_insert(DiscoveredHost {
                            addr: ip,
                            tcp_port: packet.tcp_port,
                            game_crc: packet.game_crc,
                            game_name: packet.game_name,
                            link_mode: packet.link_mode,
                        });
                    }
                }
                Ok((_, SocketAddr::V6(_))) => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        hosts.len()
    }
}

/// Sends a unicast `DISCOVERY_QUERY` to a known host and waits for its
/// reply, retrying up to three times with a 500 ms send/recv timeout
/// (GBA Link hotspot mode, §4.2).
pub fn query_host(
    host_ip: Ipv4Addr,
    discovery_port: u16,
    query_magic: u32,
    response_magic: u32,
    protocol_version: u32,
) -> NetworkResult<DiscoveredHost> {
    const RETRIES: usize = 3;
    const TIMEOUT: Duration = Duration::from_millis(500);

    let socket = net::create_broadcast_socket()?;
    socket.set_read_timeout(Some(TIMEOUT))?;
    socket.set_write_timeout(Some(TIMEOUT))?;

    let query = DiscoveryPacket {
        magic: query_magic,
        protocol_version,
        game_crc: 0,
        tcp_port: 0,
        game_name: String::new(),
        link_mode: String::new(),
    };
    let dest = SocketAddrV4::new(host_ip, discovery_port);

    let mut last_err = NetworkError::Fatal(ErrorType::PeerDisconnected);
    let mut buf = [0u8; WIRE_SIZE];

    for _ in 0..RETRIES {
        socket.send_to(&query.write(), dest)?;

        match socket.recv_from(&mut buf) {
            Ok(_) => {
                let packet = DiscoveryPacket::read(&buf)?;
                if packet.magic != response_magic {
                    last_err = NetworkError::Fatal(ErrorType::ProtocolError);
                    continue;
                }

                return Ok(DiscoveredHost {
                    addr: host_ip,
                    tcp_port: packet.tcp_port,
                    game_crc: packet.game_crc,
                    game_name: packet.game_name,
                    link_mode: packet.link_mode,
                });
            }
            Err(err) => last_err = err.into(),
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trips_through_wire_format() {
        let packet = DiscoveryPacket {
            magic: 0x4e58_4452,
            protocol_version: 2,
            game_crc: 0xdead_beef,
            tcp_port: 55435,
            game_name: "Pokemon Red".to_string(),
            link_mode: "rfu".to_string(),
        };

        let wire = packet.write();
        let decoded = DiscoveryPacket::read(&wire).unwrap();

        assert_eq!(packet, decoded);
    }

    #[test]
    fn name_field_truncates_and_nul_pads() {
        let long_name = "x".repeat(200);
        let packet = DiscoveryPacket {
            magic: 1,
            protocol_version: 1,
            game_crc: 0,
            tcp_port: 0,
            game_name: long_name,
            link_mode: String::new(),
        };

        let wire = packet.write();
        let decoded = DiscoveryPacket::read(&wire).unwrap();
        assert_eq!(decoded.game_name.len(), GAME_NAME_FIELD_LEN);
    }

    #[test]
    fn scanner_dedupes_by_sender_ip() {
        let announce_socket = net::create_broadcast_socket().unwrap();
        let scan_port = {
            // Bind an ephemeral discovery port for the test.
            let probe = net::create_discovery_listen_socket(0).unwrap();
            probe.local_addr().unwrap().port()
        };

        let scanner = Scanner::new(scan_port, 0x4e58_4452, 8).unwrap();
        let packet = DiscoveryPacket {
            magic: 0x4e58_4452,
            protocol_version: 2,
            game_crc: 7,
            tcp_port: 55435,
            game_name: "Pokemon Red".to_string(),
            link_mode: String::new(),
        };

        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, scan_port);
        announce_socket.send_to(&packet.write(), dest).unwrap();
        announce_socket.send_to(&packet.write(), dest).unwrap();

        std::thread::sleep(Duration::from_millis(50));

        let mut hosts = IndexMap::new();
        let len = scanner.poll(&mut hosts);

        assert_eq!(len, 1);
        assert_eq!(hosts.get_index(0).unwrap().1.game_crc, 7);
    }
}
