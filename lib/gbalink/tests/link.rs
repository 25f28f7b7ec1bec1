use gbalink::{GbaLinkCore, HandshakeOutcome, Phase, Session};
use netcommon::logging;
use std::net::{Ipv4Addr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap().local_addr().unwrap().port()
}

#[derive(Default)]
struct RecordingCore {
    received: Vec<(Vec<u8>, u16)>,
    connected_peers: Vec<u16>,
    disconnected_peers: Vec<u16>,
    stopped: bool,
}

impl GbaLinkCore for RecordingCore {
    fn link_mode(&self) -> String {
        "normal".to_string()
    }

    fn connected(&mut self, peer_id: u16) {
        self.connected_peers.push(peer_id);
    }

    fn receive(&mut self, payload: &[u8], peer_id: u16) {
        self.received.push((payload.to_vec(), peer_id));
    }

    fn disconnected(&mut self, peer_id: u16) {
        self.disconnected_peers.push(peer_id);
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Drives `host.accept_pending` until it either accepts a client or the
/// deadline passes, while a client dial runs concurrently on another
/// thread.
fn establish_pair(port: u16, host_mode: &str, client_mode: &str) -> (Session, Session, HandshakeOutcome) {
    let host = Session::new(logging::discard());
    let client = Session::new(logging::discard());
    host.start_host(port).unwrap();

    let outcome = thread::scope(|scope| {
        let client_handle = scope.spawn(|| client.connect(Ipv4Addr::LOCALHOST, port, client_mode));

        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if host.accept_pending(host_mode).unwrap_or(false) {
                break;
            }
            if Instant::now() >= deadline {
                panic!("host never accepted the client within the deadline");
            }
            thread::sleep(Duration::from_millis(20));
        }

        client_handle.join().unwrap().unwrap()
    });

    (host, client, outcome)
}

#[test]
fn handshake_reaches_connected_on_both_sides_with_matching_link_mode() {
    let port = free_port();
    let (host, client, outcome) = establish_pair(port, "normal", "normal");

    assert_eq!(outcome, HandshakeOutcome::Ready);
    assert_eq!(host.phase(), Phase::Connected);
    assert_eq!(client.phase(), Phase::Connected);
}

#[test]
fn mismatched_link_mode_surfaces_needs_reload_without_failing() {
    let port = free_port();
    let (host, client, outcome) = establish_pair(port, "normal", "rfu");

    assert_eq!(outcome, HandshakeOutcome::NeedsReload);
    // The TCP session itself is still up; only the frontend decides
    // whether to reload and retry.
    assert_eq!(host.phase(), Phase::Connected);
    assert_eq!(client.phase(), Phase::Connected);
}

#[test]
fn sio_data_sent_by_one_side_is_delivered_to_the_other_cores_receive() {
    let port = free_port();
    let (host, client, _outcome) = establish_pair(port, "normal", "normal");

    host.send(b"link-packet").unwrap();

    let mut core = RecordingCore::default();
    let deadline = Instant::now() + Duration::from_secs(2);
    while core.received.is_empty() && Instant::now() < deadline {
        client.pump(&mut core);
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(core.received.len(), 1);
    assert_eq!(core.received[0].0, b"link-packet".to_vec());
}

#[test]
fn a_burst_of_sio_data_packets_landing_in_one_read_is_fully_drained() {
    let port = free_port();
    let (host, client, _outcome) = establish_pair(port, "normal", "normal");

    const BURST: usize = 48;
    for i in 0..BURST {
        host.send(&[i as u8]).unwrap();
    }

    // Give the OS a moment to coalesce the whole burst into the client's
    // socket receive buffer, so a single `read` picks up every packet.
    thread::sleep(Duration::from_millis(200));

    let mut core = RecordingCore::default();
    let deadline = Instant::now() + Duration::from_secs(2);
    while core.received.len() < BURST && Instant::now() < deadline {
        client.pump(&mut core);
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(core.received.len(), BURST, "not every packet in the burst was delivered");
    for i in 0..BURST {
        assert_eq!(core.received[i].0, vec![i as u8], "packet {} delivered out of FIFO order", i);
    }
}

#[test]
fn explicit_client_disconnect_bounces_host_back_to_waiting() {
    let port = free_port();
    let (host, client, _outcome) = establish_pair(port, "normal", "normal");

    client.disconnect();

    let mut core = RecordingCore::default();
    let deadline = Instant::now() + Duration::from_secs(2);
    while host.phase() != Phase::Waiting && Instant::now() < deadline {
        host.pump(&mut core);
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(host.phase(), Phase::Waiting);
    assert!(core.stopped);
    assert_eq!(core.disconnected_peers, vec![gbalink::protocol::PEER_CLIENT_ID]);
}
