//! The Netplay phase machine, pre/post-frame contract and state sync
//! (§4.3).

use crate::frame::{FrameBuffer, Player, INPUT_LATENCY};
use crate::protocol::{self, Command};
use netcommon::discovery::{Announcer, DiscoveredHost, Scanner};
use netcommon::logging::{debug, info, o, warn, Logger};
use netcommon::net::{self, TcpConfig};
use netcommon::{ErrorType, NetworkError, NetworkResult};
use indexmap::IndexMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

pub const DISCOVERY_PORT: u16 = 55436;
pub const TCP_PORT: u16 = 55435;
pub const RESPONSE_MAGIC: u32 = 0x4e58_4452; // 'NXDR'
pub const PROTOCOL_VERSION: u32 = 2;

const STALL_WARN_FRAMES: u32 = 60;
const STALL_TIMEOUT_FRAMES: u32 = 180;
const KEEPALIVE_INTERVAL_FRAMES: u32 = 30;
const RECV_ATTEMPTS_PER_FRAME: usize = 10;
const RECV_BUDGET: Duration = Duration::from_millis(16);
const STATE_CHUNK_SIZE: usize = 4096;
const STATE_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Provides savestate (de)serialization for the one-time sync in §4.3.6.
/// The engine never inspects the bytes; it only moves them.
pub trait NetplayCore {
    fn serialize_state(&mut self) -> Vec<u8>;
    /// Returns `false` if `data` could not be applied (size/corruption).
    fn apply_state(&mut self, data: &[u8]) -> bool;
    /// The size, in bytes, this side's own `serialize_state` would produce;
    /// used by the client to detect a state-size mismatch before reading.
    fn state_size(&self) -> u32;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Off,
    Host,
    Client,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    Off,
    Waiting,
    Connecting,
    Syncing,
    Playing,
    Stalled,
    Paused,
    Disconnected,
}

struct Inner {
    role: Role,
    phase: Phase,
    peer_ip: Option<Ipv4Addr>,
    peer_port: Option<u16>,
    game_name: String,
    game_crc: u32,
    status_message: String,
    port: u16,

    stream: Option<TcpStream>,
    listener_running: Option<std::sync::Arc<AtomicBool>>,
    accept_rx: Option<Receiver<TcpStream>>,

    frames: FrameBuffer,
    run_frame: u32,
    self_frame: u32,
    other_frame: u32,
    self_frame_sent: bool,
    stall_frames: u32,
    audio_silence: bool,
    local_paused: bool,
    remote_paused: bool,
}

impl Inner {
    fn fresh() -> Inner {
        Inner {
            role: Role::Off,
            phase: Phase::Off,
            peer_ip: None,
            peer_port: None,
            game_name: String::new(),
            game_crc: 0,
            status_message: "Off".to_string(),
            port: TCP_PORT,
            stream: None,
            listener_running: None,
            accept_rx: None,
            frames: FrameBuffer::new(),
            run_frame: 0,
            self_frame: INPUT_LATENCY,
            other_frame: 0,
            self_frame_sent: false,
            stall_frames: 0,
            audio_silence: false,
            local_paused: false,
            remote_paused: false,
        }
    }
}

/// A single process-wide Netplay session instance. The listener thread
/// (host only) and the caller's frame loop share this under a mutex.
pub struct Session {
    inner: Mutex<Inner>,
    log: Logger,
}

impl Session {
    pub fn new(log: Logger) -> Session {
        Session {
            inner: Mutex::new(Inner::fresh()),
            log,
        }
    }

    pub fn role(&self) -> Role {
        self.inner.lock().unwrap().role
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().unwrap().phase
    }

    pub fn status(&self) -> String {
        self.inner.lock().unwrap().status_message.clone()
    }

    pub fn should_silence_audio(&self) -> bool {
        self.inner.lock().unwrap().audio_silence
    }

    /// The recorded `(p1, p2)` input for `frame`, for diagnostics and
    /// tests checking both peers agree on the same slot (§8.1).
    pub fn frame_slot(&self, frame: u32) -> (u16, u16) {
        let guard = self.inner.lock().unwrap();
        let slot = guard.frames.slot(frame);
        (slot.p1, slot.p2)
    }

    /// Starts hosting: binds the listener and spawns the background thread
    /// that broadcasts `DISCOVERY_RESP` and accepts the first client
    /// (§4.2, §4.3.2). Returns `AlreadySessionActive` if not currently Off.
    pub fn start_host(&self, port: u16, game_name: &str, game_crc: u32) -> NetworkResult<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.role != Role::Off {
            return Err(NetworkError::Fatal(ErrorType::AlreadySessionActive));
        }

        let listener = net::create_listen_socket(port)?;
        listener.set_nonblocking(true)?;

        let (tx, rx) = mpsc::channel();
        let running = std::sync::Arc::new(AtomicBool::new(true));

        guard.role = Role::Host;
        guard.phase = Phase::Waiting;
        guard.port = port;
        guard.game_name = game_name.to_string();
        guard.game_crc = game_crc;
        guard.accept_rx = Some(rx);
        guard.listener_running = Some(running.clone());
        guard.status_message = format!("Hosting on {}:{}", net::get_local_ipv4(), port);

        let log = self.log.new(o!("role" => "host"));
        spawn_listener_thread(listener, game_name.to_string(), game_crc, port, running, tx, log);

        Ok(())
    }

    /// Dials a host: TCP connect with a 5 s timeout, then exchanges
    /// `READY` (§4.3.2, §4.3.6). Leaves the session in `Syncing`; the
    /// caller must follow up with [`Session::sync_as_client`].
    pub fn connect(&self, host_ip: Ipv4Addr, port: u16, game_name: &str, game_crc: u32) -> NetworkResult<()> {
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.role != Role::Off {
                return Err(NetworkError::Fatal(ErrorType::AlreadySessionActive));
            }
            guard.role = Role::Client;
            guard.phase = Phase::Connecting;
            guard.game_name = game_name.to_string();
            guard.game_crc = game_crc;
            guard.status_message = format!("Connecting to {}:{}", host_ip, port);
        }

        let addr: SocketAddr = SocketAddrV4::new(host_ip, port).into();
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))?;
        net::configure_tcp_socket(&stream, &TcpConfig::default())?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;

        protocol::write_packet(&stream, Command::Ready, 0, &[])?;
        let (header, _) = protocol::read_packet(&stream)?;
        if header.cmd != Command::Ready {
            return Err(NetworkError::Fatal(ErrorType::HandshakeTimeout));
        }

        let mut guard = self.inner.lock().unwrap();
        guard.stream = Some(stream);
        guard.peer_ip = Some(host_ip);
        guard.peer_port = Some(port);
        guard.phase = Phase::Syncing;
        guard.status_message = format!("Syncing with {}", host_ip);
        info!(self.log, "netplay connected"; "role" => "client", "peer" => %host_ip);

        Ok(())
    }

    /// Picks up a connection accepted by the listener thread, if any,
    /// transitioning `Waiting -> Syncing` (the host side of §4.3.2's
    /// `accept()` arrow). Returns `true` if a client was accepted.
    pub fn accept_pending(&self) -> NetworkResult<bool> {
        let mut guard = self.inner.lock().unwrap();
        if guard.phase != Phase::Waiting {
            return Ok(false);
        }

        let stream = match &guard.accept_rx {
            Some(rx) => match rx.try_recv() {
                Ok(stream) => stream,
                Err(_) => return Ok(false),
            },
            None => return Ok(false),
        };

        net::configure_tcp_socket(&stream, &TcpConfig::default())?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;

        let peer_ip = match stream.peer_addr()? {
            SocketAddr::V4(addr) => *addr.ip(),
            SocketAddr::V6(_) => return Err(NetworkError::Fatal(ErrorType::ProtocolError)),
        };

        protocol::write_packet(&stream, Command::Ready, 0, &[])?;
        let (header, _) = protocol::read_packet(&stream)?;
        if header.cmd != Command::Ready {
            return Err(NetworkError::Fatal(ErrorType::HandshakeTimeout));
        }

        guard.stream = Some(stream);
        guard.peer_ip = Some(peer_ip);
        guard.phase = Phase::Syncing;
        guard.status_message = format!("Client connected: {}", peer_ip);
        info!(self.log, "netplay client accepted"; "peer" => %peer_ip);

        Ok(true)
    }

    /// Host side of §4.3.6: stream the core's serialized state to the
    /// client in 4 KiB chunks, await `STATE_ACK` within 10 s, then send
    /// `READY` and seed the latency window.
    pub fn sync_as_host(&self, core: &mut dyn NetplayCore) -> NetworkResult<()> {
        let state = core.serialize_state();

        let mut guard = self.inner.lock().unwrap();
        let stream = guard.stream.as_ref().ok_or(NetworkError::Fatal(ErrorType::PeerDisconnected))?;

        protocol::write_packet(stream, Command::StateHdr, 0, &(state.len() as u32).to_be_bytes())?;
        for chunk in state.chunks(STATE_CHUNK_SIZE) {
            protocol::write_packet(stream, Command::StateData, 0, chunk)?;
        }

        stream.set_read_timeout(Some(STATE_ACK_TIMEOUT))?;
        let (header, _) = protocol::read_packet(stream)?;
        if header.cmd != Command::StateAck {
            guard.phase = Phase::Disconnected;
            return Err(NetworkError::Fatal(ErrorType::StateSizeMismatch));
        }

        protocol::write_packet(stream, Command::Ready, 0, &[])?;
        finish_sync(&mut guard);
        Ok(())
    }

    /// Client side of §4.3.6: receive `STATE_HDR`, verify the size matches
    /// this side's own state size, drain `STATE_DATA`, apply it, ack, and
    /// wait for `READY`.
    pub fn sync_as_client(&self, core: &mut dyn NetplayCore) -> NetworkResult<()> {
        let expected_size = core.state_size();

        let mut guard = self.inner.lock().unwrap();
        let stream = guard.stream.as_ref().ok_or(NetworkError::Fatal(ErrorType::PeerDisconnected))?;

        let (header, payload) = protocol::read_packet(stream)?;
        if header.cmd != Command::StateHdr || payload.len() < 4 {
            return Err(NetworkError::Fatal(ErrorType::ProtocolError));
        }
        let total_size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);

        if total_size != expected_size {
            guard.phase = Phase::Disconnected;
            guard.status_message = "State size mismatch".to_string();
            return Err(NetworkError::Fatal(ErrorType::StateSizeMismatch));
        }

        let mut received = Vec::with_capacity(total_size as usize);
        while (received.len() as u32) < total_size {
            let (chunk_header, chunk) = protocol::read_packet(stream)?;
            if chunk_header.cmd != Command::StateData {
                return Err(NetworkError::Fatal(ErrorType::ProtocolError));
            }
            received.extend_from_slice(&chunk);
        }

        if !core.apply_state(&received) {
            guard.phase = Phase::Disconnected;
            return Err(NetworkError::Fatal(ErrorType::StateSizeMismatch));
        }

        protocol::write_packet(stream, Command::StateAck, 0, &[])?;

        stream.set_read_timeout(Some(STATE_ACK_TIMEOUT))?;
        let (ready_header, _) = protocol::read_packet(stream)?;
        if ready_header.cmd != Command::Ready {
            return Err(NetworkError::Fatal(ErrorType::HandshakeTimeout));
        }

        finish_sync(&mut guard);
        Ok(())
    }

    /// The per-frame contract (§4.3.3): returns `true` when the emulator
    /// should execute this frame.
    pub fn pre_frame(&self, local_input: u16) -> bool {
        let mut guard = self.inner.lock().unwrap();

        if guard.role == Role::Off || !matches!(guard.phase, Phase::Playing | Phase::Stalled | Phase::Paused) {
            return true;
        }

        let self_frame = guard.self_frame;
        let local_slot = local_player_slot(guard.role);
        guard.frames.write_input(self_frame, local_slot, local_input);

        if !guard.self_frame_sent {
            if let Some(stream) = guard.stream.as_ref() {
                let _ = protocol::write_packet(stream, Command::Input, self_frame, &local_input.to_be_bytes());
            }
            guard.self_frame_sent = true;
        }

        for _ in 0..RECV_ATTEMPTS_PER_FRAME {
            if guard.frames.is_complete(guard.run_frame) {
                break;
            }

            let stream = match guard.stream.as_ref() {
                Some(stream) => stream.try_clone(),
                None => break,
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };

            // Release the mutex around the blocking recv so the listener
            // (or a concurrent disconnect()) can still make progress.
            drop(guard);
            let _ = stream.set_read_timeout(Some(RECV_BUDGET));
            let received = protocol::read_packet(&stream);
            guard = self.inner.lock().unwrap();

            match received {
                Ok((header, payload)) => {
                    if !self.dispatch(&mut guard, header, &payload) {
                        return false;
                    }
                }
                Err(NetworkError::Wait) => continue,
                Err(_) => {
                    self.handle_peer_gone(&mut guard);
                    return false;
                }
            }
        }

        if !guard.frames.is_complete(guard.run_frame) {
            guard.stall_frames += 1;

            if guard.stall_frames % KEEPALIVE_INTERVAL_FRAMES == 0 {
                if let Some(stream) = guard.stream.as_ref() {
                    let _ = protocol::write_packet(stream, Command::Keepalive, guard.run_frame, &[]);
                }
            }

            if !guard.local_paused && !guard.remote_paused && guard.stall_frames > STALL_TIMEOUT_FRAMES {
                self.transition_to_terminal(&mut guard);
                return false;
            }

            if guard.stall_frames > STALL_WARN_FRAMES {
                guard.status_message = format!("Waiting... ({}s)", (guard.stall_frames - STALL_WARN_FRAMES) / 60);
            }

            guard.audio_silence = true;
            guard.phase = Phase::Stalled;
            false
        } else {
            guard.stall_frames = 0;
            guard.audio_silence = false;
            guard.phase = Phase::Playing;
            true
        }
    }

    /// Advances both frame pointers (§4.3.4). Only call after a `true`
    /// return from [`Session::pre_frame`].
    pub fn post_frame(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.run_frame = guard.run_frame.wrapping_add(1);
        guard.self_frame = guard.self_frame.wrapping_add(1);
        guard.self_frame_sent = false;
    }

    /// Scans for broadcasting hosts for `duration` (client discovery,
    /// §4.2).
    pub fn scan_hosts(duration: Duration) -> Vec<DiscoveredHost> {
        let scanner = match Scanner::new(DISCOVERY_PORT, RESPONSE_MAGIC, 16) {
            Ok(scanner) => scanner,
            Err(_) => return Vec::new(),
        };

        let mut hosts = IndexMap::new();
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            scanner.poll(&mut hosts);
            thread::sleep(Duration::from_millis(50));
        }

        hosts.into_iter().map(|(_, host)| host).collect()
    }

    pub fn disconnect(&self) {
        let mut guard = self.inner.lock().unwrap();
        if guard.role == Role::Off {
            return;
        }

        if let Some(stream) = guard.stream.take() {
            let _ = protocol::write_packet(&stream, Command::Disconnect, guard.run_frame, &[]);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }

        if let Some(running) = guard.listener_running.take() {
            running.store(false, Ordering::SeqCst);
        }

        let was_host = guard.role == Role::Host;
        let port = guard.port;
        let game_name = guard.game_name.clone();
        let game_crc = guard.game_crc;

        *guard = Inner::fresh();

        if was_host {
            drop(guard);
            let _ = self.start_host(port, &game_name, game_crc);
        } else {
            guard.status_message = "Remote disconnected".to_string();
        }
    }

    fn dispatch(&self, guard: &mut Inner, header: protocol::Header, payload: &[u8]) -> bool {
        match header.cmd {
            Command::Input => {
                if payload.len() >= 2 {
                    let value = u16::from_be_bytes([payload[0], payload[1]]);
                    let remote_slot = remote_player_slot(guard.role);
                    guard.frames.write_input(header.frame, remote_slot, value);
                    guard.other_frame = guard.other_frame.max(header.frame);
                }
                true
            }
            Command::Disconnect => {
                self.transition_to_terminal(guard);
                false
            }
            Command::Pause => {
                guard.remote_paused = true;
                true
            }
            Command::Resume => {
                guard.remote_paused = false;
                true
            }
            Command::Keepalive => true,
            _ => true,
        }
    }

    fn handle_peer_gone(&self, guard: &mut Inner) {
        warn!(self.log, "netplay peer gone"; "phase" => ?guard.phase);
        self.transition_to_terminal(guard);
    }

    fn transition_to_terminal(&self, guard: &mut Inner) {
        if guard.role == Role::Host {
            guard.stream = None;
            guard.phase = Phase::Waiting;
            guard.status_message = "Remote disconnected, waiting for a new client".to_string();

            if let Some(running) = guard.listener_running.take() {
                running.store(false, Ordering::SeqCst);
            }

            let port = guard.port;
            let game_name = guard.game_name.clone();
            let game_crc = guard.game_crc;
            guard.role = Role::Off;

            // Restart broadcasting for a new client. The caller already
            // holds the lock, so we spawn a fresh listener directly rather
            // than re-entering start_host (which would deadlock on it).
            let listener = net::create_listen_socket(port);
            if let Ok(listener) = listener {
                let _ = listener.set_nonblocking(true);
                let (tx, rx) = mpsc::channel();
                let running = std::sync::Arc::new(AtomicBool::new(true));
                guard.role = Role::Host;
                guard.accept_rx = Some(rx);
                guard.listener_running = Some(running.clone());
                let log = self.log.new(o!("role" => "host"));
                spawn_listener_thread(listener, game_name, game_crc, port, running, tx, log);
            }
        } else {
            guard.stream = None;
            guard.phase = Phase::Disconnected;
            guard.status_message = "Disconnected".to_string();
        }
    }
}

/// The host always occupies P1 and the client always occupies P2 (§8.1,
/// §8.4 scenario 1) -- a fixed global assignment, not "whoever wrote it
/// locally", so both peers' frame buffers agree byte-for-byte.
fn local_player_slot(role: Role) -> Player {
    if role == Role::Host {
        Player::P1
    } else {
        Player::P2
    }
}

fn remote_player_slot(role: Role) -> Player {
    if role == Role::Host {
        Player::P2
    } else {
        Player::P1
    }
}

fn finish_sync(guard: &mut Inner) {
    guard.frames.seed_zero(INPUT_LATENCY);
    guard.run_frame = 0;
    guard.self_frame = INPUT_LATENCY;
    guard.self_frame_sent = false;
    guard.phase = Phase::Playing;
    guard.status_message = "Playing".to_string();
}

fn spawn_listener_thread(
    listener: TcpListener,
    game_name: String,
    game_crc: u32,
    port: u16,
    running: std::sync::Arc<AtomicBool>,
    tx: mpsc::Sender<TcpStream>,
    log: Logger,
) {
    thread::spawn(move || {
        let mut announcer = match Announcer::new(DISCOVERY_PORT, RESPONSE_MAGIC, PROTOCOL_VERSION) {
            Ok(announcer) => announcer,
            Err(_) => return,
        };

        while running.load(Ordering::SeqCst) {
            let _ = announcer.tick(Instant::now(), game_crc, port, &game_name, "");

            match listener.accept() {
                Ok((stream, _)) => {
                    debug!(log, "accepted netplay client");
                    let _ = tx.send(stream);
                    return;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => return,
            }
        }
    });
}

