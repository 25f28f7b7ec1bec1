//! The GBA Link phase machine and steady-state pipeline (§4.4).

use crate::pending_queue::PendingQueue;
use crate::protocol::{self, Command, Header, HEADER_SIZE, HOST_CLIENT_ID, PEER_CLIENT_ID};
use crate::stream_buffer::StreamBuffer;
use netcommon::discovery::{Announcer, QueryResponder};
use netcommon::logging::{debug, info, o, warn, Logger};
use netcommon::net::{self, TcpConfig};
use netcommon::{ErrorType, NetworkError, NetworkResult};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

pub const DISCOVERY_PORT: u16 = 55438;
pub const TCP_PORT: u16 = 55437;
pub const QUERY_MAGIC: u32 = 0x4742_4451; // 'GBDQ'
pub const RESPONSE_MAGIC: u32 = 0x4742_4452; // 'GBDR'
pub const PROTOCOL_VERSION: u32 = 1;

const STREAM_BUFFER_CAPACITY: usize = 8192;
const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(50);
const HANDSHAKE_ATTEMPTS: usize = 100;
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_PACKETS_PER_FRAME: usize = 64;
const SEND_RETRY_BUDGET: Duration = Duration::from_secs(2);
const SEND_RETRY_SLEEP: Duration = Duration::from_millis(1);

/// The core's callback quadruple, minus `start`'s send/poll bridges: in
/// this transport the session itself exposes [`Session::send`] and is
/// pumped once per emulator frame, so the core never needs a bridge handed
/// to it.
pub trait GbaLinkCore {
    /// The core's own link-mode setting, compared against the peer's
    /// during handshake (§4.4.3 step 3).
    fn link_mode(&self) -> String;
    fn connected(&mut self, peer_id: u16);
    fn receive(&mut self, payload: &[u8], peer_id: u16);
    fn disconnected(&mut self, peer_id: u16);
    fn stop(&mut self);
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
    Connected,
    Error,
    Disconnected,
}

/// Outcome of a successful TCP-level handshake.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandshakeOutcome {
    Ready,
    NeedsReload,
}

struct Inner {
    role: Role,
    phase: Phase,
    peer_id: u16,
    status_message: String,
    port: u16,

    stream: Option<TcpStream>,
    listener_running: Option<std::sync::Arc<AtomicBool>>,
    accept_rx: Option<Receiver<TcpStream>>,

    recv_buffer: StreamBuffer,
    pending: PendingQueue,

    last_packet_sent: Instant,
    last_packet_received: Instant,
    frame_count: u64,
    pending_host_connected: bool,
    pending_disconnect_notify: bool,
}

impl Inner {
    fn fresh() -> Inner {
        let now = Instant::now();
        Inner {
            role: Role::Off,
            phase: Phase::Off,
            peer_id: PEER_CLIENT_ID,
            status_message: "Off".to_string(),
            port: TCP_PORT,
            stream: None,
            listener_running: None,
            accept_rx: None,
            recv_buffer: StreamBuffer::new(STREAM_BUFFER_CAPACITY),
            pending: PendingQueue::default(),
            last_packet_sent: now,
            last_packet_received: now,
            frame_count: 0,
            pending_host_connected: false,
            pending_disconnect_notify: false,
        }
    }
}

fn gbalink_tcp_config() -> TcpConfig {
    TcpConfig {
        buffer_size: 32 * 1024,
        recv_timeout: Some(Duration::from_millis(1)),
        keepalive: true,
    }
}

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

    pub fn overflow_count(&self) -> u64 {
        self.inner.lock().unwrap().pending.overflow_count()
    }

    pub fn start_host(&self, port: u16) -> NetworkResult<()> {
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
        guard.accept_rx = Some(rx);
        guard.listener_running = Some(running.clone());
        guard.status_message = format!("Hosting on {}:{}", net::get_local_ipv4(), port);

        let log = self.log.new(o!("role" => "host"));
        spawn_listener_thread(listener, port, running, tx, log);

        Ok(())
    }

    /// Accepts a pending TCP client, performs the host side of the
    /// handshake (§4.4.3 steps 1-2), and transitions to `Connected`.
    pub fn accept_pending(&self, link_mode: &str) -> NetworkResult<bool> {
        // The handshake poll below can take up to HANDSHAKE_ATTEMPTS *
        // HANDSHAKE_POLL_INTERVAL; the mutex is released for its duration
        // so `phase()`/`status()` stay responsive from other threads.
        let stream = {
            let guard = self.inner.lock().unwrap();
            if guard.phase != Phase::Waiting {
                return Ok(false);
            }

            match &guard.accept_rx {
                Some(rx) => match rx.try_recv() {
                    Ok(stream) => stream,
                    Err(_) => return Ok(false),
                },
                None => return Ok(false),
            }
        };

        net::configure_tcp_socket(&stream, &gbalink_tcp_config())?;
        stream.set_nonblocking(true)?;

        let mut handshake_buf = StreamBuffer::new(STREAM_BUFFER_CAPACITY);
        if !wait_for_ready(&stream, &mut handshake_buf, HANDSHAKE_ATTEMPTS, self.log.clone())? {
            let _ = protocol::write_packet(&stream, Command::Disconnect, HOST_CLIENT_ID, &[]);
            self.inner.lock().unwrap().status_message = "Handshake timed out".to_string();
            return Err(NetworkError::Fatal(ErrorType::HandshakeTimeout));
        }

        let mut payload = link_mode.as_bytes().to_vec();
        payload.push(0);
        protocol::write_packet(&stream, Command::Ready, HOST_CLIENT_ID, &payload)?;

        let now = Instant::now();
        let mut guard = self.inner.lock().unwrap();
        guard.stream = Some(stream);
        guard.recv_buffer = handshake_buf;
        guard.peer_id = PEER_CLIENT_ID;
        guard.phase = Phase::Connected;
        guard.last_packet_sent = now;
        guard.last_packet_received = now;
        guard.pending_host_connected = true;
        guard.status_message = "Client connected".to_string();
        info!(self.log, "gbalink client handshake complete");

        Ok(true)
    }

    /// Dials a host and performs the client side of the handshake
    /// (§4.4.3 steps 3-4).
    pub fn connect(&self, host_ip: Ipv4Addr, port: u16, link_mode: &str) -> NetworkResult<HandshakeOutcome> {
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.role != Role::Off {
                return Err(NetworkError::Fatal(ErrorType::AlreadySessionActive));
            }
            guard.role = Role::Client;
            guard.phase = Phase::Connecting;
            guard.status_message = format!("Connecting to {}:{}", host_ip, port);
        }

        let addr: SocketAddr = SocketAddrV4::new(host_ip, port).into();
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))?;
        net::configure_tcp_socket(&stream, &gbalink_tcp_config())?;
        stream.set_nonblocking(true)?;

        protocol::write_packet(&stream, Command::Ready, HOST_CLIENT_ID, &[])?;

        let mut handshake_buf = StreamBuffer::new(STREAM_BUFFER_CAPACITY);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut host_link_mode = None;

        while Instant::now() < deadline {
            handshake_buf.maybe_compact();
            match stream.peek_into(&mut handshake_buf) {
                Ok(_) => {}
                Err(NetworkError::Wait) => {
                    thread::sleep(HANDSHAKE_POLL_INTERVAL);
                    continue;
                }
                Err(err) => return Err(err),
            }

            if let Some((header, payload)) = handshake_buf.try_take_packet()? {
                if header.cmd == Command::Ready {
                    let text = String::from_utf8_lossy(&payload);
                    host_link_mode = Some(text.trim_end_matches('\0').to_string());
                    break;
                }
            }

            thread::sleep(HANDSHAKE_POLL_INTERVAL);
        }

        let host_link_mode = host_link_mode.ok_or(NetworkError::Fatal(ErrorType::HandshakeTimeout))?;

        let mut guard = self.inner.lock().unwrap();
        let now = Instant::now();
        guard.stream = Some(stream);
        guard.recv_buffer = handshake_buf;
        guard.peer_id = HOST_CLIENT_ID;
        guard.phase = Phase::Connected;
        guard.last_packet_sent = now;
        guard.last_packet_received = now;
        guard.status_message = format!("Connected to {}", host_ip);

        if host_link_mode != link_mode {
            guard.status_message = "Link mode mismatch, reload required".to_string();
            Ok(HandshakeOutcome::NeedsReload)
        } else {
            Ok(HandshakeOutcome::Ready)
        }
    }

    /// The per-frame pipeline (§4.4.4): heartbeat, receive drain, core
    /// delivery. Must be called once per emulator frame while `Connected`.
    pub fn pump(&self, core: &mut dyn GbaLinkCore) {
        let mut guard = self.inner.lock().unwrap();

        if guard.pending_host_connected {
            guard.pending_host_connected = false;
            let peer_id = guard.peer_id;
            drop(guard);
            core.connected(peer_id);
            guard = self.inner.lock().unwrap();
        }

        if guard.phase != Phase::Connected {
            return;
        }

        let now = Instant::now();
        guard.frame_count += 1;

        if guard.role == Role::Host && now.duration_since(guard.last_packet_sent) >= HEARTBEAT_INTERVAL {
            if let Some(stream) = guard.stream.as_ref() {
                let _ = protocol::write_packet(stream, Command::Heartbeat, HOST_CLIENT_ID, &[]);
            }
            guard.last_packet_sent = now;
        }

        let mut packets_taken = 0usize;
        'read_loop: while packets_taken < MAX_PACKETS_PER_FRAME {
            let stream = match guard.stream.as_ref() {
                Some(stream) => stream.try_clone(),
                None => break,
            };
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };

            guard.recv_buffer.maybe_compact();
            match read_into_buffer(&stream, &mut guard.recv_buffer) {
                Ok(0) => break,
                Ok(_) => {}
                Err(NetworkError::Wait) => break,
                Err(_) => {
                    self.mark_disconnect(&mut guard);
                    break;
                }
            }

            // A single read can land an entire burst; drain every complete
            // packet it produced before going back to the socket, or the
            // rest would sit in recv_buffer until the next lucky read.
            while packets_taken < MAX_PACKETS_PER_FRAME {
                match guard.recv_buffer.try_take_packet() {
                    Ok(Some((header, payload))) => {
                        guard.last_packet_received = now;
                        packets_taken += 1;
                        if !self.dispatch(&mut guard, header, payload) {
                            break 'read_loop;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        // try_take_packet already reset the buffer on a
                        // protocol error; keep polling for the next frame.
                        break;
                    }
                }
            }
        }

        if guard.pending_disconnect_notify {
            guard.pending_disconnect_notify = false;
            let peer_id = guard.peer_id;
            drop(guard);
            core.disconnected(peer_id);
            core.stop();
            return;
        }

        if guard.phase == Phase::Connected && now.duration_since(guard.last_packet_received) > IDLE_TIMEOUT {
            self.mark_disconnect(&mut guard);
            if guard.pending_disconnect_notify {
                guard.pending_disconnect_notify = false;
                let peer_id = guard.peer_id;
                drop(guard);
                core.disconnected(peer_id);
                core.stop();
                return;
            }
        }

        let peer_id = guard.peer_id;
        let mut delivered = 0;
        while delivered < MAX_PACKETS_PER_FRAME {
            let payload = match guard.pending.pop() {
                Some(payload) => payload,
                None => break,
            };
            drop(guard);
            core.receive(&payload, peer_id);
            guard = self.inner.lock().unwrap();
            delivered += 1;
        }
    }

    /// Sends an opaque `SIO_DATA` payload to the peer. Retries on a full
    /// send buffer, draining the receive side meanwhile to avoid a
    /// mutual-deadlock with the peer's own blocked send (§4.4.6).
    pub fn send(&self, payload: &[u8]) -> NetworkResult<()> {
        if payload.len() > protocol::MAX_PAYLOAD_SIZE {
            return Err(NetworkError::Fatal(ErrorType::InvalidArgument));
        }

        let mut guard = self.inner.lock().unwrap();
        if guard.phase != Phase::Connected {
            return Err(NetworkError::Fatal(ErrorType::PeerDisconnected));
        }

        let peer_id = guard.peer_id;
        let stream = guard.stream.as_ref().ok_or(NetworkError::Fatal(ErrorType::PeerDisconnected))?.try_clone()?;

        let mut wire = Vec::with_capacity(HEADER_SIZE + payload.len());
        Header {
            cmd: Command::SioData,
            size: payload.len() as u16,
            client_id: peer_id,
        }
        .write(&mut wire)?;
        wire.extend_from_slice(payload);

        send_all(&stream, &wire, &mut guard.recv_buffer)?;
        guard.last_packet_sent = Instant::now();
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut guard = self.inner.lock().unwrap();
        if guard.role == Role::Off {
            return;
        }

        if let Some(stream) = guard.stream.take() {
            let _ = protocol::write_packet(&stream, Command::Disconnect, guard.peer_id, &[]);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }

        if let Some(running) = guard.listener_running.take() {
            running.store(false, Ordering::SeqCst);
        }

        let was_host = guard.role == Role::Host;
        let port = guard.port;
        *guard = Inner::fresh();

        if was_host {
            drop(guard);
            let _ = self.start_host(port);
        } else {
            guard.status_message = "Disconnected".to_string();
        }
    }

    fn dispatch(&self, guard: &mut Inner, header: Header, payload: Vec<u8>) -> bool {
        match header.cmd {
            Command::SioData => {
                guard.pending.push(payload);
                true
            }
            Command::Heartbeat | Command::Ping | Command::Pong => true,
            Command::Disconnect => {
                self.mark_disconnect(guard);
                false
            }
            Command::Ready => true,
        }
    }

    fn mark_disconnect(&self, guard: &mut Inner) {
        warn!(self.log, "gbalink peer disconnected"; "role" => ?guard.role);
        guard.stream = None;
        guard.pending_disconnect_notify = true;

        if guard.role == Role::Host {
            guard.phase = Phase::Waiting;
            guard.status_message = "Remote disconnected, waiting for a new client".to_string();

            if let Some(running) = guard.listener_running.take() {
                running.store(false, Ordering::SeqCst);
            }

            let port = guard.port;
            guard.role = Role::Off;

            if let Ok(listener) = net::create_listen_socket(port) {
                let _ = listener.set_nonblocking(true);
                let (tx, rx) = mpsc::channel();
                let running = std::sync::Arc::new(AtomicBool::new(true));
                guard.role = Role::Host;
                guard.accept_rx = Some(rx);
                guard.listener_running = Some(running.clone());
                let log = self.log.new(o!("role" => "host"));
                spawn_listener_thread(listener, port, running, tx, log);
            }
        } else {
            guard.phase = Phase::Disconnected;
            guard.status_message = "Disconnected".to_string();
        }
    }
}

fn read_into_buffer(stream: &TcpStream, buffer: &mut StreamBuffer) -> NetworkResult<usize> {
    let tail = buffer.write_slice();
    if tail.is_empty() {
        return Ok(0);
    }

    let mut stream = stream;
    match std::io::Read::read(&mut stream, tail) {
        Ok(0) => Err(NetworkError::Fatal(ErrorType::PeerDisconnected)),
        Ok(count) => {
            buffer.commit_write(count);
            Ok(count)
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => Err(NetworkError::Wait),
        Err(err) => Err(err.into()),
    }
}

/// Used only during the handshake poll loop, where the buffer hasn't yet
/// been promoted into the session's `Inner`.
trait PeekInto {
    fn peek_into(&self, buffer: &mut StreamBuffer) -> NetworkResult<usize>;
}

impl PeekInto for TcpStream {
    fn peek_into(&self, buffer: &mut StreamBuffer) -> NetworkResult<usize> {
        read_into_buffer(self, buffer)
    }
}

fn wait_for_ready(stream: &TcpStream, buffer: &mut StreamBuffer, attempts: usize, log: Logger) -> NetworkResult<bool> {
    for _ in 0..attempts {
        buffer.maybe_compact();
        match read_into_buffer(stream, buffer) {
            Ok(_) => {}
            Err(NetworkError::Wait) => {
                thread::sleep(HANDSHAKE_POLL_INTERVAL);
                continue;
            }
            Err(err) => return Err(err),
        }

        if let Some((header, _)) = buffer.try_take_packet()? {
            if header.cmd == Command::Ready {
                debug!(log, "gbalink handshake READY received");
                return Ok(true);
            }
        }

        thread::sleep(HANDSHAKE_POLL_INTERVAL);
    }

    Ok(false)
}

/// `send_all` with the §4.4.6 deadlock-avoidance rule: while blocked on a
/// full send buffer, keep draining the receive side so the peer (which may
/// itself be blocked on a full buffer waiting for us to read) can proceed.
fn send_all(stream: &TcpStream, wire: &[u8], recv_buffer: &mut StreamBuffer) -> NetworkResult<()> {
    let mut written = 0;
    let deadline = Instant::now() + SEND_RETRY_BUDGET;

    while written < wire.len() {
        let mut stream_ref = stream;
        match std::io::Write::write(&mut stream_ref, &wire[written..]) {
            Ok(0) => return Err(NetworkError::Fatal(ErrorType::PeerDisconnected)),
            Ok(count) => written += count,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(NetworkError::Fatal(ErrorType::PeerDisconnected));
                }
                recv_buffer.maybe_compact();
                let _ = read_into_buffer(stream, recv_buffer);
                thread::sleep(SEND_RETRY_SLEEP);
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

fn spawn_listener_thread(listener: TcpListener, port: u16, running: std::sync::Arc<AtomicBool>, tx: mpsc::Sender<TcpStream>, log: Logger) {
    thread::spawn(move || {
        let mut announcer = match Announcer::new(DISCOVERY_PORT, RESPONSE_MAGIC, PROTOCOL_VERSION) {
            Ok(announcer) => announcer,
            Err(_) => return,
        };
        let responder = QueryResponder::new(DISCOVERY_PORT, QUERY_MAGIC, RESPONSE_MAGIC, PROTOCOL_VERSION).ok();

        while running.load(Ordering::SeqCst) {
            let _ = announcer.tick(Instant::now(), 0, port, "", "");
            if let Some(responder) = responder.as_ref() {
                let _ = responder.poll_and_respond(0, port, "", "");
            }

            match listener.accept() {
                Ok((stream, _)) => {
                    debug!(log, "accepted gbalink client");
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
