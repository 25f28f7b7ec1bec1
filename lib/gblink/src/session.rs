//! The GB Link orchestrator (§4.5): programs the core's own TCP link
//! through its option interface and infers connection status by scanning
//! the core's log lines. No packet parsing happens in this crate.

use crate::protocol::{self, IP_DIGIT_COUNT};
use indexmap::IndexMap;
use netcommon::discovery::{Announcer, DiscoveredHost, Scanner};
use netcommon::logging::{debug, info, o, Logger};
use netcommon::{ErrorType, NetworkError, NetworkResult};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DISCOVERY_PORT: u16 = 56421;
pub const TCP_PORT: u16 = 56400;
pub const RESPONSE_MAGIC: u32 = 0x4742_4c52; // 'GBLR'
pub const PROTOCOL_VERSION: u32 = 1;

/// Substrings the core's log lines are scanned for (§4.5). A real core's
/// exact wording lives outside this crate; frontends adapt these by
/// constructing a [`Session`] with [`Session::with_log_phrases`].
#[derive(Debug, Clone)]
pub struct LogPhrases {
    pub connected: Vec<String>,
    pub disconnected: Vec<String>,
}

impl Default for LogPhrases {
    fn default() -> LogPhrases {
        LogPhrases {
            connected: vec!["link connected".to_string(), "serial: connection established".to_string()],
            disconnected: vec!["link disconnected".to_string(), "serial: connection lost".to_string()],
        }
    }
}

/// The core option batch interface (§6.3's "one option-batch boundary per
/// logical change"): a frontend setter surface this crate drives, never
/// implements.
pub trait GbCoreOptions {
    fn begin_option_batch(&mut self);
    fn set_option(&mut self, name: &str, value: &str);
    fn end_option_batch(&mut self);
    /// Runs one core frame with video suppressed so `check_variables`
    /// picks up the batch and the core's internal transport reacts.
    fn force_option_update(&mut self);
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
    Connected,
    Disconnected,
}

struct Inner {
    role: Role,
    phase: Phase,
    status_message: String,
    log_phrases: LogPhrases,
    discovery_running: Option<Arc<AtomicBool>>,
}

impl Inner {
    fn fresh(log_phrases: LogPhrases) -> Inner {
        Inner {
            role: Role::Off,
            phase: Phase::Off,
            status_message: "Off".to_string(),
            log_phrases,
            discovery_running: None,
        }
    }
}

/// Guarded by a re-entrant mutex: `observe_log_line` (a status reader) is
/// invoked from the same call stack as option-write paths in real
/// frontends, so a plain `Mutex` would deadlock (§5's documented
/// accommodation).
pub struct Session {
    inner: ReentrantMutex<RefCell<Inner>>,
    log: Logger,
}

impl Session {
    pub fn new(log: Logger) -> Session {
        Session {
            inner: ReentrantMutex::new(RefCell::new(Inner::fresh(LogPhrases::default()))),
            log,
        }
    }

    pub fn with_log_phrases(log: Logger, log_phrases: LogPhrases) -> Session {
        Session {
            inner: ReentrantMutex::new(RefCell::new(Inner::fresh(log_phrases))),
            log,
        }
    }

    pub fn role(&self) -> Role {
        self.inner.lock().borrow().role
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().borrow().phase
    }

    pub fn status(&self) -> String {
        self.inner.lock().borrow().status_message.clone()
    }

    /// Programs the host role: `link_mode := "Network Server"`,
    /// `link_network_port := 56400`, then starts UDP discovery broadcast.
    pub fn start_host(&self, core: &mut dyn GbCoreOptions, game_name: &str) -> NetworkResult<()> {
        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            if inner.role != Role::Off {
                return Err(NetworkError::Fatal(ErrorType::AlreadySessionActive));
            }
            inner.role = Role::Host;
            inner.phase = Phase::Waiting;
            inner.status_message = format!("Hosting on {}:{}", netcommon::net::get_local_ipv4(), TCP_PORT);
        }

        core.begin_option_batch();
        core.set_option(protocol::OPTION_LINK_MODE, protocol::LINK_MODE_SERVER);
        core.set_option(protocol::OPTION_LINK_NETWORK_PORT, &TCP_PORT.to_string());
        core.end_option_batch();
        core.force_option_update();

        let running = Arc::new(AtomicBool::new(true));
        guard.borrow_mut().discovery_running = Some(running.clone());
        let log = self.log.new(o!("role" => "host"));
        spawn_discovery_thread(running, TCP_PORT, game_name.to_string(), log);

        info!(self.log, "gblink host programmed"; "port" => TCP_PORT);
        Ok(())
    }

    /// Programs the client role: `link_mode := "Network Client"` plus the
    /// 12 IP-digit options, stops discovery (the spec requires UDP
    /// sockets closed on connect).
    pub fn connect(&self, core: &mut dyn GbCoreOptions, host_ip: Ipv4Addr) -> NetworkResult<()> {
        let digits = protocol::encode_ip_digits(host_ip)?;

        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            if inner.role != Role::Off {
                return Err(NetworkError::Fatal(ErrorType::AlreadySessionActive));
            }
            inner.role = Role::Client;
            inner.status_message = format!("Connecting to {}", host_ip);
        }

        core.begin_option_batch();
        core.set_option(protocol::OPTION_LINK_MODE, protocol::LINK_MODE_CLIENT);
        for (index, digit) in digits.iter().enumerate() {
            core.set_option(&protocol::ip_digit_option(index), &digit.to_string());
        }
        core.end_option_batch();
        core.force_option_update();

        info!(self.log, "gblink client programmed"; "host" => %host_ip);
        Ok(())
    }

    /// Writes `link_mode := "Not Connected"` and resets all 12 digit
    /// options to `"0"`, stops discovery broadcast if running.
    pub fn disconnect(&self, core: &mut dyn GbCoreOptions) {
        let guard = self.inner.lock();
        let was_host = {
            let mut inner = guard.borrow_mut();
            if let Some(running) = inner.discovery_running.take() {
                running.store(false, Ordering::SeqCst);
            }
            let was_host = inner.role == Role::Host;
            *inner = Inner::fresh(inner.log_phrases.clone());
            inner.status_message = "Disconnected".to_string();
            was_host
        };
        drop(guard);

        core.begin_option_batch();
        core.set_option(protocol::OPTION_LINK_MODE, protocol::LINK_MODE_OFF);
        for index in 0..IP_DIGIT_COUNT {
            core.set_option(&protocol::ip_digit_option(index), "0");
        }
        core.end_option_batch();
        core.force_option_update();

        debug!(self.log, "gblink disconnected"; "was_host" => was_host);
    }

    /// Feeds one core log line through the connection-status scanner
    /// (§4.5's "hooked core log callback"). Safe to call from the same
    /// call stack as `start_host`/`connect` thanks to the re-entrant
    /// mutex.
    pub fn observe_log_line(&self, line: &str) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        if inner.role == Role::Off {
            return;
        }

        let lowercase = line.to_ascii_lowercase();
        if inner.log_phrases.connected.iter().any(|phrase| lowercase.contains(phrase.as_str())) {
            inner.phase = Phase::Connected;
            inner.status_message = "Connected".to_string();
        } else if inner.log_phrases.disconnected.iter().any(|phrase| lowercase.contains(phrase.as_str())) {
            inner.phase = if inner.role == Role::Host { Phase::Waiting } else { Phase::Disconnected };
            inner.status_message = if inner.role == Role::Host {
                "Remote disconnected, waiting for a new client".to_string()
            } else {
                "Disconnected".to_string()
            };
        }
    }

    pub fn scan_hosts(duration: Duration) -> Vec<DiscoveredHost> {
        let deadline = Instant::now() + duration;
        let scanner = match Scanner::new(DISCOVERY_PORT, RESPONSE_MAGIC, 16) {
            Ok(scanner) => scanner,
            Err(_) => return Vec::new(),
        };

        let mut hosts: IndexMap<Ipv4Addr, DiscoveredHost> = IndexMap::new();
        while Instant::now() < deadline {
            scanner.poll(&mut hosts);
            thread::sleep(Duration::from_millis(50));
        }

        hosts.into_values().collect()
    }
}

fn spawn_discovery_thread(running: Arc<AtomicBool>, tcp_port: u16, game_name: String, log: Logger) {
    thread::spawn(move || {
        let mut announcer = match Announcer::new(DISCOVERY_PORT, RESPONSE_MAGIC, PROTOCOL_VERSION) {
            Ok(announcer) => announcer,
            Err(_) => return,
        };

        while running.load(Ordering::SeqCst) {
            let _ = announcer.tick(Instant::now(), 0, tcp_port, &game_name, "");
            thread::sleep(Duration::from_millis(200));
        }

        debug!(log, "gblink discovery thread stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcommon::logging;

    #[derive(Default)]
    struct RecordingCore {
        options: Vec<(String, String)>,
        batch_depth: i32,
        force_updates: u32,
    }

    impl GbCoreOptions for RecordingCore {
        fn begin_option_batch(&mut self) {
            self.batch_depth += 1;
        }

        fn set_option(&mut self, name: &str, value: &str) {
            self.options.push((name.to_string(), value.to_string()));
        }

        fn end_option_batch(&mut self) {
            self.batch_depth -= 1;
        }

        fn force_option_update(&mut self) {
            self.force_updates += 1;
        }
    }

    #[test]
    fn start_host_writes_server_mode_and_port_in_one_batch() {
        let session = Session::new(logging::discard());
        let mut core = RecordingCore::default();
        session.start_host(&mut core, "Pokemon Red").unwrap();

        assert_eq!(core.batch_depth, 0, "batch must be balanced");
        assert_eq!(core.force_updates, 1);
        assert!(core.options.contains(&(protocol::OPTION_LINK_MODE.to_string(), protocol::LINK_MODE_SERVER.to_string())));
        assert!(core
            .options
            .contains(&(protocol::OPTION_LINK_NETWORK_PORT.to_string(), TCP_PORT.to_string())));
        assert_eq!(session.phase(), Phase::Waiting);

        session.disconnect(&mut core);
    }

    #[test]
    fn connect_writes_twelve_digit_options_plus_client_mode() {
        let session = Session::new(logging::discard());
        let mut core = RecordingCore::default();
        session.connect(&mut core, Ipv4Addr::new(192, 168, 0, 4)).unwrap();

        let digit_options: Vec<_> = core.options.iter().filter(|(name, _)| name.starts_with("link_network_ip_digit_")).collect();
        assert_eq!(digit_options.len(), IP_DIGIT_COUNT);
        assert!(core.options.contains(&(protocol::OPTION_LINK_MODE.to_string(), protocol::LINK_MODE_CLIENT.to_string())));
    }

    #[test]
    fn connecting_to_the_unspecified_address_is_rejected_before_any_option_write() {
        let session = Session::new(logging::discard());
        let mut core = RecordingCore::default();
        let err = session.connect(&mut core, Ipv4Addr::UNSPECIFIED).unwrap_err();

        assert_eq!(err, NetworkError::Fatal(ErrorType::InvalidArgument));
        assert!(core.options.is_empty(), "no options should be written on a rejected connect");
    }

    #[test]
    fn log_line_scan_drives_connected_and_disconnected_phases() {
        let session = Session::new(logging::discard());
        let mut core = RecordingCore::default();
        session.start_host(&mut core, "Pokemon Red").unwrap();

        session.observe_log_line("info: serial: connection established with peer");
        assert_eq!(session.phase(), Phase::Connected);

        session.observe_log_line("warn: serial: connection lost, resetting");
        assert_eq!(session.phase(), Phase::Waiting, "host bounces back to waiting, not disconnected");

        session.disconnect(&mut core);
    }

    #[test]
    fn disconnect_resets_link_mode_and_all_digit_options() {
        let session = Session::new(logging::discard());
        let mut core = RecordingCore::default();
        session.connect(&mut core, Ipv4Addr::new(10, 0, 0, 1)).unwrap();

        core.options.clear();
        session.disconnect(&mut core);

        assert!(core.options.contains(&(protocol::OPTION_LINK_MODE.to_string(), protocol::LINK_MODE_OFF.to_string())));
        let zeroed: Vec<_> = core.options.iter().filter(|(name, value)| name.starts_with("link_network_ip_digit_") && value == "0").collect();
        assert_eq!(zeroed.len(), IP_DIGIT_COUNT);
        assert_eq!(session.role(), Role::Off);
    }

    #[test]
    fn observe_log_line_is_reentrant_with_option_write_paths() {
        // Exercises the very reason this crate needs a re-entrant mutex:
        // a status reader called from inside the same call stack as an
        // option-write path must not deadlock.
        let session = Session::new(logging::discard());
        let mut core = RecordingCore::default();
        session.start_host(&mut core, "Pokemon Red").unwrap();

        let guard = session.inner.lock();
        session.observe_log_line("serial: connection established");
        drop(guard);

        assert_eq!(session.phase(), Phase::Connected);
        session.disconnect(&mut core);
    }
}
