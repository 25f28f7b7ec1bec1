use gblink::{GbCoreOptions, Phase, Role, Session};
use netcommon::logging;
use std::net::Ipv4Addr;

#[derive(Default)]
struct RecordingCore {
    options: Vec<(String, String)>,
    force_updates: u32,
}

impl GbCoreOptions for RecordingCore {
    fn begin_option_batch(&mut self) {}

    fn set_option(&mut self, name: &str, value: &str) {
        self.options.push((name.to_string(), value.to_string()));
    }

    fn end_option_batch(&mut self) {}

    fn force_option_update(&mut self) {
        self.force_updates += 1;
    }
}

#[test]
fn host_then_client_then_disconnect_round_trip() {
    let host = Session::new(logging::discard());
    let mut host_core = RecordingCore::default();
    host.start_host(&mut host_core, "Tetris").unwrap();
    assert_eq!(host.role(), Role::Host);
    assert_eq!(host.phase(), Phase::Waiting);

    host.observe_log_line("serial: connection established");
    assert_eq!(host.phase(), Phase::Connected);

    host.disconnect(&mut host_core);
    assert_eq!(host.role(), Role::Off);

    let client = Session::new(logging::discard());
    let mut client_core = RecordingCore::default();
    client.connect(&mut client_core, Ipv4Addr::new(192, 168, 1, 23)).unwrap();
    assert_eq!(client.role(), Role::Client);

    let digit_count = client_core.options.iter().filter(|(name, _)| name.starts_with("link_network_ip_digit_")).count();
    assert_eq!(digit_count, 12);

    client.observe_log_line("serial: connection lost");
    assert_eq!(client.phase(), Phase::Disconnected, "a client (not host) never bounces back");
}

#[test]
fn starting_a_second_session_while_already_active_is_rejected() {
    let session = Session::new(logging::discard());
    let mut core = RecordingCore::default();
    session.start_host(&mut core, "Tetris").unwrap();

    let err = session.connect(&mut core, Ipv4Addr::new(10, 0, 0, 2)).unwrap_err();
    assert!(matches!(err, netcommon::NetworkError::Fatal(netcommon::ErrorType::AlreadySessionActive)));

    session.disconnect(&mut core);
}
