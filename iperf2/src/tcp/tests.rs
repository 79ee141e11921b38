use std::vec::Vec;
use core::net::SocketAddr;

use super::*;
use crate::config::{Config, TcpClient};
use crate::session::{Protocol, Report};
use crate::stack::mock::Mock;
use crate::time::Duration;
use crate::wire::{Amount, Flags};

fn engine(config: Config) -> Iperf<Vec<Report>> {
    Iperf::new(config, Vec::new())
}

fn server() -> SocketAddr {
    "192.168.0.2:5001".parse().unwrap()
}

fn peer() -> SocketAddr {
    "192.168.0.2:40000".parse().unwrap()
}

fn any() -> SocketAddr {
    "0.0.0.0:5001".parse().unwrap()
}

fn record(amount: Amount, mode: Mode) -> [u8; RECORD_LEN] {
    let mut settings = Settings {
        num_threads: 1,
        remote_port: 5001,
        amount,
        ..Settings::default()
    };
    mode.request(&mut settings, false);
    settings.stream_record()
}

/// Start a server and accept one connection from `peer`.
fn accepted(iperf: &mut Iperf<Vec<Report>>, stack: &mut Mock) -> (SessionId, SessionId, TcpHandle) {
    let listener = iperf.start_tcp_server(stack, any()).unwrap();
    let listening = stack.tcp_of(listener).unwrap();
    let handle = stack.incoming(listening, peer());
    let conn = iperf.on_tcp_accept(stack, listener, handle, peer()).unwrap();
    (listener, conn, handle)
}

/// Acknowledge everything until the session closes.
fn drain(iperf: &mut Iperf<Vec<Report>>, stack: &mut Mock, id: SessionId, handle: TcpHandle) {
    for _ in 0..1000 {
        if !iperf.sessions().contains(id) {
            return;
        }
        let len = stack.ack(handle);
        iperf.on_tcp_sent(stack, id, len);
    }
    panic!("session {} never finished", id);
}

#[test]
fn client_byte_limited() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let client = TcpClient::new(server()).with_amount(Amount::Bytes(65536));

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    let handle = stack.tcp_of(id).unwrap();
    assert_eq!(stack.tcp_socket(handle).remote, Some(server()));
    assert!(stack.tcp_socket(handle).writes.is_empty());

    iperf.on_tcp_connected(&mut stack, id, Ok(()));
    assert_eq!(stack.tcp_socket(handle).writes, [(RECORD_LEN, false)]);

    drain(&mut iperf, &mut stack, id, handle);
    let socket = stack.tcp_socket(handle);
    assert!(socket.closed);

    let sent = Settings::parse(settings::new_checked(&socket.stream[..]).unwrap()).unwrap();
    assert_eq!(sent.amount, Amount::Bytes(65536));
    assert_eq!(sent.remote_port, 5001);
    assert_eq!(sent.flags, Flags::empty());
    assert_eq!(&socket.stream[RECORD_LEN..][..10], b"0123456789");

    let reports = iperf.reporter();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.session, id);
    assert_eq!(report.protocol, Protocol::Tcp);
    assert_eq!(report.outcome, Outcome::DoneClientTx);
    assert!(report.bytes >= 65536 && report.bytes < 65536 + 1460, "{}", report.bytes);
    assert_eq!(report.bytes, socket.stream.len() as u64);
    assert_eq!(report.remote, Some(server()));
    assert_eq!(report.local, socket.local);
    assert!(iperf.sessions().is_empty());
}

#[test]
fn client_time_limited() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let client = TcpClient::new(server()).with_amount(Amount::Time(100));

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    let handle = stack.tcp_of(id).unwrap();
    iperf.on_tcp_connected(&mut stack, id, Ok(()));

    for _ in 0..9 {
        stack.advance(Duration::from_millis(100));
        let len = stack.ack(handle);
        iperf.on_tcp_sent(&mut stack, id, len);
        assert!(iperf.sessions().contains(id));
    }

    stack.advance(Duration::from_millis(100));
    iperf.on_tcp_poll(&mut stack, id);
    assert!(!iperf.sessions().contains(id));

    let report = &iperf.reporter()[0];
    assert_eq!(report.outcome, Outcome::DoneClientTx);
    assert_eq!(report.duration, Duration::from_secs(1));
    assert_eq!(u64::from(report.bandwidth_kbps), report.bytes * 8 / 1000);
}

#[test]
fn settings_repeat_every_block() {
    let mut stack = Mock::new();
    stack.send_buffer = 100_000;
    let mut iperf = engine(Config::default().with_block_size(3000));
    let client = TcpClient::new(server()).with_amount(Amount::Bytes(7000));

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    let handle = stack.tcp_of(id).unwrap();
    iperf.on_tcp_connected(&mut stack, id, Ok(()));
    iperf.on_tcp_sent(&mut stack, id, 0);
    assert!(!iperf.sessions().contains(id));

    let socket = stack.tcp_socket(handle);
    assert_eq!(socket.writes[..4], [(60, false), (1400, false), (1460, false), (80, false)]);
    assert_eq!(socket.writes[4], (60, true));
    assert_eq!(socket.stream[3000..3060], socket.stream[..60]);
    assert_eq!(socket.stream[6000..6060], socket.stream[..60]);
    assert_eq!(&socket.stream[3060..3070], b"0123456789");
    assert_eq!(&socket.stream[2990..3000], b"0123456789");
}

#[test]
fn write_backoff() {
    let mut stack = Mock::new();
    stack.send_buffer = 60 + 1400 + 730;
    let mut iperf = engine(Config::default());
    let client = TcpClient::new(server()).with_amount(Amount::Bytes(1 << 20));

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    let handle = stack.tcp_of(id).unwrap();
    iperf.on_tcp_connected(&mut stack, id, Ok(()));
    iperf.on_tcp_sent(&mut stack, id, 0);

    let socket = stack.tcp_socket(handle);
    assert_eq!(socket.writes, [(60, false), (1400, false), (730, false)]);
    assert_eq!(socket.refused, [1460, 1460, 730]);
    assert_eq!(iperf.sessions().get(id).unwrap().bytes(), 2190);
}

#[test]
fn small_buffer_len() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let client = TcpClient::new(server())
        .with_amount(Amount::Bytes(2000))
        .with_buffer_len(500);

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    let handle = stack.tcp_of(id).unwrap();
    iperf.on_tcp_connected(&mut stack, id, Ok(()));
    iperf.on_tcp_sent(&mut stack, id, 0);

    let socket = stack.tcp_socket(handle);
    assert_eq!(socket.writes[1], (440, false));
    assert!(socket.writes[2..].iter().all(|&(len, _)| len == 500));
}

#[test]
fn connect_refused() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let id = iperf.start_tcp_client(&mut stack, &TcpClient::new(server())).unwrap();

    iperf.on_tcp_connected(&mut stack, id, Err(stack::Error::Unreachable));
    assert!(iperf.sessions().is_empty());
    assert_eq!(iperf.reporter()[0].outcome, Outcome::AbortedRemote);
}

#[test]
fn invalid_client() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let unspecified = TcpClient::new("0.0.0.0:5001".parse().unwrap());
    let no_port = TcpClient::new("192.168.0.2:0".parse().unwrap());

    assert_eq!(iperf.start_tcp_client(&mut stack, &unspecified), Err(Error::InvalidArgument));
    assert_eq!(iperf.start_tcp_client(&mut stack, &no_port), Err(Error::InvalidArgument));

    for amount in [Amount::Bytes(0x8000_0000), Amount::Time(0)] {
        let client = TcpClient::new("192.168.0.2:5001".parse().unwrap()).with_amount(amount);
        assert_eq!(iperf.start_tcp_client(&mut stack, &client), Err(Error::InvalidArgument));
    }
    assert!(stack.tcp.is_empty());
}

#[test]
fn tos() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let id = iperf.start_tcp_client(&mut stack, &TcpClient::new(server()).with_tos(0x10)).unwrap();
    let handle = stack.tcp_of(id).unwrap();
    assert_eq!(stack.tcp_socket(handle).tos, 0x10);
}

#[test]
fn server_receives() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (listener, conn, handle) = accepted(&mut iperf, &mut stack);
    assert_eq!(stack.tcp_socket(handle).owner, conn);

    let record = record(Amount::Bytes(1060), Mode::Simple);
    iperf.on_tcp_recv(&mut stack, conn, Some(&record[..20]));
    assert_eq!(iperf.sessions().get(conn).unwrap().bytes(), 0);

    let mut rest = record[20..].to_vec();
    rest.extend_from_slice(pattern::slice(0, 1000));
    iperf.on_tcp_recv(&mut stack, conn, Some(&rest));
    assert_eq!(iperf.sessions().get(conn).unwrap().bytes(), 1060);
    assert_eq!(stack.tcp_socket(handle).recved, 1060);
    assert!(stack.tcp_socket(handle).writes.is_empty());

    iperf.on_tcp_recv(&mut stack, conn, None);
    assert!(iperf.sessions().contains(listener));
    assert!(!iperf.sessions().contains(conn));
    assert!(stack.tcp_socket(handle).closed);

    let report = &iperf.reporter()[0];
    assert_eq!(report.outcome, Outcome::DoneServerRx);
    assert_eq!(report.controller, Some(listener));
    assert_eq!(report.bytes, 1060);
    assert_eq!(report.local, Some("192.168.0.1:5001".parse().unwrap()));
    assert_eq!(report.remote, Some(peer()));
}

#[test]
fn closed_during_settings() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (_, conn, _) = accepted(&mut iperf, &mut stack);

    iperf.on_tcp_recv(&mut stack, conn, Some(&record(Amount::Bytes(0), Mode::Simple)[..30]));
    iperf.on_tcp_recv(&mut stack, conn, None);
    assert_eq!(iperf.reporter()[0].outcome, Outcome::AbortedLocalDataError);
}

#[test]
fn malformed_settings() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (_, conn, _) = accepted(&mut iperf, &mut stack);

    let mut settings = Settings::default();
    settings.extend().len = -1;
    iperf.on_tcp_recv(&mut stack, conn, Some(&settings.stream_record()));
    assert!(!iperf.sessions().contains(conn));
    assert_eq!(iperf.reporter()[0].outcome, Outcome::AbortedLocalDataError);
}

#[test]
fn reverse_server() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (_, conn, handle) = accepted(&mut iperf, &mut stack);

    iperf.on_tcp_recv(&mut stack, conn, Some(&record(Amount::Bytes(4000), Mode::Reverse)));
    assert!(!iperf.sessions().contains(conn));

    let socket = stack.tcp_socket(handle);
    assert_eq!(socket.writes, [(1460, false); 3]);
    assert_eq!(&socket.stream[..10], b"0123456789");

    let report = &iperf.reporter()[0];
    assert_eq!(report.outcome, Outcome::DoneServerTx);
    assert_eq!(report.bytes, 3 * 1460);
}

#[test]
fn reverse_client_receives() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let client = TcpClient::new(server()).with_mode(Mode::Reverse);

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    let handle = stack.tcp_of(id).unwrap();
    iperf.on_tcp_connected(&mut stack, id, Ok(()));
    iperf.on_tcp_sent(&mut stack, id, RECORD_LEN);
    iperf.on_tcp_poll(&mut stack, id);

    let socket = stack.tcp_socket(handle);
    assert_eq!(socket.writes, [(RECORD_LEN, false)]);
    let sent = Settings::parse(settings::new_checked(&socket.stream[..]).unwrap()).unwrap();
    assert_eq!(Mode::of(&sent), Mode::Reverse);
    assert!(sent.flags.contains(Flags::VERSION2));

    iperf.on_tcp_recv(&mut stack, id, Some(pattern::slice(0, 1460)));
    iperf.on_tcp_recv(&mut stack, id, Some(pattern::slice(0, 540)));
    iperf.on_tcp_recv(&mut stack, id, None);

    let report = &iperf.reporter()[0];
    assert_eq!(report.outcome, Outcome::DoneClientRx);
    assert_eq!(report.bytes, 2000);
}

#[test]
fn dual_server_connects_back() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (listener, conn, _) = accepted(&mut iperf, &mut stack);

    iperf.on_tcp_recv(&mut stack, conn, Some(&record(Amount::Bytes(3000), Mode::Dual)));
    assert!(iperf.sessions().contains(conn));

    let (answer, session) = iperf.sessions().iter()
        .find(|(_, session)| session.role() == Role::Client)
        .unwrap();
    assert_eq!(session.controller(), Some(listener));
    let handle = stack.tcp_of(answer).unwrap();
    assert_eq!(stack.tcp_socket(handle).remote, Some(server()));

    // The peer's server does not expect settings.
    iperf.on_tcp_connected(&mut stack, answer, Ok(()));
    let socket = stack.tcp_socket(handle);
    assert_eq!(socket.writes, [(1460, false), (1460, false), (1460, false)]);
    assert_eq!(&socket.stream[..10], b"0123456789");
    assert!(!iperf.sessions().contains(answer));
    assert_eq!(iperf.reporter()[0].outcome, Outcome::DoneClientTx);
}

#[test]
fn tradeoff_server_answers_after_test() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (_, conn, _) = accepted(&mut iperf, &mut stack);

    iperf.on_tcp_recv(&mut stack, conn, Some(&record(Amount::Bytes(3000), Mode::Tradeoff)));
    assert_eq!(iperf.sessions().len(), 2);

    iperf.on_tcp_recv(&mut stack, conn, None);
    assert_eq!(iperf.reporter()[0].outcome, Outcome::DoneServerRx);

    let (answer, _) = iperf.sessions().iter()
        .find(|(_, session)| session.role() == Role::Client)
        .unwrap();
    let handle = stack.tcp_of(answer).unwrap();
    assert_eq!(stack.tcp_socket(handle).remote, Some(server()));
}

#[test]
fn dual_client_companion() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let client = TcpClient::new(server())
        .with_mode(Mode::Dual)
        .with_amount(Amount::Bytes(1 << 20));

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    assert_eq!(iperf.sessions().len(), 2);

    let (companion, _) = iperf.sessions().iter()
        .find(|(other, _)| *other != id)
        .unwrap();
    let listening = stack.tcp_of(companion).unwrap();
    assert!(stack.tcp_socket(listening).listening);
    assert_eq!(stack.tcp_socket(listening).local, Some("192.168.0.1:5001".parse().unwrap()));

    iperf.on_tcp_connected(&mut stack, id, Ok(()));
    let handle = stack.tcp_of(id).unwrap();
    let sent = Settings::parse(settings::new_checked(&stack.tcp_socket(handle).stream[..]).unwrap()).unwrap();
    assert_eq!(sent.flags, Flags::ANSWER_TEST | Flags::ANSWER_NOW);
    assert_eq!(sent.remote_port, 5001);

    // Only the server of our test may connect back.
    let stranger: SocketAddr = "192.168.0.3:6000".parse().unwrap();
    let refused = stack.incoming(listening, stranger);
    assert_eq!(iperf.on_tcp_accept(&mut stack, companion, refused, stranger), Err(stack::Error::Illegal));

    let back: SocketAddr = "192.168.0.2:6000".parse().unwrap();
    let incoming = stack.incoming(listening, back);
    let conn = iperf.on_tcp_accept(&mut stack, companion, incoming, back).unwrap();
    assert!(!iperf.sessions().contains(companion));
    assert!(stack.tcp_socket(listening).closed);
    assert!(iperf.reporter().is_empty());

    // Sessions of our client receive without settings.
    assert_eq!(iperf.sessions().get(conn).unwrap().controller(), Some(id));
    iperf.on_tcp_recv(&mut stack, conn, Some(pattern::slice(0, 500)));
    assert_eq!(iperf.sessions().get(conn).unwrap().bytes(), 500);

    iperf.abort(&mut stack, id);
    assert!(iperf.sessions().is_empty());
    let outcomes: Vec<_> = iperf.reporter().iter().map(|report| report.outcome).collect();
    assert_eq!(outcomes, [Outcome::AbortedLocal, Outcome::AbortedLocal]);
}

#[test]
fn tradeoff_companion_outlives_client() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let client = TcpClient::new(server()).with_mode(Mode::Tradeoff);

    let id = iperf.start_tcp_client(&mut stack, &client).unwrap();
    let (companion, _) = iperf.sessions().iter()
        .find(|(other, _)| *other != id)
        .unwrap();
    let listening = stack.tcp_of(companion).unwrap();

    let back: SocketAddr = "192.168.0.2:6000".parse().unwrap();
    let incoming = stack.incoming(listening, back);
    iperf.on_tcp_accept(&mut stack, companion, incoming, back).unwrap();
    assert!(iperf.sessions().contains(companion));
}

#[test]
fn companion_port_in_use() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let server_id = iperf.start_tcp_server(&mut stack, "192.168.0.1:5001".parse().unwrap()).unwrap();
    let client = TcpClient::new(server()).with_mode(Mode::Dual);

    assert_eq!(
        iperf.start_tcp_client(&mut stack, &client),
        Err(Error::Stack(stack::Error::InUse)));
    assert_eq!(iperf.sessions().ids(), [server_id]);
    assert!(iperf.reporter().is_empty());
    assert!(stack.tcp.values().filter(|socket| !socket.listening).all(|socket| socket.closed));
}

#[test]
fn idle_connection() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (_, conn, _) = accepted(&mut iperf, &mut stack);

    for _ in 0..9 {
        iperf.on_tcp_poll(&mut stack, conn);
    }
    iperf.on_tcp_recv(&mut stack, conn, Some(&record(Amount::Bytes(0), Mode::Simple)[..10]));
    for _ in 0..9 {
        iperf.on_tcp_poll(&mut stack, conn);
    }
    assert!(iperf.sessions().contains(conn));

    iperf.on_tcp_poll(&mut stack, conn);
    assert!(!iperf.sessions().contains(conn));
    assert_eq!(iperf.reporter()[0].outcome, Outcome::AbortedLocal);
}

#[test]
fn stack_error() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let (_, conn, handle) = accepted(&mut iperf, &mut stack);

    iperf.on_tcp_err(&mut stack, conn, stack::Error::Closed);
    assert!(!stack.tcp_socket(handle).closed);
    assert!(!stack.tcp_socket(handle).aborted);

    let report = &iperf.reporter()[0];
    assert_eq!(report.outcome, Outcome::AbortedRemote);
    assert_eq!(report.bytes, 0);
    assert_eq!(report.local, None);

    // Late events for the closed session are ignored.
    iperf.on_tcp_recv(&mut stack, conn, Some(b"late"));
    iperf.on_tcp_poll(&mut stack, conn);
    assert_eq!(iperf.reporter().len(), 1);
}

#[test]
fn listener_report() {
    let mut stack = Mock::new();
    let mut iperf = engine(Config::default());
    let listener = iperf.start_tcp_server(&mut stack, any()).unwrap();
    iperf.abort(&mut stack, listener);

    let report = &iperf.reporter()[0];
    assert_eq!(report.outcome, Outcome::AbortedLocal);
    assert_eq!(report.local, Some(any()));
    assert_eq!(report.remote, Some("0.0.0.0:0".parse().unwrap()));
}
