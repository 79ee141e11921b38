//! Engine tunables and the parameters of the start calls.
use core::net::{IpAddr, SocketAddr};

use crate::session::Mode;
use crate::time::Duration;
use crate::wire::Amount;

/// The well-known iperf2 port.
pub const DEFAULT_PORT: u16 = 5001;

/// Constants of the engine that a host may want to tune.
///
/// The defaults are those of common iperf2 builds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of simultaneously live sessions.
    pub capacity: usize,
    /// Poll intervals without traffic before a TCP session is aborted.
    pub max_idle_polls: u8,
    /// Period of the settings record in a TCP stream.
    pub block_size: u64,
    /// Granularity of the host clock, in microseconds.
    pub clock_resolution_us: u32,
    /// Delay before the second send of a UDP report.
    pub report_retry: Duration,
    /// Port of companion servers, advertised to the peer in the settings.
    pub tcp_port: u16,
    /// Default datagram length over IPv4.
    pub udp_buffer_len_v4: u32,
    /// Default datagram length over IPv6.
    pub udp_buffer_len_v6: u32,
    /// Rate in bits per second when none is requested.
    pub udp_default_rate: u32,
    /// Run time beyond the limit after which a UDP sender stops trying to finish.
    pub end_time_margin: Duration,
    /// Bytes beyond the limit after which a UDP sender stops trying to finish.
    pub end_byte_margin: u64,
    /// Pacing delay of termination datagrams, in microseconds.
    pub end_retry_delay_us: u32,
    /// Termination datagrams sent per pacing delay.
    pub end_retry_frames: u32,
}

/// Parameters of a TCP client test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpClient {
    pub remote: SocketAddr,
    pub mode: Mode,
    pub amount: Amount,
    /// Write size, zero to write full segments.
    pub buffer_len: u32,
    pub tos: u8,
}

/// Parameters of a UDP client test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpClient {
    /// Local address and port for the client socket and a companion server.
    ///
    /// The port is only used by the companion, the client itself binds an ephemeral one.
    pub local: Option<SocketAddr>,
    pub remote: SocketAddr,
    pub mode: Mode,
    pub amount: Amount,
    /// Datagram length, zero for the default of the address family.
    pub buffer_len: u32,
    /// Rate in bits per second, zero or negative for the default.
    pub rate: i32,
    pub tos: u8,
}

impl Config {
    /// Set the maximum number of live sessions.
    pub fn with_capacity(self, capacity: usize) -> Self {
        Config { capacity, ..self }
    }

    /// Set the number of idle poll intervals tolerated.
    pub fn with_max_idle_polls(self, max_idle_polls: u8) -> Self {
        Config { max_idle_polls, ..self }
    }

    /// Set the period of the TCP settings record.
    pub fn with_block_size(self, block_size: u64) -> Self {
        Config { block_size, ..self }
    }

    /// Set the granularity of the host clock.
    pub fn with_clock_resolution_us(self, clock_resolution_us: u32) -> Self {
        Config { clock_resolution_us, ..self }
    }

    /// Set the delay between the two UDP report sends.
    pub fn with_report_retry(self, report_retry: Duration) -> Self {
        Config { report_retry, ..self }
    }

    /// Set the port for companion servers.
    pub fn with_tcp_port(self, tcp_port: u16) -> Self {
        Config { tcp_port, ..self }
    }

    /// Set the default rate for UDP senders.
    pub fn with_udp_default_rate(self, udp_default_rate: u32) -> Self {
        Config { udp_default_rate, ..self }
    }

    /// The default datagram length for a peer.
    pub fn udp_buffer_len(&self, peer: IpAddr) -> u32 {
        match peer {
            IpAddr::V4(_) => self.udp_buffer_len_v4,
            IpAddr::V6(_) => self.udp_buffer_len_v6,
        }
    }

    /// Resolve a requested rate, non-positive meaning the default.
    pub fn udp_rate(&self, rate: i32) -> u32 {
        if rate > 0 {
            rate as u32
        } else {
            self.udp_default_rate
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            capacity: 32,
            max_idle_polls: 10,
            block_size: 128 * 1024,
            clock_resolution_us: 1000,
            report_retry: Duration::from_millis(10),
            tcp_port: DEFAULT_PORT,
            udp_buffer_len_v4: 1470,
            udp_buffer_len_v6: 1450,
            udp_default_rate: 1024 * 1024,
            end_time_margin: Duration::from_millis(500),
            end_byte_margin: 4096,
            end_retry_delay_us: 50_000,
            end_retry_frames: 10,
        }
    }
}

impl TcpClient {
    /// A ten second test in the plain client mode.
    pub fn new(remote: SocketAddr) -> Self {
        TcpClient {
            remote,
            mode: Mode::Simple,
            amount: Amount::Time(1000),
            buffer_len: 0,
            tos: 0,
        }
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        TcpClient { mode, ..self }
    }

    pub fn with_amount(self, amount: Amount) -> Self {
        TcpClient { amount, ..self }
    }

    pub fn with_buffer_len(self, buffer_len: u32) -> Self {
        TcpClient { buffer_len, ..self }
    }

    pub fn with_tos(self, tos: u8) -> Self {
        TcpClient { tos, ..self }
    }
}

impl UdpClient {
    /// A ten second test at the default rate in the plain client mode.
    pub fn new(remote: SocketAddr) -> Self {
        UdpClient {
            local: None,
            remote,
            mode: Mode::Simple,
            amount: Amount::Time(1000),
            buffer_len: 0,
            rate: 0,
            tos: 0,
        }
    }

    pub fn with_local(self, local: SocketAddr) -> Self {
        UdpClient { local: Some(local), ..self }
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        UdpClient { mode, ..self }
    }

    pub fn with_amount(self, amount: Amount) -> Self {
        UdpClient { amount, ..self }
    }

    pub fn with_buffer_len(self, buffer_len: u32) -> Self {
        UdpClient { buffer_len, ..self }
    }

    pub fn with_rate(self, rate: i32) -> Self {
        UdpClient { rate, ..self }
    }

    pub fn with_tos(self, tos: u8) -> Self {
        UdpClient { tos, ..self }
    }
}
