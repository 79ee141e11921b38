//! Sessions and the registry holding them.
//!
//! A session is one endpoint of one test: a TCP listener or connection, or a UDP server, per-peer
//! receiver or sender. Sessions refer to each other through their [`SessionId`], never directly.
//! The session that caused another one to exist is its *controller*: the listener of an accepted
//! connection, the UDP server of a per-peer receiver, the client of an automatically started
//! companion server. Aborting a controller tears down everything it controls.
//!
//! [`SessionId`]: struct.SessionId.html
use core::fmt;

use crate::managed::Key;
use crate::tcp;
use crate::time::Instant;
use crate::udp;
use crate::wire::{ExtFlags, Flags, Settings};

mod registry;
mod report;

pub use self::registry::Registry;
pub use self::report::{FnReporter, Outcome, Protocol, Report, Reporter};

/// Stable name of a session.
///
/// Stays unique after the session is closed, a closed id is never confused with a later session
/// that happens to reuse its storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) Key);

/// The kind of test requested by a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// The client transmits to the server.
    Simple,
    /// The server transmits to the client on the same connection.
    Reverse,
    /// Both transmit at the same time, the server on a connection of its own.
    Dual,
    /// The server transmits after the client has finished.
    Tradeoff,
}

/// The side of the test a session started on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Started by a server, a listener or a session it created for a peer.
    Server,
    /// Started by a client, or answering back to one.
    Client,
}

/// State common to TCP and UDP sessions.
#[derive(Clone, Debug)]
pub struct Base {
    pub(crate) role: Role,
    /// The direction is reversed: the server transmits, the client receives.
    pub(crate) reverse: bool,
    pub(crate) controller: Option<SessionId>,
    /// The controller that was closed while this session lived.
    pub(crate) stale_controller: Option<SessionId>,
    /// Close without reporting.
    pub(crate) silent: bool,
    pub(crate) started: Instant,
    pub(crate) bytes: u64,
}

/// A registered session.
#[derive(Debug)]
pub struct Session {
    pub(crate) base: Base,
    pub(crate) transport: Transport,
}

#[derive(Debug)]
pub(crate) enum Transport {
    Tcp(tcp::Connection),
    Udp(udp::Connection),
}

impl Mode {
    /// Classify the requests in received settings.
    pub fn of(settings: &Settings) -> Mode {
        let flags = settings.flags;
        if settings.is_reverse() {
            Mode::Reverse
        } else if flags.answer_test() && flags.answer_now() {
            Mode::Dual
        } else if flags.answer_test() {
            Mode::Tradeoff
        } else {
            Mode::Simple
        }
    }

    /// Write the requests of this mode into settings a client sends.
    pub(crate) fn request(self, settings: &mut Settings, udp: bool) {
        match self {
            Mode::Simple => (),
            Mode::Reverse => {
                settings.flags.insert(Flags::VERSION2);
                if udp {
                    settings.flags.insert(Flags::UDP_TESTS);
                }
                settings.extend().eflags.insert(ExtFlags::REVERSE);
            },
            Mode::Dual => settings.flags.insert(Flags::ANSWER_TEST | Flags::ANSWER_NOW),
            Mode::Tradeoff => settings.flags.insert(Flags::ANSWER_TEST),
        }
    }

    /// Check if a companion server is needed on the client.
    pub fn answers_back(self) -> bool {
        match self {
            Mode::Dual | Mode::Tradeoff => true,
            Mode::Simple | Mode::Reverse => false,
        }
    }
}

impl Base {
    pub(crate) fn new(role: Role, controller: Option<SessionId>, started: Instant) -> Self {
        Base {
            role,
            reverse: false,
            controller,
            stale_controller: None,
            silent: false,
            started,
            bytes: 0,
        }
    }

    /// Check if this side sends the measured data.
    pub fn is_transmitter(&self) -> bool {
        match self.role {
            Role::Client => !self.reverse,
            Role::Server => self.reverse,
        }
    }

    /// Check if received bytes count towards the transfer.
    pub(crate) fn counts_received(&self) -> bool {
        !(self.role == Role::Server && self.reverse)
    }

    /// Check if sent bytes count towards the transfer.
    pub(crate) fn counts_sent(&self) -> bool {
        self.is_transmitter()
    }
}

impl Session {
    pub(crate) fn tcp(base: Base, conn: tcp::Connection) -> Self {
        Session { base, transport: Transport::Tcp(conn) }
    }

    pub(crate) fn udp(base: Base, conn: udp::Connection) -> Self {
        Session { base, transport: Transport::Udp(conn) }
    }

    /// The transport this session runs over.
    pub fn protocol(&self) -> Protocol {
        match self.transport {
            Transport::Tcp(_) => Protocol::Tcp,
            Transport::Udp(_) => Protocol::Udp,
        }
    }

    /// Whether this side connected or accepted.
    pub fn role(&self) -> Role {
        self.base.role
    }

    /// Check if the server transmits in this test.
    pub fn is_reverse(&self) -> bool {
        self.base.reverse
    }

    /// The session this one was started for.
    pub fn controller(&self) -> Option<SessionId> {
        self.base.controller
    }

    /// Bytes counted towards the test so far.
    pub fn bytes(&self) -> u64 {
        self.base.bytes
    }

    pub(crate) fn as_tcp(&self) -> Option<&tcp::Connection> {
        match &self.transport {
            Transport::Tcp(conn) => Some(conn),
            Transport::Udp(_) => None,
        }
    }

    pub(crate) fn as_tcp_mut(&mut self) -> Option<(&mut Base, &mut tcp::Connection)> {
        match &mut self.transport {
            Transport::Tcp(conn) => Some((&mut self.base, conn)),
            Transport::Udp(_) => None,
        }
    }

    pub(crate) fn as_udp(&self) -> Option<&udp::Connection> {
        match &self.transport {
            Transport::Udp(conn) => Some(conn),
            Transport::Tcp(_) => None,
        }
    }

    pub(crate) fn as_udp_mut(&mut self) -> Option<(&mut Base, &mut udp::Connection)> {
        match &mut self.transport {
            Transport::Udp(conn) => Some((&mut self.base, conn)),
            Transport::Tcp(_) => None,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Simple => write!(f, "client"),
            Mode::Reverse => write!(f, "reverse"),
            Mode::Dual => write!(f, "dual"),
            Mode::Tradeoff => write!(f, "tradeoff"),
        }
    }
}
