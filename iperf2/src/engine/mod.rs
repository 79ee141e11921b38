//! The iperf2 engine.
//!
//! [`Iperf`] owns all sessions and is entirely reactive. The host calls one of the start
//! functions, then forwards the events of the sockets and timers it was asked to create, and calls
//! [`poll`] regularly to pace UDP senders. Every session ends with exactly one call to the
//! [`Reporter`], except helper sessions whose end is not visible to the user.
//!
//! ## Usage
//!
//! ```no_run
//! # use iperf2::{Config, Iperf, FnReporter};
//! # fn run<S: iperf2::stack::Stack>(stack: &mut S) {
//! let mut iperf = Iperf::new(Config::default(), FnReporter(|report: &iperf2::Report| {
//!     println!("{}", report);
//! }));
//! let server = iperf.start_tcp_server(stack, "0.0.0.0:5001".parse().unwrap()).unwrap();
//! loop {
//!     // Dispatch socket events of the stack to `iperf.on_tcp_*` here.
//!     iperf.poll(stack);
//! #   break;
//! }
//! iperf.abort(stack, server);
//! # }
//! ```
//!
//! [`Iperf`]: struct.Iperf.html
//! [`poll`]: struct.Iperf.html#method.poll
//! [`Reporter`]: ../session/trait.Reporter.html
use alloc::vec::Vec;
use core::fmt;

use crate::config::Config;
use crate::session::{Outcome, Registry, Report, Reporter, Session, SessionId, Transport};
use crate::stack::{self, Stack, Timeout};


/// Errors of the start functions.
///
/// Nothing is left registered or allocated when a start function fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// All session slots are in use.
    Exhausted,
    /// The parameters can not describe a test, for example a remote port of zero.
    InvalidArgument,
    /// The stack refused a socket operation.
    Stack(stack::Error),
}

/// The result type of the start functions.
pub type Result<T> = core::result::Result<T, Error>;

/// The engine, owning all sessions.
pub struct Iperf<R> {
    pub(crate) config: Config,
    pub(crate) sessions: Registry,
    pub(crate) reporter: R,
    /// Reused for building datagrams.
    pub(crate) scratch: Vec<u8>,
}

impl<R: Reporter> Iperf<R> {
    /// Create an engine without sessions.
    pub fn new(config: Config, reporter: R) -> Self {
        Iperf {
            sessions: Registry::with_capacity(config.capacity),
            config,
            reporter,
            scratch: Vec::new(),
        }
    }

    /// The tunables this engine was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live sessions.
    pub fn sessions(&self) -> &Registry {
        &self.sessions
    }

    /// The reporter receiving closed sessions.
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Mutable access to the reporter.
    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    /// Close a session and every session it controls or controlled, at any depth.
    ///
    /// All of them are closed and reported as aborted locally when this returns. Calling this
    /// again with the same id, or with the id of a session that already closed on its own, only
    /// reaches sessions that still remember it as their controller.
    pub fn abort<S: Stack + ?Sized>(&mut self, stack: &mut S, handle: SessionId) {
        let mut pending = alloc::vec![handle];
        while let Some(parent) = pending.pop() {
            for id in self.sessions.ids() {
                if !self.sessions.in_family_of(id, parent) {
                    continue;
                }

                self.close(stack, id, Outcome::AbortedLocal);
                if id != parent {
                    pending.push(id);
                }
            }
        }
    }

    /// Drive the UDP senders.
    ///
    /// Must be called regularly by the host, every few tens of milliseconds, since a paced sender
    /// has no socket event to wait for.
    pub fn poll<S: Stack + ?Sized>(&mut self, stack: &mut S) {
        for id in self.sessions.ids() {
            let sends = match self.sessions.get(id) {
                Some(session) => session.as_udp().is_some() && session.base.is_transmitter(),
                None => false,
            };

            if sends {
                self.udp_send_more(stack, id);
            }
        }
    }

    /// A timer scheduled through the stack expired.
    pub fn on_timeout<S: Stack + ?Sized>(&mut self, stack: &mut S, timeout: Timeout) {
        match timeout {
            Timeout::ReportRetry(id) => self.udp_send_report(stack, id),
        }
    }

    /// End a session: unregister, report, then release its resources.
    pub(crate) fn close<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, outcome: Outcome) {
        let session = match self.sessions.remove(id) {
            Some(session) => session,
            None => return,
        };

        let report = self.report_of(stack, id, &session, outcome);
        net_debug!("{}", report);
        if !session.base.silent {
            self.reporter.report(&report);
        }

        match session.transport {
            Transport::Tcp(conn) => conn.release(stack),
            Transport::Udp(conn) => conn.release(stack),
        }
    }

    /// Close a session that never became visible to the user.
    pub(crate) fn discard<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.base.silent = true;
        }
        self.close(stack, id, Outcome::AbortedLocal);
    }

    fn report_of<S: Stack + ?Sized>(&self, stack: &S, id: SessionId, session: &Session, outcome: Outcome)
        -> Report
    {
        let duration = stack.now() - session.base.started;
        let mut report = Report::new(
            id,
            session.base.controller,
            session.protocol(),
            outcome,
            session.base.bytes,
            duration);

        match &session.transport {
            Transport::Tcp(conn) => match conn.endpoints(stack) {
                Some((local, remote)) => {
                    report.local = local;
                    report.remote = remote;
                },
                None => report = Report::new(id, session.base.controller, session.protocol(),
                    outcome, 0, Default::default()),
            },
            Transport::Udp(conn) => {
                // A per-peer receiver has no socket of its own.
                report.local = conn.local(stack).or_else(|| {
                    let server = self.sessions.get(session.base.controller?)?;
                    server.as_udp()?.local(stack)
                });
                report.remote = conn.remote;
            },
        }

        report
    }
}

impl From<stack::Error> for Error {
    fn from(err: stack::Error) -> Self {
        Error::Stack(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Exhausted => write!(f, "no free session"),
            Error::InvalidArgument => write!(f, "invalid test parameters"),
            Error::Stack(err) => write!(f, "stack error: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
