use alloc::vec::Vec;
use core::fmt;
use core::net::SocketAddr;

use super::SessionId;
use crate::time::Duration;

/// The transport of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// A stream test.
    Tcp,
    /// A paced datagram test.
    Udp,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The client sent everything it should.
    DoneClientTx,
    /// The server sent everything it should.
    DoneServerTx,
    /// The client received the full transfer.
    DoneClientRx,
    /// The server received the full transfer.
    DoneServerRx,
    /// Closed by this side, by abort or idle timeout.
    AbortedLocal,
    /// Closed by this side after invalid data.
    AbortedLocalDataError,
    /// Closed by this side because the transfer back to the peer could not be started.
    AbortedLocalTxError,
    /// Closed or reset by the peer.
    AbortedRemote,
}

/// The final record of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Report {
    /// The session that ended.
    pub session: SessionId,
    /// The session controlling it at the time it closed.
    pub controller: Option<SessionId>,
    /// The transport of the session.
    pub protocol: Protocol,
    /// Why it ended.
    pub outcome: Outcome,
    /// Our address, if the stack still knew it.
    pub local: Option<SocketAddr>,
    /// The address of the peer, if there was one.
    pub remote: Option<SocketAddr>,
    /// Bytes of test data transferred.
    pub bytes: u64,
    /// Time from the start of the session until it closed.
    pub duration: Duration,
    /// Throughput in kilobits per second.
    pub bandwidth_kbps: u32,
}

/// Receives the report of every session that closes.
pub trait Reporter {
    /// Called exactly once per reported session, after it left the registry.
    fn report(&mut self, report: &Report);
}

/// A standard wrapper for a function receiving reports.
pub struct FnReporter<F>(pub F);

impl Outcome {
    /// Check if the test ran to its end.
    pub fn is_done(self) -> bool {
        match self {
            Outcome::DoneClientTx | Outcome::DoneServerTx
                | Outcome::DoneClientRx | Outcome::DoneServerRx => true,
            _ => false,
        }
    }
}

impl Report {
    /// Fill in the throughput.
    pub(crate) fn new(
        session: SessionId,
        controller: Option<SessionId>,
        protocol: Protocol,
        outcome: Outcome,
        bytes: u64,
        duration: Duration,
    ) -> Self {
        let millis = duration.as_millis() as u64;
        let bandwidth_kbps = match millis {
            0 => 0,
            millis => (bytes.saturating_mul(8) / millis) as u32,
        };

        Report {
            session,
            controller,
            protocol,
            outcome,
            local: None,
            remote: None,
            bytes,
            duration,
            bandwidth_kbps,
        }
    }
}

impl<F: FnMut(&Report)> Reporter for FnReporter<F> {
    fn report(&mut self, report: &Report) {
        (self.0)(report)
    }
}

impl<R: Reporter + ?Sized> Reporter for &'_ mut R {
    fn report(&mut self, report: &Report) {
        (**self).report(report)
    }
}

/// Collects all reports.
impl Reporter for Vec<Report> {
    fn report(&mut self, report: &Report) {
        self.push(*report)
    }
}

/// Drops all reports.
impl Reporter for () {
    fn report(&mut self, _: &Report) {}
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::DoneClientTx => write!(f, "done client tx"),
            Outcome::DoneServerTx => write!(f, "done server tx"),
            Outcome::DoneClientRx => write!(f, "done client rx"),
            Outcome::DoneServerRx => write!(f, "done server rx"),
            Outcome::AbortedLocal => write!(f, "aborted locally"),
            Outcome::AbortedLocalDataError => write!(f, "aborted locally, data error"),
            Outcome::AbortedLocalTxError => write!(f, "aborted locally, transmit error"),
            Outcome::AbortedRemote => write!(f, "aborted by remote"),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Emulates the summary line of iperf.
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let millis = self.duration.as_millis();
        write!(f, "[{}] {} 0.0-{}.{:03} sec {} Bytes {} Kbits/sec",
            self.session,
            self.protocol,
            millis / 1000, millis % 1000,
            self.bytes,
            self.bandwidth_kbps)?;
        if let (Some(local), Some(remote)) = (self.local, self.remote) {
            write!(f, " {} <-> {}", local, remote)?;
        }
        write!(f, " ({})", self.outcome)
    }
}
