//! The network stack the engine runs on.
//!
//! The engine owns no sockets and no clock. Every primitive it needs from the surrounding stack is
//! expressed by the traits of this module, which the host implements once for its transport. In
//! the other direction, the host forwards socket and timer events to the entry points of
//! [`Iperf`], passing along the [`SessionId`] it was given as the owner of the socket.
//!
//! ## Handles
//!
//! Sockets are named by small copyable handles chosen by the host. Ownership of a socket is with
//! the session that created or accepted it and the engine releases it exactly once, through
//! `tcp_close`/`tcp_abort` or `udp_remove`. After the host reported an error on a TCP socket the
//! engine assumes the handle is already gone and never uses it again.
//!
//! [`Iperf`]: ../engine/struct.Iperf.html
//! [`SessionId`]: ../session/struct.SessionId.html
use core::fmt;
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::session::SessionId;
use crate::time::{Duration, Instant};

#[cfg(test)]
pub(crate) mod mock;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported by the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The action could not be completed because there were not enough resources.
    ///
    /// For writes this is transient: the send buffer is full and a smaller write or a later retry
    /// may succeed.
    Exhausted,
    /// The operation was not permitted in the current state of the socket.
    Illegal,
    /// Unable to find a route towards the destination address.
    Unreachable,
    /// The local address is already bound.
    InUse,
    /// The connection has been closed.
    Closed,
}

/// A TCP socket of the stack, listening or connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TcpHandle(pub usize);

/// A UDP socket of the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UdpHandle(pub usize);

/// The address family of a new socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
    /// Dual stack, for listeners.
    Any,
}

/// The fate of an accepted datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Handed to the link.
    Sent,
    /// Queued in the stack, for example waiting on address resolution.
    Pending,
}

/// A deferred call into the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Send the held report of a UDP session again.
    ReportRetry(SessionId),
}

/// The clock of the stack.
pub trait Clock {
    /// The current time, monotonic.
    fn now(&self) -> Instant;
}

/// Deferred calls, delivered to [`Iperf::on_timeout`].
///
/// [`Iperf::on_timeout`]: ../engine/struct.Iperf.html#method.on_timeout
pub trait Timers {
    /// Arrange for `timeout` to be delivered after at least `after` has passed.
    fn schedule(&mut self, after: Duration, timeout: Timeout);
}

/// TCP primitives.
///
/// Events for a socket are delivered with the session set as owner: connected, received, sent,
/// poll, error and accept.
pub trait Tcp {
    /// Create a socket owned by a session.
    fn tcp_new(&mut self, owner: SessionId, family: Family) -> Result<TcpHandle>;

    /// Transfer a socket, for example one passed to an accept event, to another session.
    fn tcp_set_owner(&mut self, handle: TcpHandle, owner: SessionId);

    fn tcp_bind(&mut self, handle: TcpHandle, local: SocketAddr) -> Result<()>;

    /// Start listening, accepts are then delivered to the owner.
    fn tcp_listen(&mut self, handle: TcpHandle) -> Result<()>;

    /// Start connecting, completion is delivered to the owner.
    fn tcp_connect(&mut self, handle: TcpHandle, remote: SocketAddr) -> Result<()>;

    /// Queue data. `more` hints that further data follows immediately.
    ///
    /// Either all of `data` is queued or none of it. `Error::Exhausted` when the send buffer can
    /// not hold it.
    fn tcp_write(&mut self, handle: TcpHandle, data: &[u8], more: bool) -> Result<()>;

    /// Push queued data to the network.
    fn tcp_output(&mut self, handle: TcpHandle);

    /// Acknowledge that received data was consumed, opening the window.
    fn tcp_recved(&mut self, handle: TcpHandle, len: usize);

    /// The maximum segment size of the connection.
    fn tcp_mss(&self, handle: TcpHandle) -> u16;

    fn tcp_set_tos(&mut self, handle: TcpHandle, tos: u8);

    fn tcp_local(&self, handle: TcpHandle) -> Option<SocketAddr>;

    /// The peer, `None` for a listener.
    fn tcp_remote(&self, handle: TcpHandle) -> Option<SocketAddr>;

    /// Close gracefully and release the handle.
    ///
    /// On failure the handle is still valid and must be aborted instead.
    fn tcp_close(&mut self, handle: TcpHandle) -> Result<()>;

    /// Reset the connection and release the handle.
    fn tcp_abort(&mut self, handle: TcpHandle);
}

/// UDP primitives.
///
/// Datagrams arriving on a socket are delivered to its owner.
pub trait Udp {
    /// Create a socket owned by a session.
    fn udp_new(&mut self, owner: SessionId) -> Result<UdpHandle>;

    /// Bind a local address, port zero for an ephemeral one.
    fn udp_bind(&mut self, handle: UdpHandle, local: SocketAddr, reuse: bool) -> Result<()>;

    /// Set the default destination for `udp_send`.
    fn udp_connect(&mut self, handle: UdpHandle, remote: SocketAddr) -> Result<()>;

    fn udp_send(&mut self, handle: UdpHandle, data: &[u8]) -> Result<Delivery>;

    fn udp_send_to(&mut self, handle: UdpHandle, data: &[u8], remote: SocketAddr) -> Result<Delivery>;

    fn udp_local(&self, handle: UdpHandle) -> Option<SocketAddr>;

    fn udp_set_tos(&mut self, handle: UdpHandle, tos: u8);

    /// Release the socket.
    fn udp_remove(&mut self, handle: UdpHandle);
}

/// Group membership for multicast servers.
pub trait Multicast {
    fn igmp_join(&mut self, group: Ipv4Addr) -> Result<()>;
    fn igmp_leave(&mut self, group: Ipv4Addr) -> Result<()>;
    fn mld6_join(&mut self, group: Ipv6Addr) -> Result<()>;
    fn mld6_leave(&mut self, group: Ipv6Addr) -> Result<()>;
}

/// Everything the engine requires of a stack.
pub trait Stack: Clock + Timers + Tcp + Udp + Multicast {}

impl<T: Clock + Timers + Tcp + Udp + Multicast + ?Sized> Stack for T {}

impl Family {
    /// The family of sockets talking to some address.
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// Join the group of a multicast address, ignoring unicast ones.
pub(crate) fn join_group<S: Multicast + ?Sized>(stack: &mut S, addr: IpAddr) -> Result<()> {
    match addr {
        IpAddr::V4(group) if group.is_multicast() => stack.igmp_join(group),
        IpAddr::V6(group) if group.is_multicast() => stack.mld6_join(group),
        _ => Ok(()),
    }
}

/// Leave the group of a multicast address, ignoring unicast ones.
pub(crate) fn leave_group<S: Multicast + ?Sized>(stack: &mut S, addr: IpAddr) -> Result<()> {
    match addr {
        IpAddr::V4(group) if group.is_multicast() => stack.igmp_leave(group),
        IpAddr::V6(group) if group.is_multicast() => stack.mld6_leave(group),
        _ => Ok(()),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Exhausted => write!(f, "out of resources"),
            Error::Illegal => write!(f, "illegal operation"),
            Error::Unreachable => write!(f, "destination unreachable"),
            Error::InUse => write!(f, "address in use"),
            Error::Closed => write!(f, "connection closed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl fmt::Display for TcpHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tcp:{}", self.0)
    }
}

impl fmt::Display for UdpHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "udp:{}", self.0)
    }
}
