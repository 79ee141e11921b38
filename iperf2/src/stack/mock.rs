//! A scripted stack for driving the engine in tests.
//!
//! Records everything the engine asks of it. Time only moves when the test advances it and TCP
//! send buffers only drain when the test acknowledges the data.
use std::collections::BTreeMap;
use std::vec::Vec;
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::*;

pub(crate) struct Mock {
    pub now: Instant,
    pub local_ip: IpAddr,
    pub mss: u16,
    /// Bytes a TCP socket holds unacknowledged before writes are refused.
    pub send_buffer: usize,
    pub delivery: Delivery,
    /// Refuse to create sockets.
    pub fail_new: bool,
    /// Refuse to send datagrams.
    pub fail_send: bool,
    pub tcp: BTreeMap<usize, TcpSocket>,
    pub udp: BTreeMap<usize, UdpSocket>,
    pub timers: Vec<(Duration, Timeout)>,
    pub groups: Vec<IpAddr>,
    pub left_groups: Vec<IpAddr>,
    next_handle: usize,
    next_port: u16,
}

pub(crate) struct TcpSocket {
    pub owner: SessionId,
    pub family: Family,
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
    pub listening: bool,
    pub closed: bool,
    pub aborted: bool,
    pub tos: u8,
    /// Everything written, in order.
    pub stream: Vec<u8>,
    /// Each accepted write with its `more` hint.
    pub writes: Vec<(usize, bool)>,
    pub refused: Vec<usize>,
    pub unacked: usize,
    pub recved: usize,
}

pub(crate) struct UdpSocket {
    pub owner: SessionId,
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
    pub reuse: bool,
    pub tos: u8,
    pub removed: bool,
    pub sent: Vec<(Vec<u8>, SocketAddr)>,
}

impl Mock {
    pub fn new() -> Self {
        Mock {
            now: Instant::from_secs(100),
            local_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
            mss: 1460,
            send_buffer: 8 * 1460,
            delivery: Delivery::Sent,
            fail_new: false,
            fail_send: false,
            tcp: BTreeMap::new(),
            udp: BTreeMap::new(),
            timers: Vec::new(),
            groups: Vec::new(),
            left_groups: Vec::new(),
            next_handle: 1,
            next_port: 49152,
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    fn ephemeral(&mut self) -> u16 {
        self.next_port += 1;
        self.next_port
    }

    /// The open TCP socket of a session.
    pub fn tcp_of(&self, owner: SessionId) -> Option<TcpHandle> {
        self.tcp.iter()
            .find(|(_, socket)| socket.owner == owner && !socket.closed && !socket.aborted)
            .map(|(&idx, _)| TcpHandle(idx))
    }

    /// The live UDP socket of a session.
    pub fn udp_of(&self, owner: SessionId) -> Option<UdpHandle> {
        self.udp.iter()
            .find(|(_, socket)| socket.owner == owner && !socket.removed)
            .map(|(&idx, _)| UdpHandle(idx))
    }

    pub fn tcp_socket(&self, handle: TcpHandle) -> &TcpSocket {
        &self.tcp[&handle.0]
    }

    pub fn udp_socket(&self, handle: UdpHandle) -> &UdpSocket {
        &self.udp[&handle.0]
    }

    /// A connection arriving at a listener, not yet accepted by the engine.
    pub fn incoming(&mut self, listener: TcpHandle, remote: SocketAddr) -> TcpHandle {
        let (owner, local) = {
            let socket = &self.tcp[&listener.0];
            (socket.owner, socket.local)
        };
        let local = local.map(|local| match local.ip() {
            ip if ip.is_unspecified() => SocketAddr::new(self.local_ip, local.port()),
            _ => local,
        });
        let idx = self.handle();
        self.tcp.insert(idx, TcpSocket::new(owner, Family::of(remote.ip())));
        let socket = self.tcp.get_mut(&idx).unwrap();
        socket.local = local;
        socket.remote = Some(remote);
        TcpHandle(idx)
    }

    /// Acknowledge all data in flight, returning its length.
    pub fn ack(&mut self, handle: TcpHandle) -> usize {
        let socket = self.tcp.get_mut(&handle.0).unwrap();
        core::mem::replace(&mut socket.unacked, 0)
    }

    pub fn take_timers(&mut self) -> Vec<Timeout> {
        self.timers.drain(..).map(|(_, timeout)| timeout).collect()
    }
}

impl TcpSocket {
    fn new(owner: SessionId, family: Family) -> Self {
        TcpSocket {
            owner,
            family,
            local: None,
            remote: None,
            listening: false,
            closed: false,
            aborted: false,
            tos: 0,
            stream: Vec::new(),
            writes: Vec::new(),
            refused: Vec::new(),
            unacked: 0,
            recved: 0,
        }
    }
}

impl Clock for Mock {
    fn now(&self) -> Instant {
        self.now
    }
}

impl Timers for Mock {
    fn schedule(&mut self, after: Duration, timeout: Timeout) {
        self.timers.push((after, timeout));
    }
}

impl Tcp for Mock {
    fn tcp_new(&mut self, owner: SessionId, family: Family) -> Result<TcpHandle> {
        if self.fail_new {
            return Err(Error::Exhausted);
        }
        let idx = self.handle();
        self.tcp.insert(idx, TcpSocket::new(owner, family));
        Ok(TcpHandle(idx))
    }

    fn tcp_set_owner(&mut self, handle: TcpHandle, owner: SessionId) {
        self.tcp.get_mut(&handle.0).unwrap().owner = owner;
    }

    fn tcp_bind(&mut self, handle: TcpHandle, local: SocketAddr) -> Result<()> {
        let taken = self.tcp.iter().any(|(&idx, socket)| {
            idx != handle.0 && !socket.closed && socket.listening && socket.local == Some(local)
        });
        if taken {
            return Err(Error::InUse);
        }
        self.tcp.get_mut(&handle.0).unwrap().local = Some(local);
        Ok(())
    }

    fn tcp_listen(&mut self, handle: TcpHandle) -> Result<()> {
        self.tcp.get_mut(&handle.0).unwrap().listening = true;
        Ok(())
    }

    fn tcp_connect(&mut self, handle: TcpHandle, remote: SocketAddr) -> Result<()> {
        let port = self.ephemeral();
        let local_ip = self.local_ip;
        let socket = self.tcp.get_mut(&handle.0).unwrap();
        socket.remote = Some(remote);
        socket.local.get_or_insert(SocketAddr::new(local_ip, port));
        Ok(())
    }

    fn tcp_write(&mut self, handle: TcpHandle, data: &[u8], more: bool) -> Result<()> {
        let limit = self.send_buffer;
        let socket = self.tcp.get_mut(&handle.0).unwrap();
        assert!(!socket.closed && !socket.aborted, "write to a released socket");
        if socket.unacked + data.len() > limit {
            socket.refused.push(data.len());
            return Err(Error::Exhausted);
        }
        socket.unacked += data.len();
        socket.stream.extend_from_slice(data);
        socket.writes.push((data.len(), more));
        Ok(())
    }

    fn tcp_output(&mut self, _: TcpHandle) {}

    fn tcp_recved(&mut self, handle: TcpHandle, len: usize) {
        self.tcp.get_mut(&handle.0).unwrap().recved += len;
    }

    fn tcp_mss(&self, _: TcpHandle) -> u16 {
        self.mss
    }

    fn tcp_set_tos(&mut self, handle: TcpHandle, tos: u8) {
        self.tcp.get_mut(&handle.0).unwrap().tos = tos;
    }

    fn tcp_local(&self, handle: TcpHandle) -> Option<SocketAddr> {
        self.tcp[&handle.0].local
    }

    fn tcp_remote(&self, handle: TcpHandle) -> Option<SocketAddr> {
        self.tcp[&handle.0].remote
    }

    fn tcp_close(&mut self, handle: TcpHandle) -> Result<()> {
        let socket = self.tcp.get_mut(&handle.0).unwrap();
        assert!(!socket.closed && !socket.aborted, "double release of {}", handle);
        socket.closed = true;
        Ok(())
    }

    fn tcp_abort(&mut self, handle: TcpHandle) {
        self.tcp.get_mut(&handle.0).unwrap().aborted = true;
    }
}

impl Udp for Mock {
    fn udp_new(&mut self, owner: SessionId) -> Result<UdpHandle> {
        if self.fail_new {
            return Err(Error::Exhausted);
        }
        let idx = self.handle();
        self.udp.insert(idx, UdpSocket {
            owner,
            local: None,
            remote: None,
            reuse: false,
            tos: 0,
            removed: false,
            sent: Vec::new(),
        });
        Ok(UdpHandle(idx))
    }

    fn udp_bind(&mut self, handle: UdpHandle, local: SocketAddr, reuse: bool) -> Result<()> {
        let local = match local.port() {
            0 => SocketAddr::new(local.ip(), self.ephemeral()),
            _ => local,
        };
        let socket = self.udp.get_mut(&handle.0).unwrap();
        socket.local = Some(local);
        socket.reuse = reuse;
        Ok(())
    }

    fn udp_connect(&mut self, handle: UdpHandle, remote: SocketAddr) -> Result<()> {
        self.udp.get_mut(&handle.0).unwrap().remote = Some(remote);
        Ok(())
    }

    fn udp_send(&mut self, handle: UdpHandle, data: &[u8]) -> Result<Delivery> {
        if self.fail_send {
            return Err(Error::Exhausted);
        }
        let delivery = self.delivery;
        let socket = self.udp.get_mut(&handle.0).unwrap();
        assert!(!socket.removed, "send on a released socket");
        let remote = socket.remote.ok_or(Error::Illegal)?;
        socket.sent.push((data.to_vec(), remote));
        Ok(delivery)
    }

    fn udp_send_to(&mut self, handle: UdpHandle, data: &[u8], remote: SocketAddr) -> Result<Delivery> {
        if self.fail_send {
            return Err(Error::Exhausted);
        }
        let delivery = self.delivery;
        let socket = self.udp.get_mut(&handle.0).unwrap();
        assert!(!socket.removed, "send on a released socket");
        socket.sent.push((data.to_vec(), remote));
        Ok(delivery)
    }

    fn udp_local(&self, handle: UdpHandle) -> Option<SocketAddr> {
        self.udp[&handle.0].local
    }

    fn udp_set_tos(&mut self, handle: UdpHandle, tos: u8) {
        self.udp.get_mut(&handle.0).unwrap().tos = tos;
    }

    fn udp_remove(&mut self, handle: UdpHandle) {
        let socket = self.udp.get_mut(&handle.0).unwrap();
        assert!(!socket.removed, "double release of {}", handle);
        socket.removed = true;
    }
}

impl Multicast for Mock {
    fn igmp_join(&mut self, group: Ipv4Addr) -> Result<()> {
        self.groups.push(group.into());
        Ok(())
    }

    fn igmp_leave(&mut self, group: Ipv4Addr) -> Result<()> {
        self.left_groups.push(group.into());
        Ok(())
    }

    fn mld6_join(&mut self, group: Ipv6Addr) -> Result<()> {
        self.groups.push(group.into());
        Ok(())
    }

    fn mld6_leave(&mut self, group: Ipv6Addr) -> Result<()> {
        self.left_groups.push(group.into());
        Ok(())
    }
}
