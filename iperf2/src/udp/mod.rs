//! The UDP test engine.
//!
//! There is no connection, a server learns of a client from its first datagram. The settings
//! record follows the header of every datagram a client sends. A server keeps one receiver
//! session per peer address and answers the negative sequence number that ends a test with a
//! report of what it received, sent twice since datagrams may be lost.
//!
//! Senders are paced against the clock. They are driven by [`Iperf::poll`], there is no socket
//! event that would tell them when to send.
//!
//! [`Iperf::poll`]: ../struct.Iperf.html#method.poll
use alloc::vec::Vec;
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::config::UdpClient;
use crate::engine::{Error, Iperf, Result};
use crate::pattern;
use crate::session::{Base, Mode, Outcome, Reporter, Role, Session, SessionId};
use crate::stack::{self, Delivery, Stack, Timeout, UdpHandle};
use crate::time::Timestamp;
use crate::wire::{self, datagram, report, settings, Flags, Header, Settings};
use crate::wire::{DATAGRAM_HEADER_LEN as HEADER_LEN, DATAGRAM_REPORT_LEN as REPORT_LEN};

mod pacing;
mod stats;


pub use self::pacing::Pacing;
pub use self::stats::{Jitter, Stats};

/// The state of one UDP session.
///
/// The same structure serves servers, their per-peer receivers and senders. A receiver has no
/// socket of its own, its datagrams arrive on the server socket.
#[derive(Debug, Default)]
pub(crate) struct Connection {
    pub(crate) socket: Option<UdpHandle>,
    /// Multicast group joined for this session.
    pub(crate) group: Option<IpAddr>,
    pub(crate) remote: Option<SocketAddr>,
    /// The report datagram while it is being sent.
    pub(crate) reported: Option<Vec<u8>>,
    /// Reports sent, or acknowledged by the server for a sender.
    pub(crate) report_count: u8,
    pub(crate) have_settings: bool,
    pub(crate) settings: Settings,
    pub(crate) pacing: Pacing,
    /// Sequence number of the next datagram sent.
    pub(crate) seq: u32,
    /// Bytes of the datagrams sent to end the test, not part of the transfer.
    pub(crate) trailer: u64,
    /// Timestamp of the last datagram sent or received.
    pub(crate) last_packet: Timestamp,
    pub(crate) stats: Stats,
    /// A server started by one of our clients, serving only its peer.
    pub(crate) temporary: bool,
}

impl Connection {
    /// The local address of the socket, if the session has one.
    pub(crate) fn local<S: Stack + ?Sized>(&self, stack: &S) -> Option<SocketAddr> {
        stack.udp_local(self.socket?)
    }

    /// Give the socket back to the stack, leaving its group.
    pub(crate) fn release<S: Stack + ?Sized>(self, stack: &mut S) {
        if let Some(group) = self.group {
            if let Err(err) = stack::leave_group(stack, group) {
                net_debug!("leaving {} failed: {}", group, err);
            }
        }
        if let Some(handle) = self.socket {
            stack.udp_remove(handle);
        }
    }
}

impl<R: Reporter> Iperf<R> {
    /// Start a UDP server.
    ///
    /// Binding to a multicast address joins its group until the server is closed.
    pub fn start_udp_server<S: Stack + ?Sized>(&mut self, stack: &mut S, local: SocketAddr)
        -> Result<SessionId>
    {
        self.udp_server(stack, local, false)
    }

    /// Start a UDP client.
    ///
    /// In dual and tradeoff mode a server for the test back is started on the local address as
    /// well. The client is started without it when that fails.
    pub fn start_udp_client<S: Stack + ?Sized>(&mut self, stack: &mut S, client: &UdpClient)
        -> Result<SessionId>
    {
        let remote = client.remote;
        if remote.port() == 0 || remote.ip().is_unspecified()
            || !client.amount.fits_wire()
        {
            return Err(Error::InvalidArgument);
        }

        let mut settings = Settings {
            amount: client.amount,
            ..Settings::default()
        };
        let rate = self.config.udp_rate(client.rate);
        if rate != self.config.udp_default_rate {
            settings.extend().rate = rate as i32;
            settings.win_band = rate;
        }
        client.mode.request(&mut settings, true);

        let family_len = self.config.udp_buffer_len(remote.ip());
        let buffer_len = match client.buffer_len {
            0 => family_len,
            len => len.min(family_len),
        };
        settings.buffer_len = buffer_len.max((HEADER_LEN + settings.buffer_len()) as u32);

        let local = client.local.unwrap_or_else(|| SocketAddr::new(unspecified(remote.ip()), 0));
        let companion = match client.mode.answers_back() {
            true => self.udp_companion(stack, local),
            false => None,
        };
        if let Some((_, port)) = companion {
            settings.remote_port = port.into();
        }

        let reverse = client.mode == Mode::Reverse;
        let pacing = match reverse {
            true => Pacing::immediate(),
            false => Pacing::new(rate, settings.buffer_len, self.config.clock_resolution_us),
        };

        let bind = SocketAddr::new(local.ip(), 0);
        let id = match self.udp_client(stack, bind, remote, settings, pacing, None, client.tos) {
            Ok(id) => id,
            Err(err) => {
                if let Some((server, _)) = companion {
                    self.discard(stack, server);
                }
                return Err(err);
            },
        };

        if let Some((server, _)) = companion {
            if let Some(session) = self.sessions.get_mut(server) {
                session.base.controller = Some(id);
            }
        }

        if let Err(err) = stack::join_group(stack, local.ip()) {
            self.discard(stack, id);
            if let Some((server, _)) = companion {
                self.discard(stack, server);
            }
            return Err(err.into());
        }
        if local.ip().is_multicast() {
            if let Some((_, conn)) = self.udp_mut(id) {
                conn.group = Some(local.ip());
            }
        }

        if let Some((base, _)) = self.udp_mut(id) {
            base.reverse = reverse;
        }
        net_info!("{}: UDP {} test to {} for {}", id, client.mode, remote, client.amount);

        self.udp_send_more(stack, id);
        Ok(id)
    }

    /// A datagram arrived on the socket of a session.
    pub fn on_udp_recv<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, data: &[u8], from: SocketAddr) {
        let (role, reverse, listener) = match self.sessions.get(id) {
            Some(session) => match session.as_udp() {
                Some(conn) => (session.base.role, session.base.reverse, conn.remote.is_none()),
                None => return,
            },
            None => return,
        };

        match (role, reverse) {
            (Role::Client, false) => self.udp_client_report(id, data),
            (Role::Client, true) => self.udp_receive(stack, id, data),
            (Role::Server, false) if listener => {
                // Only a datagram of a running test introduces a new peer.
                let starts = datagram::new_checked(data)
                    .and_then(Header::parse)
                    .map_or(true, |header| !header.is_final());
                let receiver = match self.udp_receiver_of(stack, id, from, starts) {
                    Some(receiver) => receiver,
                    None => return,
                };
                self.udp_receive(stack, receiver, data)
            },
            // A reverse server only transmits.
            (Role::Server, _) => (),
        }
    }

    /// Send the report of a receiver again, or finish it.
    pub(crate) fn udp_send_report<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) {
        let retry = self.config.report_retry;
        let (server, remote, reported) = match self.sessions.get(id) {
            Some(session) => match session.as_udp() {
                Some(conn) => (session.base.controller, conn.remote, conn.reported.is_some()),
                None => return,
            },
            None => {
                net_debug!("{}: dropped report of a closed session", id);
                return;
            },
        };

        let socket = server
            .and_then(|server| self.sessions.get(server))
            .and_then(Session::as_udp)
            .and_then(|server| server.socket);
        let (socket, remote) = match (socket, remote, reported) {
            (Some(socket), Some(remote), true) => (socket, remote),
            _ => {
                net_debug!("{}: no way to send the report", id);
                return self.close(stack, id, Outcome::AbortedLocal);
            },
        };

        let (_, conn) = match self.udp_mut(id) {
            Some(session) => session,
            None => return,
        };
        let delivery = match &conn.reported {
            Some(buffer) => stack.udp_send_to(socket, buffer, remote),
            None => return,
        };
        conn.report_count += 1;

        // Only a report the stack is still holding is not repeated.
        if conn.report_count < 2 && delivery != Ok(Delivery::Pending) {
            stack.schedule(retry, Timeout::ReportRetry(id));
            return;
        }

        conn.reported = None;
        let mode = Mode::of(&conn.settings);
        let temporary = server
            .and_then(|server| self.sessions.get(server))
            .and_then(Session::as_udp)
            .map_or(false, |server| server.temporary);

        if mode == Mode::Tradeoff {
            net_info!("{}: client requested transmission after end of test", id);
            if let Err(err) = self.udp_answer_passive(stack, id) {
                net_debug!("{}: no transmission back: {}", id, err);
            }
        }

        self.close(stack, id, Outcome::DoneServerRx);
        if let (true, Some(server)) = (temporary, server) {
            self.discard(stack, server);
        }
    }

    /// Send as many datagrams as the pacing allows right now.
    pub(crate) fn udp_send_more<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) {
        let now = stack.now();
        let (time_margin, byte_margin) = (self.config.end_time_margin, self.config.end_byte_margin);
        let ending_pace = Pacing {
            delay_us: self.config.end_retry_delay_us,
            frames: self.config.end_retry_frames,
        };

        let (base, conn) = match self.udp_mut(id) {
            Some(session) => session,
            None => return,
        };
        let socket = match conn.socket {
            Some(socket) => socket,
            None => return,
        };

        let elapsed = now - base.started;
        let amount = conn.settings.amount;
        let sent_total = base.bytes + conn.trailer;
        let ending = if amount.reached_with_margin(elapsed, sent_total, time_margin, byte_margin) {
            2
        } else if amount.reached(elapsed, base.bytes) {
            1
        } else {
            0
        };

        if ending > 1 || (ending > 0 && conn.report_count > 0) {
            let outcome = match base.role {
                Role::Server => Outcome::DoneServerTx,
                Role::Client => Outcome::DoneClientTx,
            };
            return self.close(stack, id, outcome);
        }

        let timestamp = Timestamp::from(now);
        if timestamp.micros_since(conn.last_packet) < i64::from(conn.pacing.delay_us) {
            return;
        }

        let mut buffer = core::mem::take(&mut self.scratch);
        let mut sent = 0;
        while let Some((base, conn)) = self.udp_mut(id) {
            if sent >= conn.pacing.frames {
                break;
            }

            let record_len = conn.settings.buffer_len();
            let len = (conn.settings.buffer_len as usize).max(HEADER_LEN + record_len);
            buffer.clear();
            buffer.resize(len, 0);

            let seq = conn.seq as i32;
            let header = Header {
                id: if ending > 0 { seq.wrapping_neg() } else { seq },
                timestamp,
                id2: 0,
            };
            header.emit(datagram::new_unchecked_mut(&mut buffer[..]));
            conn.settings.emit(settings::new_unchecked_mut(&mut buffer[HEADER_LEN..]));
            pattern::init(&mut buffer[HEADER_LEN + record_len..], 0);
            conn.last_packet = timestamp;

            if let Err(err) = stack.udp_send(socket, &buffer) {
                // The datagram is lost, as it could be on the way.
                net_trace!("{}: send failed: {}", id, err);
                break;
            }

            if base.counts_sent() {
                conn.seq = conn.seq.wrapping_add(1);
                match ending {
                    0 => base.bytes += len as u64,
                    _ => conn.trailer += len as u64,
                }
            }
            if ending > 0 {
                conn.pacing = ending_pace;
            }
            sent += 1;
        }
        self.scratch = buffer;
    }

    /// A datagram for a receiver, or for a reverse client.
    fn udp_receive<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, data: &[u8]) {
        let now = stack.now();
        let header = datagram::new_checked(data).and_then(Header::parse);
        let (base, conn) = match self.udp_mut(id) {
            Some(session) => session,
            None => return,
        };
        // A reverse server only transmits.
        if base.role == Role::Server && base.reverse {
            return;
        }

        let header = match header {
            Ok(header) => header,
            Err(err) if !conn.have_settings => {
                net_debug!("{}: bad first datagram: {}", id, err);
                return self.close(stack, id, Outcome::AbortedLocalDataError);
            },
            Err(_) => return,
        };

        if header.is_final() {
            if base.role == Role::Client {
                net_info!("{}: jitter {} us, lost {}/{} datagrams, out of order {}",
                    id, conn.stats.jitter.micros(), conn.stats.lost, conn.stats.packets,
                    conn.stats.out_of_order);
                return self.close(stack, id, Outcome::DoneClientRx);
            }

            if conn.have_settings && conn.report_count == 0 && conn.reported.is_none() {
                let duration = now - base.started;
                let mut buffer = data.to_vec();
                buffer.resize(data.len().max(HEADER_LEN + REPORT_LEN), 0);
                let stats = conn.stats;
                let report = wire::Report {
                    flags: Flags::ANSWER_TEST,
                    total_len: base.bytes,
                    stop: Timestamp::from(duration),
                    error_cnt: stats.lost,
                    outorder_cnt: stats.out_of_order,
                    datagrams: stats.packets,
                    jitter_us: stats.jitter.micros(),
                };
                report.emit(report::new_unchecked_mut(&mut buffer[HEADER_LEN..]));
                net_info!("{}: sending report, jitter {} us, lost {}/{} datagrams, out of order {}",
                    id, report.jitter_us, report.error_cnt, report.datagrams, report.outorder_cnt);
                conn.reported = Some(buffer);
                self.udp_send_report(stack, id);
            }
            return;
        }

        if !conn.have_settings {
            let parsed = settings::new_checked(&data[HEADER_LEN..]).and_then(Settings::parse);
            let mut settings = match parsed {
                Ok(settings) => settings,
                Err(err) => {
                    net_debug!("{}: bad settings: {}", id, err);
                    return self.close(stack, id, Outcome::AbortedLocalDataError);
                },
            };
            net_info!("{}: new UDP client (settings flags {:#x})", id, settings.flags);

            let server = base.controller;
            if self.udp_is_temporary(server) {
                settings.flags.remove(Flags::ANSWER_TEST | Flags::ANSWER_NOW);
            }

            let (base, conn) = match self.udp_mut(id) {
                Some(session) => session,
                None => return,
            };
            conn.settings = settings;
            conn.have_settings = true;
            base.started = now;

            match Mode::of(&settings) {
                Mode::Reverse => {
                    net_info!("{}: client requested server to transmit data", id);
                    if let Err(err) = self.udp_answer_reverse(stack, id) {
                        net_debug!("{}: no transmission back: {}", id, err);
                        self.close(stack, id, Outcome::AbortedLocalTxError);
                    }
                    return;
                },
                Mode::Dual => {
                    net_info!("{}: client requested parallel transmission test", id);
                    if let Err(err) = self.udp_answer_passive(stack, id) {
                        net_debug!("{}: no transmission back: {}", id, err);
                        return self.close(stack, id, Outcome::AbortedLocalTxError);
                    }
                },
                Mode::Tradeoff | Mode::Simple => (),
            }
        }

        let (base, conn) = match self.udp_mut(id) {
            Some(session) => session,
            None => return,
        };
        conn.stats.record(header.id);
        if base.counts_received() {
            base.bytes += data.len() as u64;
        }
        let transit = Timestamp::from(now).micros_since(header.timestamp);
        conn.stats.jitter.update(transit as u32);
        conn.last_packet = header.timestamp;
    }

    /// A datagram from the server on the socket of a sender, its report if anything.
    fn udp_client_report(&mut self, id: SessionId, data: &[u8]) {
        let (base, conn) = match self.udp_mut(id) {
            Some(session) => session,
            None => return,
        };

        let parsed = data.get(HEADER_LEN..)
            .ok_or(wire::Error::Truncated)
            .and_then(report::new_checked)
            .and_then(wire::Report::parse);
        let report = match parsed {
            Ok(report) => report,
            Err(err) => {
                net_trace!("{}: ignored datagram: {}", id, err);
                return;
            },
        };

        if !report.flags.answer_test() {
            return;
        }

        if conn.report_count == 0 {
            net_info!("{}: received report, {} bytes, jitter {} us, lost {}/{} datagrams, out of order {}",
                id, report.total_len, report.jitter_us, report.error_cnt, report.datagrams,
                report.outorder_cnt);
            base.bytes = report.total_len;
        }
        conn.report_count = conn.report_count.saturating_add(1);
    }

    /// Find the receiver for a peer of a server, optionally starting one for a new peer.
    fn udp_receiver_of<S: Stack + ?Sized>(&mut self, stack: &mut S, server: SessionId, from: SocketAddr, create: bool)
        -> Option<SessionId>
    {
        let known = self.sessions.iter().find(|(_, session)| {
            session.base.controller == Some(server)
                && session.base.role == Role::Server
                && session.as_udp().map_or(false, |conn| conn.remote == Some(from))
        });
        if let Some((id, _)) = known {
            return Some(id);
        } else if !create {
            return None;
        }

        let conn = Connection {
            remote: Some(from),
            ..Connection::default()
        };
        let receiver = self.sessions.add(Session::udp(Base::new(Role::Server, Some(server), stack.now()), conn));
        match receiver {
            Some(id) => net_debug!("{}: new peer {} of {}", id, from, server),
            None => net_debug!("{}: no session for new peer {}", server, from),
        }
        receiver
    }

    /// Transmit back to the peer of a receiver from a new sender.
    ///
    /// The peer's settings are reused without any of their requests.
    fn udp_answer_passive<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) -> Result<SessionId> {
        let session = self.sessions.get(id).ok_or(Error::InvalidArgument)?;
        let conn = session.as_udp().ok_or(Error::InvalidArgument)?;
        let remote = conn.remote.ok_or(Error::InvalidArgument)?;
        let port = match u16::try_from(conn.settings.remote_port) {
            Ok(0) | Err(_) => return Err(Error::InvalidArgument),
            Ok(port) => port,
        };
        let controller = session.base.controller;

        let mut settings = conn.settings;
        let rate = match settings.rate() {
            Some(rate) => rate,
            None => settings.win_band as i32,
        };
        let rate = self.config.udp_rate(rate);
        settings.clear_flags();
        settings.buffer_len = self.config.udp_buffer_len(remote.ip());
        let pacing = Pacing::new(rate, settings.buffer_len, self.config.clock_resolution_us);

        let local = SocketAddr::new(self.udp_server_ip(stack, controller, remote.ip()), 0);
        let remote = SocketAddr::new(remote.ip(), port);
        let answer = self.udp_client(stack, local, remote, settings, pacing, controller, 0)?;
        net_info!("{}: transmitting back to {} as {}", id, remote, answer);

        self.udp_send_more(stack, answer);
        Ok(answer)
    }

    /// Turn a receiver into a sender to its peer, on a socket of its own.
    fn udp_answer_reverse<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) -> Result<()> {
        let session = self.sessions.get(id).ok_or(Error::InvalidArgument)?;
        let conn = session.as_udp().ok_or(Error::InvalidArgument)?;
        let remote = conn.remote.ok_or(Error::InvalidArgument)?;
        let port = u16::try_from(conn.settings.remote_port).map_err(|_| Error::InvalidArgument)?;
        let rate = self.config.udp_rate(conn.settings.rate().unwrap_or(0));
        let local = SocketAddr::new(self.udp_server_ip(stack, session.base.controller, remote.ip()), port);

        let buffer_len = self.config.udp_buffer_len(remote.ip());
        let pacing = Pacing::new(rate, buffer_len, self.config.clock_resolution_us);

        let handle = stack.udp_new(id)?;
        let now = stack.now();
        let (base, conn) = self.udp_mut(id).ok_or(Error::InvalidArgument)?;
        conn.socket = Some(handle);
        conn.settings.clear_flags();
        conn.settings.buffer_len = buffer_len;
        conn.pacing = pacing;
        base.reverse = true;
        base.started = now;
        base.bytes = 0;

        stack.udp_bind(handle, local, true)?;
        stack.udp_connect(handle, remote)?;
        net_info!("{}: transmitting to {} from {}", id, remote, local);

        self.udp_send_more(stack, id);
        Ok(())
    }

    /// Start the server for the test back to one of our clients.
    ///
    /// Returns the server with the port it got.
    fn udp_companion<S: Stack + ?Sized>(&mut self, stack: &mut S, local: SocketAddr) -> Option<(SessionId, u16)> {
        // Binding a specific IPv6 address may fail while it is still tentative.
        let local = match local.ip() {
            IpAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), local.port()),
            IpAddr::V4(_) => local,
        };

        let server = match self.udp_server(stack, local, true) {
            Ok(server) => server,
            Err(err) => {
                net_info!("dual test disabled: {}", err);
                return None;
            },
        };

        let port = self.sessions.get(server)
            .and_then(Session::as_udp)
            .and_then(|conn| conn.local(stack))
            .map_or(local.port(), |local| local.port());
        net_info!("{}: dual test port {}", server, port);
        Some((server, port))
    }

    /// Create a bound server session.
    fn udp_server<S: Stack + ?Sized>(&mut self, stack: &mut S, local: SocketAddr, temporary: bool)
        -> Result<SessionId>
    {
        let conn = Connection {
            temporary,
            ..Connection::default()
        };
        let id = self.sessions.add(Session::udp(Base::new(Role::Server, None, stack.now()), conn))
            .ok_or(Error::Exhausted)?;

        let handle = match stack.udp_new(id) {
            Ok(handle) => handle,
            Err(err) => {
                self.sessions.remove(id);
                return Err(err.into());
            },
        };
        if let Some((_, conn)) = self.udp_mut(id) {
            conn.socket = Some(handle);
        }

        let bound = stack.udp_bind(handle, local, true)
            .and_then(|()| stack::join_group(stack, local.ip()));
        if let Err(err) = bound {
            self.discard(stack, id);
            return Err(err.into());
        }
        if local.ip().is_multicast() {
            if let Some((_, conn)) = self.udp_mut(id) {
                conn.group = Some(local.ip());
            }
        }

        net_info!("{}: UDP server on {}", id, local);
        Ok(id)
    }

    /// Create a connected sender session.
    #[allow(clippy::too_many_arguments)]
    fn udp_client<S: Stack + ?Sized>(
        &mut self,
        stack: &mut S,
        local: SocketAddr,
        remote: SocketAddr,
        settings: Settings,
        pacing: Pacing,
        controller: Option<SessionId>,
        tos: u8,
    ) -> Result<SessionId> {
        let conn = Connection {
            remote: Some(remote),
            have_settings: true,
            settings,
            pacing,
            ..Connection::default()
        };
        let base = Base::new(Role::Client, controller, stack.now());
        let id = self.sessions.add(Session::udp(base, conn)).ok_or(Error::Exhausted)?;

        let handle = match stack.udp_new(id) {
            Ok(handle) => handle,
            Err(err) => {
                self.sessions.remove(id);
                return Err(err.into());
            },
        };
        if let Some((_, conn)) = self.udp_mut(id) {
            conn.socket = Some(handle);
        }

        if tos != 0 {
            stack.udp_set_tos(handle, tos);
        }

        if let Err(err) = stack.udp_bind(handle, local, false).and_then(|()| stack.udp_connect(handle, remote)) {
            self.discard(stack, id);
            return Err(err.into());
        }

        Ok(id)
    }

    /// The address a server is bound to, for sockets answering its peers.
    fn udp_server_ip<S: Stack + ?Sized>(&self, stack: &S, server: Option<SessionId>, peer: IpAddr) -> IpAddr {
        server
            .and_then(|server| self.sessions.get(server))
            .and_then(Session::as_udp)
            .and_then(|server| server.local(stack))
            .map_or_else(|| unspecified(peer), |local| local.ip())
    }

    fn udp_is_temporary(&self, server: Option<SessionId>) -> bool {
        server
            .and_then(|server| self.sessions.get(server))
            .and_then(Session::as_udp)
            .map_or(false, |server| server.temporary)
    }

    fn udp_mut(&mut self, id: SessionId) -> Option<(&mut Base, &mut Connection)> {
        self.sessions.get_mut(id)?.as_udp_mut()
    }
}

fn unspecified(like: IpAddr) -> IpAddr {
    match like {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    }
}
