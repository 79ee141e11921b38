//! The TCP test engine.
//!
//! A client connects, sends the settings record and then streams the digit pattern until its
//! limit is reached. The settings are repeated at the start of every block so that a receiver can
//! resynchronize on long transfers. A server listener accepts connections whose first bytes are
//! the settings record, these decide whether the server only receives or also transmits.
//!
//! Connection state moves through `Connecting`, `Settings` (server side, until the record is
//! complete) and `Transfer`. Listeners stay in `Listening` until they are closed.
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::config::TcpClient;
use crate::engine::{Error, Iperf, Result};
use crate::pattern;
use crate::session::{Base, Mode, Outcome, Reporter, Role, Session, SessionId};
use crate::stack::{self, Family, Stack, TcpHandle};
use crate::wire::{self, settings, Settings, SETTINGS_EXTENDED_LEN};

#[cfg(test)]
mod tests;

/// Length of the settings record in a TCP stream.
pub const RECORD_LEN: usize = SETTINGS_EXTENDED_LEN;

/// The state of one TCP session.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) socket: Socket,
    pub(crate) phase: Phase,
    /// Poll intervals since the last traffic.
    pub(crate) poll_count: u8,
    /// The settings sent by a client, or received by a server.
    pub(crate) settings: Settings,
    received: [u8; RECORD_LEN],
    received_len: usize,
    /// Restriction of a single-use listener.
    pub(crate) accept: Option<AcceptPolicy>,
}

/// The socket of a session, at most one of both kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Socket {
    Listening(TcpHandle),
    Connected(TcpHandle),
    /// The stack released it already.
    Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Listening,
    Connecting,
    /// Waiting for the complete settings record.
    Settings,
    Transfer,
}

/// A listener started for one client of ours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AcceptPolicy {
    /// Only connections from this address are accepted.
    pub(crate) remote: IpAddr,
    /// Stay open after a connection while the client lives.
    pub(crate) tradeoff: bool,
}

impl Connection {
    fn new(socket: Socket, phase: Phase, settings: Settings) -> Self {
        Connection {
            socket,
            phase,
            poll_count: 0,
            settings,
            received: [0; RECORD_LEN],
            received_len: 0,
            accept: None,
        }
    }

    /// The connected socket.
    pub(crate) fn handle(&self) -> Option<TcpHandle> {
        match self.socket {
            Socket::Connected(handle) => Some(handle),
            _ => None,
        }
    }

    /// Write size for a connection, never more than requested by the settings.
    fn segment(&self, mss: u16) -> u16 {
        let segment = match self.settings.buffer_len {
            0 => mss,
            len => mss.min(len.min(u32::from(u16::MAX)) as u16),
        };
        segment.max(1)
    }

    /// Collect bytes of the settings record, returning how many were taken.
    fn buffer_settings(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(RECORD_LEN - self.received_len);
        self.received[self.received_len..][..take].copy_from_slice(&data[..take]);
        self.received_len += take;
        take
    }

    fn settings_complete(&self) -> bool {
        self.received_len == RECORD_LEN
    }

    fn parse_settings(&self) -> wire::Result<Settings> {
        Settings::parse(settings::new_checked(&self.received[..])?)
    }

    /// Local and remote endpoint, `None` if the socket is gone.
    pub(crate) fn endpoints<S: Stack + ?Sized>(&self, stack: &S)
        -> Option<(Option<SocketAddr>, Option<SocketAddr>)>
    {
        match self.socket {
            Socket::Connected(handle) => Some((stack.tcp_local(handle), stack.tcp_remote(handle))),
            Socket::Listening(handle) => {
                let local = stack.tcp_local(handle);
                let remote = local.map(|local| {
                    let any = match local.ip() {
                        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                    };
                    SocketAddr::new(any, 0)
                });
                Some((local, remote))
            },
            Socket::Released => None,
        }
    }

    /// Give the socket back to the stack.
    pub(crate) fn release<S: Stack + ?Sized>(self, stack: &mut S) {
        match self.socket {
            Socket::Connected(handle) | Socket::Listening(handle) => {
                if let Err(err) = stack.tcp_close(handle) {
                    net_debug!("close of {} failed ({}), aborting", handle, err);
                    stack.tcp_abort(handle);
                }
            },
            Socket::Released => (),
        }
    }
}

impl<R: Reporter> Iperf<R> {
    /// Start a TCP server.
    ///
    /// It accepts any number of clients. Each accepted connection is a session of its own,
    /// controlled by the listener.
    pub fn start_tcp_server<S: Stack + ?Sized>(&mut self, stack: &mut S, local: SocketAddr)
        -> Result<SessionId>
    {
        self.tcp_listen(stack, local, None)
    }

    /// Start a TCP client.
    ///
    /// In dual and tradeoff mode a server for the test back is started on our local address as
    /// well, controlled by the client. If it can not be started the client is not started either.
    pub fn start_tcp_client<S: Stack + ?Sized>(&mut self, stack: &mut S, client: &TcpClient)
        -> Result<SessionId>
    {
        if client.remote.port() == 0 || client.remote.ip().is_unspecified()
            || !client.amount.fits_wire()
        {
            return Err(Error::InvalidArgument);
        }

        let mut settings = Settings {
            num_threads: 1,
            remote_port: self.config.tcp_port.into(),
            buffer_len: client.buffer_len,
            amount: client.amount,
            ..Settings::default()
        };
        client.mode.request(&mut settings, false);

        let id = self.tcp_connect(stack, client.remote, settings, None, client.tos)?;
        net_info!("{}: TCP {} test to {} for {}", id, client.mode, client.remote, client.amount);

        if client.mode.answers_back() {
            let local_ip = self.tcp_conn(id)
                .and_then(Connection::handle)
                .and_then(|handle| stack.tcp_local(handle))
                .map(|local| local.ip())
                .unwrap_or_else(|| match client.remote.ip() {
                    IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                });
            let local = SocketAddr::new(local_ip, self.config.tcp_port);

            match self.tcp_listen(stack, local, Some(id)) {
                Ok(server) => {
                    if let Some((_, conn)) = self.tcp_mut(server) {
                        conn.accept = Some(AcceptPolicy {
                            remote: client.remote.ip(),
                            tradeoff: client.mode == Mode::Tradeoff,
                        });
                    }
                    net_info!("{}: {} test server {} on {}", id, client.mode, server, local);
                },
                Err(err) => {
                    self.discard(stack, id);
                    return Err(err);
                },
            }
        }

        Ok(id)
    }

    /// The connection attempt of a session completed.
    pub fn on_tcp_connected<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, result: stack::Result<()>) {
        if let Err(err) = result {
            net_debug!("{}: connect failed: {}", id, err);
            return self.close(stack, id, Outcome::AbortedRemote);
        }

        let now = stack.now();
        let (base, conn) = match self.tcp_mut(id) {
            Some(session) => session,
            None => return,
        };
        base.started = now;
        conn.poll_count = 0;
        conn.phase = Phase::Transfer;
        self.tcp_send_more(stack, id);
    }

    /// Data arrived on a connection, `None` when the peer closed it.
    pub fn on_tcp_recv<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, data: Option<&[u8]>) {
        let handle = match self.tcp_conn(id).and_then(Connection::handle) {
            Some(handle) => handle,
            None => return,
        };

        let data = match data {
            Some(data) => data,
            None => return self.tcp_remote_closed(stack, id),
        };

        let mut payload = data;
        let (_, conn) = match self.tcp_mut(id) {
            Some(session) => session,
            None => return,
        };
        conn.poll_count = 0;

        if conn.phase == Phase::Settings {
            let taken = conn.buffer_settings(payload);
            payload = &payload[taken..];
            if !conn.settings_complete() {
                stack.tcp_recved(handle, data.len());
                return;
            }

            let settings = match conn.parse_settings() {
                Ok(settings) => settings,
                Err(err) => {
                    net_debug!("{}: bad settings: {}", id, err);
                    return self.close(stack, id, Outcome::AbortedLocalDataError);
                },
            };
            conn.settings = settings;
            conn.phase = Phase::Transfer;
            net_info!("{}: new TCP client (settings flags {:#x})", id, settings.flags);

            if !self.tcp_dispatch(stack, id, Mode::of(&settings)) {
                return;
            }

            let now = stack.now();
            match self.tcp_mut(id) {
                Some((base, _)) if base.counts_received() => {
                    base.bytes += RECORD_LEN as u64;
                    base.started = now;
                },
                Some(_) => (),
                None => return,
            }
        }

        match self.tcp_mut(id) {
            Some((base, _)) if base.counts_received() => base.bytes += payload.len() as u64,
            Some(_) => (),
            None => return,
        }
        stack.tcp_recved(handle, data.len());
    }

    /// Previously written data was acknowledged.
    pub fn on_tcp_sent<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, _len: usize) {
        let transmits = match self.tcp_mut(id) {
            Some((base, conn)) if conn.phase == Phase::Transfer => {
                conn.poll_count = 0;
                base.is_transmitter()
            },
            _ => false,
        };

        if transmits {
            self.tcp_send_more(stack, id);
        }
    }

    /// The periodic poll of a connection.
    ///
    /// Aborts connections idle for too long, otherwise gives a client another chance to write.
    pub fn on_tcp_poll<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) {
        let max_idle = self.config.max_idle_polls;
        let (idle, pump) = match self.tcp_mut(id) {
            Some((base, conn)) if conn.handle().is_some() => {
                conn.poll_count = conn.poll_count.saturating_add(1);
                let pump = base.role == Role::Client && !base.reverse && conn.phase == Phase::Transfer;
                (conn.poll_count >= max_idle, pump)
            },
            _ => return,
        };

        if idle {
            net_debug!("{}: idle for {} polls", id, max_idle);
            self.close(stack, id, Outcome::AbortedLocal);
        } else if pump {
            self.tcp_send_more(stack, id);
        }
    }

    /// The stack aborted a connection and released its socket.
    pub fn on_tcp_err<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, err: stack::Error) {
        match self.tcp_mut(id) {
            Some((_, conn)) => conn.socket = Socket::Released,
            None => return,
        }

        net_debug!("{}: connection error: {}", id, err);
        self.close(stack, id, Outcome::AbortedRemote);
    }

    /// A listener got a connection.
    ///
    /// On success the connection is a new session which owns `handle`. On error the stack should
    /// refuse the connection.
    pub fn on_tcp_accept<S: Stack + ?Sized>(
        &mut self,
        stack: &mut S,
        listener: SessionId,
        handle: TcpHandle,
        remote: SocketAddr,
    ) -> stack::Result<SessionId> {
        let now = stack.now();
        let (policy, client) = match self.sessions.get(listener) {
            Some(session) => match session.as_tcp() {
                Some(conn) if conn.phase == Phase::Listening => (conn.accept, session.base.controller),
                _ => return Err(stack::Error::Illegal),
            },
            None => return Err(stack::Error::Illegal),
        };

        if let Some(policy) = policy {
            if remote.ip() != policy.remote {
                net_debug!("{}: refused {}, expecting {}", listener, remote, policy.remote);
                return Err(stack::Error::Illegal);
            }
        }

        // The test back to one of our clients belongs to that client.
        let controller = match policy {
            Some(_) => client,
            None => Some(listener),
        };
        let phase = match self.tcp_is_primary(controller) {
            true => Phase::Transfer,
            false => Phase::Settings,
        };

        let conn = Connection::new(Socket::Connected(handle), phase, Settings::default());
        let base = Base::new(Role::Server, controller, now);
        let id = self.sessions.add(Session::tcp(base, conn))
            .ok_or(stack::Error::Exhausted)?;
        stack.tcp_set_owner(handle, id);
        net_debug!("{}: accepted {} on {}", id, remote, listener);

        if let Some(policy) = policy {
            let client_live = client.map_or(false, |client| self.sessions.contains(client));
            if !policy.tradeoff || !client_live {
                if let Some(session) = self.sessions.get_mut(listener) {
                    session.base.silent = true;
                }
                self.close(stack, listener, Outcome::AbortedLocal);
            }
        }

        Ok(id)
    }

    /// Write as much as the stack takes.
    pub(crate) fn tcp_send_more<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) {
        let controller = match self.sessions.get(id) {
            Some(session) => session.base.controller,
            None => return,
        };
        let primary = self.tcp_is_primary(controller);
        let block_size = self.config.block_size.max(2 * RECORD_LEN as u64);

        loop {
            let now = stack.now();
            let (base, conn) = match self.tcp_mut(id) {
                Some(session) => session,
                None => return,
            };
            let handle = match conn.handle() {
                Some(handle) => handle,
                None => return,
            };

            if conn.settings.amount.reached(now - base.started, base.bytes) {
                let outcome = match base.reverse {
                    true => Outcome::DoneServerTx,
                    false => Outcome::DoneClientTx,
                };
                return self.close(stack, id, outcome);
            }

            let record = conn.settings.stream_record();
            let segment = conn.segment(stack.tcp_mss(handle));
            let counts = base.counts_sent();
            let bytes = base.bytes;
            let block_pos = (bytes % block_size) as usize;

            let (chunk, more, again) = if primary && bytes < RECORD_LEN as u64 {
                (&record[bytes as usize..], false, false)
            } else if primary && block_pos < RECORD_LEN {
                (&record[block_pos..], true, true)
            } else {
                let mut len = usize::from(segment);
                if primary && block_pos == RECORD_LEN {
                    len = len.saturating_sub(RECORD_LEN).max(1);
                }
                len = len.min(block_size as usize - block_pos);
                (pattern::slice(block_pos, len), false, true)
            };

            let min = usize::from(segment / 2).max(1);
            let mut len = chunk.len();
            let written = loop {
                match stack.tcp_write(handle, &chunk[..len], more) {
                    Ok(()) => break Some(len),
                    Err(stack::Error::Exhausted) if len / 2 >= min => len /= 2,
                    Err(_) => break None,
                }
            };

            match (written, self.tcp_mut(id)) {
                (Some(len), Some((base, _))) => {
                    if counts {
                        base.bytes += len as u64;
                    }
                    if !again {
                        break;
                    }
                },
                _ => break,
            }
        }

        if let Some(handle) = self.tcp_conn(id).and_then(Connection::handle) {
            stack.tcp_output(handle);
        }
    }

    /// The peer closed its side of the connection.
    fn tcp_remote_closed<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) {
        let (phase, mode, role, reverse) = match self.sessions.get(id) {
            Some(session) => match session.as_tcp() {
                Some(conn) => (conn.phase, Mode::of(&conn.settings), session.base.role, session.base.reverse),
                None => return,
            },
            None => return,
        };

        let outcome = match (phase, role, reverse) {
            (Phase::Settings, _, _) => Outcome::AbortedLocalDataError,
            (_, Role::Client, false) | (_, Role::Server, true) => Outcome::AbortedRemote,
            (_, Role::Client, true) => Outcome::DoneClientRx,
            (_, Role::Server, false) => Outcome::DoneServerRx,
        };

        if outcome == Outcome::DoneServerRx && mode == Mode::Tradeoff {
            net_info!("{}: client requested transmission after end of test", id);
            if let Err(err) = self.tcp_answer_passive(stack, id) {
                net_debug!("{}: no transmission back: {}", id, err);
            }
        }

        self.close(stack, id, outcome);
    }

    /// Act on the requests of settings that just arrived.
    ///
    /// Returns if the session is still live.
    fn tcp_dispatch<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId, mode: Mode) -> bool {
        match mode {
            Mode::Reverse => {
                net_info!("{}: client requested server to transmit data", id);
                self.tcp_answer_reverse(stack, id);
            },
            Mode::Dual => {
                net_info!("{}: client requested parallel transmission test", id);
                if let Err(err) = self.tcp_answer_passive(stack, id) {
                    net_debug!("{}: no transmission back: {}", id, err);
                    self.close(stack, id, Outcome::AbortedLocalTxError);
                }
            },
            Mode::Tradeoff | Mode::Simple => (),
        }

        self.sessions.contains(id)
    }

    /// Turn a server connection around to transmit.
    fn tcp_answer_reverse<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) {
        let now = stack.now();
        if let Some((base, conn)) = self.tcp_mut(id) {
            base.reverse = true;
            base.started = now;
            conn.poll_count = 0;
        }
        self.tcp_send_more(stack, id);
    }

    /// Connect back to the peer of a server connection.
    ///
    /// The peer's settings are reused without any of their requests.
    fn tcp_answer_passive<S: Stack + ?Sized>(&mut self, stack: &mut S, id: SessionId) -> Result<SessionId> {
        let session = self.sessions.get(id).ok_or(Error::InvalidArgument)?;
        let conn = session.as_tcp().ok_or(Error::InvalidArgument)?;
        let handle = conn.handle().ok_or(Error::Stack(stack::Error::Closed))?;
        let remote = stack.tcp_remote(handle).ok_or(Error::Stack(stack::Error::Closed))?;
        let port = match u16::try_from(conn.settings.remote_port) {
            Ok(0) | Err(_) => return Err(Error::InvalidArgument),
            Ok(port) => port,
        };

        let controller = session.base.controller;
        let mut settings = conn.settings;
        settings.clear_flags();

        let remote = SocketAddr::new(remote.ip(), port);
        let answer = self.tcp_connect(stack, remote, settings, controller, 0)?;
        net_info!("{}: transmitting back to {} as {}", id, remote, answer);
        Ok(answer)
    }

    /// Create a listener session.
    fn tcp_listen<S: Stack + ?Sized>(&mut self, stack: &mut S, local: SocketAddr, controller: Option<SessionId>)
        -> Result<SessionId>
    {
        let base = Base::new(Role::Server, controller, stack.now());
        let conn = Connection::new(Socket::Released, Phase::Listening, Settings::default());
        let id = self.sessions.add(Session::tcp(base, conn)).ok_or(Error::Exhausted)?;

        let family = match local.ip() {
            ip if ip.is_unspecified() => Family::Any,
            ip => Family::of(ip),
        };
        let handle = match stack.tcp_new(id, family) {
            Ok(handle) => handle,
            Err(err) => {
                self.sessions.remove(id);
                return Err(err.into());
            },
        };
        if let Some((_, conn)) = self.tcp_mut(id) {
            conn.socket = Socket::Listening(handle);
        }

        if let Err(err) = stack.tcp_bind(handle, local).and_then(|()| stack.tcp_listen(handle)) {
            self.discard(stack, id);
            return Err(err.into());
        }

        net_info!("{}: TCP server listening on {}", id, local);
        Ok(id)
    }

    /// Create a connecting client session.
    fn tcp_connect<S: Stack + ?Sized>(
        &mut self,
        stack: &mut S,
        remote: SocketAddr,
        settings: Settings,
        controller: Option<SessionId>,
        tos: u8,
    ) -> Result<SessionId> {
        let mut base = Base::new(Role::Client, controller, stack.now());
        base.reverse = settings.is_reverse();
        let conn = Connection::new(Socket::Released, Phase::Connecting, settings);
        let id = self.sessions.add(Session::tcp(base, conn)).ok_or(Error::Exhausted)?;

        let handle = match stack.tcp_new(id, Family::of(remote.ip())) {
            Ok(handle) => handle,
            Err(err) => {
                self.sessions.remove(id);
                return Err(err.into());
            },
        };
        if let Some((_, conn)) = self.tcp_mut(id) {
            conn.socket = Socket::Connected(handle);
        }

        if tos != 0 {
            stack.tcp_set_tos(handle, tos);
        }

        if let Err(err) = stack.tcp_connect(handle, remote) {
            self.discard(stack, id);
            return Err(err.into());
        }

        Ok(id)
    }

    /// Check if a session under this controller sends the settings record.
    ///
    /// Sessions of a server expect it, sessions of one of our clients do not.
    fn tcp_is_primary(&self, controller: Option<SessionId>) -> bool {
        controller
            .and_then(|controller| self.sessions.get(controller))
            .map_or(true, |controller| controller.base.role == Role::Client)
    }

    fn tcp_conn(&self, id: SessionId) -> Option<&Connection> {
        self.sessions.get(id)?.as_tcp()
    }

    fn tcp_mut(&mut self, id: SessionId) -> Option<(&mut Base, &mut Connection)> {
        self.sessions.get_mut(id)?.as_tcp_mut()
    }
}
