use alloc::vec::Vec;

use super::{Session, SessionId};
use crate::managed::SlotMap;

/// All live sessions.
///
/// Owns the sessions in a fixed capacity arena and keeps a separate index of live ids, newest
/// first, which is the order of every scan.
pub struct Registry {
    arena: SlotMap<Session>,
    live: Vec<SessionId>,
}

impl Registry {
    /// Create a registry holding at most `capacity` sessions.
    pub fn with_capacity(capacity: usize) -> Self {
        Registry {
            arena: SlotMap::with_capacity(capacity),
            live: Vec::with_capacity(capacity),
        }
    }

    /// Register a session. Returns `None` when the registry is full.
    pub(crate) fn add(&mut self, session: Session) -> Option<SessionId> {
        let id = SessionId(self.arena.insert(session)?);
        self.live.insert(0, id);
        Some(id)
    }

    /// Unregister a session, returning it.
    ///
    /// Every other session controlled by it loses its controller, which is remembered as stale
    /// so that aborting the old id still reaches them.
    pub(crate) fn remove(&mut self, id: SessionId) -> Option<Session> {
        if !self.contains(id) {
            return None;
        }

        let mut found = 0;
        for &other in &self.live {
            if other == id {
                found += 1;
                continue;
            }

            if let Some(session) = self.arena.get_mut(other.0) {
                if session.base.controller == Some(id) {
                    session.base.controller = None;
                    session.base.stale_controller = Some(id);
                }
            }
        }
        assert_eq!(found, 1, "session {} listed {} times", id, found);

        self.live.retain(|&other| other != id);
        self.arena.remove(id.0)
    }

    /// Check if a session is still live.
    pub fn contains(&self, id: SessionId) -> bool {
        self.arena.get(id.0).is_some()
    }

    /// Look up a live session, `None` once it closed.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.arena.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.arena.get_mut(id.0)
    }

    /// A snapshot of the live ids, newest first.
    ///
    /// Sessions may close while the snapshot is processed, each id has to be checked again.
    pub fn ids(&self) -> Vec<SessionId> {
        self.live.clone()
    }

    /// Iterate the live sessions, newest first.
    pub fn iter(&self) -> impl Iterator<Item=(SessionId, &Session)> + '_ {
        self.live.iter()
            .filter_map(move |&id| self.arena.get(id.0).map(|session| (id, session)))
    }

    /// Check if aborting `handle` must close the session `id`.
    ///
    /// True for the session itself and for sessions it controls or controlled before it closed.
    pub(crate) fn in_family_of(&self, id: SessionId, handle: SessionId) -> bool {
        match self.get(id) {
            Some(session) => id == handle
                || session.base.controller == Some(handle)
                || session.base.stale_controller == Some(handle),
            None => false,
        }
    }

    /// The number of live sessions.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Check if no session is live.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}
