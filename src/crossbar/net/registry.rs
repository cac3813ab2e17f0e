//! Session registry: the bidirectional session/channel maps every transition
//! goes through.
//!
//! Invariants, holding after every method:
//! - `channels[S] = C` iff `S ∈ sessions_by_channel[C]`
//! - for UDP sessions, `addresses[S]` is set iff `S ∈ sessions_by_address[addresses[S]]`
//! - a channel is multi-session iff its local port is flagged, otherwise it
//!   carries at most one session
//! - `output_queues[C]` and `last_write[C]` exist exactly while C is
//!   registered
//!
//! The registry is plain data guarded by the service; it performs no I/O.

use crate::crossbar::net::pipeline::OutputQueue;
use crate::crossbar::net::session::{NetSession, SessionId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Identity of an OS socket registered with the service.
pub type ChannelId = u64;

/// Result of destroying a channel.
#[derive(Default)]
pub struct DestroyedChannel {
    /// Sessions that were bound to the channel
    pub sessions: Vec<NetSession>,
    /// Subset of `sessions` permanently removed (disconnect-and-remove)
    pub removed: Vec<NetSession>,
}

/// Result of migrating sessions from one channel to another.
pub struct MigratedChannel {
    pub sessions: Vec<SessionId>,
    /// The old channel's output queue, so pending packages can be drained
    /// into the new channel's queue
    pub queue: Option<Arc<OutputQueue>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    channels: BTreeMap<SessionId, ChannelId>,
    sessions_by_channel: HashMap<ChannelId, BTreeSet<SessionId>>,
    addresses: HashMap<SessionId, SocketAddr>,
    sessions_by_address: HashMap<SocketAddr, BTreeSet<SessionId>>,
    output_queues: HashMap<ChannelId, Arc<OutputQueue>>,
    last_write: HashMap<ChannelId, Instant>,
    port_multi_session: HashMap<u16, bool>,
    sessions: BTreeMap<SessionId, NetSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_port(&mut self, port: u16, multi_session: bool) {
        self.port_multi_session.insert(port, multi_session);
    }

    pub fn is_multi_session(&self, port: u16) -> bool {
        self.port_multi_session.get(&port).copied().unwrap_or(false)
    }

    pub fn register_channel(&mut self, channel: ChannelId, queue: Arc<OutputQueue>) {
        self.output_queues.insert(channel, queue);
        self.last_write.insert(channel, Instant::now());
    }

    pub fn is_registered(&self, channel: ChannelId) -> bool {
        self.output_queues.contains_key(&channel)
    }

    pub fn queue(&self, channel: ChannelId) -> Option<Arc<OutputQueue>> {
        self.output_queues.get(&channel).cloned()
    }

    pub fn touch_write(&mut self, channel: ChannelId) {
        if let Some(last_write) = self.last_write.get_mut(&channel) {
            *last_write = Instant::now();
        }
    }

    pub fn last_write(&self, channel: ChannelId) -> Option<Instant> {
        self.last_write.get(&channel).copied()
    }

    /// Bind a session to a channel.
    pub fn attach_session(&mut self, session: &NetSession, channel: ChannelId) {
        self.sessions.insert(session.id(), session.clone());
        self.channels.insert(session.id(), channel);
        self.sessions_by_channel
            .entry(channel)
            .or_default()
            .insert(session.id());
    }

    pub fn channel_of(&self, session: SessionId) -> Option<ChannelId> {
        self.channels.get(&session).copied()
    }

    pub fn session(&self, session: SessionId) -> Option<NetSession> {
        self.sessions.get(&session).cloned()
    }

    pub fn sessions_list(&self) -> Vec<NetSession> {
        self.sessions.values().cloned().collect()
    }

    pub fn has_sessions(&self, channel: ChannelId) -> bool {
        self.sessions_by_channel
            .get(&channel)
            .map(|sessions| !sessions.is_empty())
            .unwrap_or(false)
    }

    pub fn session_count(&self, channel: ChannelId) -> usize {
        self.sessions_by_channel
            .get(&channel)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }

    /// The singleton session of a channel, used when its port is not
    /// multi-session.
    pub fn first_session(&self, channel: ChannelId) -> Option<NetSession> {
        self.sessions_by_channel
            .get(&channel)
            .and_then(|sessions| sessions.iter().next())
            .and_then(|id| self.sessions.get(id).cloned())
    }

    /// Bind a UDP session to its peer address.
    pub fn set_address(&mut self, session: SessionId, address: SocketAddr) {
        if let Some(previous) = self.addresses.insert(session, address) {
            if previous != address {
                if let Some(sessions) = self.sessions_by_address.get_mut(&previous) {
                    sessions.remove(&session);
                    if sessions.is_empty() {
                        self.sessions_by_address.remove(&previous);
                    }
                }
            }
        }
        self.sessions_by_address
            .entry(address)
            .or_default()
            .insert(session);
    }

    pub fn address_of(&self, session: SessionId) -> Option<SocketAddr> {
        self.addresses.get(&session).copied()
    }

    pub fn first_session_by_address(&self, address: SocketAddr) -> Option<NetSession> {
        self.sessions_by_address
            .get(&address)
            .and_then(|sessions| sessions.iter().next())
            .and_then(|id| self.sessions.get(id).cloned())
    }

    /// Guard against stale writes after a peer rebind: true only while the
    /// address still maps back to the session.
    pub fn address_maps_session(&self, address: SocketAddr, session: SessionId) -> bool {
        self.sessions_by_address
            .get(&address)
            .map(|sessions| sessions.contains(&session))
            .unwrap_or(false)
    }

    /// Move every binding of `old` onto `new`: session set, channel
    /// back-references and last-write. The old output queue is handed back so
    /// the caller can drain its pending packages into the new channel.
    pub fn update_channel(&mut self, old: ChannelId, new: ChannelId) -> MigratedChannel {
        let moved: Vec<SessionId> = self
            .sessions_by_channel
            .remove(&old)
            .map(|sessions| sessions.into_iter().collect())
            .unwrap_or_default();

        for session in &moved {
            self.channels.insert(*session, new);
            self.sessions_by_channel
                .entry(new)
                .or_default()
                .insert(*session);
        }

        if let Some(last_write) = self.last_write.remove(&old) {
            self.last_write.insert(new, last_write);
        }
        let queue = self.output_queues.remove(&old);

        MigratedChannel {
            sessions: moved,
            queue,
        }
    }

    /// Unregister a channel and every session bound to it. Idempotent: a
    /// second call returns an empty outcome.
    pub fn destroy_channel(
        &mut self,
        channel: ChannelId,
        disconnect_and_remove: bool,
    ) -> DestroyedChannel {
        let mut outcome = DestroyedChannel::default();

        self.output_queues.remove(&channel);
        self.last_write.remove(&channel);

        let bound = match self.sessions_by_channel.remove(&channel) {
            Some(bound) => bound,
            None => return outcome,
        };

        for session_id in bound {
            self.channels.remove(&session_id);
            if let Some(address) = self.addresses.remove(&session_id) {
                if let Some(sessions) = self.sessions_by_address.get_mut(&address) {
                    sessions.remove(&session_id);
                    if sessions.is_empty() {
                        self.sessions_by_address.remove(&address);
                    }
                }
            }

            if disconnect_and_remove {
                if let Some(session) = self.sessions.remove(&session_id) {
                    outcome.sessions.push(session.clone());
                    outcome.removed.push(session);
                }
            } else if let Some(session) = self.sessions.get(&session_id) {
                outcome.sessions.push(session.clone());
            }
        }

        outcome
    }

    /// Unbind one UDP client session without touching the shared socket,
    /// the datagram equivalent of a channel teardown.
    pub fn remove_udp_session(
        &mut self,
        session_id: SessionId,
        channel: ChannelId,
        disconnect_and_remove: bool,
    ) -> Option<NetSession> {
        self.output_queues.remove(&channel);
        self.last_write.remove(&channel);
        self.channels.remove(&session_id);
        if let Some(sessions) = self.sessions_by_channel.get_mut(&channel) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                self.sessions_by_channel.remove(&channel);
            }
        }
        if let Some(address) = self.addresses.remove(&session_id) {
            if let Some(sessions) = self.sessions_by_address.get_mut(&address) {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    self.sessions_by_address.remove(&address);
                }
            }
        }
        if disconnect_and_remove {
            self.sessions.remove(&session_id)
        } else {
            self.sessions.get(&session_id).cloned()
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for (session, channel) in &self.channels {
            assert!(
                self.sessions_by_channel
                    .get(channel)
                    .map(|sessions| sessions.contains(session))
                    .unwrap_or(false),
                "channels[{}] = {} but the session is not in sessions_by_channel",
                session,
                channel
            );
        }
        for (channel, sessions) in &self.sessions_by_channel {
            for session in sessions {
                assert_eq!(self.channels.get(session), Some(channel));
            }
        }
        for (session, address) in &self.addresses {
            assert!(
                self.sessions_by_address
                    .get(address)
                    .map(|sessions| sessions.contains(session))
                    .unwrap_or(false),
                "addresses[{}] not mirrored in sessions_by_address",
                session
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<OutputQueue> {
        Arc::new(OutputQueue::new())
    }

    #[test]
    fn test_attach_holds_bidirectional_invariant() {
        let mut registry = SessionRegistry::new();
        registry.register_channel(1, queue());
        let session = NetSession::new("server");
        registry.attach_session(&session, 1);

        assert_eq!(registry.channel_of(session.id()), Some(1));
        assert_eq!(registry.session_count(1), 1);
        registry.assert_invariants();
    }

    #[test]
    fn test_multi_session_channel_accumulates() {
        let mut registry = SessionRegistry::new();
        registry.register_port(9000, true);
        registry.register_channel(1, queue());
        for _ in 0..3 {
            registry.attach_session(&NetSession::new("server"), 1);
        }
        assert!(registry.is_multi_session(9000));
        assert_eq!(registry.session_count(1), 3);
        registry.assert_invariants();
    }

    #[test]
    fn test_destroy_channel_is_idempotent() {
        let mut registry = SessionRegistry::new();
        registry.register_channel(1, queue());
        let session = NetSession::new("server");
        registry.attach_session(&session, 1);

        let first = registry.destroy_channel(1, true);
        assert_eq!(first.sessions.len(), 1);
        assert_eq!(first.removed.len(), 1);
        assert!(!registry.is_registered(1));
        assert_eq!(registry.channel_of(session.id()), None);
        registry.assert_invariants();

        let second = registry.destroy_channel(1, true);
        assert!(second.sessions.is_empty());
        assert!(second.removed.is_empty());
    }

    #[test]
    fn test_destroy_without_remove_keeps_session_set() {
        let mut registry = SessionRegistry::new();
        registry.register_channel(1, queue());
        let session = NetSession::new("server");
        registry.attach_session(&session, 1);

        let outcome = registry.destroy_channel(1, false);
        assert_eq!(outcome.sessions.len(), 1);
        assert!(outcome.removed.is_empty());
        assert!(registry.session(session.id()).is_some());
        registry.assert_invariants();
    }

    #[test]
    fn test_migration_moves_queue_and_sessions() {
        let mut registry = SessionRegistry::new();
        let old_queue = queue();
        registry.register_channel(1, old_queue.clone());
        registry.register_channel(2, queue());
        let session = NetSession::new("server");
        registry.attach_session(&session, 1);

        let migrated = registry.update_channel(1, 2);
        assert_eq!(migrated.sessions, vec![session.id()]);
        assert!(Arc::ptr_eq(&migrated.queue.unwrap(), &old_queue));
        assert_eq!(registry.channel_of(session.id()), Some(2));
        assert!(!registry.is_registered(1));
        registry.assert_invariants();
    }

    #[test]
    fn test_address_rebind_guard() {
        let mut registry = SessionRegistry::new();
        registry.register_channel(1, queue());
        let session = NetSession::new("udp");
        registry.attach_session(&session, 1);

        let first: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let second: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        registry.set_address(session.id(), first);
        assert!(registry.address_maps_session(first, session.id()));

        registry.set_address(session.id(), second);
        assert!(!registry.address_maps_session(first, session.id()));
        assert!(registry.address_maps_session(second, session.id()));
        registry.assert_invariants();
    }
}
