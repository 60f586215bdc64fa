use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    client::{Client, ClientId, Enqueue, Outbox},
    config::{EchoPolicy, HubConfig},
};

/// The shared broadcast domain.
///
/// All access to the membership map goes through one guard. Critical sections
/// only ever call `try_send`, so they are short and never suspend.
#[derive(Debug)]
pub struct Room {
    members: Mutex<Membership>,
    next_id: AtomicU64,
    config: HubConfig,
}

#[derive(Debug, Default)]
struct Membership {
    clients: HashMap<ClientId, Client>,
    // Set by `close`; later joins are turned away.
    closed: bool,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: Vec<ClientId>,
}

impl Room {
    pub fn new(config: HubConfig) -> Self {
        Self {
            members: Mutex::new(Membership::default()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn next_id(&self) -> ClientId {
        ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocates an id and builds a client sized for this room.
    pub fn new_client(&self) -> (Client, Outbox) {
        Client::new(self.next_id(), self.config.effective_queue_capacity())
    }

    /// Registers `client`. Once the room has been closed the client is
    /// dropped instead, which ends its session straight away.
    pub fn join(&self, client: Client) -> ClientId {
        let id = client.id();
        let mut members = self.members.lock();
        if members.closed {
            debug!(client = %id, "room closed; turning client away");
            return id;
        }
        if members.clients.insert(id, client).is_some() {
            // Ids come from `next_id`, so this only happens if a caller reuses one.
            warn!(client = %id, "replaced existing member with the same id");
        }
        debug!(client = %id, members = members.clients.len(), "client joined");
        id
    }

    /// Removes `id` if it is still a member. Returns whether this call did
    /// the removal; later calls are no-ops.
    pub fn leave(&self, id: ClientId) -> bool {
        let removed = self.members.lock().clients.remove(&id);
        if removed.is_none() {
            return false;
        }
        debug!(client = %id, "client left");
        true
    }

    /// Queues `message` to every member.
    pub fn broadcast(&self, message: Bytes) -> Delivery {
        let mut members = self.members.lock();
        fan_out(&mut members.clients, None, message)
    }

    /// Queues a message received from `origin`, honouring the echo policy.
    ///
    /// A message from a client that is no longer a member is discarded: its
    /// read may have completed after it was evicted.
    pub fn relay(&self, origin: ClientId, message: Bytes) -> Delivery {
        let mut members = self.members.lock();
        if !members.clients.contains_key(&origin) {
            debug!(client = %origin, "dropping message from departed client");
            return Delivery::default();
        }
        let skip = match self.config.echo {
            EchoPolicy::IncludeSender => None,
            EchoPolicy::ExcludeSender => Some(origin),
        };
        fan_out(&mut members.clients, skip, message)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.members.lock().clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().clients.is_empty()
    }

    /// Current members, sorted by id.
    pub fn members(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.members.lock().clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes every member and returns how many there were. The room stays
    /// closed: clients joining afterwards are turned away.
    pub fn close(&self) -> usize {
        let drained: Vec<Client> = {
            let mut members = self.members.lock();
            members.closed = true;
            members.clients.drain().map(|(_, client)| client).collect()
        };
        // Dropped outside the guard.
        drained.len()
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

fn fan_out(
    members: &mut HashMap<ClientId, Client>,
    skip: Option<ClientId>,
    message: Bytes,
) -> Delivery {
    let mut delivery = Delivery::default();

    members.retain(|id, client| {
        if Some(*id) == skip {
            return true;
        }
        match client.try_enqueue(message.clone()) {
            Enqueue::Queued => {
                delivery.delivered += 1;
                true
            }
            Enqueue::Full => {
                warn!(client = %id, "outbound queue full; evicting unresponsive client");
                delivery.evicted.push(*id);
                false
            }
            Enqueue::Gone => {
                debug!(client = %id, "writer already gone; evicting client");
                delivery.evicted.push(*id);
                false
            }
        }
    });

    delivery
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_with(capacity: usize, echo: EchoPolicy) -> Room {
        Room::new(HubConfig {
            queue_capacity: capacity,
            echo,
            ..HubConfig::default()
        })
    }

    #[test]
    fn join_and_leave_track_membership() {
        let room = Room::default();
        let (client, _outbox) = room.new_client();
        let id = room.join(client);

        assert!(room.contains(id));
        assert_eq!(room.len(), 1);

        assert!(room.leave(id));
        assert!(!room.contains(id));
        assert!(room.is_empty());
    }

    #[tokio::test]
    async fn leave_twice_is_a_noop_the_second_time() {
        let room = Room::default();
        let (a, mut outbox) = room.new_client();
        let (b, _b_outbox) = room.new_client();
        let a = room.join(a);
        let b = room.join(b);

        assert!(room.leave(a));
        assert!(!room.leave(a));
        assert_eq!(room.members(), vec![b]);
        assert!(outbox.is_evicted());
        assert_eq!(outbox.recv().await, None);
    }

    #[test]
    fn broadcast_reaches_every_member_in_order() {
        let room = Room::default();
        let (a, mut a_out) = room.new_client();
        let (b, mut b_out) = room.new_client();
        room.join(a);
        room.join(b);

        assert_eq!(room.broadcast(Bytes::from_static(b"m1")).delivered, 2);
        assert_eq!(room.broadcast(Bytes::from_static(b"m2")).delivered, 2);

        for outbox in [&mut a_out, &mut b_out] {
            assert_eq!(outbox.try_recv(), Some(Bytes::from_static(b"m1")));
            assert_eq!(outbox.try_recv(), Some(Bytes::from_static(b"m2")));
            assert_eq!(outbox.try_recv(), None);
        }
    }

    #[test]
    fn full_queue_evicts_only_the_slow_client() {
        let room = room_with(2, EchoPolicy::IncludeSender);
        let (slow, slow_out) = room.new_client();
        let (fast, mut fast_out) = room.new_client();
        let slow = room.join(slow);
        let fast = room.join(fast);

        for _ in 0..2 {
            room.broadcast(Bytes::from_static(b"fill"));
            fast_out.try_recv().expect("fast client drains");
        }
        assert_eq!(slow_out.len(), 2);

        let delivery = room.broadcast(Bytes::from_static(b"overflow"));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.evicted, vec![slow]);
        assert_eq!(room.members(), vec![fast]);
        assert!(slow_out.is_evicted());
        assert_eq!(fast_out.try_recv(), Some(Bytes::from_static(b"overflow")));

        // Gone for good: later broadcasts do not touch it.
        let delivery = room.broadcast(Bytes::from_static(b"after"));
        assert!(delivery.evicted.is_empty());
        assert_eq!(slow_out.len(), 2);
    }

    #[test]
    fn dropped_outbox_is_evicted_on_next_broadcast() {
        let room = Room::default();
        let (client, outbox) = room.new_client();
        let id = room.join(client);
        drop(outbox);

        let delivery = room.broadcast(Bytes::from_static(b"anyone?"));
        assert_eq!(delivery.delivered, 0);
        assert_eq!(delivery.evicted, vec![id]);
        assert!(room.is_empty());
    }

    #[test]
    fn relay_applies_echo_policy() {
        for (echo, expect_echo) in [
            (EchoPolicy::IncludeSender, true),
            (EchoPolicy::ExcludeSender, false),
        ] {
            let room = room_with(8, echo);
            let (a, mut a_out) = room.new_client();
            let (b, mut b_out) = room.new_client();
            let a = room.join(a);
            room.join(b);

            room.relay(a, Bytes::from_static(b"hi"));

            assert_eq!(b_out.try_recv(), Some(Bytes::from_static(b"hi")));
            assert_eq!(a_out.try_recv().is_some(), expect_echo, "{echo:?}");
        }
    }

    #[test]
    fn relay_from_departed_client_is_discarded() {
        let room = Room::default();
        let (a, _a_out) = room.new_client();
        let (b, mut b_out) = room.new_client();
        let a = room.join(a);
        room.join(b);
        room.leave(a);

        assert_eq!(room.relay(a, Bytes::from_static(b"ghost")), Delivery::default());
        assert_eq!(b_out.try_recv(), None);
    }

    #[test]
    fn close_evicts_everyone() {
        let room = Room::default();
        let outboxes: Vec<_> = (0..3)
            .map(|_| {
                let (client, outbox) = room.new_client();
                room.join(client);
                outbox
            })
            .collect();

        assert_eq!(room.close(), 3);
        assert!(room.is_empty());
        assert!(outboxes.iter().all(|outbox| outbox.is_evicted()));
        assert_eq!(room.close(), 0);
    }

    #[tokio::test]
    async fn closed_room_turns_new_clients_away() {
        let room = Room::default();
        room.close();

        let (client, mut outbox) = room.new_client();
        let id = room.join(client);

        assert!(!room.contains(id));
        assert!(room.is_empty());
        assert!(outbox.is_evicted());
        assert_eq!(outbox.recv().await, None);
        assert_eq!(room.broadcast(Bytes::from_static(b"late")), Delivery::default());
    }

    #[test]
    fn ids_are_never_reused() {
        let room = Room::default();
        let first = room.next_id();
        let second = room.next_id();
        assert!(second > first);
    }
}
