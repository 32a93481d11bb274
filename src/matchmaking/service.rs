//! Room manager - places connections into rooms and tears empty rooms down

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::game::{spawn_room, ConnId, GameError, RoomCommand, RoomHandle, RoomId};
use crate::ws::protocol::ServerEvent;

use super::device::DeviceClass;

struct RoomEntry {
    handle: RoomHandle,
    affinity: DeviceClass,
    members: HashSet<ConnId>,
}

#[derive(Default)]
struct Rooms {
    rooms: HashMap<RoomId, RoomEntry>,
    /// Connection -> owning room
    index: HashMap<ConnId, RoomId>,
}

/// Process-wide room table. Joins and leaves are serialized by one lock.
pub struct RoomManager {
    config: Arc<GameConfig>,
    inner: Mutex<Rooms>,
}

impl RoomManager {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            config,
            inner: Mutex::new(Rooms::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.room_capacity
    }

    /// First room of this affinity with a free slot, or a new one.
    ///
    /// A room created here and never joined is shut down by the next
    /// [`sweep_empty_rooms`](Self::sweep_empty_rooms).
    pub fn find_or_create_room(&self, affinity: DeviceClass) -> RoomId {
        let mut rooms = self.inner.lock();
        self.find_or_create_locked(&mut rooms, affinity)
    }

    /// Add a connection to an existing room and join its game.
    ///
    /// Fails with `RoomNotFound` if the room vanished after lookup and with
    /// `CapacityExceeded` if it filled up in the meantime.
    pub fn add_member(
        &self,
        conn: ConnId,
        room_id: RoomId,
        name: String,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<RoomHandle, GameError> {
        let mut rooms = self.inner.lock();
        self.add_member_locked(&mut rooms, conn, room_id, name, outbox)
    }

    /// Find-or-create and add in one critical section. A room whose task has
    /// died is dropped and the join is retried once in a fresh room.
    pub fn join(
        &self,
        conn: ConnId,
        affinity: DeviceClass,
        name: String,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<RoomHandle, GameError> {
        let mut rooms = self.inner.lock();
        let room_id = self.find_or_create_locked(&mut rooms, affinity);
        match self.add_member_locked(&mut rooms, conn, room_id, name.clone(), outbox.clone()) {
            Err(GameError::RoomNotFound) => {
                let room_id = self.find_or_create_locked(&mut rooms, affinity);
                self.add_member_locked(&mut rooms, conn, room_id, name, outbox)
            }
            placed => placed,
        }
    }

    /// Remove a connection; the room is destroyed once it is empty
    pub fn remove_member(&self, conn: ConnId) -> Option<RoomId> {
        let mut rooms = self.inner.lock();
        let room_id = rooms.index.remove(&conn)?;

        let Some(entry) = rooms.rooms.get_mut(&room_id) else {
            warn!(conn_id = %conn, room_id = %room_id, "Index pointed at a missing room");
            return None;
        };

        entry.members.remove(&conn);
        if entry.handle.send(RoomCommand::Leave { conn }).is_err() {
            debug!(room_id = %room_id, "Room task already gone");
        }

        if entry.members.is_empty() {
            let _ = entry.handle.send(RoomCommand::Shutdown);
            rooms.rooms.remove(&room_id);
            info!(room_id = %room_id, active_rooms = rooms.rooms.len(), "Room destroyed");
        }

        Some(room_id)
    }

    /// Shut down every room without members
    pub fn sweep_empty_rooms(&self) -> usize {
        let mut rooms = self.inner.lock();
        let empty: Vec<RoomId> = rooms
            .rooms
            .iter()
            .filter(|(_, entry)| entry.members.is_empty())
            .map(|(id, _)| *id)
            .collect();

        for room_id in &empty {
            if let Some(entry) = rooms.rooms.remove(room_id) {
                let _ = entry.handle.send(RoomCommand::Shutdown);
            }
        }

        if !empty.is_empty() {
            info!(swept = empty.len(), active_rooms = rooms.rooms.len(), "Swept empty rooms");
        }
        empty.len()
    }

    #[cfg(test)]
    pub fn room_of(&self, conn: &ConnId) -> Option<RoomId> {
        self.inner.lock().index.get(conn).copied()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn member_count(&self) -> usize {
        self.inner.lock().index.len()
    }

    #[cfg(test)]
    pub fn members_of(&self, room_id: &RoomId) -> usize {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .map(|entry| entry.members.len())
            .unwrap_or(0)
    }

    fn find_or_create_locked(&self, rooms: &mut Rooms, affinity: DeviceClass) -> RoomId {
        let capacity = self.capacity();
        let existing = rooms
            .rooms
            .iter()
            .find(|(_, entry)| entry.affinity == affinity && entry.members.len() < capacity)
            .map(|(id, _)| *id);

        if let Some(room_id) = existing {
            return room_id;
        }

        let handle = spawn_room(self.config.clone());
        let room_id = handle.id;
        rooms.rooms.insert(
            room_id,
            RoomEntry {
                handle,
                affinity,
                members: HashSet::new(),
            },
        );
        info!(room_id = %room_id, affinity = %affinity, active_rooms = rooms.rooms.len(), "Room created");
        room_id
    }

    fn add_member_locked(
        &self,
        rooms: &mut Rooms,
        conn: ConnId,
        room_id: RoomId,
        name: String,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<RoomHandle, GameError> {
        let capacity = self.capacity();
        let entry = rooms
            .rooms
            .get_mut(&room_id)
            .ok_or(GameError::RoomNotFound)?;

        if entry.members.len() >= capacity {
            return Err(GameError::CapacityExceeded);
        }

        if entry
            .handle
            .send(RoomCommand::Join { conn, name, outbox })
            .is_err()
        {
            warn!(room_id = %room_id, "Room task is gone, dropping room");
            rooms.rooms.remove(&room_id);
            rooms.index.retain(|_, owner| *owner != room_id);
            return Err(GameError::RoomNotFound);
        }

        entry.members.insert(conn);
        let handle = entry.handle.clone();
        rooms.index.insert(conn, room_id);
        Ok(handle)
    }
}

/// Periodically sweep rooms left without members
pub fn spawn_sweeper(rooms: Arc<RoomManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            rooms.sweep_empty_rooms();
        }
    })
}
