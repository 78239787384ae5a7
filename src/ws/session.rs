use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::PermissionLevel;
use crate::ws::EventMessage;

/// Client connection handle for pushing events. One per socket; the same
/// identity may hold several (multiple browser tabs).
#[derive(Clone)]
pub struct ClientHandle {
    pub conn_id: String,
    pub identity: String,
    pub room_id: String,
    pub display: String,
    pub level: PermissionLevel,
    pub sender: mpsc::UnboundedSender<EventMessage>,
}

impl ClientHandle {
    pub fn new(
        conn_id: String,
        identity: String,
        room_id: String,
        display: String,
        level: PermissionLevel,
        sender: mpsc::UnboundedSender<EventMessage>,
    ) -> Self {
        Self {
            conn_id,
            identity,
            room_id,
            display,
            level,
            sender,
        }
    }

    pub fn send(&self, msg: EventMessage) -> Result<(), mpsc::error::SendError<EventMessage>> {
        self.sender.send(msg)
    }
}

/// Connections of one room
pub struct RoomConnections {
    clients: dashmap::DashMap<String, ClientHandle>, // conn_id -> ClientHandle
}

impl RoomConnections {
    pub fn new() -> Self {
        Self {
            clients: dashmap::DashMap::new(),
        }
    }

    pub fn add_client(&self, handle: ClientHandle) {
        self.clients.insert(handle.conn_id.clone(), handle);
    }

    pub fn remove_client(&self, conn_id: &str) -> Option<ClientHandle> {
        self.clients.remove(conn_id).map(|(_, v)| v)
    }

    pub fn get_client(&self, conn_id: &str) -> Option<ClientHandle> {
        self.clients.get(conn_id).map(|r| r.clone())
    }

    pub fn send_to_identity(&self, identity: &str, msg: EventMessage) {
        for client in self.clients.iter() {
            if client.identity == identity {
                let _ = client.send(msg.clone());
            }
        }
    }

    pub fn send_to_moderators(&self, msg: EventMessage) {
        for client in self.clients.iter() {
            if client.level.can_moderate() {
                let _ = client.send(msg.clone());
            }
        }
    }

    pub fn broadcast(&self, msg: EventMessage) {
        for client in self.clients.iter() {
            let _ = client.send(msg.clone());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for RoomConnections {
    fn default() -> Self {
        Self::new()
    }
}

/// Global connections manager - tracks all rooms
pub struct ConnectionsManager {
    rooms: dashmap::DashMap<String, Arc<RoomConnections>>, // room_id -> RoomConnections
}

impl ConnectionsManager {
    pub fn new() -> Self {
        Self {
            rooms: dashmap::DashMap::new(),
        }
    }

    pub fn get_or_create_room(&self, room_id: &str) -> Arc<RoomConnections> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(RoomConnections::new()))
            .clone()
    }

    pub fn get_room(&self, room_id: &str) -> Option<Arc<RoomConnections>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    pub fn remove_client_from_room(&self, room_id: &str, conn_id: &str) -> Option<ClientHandle> {
        if let Some(room) = self.rooms.get(room_id) {
            let handle = room.remove_client(conn_id);

            // Clean up empty rooms
            if room.is_empty() {
                self.rooms.remove(room_id);
            }

            handle
        } else {
            None
        }
    }

    pub fn send_to_identity(&self, room_id: &str, identity: &str, msg: EventMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            room.send_to_identity(identity, msg);
        }
    }

    pub fn send_to_moderators(&self, room_id: &str, msg: EventMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            room.send_to_moderators(msg);
        }
    }

    pub fn broadcast(&self, room_id: &str, msg: EventMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            room.broadcast(msg);
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for ConnectionsManager {
    fn default() -> Self {
        Self::new()
    }
}
