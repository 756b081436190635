//! Room registry
//!
//! Process-wide directory of live rooms keyed by name. Every connection
//! task shares one registry; a room removes itself when its last member
//! leaves.
//!
//! All map access goes through a single `RwLock`, and `create` checks and
//! inserts under the write lock, so at most one room exists per name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::AppError;
use crate::room::Room;
use crate::types::PasswordHash;

/// Shared directory of rooms by name
#[derive(Debug)]
pub struct RoomRegistry {
    /// All live rooms: name -> Room
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    /// Member capacity given to every room created here
    room_capacity: usize,
}

impl RoomRegistry {
    /// Create an empty registry whose rooms hold at most `room_capacity` members
    pub fn new(room_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            room_capacity,
        })
    }

    /// Create a room, failing if the name is already taken
    pub async fn create(
        self: &Arc<Self>,
        name: String,
        password: PasswordHash,
    ) -> Result<Arc<Room>, AppError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&name) {
            return Err(AppError::RoomExists(name));
        }

        let room = Arc::new(Room::new(
            name.clone(),
            password,
            self.room_capacity,
            Arc::downgrade(self),
        ));
        rooms.insert(name, Arc::clone(&room));

        info!("Room '{}' created (total rooms: {})", room.name(), rooms.len());
        Ok(room)
    }

    /// Find a room by name
    pub async fn lookup(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Remove a room by name; absent names are ignored
    ///
    /// Administrative removal: the entry goes regardless of who is inside,
    /// and members already joined keep talking until they leave. Rooms
    /// that empty out, or whose creator never joins, go through
    /// `remove_if_empty` instead.
    pub async fn remove(&self, name: &str) {
        if self.rooms.write().await.remove(name).is_some() {
            debug!("Room '{}' removed", name);
        }
    }

    /// Close and unregister `room` if it still has no members
    ///
    /// Returns false when someone joined in the meantime. The entry is only
    /// removed if it still points at this very room.
    pub async fn remove_if_empty(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.write().await;
        if !room.close_if_empty().await {
            return false;
        }

        let registered = rooms
            .get(room.name())
            .is_some_and(|current| Arc::ptr_eq(current, room));
        if registered {
            rooms.remove(room.name());
            info!("Room '{}' deleted (empty)", room.name());
        }
        true
    }

    /// Number of live rooms
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    /// Up to `limit` rooms ordered by population - 1, descending
    ///
    /// Ranks a point-in-time snapshot of the map; populations are read
    /// after the map lock is released, so rooms filling up concurrently
    /// are ranked on a best-effort basis.
    pub async fn snapshot_ordered_by_population(&self, limit: usize) -> Vec<(String, i64)> {
        let snapshot: Vec<(String, Arc<Room>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(name, room)| (name.clone(), Arc::clone(room)))
            .collect();

        let mut populations = Vec::with_capacity(snapshot.len());
        for (name, room) in snapshot {
            populations.push((name, room.population().await));
        }
        rank_by_population(populations, limit)
    }
}

/// Order `(name, population)` pairs by population - 1, descending
///
/// The sort is stable: ties keep their input order.
pub fn rank_by_population(rooms: Vec<(String, usize)>, limit: usize) -> Vec<(String, i64)> {
    let mut ranked: Vec<(String, i64)> = rooms
        .into_iter()
        .map(|(name, population)| (name, population as i64 - 1))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::types::ClientId;

    fn hash(text: &str) -> PasswordHash {
        PasswordHash::new(text.to_string())
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = RoomRegistry::new(251);

        let room = registry.create("lobby".to_string(), hash("")).await.unwrap();
        assert_eq!(room.name(), "lobby");
        assert!(!room.has_password());

        let found = registry.lookup("lobby").await.unwrap();
        assert!(Arc::ptr_eq(&room, &found));
        assert!(registry.lookup("other").await.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let registry = RoomRegistry::new(251);
        let first = registry.create("lobby".to_string(), hash("a")).await.unwrap();

        let err = registry.create("lobby".to_string(), hash("b")).await.unwrap_err();
        assert!(matches!(err, AppError::RoomExists(name) if name == "lobby"));

        // The first room is untouched
        let found = registry.lookup("lobby").await.unwrap();
        assert!(Arc::ptr_eq(&first, &found));
        assert!(found.password_matches("a"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = RoomRegistry::new(251);
        registry.remove("missing").await;

        registry.create("lobby".to_string(), hash("")).await.unwrap();
        registry.remove("lobby").await;
        registry.remove("lobby").await;
        assert!(registry.lookup("lobby").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_frees_name_of_occupied_room() {
        let registry = RoomRegistry::new(251);
        let old = registry.create("lobby".to_string(), hash("a")).await.unwrap();

        let (server_io, client_io) = tokio::io::duplex(1024);
        old.add_user(
            ClientId::new(),
            "alice".to_string(),
            Connection::from_stream(server_io, "alice"),
            String::new(),
        )
        .await
        .unwrap();
        old.start();

        registry.remove("lobby").await;
        assert_eq!(old.population().await, 1);
        let new = registry.create("lobby".to_string(), hash("b")).await.unwrap();

        // The removed room emptying later must not evict its successor
        drop(client_io);
        for _ in 0..100 {
            if old.is_closed().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(old.is_closed().await);
        let found = registry.lookup("lobby").await.unwrap();
        assert!(Arc::ptr_eq(&new, &found));
    }

    #[test]
    fn test_rank_by_population() {
        let rooms = vec![
            ("A".to_string(), 5),
            ("B".to_string(), 1),
            ("C".to_string(), 10),
        ];
        let ranked = rank_by_population(rooms, 10);
        assert_eq!(
            ranked,
            vec![
                ("C".to_string(), 9),
                ("A".to_string(), 4),
                ("B".to_string(), 0)
            ]
        );
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let rooms = vec![
            ("x".to_string(), 2),
            ("y".to_string(), 3),
            ("z".to_string(), 2),
            ("w".to_string(), 0),
        ];
        let names: Vec<String> = rank_by_population(rooms, 10)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["y", "x", "z", "w"]);
    }

    #[test]
    fn test_rank_truncates() {
        let rooms: Vec<(String, usize)> = (0..15).map(|i| (format!("room{}", i), i)).collect();
        let ranked = rank_by_population(rooms, 10);
        assert_eq!(ranked.len(), 10);
        assert_eq!(ranked[0], ("room14".to_string(), 13));
        assert_eq!(ranked[9], ("room5".to_string(), 4));
    }

    #[tokio::test]
    async fn test_snapshot_reads_live_populations() {
        let registry = RoomRegistry::new(251);
        let busy = registry.create("busy".to_string(), hash("")).await.unwrap();
        registry.create("quiet".to_string(), hash("")).await.unwrap();

        let mut peers = Vec::new();
        for name in ["alice", "bob"] {
            let (server_io, client_io) = tokio::io::duplex(1024);
            peers.push(client_io);
            busy.add_user(
                ClientId::new(),
                name.to_string(),
                Connection::from_stream(server_io, name),
                String::new(),
            )
            .await
            .unwrap();
        }

        let ranked = registry.snapshot_ordered_by_population(10).await;
        assert_eq!(
            ranked,
            vec![("busy".to_string(), 1), ("quiet".to_string(), -1)]
        );
    }

    #[tokio::test]
    async fn test_remove_if_empty() {
        let registry = RoomRegistry::new(251);
        let room = registry.create("lobby".to_string(), hash("")).await.unwrap();

        assert!(registry.remove_if_empty(&room).await);
        assert!(registry.lookup("lobby").await.is_none());
        assert!(room.is_closed().await);
    }

    #[tokio::test]
    async fn test_remove_if_empty_spares_occupied_room() {
        let registry = RoomRegistry::new(251);
        let room = registry.create("lobby".to_string(), hash("")).await.unwrap();

        let (server_io, _client_io) = tokio::io::duplex(1024);
        room.add_user(
            ClientId::new(),
            "alice".to_string(),
            Connection::from_stream(server_io, "alice"),
            String::new(),
        )
        .await
        .unwrap();

        assert!(!registry.remove_if_empty(&room).await);
        assert!(registry.lookup("lobby").await.is_some());
    }
}
