use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connctx::ConnCtx;
use super::error::RelayError;
use super::room::Room;

/// Relay-wide counters
#[derive(Debug, Default)]
pub struct RelayMetrics {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    malformed_frames: AtomicU64,
}

impl RelayMetrics {
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn rejected_connections(&self) -> u64 {
        self.rejected_connections.load(Ordering::Relaxed)
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub scoped_rooms: usize,
    pub unscoped_rooms: usize,
    pub idle_rooms: usize,
    pub connections: usize,
    pub awareness_states: usize,
}

/// Table of live rooms, keyed by room name.
///
/// Owned by the server instance and handed to the relay entry point. Rooms
/// are created on first join and only go away through `evict_idle`.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    metrics: RelayMetrics,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Join `ctx` to the named room, creating the room if needed.
    ///
    /// The registry lock is held until the connection is a member, so the
    /// janitor can never evict a room between lookup and join.
    pub async fn join(&self, name: &str, ctx: ConnCtx) -> Result<Arc<Mutex<Room>>, RelayError> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                let room = room.clone();
                room.lock().await.join(ctx)?;
                return Ok(room);
            }
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Creating room {}", name);
                Arc::new(Mutex::new(Room::new(name)))
            })
            .clone();
        room.lock().await.join(ctx)?;
        Ok(room)
    }

    pub async fn stats(&self) -> RegistryStats {
        let rooms = self.rooms.read().await;
        let mut stats = RegistryStats {
            rooms: rooms.len(),
            ..RegistryStats::default()
        };
        for room in rooms.values() {
            let room = room.lock().await;
            if room.scope().is_scoped() {
                stats.scoped_rooms += 1;
            } else {
                stats.unscoped_rooms += 1;
            }
            if room.connection_count() == 0 {
                stats.idle_rooms += 1;
            }
            stats.connections += room.connection_count();
            stats.awareness_states += room.awareness_count();
        }
        stats
    }

    /// Drop rooms that have had no connections for at least `ttl`.
    /// Rooms whose lock is held right now are left alone.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|name, room| match room.try_lock() {
            Ok(room) if room.is_idle_longer_than(ttl) => {
                info!("Evicting idle room {}", name);
                false
            }
            _ => true,
        });
        before - rooms.len()
    }
}

/// Periodically evict idle rooms. Does nothing when `ttl` is `None`.
pub fn spawn_janitor(registry: Arc<RoomRegistry>, interval: Duration, ttl: Option<Duration>) -> Option<JoinHandle<()>> {
    let ttl = ttl?;
    info!("Room janitor evicting rooms idle for {:?}, every {:?}", ttl, interval);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = registry.evict_idle(ttl).await;
            if evicted > 0 {
                info!("Janitor evicted {} idle rooms", evicted);
            } else {
                debug!("Janitor found no idle rooms");
            }
        }
    }))
}
