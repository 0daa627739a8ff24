//! Per-document room state and the message handlers that mutate it.
//!
//! A `Room` is only ever touched through the registry's per-room mutex, so
//! each handler runs to completion before the next frame for the same room
//! is looked at. Broadcasts are queued while that lock is held, which keeps
//! delivery to every peer in the order the room processed the frames.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use yrs::block::ClientID;
use yrs::sync::awareness::{Awareness, AwarenessUpdate};
use yrs::sync::SyncMessage;
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use super::connctx::{ConnCtx, ConnId, Delivery, Outbound};
use super::error::RelayError;
use super::protocol::{encode_content_sync, encode_presence, Frame};
use super::room_name::RoomScope;

pub struct Room {
    name: String,
    scope: RoomScope,
    /// Owns the room's document
    awareness: Awareness,
    conns: HashMap<ConnId, ConnCtx>,
    /// Last clock accepted per awareness client id
    presence_clocks: HashMap<ClientID, u32>,
    idle_since: Option<Instant>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            scope: RoomScope::parse(&name),
            name,
            awareness: Awareness::new(Doc::new()),
            conns: HashMap::new(),
            presence_clocks: HashMap::new(),
            idle_since: Some(Instant::now()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &RoomScope {
        &self.scope
    }

    pub fn doc(&self) -> &Doc {
        self.awareness.doc()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn contains(&self, conn_id: &ConnId) -> bool {
        self.conns.contains_key(conn_id)
    }

    /// Number of distinct awareness client ids held by live connections
    pub fn awareness_count(&self) -> usize {
        self.conns
            .values()
            .flat_map(|c| c.controlled_ids().iter())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_idle_longer_than(&self, ttl: Duration) -> bool {
        match self.idle_since {
            Some(since) => self.conns.is_empty() && since.elapsed() >= ttl,
            None => false,
        }
    }

    /// Add an admitted connection and queue its initial snapshot:
    /// a state-vector request first, then the full awareness table.
    pub fn join(&mut self, ctx: ConnCtx) -> Result<(), RelayError> {
        let state_vector = self.doc().transact().state_vector();
        let step1: Outbound = encode_content_sync(SyncMessage::SyncStep1(state_vector)).into();
        let snapshot = self
            .awareness
            .update()
            .map_err(|e| RelayError::Awareness(e.to_string()))?;
        let presence: Outbound = encode_presence(snapshot).into();

        ctx.deliver(&step1);
        ctx.deliver(&presence);

        info!(
            "Connection {} joined room {} as {} ({} peers already present)",
            ctx.conn_id,
            self.name,
            ctx.role,
            self.conns.len()
        );
        self.conns.insert(ctx.conn_id, ctx);
        self.idle_since = None;
        Ok(())
    }

    /// Decode and handle one inbound frame. The returned frame, if any, is
    /// meant for the sender only.
    pub fn handle_frame(&mut self, conn_id: ConnId, bytes: &[u8]) -> Result<Option<Outbound>, RelayError> {
        if !self.conns.contains_key(&conn_id) {
            return Err(RelayError::UnknownConnection(conn_id));
        }

        let frame = Frame::decode(bytes)?;
        debug!("Frame {} ({} bytes) from {} in room {}", frame.kind(), bytes.len(), conn_id, self.name);
        match frame {
            Frame::ContentSync(msg) => self.handle_content_sync(conn_id, msg),
            Frame::Presence(update) => {
                self.handle_presence(conn_id, update, bytes)?;
                Ok(None)
            }
        }
    }

    fn handle_content_sync(&mut self, conn_id: ConnId, msg: SyncMessage) -> Result<Option<Outbound>, RelayError> {
        match msg {
            SyncMessage::SyncStep1(remote_sv) => {
                // Answering a state-vector request is not a write, viewers get it too
                let diff = self.diff_since(&remote_sv);
                Ok(Some(encode_content_sync(SyncMessage::SyncStep2(diff)).into()))
            }
            SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
                let read_only = self.conns.get(&conn_id).map_or(true, |c| c.is_read_only());
                if read_only {
                    debug!("Dropping update from read-only connection {} in room {}", conn_id, self.name);
                    return Ok(None);
                }

                self.apply_update(&update)?;
                let frame: Outbound = encode_content_sync(SyncMessage::Update(update)).into();
                self.broadcast(Some(conn_id), &frame);
                Ok(None)
            }
        }
    }

    fn handle_presence(&mut self, conn_id: ConnId, update: AwarenessUpdate, raw: &[u8]) -> Result<(), RelayError> {
        // Same acceptance rule the awareness table applies: a newer clock wins,
        // an equal clock only counts as a removal
        let mut accepted = Vec::new();
        for (client_id, entry) in update.clients.iter() {
            let removal = &*entry.json == "null";
            let newer = match self.presence_clocks.get(client_id) {
                None => true,
                Some(&current) => current < entry.clock || (current == entry.clock && removal),
            };
            if newer {
                accepted.push((*client_id, entry.clock, removal));
            } else {
                debug!("Ignoring stale presence for client {} from {} in room {}", client_id, conn_id, self.name);
            }
        }

        self.awareness
            .apply_update(update)
            .map_err(|e| RelayError::Awareness(e.to_string()))?;

        for (client_id, clock, removal) in accepted {
            self.presence_clocks.insert(client_id, clock);
            for (id, ctx) in self.conns.iter_mut() {
                if *id == conn_id && !removal {
                    ctx.claim(client_id);
                } else {
                    ctx.release(&client_id);
                }
            }
        }

        let frame: Outbound = Arc::from(raw);
        self.broadcast(Some(conn_id), &frame);
        Ok(())
    }

    /// Remove a connection, purge the awareness states it published and tell
    /// the remaining peers about the removal.
    pub fn leave(&mut self, conn_id: ConnId) -> Option<ConnCtx> {
        let mut ctx = self.conns.remove(&conn_id)?;

        // A reconnecting client may reuse its awareness id on a newer connection
        let mut client_ids = ctx.take_controlled_ids();
        client_ids.retain(|id| !self.conns.values().any(|c| c.controlled_ids().contains(id)));

        if !client_ids.is_empty() {
            for client_id in &client_ids {
                self.awareness.remove_state(*client_id);
            }
            match self.awareness.update_with_clients(client_ids) {
                Ok(removal) => {
                    for (client_id, entry) in removal.clients.iter() {
                        self.presence_clocks.insert(*client_id, entry.clock);
                    }
                    let frame: Outbound = encode_presence(removal).into();
                    self.broadcast(None, &frame);
                }
                Err(e) => warn!("Failed to encode awareness removal in room {}: {}", self.name, e),
            }
        }

        if self.conns.is_empty() {
            self.idle_since = Some(Instant::now());
        }
        info!("Connection {} left room {} ({} peers remaining)", conn_id, self.name, self.conns.len());
        Some(ctx)
    }

    /// Queue a frame for every connection except `exclude`. Peers whose
    /// writer is gone are skipped. Peers that are still connected but whose
    /// queue is full are removed from the room, which closes their
    /// connection so the client reconnects and resyncs. Returns how many
    /// peers accepted the frame.
    pub fn broadcast(&mut self, exclude: Option<ConnId>, frame: &Outbound) -> usize {
        let mut delivered = 0;
        let mut targets = 0;
        let mut lagging = Vec::new();
        for (id, ctx) in self.conns.iter() {
            if Some(*id) == exclude {
                continue;
            }
            targets += 1;
            match ctx.deliver(frame) {
                Delivery::Queued => delivered += 1,
                Delivery::Lagging => lagging.push(*id),
                Delivery::Unreachable => {}
            }
        }
        debug!("Broadcast {} bytes in room {} to {}/{} peers", frame.len(), self.name, delivered, targets);

        for conn_id in lagging {
            warn!("Connection {} fell behind in room {}, disconnecting it", conn_id, self.name);
            self.leave(conn_id);
        }
        delivered
    }

    fn diff_since(&self, remote_sv: &StateVector) -> Vec<u8> {
        self.doc().transact().encode_state_as_update_v1(remote_sv)
    }

    fn apply_update(&self, update: &[u8]) -> Result<(), RelayError> {
        let update = Update::decode_v1(update)?;
        let mut txn = self.doc().transact_mut();
        txn.apply_update(update)
            .map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessRole;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use uuid::Uuid;
    use yrs::sync::awareness::AwarenessUpdateEntry;
    use yrs::sync::Message;
    use yrs::{GetString, Text, WriteTxn};

    fn connect(room: &mut Room, role: AccessRole) -> (ConnId, mpsc::Receiver<Outbound>) {
        let (tx, mut rx) = mpsc::channel(16);
        let conn_id = Uuid::new_v4();
        room.join(ConnCtx::new(conn_id, None, role, tx)).unwrap();
        // Initial state-vector request and awareness snapshot
        rx.try_recv().unwrap();
        rx.try_recv().unwrap();
        (conn_id, rx)
    }

    fn text_update(content: &str) -> Vec<u8> {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let text = txn.get_or_insert_text("content");
            text.insert(&mut txn, 0, content);
        }
        let txn = doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn update_frame(content: &str) -> Vec<u8> {
        encode_content_sync(SyncMessage::Update(text_update(content)))
    }

    fn room_text(room: &Room) -> String {
        let txn = room.doc().transact();
        txn.get_text("content")
            .map(|t| t.get_string(&txn))
            .unwrap_or_default()
    }

    fn presence_frame(client_id: ClientID, clock: u32, json: &str) -> Vec<u8> {
        encode_presence(AwarenessUpdate {
            clients: HashMap::from([(
                client_id,
                AwarenessUpdateEntry {
                    clock,
                    json: json.into(),
                },
            )]),
        })
    }

    #[test]
    fn test_join_queues_initial_snapshot_in_order() {
        let mut room = Room::new("project:p1:file:f1");
        let (tx, mut rx) = mpsc::channel(4);
        room.join(ConnCtx::new(Uuid::new_v4(), None, AccessRole::Viewer, tx)).unwrap();

        let first = Message::decode_v1(&rx.try_recv().unwrap()).unwrap();
        assert!(matches!(first, Message::Sync(SyncMessage::SyncStep1(_))));
        let second = Message::decode_v1(&rx.try_recv().unwrap()).unwrap();
        assert!(matches!(second, Message::Awareness(_)));
        assert!(rx.try_recv().is_err());
        assert!(room.scope().is_scoped());
        assert_eq!(room.connection_count(), 1);
    }

    #[test]
    fn test_editor_update_is_applied_and_broadcast_to_others() {
        let mut room = Room::new("project:p1:file:f1");
        let (a, mut rx_a) = connect(&mut room, AccessRole::Editor);
        let (_b, mut rx_b) = connect(&mut room, AccessRole::Owner);

        let reply = room.handle_frame(a, &update_frame("hello")).unwrap();
        assert!(reply.is_none());
        assert_eq!(room_text(&room), "hello");

        let received = Message::decode_v1(&rx_b.try_recv().unwrap()).unwrap();
        assert!(matches!(received, Message::Sync(SyncMessage::Update(_))));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_viewer_update_is_dropped() {
        let mut room = Room::new("project:p1:file:f1");
        let (viewer, _rx_v) = connect(&mut room, AccessRole::Viewer);
        let (_editor, mut rx_e) = connect(&mut room, AccessRole::Editor);

        let reply = room.handle_frame(viewer, &update_frame("sneaky")).unwrap();
        assert!(reply.is_none());
        assert_eq!(room_text(&room), "");
        assert!(rx_e.try_recv().is_err());

        let step2 = encode_content_sync(SyncMessage::SyncStep2(text_update("sneaky")));
        room.handle_frame(viewer, &step2).unwrap();
        assert_eq!(room_text(&room), "");
        assert!(rx_e.try_recv().is_err());
    }

    #[test]
    fn test_viewer_still_receives_existing_content() {
        let mut room = Room::new("project:p1:file:f1");
        let (editor, _rx_e) = connect(&mut room, AccessRole::Editor);
        room.handle_frame(editor, &update_frame("existing")).unwrap();

        let (viewer, _rx_v) = connect(&mut room, AccessRole::Viewer);
        let request = encode_content_sync(SyncMessage::SyncStep1(StateVector::default()));
        let reply = room.handle_frame(viewer, &request).unwrap().unwrap();

        match Message::decode_v1(&reply).unwrap() {
            Message::Sync(SyncMessage::SyncStep2(diff)) => {
                let doc = Doc::new();
                doc.transact_mut().apply_update(Update::decode_v1(&diff).unwrap()).unwrap();
                let txn = doc.transact();
                assert_eq!(txn.get_text("content").unwrap().get_string(&txn), "existing");
            }
            _ => panic!("expected sync step 2"),
        }
    }

    #[test]
    fn test_presence_from_viewer_is_relayed_verbatim() {
        let mut room = Room::new("project:p1:file:f1");
        let (viewer, _rx_v) = connect(&mut room, AccessRole::Viewer);
        let (_owner, mut rx_o) = connect(&mut room, AccessRole::Owner);

        let client_id = Doc::new().client_id();
        let frame = presence_frame(client_id, 1, r#"{"user":{"name":"viv"}}"#);
        room.handle_frame(viewer, &frame).unwrap();

        assert_eq!(&*rx_o.try_recv().unwrap(), frame.as_slice());
        assert_eq!(room.awareness_count(), 1);
    }

    #[test]
    fn test_leave_broadcasts_awareness_removal() {
        let mut room = Room::new("scratchpad");
        let (a, _rx_a) = connect(&mut room, AccessRole::Editor);
        let (_b, mut rx_b) = connect(&mut room, AccessRole::Editor);

        let client_id = Doc::new().client_id();
        room.handle_frame(a, &presence_frame(client_id, 1, r#"{"cursor":3}"#)).unwrap();
        rx_b.try_recv().unwrap();

        assert!(room.leave(a).is_some());
        match Message::decode_v1(&rx_b.try_recv().unwrap()).unwrap() {
            Message::Awareness(update) => {
                let entry = update.clients.get(&client_id).unwrap();
                assert_eq!(&*entry.json, "null");
            }
            _ => panic!("expected awareness removal"),
        }
        assert_eq!(room.awareness_count(), 0);
        assert!(!room.contains(&a));
    }

    #[test]
    fn test_leave_without_presence_sends_nothing() {
        let mut room = Room::new("scratchpad");
        let (a, _rx_a) = connect(&mut room, AccessRole::Editor);
        let (b, mut rx_b) = connect(&mut room, AccessRole::Editor);

        room.leave(a);
        assert!(rx_b.try_recv().is_err());
        assert!(room.leave(a).is_none());

        room.leave(b);
        assert!(room.is_idle_longer_than(Duration::ZERO));
    }

    #[test]
    fn test_leave_keeps_ids_claimed_by_newer_connection() {
        let mut room = Room::new("scratchpad");
        let (old, _rx_old) = connect(&mut room, AccessRole::Editor);
        let (new, _rx_new) = connect(&mut room, AccessRole::Editor);
        let (_c, mut rx_c) = connect(&mut room, AccessRole::Editor);

        let client_id = Doc::new().client_id();
        room.handle_frame(old, &presence_frame(client_id, 1, r#"{"n":1}"#)).unwrap();
        room.handle_frame(new, &presence_frame(client_id, 2, r#"{"n":2}"#)).unwrap();
        while rx_c.try_recv().is_ok() {}

        room.leave(old);
        assert!(rx_c.try_recv().is_err());
        assert_eq!(room.awareness_count(), 1);
    }

    #[test]
    fn test_duplicate_update_is_safe_and_still_relayed() {
        let mut room = Room::new("project:p1:file:f1");
        let (a, _rx_a) = connect(&mut room, AccessRole::Editor);
        let (_b, mut rx_b) = connect(&mut room, AccessRole::Editor);

        let frame = update_frame("once");
        room.handle_frame(a, &frame).unwrap();
        room.handle_frame(a, &frame).unwrap();

        assert_eq!(room_text(&room), "once");
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_malformed_frame_leaves_connection_in_room() {
        let mut room = Room::new("scratchpad");
        let (a, _rx_a) = connect(&mut room, AccessRole::Editor);
        let (_b, mut rx_b) = connect(&mut room, AccessRole::Editor);

        assert!(matches!(room.handle_frame(a, &[9, 9, 9]), Err(RelayError::MalformedMessage(_))));
        assert!(matches!(room.handle_frame(a, &[0, 2]), Err(RelayError::MalformedMessage(_))));
        assert!(room.contains(&a));
        assert!(rx_b.try_recv().is_err());

        room.handle_frame(a, &update_frame("after")).unwrap();
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_unknown_connection_is_rejected() {
        let mut room = Room::new("scratchpad");
        let err = room.handle_frame(Uuid::new_v4(), &update_frame("x")).err().unwrap();
        assert!(matches!(err, RelayError::UnknownConnection(_)));
    }

    #[test]
    fn test_unreachable_peer_does_not_block_others() {
        let mut room = Room::new("scratchpad");
        let (a, _rx_a) = connect(&mut room, AccessRole::Editor);
        let (_gone, rx_gone) = connect(&mut room, AccessRole::Editor);
        let (_c, mut rx_c) = connect(&mut room, AccessRole::Editor);
        drop(rx_gone);

        room.handle_frame(a, &update_frame("still delivered")).unwrap();
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn test_stale_presence_does_not_pin_another_connections_state() {
        let mut room = Room::new("project:p1:file:f1");
        let (owner, _rx_owner) = connect(&mut room, AccessRole::Editor);
        let (viewer, mut rx_viewer) = connect(&mut room, AccessRole::Viewer);

        let client_id = Doc::new().client_id();
        room.handle_frame(owner, &presence_frame(client_id, 5, r#"{"name":"owner"}"#)).unwrap();
        room.handle_frame(viewer, &presence_frame(client_id, 1, r#"{"name":"replayed"}"#)).unwrap();
        while rx_viewer.try_recv().is_ok() {}

        room.leave(owner);
        match Message::decode_v1(&rx_viewer.try_recv().unwrap()).unwrap() {
            Message::Awareness(update) => {
                assert_eq!(&*update.clients.get(&client_id).unwrap().json, "null");
            }
            _ => panic!("expected awareness removal"),
        }
        assert_eq!(room.awareness_count(), 0);

        // The viewer leaving afterwards has nothing left to remove
        room.leave(viewer);
        assert!(room.is_idle_longer_than(Duration::ZERO));
    }

    #[test]
    fn test_lagging_peer_is_disconnected_instead_of_diverging() {
        let mut room = Room::new("project:p1:file:f1");
        let (editor, _rx_editor) = connect(&mut room, AccessRole::Editor);
        let (_other, mut rx_other) = connect(&mut room, AccessRole::Editor);

        // Room for the initial snapshot only, never drained
        let (tx, mut rx_slow) = mpsc::channel(2);
        let slow = Uuid::new_v4();
        room.join(ConnCtx::new(slow, None, AccessRole::Editor, tx)).unwrap();

        room.handle_frame(editor, &update_frame("kept")).unwrap();
        assert_eq!(room_text(&room), "kept");
        assert!(!room.contains(&slow));
        assert!(rx_other.try_recv().is_ok());

        // Snapshot frames are still readable, then the writer sees the queue closed
        rx_slow.try_recv().unwrap();
        rx_slow.try_recv().unwrap();
        assert!(matches!(rx_slow.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[test]
    fn test_unreachable_peer_stays_until_it_leaves() {
        let mut room = Room::new("scratchpad");
        let (a, _rx_a) = connect(&mut room, AccessRole::Editor);
        let (gone, rx_gone) = connect(&mut room, AccessRole::Editor);
        drop(rx_gone);

        room.handle_frame(a, &update_frame("x")).unwrap();
        assert!(room.contains(&gone));
    }
}
