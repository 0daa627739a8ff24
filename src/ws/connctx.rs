use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;
use yrs::block::ClientID;

use crate::models::AccessRole;

pub type ConnId = Uuid;

/// An encoded frame queued for a connection's writer task
pub type Outbound = Arc<[u8]>;

/// Lifecycle of a relay connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Admitted,
    Active,
    Closed,
}

/// Outcome of queueing a frame for one peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The peer is connected but not draining its queue; it missed the frame
    Lagging,
    /// The writer is gone, the connection is on its way out
    Unreachable,
}

/// Room-side context of one admitted connection
#[derive(Debug)]
pub struct ConnCtx {
    pub conn_id: ConnId,
    pub user_id: Option<String>,
    pub role: AccessRole,
    outbound: mpsc::Sender<Outbound>,
    /// Awareness client ids this connection has published
    controlled_ids: HashSet<ClientID>,
}

impl ConnCtx {
    pub fn new(
        conn_id: ConnId,
        user_id: Option<String>,
        role: AccessRole,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            conn_id,
            user_id,
            role,
            outbound,
            controlled_ids: HashSet::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.role.is_read_only()
    }

    /// Queue a frame without waiting
    pub fn deliver(&self, frame: &Outbound) -> Delivery {
        match self.outbound.try_send(frame.clone()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full for connection {}", self.conn_id);
                Delivery::Lagging
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for connection {}, skipping frame", self.conn_id);
                Delivery::Unreachable
            }
        }
    }

    pub fn claim(&mut self, client_id: ClientID) {
        self.controlled_ids.insert(client_id);
    }

    pub fn release(&mut self, client_id: &ClientID) {
        self.controlled_ids.remove(client_id);
    }

    pub fn controlled_ids(&self) -> &HashSet<ClientID> {
        &self.controlled_ids
    }

    pub fn take_controlled_ids(&mut self) -> Vec<ClientID> {
        self.controlled_ids.drain().collect()
    }
}
