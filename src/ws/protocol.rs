//! Wire framing for relay connections.
//!
//! Every frame starts with a varint tag, followed by a payload owned by the
//! document or awareness library:
//!
//! ```text
//! ┌───────────────┬──────────────────────────────────────────────┐
//! │ tag (varint)  │ payload                                      │
//! ├───────────────┼──────────────────────────────────────────────┤
//! │ 0 sync        │ step1(state vector) | step2(update) | update │
//! │ 1 presence    │ varbuf(awareness update)                     │
//! └───────────────┴──────────────────────────────────────────────┘
//! ```

use yrs::encoding::read::Read;
use yrs::sync::awareness::AwarenessUpdate;
use yrs::sync::{Message, SyncMessage};
use yrs::updates::decoder::{Decode, DecoderV1};
use yrs::updates::encoder::Encode;

use super::error::RelayError;

pub const MSG_CONTENT_SYNC: u32 = 0;
pub const MSG_PRESENCE: u32 = 1;

/// A decoded inbound frame
pub enum Frame {
    ContentSync(SyncMessage),
    Presence(AwarenessUpdate),
}

impl Frame {
    /// Decode a frame, rejecting unknown tags instead of skipping them
    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        let mut decoder = DecoderV1::from(bytes);
        let tag: u32 = decoder.read_var()?;
        match tag {
            MSG_CONTENT_SYNC => Ok(Frame::ContentSync(SyncMessage::decode(&mut decoder)?)),
            MSG_PRESENCE => {
                let payload = decoder.read_buf()?;
                Ok(Frame::Presence(AwarenessUpdate::decode_v1(payload)?))
            }
            other => Err(RelayError::MalformedMessage(format!("unknown message tag {}", other))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::ContentSync(SyncMessage::SyncStep1(_)) => "sync-step1",
            Frame::ContentSync(SyncMessage::SyncStep2(_)) => "sync-step2",
            Frame::ContentSync(SyncMessage::Update(_)) => "sync-update",
            Frame::Presence(_) => "presence",
        }
    }
}

pub fn encode_content_sync(msg: SyncMessage) -> Vec<u8> {
    Message::Sync(msg).encode_v1()
}

pub fn encode_presence(update: AwarenessUpdate) -> Vec<u8> {
    Message::Awareness(update).encode_v1()
}
