//! Logical (unencrypted) messages and what the sent log records about them.

use layer_tl::Serializable;
use layer_tl::deserialize::peek_id;
use layer_tl::mtproto::{ContainedMessage, MsgContainer, is_service_constructor};

/// One message as it travels inside the encrypted envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body:   Vec<u8>,
}

impl Message {
    pub fn new(msg_id: i64, seq_no: i32, body: Vec<u8>) -> Self {
        Self { msg_id, seq_no, body }
    }
}

/// Everything outside the service namespace is content-related.
pub fn is_content_related(body: &[u8]) -> bool {
    match peek_id(body) {
        Ok(id) => !is_service_constructor(id),
        Err(_) => true,
    }
}

/// A message written to the transport, as kept in the sent log.
///
/// Containers are kept structurally so that recovery can re-identify the
/// inner messages as well as the outer one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    Single(Message),
    Container {
        msg_id:   i64,
        seq_no:   i32,
        messages: Vec<Message>,
    },
}

impl Outgoing {
    /// The id the frame was sent under.
    pub fn msg_id(&self) -> i64 {
        match self {
            Self::Single(m) => m.msg_id,
            Self::Container { msg_id, .. } => *msg_id,
        }
    }

    /// `true` if `id` is this message's id or the id of one of its inner messages.
    pub fn contains(&self, id: i64) -> bool {
        match self {
            Self::Single(m) => m.msg_id == id,
            Self::Container { msg_id, messages, .. } => {
                *msg_id == id || messages.iter().any(|m| m.msg_id == id)
            }
        }
    }

    /// The message handed to the cipher.
    pub fn to_message(&self) -> Message {
        match self {
            Self::Single(m) => m.clone(),
            Self::Container { msg_id, seq_no, messages } => {
                let container = MsgContainer {
                    messages: messages
                        .iter()
                        .map(|m| ContainedMessage {
                            msg_id: m.msg_id,
                            seq_no: m.seq_no,
                            body:   m.body.clone(),
                        })
                        .collect(),
                };
                Message::new(*msg_id, *seq_no, container.to_bytes())
            }
        }
    }
}
