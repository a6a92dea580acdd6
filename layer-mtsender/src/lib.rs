//! # layer-mtsender
//!
//! The session engine of an MTProto client.
//!
//! A [`Sender`] owns one connection and turns concurrent requests into
//! correctly sequenced, encrypted and acknowledged messages, while a
//! background reader routes replies back to their callers.
//!
//! ## What it takes care of
//! - Message ids (strictly increasing, divisible by 4) and sequence numbers
//! - Acknowledgments, batched and flushed by size, timer or piggyback
//! - Containers, with the outer id checked against every inner one
//! - Exactly-once completion of every pending request
//! - Transparent recovery from `bad_server_salt` and `bad_msg_notification`
//! - Update delivery on a worker pool, so slow handlers never stall reading
//!
//! Transport, cipher and clock are pluggable through [`Transport`],
//! [`Cipher`] and [`TimeSource`]; [`TcpTransport`], [`Mtproto2`] and
//! [`ServerClock`] are the defaults.

#![deny(unsafe_code)]

mod ack;
mod cipher;
mod config;
mod dispatch;
mod errors;
mod inbound;
mod message;
mod pending;
mod recovery;
mod sender;
mod sent_log;
mod state;
mod time;
mod transport;
pub mod updates;

pub use cipher::{Cipher, CipherError, Mtproto2, pack_plaintext, unpack_plaintext};
pub use config::{Config, Endpoint};
pub use errors::{InvocationError, ProtocolError, RpcError};
pub use message::{Message, is_content_related};
pub use sender::Sender;
pub use time::{ServerClock, TimeSource};
pub use transport::{AbridgedReader, AbridgedWriter, FrameReader, FrameWriter, TcpTransport, Transport};
pub use updates::{Callbacks, EventStream, NoCallbacks, SessionEvent, Update, event_channel};
