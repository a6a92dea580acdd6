//! TL binary primitives and the MTProto service schema.
//!
//! This crate covers the two pieces of the Type Language the session layer
//! needs to understand itself:
//!
//! | Module            | Contents                                                        |
//! |-------------------|-----------------------------------------------------------------|
//! | [`serialize`]     | [`Serializable`] and the primitive encodings                    |
//! | [`deserialize`]   | [`Deserializable`], [`Cursor`] and the primitive decodings      |
//! | [`mtproto`]       | Service objects: acks, containers, `rpc_result`, salts, notices |
//!
//! Application-level objects stay opaque: an RPC function only has to
//! implement [`RemoteCall`] so its body can be sent and its answer decoded.
//!
//! ```rust
//! use layer_tl::{Deserializable, Serializable, mtproto::MsgsAck};
//!
//! let ack = MsgsAck { msg_ids: vec![0x5f00_0000_0000_0004] };
//! let bytes = ack.to_bytes();
//! assert_eq!(MsgsAck::from_bytes(&bytes).unwrap(), ack);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod deserialize;
pub mod mtproto;
pub mod serialize;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// Constructor ID of the boxed `Vector` type.
pub const VECTOR_ID: u32 = 0x1cb5c415;

/// Bare vector: `vector` (lowercase) as opposed to the boxed `Vector`.
///
/// Containers and `future_salts` carry their items this way, without the
/// `0x1cb5c415` header.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Opaque blob of bytes passed through without interpretation.
///
/// Useful as the `Return` of a call whose answer the caller decodes later.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

impl Deserializable for Blob {
    fn deserialize(buf: deserialize::Buffer) -> deserialize::Result<Self> {
        Ok(Self(buf.read_rest().to_vec()))
    }
}

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Every TL constructor has a unique 32-bit ID.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function type that can be sent to the server as an RPC call.
///
/// `Return` is the type the server will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;
}
