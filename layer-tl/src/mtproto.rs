//! The MTProto service namespace.
//!
//! These objects never reach the application: they are produced and consumed
//! by the session layer itself (acknowledgments, containers, result wrappers,
//! salt and message-id corrections). Everything else is an application object.
//!
//! Schema reference: <https://core.telegram.org/schema/mtproto>

use crate::deserialize::{Buffer, Error, Result, peek_id};
use crate::{Deserializable, Identifiable, RawVec, Serializable};

macro_rules! tl_object {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                Self::CONSTRUCTOR_ID.serialize(buf);
                $( self.$field.serialize(buf); )*
            }
        }

        impl Deserializable for $name {
            fn deserialize(buf: Buffer) -> Result<Self> {
                buf.expect_id(Self::CONSTRUCTOR_ID)?;
                Ok(Self { $( $field: <$ty>::deserialize(buf)?, )* })
            }
        }
    };
}

tl_object! {
    /// `msgs_ack#62d6b459`: acknowledges receipt of content-related messages.
    MsgsAck = 0x62d6b459 {
        /// Acknowledged message IDs.
        msg_ids: Vec<i64>,
    }
}

tl_object! {
    /// `rpc_error#2144ca19`: must always arrive inside an [`RpcResult`].
    RpcError = 0x2144ca19 {
        /// HTTP-like status code.
        error_code: i32,
        /// Error name such as `FLOOD_WAIT_30`.
        error_message: String,
    }
}

tl_object! {
    /// `bad_server_salt#edab447b`: resend `bad_msg_id` with `new_server_salt`.
    BadServerSalt = 0xedab447b {
        /// The rejected message.
        bad_msg_id: i64,
        /// Its sequence number.
        bad_msg_seqno: i32,
        /// Always `48`.
        error_code: i32,
        /// The salt to use from now on.
        new_server_salt: i64,
    }
}

tl_object! {
    /// `bad_msg_notification#a7eff811`: the message id or seqno was rejected.
    BadMsgNotification = 0xa7eff811 {
        /// The rejected message.
        bad_msg_id: i64,
        /// Its sequence number.
        bad_msg_seqno: i32,
        /// One of the `BadMsgNotification::*` codes.
        error_code: i32,
    }
}

impl BadMsgNotification {
    /// The message id is too low (the client clock is behind).
    pub const MSG_ID_TOO_LOW: i32 = 16;
    /// The message id is too high (the client clock is ahead).
    pub const MSG_ID_TOO_HIGH: i32 = 17;
    /// The two lower bits of the message id are not zero.
    pub const MSG_ID_MODULO: i32 = 18;
    /// A container reused the id of a previously received message.
    pub const CONTAINER_MSG_ID_REUSED: i32 = 19;
    /// The message is too old to tell whether it was received.
    pub const MSG_TOO_OLD: i32 = 20;
    /// The seqno is lower than an already received one.
    pub const SEQNO_TOO_LOW: i32 = 32;
    /// The seqno is higher than expected.
    pub const SEQNO_TOO_HIGH: i32 = 33;
    /// An even seqno was expected (content-unrelated message).
    pub const SEQNO_EXPECTED_EVEN: i32 = 34;
    /// An odd seqno was expected (content-related message).
    pub const SEQNO_EXPECTED_ODD: i32 = 35;
    /// Reported through [`BadServerSalt`] instead.
    pub const BAD_SERVER_SALT: i32 = 48;
    /// The container itself was malformed.
    pub const INVALID_CONTAINER: i32 = 64;
}

tl_object! {
    /// `new_session_created#9ec20908`: the server opened a session for us.
    NewSessionCreated = 0x9ec20908 {
        /// First message id the server saw in this session.
        first_msg_id: i64,
        /// Server-side unique id of the session.
        unique_id: i64,
        /// Salt currently valid for this session.
        server_salt: i64,
    }
}

tl_object! {
    /// `msg_detailed_info#276d3ec6`
    MsgDetailedInfo = 0x276d3ec6 {
        /// The message this info refers to.
        msg_id: i64,
        /// The answer the server already sent.
        answer_msg_id: i64,
        /// Size of the answer.
        bytes: i32,
        /// Delivery status bits.
        status: i32,
    }
}

tl_object! {
    /// `msg_new_detailed_info#809db6df`
    MsgNewDetailedInfo = 0x809db6df {
        /// The answer the server already sent.
        answer_msg_id: i64,
        /// Size of the answer.
        bytes: i32,
        /// Delivery status bits.
        status: i32,
    }
}

tl_object! {
    /// `msg_resend_req#7d861a08`
    MsgResendReq = 0x7d861a08 {
        /// Messages the peer asks to have resent.
        msg_ids: Vec<i64>,
    }
}

tl_object! {
    /// `ping#7abe77ec`
    Ping = 0x7abe77ec {
        /// Echoed back in [`Pong::ping_id`].
        ping_id: i64,
    }
}

tl_object! {
    /// `pong#347773c5`: answers a [`Ping`]; `msg_id` is the ping's message id.
    Pong = 0x347773c5 {
        /// Message id of the ping being answered.
        msg_id: i64,
        /// Value from [`Ping::ping_id`].
        ping_id: i64,
    }
}

tl_object! {
    /// `gzip_packed#3072cfa1`: a compressed serialized object.
    GzipPacked = 0x3072cfa1 {
        /// Compressed bytes of the inner object.
        packed_data: Vec<u8>,
    }
}

// ─── future_salt / future_salts ──────────────────────────────────────────────

/// `future_salt#0949d9dc`
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalt {
    /// Unix time the salt becomes valid.
    pub valid_since: i32,
    /// Unix time the salt expires.
    pub valid_until: i32,
    /// The salt value.
    pub salt: i64,
}

impl Identifiable for FutureSalt {
    const CONSTRUCTOR_ID: u32 = 0x0949d9dc;
}

impl FutureSalt {
    fn deserialize_bare(buf: Buffer) -> Result<Self> {
        Ok(Self {
            valid_since: i32::deserialize(buf)?,
            valid_until: i32::deserialize(buf)?,
            salt:        i64::deserialize(buf)?,
        })
    }
}

impl Serializable for FutureSalt {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.valid_since.serialize(buf);
        self.valid_until.serialize(buf);
        self.salt.serialize(buf);
    }
}

impl Deserializable for FutureSalt {
    fn deserialize(buf: Buffer) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        Self::deserialize_bare(buf)
    }
}

/// `future_salts#ae500895`: answer to `get_future_salts`.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalts {
    /// The request being answered.
    pub req_msg_id: i64,
    /// Server time.
    pub now: i32,
    /// Upcoming salts, carried as a bare vector of bare `future_salt`.
    pub salts: Vec<FutureSalt>,
}

impl Identifiable for FutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xae500895;
}

impl Deserializable for FutureSalts {
    fn deserialize(buf: Buffer) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        let req_msg_id = i64::deserialize(buf)?;
        let now = i32::deserialize(buf)?;
        let count = usize::try_from(i32::deserialize(buf)?).map_err(|_| Error::UnexpectedEof)?;
        let salts = (0..count).map(|_| FutureSalt::deserialize_bare(buf)).collect::<Result<_>>()?;
        Ok(Self { req_msg_id, now, salts })
    }
}

// ─── rpc_result ──────────────────────────────────────────────────────────────

/// `rpc_result#f35c6d01 req_msg_id:long result:Object`
///
/// `result` is kept serialized; it is either an [`RpcError`], a
/// [`GzipPacked`] object, or the application-level answer.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    /// The request this result answers.
    pub req_msg_id: i64,
    /// Serialized result object.
    pub result: Vec<u8>,
}

impl Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        buf.extend(self.result.iter().copied());
    }
}

impl Deserializable for RpcResult {
    fn deserialize(buf: Buffer) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        let req_msg_id = i64::deserialize(buf)?;
        Ok(Self { req_msg_id, result: buf.read_rest().to_vec() })
    }
}

// ─── msg_container ───────────────────────────────────────────────────────────

/// One entry of a [`MsgContainer`]: `msg_id:long seqno:int bytes:int body:Object`.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainedMessage {
    /// Inner message id; must be lower than the container's.
    pub msg_id: i64,
    /// Inner sequence number.
    pub seq_no: i32,
    /// Serialized inner object.
    pub body: Vec<u8>,
}

impl Serializable for ContainedMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for ContainedMessage {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;
        let len = usize::try_from(i32::deserialize(buf)?).map_err(|_| Error::UnexpectedEof)?;
        let body = buf.read_slice(len)?.to_vec();
        Ok(Self { msg_id, seq_no, body })
    }
}

/// `msg_container#73f1f8dc messages:vector<%Message>`
#[derive(Clone, Debug, PartialEq)]
pub struct MsgContainer {
    /// Contained messages, in wire order.
    pub messages: Vec<ContainedMessage>,
}

impl Identifiable for MsgContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MsgContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        for m in &self.messages { m.serialize(buf); }
    }
}

impl Deserializable for MsgContainer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        Ok(Self { messages: RawVec::<ContainedMessage>::deserialize(buf)?.0 })
    }
}

// ─── Namespace ───────────────────────────────────────────────────────────────

/// Any object of the service namespace.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum ServiceObject {
    MsgsAck(MsgsAck),
    RpcResult(RpcResult),
    RpcError(RpcError),
    MsgContainer(MsgContainer),
    BadServerSalt(BadServerSalt),
    BadMsgNotification(BadMsgNotification),
    NewSessionCreated(NewSessionCreated),
    FutureSalt(FutureSalt),
    FutureSalts(FutureSalts),
    MsgDetailedInfo(MsgDetailedInfo),
    MsgNewDetailedInfo(MsgNewDetailedInfo),
    MsgResendReq(MsgResendReq),
    Ping(Ping),
    Pong(Pong),
    GzipPacked(GzipPacked),
}

/// `true` if `id` names an object of the service namespace.
pub fn is_service_constructor(id: u32) -> bool {
    matches!(
        id,
        MsgsAck::CONSTRUCTOR_ID
            | RpcResult::CONSTRUCTOR_ID
            | RpcError::CONSTRUCTOR_ID
            | MsgContainer::CONSTRUCTOR_ID
            | BadServerSalt::CONSTRUCTOR_ID
            | BadMsgNotification::CONSTRUCTOR_ID
            | NewSessionCreated::CONSTRUCTOR_ID
            | FutureSalt::CONSTRUCTOR_ID
            | FutureSalts::CONSTRUCTOR_ID
            | MsgDetailedInfo::CONSTRUCTOR_ID
            | MsgNewDetailedInfo::CONSTRUCTOR_ID
            | MsgResendReq::CONSTRUCTOR_ID
            | Ping::CONSTRUCTOR_ID
            | Pong::CONSTRUCTOR_ID
            | GzipPacked::CONSTRUCTOR_ID
    )
}

impl ServiceObject {
    /// Decode a serialized service object, dispatching on its constructor ID.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(match peek_id(bytes)? {
            MsgsAck::CONSTRUCTOR_ID            => Self::MsgsAck(MsgsAck::from_bytes(bytes)?),
            RpcResult::CONSTRUCTOR_ID          => Self::RpcResult(RpcResult::from_bytes(bytes)?),
            RpcError::CONSTRUCTOR_ID           => Self::RpcError(RpcError::from_bytes(bytes)?),
            MsgContainer::CONSTRUCTOR_ID       => Self::MsgContainer(MsgContainer::from_bytes(bytes)?),
            BadServerSalt::CONSTRUCTOR_ID      => Self::BadServerSalt(BadServerSalt::from_bytes(bytes)?),
            BadMsgNotification::CONSTRUCTOR_ID => Self::BadMsgNotification(BadMsgNotification::from_bytes(bytes)?),
            NewSessionCreated::CONSTRUCTOR_ID  => Self::NewSessionCreated(NewSessionCreated::from_bytes(bytes)?),
            FutureSalt::CONSTRUCTOR_ID         => Self::FutureSalt(FutureSalt::from_bytes(bytes)?),
            FutureSalts::CONSTRUCTOR_ID        => Self::FutureSalts(FutureSalts::from_bytes(bytes)?),
            MsgDetailedInfo::CONSTRUCTOR_ID    => Self::MsgDetailedInfo(MsgDetailedInfo::from_bytes(bytes)?),
            MsgNewDetailedInfo::CONSTRUCTOR_ID => Self::MsgNewDetailedInfo(MsgNewDetailedInfo::from_bytes(bytes)?),
            MsgResendReq::CONSTRUCTOR_ID       => Self::MsgResendReq(MsgResendReq::from_bytes(bytes)?),
            Ping::CONSTRUCTOR_ID               => Self::Ping(Ping::from_bytes(bytes)?),
            Pong::CONSTRUCTOR_ID               => Self::Pong(Pong::from_bytes(bytes)?),
            GzipPacked::CONSTRUCTOR_ID         => Self::GzipPacked(GzipPacked::from_bytes(bytes)?),
            id => return Err(Error::UnexpectedConstructor { id }),
        })
    }
}
