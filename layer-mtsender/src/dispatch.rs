//! Classification of decrypted payloads.

use std::io::Read;

use layer_tl::deserialize::peek_id;
use layer_tl::mtproto::{
    self as tl, BadMsgNotification, BadServerSalt, FutureSalt, FutureSalts, MsgDetailedInfo,
    MsgNewDetailedInfo, MsgResendReq, MsgsAck, NewSessionCreated, Pong, ServiceObject,
    is_service_constructor,
};
use layer_tl::{Deserializable, Identifiable};

use crate::errors::{ProtocolError, RpcError};
use crate::transport::MAX_FRAME_LEN;
use crate::updates::{Update, is_updates_constructor};

/// Every kind of payload the session can receive outside a container.
#[derive(Debug)]
pub(crate) enum Inbound {
    Ack(MsgsAck),
    RpcResult { req_msg_id: i64, outcome: Result<Vec<u8>, RpcError> },
    BareRpcError(RpcError),
    Update(Update),
    NewSession(NewSessionCreated),
    BadSalt(BadServerSalt),
    BadMessage(BadMsgNotification),
    FutureSalt(FutureSalt),
    FutureSalts(FutureSalts),
    DetailedInfo(MsgDetailedInfo),
    NewDetailedInfo(MsgNewDetailedInfo),
    ResendReq(MsgResendReq),
    Pong(Pong),
    Unknown(u32),
}

/// Service namespace first, then the update envelopes of the application
/// namespace. Compressed objects are inflated before classification.
pub(crate) fn classify(body: &[u8]) -> Result<Inbound, ProtocolError> {
    let id = peek_id(body).map_err(malformed)?;
    if is_updates_constructor(id) {
        return Ok(Inbound::Update(Update { constructor_id: id, body: body.to_vec() }));
    }
    if !is_service_constructor(id) {
        return Ok(Inbound::Unknown(id));
    }
    let obj = ServiceObject::decode(body).map_err(malformed)?;

    Ok(match obj {
        ServiceObject::MsgsAck(ack) => Inbound::Ack(ack),
        ServiceObject::RpcResult(res) => Inbound::RpcResult {
            req_msg_id: res.req_msg_id,
            outcome:    unwrap_result(res.result)?,
        },
        ServiceObject::RpcError(e) => Inbound::BareRpcError(e.into()),
        ServiceObject::GzipPacked(gz) => return classify(&gz_inflate(&gz.packed_data)?),
        ServiceObject::NewSessionCreated(n) => Inbound::NewSession(n),
        ServiceObject::BadServerSalt(b) => Inbound::BadSalt(b),
        ServiceObject::BadMsgNotification(b) => Inbound::BadMessage(b),
        ServiceObject::FutureSalt(s) => Inbound::FutureSalt(s),
        ServiceObject::FutureSalts(s) => Inbound::FutureSalts(s),
        ServiceObject::MsgDetailedInfo(i) => Inbound::DetailedInfo(i),
        ServiceObject::MsgNewDetailedInfo(i) => Inbound::NewDetailedInfo(i),
        ServiceObject::MsgResendReq(r) => Inbound::ResendReq(r),
        ServiceObject::Pong(p) => Inbound::Pong(p),
        // Containers only appear at the top level of a frame.
        ServiceObject::MsgContainer(_) | ServiceObject::Ping(_) => Inbound::Unknown(id),
    })
}

/// The body of an `rpc_result`: an `rpc_error`, a compressed answer, or the answer.
fn unwrap_result(result: Vec<u8>) -> Result<Result<Vec<u8>, RpcError>, ProtocolError> {
    match peek_id(&result).map_err(malformed)? {
        tl::RpcError::CONSTRUCTOR_ID => {
            let e = tl::RpcError::from_bytes(&result).map_err(malformed)?;
            Ok(Err(e.into()))
        }
        tl::GzipPacked::CONSTRUCTOR_ID => {
            let gz = tl::GzipPacked::from_bytes(&result).map_err(malformed)?;
            unwrap_result(gz_inflate(&gz.packed_data)?)
        }
        _ => Ok(Ok(result)),
    }
}

fn gz_inflate(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    inflate(data, MAX_FRAME_LEN)
}

/// gzip first, zlib as a fallback; output longer than `limit` is rejected.
fn inflate(data: &[u8], limit: usize) -> Result<Vec<u8>, ProtocolError> {
    let cap = limit as u64 + 1;
    let mut out = Vec::new();
    let gzip_ok = flate2::read::GzDecoder::new(data).take(cap).read_to_end(&mut out).is_ok();
    if !gzip_ok || out.is_empty() {
        out.clear();
        flate2::read::ZlibDecoder::new(data)
            .take(cap)
            .read_to_end(&mut out)
            .map_err(|_| ProtocolError::Malformed("decompression failed".into()))?;
    }
    if out.len() > limit {
        return Err(ProtocolError::Malformed(format!("compressed object inflates past {limit} bytes")));
    }
    Ok(out)
}

fn malformed(e: layer_tl::deserialize::Error) -> ProtocolError {
    ProtocolError::Malformed(e.to_string())
}
