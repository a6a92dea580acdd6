//! Error types for layer-mtsender.

use std::{fmt, io, time::Duration};

use crate::cipher::CipherError;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by the server inside an `rpc_result`.
///
/// Numeric values are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with the numeric suffix removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw server error such as `"FLOOD_WAIT_30"`.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        if let Some((name, suffix)) = message.rsplit_once('_') {
            if let Ok(v) = suffix.parse::<u32>() {
                return Self { code, name: name.to_string(), value: Some(v) };
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match on the error name, with an optional leading or trailing `'*'`.
    ///
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }
}

impl From<layer_tl::mtproto::RpcError> for RpcError {
    fn from(e: layer_tl::mtproto::RpcError) -> Self {
        Self::from_telegram(e.error_code, &e.error_message)
    }
}

// ─── ProtocolError ────────────────────────────────────────────────────────────

/// The server broke an MTProto invariant. Always fatal to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// A contained message had an id not lower than its container's.
    ContainerOrder { container_id: i64, msg_id: i64 },
    /// An `rpc_error` arrived outside of an `rpc_result`.
    BareRpcError(RpcError),
    /// The payload type is neither a service object nor an update.
    UnknownConstructor(u32),
    /// A service object could not be decoded.
    Malformed(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContainerOrder { container_id, msg_id } => write!(
                f, "contained msg_id {msg_id} is not below container msg_id {container_id}"
            ),
            Self::BareRpcError(e) => write!(f, "rpc_error outside rpc_result: {e}"),
            Self::UnknownConstructor(id) => write!(f, "unsupported payload {id:#010x}"),
            Self::Malformed(why) => write!(f, "malformed service object: {why}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any request made through a [`crate::Sender`].
#[derive(Debug)]
pub enum InvocationError {
    /// The server rejected the request.
    Rpc(RpcError),
    /// The server answered with a bare 4-byte transport error code.
    Transport(i32),
    /// Network / I/O failure.
    Io(io::Error),
    /// The frame could not be encrypted or decrypted.
    Cipher(CipherError),
    /// Response deserialization failed.
    Deserialize(String),
    /// The session was torn down by a protocol violation.
    Protocol(ProtocolError),
    /// No answer arrived within the given time.
    Timeout(Duration),
    /// The request was abandoned (connection reset or sender shut down).
    Dropped,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e)          => write!(f, "{e}"),
            Self::Transport(code) => write!(f, "transport error {code}"),
            Self::Io(e)           => write!(f, "I/O error: {e}"),
            Self::Cipher(e)       => write!(f, "cipher error: {e}"),
            Self::Deserialize(s)  => write!(f, "deserialize error: {s}"),
            Self::Protocol(e)     => write!(f, "protocol violation: {e}"),
            Self::Timeout(d)      => write!(f, "no response after {d:?}"),
            Self::Dropped         => write!(f, "request dropped"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e)      => Some(e),
            Self::Io(e)       => Some(e),
            Self::Cipher(e)   => Some(e),
            Self::Protocol(e) => Some(e),
            _                 => None,
        }
    }
}

impl From<io::Error> for InvocationError {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}

impl From<CipherError> for InvocationError {
    fn from(e: CipherError) -> Self { Self::Cipher(e) }
}

impl From<ProtocolError> for InvocationError {
    fn from(e: ProtocolError) -> Self { Self::Protocol(e) }
}

impl From<layer_tl::deserialize::Error> for InvocationError {
    fn from(e: layer_tl::deserialize::Error) -> Self { Self::Deserialize(e.to_string()) }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _            => false,
        }
    }

    /// A second copy of this error, for reporting one failure to several callers.
    ///
    /// `io::Error` is not `Clone`; its kind and message are preserved.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Rpc(e)          => Self::Rpc(e.clone()),
            Self::Transport(code) => Self::Transport(*code),
            Self::Io(e)           => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Cipher(e)       => Self::Cipher(e.clone()),
            Self::Deserialize(s)  => Self::Deserialize(s.clone()),
            Self::Protocol(e)     => Self::Protocol(e.clone()),
            Self::Timeout(d)      => Self::Timeout(*d),
            Self::Dropped         => Self::Dropped,
        }
    }
}
