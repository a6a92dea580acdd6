//! The encryption envelope around a [`Message`].

use std::fmt;

use layer_crypto::{AuthKey, CryptoError, Side, decrypt_data_v2, encrypt_data_v2};

use crate::message::Message;

/// Errors raised while sealing or opening a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CipherError {
    Crypto(CryptoError),
    /// The plaintext is shorter than its header or its declared body.
    FrameTooShort,
    /// The frame belongs to a different session.
    SessionMismatch { expected: i64, got: i64 },
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "{e}"),
            Self::FrameTooShort => write!(f, "plaintext shorter than its header"),
            Self::SessionMismatch { expected, got } => {
                write!(f, "session_id {got:#x} does not match {expected:#x}")
            }
        }
    }
}

impl std::error::Error for CipherError {}

impl From<CryptoError> for CipherError {
    fn from(e: CryptoError) -> Self { Self::Crypto(e) }
}

/// Seals outgoing messages and opens incoming frames.
pub trait Cipher: Send + Sync {
    fn encrypt(
        &self,
        auth_key: &AuthKey,
        session_id: i64,
        salt: i64,
        message: &Message,
    ) -> Result<Vec<u8>, CipherError>;

    fn decrypt(&self, auth_key: &AuthKey, session_id: i64, frame: &[u8]) -> Result<Message, CipherError>;
}

/// Client side of MTProto 2.0.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mtproto2;

impl Cipher for Mtproto2 {
    fn encrypt(
        &self,
        auth_key: &AuthKey,
        session_id: i64,
        salt: i64,
        message: &Message,
    ) -> Result<Vec<u8>, CipherError> {
        let plaintext = pack_plaintext(salt, session_id, message);
        Ok(encrypt_data_v2(&plaintext, auth_key, Side::Client)?)
    }

    fn decrypt(&self, auth_key: &AuthKey, session_id: i64, frame: &[u8]) -> Result<Message, CipherError> {
        let plaintext = decrypt_data_v2(frame, auth_key, Side::Server)?;
        unpack_plaintext(&plaintext, session_id)
    }
}

const PLAIN_HEADER: usize = 8 + 8 + 8 + 4 + 4;

/// `salt | session_id | msg_id | seq_no | len | body`, all little-endian.
pub fn pack_plaintext(salt: i64, session_id: i64, message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PLAIN_HEADER + message.body.len());
    buf.extend_from_slice(&salt.to_le_bytes());
    buf.extend_from_slice(&session_id.to_le_bytes());
    buf.extend_from_slice(&message.msg_id.to_le_bytes());
    buf.extend_from_slice(&message.seq_no.to_le_bytes());
    buf.extend_from_slice(&(message.body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&message.body);
    buf
}

/// Inverse of [`pack_plaintext`]. Trailing padding is ignored.
pub fn unpack_plaintext(plaintext: &[u8], session_id: i64) -> Result<Message, CipherError> {
    if plaintext.len() < PLAIN_HEADER {
        return Err(CipherError::FrameTooShort);
    }
    let word = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&plaintext[at..at + 8]);
        i64::from_le_bytes(b)
    };
    let got = word(8);
    if got != session_id {
        return Err(CipherError::SessionMismatch { expected: session_id, got });
    }
    let msg_id = word(16);
    let seq_no = i32::from_le_bytes([plaintext[24], plaintext[25], plaintext[26], plaintext[27]]);
    let len = u32::from_le_bytes([plaintext[28], plaintext[29], plaintext[30], plaintext[31]]) as usize;

    let body = plaintext
        .get(PLAIN_HEADER..PLAIN_HEADER.saturating_add(len))
        .ok_or(CipherError::FrameTooShort)?;
    Ok(Message::new(msg_id, seq_no, body.to_vec()))
}
