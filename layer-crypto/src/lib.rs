//! Cryptographic envelope for MTProto 2.0 messages.
//!
//! Provides:
//! - [`AuthKey`]: the 256-byte session key and its identifier
//! - AES-256-IGE ([`ige`])
//! - [`encrypt_data_v2`] / [`decrypt_data_v2`]: `auth_key_id || msg_key || ciphertext`
//!
//! Both directions take the [`Side`] that *sent* the data, so the same
//! functions serve a client (encrypt as `Client`, decrypt as `Server`) and a
//! test double playing the server.

#![deny(unsafe_code)]

mod auth_key;
pub mod ige;

pub use auth_key::AuthKey;

/// Errors from the MTProto 2.0 envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
    /// The OS random source failed while generating padding.
    Random(getrandom::Error),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
            Self::Random(e) => write!(f, "random source: {e}"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Which peer produced a message; selects the key-derivation offset `x`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Client → server (`x = 0`).
    Client,
    /// Server → client (`x = 8`).
    Server,
}

impl Side {
    fn x(self) -> usize {
        match self { Side::Client => 0, Side::Server => 8 }
    }
}

const HEADER_LEN: usize = 8 + 16;

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    parts.iter().for_each(|p| h.update(p));
    h.finalize().into()
}

fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256(&[msg_key, &auth_key.data[x..x + 36]]);
    let sha_b = sha256(&[&auth_key.data[40 + x..76 + x], msg_key]);

    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&sha_a[..8]);
    key[8..24].copy_from_slice(&sha_b[8..24]);
    key[24..].copy_from_slice(&sha_a[24..]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&sha_b[..8]);
    iv[8..24].copy_from_slice(&sha_a[8..24]);
    iv[24..].copy_from_slice(&sha_b[24..]);

    (key, iv)
}

fn msg_key_for(auth_key: &AuthKey, padded: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256(&[&auth_key.data[88 + x..120 + x], padded]);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

/// Padding length: at least 12 bytes, total a multiple of 16.
fn padding_len(len: usize) -> usize {
    16 + (16 - len % 16)
}

/// Encrypt `plaintext` as `side` and return `auth_key_id || msg_key || ciphertext`.
pub fn encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey, side: Side) -> Result<Vec<u8>, CryptoError> {
    let mut rnd = [0u8; 32];
    getrandom::getrandom(&mut rnd).map_err(CryptoError::Random)?;
    Ok(encrypt_with_padding(plaintext, auth_key, side, &rnd))
}

fn encrypt_with_padding(plaintext: &[u8], auth_key: &AuthKey, side: Side, rnd: &[u8; 32]) -> Vec<u8> {
    let pad = padding_len(plaintext.len());
    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + pad);
    out.extend_from_slice(&auth_key.key_id);
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(plaintext);
    out.extend_from_slice(&rnd[..pad]);

    let msg_key = msg_key_for(auth_key, &out[HEADER_LEN..], side);
    let (key, iv) = calc_key(auth_key, &msg_key, side);
    ige::ige_encrypt(&mut out[HEADER_LEN..], &key, &iv);
    out[8..HEADER_LEN].copy_from_slice(&msg_key);
    out
}

/// Decrypt a frame produced by `side` and return the padded plaintext.
///
/// `frame` must start with `auth_key_id || msg_key`.
pub fn decrypt_data_v2(frame: &[u8], auth_key: &AuthKey, side: Side) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < HEADER_LEN || (frame.len() - HEADER_LEN) % 16 != 0 {
        return Err(CryptoError::InvalidBuffer);
    }
    if auth_key.key_id != frame[..8] {
        return Err(CryptoError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&frame[8..HEADER_LEN]);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    let mut plaintext = frame[HEADER_LEN..].to_vec();
    ige::ige_decrypt(&mut plaintext, &key, &iv);

    if msg_key != msg_key_for(auth_key, &plaintext, side) {
        return Err(CryptoError::MessageKeyMismatch);
    }
    Ok(plaintext)
}
