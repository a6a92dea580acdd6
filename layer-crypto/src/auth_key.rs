//! The 256-byte authorization key shared by client and server.

use sha1::{Digest, Sha1};

/// An authorization key plus its 8-byte identifier.
///
/// The key is immutable for the lifetime of a session; wrap it in an `Arc`
/// to share it between the sender and the encryption layer.
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    pub(crate) key_id: [u8; 8],
}

impl AuthKey {
    /// Construct from the raw 256 bytes produced by the key exchange.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha: [u8; 20] = Sha1::digest(data).into();
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&sha[12..20]);
        Self { data, key_id }
    }

    /// Return the raw 256-byte representation (for persistence).
    pub fn to_bytes(&self) -> [u8; 256] { self.data }

    /// The key identifier: the lower 64 bits of SHA-1(key).
    pub fn key_id(&self) -> [u8; 8] { self.key_id }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey(id={:#018x})", u64::from_le_bytes(self.key_id))
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool { self.key_id == other.key_id }
}

impl Eq for AuthKey {}
