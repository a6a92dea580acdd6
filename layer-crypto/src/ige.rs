//! AES-256 in Infinite Garble Extension (IGE) mode.
//!
//! `iv` is 32 bytes: the first half seeds the previous-ciphertext block, the
//! second half the previous-plaintext block.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

const BLOCK: usize = 16;

fn split_iv(iv: &[u8; 32]) -> ([u8; BLOCK], [u8; BLOCK]) {
    let mut a = [0u8; BLOCK];
    let mut b = [0u8; BLOCK];
    a.copy_from_slice(&iv[..BLOCK]);
    b.copy_from_slice(&iv[BLOCK..]);
    (a, b)
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

/// Encrypt `buffer` in place. `buffer.len()` must be a multiple of 16.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % BLOCK, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(BLOCK) {
        let mut plain = [0u8; BLOCK];
        plain.copy_from_slice(chunk);

        xor_into(chunk, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        xor_into(chunk, &prev_plain);

        prev_cipher.copy_from_slice(chunk);
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place. `buffer.len()` must be a multiple of 16.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % BLOCK, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(BLOCK) {
        let mut encrypted = [0u8; BLOCK];
        encrypted.copy_from_slice(chunk);

        xor_into(chunk, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        xor_into(chunk, &prev_cipher);

        prev_plain.copy_from_slice(chunk);
        prev_cipher = encrypted;
    }
}
