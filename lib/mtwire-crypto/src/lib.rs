// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Cryptographic building blocks for MTProto 2.0.
//!
//! Nothing in here knows about sessions or connections. Higher layers
//! combine these functions to build the encrypted envelope and to run
//! the key exchange.
#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
pub mod dh;
pub mod factorize;
pub mod hex;
pub mod kdf;
pub mod obfuscated;
pub mod rsa;
pub mod sha;

pub use auth_key::AuthKey;
use std::fmt;

/// The error type for the decryption of server-sent data.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The ciphertext is either too small or not padded correctly.
    InvalidBuffer,

    /// The server replied with the ID of a different authorization key.
    AuthKeyMismatch,

    /// The key of the message did not match our expectations.
    MessageKeyMismatch,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Error::AuthKeyMismatch => write!(f, "server authkey mismatches with ours"),
            Error::MessageKeyMismatch => write!(f, "server msgkey mismatches with ours"),
        }
    }
}

/// Which end of the connection is producing a message.
///
/// The key derivation reads different windows of the authorization key
/// depending on the direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// The `x` parameter of the key derivation for messages sent by this side.
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }

    /// The opposite side.
    pub fn peer(self) -> Self {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

/// Computes `msg_key` for a padded plaintext sent by `side`.
pub fn calc_msg_key(auth_key: &AuthKey, padded_plaintext: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    // msg_key_large = SHA256 (substr (auth_key, 88+x, 32) + plaintext + random_padding);
    let msg_key_large = sha256!(&auth_key.data[88 + x..88 + x + 32], padded_plaintext);

    // msg_key = substr (msg_key_large, 8, 16);
    let mut msg_key = [0; 16];
    msg_key.copy_from_slice(&msg_key_large[8..8 + 16]);
    msg_key
}

/// Derives the AES-IGE key and IV for a message sent by `side` with the
/// given `msg_key`, following the [MTProto 2.0 algorithm].
///
/// [MTProto 2.0 algorithm]: https://core.telegram.org/mtproto/description#defining-aes-key-and-initialization-vector
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();

    // sha256_a = SHA256 (msg_key + substr (auth_key, x, 36));
    let sha256_a = sha256!(msg_key, &auth_key.data[x..x + 36]);

    // sha256_b = SHA256 (substr (auth_key, 40+x, 36) + msg_key);
    let sha256_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    // aes_key = substr (sha256_a, 0, 8) + substr (sha256_b, 8, 16) + substr (sha256_a, 24, 8);
    let mut aes_key = [0; 32];
    aes_key[0..8].copy_from_slice(&sha256_a[0..8]);
    aes_key[8..24].copy_from_slice(&sha256_b[8..24]);
    aes_key[24..32].copy_from_slice(&sha256_a[24..32]);

    // aes_iv = substr (sha256_b, 0, 8) + substr (sha256_a, 8, 16) + substr (sha256_b, 24, 8);
    let mut aes_iv = [0; 32];
    aes_iv[0..8].copy_from_slice(&sha256_b[0..8]);
    aes_iv[8..24].copy_from_slice(&sha256_a[8..24]);
    aes_iv[24..32].copy_from_slice(&sha256_b[24..32]);

    (aes_key, aes_iv)
}

/// Determines how many bytes of random padding a plaintext of `len` bytes
/// needs: at least 12, and enough to make the total divisible by 16.
pub fn padding_v2_len(len: usize) -> usize {
    12 + (16 - (len + 12) % 16) % 16
}

/// Encrypts an already-padded plaintext, producing
/// `auth_key_id ‖ msg_key ‖ ciphertext`.
pub fn encrypt_padded_data_v2(padded_plaintext: &[u8], auth_key: &AuthKey, side: Side) -> Vec<u8> {
    let msg_key = calc_msg_key(auth_key, padded_plaintext, side);
    let (key, iv) = calc_key(auth_key, &msg_key, side);

    let mut result = Vec::with_capacity(8 + 16 + padded_plaintext.len());
    result.extend(auth_key.key_id);
    result.extend(msg_key);
    let start = result.len();
    result.extend(padded_plaintext);
    aes::ige_encrypt(&mut result[start..], &key, &iv);
    result
}

/// Encrypts the plaintext with random padding appended, as sent by `side`.
pub fn encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey, side: Side) -> Vec<u8> {
    let mut padded = Vec::with_capacity(plaintext.len() + 28);
    padded.extend(plaintext);
    let start = padded.len();
    padded.resize(start + padding_v2_len(plaintext.len()), 0);
    getrandom::fill(&mut padded[start..]).expect("failed to generate a secure padding");

    encrypt_padded_data_v2(&padded, auth_key, side)
}

/// Decrypts a message sent by `side`, returning the padded plaintext.
///
/// The authorization key identifier and the message key are both
/// verified before anything is returned.
pub fn decrypt_data_v2(ciphertext: &[u8], auth_key: &AuthKey, side: Side) -> Result<Vec<u8>, Error> {
    if ciphertext.len() < 24 || (ciphertext.len() - 24) % 16 != 0 {
        return Err(Error::InvalidBuffer);
    }

    if auth_key.key_id != ciphertext[..8] {
        return Err(Error::AuthKeyMismatch);
    }

    let mut msg_key = [0; 16];
    msg_key.copy_from_slice(&ciphertext[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    let mut plaintext = ciphertext[24..].to_vec();
    aes::ige_decrypt(&mut plaintext, &key, &iv);

    if calc_msg_key(auth_key, &plaintext, side) != msg_key {
        return Err(Error::MessageKeyMismatch);
    }

    Ok(plaintext)
}

/// Generate the AES key and initialization vector from the server nonce
/// and the new client nonce. This is done after the DH exchange.
pub fn generate_key_data_from_nonce(
    server_nonce: &[u8; 16],
    new_nonce: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let hash1 = sha1!(new_nonce, server_nonce);
    let hash2 = sha1!(server_nonce, new_nonce);
    let hash3 = sha1!(new_nonce, new_nonce);

    // key = hash1 + hash2[:12]
    let mut key = [0; 32];
    key[..20].copy_from_slice(&hash1);
    key[20..].copy_from_slice(&hash2[..12]);

    // iv = hash2[12:20] + hash3 + new_nonce[:4]
    let mut iv = [0; 32];
    iv[..8].copy_from_slice(&hash2[12..]);
    iv[8..28].copy_from_slice(&hash3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

/// Encrypt data using AES-IGE, padding it with random bytes up to 16.
pub fn encrypt_ige(plaintext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Vec<u8> {
    let mut buffer = plaintext.to_vec();
    let pad_len = (16 - (buffer.len() % 16)) % 16;
    if pad_len != 0 {
        let start = buffer.len();
        buffer.resize(start + pad_len, 0);
        getrandom::fill(&mut buffer[start..]).expect("failed to generate random padding");
    }

    aes::ige_encrypt(&mut buffer, key, iv);
    buffer
}

/// Decrypt data using AES-IGE. Panics if the ciphertext is not padded
/// to 16 bytes.
pub fn decrypt_ige(padded_ciphertext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Vec<u8> {
    let mut buffer = padded_ciphertext.to_vec();
    aes::ige_decrypt(&mut buffer, key, iv);
    buffer
}
