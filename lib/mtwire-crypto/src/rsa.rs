// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Textbook RSA as used to protect the inner data of the key exchange.
use crate::sha1;
use num_bigint::BigUint;

/// A server's public RSA key.
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
}

// Serializes `data` the way the wire codec writes `bytes` values.
fn tl_bytes(data: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(data.len() + 8);
    if data.len() < 254 {
        buffer.push(data.len() as u8);
    } else {
        buffer.push(254);
        buffer.extend(&(data.len() as u32).to_le_bytes()[..3]);
    }
    buffer.extend(data);
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
    buffer
}

impl Key {
    /// Parses a key from the decimal representation of its modulus and exponent.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// The lower 64 bits of the SHA-1 of the serialized key, which servers
    /// advertise to let the client know which keys they can decrypt with.
    pub fn fingerprint(&self) -> i64 {
        let sha = sha1!(
            tl_bytes(&self.n.to_bytes_be()),
            tl_bytes(&self.e.to_bytes_be())
        );
        let mut lower = [0; 8];
        lower.copy_from_slice(&sha[12..]);
        i64::from_le_bytes(lower)
    }
}

/// Encrypts `data` with the key, prefixed by its SHA-1 and padded with
/// `random_bytes` up to 255 bytes. `data` can be at most 235 bytes long.
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 256]) -> Vec<u8> {
    assert!(data.len() <= 235, "data too long for rsa");

    let mut to_encrypt = Vec::with_capacity(255);
    to_encrypt.extend(sha1!(data));
    to_encrypt.extend(data);
    let padding_len = 255 - to_encrypt.len();
    to_encrypt.extend(&random_bytes[..padding_len]);

    let encrypted = BigUint::from_bytes_be(&to_encrypt)
        .modpow(&key.e, &key.n)
        .to_bytes_be();

    let mut block = vec![0; 256 - encrypted.len()];
    block.extend(encrypted);
    block
}
